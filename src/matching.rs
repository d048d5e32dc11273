// 🎯 Matching Engine - Tiered beneficiary-name resolution
// Four tiers tried in order, first success wins:
//   Manual override → Exact → Substring → Fuzzy
// Cheap, high-precision tiers run before expensive, low-precision ones.
// One decision per distinct normalized name, memoized for the run.

use crate::registry::{Organization, RegistryIndex};
use crate::rules::OverrideTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// MATCH TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTier {
    /// Explicit override rule for a known data-entry anomaly
    Manual,

    /// Direct hit on a normalized name variant
    Exact,

    /// One name contained in the other, above the length-ratio threshold
    Substring,

    /// Sequence similarity above the cutoff
    Fuzzy,

    /// No tier matched
    None,
}

impl MatchTier {
    /// Label used in the audit columns of the output tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Manual => "Manual",
            MatchTier::Exact => "Exact",
            MatchTier::Substring => "Substring",
            MatchTier::Fuzzy => "Fuzzy",
            MatchTier::None => "None",
        }
    }

    pub fn is_matched(&self) -> bool {
        !matches!(self, MatchTier::None)
    }
}

// ============================================================================
// MATCH RESULT
// ============================================================================

/// Organization a beneficiary name was linked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedOrg {
    pub razao_social: String,
    pub cnpj: String,
}

impl MatchedOrg {
    fn from_org(org: &Organization) -> Self {
        MatchedOrg {
            razao_social: org.razao_social.clone(),
            cnpj: org.cnpj.clone(),
        }
    }
}

/// Decision for one distinct normalized beneficiary name.
///
/// Tier `None` carries no organization and score 0.0; every other tier
/// carries exactly one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub organization: Option<MatchedOrg>,

    pub tier: MatchTier,

    /// Confidence score (0.0 - 1.0), meaningful only when tier != None
    pub score: f64,
}

impl MatchResult {
    fn none() -> Self {
        MatchResult {
            organization: None,
            tier: MatchTier::None,
            score: 0.0,
        }
    }

    fn matched(org: &Organization, tier: MatchTier, score: f64) -> Self {
        MatchResult {
            organization: Some(MatchedOrg::from_org(org)),
            tier,
            score,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.tier.is_matched()
    }
}

// ============================================================================
// MATCHER CONFIG
// ============================================================================

/// Tunable thresholds. Defaults mirror the values the ledgers were curated
/// with; none of them is known to be optimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Substring acceptance threshold (default: 0.6)
    pub substring_threshold: f64,

    /// Relaxed threshold for long candidates (default: 0.4)
    pub substring_threshold_long: f64,

    /// Candidate length above which the relaxed threshold applies (default: 15)
    pub long_candidate_len: usize,

    /// Candidates shorter than this are skipped in the substring scan
    /// (default: 4) - short tokens produce spurious containment hits
    pub min_candidate_len: usize,

    /// Bonus added when the containment is a prefix match (default: 0.1)
    pub prefix_bonus: f64,

    /// Minimum sequence ratio for a fuzzy match (default: 0.7)
    pub fuzzy_cutoff: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            substring_threshold: 0.6,
            substring_threshold_long: 0.4,
            long_candidate_len: 15,
            min_candidate_len: 4,
            prefix_bonus: 0.1,
            fuzzy_cutoff: 0.7,
        }
    }
}

// ============================================================================
// MATCHER
// ============================================================================

/// Resolves beneficiary names against the registry index.
///
/// Results are memoized per distinct normalized name. The cache lives in
/// the matcher, scoped to one run; the index is never mutated.
pub struct Matcher<'a> {
    index: &'a RegistryIndex,
    overrides: OverrideTable,
    config: MatcherConfig,
    cache: HashMap<String, MatchResult>,
}

impl<'a> Matcher<'a> {
    /// Matcher with the default override table and thresholds.
    pub fn new(index: &'a RegistryIndex) -> Self {
        Matcher::with_config(index, OverrideTable::with_defaults(), MatcherConfig::default())
    }

    pub fn with_config(
        index: &'a RegistryIndex,
        overrides: OverrideTable,
        config: MatcherConfig,
    ) -> Self {
        Matcher {
            index,
            overrides,
            config,
            cache: HashMap::new(),
        }
    }

    pub fn index(&self) -> &RegistryIndex {
        self.index
    }

    /// Number of distinct names resolved so far.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Resolve a normalized beneficiary name. Empty input is `None`
    /// immediately, without attempting any tier.
    pub fn resolve(&mut self, name_norm: &str) -> MatchResult {
        if name_norm.is_empty() {
            return MatchResult::none();
        }

        if let Some(hit) = self.cache.get(name_norm) {
            return hit.clone();
        }

        let result = self.resolve_uncached(name_norm);
        self.cache.insert(name_norm.to_string(), result.clone());
        result
    }

    fn resolve_uncached(&self, name: &str) -> MatchResult {
        if let Some(result) = self.try_manual(name) {
            return result;
        }
        if let Some(result) = self.try_exact(name) {
            return result;
        }
        if let Some(result) = self.try_substring(name) {
            return result;
        }
        if let Some(result) = self.try_fuzzy(name) {
            return result;
        }
        MatchResult::none()
    }

    /// Tier 1: manual override rules.
    /// A rule whose target CNPJ is absent from the registry falls through.
    fn try_manual(&self, name: &str) -> Option<MatchResult> {
        let rule = self.overrides.find_match(name)?;
        let org = self.index.find_by_cnpj_prefix(&rule.target_cnpj_prefix)?;
        Some(MatchResult::matched(org, MatchTier::Manual, 1.0))
    }

    /// Tier 2: direct key lookup in the index.
    fn try_exact(&self, name: &str) -> Option<MatchResult> {
        let org = self.index.get(name)?;
        Some(MatchResult::matched(org, MatchTier::Exact, 1.0))
    }

    /// Tier 3: containment either way, scored by length ratio.
    ///
    /// Score = len(shorter) / len(longer), +0.1 when one string starts the
    /// other. Threshold 0.6, relaxed to 0.4 when the winning candidate is
    /// longer than 15 characters: a long exact substring is strong evidence
    /// even at a low ratio.
    fn try_substring(&self, name: &str) -> Option<MatchResult> {
        let mut best: Option<(&str, f64)> = None;

        for candidate in self.index.variants() {
            if candidate.len() < self.config.min_candidate_len {
                continue;
            }

            let score = if name.contains(candidate.as_str()) {
                let mut score = candidate.len() as f64 / name.len() as f64;
                if name.starts_with(candidate.as_str()) {
                    score += self.config.prefix_bonus;
                }
                score
            } else if candidate.contains(name) {
                let mut score = name.len() as f64 / candidate.len() as f64;
                if candidate.starts_with(name) {
                    score += self.config.prefix_bonus;
                }
                score
            } else {
                continue;
            };

            // Strictly greater: ties keep the first candidate in registry order
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((candidate, score));
            }
        }

        let (candidate, score) = best?;

        let threshold = if candidate.len() > self.config.long_candidate_len {
            self.config.substring_threshold_long
        } else {
            self.config.substring_threshold
        };
        if score <= threshold {
            return None;
        }

        let org = self.index.get(candidate)?;
        // The prefix bonus can push the ratio past 1.0; cap the reported score
        Some(MatchResult::matched(org, MatchTier::Substring, score.min(1.0)))
    }

    /// Tier 4: sequence similarity over the whole candidate pool.
    /// `quick_ratio` is an upper bound on the full ratio, so candidates
    /// failing it cannot clear the cutoff and are skipped unscored.
    fn try_fuzzy(&self, name: &str) -> Option<MatchResult> {
        let mut best: Option<(&str, f64)> = None;

        for candidate in self.index.variants() {
            if quick_ratio(name, candidate) < self.config.fuzzy_cutoff {
                continue;
            }

            let ratio = sequence_ratio(name, candidate);
            if ratio < self.config.fuzzy_cutoff {
                continue;
            }

            if best.map_or(true, |(_, b)| ratio > b) {
                best = Some((candidate, ratio));
            }
        }

        let (candidate, ratio) = best?;
        let org = self.index.get(candidate)?;
        Some(MatchResult::matched(org, MatchTier::Fuzzy, ratio))
    }
}

// ============================================================================
// SEQUENCE SIMILARITY HELPERS
// ============================================================================

/// Ratcliff/Obershelp similarity: 2*M / (len(a) + len(b)), where M counts
/// the characters covered by recursively taking the longest common
/// contiguous block.
///
/// Example:
/// - sequence_ratio("ABCD", "BCDE") = 0.75
/// - sequence_ratio("CRECHE", "CRECHE") = 1.0
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();

    if total == 0 {
        // Two empty strings are identical
        return 1.0;
    }

    let matches = matching_chars(&a, &b);
    2.0 * matches as f64 / total as f64
}

/// Total characters matched: longest common block, then recurse on the
/// unmatched pieces to its left and right.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (start_a, start_b, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }

    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

/// Longest common contiguous block of `a` and `b`.
/// Returns (start in a, start in b, length); earliest block wins ties.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];

    for i in 0..a.len() {
        let mut curr = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                let len = prev[j] + 1;
                curr[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = curr;
    }

    best
}

/// Upper bound on `sequence_ratio` from character frequencies alone.
/// Used to skip hopeless candidates before the quadratic scan.
pub fn quick_ratio(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();

    if len_a + len_b == 0 {
        return 1.0;
    }

    let mut available: HashMap<char, isize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_insert(0) += 1;
    }

    let mut matches = 0usize;
    for c in a.chars() {
        let count = available.entry(c).or_insert(0);
        if *count > 0 {
            matches += 1;
        }
        *count -= 1;
    }

    2.0 * matches as f64 / (len_a + len_b) as f64
}

// ============================================================================
// TESTS
// ============================================================================
