// 🏷️ Manual Override Rules - Rules as Data
// Known data-entry anomalies in the ledgers that no general matching
// tier can resolve (acronym drift, renamed entities). Kept as data so
// new anomalies are added without touching matching logic.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// One override: if every fragment appears in the normalized beneficiary
/// name, the name resolves to the organization whose CNPJ starts with
/// `target_cnpj_prefix` (digits only, the 8-digit root is enough).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRule {
    /// Rule ID for audit output
    pub id: String,

    /// Fragments that must ALL be contained in the normalized name
    pub fragments: Vec<String>,

    /// CNPJ prefix identifying the target organization
    pub target_cnpj_prefix: String,

    /// Why this rule exists
    pub description: Option<String>,
}

impl OverrideRule {
    /// Check whether every fragment is contained in the normalized name.
    pub fn matches(&self, name_norm: &str) -> bool {
        !self.fragments.is_empty()
            && self
                .fragments
                .iter()
                .all(|fragment| name_norm.contains(fragment.as_str()))
    }
}

// ============================================================================
// OVERRIDE TABLE
// ============================================================================

/// Ordered override table. The first matching rule wins, so rule order
/// is the priority.
pub struct OverrideTable {
    rules: Vec<OverrideRule>,
}

impl OverrideTable {
    /// Create an empty table (no overrides).
    pub fn new() -> Self {
        OverrideTable { rules: Vec::new() }
    }

    /// Table with the anomalies known from curation of the ledgers.
    pub fn with_defaults() -> Self {
        OverrideTable {
            rules: vec![OverrideRule {
                id: "galp".to_string(),
                fragments: vec!["GALP".to_string(), "LAR POBRE".to_string()],
                target_cnpj_prefix: "58258633".to_string(),
                description: Some(
                    "GALP - Grupo Amigo do Lar Pobre appears in the ledgers under its \
                     old acronym; registered as Grupo de Apoio a Inclusao Social e \
                     Profissional"
                        .to_string(),
                ),
            }],
        }
    }

    /// Load rules from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read override rules file: {:?}", path.as_ref()))?;

        let rules: Vec<OverrideRule> =
            serde_json::from_str(&content).context("Failed to parse override rules JSON")?;

        Ok(OverrideTable { rules })
    }

    /// Append a rule (lowest priority).
    pub fn add_rule(&mut self, rule: OverrideRule) {
        self.rules.push(rule);
    }

    /// First rule matching the normalized name.
    pub fn find_match(&self, name_norm: &str) -> Option<&OverrideRule> {
        self.rules.iter().find(|rule| rule.matches(name_norm))
    }

    /// Number of rules loaded.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for OverrideTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================
