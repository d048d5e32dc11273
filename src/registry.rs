// 🏛️ Organization Registry - Canonical roster + name variant index
// Every organization contributes one or two normalized name variants
// (razão social + nome fantasia). The index maps each variant back to
// its organization and is read-only once built.

use crate::normalize::{normalize, normalize_opt};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// ORGANIZATION
// ============================================================================

/// One organization from the canonical roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Tax identifier (CNPJ) - unique and stable
    pub cnpj: String,

    /// Legal name (razão social)
    pub razao_social: String,

    /// Trade name (nome fantasia), when registered
    pub nome_fantasia: Option<String>,

    /// Legal-nature code (natureza jurídica), when present
    pub natureza_juridica: Option<i64>,
}

/// CNPJ reduced to its digits, for prefix comparison.
/// "58.258.633/0001-84" and "58258633000184" identify the same entity.
pub fn cnpj_digits(cnpj: &str) -> String {
    cnpj.chars().filter(|c| c.is_ascii_digit()).collect()
}

// ============================================================================
// CONFIGURATION ERROR
// ============================================================================

/// Fatal setup failure. Matching against a missing or empty registry is
/// meaningless, so the run aborts before producing any output.
#[derive(Debug, Clone)]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        ConfigurationError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigurationError {}

// ============================================================================
// REGISTRY INDEX
// ============================================================================

/// Lookup from normalized name variant to organization.
///
/// First-wins: when two organizations normalize to the same variant, the
/// earlier one keeps the key and the collision is logged. The shadowed
/// organization stays reachable through its other variant, if it has one.
#[derive(Debug)]
pub struct RegistryIndex {
    organizations: Vec<Organization>,
    by_variant: HashMap<String, usize>,
    by_cnpj: HashMap<String, usize>,
    /// Variant keys in insertion order. This is the candidate pool for
    /// substring/fuzzy scans; stable order keeps tie-breaking deterministic.
    variants: Vec<String>,
}

impl RegistryIndex {
    /// Build the index from the roster, in registry order.
    pub fn build(organizations: Vec<Organization>) -> Result<Self, ConfigurationError> {
        if organizations.is_empty() {
            return Err(ConfigurationError::new(
                "organization registry is empty, nothing to match against",
            ));
        }

        let mut index = RegistryIndex {
            organizations,
            by_variant: HashMap::new(),
            by_cnpj: HashMap::new(),
            variants: Vec::new(),
        };

        for i in 0..index.organizations.len() {
            let razao = normalize(&index.organizations[i].razao_social);
            let fantasia = normalize_opt(index.organizations[i].nome_fantasia.as_deref());

            if !razao.is_empty() {
                index.insert_variant(razao.clone(), i);
            }
            if !fantasia.is_empty() && fantasia != razao {
                index.insert_variant(fantasia, i);
            }

            let digits = cnpj_digits(&index.organizations[i].cnpj);
            if !digits.is_empty() {
                index.by_cnpj.entry(digits).or_insert(i);
            }
        }

        Ok(index)
    }

    fn insert_variant(&mut self, variant: String, org_idx: usize) {
        if let Some(&existing) = self.by_variant.get(&variant) {
            if existing != org_idx {
                warn!(
                    "name variant {:?} of CNPJ {} already taken by CNPJ {}, keeping the first",
                    variant, self.organizations[org_idx].cnpj, self.organizations[existing].cnpj
                );
            }
            return;
        }
        self.by_variant.insert(variant.clone(), org_idx);
        self.variants.push(variant);
    }

    /// Exact lookup by normalized name variant.
    pub fn get(&self, variant: &str) -> Option<&Organization> {
        self.by_variant
            .get(variant)
            .map(|&i| &self.organizations[i])
    }

    /// Candidate pool for substring/fuzzy scans, in insertion order.
    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    /// All organizations, in registry order.
    pub fn organizations(&self) -> &[Organization] {
        &self.organizations
    }

    /// First organization whose CNPJ digits start with `prefix`.
    /// The 8-digit root is enough to identify a manual-override target.
    pub fn find_by_cnpj_prefix(&self, prefix: &str) -> Option<&Organization> {
        let prefix = cnpj_digits(prefix);
        if prefix.is_empty() {
            return None;
        }
        self.organizations
            .iter()
            .find(|o| cnpj_digits(&o.cnpj).starts_with(&prefix))
    }

    /// Legal-nature code for a CNPJ.
    pub fn natureza_for_cnpj(&self, cnpj: &str) -> Option<i64> {
        self.by_cnpj
            .get(&cnpj_digits(cnpj))
            .and_then(|&i| self.organizations[i].natureza_juridica)
    }

    /// Number of organizations in the roster.
    pub fn organization_count(&self) -> usize {
        self.organizations.len()
    }

    /// Number of distinct name variants indexed.
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
