// ⚖️ Natureza Jurídica - Legal-nature enrichment
// Code → human descriptor; unknown codes pass through as their raw value

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Legal-nature descriptor table.
///
/// Codes follow the national natureza jurídica enumeration; only the
/// forms that occur among civil-society organizations carry a label.
/// Lookup never fails: unknown codes degrade to the raw number as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaturezaMap {
    labels: HashMap<i64, String>,
}

impl NaturezaMap {
    /// Create an empty table (every code passes through raw).
    pub fn new() -> Self {
        NaturezaMap {
            labels: HashMap::new(),
        }
    }

    /// Table with the legal forms present in the registry data.
    pub fn with_defaults() -> Self {
        let mut map = NaturezaMap::new();
        map.insert(3999, "Associacao Privada");
        map.insert(3069, "Fundacao Privada");
        map.insert(3220, "Organizacao Religiosa");
        map.insert(3301, "Organizacao Social (OS)");
        map
    }

    pub fn insert(&mut self, code: i64, label: impl Into<String>) {
        self.labels.insert(code, label.into());
    }

    /// Descriptor for a code. Unknown codes degrade to the raw number.
    pub fn describe(&self, code: i64) -> String {
        self.labels
            .get(&code)
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }

    /// Descriptor for an optional code (absent stays absent).
    pub fn describe_opt(&self, code: Option<i64>) -> Option<String> {
        code.map(|c| self.describe(c))
    }

    /// Number of labeled codes.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for NaturezaMap {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        let map = NaturezaMap::with_defaults();

        assert_eq!(map.describe(3999), "Associacao Privada");
        assert_eq!(map.describe(3069), "Fundacao Privada");
        assert_eq!(map.describe(3220), "Organizacao Religiosa");
        assert_eq!(map.describe(3301), "Organizacao Social (OS)");
    }

    #[test]
    fn test_unknown_code_passes_through_raw() {
        let map = NaturezaMap::with_defaults();
        assert_eq!(map.describe(2062), "2062");
    }

    #[test]
    fn test_describe_opt() {
        let map = NaturezaMap::with_defaults();

        assert_eq!(map.describe_opt(Some(3999)), Some("Associacao Privada".to_string()));
        assert_eq!(map.describe_opt(Some(1234)), Some("1234".to_string()));
        assert_eq!(map.describe_opt(None), None);
    }

    #[test]
    fn test_custom_label_overrides_nothing_else() {
        let mut map = NaturezaMap::new();
        map.insert(4000, "Cooperativa");

        assert_eq!(map.describe(4000), "Cooperativa");
        assert_eq!(map.describe(3999), "3999");
        assert_eq!(map.len(), 1);
    }
}
