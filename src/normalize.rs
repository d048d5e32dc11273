// 🔤 Name Normalizer - Canonical form for comparison
// "Associação  Beneficente" and "ASSOCIACAO BENEFICENTE" must compare equal

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a name for matching.
///
/// - NFKD decomposition, combining marks dropped ("Ç" → "C", "Ã" → "A")
/// - Any character still outside ASCII is dropped
/// - Upper-cased, leading/trailing whitespace trimmed
///
/// Idempotent: normalizing an already-normalized string is a no-op.
///
/// Example: "  Associação Beneficente " → "ASSOCIACAO BENEFICENTE"
pub fn normalize(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(char::is_ascii)
        .collect::<String>()
        .to_uppercase()
        .trim()
        .to_string()
}

/// Normalize an optional value. Absent input yields the empty string.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
