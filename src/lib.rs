// OSC Record Linkage - Core Library
// Links the canonical roster of civil-society organizations to the
// municipal disbursement ledgers and materializes the audit tables.

pub mod loader;
pub mod matching;
pub mod materialize;
pub mod natureza;
pub mod normalize;
pub mod registry;
pub mod rules;

// Re-export commonly used types
pub use loader::{
    load_ledgers, load_registry, parse_amount, read_file_as_utf8, sniff_delimiter,
    DisbursementRecord,
};
pub use matching::{MatchResult, MatchTier, MatchedOrg, Matcher, MatcherConfig};
pub use materialize::{
    materialize, write_all, EnrichedRecord, OrgSummaryRow, OutputTables, RunSummary, UnmatchedRow,
    FILE_FULL, FILE_MATCHED, FILE_SUMMARY, FILE_UNMATCHED,
};
pub use natureza::NaturezaMap;
pub use normalize::{normalize, normalize_opt};
pub use registry::{cnpj_digits, ConfigurationError, Organization, RegistryIndex};
pub use rules::{OverrideRule, OverrideTable};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
