use anyhow::Result;
use env_logger::Env;
use std::env;
use std::path::Path;
use std::process;

use osc_match::{
    load_ledgers, load_registry, materialize, write_all, Matcher, NaturezaMap, RegistryIndex,
    RunSummary, FILE_FULL, FILE_MATCHED, FILE_SUMMARY, FILE_UNMATCHED,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <registry.csv> <ledger-dir> <output-dir>", args[0]);
        eprintln!();
        eprintln!("  registry.csv   canonical roster (oscs_santos.csv export)");
        eprintln!("  ledger-dir     directory with prestacao-contas_*_ano_<YYYY>.csv files");
        eprintln!("  output-dir     where the four result tables are written");
        process::exit(2);
    }

    run(
        Path::new(&args[1]),
        Path::new(&args[2]),
        Path::new(&args[3]),
    )
}

fn run(registry_path: &Path, ledger_dir: &Path, out_dir: &Path) -> Result<()> {
    println!("🔗 Correspondência OSCs × Repasses Municipais");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load canonical roster
    println!("\n📂 Loading organization registry...");
    let organizations = load_registry(registry_path)?;
    println!("✓ Loaded {} organizations", organizations.len());

    // 2. Build name index
    println!("\n🔧 Building name variant index...");
    let index = RegistryIndex::build(organizations)?;
    println!("✓ Indexed {} name variants", index.variant_count());

    // 3. Load ledgers
    println!("\n📂 Loading disbursement ledgers...");
    let records = load_ledgers(ledger_dir)?;
    println!("✓ Loaded {} disbursement rows", records.len());

    // 4. Resolve names and join
    println!("\n🎯 Matching beneficiary names...");
    let mut matcher = Matcher::new(&index);
    let naturezas = NaturezaMap::with_defaults();
    let tables = materialize(&records, &mut matcher, &naturezas);
    println!(
        "✓ Resolved {} distinct names ({} matched rows, {} unmatched names)",
        matcher.cached_count(),
        tables.matched_only.len(),
        tables.unmatched.len()
    );

    // 5. Write the four views
    println!("\n💾 Writing output tables...");
    write_all(&tables, out_dir)?;
    println!("✓ {}", out_dir.join(FILE_FULL).display());
    println!("✓ {}", out_dir.join(FILE_MATCHED).display());
    println!("✓ {}", out_dir.join(FILE_SUMMARY).display());
    println!("✓ {}", out_dir.join(FILE_UNMATCHED).display());

    // 6. Coverage summary
    let summary = RunSummary::from_tables(&tables);
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📊 {}", summary.summary());

    Ok(())
}
