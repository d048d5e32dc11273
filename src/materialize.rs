// 📊 Materializer - Join + four output views
// Fans the per-name match decision onto every disbursement row, then
// derives the tables the dashboard reads: full join, matched-only,
// per-organization ranking, unmatched review queue.

use crate::loader::DisbursementRecord;
use crate::matching::{MatchTier, Matcher};
use crate::natureza::NaturezaMap;
use crate::normalize::normalize;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

// ============================================================================
// ENRICHED RECORD
// ============================================================================

/// One disbursement row joined with its match decision and legal nature.
/// Created here, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub ano: i32,
    pub beneficiaria_nome: String,
    pub beneficiaria_nome_norm: String,
    pub secretaria_sigla: String,
    pub valor_repasse: f64,

    /// Official name of the linked organization, when matched
    pub match_name: Option<String>,
    pub match_cnpj: Option<String>,
    pub match_tier: MatchTier,
    pub score: f64,

    pub natureza_cod: Option<i64>,
    pub natureza_desc: Option<String>,
}

/// One row of the per-organization ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgSummaryRow {
    pub match_name: String,
    pub match_cnpj: String,
    pub natureza_desc: String,
    pub valor_total: f64,
}

/// One row of the manual-review queue: a distinct unmatched name with
/// its summed amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedRow {
    pub beneficiaria_nome: String,
    pub beneficiaria_nome_norm: String,
    pub valor_total: f64,
}

// ============================================================================
// OUTPUT TABLES
// ============================================================================

/// The four materialized views. Every `full` row appears in exactly one
/// of `matched_only` / `unmatched`.
pub struct OutputTables {
    pub full: Vec<EnrichedRecord>,
    pub matched_only: Vec<EnrichedRecord>,
    pub summary_by_org: Vec<OrgSummaryRow>,
    pub unmatched: Vec<UnmatchedRow>,
}

/// Join every record with its match decision and derive the four views.
pub fn materialize(
    records: &[DisbursementRecord],
    matcher: &mut Matcher,
    naturezas: &NaturezaMap,
) -> OutputTables {
    let mut full = Vec::with_capacity(records.len());

    for record in records {
        let name_norm = normalize(&record.beneficiaria_nome);
        let decision = matcher.resolve(&name_norm);

        let natureza_cod = decision
            .organization
            .as_ref()
            .and_then(|org| matcher.index().natureza_for_cnpj(&org.cnpj));
        let natureza_desc = naturezas.describe_opt(natureza_cod);

        full.push(EnrichedRecord {
            ano: record.ano,
            beneficiaria_nome: record.beneficiaria_nome.clone(),
            beneficiaria_nome_norm: name_norm,
            secretaria_sigla: record.secretaria_sigla.clone(),
            valor_repasse: record.valor_repasse,
            match_name: decision
                .organization
                .as_ref()
                .map(|org| org.razao_social.clone()),
            match_cnpj: decision.organization.as_ref().map(|org| org.cnpj.clone()),
            match_tier: decision.tier,
            score: decision.score,
            natureza_cod,
            natureza_desc,
        });
    }

    let matched_only: Vec<EnrichedRecord> = full
        .iter()
        .filter(|r| r.match_tier.is_matched())
        .cloned()
        .collect();
    let summary_by_org = summarize_by_org(&matched_only);
    let unmatched = summarize_unmatched(&full);

    OutputTables {
        full,
        matched_only,
        summary_by_org,
        unmatched,
    }
}

fn sort_descending_by<T, F: Fn(&T) -> f64>(rows: &mut [T], total: F) {
    rows.sort_by(|a, b| {
        total(b)
            .partial_cmp(&total(a))
            .unwrap_or(Ordering::Equal)
    });
}

/// Group matched rows by (organization, legal nature) and sum amounts,
/// sorted descending by total. This is the ranking artifact.
fn summarize_by_org(matched: &[EnrichedRecord]) -> Vec<OrgSummaryRow> {
    let mut order: Vec<(String, String, String)> = Vec::new();
    let mut totals: HashMap<(String, String, String), f64> = HashMap::new();

    for row in matched {
        let key = (
            row.match_name.clone().unwrap_or_default(),
            row.match_cnpj.clone().unwrap_or_default(),
            row.natureza_desc.clone().unwrap_or_default(),
        );
        if !totals.contains_key(&key) {
            order.push(key.clone());
        }
        *totals.entry(key).or_insert(0.0) += row.valor_repasse;
    }

    let mut rows: Vec<OrgSummaryRow> = order
        .into_iter()
        .map(|key| {
            let valor_total = totals[&key];
            OrgSummaryRow {
                match_name: key.0,
                match_cnpj: key.1,
                natureza_desc: key.2,
                valor_total,
            }
        })
        .collect();

    sort_descending_by(&mut rows, |r| r.valor_total);
    rows
}

/// Distinct unmatched names with summed amounts, sorted descending.
fn summarize_unmatched(full: &[EnrichedRecord]) -> Vec<UnmatchedRow> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut totals: HashMap<(String, String), f64> = HashMap::new();

    for row in full {
        if row.match_tier.is_matched() {
            continue;
        }
        let key = (
            row.beneficiaria_nome.clone(),
            row.beneficiaria_nome_norm.clone(),
        );
        if !totals.contains_key(&key) {
            order.push(key.clone());
        }
        *totals.entry(key).or_insert(0.0) += row.valor_repasse;
    }

    let mut rows: Vec<UnmatchedRow> = order
        .into_iter()
        .map(|key| {
            let valor_total = totals[&key];
            UnmatchedRow {
                beneficiaria_nome: key.0,
                beneficiaria_nome_norm: key.1,
                valor_total,
            }
        })
        .collect();

    sort_descending_by(&mut rows, |r| r.valor_total);
    rows
}

// ============================================================================
// RUN SUMMARY
// ============================================================================

/// End-of-run KPI block: how much of the transferred money was linked.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_records: usize,
    pub matched_records: usize,
    pub unmatched_records: usize,
    pub distinct_names: usize,
    pub valor_total: f64,
    pub valor_matched: f64,
    pub valor_unmatched: f64,
    /// Share of the total amount linked to a registered organization
    pub cobertura_pct: f64,
    pub generated_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_tables(tables: &OutputTables) -> Self {
        let valor_total: f64 = tables.full.iter().map(|r| r.valor_repasse).sum();
        let valor_matched: f64 = tables.matched_only.iter().map(|r| r.valor_repasse).sum();
        let valor_unmatched = valor_total - valor_matched;

        let cobertura_pct = if valor_total > 0.0 {
            valor_matched / valor_total * 100.0
        } else {
            0.0
        };

        let distinct_names = tables
            .full
            .iter()
            .map(|r| r.beneficiaria_nome_norm.as_str())
            .collect::<HashSet<_>>()
            .len();

        let matched_records = tables.matched_only.len();

        RunSummary {
            total_records: tables.full.len(),
            matched_records,
            unmatched_records: tables.full.len() - matched_records,
            distinct_names,
            valor_total,
            valor_matched,
            valor_unmatched,
            cobertura_pct,
            generated_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows ({} matched, {} unmatched, {} distinct names), R$ {} of R$ {} linked ({:.1}% coverage)",
            self.total_records,
            self.matched_records,
            self.unmatched_records,
            self.distinct_names,
            decimal_comma(self.valor_matched),
            decimal_comma(self.valor_total),
            self.cobertura_pct
        )
    }
}

// ============================================================================
// CSV WRITERS (semicolon-separated, decimal comma)
// ============================================================================

pub const FILE_FULL: &str = "tabela_recursos_osc_match_completo.csv";
pub const FILE_MATCHED: &str = "tabela_recursos_osc_correspondidos.csv";
pub const FILE_SUMMARY: &str = "tabela_resumo_recursos_por_osc.csv";
pub const FILE_UNMATCHED: &str = "relatorio_nomes_nao_correspondidos.csv";

/// Format an amount with a decimal comma ("1234.5" → "1234,50"),
/// matching the locale of the source ledgers.
fn decimal_comma(value: f64) -> String {
    format!("{:.2}", value).replace('.', ",")
}

fn score_comma(value: f64) -> String {
    format!("{:.4}", value).replace('.', ",")
}

/// Write all four views into `out_dir`.
pub fn write_all(tables: &OutputTables, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    write_records(&tables.full, &out_dir.join(FILE_FULL))?;
    write_records(&tables.matched_only, &out_dir.join(FILE_MATCHED))?;
    write_summary(&tables.summary_by_org, &out_dir.join(FILE_SUMMARY))?;
    write_unmatched(&tables.unmatched, &out_dir.join(FILE_UNMATCHED))?;
    Ok(())
}

fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))
}

fn write_records(rows: &[EnrichedRecord], path: &Path) -> Result<()> {
    let mut writer = open_writer(path)?;

    writer.write_record([
        "ano_recurso",
        "beneficiaria_nome",
        "beneficiaria_nome_norm",
        "secretaria_sigla",
        "valor_repasse",
        "match_name",
        "match_cnpj",
        "match_type",
        "score",
        "cd_natureza_juridica",
        "natureza_juridica_desc",
    ])?;

    for row in rows {
        writer.write_record([
            row.ano.to_string(),
            row.beneficiaria_nome.clone(),
            row.beneficiaria_nome_norm.clone(),
            row.secretaria_sigla.clone(),
            decimal_comma(row.valor_repasse),
            row.match_name.clone().unwrap_or_default(),
            row.match_cnpj.clone().unwrap_or_default(),
            row.match_tier.as_str().to_string(),
            score_comma(row.score),
            row.natureza_cod.map(|c| c.to_string()).unwrap_or_default(),
            row.natureza_desc.clone().unwrap_or_default(),
        ])?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_summary(rows: &[OrgSummaryRow], path: &Path) -> Result<()> {
    let mut writer = open_writer(path)?;

    writer.write_record([
        "match_name",
        "match_cnpj",
        "natureza_juridica_desc",
        "valor_repasse",
    ])?;

    for row in rows {
        writer.write_record([
            row.match_name.clone(),
            row.match_cnpj.clone(),
            row.natureza_desc.clone(),
            decimal_comma(row.valor_total),
        ])?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_unmatched(rows: &[UnmatchedRow], path: &Path) -> Result<()> {
    let mut writer = open_writer(path)?;

    writer.write_record(["beneficiaria_nome", "beneficiaria_nome_norm", "valor_repasse"])?;

    for row in rows {
        writer.write_record([
            row.beneficiaria_nome.clone(),
            row.beneficiaria_nome_norm.clone(),
            decimal_comma(row.valor_total),
        ])?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Organization, RegistryIndex};

    fn org(cnpj: &str, razao: &str, natureza: Option<i64>) -> Organization {
        Organization {
            cnpj: cnpj.to_string(),
            razao_social: razao.to_string(),
            nome_fantasia: None,
            natureza_juridica: natureza,
        }
    }

    fn record(ano: i32, nome: &str, valor: f64) -> DisbursementRecord {
        DisbursementRecord {
            ano,
            beneficiaria_nome: nome.to_string(),
            valor_repasse: valor,
            secretaria_sigla: "SEDS".to_string(),
        }
    }

    fn test_tables() -> OutputTables {
        let index = RegistryIndex::build(vec![
            org("111", "Instituto Alpha Beta", Some(3999)),
            org("222", "Casa Vovo Dina", Some(3069)),
        ])
        .unwrap();
        let mut matcher = Matcher::new(&index);
        let naturezas = NaturezaMap::with_defaults();

        let records = vec![
            record(2023, "Instituto Alpha Beta", 1000.0),
            record(2024, "INSTITUTO ALPHA BETA", 500.0),
            record(2024, "Casa Vovó Dina", 200.0),
            record(2023, "ASSOCIACAO XYZ", 75.5),
            record(2024, "ASSOCIACAO XYZ", 24.5),
        ];

        materialize(&records, &mut matcher, &naturezas)
    }

    #[test]
    fn test_full_view_keeps_every_record() {
        let tables = test_tables();
        assert_eq!(tables.full.len(), 5);
    }

    #[test]
    fn test_partition_invariant() {
        let tables = test_tables();

        let matched = tables
            .full
            .iter()
            .filter(|r| r.match_tier.is_matched())
            .count();
        let unmatched = tables
            .full
            .iter()
            .filter(|r| !r.match_tier.is_matched())
            .count();

        assert_eq!(matched + unmatched, tables.full.len());
        assert_eq!(tables.matched_only.len(), matched);

        let unmatched_total: f64 = tables.unmatched.iter().map(|r| r.valor_total).sum();
        let unmatched_rows_total: f64 = tables
            .full
            .iter()
            .filter(|r| !r.match_tier.is_matched())
            .map(|r| r.valor_repasse)
            .sum();
        assert!((unmatched_total - unmatched_rows_total).abs() < 1e-9);
    }

    #[test]
    fn test_same_name_gets_same_decision_across_years() {
        let tables = test_tables();

        let decisions: Vec<&EnrichedRecord> = tables
            .full
            .iter()
            .filter(|r| r.beneficiaria_nome_norm == "INSTITUTO ALPHA BETA")
            .collect();

        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].match_cnpj, decisions[1].match_cnpj);
        assert_eq!(decisions[0].match_tier, decisions[1].match_tier);
        assert_eq!(decisions[0].score, decisions[1].score);
    }

    #[test]
    fn test_enrichment_attaches_natureza() {
        let tables = test_tables();

        let alpha = tables
            .matched_only
            .iter()
            .find(|r| r.match_cnpj.as_deref() == Some("111"))
            .unwrap();
        assert_eq!(alpha.natureza_cod, Some(3999));
        assert_eq!(alpha.natureza_desc.as_deref(), Some("Associacao Privada"));

        let xyz = tables
            .full
            .iter()
            .find(|r| r.beneficiaria_nome == "ASSOCIACAO XYZ")
            .unwrap();
        assert_eq!(xyz.match_tier, MatchTier::None);
        assert_eq!(xyz.natureza_cod, None);
        assert_eq!(xyz.natureza_desc, None);
    }

    #[test]
    fn test_summary_totals_match_matched_amounts() {
        let tables = test_tables();

        let summary_total: f64 = tables.summary_by_org.iter().map(|r| r.valor_total).sum();
        let matched_total: f64 = tables.matched_only.iter().map(|r| r.valor_repasse).sum();
        assert!((summary_total - matched_total).abs() < 1e-9);

        // Sorted descending: Instituto Alpha Beta (1500) before Casa Vovo Dina (200)
        assert_eq!(tables.summary_by_org[0].match_cnpj, "111");
        assert!((tables.summary_by_org[0].valor_total - 1500.0).abs() < 1e-9);
        assert_eq!(tables.summary_by_org[1].match_cnpj, "222");
    }

    #[test]
    fn test_unmatched_dedup_sums_amounts() {
        let tables = test_tables();

        assert_eq!(tables.unmatched.len(), 1);
        assert_eq!(tables.unmatched[0].beneficiaria_nome, "ASSOCIACAO XYZ");
        assert!((tables.unmatched[0].valor_total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_summary_coverage() {
        let tables = test_tables();
        let summary = RunSummary::from_tables(&tables);

        assert_eq!(summary.total_records, 5);
        assert_eq!(summary.matched_records, 3);
        assert_eq!(summary.unmatched_records, 2);
        assert_eq!(summary.distinct_names, 3);
        assert!((summary.valor_total - 1800.0).abs() < 1e-9);
        assert!((summary.valor_matched - 1700.0).abs() < 1e-9);
        assert!((summary.cobertura_pct - 1700.0 / 1800.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_decimal_comma_formatting() {
        assert_eq!(decimal_comma(1234.5), "1234,50");
        assert_eq!(decimal_comma(0.0), "0,00");
        assert_eq!(score_comma(0.4762), "0,4762");
    }

    #[test]
    fn test_write_all_produces_four_files() {
        let tables = test_tables();
        let dir = tempfile::tempdir().unwrap();

        write_all(&tables, dir.path()).unwrap();

        for name in [FILE_FULL, FILE_MATCHED, FILE_SUMMARY, FILE_UNMATCHED] {
            assert!(dir.path().join(name).exists());
        }

        let full = std::fs::read_to_string(dir.path().join(FILE_FULL)).unwrap();
        let mut lines = full.lines();
        assert!(lines.next().unwrap().starts_with("ano_recurso;beneficiaria_nome"));
        // Semicolon-separated with decimal comma amounts
        assert!(full.contains("1000,00"));
        assert!(full.contains(";Exact;"));
    }
}
