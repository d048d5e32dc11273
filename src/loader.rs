// 📂 CSV Loader - Encoding- and delimiter-tolerant ingestion
// Municipal exports arrive as UTF-8 or Windows-1252, with ';' or ','
// fields. The registry must load completely; a broken ledger file is
// skipped with a warning and the run continues.

use crate::registry::{ConfigurationError, Organization};
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

// ============================================================================
// DISBURSEMENT RECORD
// ============================================================================

/// One row of a yearly disbursement ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementRecord {
    /// Ledger year, taken from the filename
    pub ano: i32,

    /// Beneficiary name exactly as written in the ledger
    pub beneficiaria_nome: String,

    /// Transferred amount (R$)
    pub valor_repasse: f64,

    /// Originating secretariat
    pub secretaria_sigla: String,
}

// ============================================================================
// ENCODING / DELIMITER SNIFFING
// ============================================================================

/// Read a file as UTF-8, falling back to Windows-1252 (common for
/// Excel-exported municipal CSVs).
pub fn read_file_as_utf8(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    // Try UTF-8 first; on failure, recover the buffer from the error
    match String::from_utf8(bytes) {
        Ok(content) => Ok(content),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Detect the field delimiter by consistency across the first few lines.
///
/// For each candidate (';', ',', tab), count fields per line. The
/// delimiter producing the most consistent field count (>1 field) wins;
/// nothing viable falls back to ';', the locale default of the sources.
pub fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b';', b',', b'\t'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b';';
    }

    let mut best = b';';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        // Must produce >1 field on the header line to be viable
        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Parse an amount that may use dot or comma decimals ("1234.56",
/// "1.234,56", "R$ 1.234,56"). Blank or unparseable cells count as 0.0,
/// matching how the ledgers were curated.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned = raw.trim().trim_start_matches("R$").trim();
    if cleaned.is_empty() {
        return 0.0;
    }

    let normalized = if let Some(comma) = cleaned.rfind(',') {
        let dot = cleaned.rfind('.');
        if dot.map_or(true, |d| comma > d) {
            // Decimal comma: drop thousands dots, comma becomes the point
            cleaned.replace('.', "").replace(',', ".")
        } else {
            // Decimal dot with comma thousands
            cleaned.replace(',', "")
        }
    } else {
        cleaned.to_string()
    };

    normalized.parse().unwrap_or(0.0)
}

// ============================================================================
// REGISTRY LOADING
// ============================================================================

const COL_CNPJ: &str = "cnpj";
const COL_RAZAO: &str = "tx_razao_social_osc";
const COL_FANTASIA: &str = "tx_nome_fantasia_osc";
const COL_NATUREZA: &str = "cd_natureza_juridica_osc";

/// Load the canonical roster. The registry schema is fixed: the four
/// columns are looked up by their exact names and a missing column is a
/// fatal configuration error, as is an empty file.
pub fn load_registry(path: &Path) -> Result<Vec<Organization>> {
    if !path.exists() {
        return Err(ConfigurationError::new(format!(
            "registry file not found: {}",
            path.display()
        ))
        .into());
    }

    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read registry header in {}", path.display()))?
        .clone();

    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| {
                ConfigurationError::new(format!(
                    "registry column '{}' not found in {}",
                    name,
                    path.display()
                ))
                .into()
            })
    };

    let idx_cnpj = column(COL_CNPJ)?;
    let idx_razao = column(COL_RAZAO)?;
    let idx_fantasia = column(COL_FANTASIA)?;
    let idx_natureza = column(COL_NATUREZA)?;

    let mut organizations = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse registry line {} in {}", line + 2, path.display())
        })?;

        let cnpj = record.get(idx_cnpj).unwrap_or("").trim().to_string();
        let razao_social = record.get(idx_razao).unwrap_or("").trim().to_string();
        if cnpj.is_empty() && razao_social.is_empty() {
            continue;
        }

        let nome_fantasia = record
            .get(idx_fantasia)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let natureza_juridica = record.get(idx_natureza).and_then(parse_natureza);

        organizations.push(Organization {
            cnpj,
            razao_social,
            nome_fantasia,
            natureza_juridica,
        });
    }

    if organizations.is_empty() {
        return Err(ConfigurationError::new(format!(
            "registry {} has no organization rows",
            path.display()
        ))
        .into());
    }

    info!(
        "loaded {} organizations from {}",
        organizations.len(),
        path.display()
    );
    Ok(organizations)
}

/// Parse a legal-nature code that may arrive as "3999", "3999.0" or blank.
fn parse_natureza(raw: &str) -> Option<i64> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|f| f as i64))
}

// ============================================================================
// LEDGER LOADING
// ============================================================================

const LEDGER_PREFIX: &str = "prestacao-contas_prestacao_valor-ano_ano_";

const COL_BENEFICIARIA: &str = "beneficiaria_nome";
const COL_VALOR: &str = "valor_repasse";
const COL_SECRETARIA: &str = "secretaria_sigla";

/// Year from a ledger filename ("..._ano_2024.csv" → 2024).
fn year_from_filename(name: &str) -> Option<i32> {
    name.strip_suffix(".csv")?.rsplit('_').next()?.parse().ok()
}

/// Load every yearly ledger in a directory, in filename order. Files
/// that cannot be decoded or parsed are skipped with a warning; the run
/// continues with the remaining years.
pub fn load_ledgers(dir: &Path) -> Result<Vec<DisbursementRecord>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read ledger directory: {}", dir.display()))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(LEDGER_PREFIX) && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        warn!("no ledger files found in {}", dir.display());
    }

    let mut records = Vec::new();
    for path in &files {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let ano = match year_from_filename(filename) {
            Some(ano) => ano,
            None => {
                warn!("skipping ledger {}: no year in filename", filename);
                continue;
            }
        };

        match load_ledger_file(path, ano) {
            Ok(mut rows) => {
                info!("loaded {} rows for {} from {}", rows.len(), ano, filename);
                records.append(&mut rows);
            }
            Err(e) => warn!("skipping ledger {}: {:#}", filename, e),
        }
    }

    Ok(records)
}

fn load_ledger_file(path: &Path, ano: i32) -> Result<Vec<DisbursementRecord>> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers().context("Failed to read ledger header")?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let idx_nome = position(COL_BENEFICIARIA)
        .ok_or_else(|| anyhow!("column '{}' not found", COL_BENEFICIARIA))?;
    let idx_valor =
        position(COL_VALOR).ok_or_else(|| anyhow!("column '{}' not found", COL_VALOR))?;
    // Older exports predate the secretariat column
    let idx_secretaria = position(COL_SECRETARIA);

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("Failed to parse ledger line {}", line + 2))?;

        rows.push(DisbursementRecord {
            ano,
            beneficiaria_nome: record.get(idx_nome).unwrap_or("").trim().to_string(),
            valor_repasse: parse_amount(record.get(idx_valor).unwrap_or("")),
            secretaria_sigla: idx_secretaria
                .and_then(|i| record.get(i))
                .unwrap_or("")
                .trim()
                .to_string(),
        });
    }

    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sniff_semicolon() {
        let content = "cnpj;tx_razao_social_osc;valor\n1;Casa Azul;10\n2;Lar Feliz;20\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_sniff_comma() {
        let content = "a,b,c\n1,2,3\n4,5,6\n";
        assert_eq!(sniff_delimiter(content), b',');
    }

    #[test]
    fn test_sniff_defaults_to_semicolon() {
        assert_eq!(sniff_delimiter(""), b';');
        assert_eq!(sniff_delimiter("one column only\nstill one\n"), b';');
    }

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("1234.56"), 1234.56);
        assert_eq!(parse_amount("1.234,56"), 1234.56);
        assert_eq!(parse_amount("1,234.56"), 1234.56);
        assert_eq!(parse_amount("R$ 1.234,56"), 1234.56);
        assert_eq!(parse_amount("150000"), 150000.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("n/d"), 0.0);
    }

    #[test]
    fn test_parse_natureza_variants() {
        assert_eq!(parse_natureza("3999"), Some(3999));
        assert_eq!(parse_natureza("3999.0"), Some(3999));
        assert_eq!(parse_natureza(" 3069 "), Some(3069));
        assert_eq!(parse_natureza(""), None);
        assert_eq!(parse_natureza("n/a"), None);
    }

    #[test]
    fn test_year_from_filename() {
        assert_eq!(
            year_from_filename("prestacao-contas_prestacao_valor-ano_ano_2024.csv"),
            Some(2024)
        );
        assert_eq!(year_from_filename("prestacao-contas_ano_.csv"), None);
        assert_eq!(year_from_filename("whatever.txt"), None);
    }

    #[test]
    fn test_read_windows_1252_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin.csv");

        // "ASSOCIAÇÃO" in Windows-1252: Ç = 0xC7, Ã = 0xC3
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"ASSOCIA\xC7\xC3O").unwrap();

        let content = read_file_as_utf8(&path).unwrap();
        assert_eq!(content, "ASSOCIAÇÃO");
    }

    #[test]
    fn test_load_registry_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oscs.csv");
        std::fs::write(
            &path,
            "cnpj;tx_razao_social_osc;tx_nome_fantasia_osc;cd_natureza_juridica_osc\n\
             111;Instituto Alpha Beta;;3999\n\
             222;Grupo de Apoio;GAP;3069.0\n",
        )
        .unwrap();

        let organizations = load_registry(&path).unwrap();

        assert_eq!(organizations.len(), 2);
        assert_eq!(organizations[0].cnpj, "111");
        assert_eq!(organizations[0].nome_fantasia, None);
        assert_eq!(organizations[0].natureza_juridica, Some(3999));
        assert_eq!(organizations[1].nome_fantasia.as_deref(), Some("GAP"));
        assert_eq!(organizations[1].natureza_juridica, Some(3069));
    }

    #[test]
    fn test_load_registry_missing_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oscs.csv");
        std::fs::write(&path, "cnpj;razao\n111;Casa\n").unwrap();

        let err = load_registry(&path).unwrap_err();
        assert!(err.to_string().contains("tx_razao_social_osc"));
    }

    #[test]
    fn test_load_registry_empty_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oscs.csv");
        std::fs::write(
            &path,
            "cnpj;tx_razao_social_osc;tx_nome_fantasia_osc;cd_natureza_juridica_osc\n",
        )
        .unwrap();

        assert!(load_registry(&path).is_err());
    }

    #[test]
    fn test_load_registry_missing_file_is_fatal() {
        assert!(load_registry(Path::new("/nonexistent/oscs.csv")).is_err());
    }

    #[test]
    fn test_load_ledgers_skips_broken_file() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(
            dir.path()
                .join("prestacao-contas_prestacao_valor-ano_ano_2023.csv"),
            "beneficiaria_nome,valor_repasse,secretaria_sigla\n\
             INSTITUTO ALPHA BETA,1000.50,SEDS\n\
             CASA VOVO DINA,200,SECULT\n",
        )
        .unwrap();
        // Missing the amount column entirely
        std::fs::write(
            dir.path()
                .join("prestacao-contas_prestacao_valor-ano_ano_2024.csv"),
            "some;other;file\n1;2;3\n",
        )
        .unwrap();
        // Not a ledger file, ignored
        std::fs::write(dir.path().join("notes.csv"), "a;b\n1;2\n").unwrap();

        let records = load_ledgers(dir.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ano, 2023);
        assert_eq!(records[0].beneficiaria_nome, "INSTITUTO ALPHA BETA");
        assert_eq!(records[0].valor_repasse, 1000.50);
        assert_eq!(records[0].secretaria_sigla, "SEDS");
    }

    #[test]
    fn test_load_ledger_without_secretariat_column() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path()
                .join("prestacao-contas_prestacao_valor-ano_ano_2016.csv"),
            "beneficiaria_nome,valor_repasse\nLAR FELIZ,300.00\n",
        )
        .unwrap();

        let records = load_ledgers(dir.path()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].secretaria_sigla, "");
    }
}
