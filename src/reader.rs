// 📥 Source Reader - Raw delimited files into standard-named rows
// Handles per-state encodings, headerless files and dirty lines

use crate::config::{ColumnType, SourceMapping};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A standardized record keyed by standard column name
pub type Row = BTreeMap<String, String>;

/// One row with its position in the raw file, for audit output
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub source_file: String,
    pub line: u64,
    pub values: Row,
}

/// Counters accumulated while reading one file
#[derive(Debug, Clone, Default)]
pub struct ReadAudit {
    /// Lines that could not be parsed as records (wrong field count, bad quoting)
    pub skipped_lines: usize,

    /// Date values that failed to parse and were coerced to empty
    pub coerced_dates: usize,

    /// Numeric values that failed to parse and were coerced to empty
    pub coerced_numbers: usize,

    /// enum column -> raw values seen with no mapping entry
    pub unmapped_enum_values: BTreeMap<String, BTreeSet<String>>,
}

impl ReadAudit {
    pub fn absorb(&mut self, other: ReadAudit) {
        self.skipped_lines += other.skipped_lines;
        self.coerced_dates += other.coerced_dates;
        self.coerced_numbers += other.coerced_numbers;
        for (column, values) in other.unmapped_enum_values {
            self.unmapped_enum_values
                .entry(column)
                .or_default()
                .extend(values);
        }
    }
}

/// Rows read from one raw file plus what was dropped along the way
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub rows: Vec<SourceRow>,
    pub audit: ReadAudit,
}

// ============================================================================
// READER
// ============================================================================

pub struct SourceReader<'a> {
    mapping: &'a SourceMapping,
}

impl<'a> SourceReader<'a> {
    pub fn new(mapping: &'a SourceMapping) -> Self {
        SourceReader { mapping }
    }

    /// Read one raw file into standard-named rows.
    /// Unmapped columns are dropped; dirty lines are skipped and counted.
    pub fn read_file(&self, path: &Path) -> Result<ReadOutcome> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading raw file {}", path.display()))?;
        let text = decode(&bytes, &self.mapping.read_csv_params.encoding);
        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.read_str(&text, &source_file)
    }

    pub fn read_str(&self, text: &str, source_file: &str) -> Result<ReadOutcome> {
        let params = &self.mapping.read_csv_params;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(params.delimiter as u8)
            .has_headers(params.has_header)
            .flexible(true)
            .from_reader(text.as_bytes());

        // Raw names in file order: the header row, or the configured
        // positional order for headerless files
        let raw_order: Vec<String> = if params.has_header {
            reader
                .headers()
                .context("reading header row")?
                .iter()
                .map(|h| h.trim().to_string())
                .collect()
        } else {
            self.mapping.column_order.clone()
        };

        let mapper: BTreeMap<String, String> = self
            .mapping
            .column_mapper()
            .into_iter()
            .map(|(raw, standard)| (raw.to_string(), standard.to_string()))
            .collect();
        let types = self.mapping.column_types();
        let date_formats = self.mapping.date_formats();

        let mut rows = Vec::new();
        let mut audit = ReadAudit::default();

        for (index, record) in reader.records().enumerate() {
            let line = index as u64 + if params.has_header { 2 } else { 1 };
            let record = match record {
                Ok(r) => r,
                Err(_) => {
                    audit.skipped_lines += 1;
                    continue;
                }
            };
            if record.len() != raw_order.len() {
                audit.skipped_lines += 1;
                continue;
            }

            let mut values = Row::new();
            for (raw_name, field) in raw_order.iter().zip(record.iter()) {
                let Some(standard) = mapper.get(raw_name) else {
                    continue;
                };
                let column_type = types.get(standard.as_str()).copied().unwrap_or_default();
                let value = self.standardize_value(
                    standard,
                    field.trim(),
                    column_type,
                    &date_formats,
                    &mut audit,
                );
                values.insert(standard.clone(), value);
            }

            for column in &self.mapping.state_code_columns {
                values.insert(column.clone(), self.mapping.state_code.clone());
            }
            for (from, targets) in &self.mapping.duplicate_columns {
                let value = values.get(from).cloned().unwrap_or_default();
                for target in targets {
                    values.insert(target.clone(), value.clone());
                }
            }

            rows.push(SourceRow {
                source_file: source_file.to_string(),
                line,
                values,
            });
        }

        Ok(ReadOutcome { rows, audit })
    }

    fn standardize_value(
        &self,
        standard: &str,
        raw: &str,
        column_type: ColumnType,
        date_formats: &BTreeMap<&str, &str>,
        audit: &mut ReadAudit,
    ) -> String {
        if raw.is_empty() {
            return String::new();
        }

        // Enum remapping first; unmapped values pass through but get flagged
        if let Some(values) = self.mapping.enum_mapper.get(standard) {
            return match values.get(raw) {
                Some(mapped) => mapped.clone(),
                None => {
                    audit
                        .unmapped_enum_values
                        .entry(standard.to_string())
                        .or_default()
                        .insert(raw.to_string());
                    raw.to_string()
                }
            };
        }

        match column_type {
            ColumnType::Str => raw.to_string(),
            ColumnType::Date => {
                let format = date_formats.get(standard).copied().unwrap_or("%Y-%m-%d");
                match NaiveDate::parse_from_str(raw, format) {
                    Ok(date) => date.format("%Y-%m-%d").to_string(),
                    Err(_) => {
                        audit.coerced_dates += 1;
                        String::new()
                    }
                }
            }
            ColumnType::Float => match parse_amount(raw) {
                Some(value) => format_amount(value),
                None => {
                    audit.coerced_numbers += 1;
                    String::new()
                }
            },
            ColumnType::Int => match raw.replace(',', "").parse::<i64>() {
                Ok(value) => value.to_string(),
                Err(_) => {
                    audit.coerced_numbers += 1;
                    String::new()
                }
            },
        }
    }
}

// ============================================================================
// VALUE PARSING
// ============================================================================

/// Parse a currency-ish string. Accepts "$1,234.56", "-50", "(100.00)".
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(['$', ','], "");
    let cleaned = cleaned.trim();
    if let Some(inner) = cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(|v| -v);
    }
    cleaned.parse::<f64>().ok()
}

/// Canonical text form of an amount: two decimals, sign preserved
pub fn format_amount(value: f64) -> String {
    format!("{:.2}", value)
}

/// Decode raw bytes using the declared encoding. A utf-8 declaration with
/// invalid sequences falls back to windows-1252 rather than producing
/// replacement characters everywhere.
fn decode(bytes: &[u8], label: &str) -> String {
    let encoding = Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors && encoding == UTF_8 {
        let (text, _, _) = WINDOWS_1252.decode(bytes);
        return text.into_owned();
    }
    text.into_owned()
}

// ============================================================================
// TESTS
// ============================================================================
