// 🗂️ Source Config Resolver - Per-jurisdiction column mappings
// One YAML document per state; form configs may inherit from abstract bases

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ============================================================================
// CONFIG ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `inherits` names a key not present in the document
    UnknownBase { source: String, base: String },

    /// Inheritance chain revisits a key
    CyclicInheritance { source: String },

    /// resolve() called with a key not in the document
    UnknownSource { source: String },

    /// An abstract base was resolved as if it were a runnable source
    AbstractSource { source: String },

    /// A resolved config is missing a field needed to run
    Incomplete { source: String, field: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownBase { source, base } => {
                write!(f, "source '{}' inherits unknown base '{}'", source, base)
            }
            ConfigError::CyclicInheritance { source } => {
                write!(f, "cyclic inherits chain through '{}'", source)
            }
            ConfigError::UnknownSource { source } => {
                write!(f, "source '{}' not found in configuration", source)
            }
            ConfigError::AbstractSource { source } => {
                write!(f, "source '{}' is an abstract base, not runnable", source)
            }
            ConfigError::Incomplete { source, field } => {
                write!(f, "source '{}' resolved without required '{}'", source, field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// RAW-READ PARAMETERS
// ============================================================================

/// How to read the delimited file itself, before any mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCsvParams {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// "utf-8", "latin-1"/"windows-1252"; anything else falls back to utf-8
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// False for headerless files whose columns are assigned positionally
    #[serde(default = "default_true")]
    pub has_header: bool,
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ReadCsvParams {
    fn default() -> Self {
        ReadCsvParams {
            delimiter: default_delimiter(),
            encoding: default_encoding(),
            has_header: true,
        }
    }
}

// ============================================================================
// COLUMN SPEC
// ============================================================================

/// Scalar type a raw column is expected to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Str,
    Int,
    Float,
    Date,
}

/// One raw column and how it maps into the standard schema.
/// Columns without a `standard_name` are read and then dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub raw_name: String,

    #[serde(default, rename = "type")]
    pub column_type: ColumnType,

    #[serde(default)]
    pub standard_name: Option<String>,

    /// chrono format string for Date columns, e.g. "%Y%m%d"
    #[serde(default)]
    pub date_format: Option<String>,
}

// ============================================================================
// RAW SOURCE CONFIG (one key in the document)
// ============================================================================

/// One top-level entry in a state config file, before inheritance.
/// Every field is optional so abstract bases can stay partial.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSourceConfig {
    #[serde(default)]
    pub inherits: Option<String>,

    /// Marks a key as an abstract base that cannot be run directly
    #[serde(default)]
    pub abstract_base: bool,

    #[serde(default)]
    pub state_code: Option<String>,

    #[serde(default)]
    pub table_name: Option<String>,

    /// Regex matched against paths under the state's raw data directory
    #[serde(default)]
    pub path_pattern: Option<String>,

    #[serde(default)]
    pub read_csv_params: Option<ReadCsvParams>,

    #[serde(default)]
    pub column_details: Option<Vec<ColumnSpec>>,

    /// Explicit raw-column order for headerless files; defaults to the
    /// order of column_details
    #[serde(default)]
    pub column_order: Option<Vec<String>>,

    /// standard name -> additional standard names receiving the same value
    #[serde(default)]
    pub duplicate_columns: Option<BTreeMap<String, Vec<String>>>,

    /// Standard columns stamped with the state code on every row
    #[serde(default)]
    pub state_code_columns: Option<Vec<String>>,

    /// enum column -> raw value -> standard value
    #[serde(default)]
    pub enum_mapper: Option<BTreeMap<String, BTreeMap<String, String>>>,
}

impl RawSourceConfig {
    /// Child keys shallow-override the parent's; list-valued keys are
    /// replaced wholesale when the child provides them, never merged
    /// per-element.
    fn layered_over(&self, parent: &RawSourceConfig) -> RawSourceConfig {
        RawSourceConfig {
            inherits: None,
            abstract_base: self.abstract_base,
            state_code: self.state_code.clone().or_else(|| parent.state_code.clone()),
            table_name: self.table_name.clone().or_else(|| parent.table_name.clone()),
            path_pattern: self
                .path_pattern
                .clone()
                .or_else(|| parent.path_pattern.clone()),
            read_csv_params: self
                .read_csv_params
                .clone()
                .or_else(|| parent.read_csv_params.clone()),
            column_details: self
                .column_details
                .clone()
                .or_else(|| parent.column_details.clone()),
            column_order: self
                .column_order
                .clone()
                .or_else(|| parent.column_order.clone()),
            duplicate_columns: self
                .duplicate_columns
                .clone()
                .or_else(|| parent.duplicate_columns.clone()),
            state_code_columns: self
                .state_code_columns
                .clone()
                .or_else(|| parent.state_code_columns.clone()),
            enum_mapper: self.enum_mapper.clone().or_else(|| parent.enum_mapper.clone()),
        }
    }
}

// ============================================================================
// SOURCE MAPPING (the resolved, flat value object)
// ============================================================================

/// Everything needed to standardize one form/source, resolved once at load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapping {
    pub source_key: String,
    pub state_code: String,
    pub table_name: String,
    pub path_pattern: Option<String>,
    pub read_csv_params: ReadCsvParams,
    pub column_details: Vec<ColumnSpec>,
    pub column_order: Vec<String>,
    pub duplicate_columns: BTreeMap<String, Vec<String>>,
    pub state_code_columns: Vec<String>,
    pub enum_mapper: BTreeMap<String, BTreeMap<String, String>>,
}

impl SourceMapping {
    /// Raw column name -> standard column name, for mapped columns only
    pub fn column_mapper(&self) -> BTreeMap<&str, &str> {
        self.column_details
            .iter()
            .filter_map(|c| {
                c.standard_name
                    .as_deref()
                    .map(|standard| (c.raw_name.as_str(), standard))
            })
            .collect()
    }

    /// Standard column names kept in the output
    pub fn relevant_columns(&self) -> Vec<&str> {
        self.column_details
            .iter()
            .filter_map(|c| c.standard_name.as_deref())
            .collect()
    }

    /// Standard column name -> raw date format
    pub fn date_formats(&self) -> BTreeMap<&str, &str> {
        self.column_details
            .iter()
            .filter_map(|c| match (&c.standard_name, &c.date_format) {
                (Some(standard), Some(format)) => Some((standard.as_str(), format.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Standard column name -> declared scalar type
    pub fn column_types(&self) -> BTreeMap<&str, ColumnType> {
        self.column_details
            .iter()
            .filter_map(|c| c.standard_name.as_deref().map(|s| (s, c.column_type)))
            .collect()
    }
}

// ============================================================================
// SOURCE CONFIG SET
// ============================================================================

/// All source configs for one jurisdiction, with inheritance pre-resolved
#[derive(Debug)]
pub struct SourceConfigSet {
    raw: BTreeMap<String, RawSourceConfig>,
}

impl SourceConfigSet {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading source config {}", path.display()))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, RawSourceConfig> =
            serde_yaml::from_str(text).context("parsing source config document")?;
        let set = SourceConfigSet { raw };
        // Resolve every concrete key up front so config errors are fatal
        // before any input file is touched
        for key in set.source_keys() {
            set.resolve(&key)?;
        }
        Ok(set)
    }

    /// Keys that are runnable sources (abstract bases excluded)
    pub fn source_keys(&self) -> Vec<String> {
        self.raw
            .iter()
            .filter(|(_, config)| !config.abstract_base)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Resolve a source key through its `inherits` chain into a flat mapping
    pub fn resolve(&self, source_key: &str) -> Result<SourceMapping, ConfigError> {
        let leaf = self.raw.get(source_key).ok_or_else(|| ConfigError::UnknownSource {
            source: source_key.to_string(),
        })?;
        if leaf.abstract_base {
            return Err(ConfigError::AbstractSource {
                source: source_key.to_string(),
            });
        }

        let mut merged = leaf.clone();
        let mut seen = vec![source_key.to_string()];
        let mut next = leaf.inherits.clone();
        while let Some(base_key) = next {
            if seen.contains(&base_key) {
                return Err(ConfigError::CyclicInheritance {
                    source: base_key,
                });
            }
            let base = self.raw.get(&base_key).ok_or_else(|| ConfigError::UnknownBase {
                source: seen.last().cloned().unwrap_or_default(),
                base: base_key.clone(),
            })?;
            merged = merged.layered_over(base);
            seen.push(base_key);
            next = base.inherits.clone();
        }

        let state_code = merged.state_code.ok_or(ConfigError::Incomplete {
            source: source_key.to_string(),
            field: "state_code",
        })?;
        let table_name = merged.table_name.ok_or(ConfigError::Incomplete {
            source: source_key.to_string(),
            field: "table_name",
        })?;
        let column_details = merged.column_details.ok_or(ConfigError::Incomplete {
            source: source_key.to_string(),
            field: "column_details",
        })?;
        let column_order = merged.column_order.unwrap_or_else(|| {
            column_details.iter().map(|c| c.raw_name.clone()).collect()
        });

        Ok(SourceMapping {
            source_key: source_key.to_string(),
            state_code,
            table_name,
            path_pattern: merged.path_pattern,
            read_csv_params: merged.read_csv_params.unwrap_or_default(),
            column_details,
            column_order,
            duplicate_columns: merged.duplicate_columns.unwrap_or_default(),
            state_code_columns: merged.state_code_columns.unwrap_or_default(),
            enum_mapper: merged.enum_mapper.unwrap_or_default(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const STATE_CONFIG: &str = r#"
contributions_base:
  abstract_base: true
  state_code: PA
  table_name: Transaction
  read_csv_params:
    delimiter: ","
    encoding: latin-1
    has_header: false
  state_code_columns: [reported_state]
  column_details:
    - raw_name: FILERID
      type: str
      standard_name: recipient_id
    - raw_name: CONTRIBUTOR
      type: str
      standard_name: donor--full_name
    - raw_name: CONTDATE1
      type: date
      standard_name: date-1
      date_format: "%Y%m%d"
    - raw_name: CONTAMT1
      type: float
      standard_name: amount-1

contributions_post_2022:
  inherits: contributions_base
  path_pattern: 'contrib.*\.txt'

contributions_pre_2022:
  inherits: contributions_base
  path_pattern: 'pre/contrib.*\.txt'
  column_details:
    - raw_name: FILERID
      type: str
      standard_name: recipient_id
    - raw_name: CONTRIBUTOR
      type: str
      standard_name: donor--full_name
"#;

    #[test]
    fn test_child_inherits_base_values() {
        let set = SourceConfigSet::from_yaml_str(STATE_CONFIG).unwrap();
        let mapping = set.resolve("contributions_post_2022").unwrap();

        assert_eq!(mapping.state_code, "PA");
        assert_eq!(mapping.table_name, "Transaction");
        assert_eq!(mapping.read_csv_params.encoding, "latin-1");
        assert!(!mapping.read_csv_params.has_header);
        assert_eq!(mapping.column_details.len(), 4);
        assert_eq!(mapping.path_pattern.as_deref(), Some(r"contrib.*\.txt"));
    }

    #[test]
    fn test_child_list_replaces_base_wholesale() {
        let set = SourceConfigSet::from_yaml_str(STATE_CONFIG).unwrap();
        let mapping = set.resolve("contributions_pre_2022").unwrap();

        // Child redefined column_details: 2 columns, not a per-element merge
        assert_eq!(mapping.column_details.len(), 2);
        assert!(mapping.date_formats().is_empty());
    }

    #[test]
    fn test_abstract_base_is_not_runnable() {
        let set = SourceConfigSet::from_yaml_str(STATE_CONFIG).unwrap();
        let err = set.resolve("contributions_base").unwrap_err();
        assert!(matches!(err, ConfigError::AbstractSource { .. }));

        let keys = set.source_keys();
        assert!(!keys.contains(&"contributions_base".to_string()));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_unknown_base_rejected_at_load() {
        let yaml = r#"
broken:
  inherits: missing_base
  state_code: AZ
  table_name: Transaction
  column_details: []
"#;
        let err = SourceConfigSet::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("missing_base"));
    }

    #[test]
    fn test_cyclic_inherits_rejected_at_load() {
        let yaml = r#"
a:
  inherits: b
  state_code: AZ
b:
  inherits: a
"#;
        let err = SourceConfigSet::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_column_mapper_and_date_formats() {
        let set = SourceConfigSet::from_yaml_str(STATE_CONFIG).unwrap();
        let mapping = set.resolve("contributions_post_2022").unwrap();

        let mapper = mapping.column_mapper();
        assert_eq!(mapper["CONTRIBUTOR"], "donor--full_name");
        assert_eq!(mapping.date_formats()["date-1"], "%Y%m%d");
        assert_eq!(
            mapping.column_types()["amount-1"],
            ColumnType::Float
        );
    }

    #[test]
    fn test_incomplete_config_rejected() {
        let yaml = r#"
no_table:
  state_code: MI
  column_details: []
"#;
        let err = SourceConfigSet::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("table_name"));
    }
}
