// 🚂 Pipeline - Raw disclosure files to resolved, normalized output
// Config and schema problems are fatal before any data file is opened;
// row-level problems are counted and reported, never fatal

use crate::config::{SourceConfigSet, SourceMapping};
use crate::linkage::EntityResolver;
use crate::normalize::{DataBatch, Materializer};
use crate::output::{write_batch, write_id_mapping};
use crate::reader::{ReadAudit, SourceReader};
use crate::schema::DataSchema;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source_key: String,
    pub state_code: String,
    pub files: usize,
    pub rows_read: usize,
    pub valid_rows: usize,
    pub dropped_rows: usize,
    pub skipped_lines: usize,
    pub skipped_groups: usize,
    pub coerced_dates: usize,
    pub coerced_numbers: usize,
    pub path_errors: usize,

    /// enum column -> raw values that had no mapping, for config followup
    pub unmapped_enum_values: BTreeMap<String, BTreeSet<String>>,

    /// "Table.column" -> values kept on rows but outside the schema's
    /// allowed enum set
    pub out_of_enum_values: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,

    /// Sources whose every row failed validation despite non-empty input
    pub failed_sources: Vec<String>,

    pub merges: usize,
    pub clusters: usize,
    pub overflowed_blocks: usize,
    pub type_conflicts: usize,

    /// Foreign keys left pointing at no row after resolution
    pub dangling_foreign_keys: usize,

    pub tables_written: BTreeMap<String, usize>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let rows_read: usize = self.sources.iter().map(|s| s.rows_read).sum();
        let dropped: usize = self.sources.iter().map(|s| s.dropped_rows).sum();
        let mut out = String::new();
        out.push_str(&format!(
            "sources: {} ({} failed)\n",
            self.sources.len(),
            self.failed_sources.len()
        ));
        out.push_str(&format!("rows read: {} ({} dropped)\n", rows_read, dropped));
        out.push_str(&format!(
            "entity resolution: {} merges in {} clusters, {} type conflicts, {} overflowed blocks\n",
            self.merges, self.clusters, self.type_conflicts, self.overflowed_blocks
        ));
        out.push_str(&format!("dangling foreign keys: {}\n", self.dangling_foreign_keys));
        for (table, count) in &self.tables_written {
            out.push_str(&format!("  {}: {} rows\n", table, count));
        }
        out
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    pub schema_path: PathBuf,
    pub config_dir: PathBuf,
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Pipeline {
    pub fn run(&self) -> Result<RunReport> {
        // Fatal configuration problems surface here, before any raw file I/O
        let schema = DataSchema::from_yaml_file(&self.schema_path)?;
        let config_sets = self.load_config_sets()?;
        let raw_files = list_files(&self.raw_dir)?;

        let mut report = RunReport::default();
        let mut batch = DataBatch::new();
        for set in &config_sets {
            for source_key in set.source_keys() {
                let mapping = set.resolve(&source_key)?;
                let (source_batch, source_report) =
                    self.run_source(&schema, &mapping, &raw_files)?;
                if source_report.rows_read > 0 && source_report.valid_rows == 0 {
                    report.failed_sources.push(source_key.clone());
                } else {
                    batch.absorb(source_batch);
                }
                report.sources.push(source_report);
            }
        }

        let resolver = EntityResolver::new(&schema);
        let outcome = resolver.resolve(&mut batch)?;
        report.merges = outcome.merges;
        report.clusters = outcome.clusters;
        report.overflowed_blocks = outcome.overflowed_blocks();
        report.type_conflicts = outcome.type_conflicts();

        report.dangling_foreign_keys = count_dangling_keys(&schema, &batch);

        report.tables_written = write_batch(&batch, &schema, &self.output_dir)?;
        write_id_mapping(&outcome.id_mapping, &self.output_dir)?;
        let report_path = self.output_dir.join("run_report.json");
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", report_path.display()))?;
        Ok(report)
    }

    fn load_config_sets(&self) -> Result<Vec<SourceConfigSet>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.config_dir)
            .with_context(|| format!("reading config directory {}", self.config_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();
        paths.iter().map(|p| SourceConfigSet::from_yaml_file(p)).collect()
    }

    fn run_source(
        &self,
        schema: &DataSchema,
        mapping: &SourceMapping,
        raw_files: &[PathBuf],
    ) -> Result<(DataBatch, SourceReport)> {
        let mut source_report = SourceReport {
            source_key: mapping.source_key.clone(),
            state_code: mapping.state_code.clone(),
            ..Default::default()
        };

        let matching = self.match_files(mapping, raw_files)?;
        let reader = SourceReader::new(mapping);
        let materializer = Materializer::new(schema, mapping);
        let mut batch = DataBatch::new();
        let mut read_audit = ReadAudit::default();
        for path in matching {
            let outcome = reader.read_file(&path)?;
            source_report.files += 1;
            source_report.rows_read += outcome.rows.len();
            read_audit.absorb(outcome.audit);

            let (file_batch, audit) = materializer.materialize(&outcome.rows)?;
            batch.absorb(file_batch);
            source_report.valid_rows += audit.valid_rows;
            source_report.dropped_rows += audit.dropped_rows;
            source_report.skipped_groups += audit.skipped_groups;
            source_report.path_errors += audit.path_errors;
            for (column, values) in audit.out_of_enum_values {
                source_report
                    .out_of_enum_values
                    .entry(column)
                    .or_default()
                    .extend(values);
            }
        }
        source_report.skipped_lines = read_audit.skipped_lines;
        source_report.coerced_dates = read_audit.coerced_dates;
        source_report.coerced_numbers = read_audit.coerced_numbers;
        source_report.unmapped_enum_values = read_audit.unmapped_enum_values;
        Ok((batch, source_report))
    }

    /// Match a source's path_pattern against paths relative to the raw
    /// directory. A source without a pattern reads nothing.
    fn match_files(&self, mapping: &SourceMapping, raw_files: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let Some(pattern) = &mapping.path_pattern else {
            return Ok(Vec::new());
        };
        let regex = Regex::new(pattern)
            .with_context(|| format!("invalid path_pattern for source '{}'", mapping.source_key))?;
        Ok(raw_files
            .iter()
            .filter(|path| {
                path.strip_prefix(&self.raw_dir)
                    .ok()
                    .map(|rel| regex.is_match(&rel.to_string_lossy()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

/// Every file under the raw directory, depth-first, in sorted order
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&current)
            .with_context(|| format!("reading raw directory {}", current.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

// ============================================================================
// INTEGRITY
// ============================================================================

/// Count foreign keys that survived the run pointing at no row. These are
/// reported, not fatal; dirty state data leaves dangling references.
fn count_dangling_keys(schema: &DataSchema, batch: &DataBatch) -> usize {
    // Ids are valid targets for any table in their inheritance family
    let mut ids_by_root: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for (table, rows) in &batch.tables {
        let Ok(root) = schema.root_of(table) else { continue };
        let ids = ids_by_root.entry(root).or_default();
        for row in rows {
            if let Some(id) = row.get("id") {
                ids.insert(id.as_str());
            }
        }
    }

    let mut dangling = 0;
    for (table, rows) in &batch.tables {
        let Ok(effective) = schema.resolve(table) else { continue };
        for row in rows {
            for (column, value) in row {
                if column == "id" || !column.ends_with("_id") || value.is_empty() {
                    continue;
                }
                let Some(relation) = effective.relation_for_fk(column) else {
                    continue;
                };
                let Some(target) = effective.forward_relations.get(relation) else {
                    continue;
                };
                let Ok(target_root) = schema.root_of(target) else { continue };
                let known = ids_by_root
                    .get(&target_root)
                    .map(|ids| ids.contains(value.as_str()))
                    .unwrap_or(false);
                if !known {
                    dangling += 1;
                }
            }
        }
    }
    dangling
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{AZ_FILERS_YAML, PA_CONFIG_YAML, SCHEMA_YAML};

    fn write(path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, text).unwrap();
    }

    fn pipeline_in(dir: &Path) -> Pipeline {
        Pipeline {
            schema_path: dir.join("schema.yaml"),
            config_dir: dir.join("config"),
            raw_dir: dir.join("raw"),
            output_dir: dir.join("output"),
        }
    }

    #[test]
    fn test_end_to_end_pa_contributions() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("schema.yaml"), SCHEMA_YAML);
        write(&dir.path().join("config/pennsylvania.yaml"), PA_CONFIG_YAML);
        write(
            &dir.path().join("raw/pa/contrib_2023.txt"),
            "F001,JANE SMITH,20230115,250.00,ACME CORP\nF001,JANE SMITH,20230301,100.00,ACME CORP\n",
        );

        let pipeline = pipeline_in(dir.path());
        let report = pipeline.run().unwrap();

        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].rows_read, 2);
        assert_eq!(report.sources[0].valid_rows, 2);
        assert!(report.failed_sources.is_empty());
        assert_eq!(report.tables_written["Transaction"], 2);

        // Identical donors from the two rows merged into one
        assert!(report.merges >= 1);

        // Recipient ids reference filers no source in this run provides
        assert_eq!(report.dangling_foreign_keys, 2);

        let transactions =
            std::fs::read_to_string(dir.path().join("output/Transaction.csv")).unwrap();
        assert_eq!(transactions.lines().count(), 3);
        assert!(dir.path().join("output/run_report.json").exists());

        // Merged-away ids are mapped with the provenance of the original row
        let mapping = std::fs::read_to_string(dir.path().join("output/id_mapping.csv")).unwrap();
        assert!(mapping.starts_with("original_id,canonical_id,source_table,source_file"));
        assert!(mapping.contains("contrib_2023.txt"));
    }

    #[test]
    fn test_rerun_on_identical_input_writes_identical_output() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("schema.yaml"), SCHEMA_YAML);
        write(&dir.path().join("config/pennsylvania.yaml"), PA_CONFIG_YAML);
        write(
            &dir.path().join("raw/pa/contrib_2023.txt"),
            "F001,JANE SMITH,20230115,250.00,ACME CORP\nF001,JANE SMITH,20230301,100.00,ACME CORP\n",
        );

        let first = Pipeline {
            output_dir: dir.path().join("output_a"),
            ..pipeline_in(dir.path())
        };
        let second = Pipeline {
            output_dir: dir.path().join("output_b"),
            ..pipeline_in(dir.path())
        };
        first.run().unwrap();
        second.run().unwrap();

        let mut files: Vec<String> = std::fs::read_dir(dir.path().join("output_a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert!(files.contains(&"Transaction.csv".to_string()));
        assert!(files.contains(&"id_mapping.csv".to_string()));
        for name in files {
            let a = std::fs::read(dir.path().join("output_a").join(&name)).unwrap();
            let b = std::fs::read(dir.path().join("output_b").join(&name)).unwrap();
            assert_eq!(a, b, "{} differs between runs", name);
        }
    }

    #[test]
    fn test_source_with_no_valid_rows_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("schema.yaml"), SCHEMA_YAML);
        write(&dir.path().join("config/pennsylvania.yaml"), PA_CONFIG_YAML);
        // Amounts all unparseable: every group is skipped, no row survives
        write(
            &dir.path().join("raw/pa/contrib_2023.txt"),
            "F001,JANE SMITH,20230115,abc,ACME CORP\n",
        );

        let pipeline = pipeline_in(dir.path());
        let report = pipeline.run().unwrap();

        assert_eq!(report.failed_sources, vec!["contributions".to_string()]);
        assert!(!dir.path().join("output/Transaction.csv").exists());
    }

    #[test]
    fn test_bad_schema_is_fatal_before_reading_data() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("schema.yaml"), "Transaction:\n  parent_table: Missing\n");
        write(&dir.path().join("config/pennsylvania.yaml"), PA_CONFIG_YAML);

        let pipeline = pipeline_in(dir.path());
        assert!(pipeline.run().is_err());
    }

    #[test]
    fn test_dangling_recipient_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("schema.yaml"), SCHEMA_YAML);
        write(&dir.path().join("config/arizona.yaml"), AZ_FILERS_YAML);
        // A filer row only; recipient ids in transactions would dangle,
        // but here everything written resolves, so zero dangling keys
        write(
            &dir.path().join("raw/az/filers.csv"),
            "Name,FilerType,FilerId\nPAC FOR GOOD,Committee,C100\n",
        );

        let pipeline = pipeline_in(dir.path());
        let report = pipeline.run().unwrap();
        assert_eq!(report.dangling_foreign_keys, 0);
        assert_eq!(report.tables_written["Organization"], 1);
    }
}
