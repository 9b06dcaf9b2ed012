// 🏗️ Table Materializer - Wide source rows into normalized table batches
// Fans out repeating column groups, expands nested paths, places
// transactors into their concrete tables and validates required fields

use crate::config::SourceMapping;
use crate::entities::TransactorTypeSpecific;
use crate::paths::{namespaced_key, split_occurrence, PathExpander, TableFragment};
use crate::reader::{parse_amount, Row, SourceRow};
use crate::schema::DataSchema;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// DATA BATCH
// ============================================================================

/// Normalized rows grouped by table name. BTreeMap keeps table iteration
/// order stable so repeated runs write identical output.
#[derive(Debug, Clone, Default)]
pub struct DataBatch {
    pub tables: BTreeMap<String, Vec<Row>>,

    /// row id -> raw file the row was first materialized from
    pub provenance: BTreeMap<String, String>,
}

impl DataBatch {
    pub fn new() -> Self {
        DataBatch::default()
    }

    pub fn push(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(|r| r.as_slice()).unwrap_or(&[])
    }

    pub fn absorb(&mut self, other: DataBatch) {
        for (table, rows) in other.tables {
            self.tables.entry(table).or_default().extend(rows);
        }
        for (id, file) in other.provenance {
            self.provenance.entry(id).or_insert(file);
        }
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(|r| r.len()).sum()
    }
}

// ============================================================================
// ROW VALIDATION ERROR
// ============================================================================

/// A source row whose primary fragment failed validation. These are
/// counted into the audit, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct RowValidationError {
    pub table: String,
    pub missing: Vec<String>,
}

impl std::fmt::Display for RowValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row for '{}' is missing required attributes: {}",
            self.table,
            self.missing.join(", ")
        )
    }
}

impl std::error::Error for RowValidationError {}

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MaterializeAudit {
    pub input_rows: usize,

    /// Source rows that produced at least one primary-table row
    pub valid_rows: usize,

    /// Source rows dropped whole: missing required fields or a bad path
    pub dropped_rows: usize,

    /// Repeating groups skipped for an empty or zero amount
    pub skipped_groups: usize,

    /// Columns that referenced unknown relations or attributes
    pub path_errors: usize,

    /// Nested fragments dropped for missing required fields, per table
    pub dropped_fragments: BTreeMap<String, usize>,

    /// "Table.column" -> values outside the schema's allowed enum set,
    /// retained on the row but flagged for audit
    pub out_of_enum_values: BTreeMap<String, BTreeSet<String>>,
}

impl MaterializeAudit {
    pub fn absorb(&mut self, other: MaterializeAudit) {
        self.input_rows += other.input_rows;
        self.valid_rows += other.valid_rows;
        self.dropped_rows += other.dropped_rows;
        self.skipped_groups += other.skipped_groups;
        self.path_errors += other.path_errors;
        for (table, count) in other.dropped_fragments {
            *self.dropped_fragments.entry(table).or_default() += count;
        }
        for (column, values) in other.out_of_enum_values {
            self.out_of_enum_values.entry(column).or_default().extend(values);
        }
    }
}

// ============================================================================
// MATERIALIZER
// ============================================================================

pub struct Materializer<'a> {
    schema: &'a DataSchema,
    mapping: &'a SourceMapping,
}

impl<'a> Materializer<'a> {
    pub fn new(schema: &'a DataSchema, mapping: &'a SourceMapping) -> Self {
        Materializer { schema, mapping }
    }

    pub fn materialize(&self, rows: &[SourceRow]) -> Result<(DataBatch, MaterializeAudit)> {
        let expander = PathExpander::new(self.schema);
        let mut batch = DataBatch::new();
        let mut audit = MaterializeAudit {
            input_rows: rows.len(),
            ..Default::default()
        };

        for source_row in rows {
            let mut produced = false;
            for (occurrence, mut virtual_row) in self.fan_out(source_row, &mut audit) {
                self.namespace_ids(&mut virtual_row);
                let seed = format!(
                    "{}:{}:{}:{}",
                    self.mapping.state_code, source_row.source_file, source_row.line, occurrence
                );
                let fragments =
                    match expander.expand_row(&self.mapping.table_name, &seed, &virtual_row) {
                        Ok(fragments) => fragments,
                        Err(_) => {
                            audit.path_errors += 1;
                            audit.dropped_rows += 1;
                            continue;
                        }
                    };
                match self.validate_and_place(fragments, &mut audit) {
                    Ok(kept) => {
                        for fragment in kept {
                            if let Some(id) = fragment.row.get("id") {
                                batch
                                    .provenance
                                    .entry(id.clone())
                                    .or_insert_with(|| source_row.source_file.clone());
                            }
                            batch.push(&fragment.table, fragment.row);
                        }
                        produced = true;
                    }
                    Err(_) => audit.dropped_rows += 1,
                }
            }
            if produced {
                audit.valid_rows += 1;
            }
        }

        Ok((batch, audit))
    }

    /// Split one wide row into virtual rows, one per repeating group.
    /// Columns without an occurrence suffix are shared by every group.
    /// A group whose values are all empty is silently ignored; a group
    /// with an empty or zero amount is skipped and counted.
    fn fan_out(&self, source_row: &SourceRow, audit: &mut MaterializeAudit) -> Vec<(u32, Row)> {
        let mut base = Row::new();
        let mut groups: BTreeMap<u32, Row> = BTreeMap::new();
        for (column, value) in &source_row.values {
            if value.is_empty() {
                continue;
            }
            match split_occurrence(column) {
                (stripped, Some(n)) => {
                    groups
                        .entry(n)
                        .or_default()
                        .insert(stripped.to_string(), value.clone());
                }
                (_, None) => {
                    base.insert(column.clone(), value.clone());
                }
            }
        }

        if groups.is_empty() {
            return vec![(0, base)];
        }

        let mut out = Vec::new();
        for (occurrence, group) in groups {
            if let Some(amount) = group.get("amount") {
                if parse_amount(amount) == Some(0.0) {
                    audit.skipped_groups += 1;
                    continue;
                }
            } else if self.amount_expected() {
                audit.skipped_groups += 1;
                continue;
            }
            let mut row = base.clone();
            row.extend(group);
            out.push((occurrence, row));
        }
        out
    }

    /// Whether the repeating groups of this source carry the amount column
    fn amount_expected(&self) -> bool {
        self.mapping
            .relevant_columns()
            .iter()
            .any(|c| split_occurrence(c) == ("amount", Some(1)))
    }

    /// Replace state-scoped natural ids with namespaced uuids so the same
    /// filer number resolves to the same id in every file of the state
    fn namespace_ids(&self, row: &mut Row) {
        let Ok(primary) = self.schema.resolve(&self.mapping.table_name) else {
            return;
        };
        let updates: Vec<(String, String)> = row
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .filter_map(|(column, value)| {
                let target_root = if column == "id" {
                    self.schema.root_of(&self.mapping.table_name).ok()?
                } else {
                    let relation = primary.relation_for_fk(column)?;
                    let target = primary.forward_relations.get(relation)?;
                    self.schema.root_of(target).ok()?
                };
                Some((
                    column.clone(),
                    namespaced_key(&self.mapping.state_code, &target_root, value),
                ))
            })
            .collect();
        for (column, value) in updates {
            row.insert(column, value);
        }
    }

    /// Enforce required attributes and place polymorphic rows into their
    /// concrete child tables. Fails when the primary row itself does not
    /// validate; fragments list the primary row first.
    fn validate_and_place(
        &self,
        mut fragments: Vec<TableFragment>,
        audit: &mut MaterializeAudit,
    ) -> Result<Vec<TableFragment>, RowValidationError> {
        for fragment in &mut fragments {
            self.place(fragment);
        }

        let mut kept = Vec::new();
        let mut dropped_ids = Vec::new();
        for (index, fragment) in fragments.into_iter().enumerate() {
            let Ok(effective) = self.schema.resolve(&fragment.table) else {
                if index == 0 {
                    return Err(RowValidationError {
                        table: fragment.table.clone(),
                        missing: Vec::new(),
                    });
                }
                continue;
            };
            let columns: BTreeSet<String> = fragment
                .row
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, _)| k.clone())
                .collect();
            let missing = effective.missing_required(&columns);
            if missing.is_empty() {
                for (column, allowed) in &effective.enum_columns {
                    if let Some(value) = fragment.row.get(column) {
                        if !value.is_empty() && !allowed.contains(value) {
                            audit
                                .out_of_enum_values
                                .entry(format!("{}.{}", fragment.table, column))
                                .or_default()
                                .insert(value.clone());
                        }
                    }
                }
                kept.push(fragment);
            } else if index == 0 {
                return Err(RowValidationError {
                    table: fragment.table.clone(),
                    missing,
                });
            } else {
                *audit
                    .dropped_fragments
                    .entry(fragment.table.clone())
                    .or_default() += 1;
                dropped_ids.push(fragment.row.get("id").cloned().unwrap_or_default());
            }
        }

        // Unlink foreign keys that pointed at dropped fragments
        for fragment in &mut kept {
            fragment
                .row
                .retain(|column, value| !(column.ends_with("_id") && dropped_ids.contains(value)));
        }
        Ok(kept)
    }

    /// Move a root-table row into the child table its type implies
    fn place(&self, fragment: &mut TableFragment) {
        let Ok(effective) = self.schema.resolve(&fragment.table) else {
            return;
        };
        if effective.child_tables.is_empty() {
            return;
        }
        let Some(specific) = fragment
            .row
            .get("transactor_type")
            .and_then(|v| TransactorTypeSpecific::parse(v))
        else {
            return;
        };
        let target = specific.implied_kind().table_name();
        if effective.child_tables.iter().any(|c| c == target) {
            fragment.table = target.to_string();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfigSet;
    use crate::test_fixtures::{sample_schema, PA_CONFIG_YAML};

    fn source_row(line: u64, pairs: &[(&str, &str)]) -> SourceRow {
        SourceRow {
            source_file: "contrib_2023.txt".to_string(),
            line,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn pa_mapping() -> SourceMapping {
        let set = SourceConfigSet::from_yaml_str(PA_CONFIG_YAML).unwrap();
        set.resolve("contributions").unwrap()
    }

    #[test]
    fn test_fan_out_one_row_per_populated_group() {
        let schema = sample_schema();
        let mapping = pa_mapping();
        let materializer = Materializer::new(&schema, &mapping);

        let rows = vec![source_row(
            2,
            &[
                ("recipient_id", "F001"),
                ("donor--full_name", "JANE SMITH"),
                ("date-1", "2023-01-15"),
                ("amount-1", "250.00"),
                ("date-2", ""),
                ("amount-2", ""),
                ("reported_state", "PA"),
            ],
        )];
        let (batch, audit) = materializer.materialize(&rows).unwrap();

        assert_eq!(batch.rows("Transaction").len(), 1);
        assert_eq!(audit.valid_rows, 1);
        let txn = &batch.rows("Transaction")[0];
        assert_eq!(txn["amount"], "250.00");
        assert_eq!(txn["date"], "2023-01-15");
    }

    #[test]
    fn test_two_populated_groups_fan_to_two_transactions() {
        let schema = sample_schema();
        let mapping = pa_mapping();
        let materializer = Materializer::new(&schema, &mapping);

        let rows = vec![source_row(
            2,
            &[
                ("recipient_id", "F001"),
                ("donor--full_name", "JANE SMITH"),
                ("date-1", "2023-01-15"),
                ("amount-1", "250.00"),
                ("date-2", "2023-02-01"),
                ("amount-2", "100.00"),
                ("reported_state", "PA"),
            ],
        )];
        let (batch, _) = materializer.materialize(&rows).unwrap();

        let transactions = batch.rows("Transaction");
        assert_eq!(transactions.len(), 2);
        // Both point at the same donor entity from the shared name column
        assert_ne!(transactions[0]["id"], transactions[1]["id"]);
        // Donor fragments are distinct rows but resolution merges them later
        assert_eq!(batch.rows("Transactor").len(), 2);
    }

    #[test]
    fn test_zero_amount_group_skipped() {
        let schema = sample_schema();
        let mapping = pa_mapping();
        let materializer = Materializer::new(&schema, &mapping);

        let rows = vec![source_row(
            2,
            &[
                ("recipient_id", "F001"),
                ("donor--full_name", "JANE SMITH"),
                ("date-1", "2023-01-15"),
                ("amount-1", "0.00"),
                ("reported_state", "PA"),
            ],
        )];
        let (batch, audit) = materializer.materialize(&rows).unwrap();

        assert!(batch.rows("Transaction").is_empty());
        assert_eq!(audit.skipped_groups, 1);
        assert_eq!(audit.valid_rows, 0);
    }

    #[test]
    fn test_missing_required_drops_row() {
        let schema = sample_schema();
        let mapping = pa_mapping();
        let materializer = Materializer::new(&schema, &mapping);

        // No recipient_id: Transaction requires it
        let rows = vec![source_row(
            2,
            &[
                ("donor--full_name", "JANE SMITH"),
                ("date-1", "2023-01-15"),
                ("amount-1", "250.00"),
                ("reported_state", "PA"),
            ],
        )];
        let (batch, audit) = materializer.materialize(&rows).unwrap();

        assert!(batch.rows("Transaction").is_empty());
        assert_eq!(audit.dropped_rows, 1);
        assert_eq!(audit.valid_rows, 0);
    }

    #[test]
    fn test_state_ids_namespaced_consistently() {
        let schema = sample_schema();
        let mapping = pa_mapping();
        let materializer = Materializer::new(&schema, &mapping);

        let rows = vec![
            source_row(
                2,
                &[
                    ("recipient_id", "F001"),
                    ("donor--full_name", "JANE SMITH"),
                    ("date-1", "2023-01-15"),
                    ("amount-1", "250.00"),
                    ("reported_state", "PA"),
                ],
            ),
            source_row(
                3,
                &[
                    ("recipient_id", "F001"),
                    ("donor--full_name", "BOB JONES"),
                    ("date-1", "2023-03-10"),
                    ("amount-1", "75.00"),
                    ("reported_state", "PA"),
                ],
            ),
        ];
        let (batch, _) = materializer.materialize(&rows).unwrap();

        let transactions = batch.rows("Transaction");
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0]["recipient_id"], transactions[1]["recipient_id"]);
        assert_ne!(transactions[0]["recipient_id"], "F001");
    }

    #[test]
    fn test_row_validation_error_names_missing_attributes() {
        let error = RowValidationError {
            table: "Transaction".to_string(),
            missing: vec!["donor_id".to_string(), "amount".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "row for 'Transaction' is missing required attributes: donor_id, amount"
        );
    }

    #[test]
    fn test_out_of_enum_value_retained_and_flagged() {
        let schema = sample_schema();
        let mapping = pa_mapping();
        let materializer = Materializer::new(&schema, &mapping);

        let rows = vec![source_row(
            2,
            &[
                ("recipient_id", "F001"),
                ("donor--full_name", "JANE SMITH"),
                ("transaction_type", "Magic"),
                ("date-1", "2023-01-15"),
                ("amount-1", "250.00"),
                ("reported_state", "PA"),
            ],
        )];
        let (batch, audit) = materializer.materialize(&rows).unwrap();

        let txn = &batch.rows("Transaction")[0];
        assert_eq!(txn["transaction_type"], "Magic");
        let flagged = &audit.out_of_enum_values["Transaction.transaction_type"];
        assert!(flagged.contains("Magic"));
    }

    #[test]
    fn test_typed_rows_placed_into_child_table() {
        let schema = sample_schema();
        let set = SourceConfigSet::from_yaml_str(crate::test_fixtures::AZ_FILERS_YAML).unwrap();
        let mapping = set.resolve("filers").unwrap();
        let materializer = Materializer::new(&schema, &mapping);

        let rows = vec![
            source_row(2, &[("id", "C100"), ("full_name", "PAC FOR GOOD"), ("transactor_type", "Committee")]),
            source_row(3, &[("id", "C101"), ("full_name", "JANE SMITH"), ("transactor_type", "Candidate")]),
        ];
        let (batch, _) = materializer.materialize(&rows).unwrap();

        assert_eq!(batch.rows("Organization").len(), 1);
        assert_eq!(batch.rows("Individual").len(), 1);
        assert!(batch.rows("Transactor").is_empty());
    }
}
