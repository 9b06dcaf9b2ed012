// 📤 Output Writer - Normalized tables and the id mapping as CSV

use crate::linkage::IdMapping;
use crate::normalize::DataBatch;
use crate::schema::DataSchema;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Write one CSV per non-empty table. Column order follows the effective
/// schema (id first) so output is stable across runs.
pub fn write_batch(
    batch: &DataBatch,
    schema: &DataSchema,
    output_dir: &Path,
) -> Result<BTreeMap<String, usize>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let mut written = BTreeMap::new();
    for (table, rows) in &batch.tables {
        if rows.is_empty() {
            continue;
        }
        let columns = table_columns(schema, table, batch)?;
        let path = output_dir.join(format!("{}.csv", table));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        writer.write_record(&columns)?;
        for row in rows {
            let record: Vec<&str> = columns
                .iter()
                .map(|c| row.get(c).map(|v| v.as_str()).unwrap_or(""))
                .collect();
            writer.write_record(&record)?;
        }
        writer
            .flush()
            .with_context(|| format!("writing {}", path.display()))?;
        written.insert(table.clone(), rows.len());
    }
    Ok(written)
}

/// Schema column order, extended with any column the rows actually carry
/// that the schema does not name (backlink keys wired during expansion)
fn table_columns(schema: &DataSchema, table: &str, batch: &DataBatch) -> Result<Vec<String>> {
    let effective = schema.resolve(table)?;
    let mut columns = vec!["id".to_string()];
    for attribute in &effective.attributes {
        if attribute != "id" {
            columns.push(attribute.clone());
        }
    }
    for row in batch.rows(table) {
        for column in row.keys() {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    Ok(columns)
}

pub fn write_id_mapping(mappings: &[IdMapping], output_dir: &Path) -> Result<()> {
    if mappings.is_empty() {
        return Ok(());
    }
    let path = output_dir.join("id_mapping.csv");
    let mut writer =
        csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
    for mapping in mappings {
        writer.serialize(mapping)?;
    }
    writer
        .flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
