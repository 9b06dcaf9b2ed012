// 🧭 Column Path Expander - Nested column names into related-table rows
// "donor--employer--organization--full_name" walks relation hops and
// materializes one row fragment per entity along the path

use crate::reader::Row;
use crate::schema::{DataSchema, EffectiveSchema, PATH_SEPARATOR};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ============================================================================
// PATH ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PathError {
    /// A path segment names neither a relation nor an attribute
    UnknownSegment {
        column: String,
        segment: String,
        table: String,
    },

    /// A non-path column is not an attribute of the primary table
    UnknownColumn { column: String, table: String },
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::UnknownSegment {
                column,
                segment,
                table,
            } => write!(
                f,
                "column '{}': segment '{}' is not a relation or attribute of '{}'",
                column, segment, table
            ),
            PathError::UnknownColumn { column, table } => {
                write!(f, "column '{}' is not an attribute of '{}'", column, table)
            }
        }
    }
}

impl std::error::Error for PathError {}

// ============================================================================
// COLUMN PATHS
// ============================================================================

/// A standard column name split into its relation hops and leaf attribute
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPath {
    pub relations: Vec<String>,
    pub attribute: String,
}

impl ColumnPath {
    pub fn parse(column: &str) -> ColumnPath {
        let mut segments: Vec<String> =
            column.split(PATH_SEPARATOR).map(|s| s.to_string()).collect();
        let attribute = segments.pop().unwrap_or_default();
        ColumnPath {
            relations: segments,
            attribute,
        }
    }

    pub fn is_nested(&self) -> bool {
        !self.relations.is_empty()
    }
}

/// Strip a trailing repeating-group suffix: "amount-2" -> ("amount", Some(2)).
/// Standard attribute names never contain hyphens, so a trailing `-<digits>`
/// is always an occurrence marker.
pub fn split_occurrence(column: &str) -> (&str, Option<u32>) {
    if let Some(pos) = column.rfind('-') {
        let (base, suffix) = column.split_at(pos);
        if let Ok(n) = suffix[1..].parse::<u32>() {
            return (base, Some(n));
        }
    }
    (column, None)
}

// ============================================================================
// SYNTHETIC KEYS
// ============================================================================

/// Deterministic id for an entity implied by a path prefix within one source
/// row. The same seed and prefix always produce the same id, so repeated runs
/// over the same input emit identical output.
pub fn synthetic_key(seed: &str, path_prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update([0u8]);
    hasher.update(path_prefix.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

/// Deterministic id for a state-scoped natural identifier. Filer numbers
/// repeat across states, so the state and root table namespace them; the
/// same raw id always maps to the same uuid across files and runs.
pub fn namespaced_key(state: &str, table: &str, raw_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(state.as_bytes());
    hasher.update([0u8]);
    hasher.update(table.as_bytes());
    hasher.update([0u8]);
    hasher.update(raw_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

// ============================================================================
// EXPANDER
// ============================================================================

/// One materialized row destined for a table, with its id already set
#[derive(Debug, Clone, PartialEq)]
pub struct TableFragment {
    pub table: String,
    pub row: Row,
}

pub struct PathExpander<'a> {
    schema: &'a DataSchema,
}

impl<'a> PathExpander<'a> {
    pub fn new(schema: &'a DataSchema) -> Self {
        PathExpander { schema }
    }

    /// Expand one wide row of the primary table into fragments for the
    /// primary table and every related table its nested columns reach.
    /// Fragments sharing a path prefix within the row collapse into one.
    pub fn expand_row(
        &self,
        primary_table: &str,
        seed: &str,
        row: &Row,
    ) -> Result<Vec<TableFragment>, PathError> {
        let primary = self
            .schema
            .resolve(primary_table)
            .map_err(|_| PathError::UnknownColumn {
                column: String::new(),
                table: primary_table.to_string(),
            })?;

        // path prefix ("" for the primary row) -> accumulating fragment
        let mut fragments: BTreeMap<String, TableFragment> = BTreeMap::new();
        let root_id = row
            .get("id")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| synthetic_key(seed, ""));
        fragments.insert(
            String::new(),
            TableFragment {
                table: primary_table.to_string(),
                row: Row::from([("id".to_string(), root_id.clone())]),
            },
        );

        for (column, value) in row {
            if column == "id" {
                continue;
            }
            let path = ColumnPath::parse(column);
            if !path.is_nested() {
                if !primary.has_attribute(column) && primary.relation_for_fk(column).is_none() {
                    return Err(PathError::UnknownColumn {
                        column: column.clone(),
                        table: primary_table.to_string(),
                    });
                }
                let root = fragments.get_mut("").unwrap();
                root.row.insert(column.clone(), value.clone());
                continue;
            }

            self.expand_path(primary, column, &path, value, seed, &root_id, &mut fragments)?;
        }

        Ok(fragments.into_values().collect())
    }

    fn expand_path(
        &self,
        primary: &EffectiveSchema,
        column: &str,
        path: &ColumnPath,
        value: &str,
        seed: &str,
        root_id: &str,
        fragments: &mut BTreeMap<String, TableFragment>,
    ) -> Result<(), PathError> {
        let mut current = primary;
        let mut prefix = String::new();
        let mut parent_id = root_id.to_string();

        for relation in &path.relations {
            let hop = self.hop(current, relation).ok_or_else(|| PathError::UnknownSegment {
                column: column.to_string(),
                segment: relation.clone(),
                table: current.name.clone(),
            })?;
            let parent_prefix = prefix.clone();
            if !prefix.is_empty() {
                prefix.push_str(PATH_SEPARATOR);
            }
            prefix.push_str(relation);

            let default_id = synthetic_key(seed, &prefix);
            let child = fragments.entry(prefix.clone()).or_insert_with(|| TableFragment {
                table: hop.target.clone(),
                row: Row::from([("id".to_string(), default_id)]),
            });
            let child_id = child.row["id"].clone();

            // Wire the foreign key in whichever direction the schema declares
            match hop.direction {
                HopDirection::Forward => {
                    let parent = fragments.get_mut(&parent_prefix).unwrap();
                    parent
                        .row
                        .insert(format!("{}_id", relation), child_id.clone());
                }
                HopDirection::Reverse { backlink } => {
                    let child = fragments.get_mut(&prefix).unwrap();
                    child
                        .row
                        .insert(format!("{}_id", backlink), parent_id.clone());
                }
            }

            current = self.schema.resolve(&hop.target).map_err(|_| {
                PathError::UnknownSegment {
                    column: column.to_string(),
                    segment: relation.clone(),
                    table: current.name.clone(),
                }
            })?;
            parent_id = child_id;
        }

        if !self.family_has_attribute(current, &path.attribute) {
            return Err(PathError::UnknownSegment {
                column: column.to_string(),
                segment: path.attribute.clone(),
                table: current.name.clone(),
            });
        }
        let leaf = fragments.get_mut(&prefix).unwrap();
        leaf.row.insert(path.attribute.clone(), value.to_string());
        Ok(())
    }

    /// Find a relation on the table or anywhere in its inheritance family.
    /// A donor hop lands on Transactor, but the employer relation lives on
    /// Individual; the family lookup lets the walk continue.
    fn hop(&self, from: &EffectiveSchema, relation: &str) -> Option<Hop> {
        for table in self.family_schemas(from) {
            if let Some(target) = table.forward_relations.get(relation) {
                return Some(Hop {
                    target: target.clone(),
                    direction: HopDirection::Forward,
                });
            }
            if let Some(target) = table.reverse_relations.get(relation) {
                let backlink = table
                    .reverse_relation_names
                    .get(relation)
                    .cloned()
                    .unwrap_or_else(|| table.name.to_lowercase());
                return Some(Hop {
                    target: target.clone(),
                    direction: HopDirection::Reverse { backlink },
                });
            }
        }
        None
    }

    fn family_has_attribute(&self, from: &EffectiveSchema, attribute: &str) -> bool {
        self.family_schemas(from)
            .iter()
            .any(|t| t.has_attribute(attribute) || t.relation_for_fk(attribute).is_some())
    }

    fn family_schemas(&self, from: &EffectiveSchema) -> Vec<&EffectiveSchema> {
        let root = self
            .schema
            .root_of(&from.name)
            .unwrap_or_else(|_| from.name.clone());
        self.schema
            .family_of(&root)
            .into_iter()
            .filter_map(|name| self.schema.resolve(&name).ok())
            .collect()
    }
}

struct Hop {
    target: String,
    direction: HopDirection,
}

enum HopDirection {
    Forward,
    Reverse { backlink: String },
}

// ============================================================================
// TESTS
// ============================================================================
