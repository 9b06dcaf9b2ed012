// 📐 Schema Registry - Table definitions with inheritance
// Loads the target-schema document and resolves effective schemas per table

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Separator used in compound column names ("donor--address--city")
pub const PATH_SEPARATOR: &str = "--";

// ============================================================================
// SCHEMA ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A table names a parent_table that is not defined
    UnknownParent { table: String, parent: String },

    /// Walking parent_table pointers revisits a table
    CyclicInheritance { table: String },

    /// A relation or attribute list references something undefined
    Invalid { table: String, message: String },

    /// resolve() was called with a table name not in the document
    UnknownTable { table: String },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::UnknownParent { table, parent } => {
                write!(f, "table '{}' declares unknown parent '{}'", table, parent)
            }
            SchemaError::CyclicInheritance { table } => {
                write!(f, "cyclic parent_table chain through '{}'", table)
            }
            SchemaError::Invalid { table, message } => {
                write!(f, "invalid schema for '{}': {}", table, message)
            }
            SchemaError::UnknownTable { table } => {
                write!(f, "table '{}' not defined in schema", table)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

// ============================================================================
// RAW TABLE DEFINITION (as written in the schema document)
// ============================================================================

/// One table entry in the schema YAML, before inheritance is resolved
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub attributes: Vec<String>,

    #[serde(default)]
    pub required_attributes: Vec<String>,

    /// Enum column name -> allowed standard values
    #[serde(default)]
    pub enum_columns: BTreeMap<String, Vec<String>>,

    /// Relation name (no `_id` suffix) -> referenced table
    #[serde(default)]
    pub forward_relations: BTreeMap<String, String>,

    /// Relation name -> table that holds a foreign key back to this one
    #[serde(default)]
    pub reverse_relations: BTreeMap<String, String>,

    /// Reverse relation name -> FK column name (no `_id`) in referencing table
    #[serde(default)]
    pub reverse_relation_names: BTreeMap<String, String>,

    /// Columns that may appear as repeating groups (`amount-1`, `amount-2`, ...)
    #[serde(default)]
    pub repeating_columns: Vec<String>,

    #[serde(default)]
    pub parent_table: Option<String>,

    #[serde(default)]
    pub child_tables: Vec<String>,
}

// ============================================================================
// EFFECTIVE SCHEMA (after inheritance resolution)
// ============================================================================

/// Fully merged view of one table: its own fields plus every ancestor's,
/// child value winning on conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSchema {
    pub name: String,

    /// Ordered, ancestor attributes first, duplicates removed
    pub attributes: Vec<String>,

    /// Accumulated across the whole parent chain
    pub required_attributes: Vec<String>,

    pub enum_columns: BTreeMap<String, Vec<String>>,
    pub forward_relations: BTreeMap<String, String>,
    pub reverse_relations: BTreeMap<String, String>,
    pub reverse_relation_names: BTreeMap<String, String>,
    pub repeating_columns: Vec<String>,

    pub parent_table: Option<String>,
    pub child_tables: Vec<String>,
}

impl EffectiveSchema {
    /// True if `column` is a declared attribute of this table
    pub fn has_attribute(&self, column: &str) -> bool {
        self.attributes.iter().any(|a| a == column)
    }

    /// Relation name for an attribute like `donor_id`, if one is declared
    pub fn relation_for_fk(&self, column: &str) -> Option<&str> {
        let stem = column.strip_suffix("_id")?;
        self.forward_relations.get_key_value(stem).map(|(k, _)| k.as_str())
    }

    /// Both forward and reverse relations, relation name -> target table
    pub fn relations(&self) -> BTreeMap<String, String> {
        let mut all = self.forward_relations.clone();
        for (name, table) in &self.reverse_relations {
            all.entry(name.clone()).or_insert_with(|| table.clone());
        }
        all
    }

    /// Check required attributes against the column names present on a row.
    ///
    /// A required relation field (`donor_id`, or a bare relation name) is
    /// satisfied either by the scalar FK column or by any path column that
    /// starts with the relation name, since the related entity can be
    /// supplied nested instead of by id. Returns the missing attributes.
    pub fn missing_required(&self, columns: &BTreeSet<String>) -> Vec<String> {
        let mut missing = Vec::new();
        for required in &self.required_attributes {
            if columns.contains(required) {
                continue;
            }
            let relation = required
                .strip_suffix("_id")
                .filter(|stem| self.forward_relations.contains_key(*stem))
                .or_else(|| {
                    if self.forward_relations.contains_key(required.as_str())
                        || self.reverse_relations.contains_key(required.as_str())
                    {
                        Some(required.as_str())
                    } else {
                        None
                    }
                });
            if let Some(relation) = relation {
                let prefix = format!("{}{}", relation, PATH_SEPARATOR);
                let nested = columns
                    .iter()
                    .any(|c| c.starts_with(&prefix) || c == relation);
                if nested {
                    continue;
                }
            }
            missing.push(required.clone());
        }
        missing
    }
}

// ============================================================================
// DATA SCHEMA (the registry)
// ============================================================================

/// Registry of all table schemas, loaded once per run and immutable after
#[derive(Debug)]
pub struct DataSchema {
    tables: BTreeMap<String, TableDef>,
    resolved: BTreeMap<String, EffectiveSchema>,
}

impl DataSchema {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading schema file {}", path.display()))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let tables: BTreeMap<String, TableDef> =
            serde_yaml::from_str(text).context("parsing schema document")?;
        Self::new(tables)
    }

    pub fn new(tables: BTreeMap<String, TableDef>) -> Result<Self> {
        validate_tables(&tables)?;
        let mut resolved = BTreeMap::new();
        for name in tables.keys() {
            resolved.insert(name.clone(), resolve_table(&tables, name)?);
        }
        Ok(DataSchema { tables, resolved })
    }

    /// Effective schema for a table, resolved through its parent chain
    pub fn resolve(&self, table: &str) -> Result<&EffectiveSchema, SchemaError> {
        self.resolved.get(table).ok_or_else(|| SchemaError::UnknownTable {
            table: table.to_string(),
        })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Tables rooted at `root`: the root itself plus all descendants
    pub fn family_of(&self, root: &str) -> Vec<String> {
        let mut family = Vec::new();
        let mut stack = vec![root.to_string()];
        while let Some(name) = stack.pop() {
            if let Some(def) = self.tables.get(&name) {
                stack.extend(def.child_tables.iter().cloned());
            }
            if !family.contains(&name) {
                family.push(name);
            }
        }
        family.sort();
        family
    }

    /// Root ancestor of a table (itself when it has no parent)
    pub fn root_of(&self, table: &str) -> Result<String, SchemaError> {
        let chain = parent_chain(&self.tables, table)?;
        Ok(chain.last().cloned().unwrap_or_else(|| table.to_string()))
    }
}

/// Walk parent pointers to the root, failing on unknown parents and cycles.
/// Returns the chain starting at `table` itself.
fn parent_chain(
    tables: &BTreeMap<String, TableDef>,
    table: &str,
) -> Result<Vec<String>, SchemaError> {
    let mut chain = vec![table.to_string()];
    let mut seen: BTreeSet<String> = chain.iter().cloned().collect();
    let mut current = table.to_string();
    loop {
        let def = tables.get(&current).ok_or_else(|| SchemaError::UnknownTable {
            table: current.clone(),
        })?;
        match &def.parent_table {
            None => return Ok(chain),
            Some(parent) => {
                if !tables.contains_key(parent) {
                    return Err(SchemaError::UnknownParent {
                        table: current,
                        parent: parent.clone(),
                    });
                }
                if !seen.insert(parent.clone()) {
                    return Err(SchemaError::CyclicInheritance {
                        table: parent.clone(),
                    });
                }
                chain.push(parent.clone());
                current = parent.clone();
            }
        }
    }
}

fn resolve_table(
    tables: &BTreeMap<String, TableDef>,
    table: &str,
) -> Result<EffectiveSchema, SchemaError> {
    let chain = parent_chain(tables, table)?;
    let own = &tables[table];

    // Merge root-first so child values overwrite ancestors on conflict
    let mut attributes: Vec<String> = Vec::new();
    let mut required: Vec<String> = Vec::new();
    let mut enum_columns = BTreeMap::new();
    let mut forward = BTreeMap::new();
    let mut reverse = BTreeMap::new();
    let mut reverse_names = BTreeMap::new();
    let mut repeating: Vec<String> = Vec::new();

    for name in chain.iter().rev() {
        let def = &tables[name.as_str()];
        for attribute in &def.attributes {
            if !attributes.contains(attribute) {
                attributes.push(attribute.clone());
            }
        }
        for attribute in &def.required_attributes {
            if !required.contains(attribute) {
                required.push(attribute.clone());
            }
        }
        for column in &def.repeating_columns {
            if !repeating.contains(column) {
                repeating.push(column.clone());
            }
        }
        enum_columns.extend(def.enum_columns.clone());
        forward.extend(def.forward_relations.clone());
        reverse.extend(def.reverse_relations.clone());
        reverse_names.extend(def.reverse_relation_names.clone());
    }

    Ok(EffectiveSchema {
        name: table.to_string(),
        attributes,
        required_attributes: required,
        enum_columns,
        forward_relations: forward,
        reverse_relations: reverse,
        reverse_relation_names: reverse_names,
        repeating_columns: repeating,
        parent_table: own.parent_table.clone(),
        child_tables: own.child_tables.clone(),
    })
}

/// Load-time validation of the raw schema document. All problems are
/// collected before failing so a bad document reports everything at once.
fn validate_tables(tables: &BTreeMap<String, TableDef>) -> Result<(), SchemaError> {
    let mut errors = Vec::new();

    for (name, def) in tables {
        let attributes: BTreeSet<&String> = def.attributes.iter().collect();

        for (relation, target) in &def.forward_relations {
            let fk = format!("{}_id", relation);
            if !def.attributes.contains(&fk) {
                errors.push(format!(
                    "{}: forward relation '{}' needs attribute '{}'",
                    name, relation, fk
                ));
            }
            if !tables.contains_key(target) {
                errors.push(format!(
                    "{}: forward relation '{}' points to unknown table '{}'",
                    name, relation, target
                ));
            }
        }

        for (relation, target) in &def.reverse_relations {
            if !tables.contains_key(target) {
                errors.push(format!(
                    "{}: reverse relation '{}' points to unknown table '{}'",
                    name, relation, target
                ));
            }
            if !def.reverse_relation_names.contains_key(relation) {
                errors.push(format!(
                    "{}: reverse relation '{}' has no reverse_relation_names entry",
                    name, relation
                ));
            }
        }

        for child in &def.child_tables {
            match tables.get(child) {
                None => errors.push(format!("{}: unknown child table '{}'", name, child)),
                Some(child_def) => {
                    if child_def.parent_table.as_deref() != Some(name.as_str()) {
                        errors.push(format!(
                            "{}: child '{}' does not list it as parent",
                            name, child
                        ));
                    }
                }
            }
        }

        for (label, columns) in [
            ("enum_columns", def.enum_columns.keys().collect::<Vec<_>>()),
            ("repeating_columns", def.repeating_columns.iter().collect()),
            ("required_attributes", def.required_attributes.iter().collect()),
        ] {
            for column in columns {
                if !attributes.contains(column) {
                    errors.push(format!(
                        "{}: {} entry '{}' not listed in attributes",
                        name, label, column
                    ));
                }
            }
        }
    }

    // Parent pointers and cycles are checked via the chain walk
    for name in tables.keys() {
        parent_chain(tables, name)?;
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let table = errors[0].split(':').next().unwrap_or("").to_string();
        Err(SchemaError::Invalid {
            table,
            message: errors.join("; "),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
