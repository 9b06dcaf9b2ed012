// Campaign Finance Standardization - Core Library
// Exposes all modules for use in the CLI and tests

pub mod config;
pub mod entities;
pub mod linkage;
pub mod normalize;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod reader;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types
pub use config::{
    ColumnSpec, ColumnType, ConfigError, RawSourceConfig, ReadCsvParams, SourceConfigSet,
    SourceMapping,
};
pub use entities::{
    AddressRecord, ElectionRecord, ElectionResultRecord, MembershipRecord, TransactionRecord,
    TransactorDetail, TransactorKind, TransactorRecord, TransactorTypeSpecific,
};
pub use linkage::{EntityResolver, IdMapping, ResolutionError, ResolutionOutcome};
pub use normalize::{DataBatch, MaterializeAudit, Materializer, RowValidationError};
pub use output::{write_batch, write_id_mapping};
pub use paths::{ColumnPath, PathError, PathExpander, TableFragment};
pub use pipeline::{Pipeline, RunReport, SourceReport};
pub use reader::{ReadAudit, ReadOutcome, Row, SourceReader, SourceRow};
pub use schema::{DataSchema, EffectiveSchema, SchemaError, TableDef, PATH_SEPARATOR};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
