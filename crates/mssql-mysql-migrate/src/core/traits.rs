//! Core traits for the migration engine.
//!
//! - [`SourceReader`]: reads catalog metadata and rows from the source
//! - [`TargetWriter`]: executes DDL and loads rows into the target
//! - [`TableLoad`]: one table's load transaction on the target
//! - [`TypeMapper`]: maps source column types to target types
//!
//! The engine (planner, DDL synthesizer, copier, orchestrator) only talks to
//! these traits, so it runs unchanged against the real drivers and against
//! in-memory fakes in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TargetMode;
use crate::error::{MigrateError, Result};

use super::schema::{ColumnDef, ForeignKeyRef, MaxLength, NumericPrecision, TableDef};
use super::value::Batch;

/// Read schema metadata and data from a source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Names of the base tables (views excluded) in `schema`, sorted.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Column definitions in ordinal order.
    async fn read_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDef>>;

    /// Primary key columns in key order; empty when the table has none.
    async fn read_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Foreign key references, one per (column, constraint) pair.
    async fn read_foreign_keys(&self, schema: &str, table: &str) -> Result<Vec<ForeignKeyRef>>;

    /// Load the full definition of one table.
    ///
    /// Any catalog failure is reported as a `SchemaRead` error for this
    /// table; a partially read definition is never returned.
    async fn load_table(&self, schema: &str, table: &str) -> Result<TableDef> {
        let wrap = |e: MigrateError| MigrateError::schema_read(format!("{}.{}", schema, table), e);

        let columns = self.read_columns(schema, table).await.map_err(wrap)?;
        if columns.is_empty() {
            return Err(MigrateError::schema_read(
                format!("{}.{}", schema, table),
                "catalog returned no columns",
            ));
        }
        let primary_key = self.read_primary_key(schema, table).await.map_err(wrap)?;
        let foreign_keys = self.read_foreign_keys(schema, table).await.map_err(wrap)?;

        Ok(TableDef {
            schema: schema.to_string(),
            name: table.to_string(),
            columns,
            primary_key,
            foreign_keys,
        })
    }

    /// Start one ordered scan over all rows of `table`.
    ///
    /// Values arrive in `table.columns` order. The receiver yields batches of
    /// at most `batch_size` rows; the last one has `is_last` set.
    fn read_table(&self, table: &TableDef, batch_size: usize) -> mpsc::Receiver<Result<Batch>>;

    /// Exact row count of a table.
    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Round-trip a trivial query.
    async fn test_connection(&self) -> Result<()>;

    /// Database type identifier (e.g. "mssql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Write schema and data to a target database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Create the database (schema container) if it does not exist.
    async fn create_database(&self, database: &str) -> Result<()>;

    /// Execute one DDL statement.
    async fn execute_ddl(&self, sql: &str) -> Result<()>;

    /// Whether a foreign key constraint with this name already exists.
    async fn foreign_key_exists(&self, database: &str, table: &str, constraint: &str)
        -> Result<bool>;

    /// Open a load transaction for one table.
    async fn begin_load(
        &self,
        database: &str,
        table: &TableDef,
        mode: TargetMode,
    ) -> Result<Box<dyn TableLoad>>;

    /// Exact row count of a table.
    async fn get_row_count(&self, database: &str, table: &str) -> Result<i64>;

    /// Round-trip a trivial query.
    async fn test_connection(&self) -> Result<()>;

    /// Database type identifier (e.g. "mysql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// An open per-table load on the target.
///
/// Holds its own connection and transaction. Nothing written through it is
/// visible until [`TableLoad::commit`]; [`TableLoad::rollback`] discards it.
#[async_trait]
pub trait TableLoad: Send {
    /// Insert a batch of rows. Returns the number of rows written.
    async fn write_batch(&mut self, batch: Batch) -> Result<u64>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Maps source column types to target column types.
///
/// Implementations must be total: every input yields a non-empty target type,
/// unknown types fall back to a generic text type with a warning.
pub trait TypeMapper: Send + Sync {
    /// Get the source dialect name.
    fn source_dialect(&self) -> &str;

    /// Get the target dialect name.
    fn target_dialect(&self) -> &str;

    /// Map a source type to a target type.
    fn map_type(
        &self,
        source_type: &str,
        max_length: MaxLength,
        numeric: Option<NumericPrecision>,
    ) -> TypeMapping;

    /// Map a column definition.
    fn map_column(&self, col: &ColumnDef) -> ColumnMapping {
        let mapping = self.map_type(&col.source_type, col.max_length, col.numeric);
        ColumnMapping {
            name: col.name.clone(),
            target_type: mapping.target_type,
            is_nullable: col.is_nullable,
            warning: mapping.warning,
        }
    }
}

/// Result of mapping a column from source to target.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    /// Target column name (same as source).
    pub name: String,
    /// Target data type string.
    pub target_type: String,
    /// Whether the column is nullable.
    pub is_nullable: bool,
    /// Warning message if the mapping is lossy or a fallback.
    pub warning: Option<String>,
}

/// Result of mapping a type from source to target.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMapping {
    /// Target type string (e.g. "VARCHAR(255)", "BIGINT").
    pub target_type: String,
    /// Whether this mapping loses data or precision.
    pub is_lossy: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless type mapping.
    pub fn lossless(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy type mapping with a warning.
    pub fn lossy(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping_lossless() {
        let mapping = TypeMapping::lossless("BIGINT");
        assert_eq!(mapping.target_type, "BIGINT");
        assert!(!mapping.is_lossy);
        assert!(mapping.warning.is_none());
    }

    #[test]
    fn test_type_mapping_lossy() {
        let mapping = TypeMapping::lossy("DATETIME(6)", "offset dropped");
        assert!(mapping.is_lossy);
        assert_eq!(mapping.warning.as_deref(), Some("offset dropped"));
    }
}
