//! Core abstractions for the migration engine.
//!
//! - [`schema`]: table, column and foreign key metadata
//! - [`value`]: row values and batches
//! - [`traits`]: source reader, target writer and type mapper seams
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnDef, ForeignKeyRef, MaxLength, NumericPrecision, TableDef};
pub use traits::{ColumnMapping, SourceReader, TableLoad, TargetWriter, TypeMapper, TypeMapping};
pub use value::{Batch, Row, SqlValue};
