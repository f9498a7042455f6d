//! # mssql-mysql-migrate
//!
//! Dependency-ordered SQL Server to MySQL migration library.
//!
//! This library reads the table catalog of one SQL Server schema, creates the
//! equivalent tables in a MySQL database and copies every row, with support for:
//!
//! - **Type mapping** from SQL Server column types to MySQL ones
//! - **Dependency ordering** so referenced tables are created and filled first
//! - **Cycle handling** by deferring foreign keys until all data is loaded
//! - **Per-table transactions** so a table is either fully loaded or empty
//! - **Level-parallel transfers** with a configurable worker count
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_mysql_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mssql_mysql_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", report.rows_migrated);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod copier;
pub mod core;
pub mod ddl;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod typemap;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TableFilter, TargetConfig, TargetMode};
pub use core::{ColumnDef, ForeignKeyRef, SqlValue, TableDef};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    DryRunReport, HealthCheckResult, MigrationReport, Orchestrator, RowCountCheck, RunStatus,
    TableReport, TableStatus,
};
pub use plan::MigrationPlan;
pub use progress::{JsonProgress, LogProgress, ProgressEvent, ProgressSink};
pub use typemap::TypeMap;
