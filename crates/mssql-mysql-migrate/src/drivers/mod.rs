//! Database driver implementations.
//!
//! - [`mssql`]: SQL Server source reader (Tiberius + bb8)
//! - [`mysql`]: MySQL target writer (mysql_async)
//!
//! Each driver implements one side of the core traits; the engine never
//! names a concrete driver outside [`crate::orchestrator::Orchestrator::new`].

pub mod mssql;
pub mod mysql;

pub use mssql::MssqlReader;
pub use mysql::MysqlWriter;
