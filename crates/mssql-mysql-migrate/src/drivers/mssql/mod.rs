//! Microsoft SQL Server driver.
//!
//! - [`MssqlReader`]: source reader for MSSQL databases

mod reader;

pub use reader::MssqlReader;
