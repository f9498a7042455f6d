//! MySQL/MariaDB database driver.
//!
//! - [`MysqlWriter`]: target writer for MySQL databases
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod writer;

pub use writer::MysqlWriter;
