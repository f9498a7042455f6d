//! Identifier validation and quoting.
//!
//! Identifiers (database, table, column, constraint names) cannot be bound as
//! statement parameters, so every identifier that reaches generated SQL goes
//! through one of the quoting functions here. Values never do: they are always
//! bound as parameters.

use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};

/// MySQL's identifier length limit (characters; we check bytes, which is
/// stricter for multi-byte names).
pub const MYSQL_MAX_IDENTIFIER_LENGTH: usize = 64;

/// SQL Server's identifier length limit.
const MSSQL_MAX_IDENTIFIER_LENGTH: usize = 128;

fn validate(name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > max_len {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            max_len,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Validate an identifier destined for MySQL.
///
/// Rejects empty names, names containing NUL and names longer than 64 bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    validate(name, MYSQL_MAX_IDENTIFIER_LENGTH)
}

/// Quote a MySQL identifier using backticks.
///
/// ```ignore
/// assert_eq!(quote_mysql("users")?, "`users`");
/// assert_eq!(quote_mysql("table`name")?, "`table``name`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Qualify a MySQL table name with its database.
pub fn qualify_mysql(database: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mysql(database)?, quote_mysql(table)?))
}

/// Quote a SQL Server identifier using brackets.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate(name, MSSQL_MAX_IDENTIFIER_LENGTH)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with its schema.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Build a deterministic foreign key constraint name for the target.
///
/// `fk_<table>_<col1>_<col2>`; names over MySQL's limit are cut and given a
/// short SHA-256 suffix so two long names stay distinct.
pub fn foreign_key_name(table: &str, columns: &[&str]) -> String {
    let full = format!("fk_{}_{}", table, columns.join("_"));
    if full.len() <= MYSQL_MAX_IDENTIFIER_LENGTH {
        return full;
    }

    let digest = Sha256::digest(full.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();

    let keep = MYSQL_MAX_IDENTIFIER_LENGTH - suffix.len() - 1;
    let mut cut = keep;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &full[..cut], suffix)
}
