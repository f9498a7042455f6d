//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when one or more tables did not fully migrate.
pub const EXIT_TABLE_FAILURES: u8 = 2;
/// Exit code for connection failures.
pub const EXIT_CONNECTION_ERROR: u8 = 3;
/// Exit code for errors raised while talking to a database mid-run.
pub const EXIT_DATABASE_ERROR: u8 = 4;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target connection could not be opened. Fatal to the run.
    #[error("Connection error ({side}): {message}")]
    Connection { side: String, message: String },

    /// Catalog query failed for a table.
    #[error("Schema read failed for table {table}: {message}")]
    SchemaRead { table: String, message: String },

    /// Target DDL statement failed.
    #[error("DDL failed for table {table}: {message}")]
    Ddl { table: String, message: String },

    /// Row insert into the target failed.
    #[error("Insert failed for table {table}: {message}")]
    Insert { table: String, message: String },

    /// Source database error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database error
    #[error("Target database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// One or more tables did not fully migrate.
    #[error("Migration incomplete: {0}")]
    Incomplete(String),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Connection error for the given side ("source" or "target").
    pub fn connection(side: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Connection {
            side: side.into(),
            message: message.to_string(),
        }
    }

    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a SchemaRead error
    pub fn schema_read(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SchemaRead {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Ddl error
    pub fn ddl(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Ddl {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create an Insert error
    pub fn insert(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Insert {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the whole run rather than one table.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_) | MigrateError::Connection { .. } | MigrateError::Cancelled
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection { .. } | MigrateError::Pool { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::Incomplete(_) => EXIT_TABLE_FAILURES,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::SchemaRead { .. }
            | MigrateError::Ddl { .. }
            | MigrateError::Insert { .. }
            | MigrateError::Source(_)
            | MigrateError::Target(_)
            | MigrateError::Json(_) => EXIT_DATABASE_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
