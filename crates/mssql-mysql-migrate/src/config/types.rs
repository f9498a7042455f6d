//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (MySQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Name of the target database: the configured one, or the source
    /// database name lowercased.
    pub fn target_database(&self) -> String {
        match &self.target.database {
            Some(db) if !db.is_empty() => db.clone(),
            _ => self.source.database.to_lowercase(),
        }
    }
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "mssql").
    #[serde(default = "default_mssql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Target database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "mysql").
    #[serde(default = "default_mysql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Target database name. Defaults to the source database lowercased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, preferred or required (default: "preferred").
    #[serde(default = "default_preferred")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Tables migrated concurrently within one dependency level (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Rows per read batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Tables to include (glob patterns). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Target mode (default: append).
    #[serde(default)]
    pub target_mode: TargetMode,

    /// Create foreign keys (default: true).
    #[serde(default = "default_true")]
    pub create_foreign_keys: bool,

    /// Source type → target type overrides, applied over the built-in table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub type_overrides: BTreeMap<String, String>,

    /// Maximum MSSQL connections. Derived from workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<usize>,

    /// Maximum MySQL connections. Derived from workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            target_mode: TargetMode::default(),
            create_foreign_keys: true,
            type_overrides: BTreeMap::new(),
            max_source_connections: None,
            max_target_connections: None,
        }
    }
}

impl MigrationConfig {
    pub fn get_max_source_connections(&self) -> usize {
        self.max_source_connections
            .unwrap_or_else(|| (self.workers * 2).clamp(2, 64))
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections
            .unwrap_or_else(|| (self.workers * 2).clamp(2, 64))
    }
}

/// What to do with rows already present in a target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Insert into the table as it is. A rerun against a populated table
    /// with a primary key fails that table on duplicate keys.
    #[default]
    Append,

    /// Delete existing rows inside the load transaction before copying.
    Truncate,
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMode::Append => write!(f, "append"),
            TargetMode::Truncate => write!(f, "truncate"),
        }
    }
}

// Default value functions for serde
pub(crate) fn default_mssql() -> String {
    "mssql".to_string()
}

pub(crate) fn default_mysql() -> String {
    "mysql".to_string()
}

pub(crate) fn default_mssql_port() -> u16 {
    1433
}

pub(crate) fn default_mysql_port() -> u16 {
    3306
}

pub(crate) fn default_dbo_schema() -> String {
    "dbo".to_string()
}

pub(crate) fn default_preferred() -> String {
    "preferred".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_batch_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}
