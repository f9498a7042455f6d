//! Configuration loading and validation.
//!
//! Configuration comes from a YAML file, from environment variables, or from
//! both: environment variables override values read from the file.

mod filter;
mod types;
mod validation;

pub use filter::TableFilter;
pub use types::*;

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Environment variables understood by [`Config::from_env`] and
/// [`Config::apply_env_overrides`].
pub const ENV_VARS: &[&str] = &[
    "MSSQL_HOST",
    "MSSQL_PORT",
    "MSSQL_DATABASE",
    "MSSQL_USER",
    "MSSQL_PASSWORD",
    "MSSQL_SCHEMA",
    "MYSQL_HOST",
    "MYSQL_PORT",
    "MYSQL_USER",
    "MYSQL_PASSWORD",
    "MYSQL_DATABASE",
];

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables alone.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the file at `path` if it exists, otherwise start from the
    /// environment; environment variables override file values either way.
    pub fn resolve<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            debug!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str::<Config>(&content)?
        } else {
            debug!(
                "{} not found, reading configuration from environment",
                path.display()
            );
            return Self::from_env();
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields with any of [`ENV_VARS`] that are set.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| MigrateError::Config(format!("{} is not set", key)))
        };

        let mut config = Config {
            source: SourceConfig {
                r#type: default_mssql(),
                host: require("MSSQL_HOST")?,
                port: default_mssql_port(),
                database: require("MSSQL_DATABASE")?,
                user: require("MSSQL_USER")?,
                password: String::new(),
                schema: default_dbo_schema(),
                encrypt: true,
                trust_server_cert: false,
            },
            target: TargetConfig {
                r#type: default_mysql(),
                host: require("MYSQL_HOST")?,
                port: default_mysql_port(),
                database: None,
                user: require("MYSQL_USER")?,
                password: String::new(),
                ssl_mode: default_preferred(),
            },
            migration: MigrationConfig::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = |key: &str, raw: String| {
            raw.parse::<u16>()
                .map_err(|_| MigrateError::Config(format!("{} is not a valid port: {}", key, raw)))
        };

        if let Some(v) = lookup("MSSQL_HOST") {
            self.source.host = v;
        }
        if let Some(v) = lookup("MSSQL_PORT") {
            self.source.port = port("MSSQL_PORT", v)?;
        }
        if let Some(v) = lookup("MSSQL_DATABASE") {
            self.source.database = v;
        }
        if let Some(v) = lookup("MSSQL_USER") {
            self.source.user = v;
        }
        if let Some(v) = lookup("MSSQL_PASSWORD") {
            self.source.password = v;
        }
        if let Some(v) = lookup("MSSQL_SCHEMA") {
            self.source.schema = v;
        }
        if let Some(v) = lookup("MYSQL_HOST") {
            self.target.host = v;
        }
        if let Some(v) = lookup("MYSQL_PORT") {
            self.target.port = port("MYSQL_PORT", v)?;
        }
        if let Some(v) = lookup("MYSQL_USER") {
            self.target.user = v;
        }
        if let Some(v) = lookup("MYSQL_PASSWORD") {
            self.target.password = v;
        }
        if let Some(v) = lookup("MYSQL_DATABASE") {
            self.target.database = Some(v);
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compiled table filter from the include/exclude patterns.
    pub fn table_filter(&self) -> Result<TableFilter> {
        TableFilter::new(
            &self.migration.include_tables,
            &self.migration.exclude_tables,
        )
    }

    /// Compute a SHA256 hash of the configuration, passwords excluded.
    pub fn hash(&self) -> String {
        let mut redacted = self.clone();
        redacted.source.password.clear();
        redacted.target.password.clear();
        let yaml = serde_yaml::to_string(&redacted).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
source:
  host: sqlserver
  database: Shop
  user: sa
  password: secret
target:
  host: mysql
  user: root
  password: secret
migration:
  workers: 4
  exclude_tables: ["*_log"]
  target_mode: truncate
  type_overrides:
    geography: GEOMETRY
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.source.schema, "dbo");
        assert!(config.source.encrypt);
        assert_eq!(config.target.port, 3306);
        assert_eq!(config.target_database(), "shop");
        assert_eq!(config.migration.workers, 4);
        assert_eq!(config.migration.batch_size, 1000);
        assert_eq!(config.migration.target_mode, TargetMode::Truncate);
        assert!(config.migration.create_foreign_keys);
        assert_eq!(
            config.migration.type_overrides.get("geography").map(String::as_str),
            Some("GEOMETRY")
        );
    }

    #[test]
    fn test_explicit_target_database() {
        let mut config = Config::from_yaml(YAML).unwrap();
        config.target.database = Some("warehouse".into());
        assert_eq!(config.target_database(), "warehouse");
    }

    #[test]
    fn test_from_lookup_requires_connection_fields() {
        let err = Config::from_lookup(env(&[("MSSQL_HOST", "h")])).unwrap_err();
        assert!(err.to_string().contains("MSSQL_DATABASE"));
    }

    #[test]
    fn test_from_lookup_builds_config() {
        let config = Config::from_lookup(env(&[
            ("MSSQL_HOST", "sql"),
            ("MSSQL_PORT", "14330"),
            ("MSSQL_DATABASE", "Sales"),
            ("MSSQL_USER", "sa"),
            ("MSSQL_PASSWORD", "pw"),
            ("MYSQL_HOST", "my"),
            ("MYSQL_USER", "root"),
            ("MYSQL_DATABASE", "sales_copy"),
        ]))
        .unwrap();
        assert_eq!(config.source.port, 14330);
        assert_eq!(config.source.password, "pw");
        assert_eq!(config.target_database(), "sales_copy");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_yaml(YAML).unwrap();
        config
            .apply_overrides(env(&[("MYSQL_HOST", "other"), ("MSSQL_SCHEMA", "sales")]))
            .unwrap();
        assert_eq!(config.target.host, "other");
        assert_eq!(config.source.schema, "sales");
        assert_eq!(config.source.host, "sqlserver");
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut config = Config::from_yaml(YAML).unwrap();
        let err = config
            .apply_overrides(env(&[("MYSQL_PORT", "abc")]))
            .unwrap_err();
        assert!(err.to_string().contains("MYSQL_PORT"));
    }

    #[test]
    fn test_hash_ignores_passwords() {
        let a = Config::from_yaml(YAML).unwrap();
        let mut b = a.clone();
        b.source.password = "rotated".into();
        assert_eq!(a.hash(), b.hash());
        b.migration.workers = 2;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_table_filter_from_config() {
        let config = Config::from_yaml(YAML).unwrap();
        let filter = config.table_filter().unwrap();
        assert!(filter.matches("orders"));
        assert!(!filter.matches("audit_log"));
    }
}
