//! Configuration validation.

use super::{Config, TableFilter};
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};

const SSL_MODES: &[&str] = &["disable", "preferred", "required"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.schema.is_empty() {
        return Err(MigrateError::Config("source.schema is required".into()));
    }
    if config.source.r#type != "mssql" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'mssql', got '{}'",
            config.source.r#type
        )));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.r#type != "mysql" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'mysql', got '{}'",
            config.target.r#type
        )));
    }
    if !SSL_MODES.contains(&config.target.ssl_mode.as_str()) {
        return Err(MigrateError::Config(format!(
            "target.ssl_mode must be one of {:?}, got '{}'",
            SSL_MODES, config.target.ssl_mode
        )));
    }
    validate_identifier(&config.target_database())
        .map_err(|e| MigrateError::Config(format!("target.database: {}", e)))?;

    // Migration validation
    if config.migration.workers == 0 {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    for (source_type, target_type) in &config.migration.type_overrides {
        if target_type.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "migration.type_overrides.{} must not be empty",
                source_type
            )));
        }
    }
    TableFilter::new(
        &config.migration.include_tables,
        &config.migration.exclude_tables,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                r#type: "mssql".to_string(),
                host: "localhost".to_string(),
                port: 1433,
                database: "SourceDb".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                schema: "dbo".to_string(),
                encrypt: false,
                trust_server_cert: true,
            },
            target: TargetConfig {
                r#type: "mysql".to_string(),
                host: "localhost".to_string(),
                port: 3306,
                database: None,
                user: "root".to_string(),
                password: "password".to_string(),
                ssl_mode: "disable".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_source_type() {
        let mut config = valid_config();
        config.source.r#type = "postgres".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_wrong_target_type() {
        let mut config = valid_config();
        config.target.r#type = "mssql".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers_and_batch_size() {
        let mut config = valid_config();
        config.migration.workers = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_target_database_must_be_valid_identifier() {
        let mut config = valid_config();
        config.target.database = Some("x".repeat(65));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_table_pattern() {
        let mut config = valid_config();
        config.migration.exclude_tables = vec!["[oops".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }
}
