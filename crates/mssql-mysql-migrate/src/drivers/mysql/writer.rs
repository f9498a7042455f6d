//! MySQL/MariaDB target writer implementation.
//!
//! Implements the `TargetWriter` trait with mysql_async. Each table is loaded
//! inside one transaction on a dedicated pooled connection, using multi-row
//! positional `INSERT` statements.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::prelude::*;
use mysql_async::{
    Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts, Transaction, TxOpts, Value,
};
use tracing::{debug, info, warn};

use crate::config::{TargetConfig, TargetMode};
use crate::core::identifier::{qualify_mysql, quote_mysql};
use crate::core::schema::TableDef;
use crate::core::traits::{TableLoad, TargetWriter};
use crate::core::value::{Batch, SqlValue};
use crate::ddl::create_database_sql;
use crate::error::{MigrateError, Result};

/// MySQL's limit on placeholders in one prepared statement.
const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

/// MySQL target writer implementation using mysql_async.
pub struct MysqlWriter {
    pool: Pool,
}

impl MysqlWriter {
    /// Connect to MySQL with a pool of at most `max_conns` connections.
    ///
    /// No default database is selected; every statement is qualified.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "required" => Some(SslOpts::default()),
            _ => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        };

        let constraints = PoolConstraints::new(1, max_conns.max(1)).ok_or_else(|| {
            MigrateError::Config(format!("invalid MySQL pool size: {}", max_conns))
        })?;

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL target pool"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL target connection"))?;
        drop(conn);

        info!(
            "Connected to MySQL target: {}:{} (pool_size={})",
            config.host, config.port, max_conns
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl TargetWriter for MysqlWriter {
    async fn create_database(&self, database: &str) -> Result<()> {
        let sql = create_database_sql(database)?;
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(sql.as_str()).await?;
        debug!("{}", sql);
        Ok(())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MySQL connection for DDL"))?;
        conn.query_drop(sql)
            .await
            .map_err(|e| MigrateError::ddl(statement_table(sql), e))
    }

    async fn foreign_key_exists(
        &self,
        database: &str,
        table: &str,
        constraint: &str,
    ) -> Result<bool> {
        let mut conn = self.pool.get_conn().await?;
        let sql = r#"
            SELECT COUNT(*)
            FROM information_schema.TABLE_CONSTRAINTS
            WHERE CONSTRAINT_SCHEMA = ?
              AND TABLE_NAME = ?
              AND CONSTRAINT_NAME = ?
              AND CONSTRAINT_TYPE = 'FOREIGN KEY'
        "#;
        let count: Option<i64> = conn.exec_first(sql, (database, table, constraint)).await?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn begin_load(
        &self,
        database: &str,
        table: &TableDef,
        mode: TargetMode,
    ) -> Result<Box<dyn TableLoad>> {
        let qualified = qualify_mysql(database, &table.name)?;
        let columns = table
            .columns
            .iter()
            .map(|c| quote_mysql(&c.name))
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self
            .pool
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| MigrateError::pool(e, "starting MySQL load transaction"))?;

        if mode == TargetMode::Truncate {
            // TRUNCATE would commit implicitly; DELETE stays inside the transaction.
            let cleared = async {
                tx.query_drop("SET FOREIGN_KEY_CHECKS = 0").await?;
                tx.query_drop(format!("DELETE FROM {}", qualified)).await
            }
            .await;
            if let Err(e) = cleared {
                tx.rollback().await.ok();
                return Err(MigrateError::insert(&table.name, e));
            }
            debug!("{}: cleared existing rows", table.name);
        }

        Ok(Box::new(MysqlTableLoad {
            tx,
            table: table.name.clone(),
            qualified,
            columns,
            mode,
        }))
    }

    async fn get_row_count(&self, database: &str, table: &str) -> Result<i64> {
        let mut conn = self.pool.get_conn().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify_mysql(database, table)?);
        let count: Option<i64> = conn.query_first(sql.as_str()).await?;
        Ok(count.unwrap_or(0))
    }

    async fn test_connection(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL connection"))?;
        conn.query_drop("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
    }
}

/// One table's load transaction.
struct MysqlTableLoad {
    tx: Transaction<'static>,
    table: String,
    qualified: String,
    columns: Vec<String>,
    mode: TargetMode,
}

impl MysqlTableLoad {
    async fn restore_checks(&mut self) -> Result<()> {
        if self.mode == TargetMode::Truncate {
            self.tx.query_drop("SET FOREIGN_KEY_CHECKS = 1").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TableLoad for MysqlTableLoad {
    async fn write_batch(&mut self, batch: Batch) -> Result<u64> {
        if batch.rows.is_empty() || self.columns.is_empty() {
            return Ok(0);
        }

        let num_cols = self.columns.len();
        let mut written = 0u64;
        let mut rows = batch.rows.into_iter().peekable();

        while rows.peek().is_some() {
            let chunk: Vec<_> = rows.by_ref().take(rows_per_insert(num_cols)).collect();
            let n = chunk.len();
            let sql = insert_sql(&self.qualified, &self.columns, n);
            let params: Vec<Value> = chunk
                .into_iter()
                .flat_map(|row| row.into_iter().map(sql_value_to_mysql))
                .collect();

            self.tx
                .exec_drop(sql.as_str(), params)
                .await
                .map_err(|e| MigrateError::insert(&self.table, e))?;
            written += n as u64;
        }

        Ok(written)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.restore_checks().await?;
        this.tx
            .commit()
            .await
            .map_err(|e| MigrateError::insert(&this.table, e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        if let Err(e) = this.restore_checks().await {
            debug!("{}: could not restore FOREIGN_KEY_CHECKS: {}", this.table, e);
        }
        this.tx.rollback().await?;
        Ok(())
    }
}

/// Rows per `INSERT` that stay under the placeholder limit.
fn rows_per_insert(num_cols: usize) -> usize {
    (MYSQL_MAX_PLACEHOLDERS / num_cols.max(1)).max(1)
}

fn insert_sql(qualified: &str, columns: &[String], rows: usize) -> String {
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified,
        columns.join(", "),
        vec![row; rows].join(", ")
    )
}

/// Table name of a `CREATE TABLE` or `ALTER TABLE` statement, for errors.
fn statement_table(sql: &str) -> String {
    quoted_identifiers(sql)
        .into_iter()
        .nth(1)
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// Backtick-quoted identifiers in order, with doubled backticks unescaped.
fn quoted_identifiers(sql: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '`' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '`' {
                if chars.peek() == Some(&'`') {
                    chars.next();
                    ident.push('`');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        idents.push(ident);
    }
    idents
}

fn date_value(d: NaiveDate) -> Value {
    Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
}

fn datetime_value(dt: NaiveDateTime) -> Value {
    Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        micros(dt.nanosecond()),
    )
}

fn time_value(t: NaiveTime) -> Value {
    Value::Time(
        false,
        0,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
        micros(t.nanosecond()),
    )
}

// chrono encodes leap seconds as nanos >= 1e9.
fn micros(nanos: u32) -> u32 {
    (nanos / 1_000).min(999_999)
}

/// Bind a value for MySQL without losing precision.
fn sql_value_to_mysql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(b)),
        SqlValue::U8(i) => Value::UInt(u64::from(i)),
        SqlValue::I16(i) => Value::Int(i64::from(i)),
        SqlValue::I32(i) => Value::Int(i64::from(i)),
        SqlValue::I64(i) => Value::Int(i),
        SqlValue::F32(f) => Value::Float(f),
        SqlValue::F64(f) => Value::Double(f),
        SqlValue::Text(s) => Value::Bytes(s.into_bytes()),
        SqlValue::Bytes(b) => Value::Bytes(b),
        SqlValue::Uuid(u) => Value::Bytes(u.to_string().into_bytes()),
        SqlValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        SqlValue::DateTime(dt) => datetime_value(dt),
        SqlValue::DateTimeOffset(dto) => datetime_value(dto.naive_utc()),
        SqlValue::Date(d) => date_value(d),
        SqlValue::Time(t) => time_value(t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    #[test]
    fn test_rows_per_insert_respects_placeholder_limit() {
        assert_eq!(rows_per_insert(1), 65535);
        assert_eq!(rows_per_insert(10), 6553);
        assert_eq!(rows_per_insert(100_000), 1);
        for cols in [3, 7, 64, 1000] {
            assert!(rows_per_insert(cols) * cols <= MYSQL_MAX_PLACEHOLDERS);
        }
    }

    #[test]
    fn test_insert_sql() {
        let cols = vec!["`id`".to_string(), "`name`".to_string()];
        assert_eq!(
            insert_sql("`shop`.`customers`", &cols, 2),
            "INSERT INTO `shop`.`customers` (`id`, `name`) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn test_statement_table() {
        assert_eq!(
            statement_table("CREATE TABLE IF NOT EXISTS `shop`.`orders` (\n  `id` INT\n)"),
            "orders"
        );
        assert_eq!(
            statement_table("ALTER TABLE `shop`.`a``b` ADD CONSTRAINT `fk` FOREIGN KEY"),
            "a`b"
        );
        assert_eq!(statement_table("SELECT 1"), "<unknown>");
    }

    #[test]
    fn test_statement_table_with_escaped_backticks_in_schema() {
        assert_eq!(
            statement_table("CREATE TABLE IF NOT EXISTS `my``db`.```quoted``` (\n  `id` INT\n)"),
            "`quoted`"
        );
    }

    #[test]
    fn test_decimal_keeps_exact_digits() {
        let d = Decimal::from_str("12345678901234567890.1234").unwrap();
        assert_eq!(
            sql_value_to_mysql(SqlValue::Decimal(d)),
            Value::Bytes(b"12345678901234567890.1234".to_vec())
        );
    }

    #[test]
    fn test_datetime_keeps_microseconds() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(13, 45, 7, 123_456)
            .unwrap();
        assert_eq!(
            sql_value_to_mysql(SqlValue::DateTime(dt)),
            Value::Date(2024, 2, 29, 13, 45, 7, 123_456)
        );
    }

    #[test]
    fn test_datetimeoffset_converted_to_utc() {
        let dto = DateTime::<FixedOffset>::parse_from_rfc3339("2024-06-01T10:00:00+02:00").unwrap();
        assert_eq!(
            sql_value_to_mysql(SqlValue::DateTimeOffset(dto)),
            Value::Date(2024, 6, 1, 8, 0, 0, 0)
        );
    }

    #[test]
    fn test_date_and_time() {
        let d = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(
            sql_value_to_mysql(SqlValue::Date(d)),
            Value::Date(1999, 12, 31, 0, 0, 0, 0)
        );
        let t = NaiveTime::from_hms_micro_opt(23, 59, 59, 5).unwrap();
        assert_eq!(
            sql_value_to_mysql(SqlValue::Time(t)),
            Value::Time(false, 0, 23, 59, 59, 5)
        );
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(sql_value_to_mysql(SqlValue::Null), Value::NULL);
        assert_eq!(sql_value_to_mysql(SqlValue::Bool(true)), Value::Int(1));
        assert_eq!(sql_value_to_mysql(SqlValue::U8(255)), Value::UInt(255));
        assert_eq!(sql_value_to_mysql(SqlValue::I64(-7)), Value::Int(-7));
        assert_eq!(
            sql_value_to_mysql(SqlValue::Text("héllo".into())),
            Value::Bytes("héllo".as_bytes().to_vec())
        );
        let u = Uuid::nil();
        assert_eq!(
            sql_value_to_mysql(SqlValue::Uuid(u)),
            Value::Bytes(b"00000000-0000-0000-0000-000000000000".to_vec())
        );
    }
}
