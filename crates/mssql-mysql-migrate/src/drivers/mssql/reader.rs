//! MSSQL source reader implementation.
//!
//! Implements the `SourceReader` trait over Tiberius with bb8 connection
//! pooling. Catalog reads go through `INFORMATION_SCHEMA` with bound
//! parameters; row scans are a single ordered `SELECT` streamed in batches.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::core::identifier::{qualify_mssql, quote_mssql};
use crate::core::schema::{ColumnDef, ForeignKeyRef, MaxLength, NumericPrecision, TableDef};
use crate::core::traits::SourceReader;
use crate::core::value::{Batch, Row as ValueRow, SqlValue};
use crate::error::{MigrateError, Result};

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum connection lifetime (30 minutes).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Batches buffered between the scan task and the writer.
const SCAN_CHANNEL_CAPACITY: usize = 4;

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// MSSQL source reader.
pub struct MssqlReader {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlReader {
    /// Connect to SQL Server with a pool of at most `max_size` connections.
    pub async fn new(config: &SourceConfig, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MSSQL connection pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "testing MSSQL connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self { pool })
    }

    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MSSQL connection from pool"))
    }
}

#[async_trait]
impl SourceReader for MssqlReader {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            r#"
            SELECT TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA = @P1
            ORDER BY TABLE_NAME
        "#,
        );
        query.bind(schema);

        let rows = query.query(&mut client).await?.into_first_result().await?;
        let tables = rows
            .iter()
            .map(|row| text(row, 0))
            .collect::<Result<Vec<_>>>()?;

        info!("Found {} tables in schema {}", tables.len(), schema);
        Ok(tables)
    }

    async fn read_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDef>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(CHARACTER_MAXIMUM_LENGTH AS INT),
                CAST(NUMERIC_PRECISION AS INT),
                CAST(NUMERIC_SCALE AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                CAST(ORDINAL_POSITION AS INT)
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#,
        );
        query.bind(schema);
        query.bind(table);

        let rows = query.query(&mut client).await?.into_first_result().await?;
        let mut columns = Vec::with_capacity(rows.len());

        for row in &rows {
            let source_type = text(row, 1)?.to_lowercase();
            let numeric = match source_type.as_str() {
                "decimal" | "numeric" => {
                    let precision = row.try_get::<i32, _>(3)?.unwrap_or(0);
                    let scale = row.try_get::<i32, _>(4)?.unwrap_or(0);
                    Some(NumericPrecision::new(
                        precision.clamp(0, u8::MAX as i32) as u8,
                        scale.clamp(0, u8::MAX as i32) as u8,
                    ))
                }
                _ => None,
            };

            columns.push(ColumnDef {
                name: text(row, 0)?,
                max_length: MaxLength::from_catalog(row.try_get::<i32, _>(2)?),
                numeric,
                is_nullable: row.try_get::<i32, _>(5)?.unwrap_or(1) == 1,
                ordinal_pos: row.try_get::<i32, _>(6)?.unwrap_or(0),
                source_type,
            });
        }

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn read_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            r#"
            SELECT c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
                AND c.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_SCHEMA = @P1
              AND tc.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#,
        );
        query.bind(schema);
        query.bind(table);

        let rows = query.query(&mut client).await?.into_first_result().await?;
        let primary_key = rows
            .iter()
            .map(|row| text(row, 0))
            .collect::<Result<Vec<_>>>()?;

        debug!("Primary key for {}.{}: {:?}", schema, table, primary_key);
        Ok(primary_key)
    }

    async fn read_foreign_keys(&self, schema: &str, table: &str) -> Result<Vec<ForeignKeyRef>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(
            r#"
            SELECT
                fk.CONSTRAINT_NAME,
                fk.COLUMN_NAME,
                pk.TABLE_SCHEMA,
                pk.TABLE_NAME,
                pk.COLUMN_NAME,
                CAST(fk.ORDINAL_POSITION AS INT)
            FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE fk
                ON fk.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA
                AND fk.CONSTRAINT_NAME = rc.CONSTRAINT_NAME
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE pk
                ON pk.CONSTRAINT_SCHEMA = rc.UNIQUE_CONSTRAINT_SCHEMA
                AND pk.CONSTRAINT_NAME = rc.UNIQUE_CONSTRAINT_NAME
                AND pk.ORDINAL_POSITION = fk.ORDINAL_POSITION
            WHERE fk.TABLE_SCHEMA = @P1 AND fk.TABLE_NAME = @P2
            ORDER BY fk.CONSTRAINT_NAME, fk.ORDINAL_POSITION
        "#,
        );
        query.bind(schema);
        query.bind(table);

        let rows = query.query(&mut client).await?.into_first_result().await?;
        let mut foreign_keys = Vec::with_capacity(rows.len());

        for row in &rows {
            let constraint = text(row, 0)?;
            let referenced_schema = text(row, 2)?;
            if referenced_schema != schema {
                warn!(
                    "{}.{}: foreign key {} references {}.{} outside the migrated schema; ignored",
                    schema,
                    table,
                    constraint,
                    referenced_schema,
                    text(row, 3)?
                );
                continue;
            }
            foreign_keys.push(ForeignKeyRef {
                constraint,
                column: text(row, 1)?,
                referenced_table: text(row, 3)?,
                referenced_column: text(row, 4)?,
                ordinal: row.try_get::<i32, _>(5)?.unwrap_or(1),
            });
        }

        debug!(
            "Loaded {} foreign key columns for {}.{}",
            foreign_keys.len(),
            schema,
            table
        );
        Ok(foreign_keys)
    }

    fn read_table(&self, table: &TableDef, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let table = table.clone();
        let batch_size = batch_size.max(1);

        tokio::spawn(async move {
            if let Err(e) = scan_table(pool, &table, batch_size, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }

    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let mut client = self.get_client().await?;

        let sql = format!(
            "SELECT CAST(COUNT_BIG(*) AS BIGINT) FROM {}",
            qualify_mssql(schema, table)?
        );
        let row = client.simple_query(sql).await?.into_row().await?;

        Ok(match row {
            Some(row) => row.try_get::<i64, _>(0)?.unwrap_or(0),
            None => 0,
        })
    }

    async fn test_connection(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mssql"
    }

    async fn close(&self) {
        // bb8 drops idle connections with the pool
    }
}

/// Run one ordered scan of `table` and send its rows in batches.
async fn scan_table(
    pool: Pool<TiberiusConnectionManager>,
    table: &TableDef,
    batch_size: usize,
    tx: mpsc::Sender<Result<Batch>>,
) -> Result<()> {
    let mut client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, "getting connection for table scan"))?;

    let sql = build_select(table)?;
    debug!("{}: {}", table.name, sql);

    let types: Vec<String> = table
        .columns
        .iter()
        .map(|c| c.source_type.to_lowercase())
        .collect();

    let mut stream = client.simple_query(sql).await?.into_row_stream();
    let mut rows: Vec<ValueRow> = Vec::with_capacity(batch_size);

    while let Some(row) = stream.try_next().await? {
        let values = types
            .iter()
            .enumerate()
            .map(|(idx, ty)| convert_value(&row, idx, ty))
            .collect::<Result<ValueRow>>()?;
        rows.push(values);

        if rows.len() == batch_size {
            let full = std::mem::replace(&mut rows, Vec::with_capacity(batch_size));
            if tx.send(Ok(Batch::new(full))).await.is_err() {
                // Receiver gone: the copy was abandoned.
                return Ok(());
            }
        }
    }

    let _ = tx.send(Ok(Batch::new(rows).mark_final())).await;
    Ok(())
}

/// `SELECT` every column in table order, ordered by the primary key.
fn build_select(table: &TableDef) -> Result<String> {
    let columns = table
        .columns
        .iter()
        .map(select_expr)
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut sql = format!(
        "SELECT {} FROM {}",
        columns,
        qualify_mssql(&table.schema, &table.name)?
    );

    if table.has_pk() {
        let keys = table
            .primary_key
            .iter()
            .map(|k| quote_mssql(k))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys);
    }

    Ok(sql)
}

/// Select expression for a column; types Tiberius cannot decode are read as text.
fn select_expr(col: &ColumnDef) -> Result<String> {
    let quoted = quote_mssql(&col.name)?;
    Ok(match col.source_type.to_lowercase().as_str() {
        "xml" | "sql_variant" | "hierarchyid" => {
            format!("CAST({} AS NVARCHAR(MAX)) AS {}", quoted, quoted)
        }
        "geography" | "geometry" => format!("{}.STAsText() AS {}", quoted, quoted),
        // Tiberius decodes money as f64; DECIMAL keeps every digit.
        "money" | "smallmoney" => format!("CAST({} AS DECIMAL(19,4)) AS {}", quoted, quoted),
        _ => quoted,
    })
}

fn text(row: &Row, idx: usize) -> Result<String> {
    Ok(row
        .try_get::<&str, _>(idx)?
        .map(str::to_string)
        .unwrap_or_default())
}

/// Decode one column of a row according to its source type.
fn convert_value(row: &Row, idx: usize, source_type: &str) -> Result<SqlValue> {
    let value = match source_type {
        "bit" => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        "tinyint" => row.try_get::<u8, _>(idx)?.map(SqlValue::U8),
        "smallint" => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        "int" => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        "bigint" => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        "real" => row.try_get::<f32, _>(idx)?.map(SqlValue::F32),
        "float" => row.try_get::<f64, _>(idx)?.map(SqlValue::F64),
        "decimal" | "numeric" | "money" | "smallmoney" => {
            row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal)
        }
        "uniqueidentifier" => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        "date" => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
        "time" => row.try_get::<NaiveTime, _>(idx)?.map(SqlValue::Time),
        "datetime" | "datetime2" | "smalldatetime" => {
            row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime)
        }
        "datetimeoffset" => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map(SqlValue::DateTimeOffset),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => row
            .try_get::<&[u8], _>(idx)?
            .map(|b| SqlValue::Bytes(b.to_vec())),
        _ => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(s.to_string())),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
