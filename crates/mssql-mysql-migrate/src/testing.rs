//! In-memory source and target used by the engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TargetMode;
use crate::core::schema::{ColumnDef, ForeignKeyRef, MaxLength, TableDef};
use crate::core::traits::{SourceReader, TableLoad, TargetWriter};
use crate::core::value::{Batch, Row, SqlValue};
use crate::error::{MigrateError, Result};

/// Source backed by table definitions and rows held in memory.
#[derive(Default)]
pub struct FakeSource {
    tables: BTreeMap<String, (TableDef, Vec<Row>)>,
    broken_schema: HashSet<String>,
    scan_failures: HashMap<String, usize>,
    list_fails: bool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `id INT NOT NULL` primary key, `name NVARCHAR(50)`, plus one
    /// `<ref>_id` column and foreign key per referenced table.
    pub fn simple_table(name: &str, refs: &[&str]) -> TableDef {
        let mut table = TableDef::new("dbo", name);
        let mut id = ColumnDef::new("id", "int", MaxLength::NotApplicable);
        id.is_nullable = false;
        id.ordinal_pos = 1;
        let mut label = ColumnDef::new("name", "nvarchar", MaxLength::Bounded(50));
        label.ordinal_pos = 2;
        table.columns = vec![id, label];
        table.primary_key = vec!["id".to_string()];

        for (i, r) in refs.iter().enumerate() {
            let column = format!("{}_id", r);
            let mut col = ColumnDef::new(&column, "int", MaxLength::NotApplicable);
            col.ordinal_pos = 3 + i as i32;
            table.columns.push(col);
            table.foreign_keys.push(ForeignKeyRef {
                constraint: format!("FK_{}_{}", name, r),
                column,
                referenced_table: r.to_string(),
                referenced_column: "id".to_string(),
                ordinal: 1,
            });
        }
        table
    }

    pub fn with_table(mut self, table: TableDef, rows: Vec<Row>) -> Self {
        self.tables.insert(table.name.clone(), (table, rows));
        self
    }

    /// Make catalog reads for `table` fail.
    pub fn break_schema(mut self, table: &str) -> Self {
        self.broken_schema.insert(table.to_string());
        self
    }

    /// Fail the scan of `table` after `batches` batches.
    pub fn fail_scan_after(mut self, table: &str, batches: usize) -> Self {
        self.scan_failures.insert(table.to_string(), batches);
        self
    }

    pub fn fail_list(mut self) -> Self {
        self.list_fails = true;
        self
    }

    fn table(&self, name: &str) -> Result<&TableDef> {
        if self.broken_schema.contains(name) {
            return Err(MigrateError::Io(std::io::Error::other(
                "catalog query timed out",
            )));
        }
        self.tables
            .get(name)
            .map(|(t, _)| t)
            .ok_or_else(|| MigrateError::Io(std::io::Error::other("no such table")))
    }
}

#[async_trait]
impl SourceReader for FakeSource {
    async fn list_tables(&self, _schema: &str) -> Result<Vec<String>> {
        if self.list_fails {
            return Err(MigrateError::Io(std::io::Error::other("permission denied")));
        }
        Ok(self.tables.keys().cloned().collect())
    }

    async fn read_columns(&self, _schema: &str, table: &str) -> Result<Vec<ColumnDef>> {
        Ok(self.table(table)?.columns.clone())
    }

    async fn read_primary_key(&self, _schema: &str, table: &str) -> Result<Vec<String>> {
        Ok(self.table(table)?.primary_key.clone())
    }

    async fn read_foreign_keys(&self, _schema: &str, table: &str) -> Result<Vec<ForeignKeyRef>> {
        Ok(self.table(table)?.foreign_keys.clone())
    }

    fn read_table(&self, table: &TableDef, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let rows = self
            .tables
            .get(&table.name)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        let chunks: Vec<Vec<Row>> = rows.chunks(batch_size).map(|c| c.to_vec()).collect();
        let (tx, rx) = mpsc::channel(chunks.len() + 2);

        let fail_after = self.scan_failures.get(&table.name).copied();
        if chunks.is_empty() {
            let _ = tx.try_send(Ok(Batch::empty_final()));
            return rx;
        }
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            if fail_after == Some(i) {
                let _ = tx.try_send(Err(MigrateError::Io(std::io::Error::other(
                    "connection reset",
                ))));
                return rx;
            }
            let batch = Batch::new(chunk);
            let batch = if i == last { batch.mark_final() } else { batch };
            let _ = tx.try_send(Ok(batch));
        }
        rx
    }

    async fn get_row_count(&self, _schema: &str, table: &str) -> Result<i64> {
        Ok(self.tables.get(table).map(|(_, r)| r.len() as i64).unwrap_or(0))
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake-mssql"
    }

    async fn close(&self) {}
}

#[derive(Default)]
struct TargetTable {
    rows: Vec<Row>,
    inserts: usize,
    committed: bool,
}

#[derive(Default)]
struct TargetState {
    databases: Vec<String>,
    statements: Vec<String>,
    tables: HashMap<String, TargetTable>,
    constraints: HashSet<String>,
    ddl_failures: HashSet<String>,
    insert_failures: HashMap<String, usize>,
}

/// Target that keeps committed rows and executed statements in memory.
#[derive(Clone, Default)]
pub struct FakeTarget {
    state: Arc<Mutex<TargetState>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `CREATE TABLE` for `table` fail.
    pub fn fail_ddl(self, table: &str) -> Self {
        self.state.lock().unwrap().ddl_failures.insert(table.to_string());
        self
    }

    /// Fail inserts into `table` after `batches` successful batches.
    pub fn fail_insert_after(self, table: &str, batches: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .insert_failures
            .insert(table.to_string(), batches);
        self
    }

    /// Pre-populate a table with committed rows.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut state = self.state.lock().unwrap();
        let entry = state.tables.entry(table.to_string()).or_default();
        entry.rows = rows;
        entry.committed = true;
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn insert_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.inserts)
            .unwrap_or(0)
    }

    pub fn committed(&self, table: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.committed)
            .unwrap_or(false)
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn databases(&self) -> Vec<String> {
        self.state.lock().unwrap().databases.clone()
    }
}

fn backticked_after<'a>(sql: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &sql[sql.find(marker)? + marker.len()..];
    let rest = rest.strip_prefix('`')?;
    Some(&rest[..rest.find('`')?])
}

#[async_trait]
impl TargetWriter for FakeTarget {
    async fn create_database(&self, database: &str) -> Result<()> {
        self.state.lock().unwrap().databases.push(database.to_string());
        Ok(())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if sql.starts_with("CREATE TABLE") {
            // `db`.`table`
            if let Some(table) = backticked_after(sql, "`.") {
                if state.ddl_failures.contains(table) {
                    return Err(MigrateError::ddl(table, "Access denied"));
                }
            }
        }
        if let Some(name) = backticked_after(sql, "ADD CONSTRAINT ") {
            state.constraints.insert(name.to_string());
        }
        state.statements.push(sql.to_string());
        Ok(())
    }

    async fn foreign_key_exists(&self, _database: &str, _table: &str, constraint: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().constraints.contains(constraint))
    }

    async fn begin_load(
        &self,
        _database: &str,
        table: &TableDef,
        mode: TargetMode,
    ) -> Result<Box<dyn TableLoad>> {
        let pk_indices = table
            .primary_key
            .iter()
            .filter_map(|pk| table.columns.iter().position(|c| &c.name == pk))
            .collect();
        let fail_after = self
            .state
            .lock()
            .unwrap()
            .insert_failures
            .get(&table.name)
            .copied();
        Ok(Box::new(FakeLoad {
            state: self.state.clone(),
            table: table.name.clone(),
            truncate: mode == TargetMode::Truncate,
            pk_indices,
            pending: Vec::new(),
            inserts: 0,
            fail_after,
        }))
    }

    async fn get_row_count(&self, _database: &str, table: &str) -> Result<i64> {
        Ok(self.rows(table).len() as i64)
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake-mysql"
    }

    async fn close(&self) {}
}

struct FakeLoad {
    state: Arc<Mutex<TargetState>>,
    table: String,
    truncate: bool,
    pk_indices: Vec<usize>,
    pending: Vec<Row>,
    inserts: usize,
    fail_after: Option<usize>,
}

impl FakeLoad {
    fn key(&self, row: &[SqlValue]) -> Vec<SqlValue> {
        self.pk_indices.iter().map(|&i| row[i].clone()).collect()
    }
}

#[async_trait]
impl TableLoad for FakeLoad {
    async fn write_batch(&mut self, batch: Batch) -> Result<u64> {
        if self.fail_after == Some(self.inserts) {
            return Err(MigrateError::insert(&self.table, "Data too long for column"));
        }
        if !self.pk_indices.is_empty() {
            let existing: Vec<Row> = if self.truncate {
                Vec::new()
            } else {
                self.state
                    .lock()
                    .unwrap()
                    .tables
                    .get(&self.table)
                    .map(|t| t.rows.clone())
                    .unwrap_or_default()
            };
            for row in &batch.rows {
                let key = self.key(row);
                if existing
                    .iter()
                    .chain(self.pending.iter())
                    .any(|r| self.key(r) == key)
                {
                    return Err(MigrateError::insert(
                        &self.table,
                        format!("Duplicate entry {:?} for key 'PRIMARY'", key),
                    ));
                }
            }
        }
        let n = batch.rows.len() as u64;
        self.pending.extend(batch.rows);
        self.inserts += 1;
        Ok(n)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.lock().unwrap();
        let entry = state.tables.entry(this.table).or_default();
        if this.truncate {
            entry.rows.clear();
        }
        entry.rows.extend(this.pending);
        entry.inserts += this.inserts;
        entry.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
