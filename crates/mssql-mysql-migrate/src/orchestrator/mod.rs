//! Migration orchestrator - main workflow coordinator.
//!
//! A run goes through four phases:
//!
//! 1. create the target database
//! 2. read the source schema and build the [`MigrationPlan`]
//! 3. for each table in plan order: create it, copy its rows, commit
//! 4. add the foreign keys that had to wait for every table to exist
//!
//! Only configuration and connection errors abort a run. Anything that goes
//! wrong with one table is recorded in that table's [`TableReport`] and the
//! run moves on.

mod report;

pub use report::{
    ConnectionHealth, DryRunReport, HealthCheckResult, MigrationReport, RowCountCheck,
    RunStatus, TableReport, TableStatus,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TableFilter, TargetMode};
use crate::copier::DataCopier;
use crate::core::schema::TableDef;
use crate::core::traits::{SourceReader, TargetWriter, TypeMapper};
use crate::ddl::{DdlSynthesizer, DeferredConstraint};
use crate::drivers::{MssqlReader, MysqlWriter};
use crate::error::{MigrateError, Result};
use crate::plan::MigrationPlan;
use crate::progress::{LogProgress, ProgressEvent, ProgressSink};
use crate::typemap::TypeMap;

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    mapper: Arc<dyn TypeMapper>,
    progress: Arc<dyn ProgressSink>,
    filter: TableFilter,
}

/// Source schema as read for one run.
struct SchemaSnapshot {
    tables: Vec<TableDef>,
    skipped: Vec<TableReport>,
}

impl Orchestrator {
    /// Connect to both databases and create an orchestrator.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let source = MssqlReader::new(
            &config.source,
            config.migration.get_max_source_connections() as u32,
        )
        .await
        .map_err(|e| MigrateError::connection("source", e))?;

        let target = MysqlWriter::new(
            &config.target,
            config.migration.get_max_target_connections(),
        )
        .await
        .map_err(|e| MigrateError::connection("target", e))?;

        Self::with_components(config, Arc::new(source), Arc::new(target))
    }

    /// Create an orchestrator over already-connected components.
    pub fn with_components(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Result<Self> {
        let overrides: HashMap<String, String> = config
            .migration
            .type_overrides
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mapper = Arc::new(TypeMap::mssql_to_mysql().with_overrides(&overrides));
        let filter = config.table_filter()?;

        Ok(Self {
            config,
            source,
            target,
            mapper,
            progress: Arc::new(LogProgress),
            filter,
        })
    }

    /// Replace the progress sink.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Replace the type mapper.
    pub fn with_type_mapper(mut self, mapper: Arc<dyn TypeMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn synthesizer(&self) -> DdlSynthesizer {
        DdlSynthesizer::new(self.mapper.clone(), self.config.target_database())
            .with_foreign_keys(self.config.migration.create_foreign_keys)
    }

    /// Run the migration.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let database = self.config.target_database();
        let mut report = MigrationReport::new(run_id, database.clone(), started_at);

        info!(
            "Starting migration run {} ({}.{} -> {}, mode: {}, config: {})",
            report.run_id,
            self.config.source.database,
            self.config.source.schema,
            database,
            self.config.migration.target_mode,
            &self.config.hash()[..12]
        );

        // Phase 1: Target database
        info!("Phase 1: Creating target database {}", database);
        self.target.create_database(&database).await?;

        // Phase 2: Schema and plan
        info!("Phase 2: Reading schema from source");
        let snapshot = self.read_schema().await?;
        for skipped in &snapshot.skipped {
            report.warnings.push(format!(
                "{} skipped: {}",
                skipped.name,
                skipped.error.as_deref().unwrap_or("schema read failed")
            ));
        }
        report.tables.extend(snapshot.skipped);

        let plan = Arc::new(MigrationPlan::build(snapshot.tables));
        for dropped in plan.dropped_references() {
            report.warnings.push(dropped.to_string());
        }
        if !plan.cycle_broken().is_empty() {
            report.warnings.push(format!(
                "Foreign key cycle broken at: {}",
                plan.cycle_broken()
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        info!("Found {} tables to migrate", plan.len());

        // Phase 3: Create and copy
        let workers = self.config.migration.workers.max(1);
        info!("Phase 3: Migrating tables with {} worker(s)", workers);
        let runner = TableRunner {
            target: self.target.clone(),
            copier: DataCopier::new(
                self.source.clone(),
                self.target.clone(),
                database.clone(),
                self.config.migration.batch_size,
            ),
            synth: self.synthesizer(),
            progress: self.progress.clone(),
            mode: self.config.migration.target_mode,
        };

        let groups: Vec<Vec<TableDef>> = if workers == 1 {
            plan.tables().iter().map(|t| vec![t.clone()]).collect()
        } else {
            plan.levels()
                .into_iter()
                .map(|level| level.into_iter().cloned().collect())
                .collect()
        };

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut deferred: Vec<DeferredConstraint> = Vec::new();
        let mut cancelled = false;

        for group in groups {
            if cancel.is_cancelled() {
                if !cancelled {
                    info!("Cancellation requested, stopping new tables");
                    cancelled = true;
                }
                for table in group {
                    report.tables.push(TableReport::not_started(&table.name));
                }
                continue;
            }

            if group.len() == 1 {
                let table = &group[0];
                let (table_report, table_deferred, warnings) =
                    runner.migrate_table(table, &plan).await;
                report.warnings.extend(warnings);
                report.tables.push(table_report);
                deferred.extend(table_deferred);
                continue;
            }

            let mut handles = Vec::with_capacity(group.len());
            let mut pending = group.into_iter();
            while let Some(table) = pending.next() {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| MigrateError::pool(e, "acquiring worker permit"))?;
                if cancel.is_cancelled() {
                    info!("Cancellation requested, stopping new tables");
                    cancelled = true;
                    drop(permit);
                    report.tables.push(TableReport::not_started(&table.name));
                    for rest in pending.by_ref() {
                        report.tables.push(TableReport::not_started(&rest.name));
                    }
                    break;
                }
                let runner = runner.clone();
                let plan = plan.clone();
                let name = table.name.clone();
                let handle = tokio::spawn(async move {
                    let result = runner.migrate_table(&table, &plan).await;
                    drop(permit);
                    result
                });
                handles.push((name, handle));
            }

            for (name, handle) in handles {
                match handle.await {
                    Ok((table_report, table_deferred, warnings)) => {
                        report.warnings.extend(warnings);
                        report.tables.push(table_report);
                        deferred.extend(table_deferred);
                    }
                    Err(e) => {
                        error!("{}: task panicked - {}", name, e);
                        report
                            .tables
                            .push(TableReport::failed(&name, format!("Task panicked: {}", e)));
                    }
                }
            }
        }

        // Phase 4: Deferred constraints
        if !deferred.is_empty() {
            info!("Phase 4: Adding {} deferred foreign key(s)", deferred.len());
            self.apply_deferred(&deferred, &mut report).await;
        }

        report.finish(Utc::now(), cancelled);
        info!(
            "Migration {}: {}/{} tables, {} rows in {:.1}s",
            report.status,
            report.tables_succeeded,
            report.tables_total,
            report.rows_migrated,
            report.duration_seconds
        );
        for table in report.tables.iter().filter(|t| t.status != TableStatus::Succeeded) {
            warn!(
                "{}: {}{}",
                table.name,
                table.status,
                table
                    .error
                    .as_deref()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            );
        }

        Ok(report)
    }

    /// Read and plan the schema and render all DDL without touching the
    /// target.
    pub async fn dry_run(&self) -> Result<DryRunReport> {
        let snapshot = self.read_schema().await?;
        let plan = MigrationPlan::build(snapshot.tables);
        let synth = self.synthesizer();

        let mut report = DryRunReport {
            database: synth.database().to_string(),
            order: plan.tables().iter().map(|t| t.name.clone()).collect(),
            statements: vec![synth.create_database_sql()?],
            problems: snapshot.skipped,
            warnings: plan
                .dropped_references()
                .iter()
                .map(ToString::to_string)
                .collect(),
        };

        let mut deferred = Vec::new();
        for table in plan.tables() {
            match synth.build_create_table(table, &plan) {
                Ok(ddl) => {
                    report.statements.push(ddl.create_sql);
                    report.warnings.extend(ddl.warnings);
                    deferred.extend(ddl.deferred);
                }
                Err(e) => report.problems.push(TableReport::failed(&table.name, e.to_string())),
            }
        }
        for constraint in &deferred {
            match constraint.to_sql() {
                Ok(sql) => report.statements.push(sql),
                Err(e) => report
                    .problems
                    .push(TableReport::failed(&constraint.table, e.to_string())),
            }
        }

        Ok(report)
    }

    /// Compare source and target row counts per table.
    pub async fn validate(&self) -> Result<Vec<RowCountCheck>> {
        let schema = &self.config.source.schema;
        let database = self.config.target_database();
        let mut results = Vec::new();

        for table in self.table_names().await? {
            let source_rows = self.source.get_row_count(schema, &table).await?;
            let target_rows = match self.target.get_row_count(&database, &table).await {
                Ok(count) => Some(count),
                Err(e) => {
                    debug!("{}: target row count unavailable: {}", table, e);
                    None
                }
            };
            let check = RowCountCheck::new(table, source_rows, target_rows);

            if check.matches {
                info!("{}: {} rows (match)", check.table, source_rows);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    check.table,
                    source_rows,
                    target_rows.map(|c| c.to_string()).unwrap_or_else(|| "missing".into())
                );
            }
            results.push(check);
        }

        Ok(results)
    }

    /// Test both connections.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let source = ConnectionHealth::from_result(self.source.test_connection().await, start);
        let start = Instant::now();
        let target = ConnectionHealth::from_result(self.target.test_connection().await, start);
        HealthCheckResult::new(source, target)
    }

    /// Close both connection pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let names = self.source.list_tables(&self.config.source.schema).await?;
        let total = names.len();
        let names: Vec<String> = names
            .into_iter()
            .filter(|name| self.filter.matches(name))
            .collect();
        if names.len() < total {
            info!(
                "Table filters selected {} of {} tables",
                names.len(),
                total
            );
        }
        Ok(names)
    }

    async fn read_schema(&self) -> Result<SchemaSnapshot> {
        let schema = &self.config.source.schema;
        let mut snapshot = SchemaSnapshot {
            tables: Vec::new(),
            skipped: Vec::new(),
        };

        for name in self.table_names().await? {
            match self.source.load_table(schema, &name).await {
                Ok(table) => {
                    debug!(
                        "{}: {} columns, pk {:?}, {} fk column(s)",
                        table.full_name(),
                        table.columns.len(),
                        table.primary_key,
                        table.foreign_keys.len()
                    );
                    snapshot.tables.push(table);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: skipped, {}", name, e);
                    snapshot
                        .skipped
                        .push(TableReport::skipped(&name, e.to_string()));
                }
            }
        }

        Ok(snapshot)
    }

    async fn apply_deferred(&self, deferred: &[DeferredConstraint], report: &mut MigrationReport) {
        let exists: HashMap<&str, bool> = report
            .tables
            .iter()
            .map(|t| (t.name.as_str(), t.status.table_exists()))
            .collect();

        let mut applied = 0usize;
        let mut failed = Vec::new();
        let mut warnings = Vec::new();

        for constraint in deferred {
            let owner_ok = exists.get(constraint.table.as_str()).copied().unwrap_or(false);
            let referenced_ok = exists
                .get(constraint.referenced_table.as_str())
                .copied()
                .unwrap_or(false);
            if !owner_ok || !referenced_ok {
                let message = format!(
                    "Foreign key {} on {} not created: {} was not created",
                    constraint.name,
                    constraint.table,
                    if owner_ok { &constraint.referenced_table } else { &constraint.table }
                );
                warn!("{}", message);
                warnings.push(message);
                continue;
            }

            match self
                .target
                .foreign_key_exists(&constraint.database, &constraint.table, &constraint.name)
                .await
            {
                Ok(true) => {
                    debug!("Foreign key {} already exists", constraint.name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => debug!("Could not check foreign key {}: {}", constraint.name, e),
            }

            let result = match constraint.to_sql() {
                Ok(sql) => {
                    debug!("{}", sql);
                    self.target.execute_ddl(&sql).await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => applied += 1,
                Err(e) => {
                    let message = format!(
                        "Failed to create foreign key {} on {}: {}",
                        constraint.name, constraint.table, e
                    );
                    warn!("{}", message);
                    failed.push(message);
                }
            }
        }

        report.constraints_applied = applied;
        report.constraints_failed = failed;
        report.warnings.extend(warnings);
    }
}

/// Everything one table's migration needs, cheap to clone into a task.
#[derive(Clone)]
struct TableRunner {
    target: Arc<dyn TargetWriter>,
    copier: DataCopier,
    synth: DdlSynthesizer,
    progress: Arc<dyn ProgressSink>,
    mode: TargetMode,
}

impl TableRunner {
    /// Create, copy and commit one table.
    async fn migrate_table(
        &self,
        table: &TableDef,
        plan: &MigrationPlan,
    ) -> (TableReport, Vec<DeferredConstraint>, Vec<String>) {
        let name = table.name.clone();

        self.progress.emit(&ProgressEvent::Creating {
            table: name.clone(),
        });
        let ddl = match self.synth.build_create_table(table, plan) {
            Ok(ddl) => ddl,
            Err(e) => return (self.fail(&name, "ddl", e), Vec::new(), Vec::new()),
        };
        debug!("{}", ddl.create_sql);
        if let Err(e) = self.target.execute_ddl(&ddl.create_sql).await {
            let e = match e {
                MigrateError::Ddl { .. } => e,
                other => MigrateError::ddl(&name, other),
            };
            return (self.fail(&name, "ddl", e), Vec::new(), ddl.warnings);
        }

        self.progress.emit(&ProgressEvent::Migrating {
            table: name.clone(),
        });
        match self.copier.copy_table(table, self.mode).await {
            Ok(stats) => {
                self.progress.emit(&ProgressEvent::TableCompleted {
                    table: name.clone(),
                    rows: stats.rows,
                });
                (
                    TableReport::succeeded(&name, stats.rows),
                    ddl.deferred,
                    ddl.warnings,
                )
            }
            Err(e) => {
                let mut report = self.fail(&name, "copy", e);
                report.status = TableStatus::Partial;
                (report, ddl.deferred, ddl.warnings)
            }
        }
    }

    fn fail(&self, table: &str, stage: &str, e: MigrateError) -> TableReport {
        error!("{}: failed during {} - {}", table, stage, e);
        self.progress.emit(&ProgressEvent::TableFailed {
            table: table.to_string(),
            stage: stage.to_string(),
            error: e.to_string(),
        });
        TableReport::failed(table, e.to_string())
    }
}
