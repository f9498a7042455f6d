//! Run reports produced by the orchestrator.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Created and fully populated.
    Succeeded,
    /// Created, but its rows were not committed.
    Partial,
    /// Creation failed.
    Failed,
    /// Schema could not be read; nothing was done on the target.
    Skipped,
    /// The run was cancelled before this table started.
    NotStarted,
}

impl TableStatus {
    /// Whether the table exists on the target after this run.
    pub fn table_exists(self) -> bool {
        matches!(self, TableStatus::Succeeded | TableStatus::Partial)
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Succeeded => "succeeded",
            TableStatus::Partial => "partial",
            TableStatus::Failed => "failed",
            TableStatus::Skipped => "skipped",
            TableStatus::NotStarted => "not started",
        };
        f.write_str(s)
    }
}

/// Per-table result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub name: String,
    pub status: TableStatus,
    /// Committed rows.
    pub rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableReport {
    pub fn succeeded(name: &str, rows: u64) -> Self {
        Self {
            name: name.to_string(),
            status: TableStatus::Succeeded,
            rows,
            error: None,
        }
    }

    pub fn failed(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: TableStatus::Failed,
            rows: 0,
            error: Some(error.into()),
        }
    }

    pub fn skipped(name: &str, error: impl Into<String>) -> Self {
        Self {
            status: TableStatus::Skipped,
            ..Self::failed(name, error)
        }
    }

    pub fn not_started(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TableStatus::NotStarted,
            rows: 0,
            error: None,
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Incomplete,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// Target database.
    pub database: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables considered, including skipped ones.
    pub tables_total: usize,

    /// Tables created and fully populated.
    pub tables_succeeded: usize,

    /// Total rows committed.
    pub rows_migrated: u64,

    /// Deferred foreign keys added after the load.
    pub constraints_applied: usize,

    /// Deferred foreign keys that could not be added.
    pub constraints_failed: Vec<String>,

    /// Per-table outcomes, in plan order after any skipped tables.
    pub tables: Vec<TableReport>,

    /// Type mapping and reference warnings.
    pub warnings: Vec<String>,
}

impl MigrationReport {
    pub(crate) fn new(run_id: String, database: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            database,
            started_at,
            completed_at: started_at,
            duration_seconds: 0.0,
            tables_total: 0,
            tables_succeeded: 0,
            rows_migrated: 0,
            constraints_applied: 0,
            constraints_failed: Vec::new(),
            tables: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn finish(&mut self, completed_at: DateTime<Utc>, cancelled: bool) {
        self.completed_at = completed_at;
        self.duration_seconds =
            (completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.tables_total = self.tables.len();
        self.tables_succeeded = self
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Succeeded)
            .count();
        self.rows_migrated = self.tables.iter().map(|t| t.rows).sum();
        self.status = if cancelled {
            RunStatus::Cancelled
        } else if self.tables_succeeded == self.tables_total && self.constraints_failed.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::Incomplete
        };
    }

    /// Whether every table succeeded and every deferred constraint was added.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Tables that did not fully succeed.
    pub fn unsuccessful_tables(&self) -> Vec<&TableReport> {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Succeeded)
            .collect()
    }

    /// Look up a table's report.
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What a run would execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunReport {
    pub database: String,
    /// Tables in plan order.
    pub order: Vec<String>,
    /// Statements in execution order.
    pub statements: Vec<String>,
    /// Tables that could not be read or rendered.
    pub problems: Vec<TableReport>,
    pub warnings: Vec<String>,
}

impl DryRunReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Source vs target row counts for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCountCheck {
    pub table: String,
    pub source_rows: i64,
    /// `None` when the target table is missing or unreadable.
    pub target_rows: Option<i64>,
    pub matches: bool,
}

impl RowCountCheck {
    pub fn new(table: String, source_rows: i64, target_rows: Option<i64>) -> Self {
        Self {
            matches: target_rows == Some(source_rows),
            table,
            source_rows,
            target_rows,
        }
    }
}

/// Connectivity of one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionHealth {
    pub(crate) fn from_result(result: Result<()>, start: Instant) -> Self {
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => Self {
                connected: true,
                latency_ms,
                error: None,
            },
            Err(e) => Self {
                connected: false,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source: ConnectionHealth,
    pub target: ConnectionHealth,
    pub healthy: bool,
}

impl HealthCheckResult {
    pub(crate) fn new(source: ConnectionHealth, target: ConnectionHealth) -> Self {
        Self {
            healthy: source.connected && target.connected,
            source,
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_counts_and_status() {
        let now = Utc::now();
        let mut report = MigrationReport::new("r".into(), "shop".into(), now);
        report.tables = vec![
            TableReport::succeeded("customers", 10),
            TableReport::succeeded("orders", 5),
        ];
        report.finish(now, false);
        assert!(report.is_success());
        assert_eq!(report.rows_migrated, 15);
        assert_eq!(report.tables_succeeded, 2);

        report.tables.push(TableReport::skipped("audit", "timeout"));
        report.finish(now, false);
        assert_eq!(report.status, RunStatus::Incomplete);
        assert_eq!(report.unsuccessful_tables().len(), 1);

        report.finish(now, true);
        assert_eq!(report.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_report_json() {
        let now = Utc::now();
        let mut report = MigrationReport::new("r".into(), "shop".into(), now);
        report.tables.push(TableReport::failed("orders", "boom"));
        report.finish(now, false);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "incomplete");
        assert_eq!(json["tables"][0]["status"], "failed");
        assert_eq!(json["tables"][0]["error"], "boom");
    }

    #[test]
    fn test_row_count_check() {
        assert!(RowCountCheck::new("t".into(), 3, Some(3)).matches);
        assert!(!RowCountCheck::new("t".into(), 3, Some(2)).matches);
        assert!(!RowCountCheck::new("t".into(), 0, None).matches);
    }
}
