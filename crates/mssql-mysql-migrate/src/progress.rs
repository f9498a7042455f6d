//! Per-table progress notifications.
//!
//! The orchestrator reports each table's lifecycle to a [`ProgressSink`].
//! Sinks only observe: nothing they do changes the control flow of a run.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

/// One step in a table's migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The table's DDL is about to run.
    Creating { table: String },
    /// Rows are about to be copied.
    Migrating { table: String },
    /// The table was created and populated.
    TableCompleted { table: String, rows: u64 },
    /// The table failed; `stage` is "ddl" or "copy".
    TableFailed {
        table: String,
        stage: String,
        error: String,
    },
}

impl ProgressEvent {
    /// Table the event refers to.
    pub fn table(&self) -> &str {
        match self {
            ProgressEvent::Creating { table }
            | ProgressEvent::Migrating { table }
            | ProgressEvent::TableCompleted { table, .. }
            | ProgressEvent::TableFailed { table, .. } => table,
        }
    }
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Creating { table } => info!("Creating {}...", table),
            ProgressEvent::Migrating { table } => info!("Migrating {}...", table),
            ProgressEvent::TableCompleted { table, rows } => {
                info!("{}: {} rows migrated", table, rows)
            }
            ProgressEvent::TableFailed {
                table,
                stage,
                error: message,
            } => error!("{}: failed during {}: {}", table, stage, message),
        }
    }
}

/// Writes events as JSON lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProgress;

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a ProgressEvent,
}

impl JsonProgress {
    fn render(event: &ProgressEvent) -> Option<String> {
        serde_json::to_string(&JsonLine {
            timestamp: Utc::now(),
            event,
        })
        .ok()
    }
}

impl ProgressSink for JsonProgress {
    fn emit(&self, event: &ProgressEvent) {
        if let Some(line) = Self::render(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records events for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for RecordingProgress {
        fn emit(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_json_line_shape() {
        let line = JsonProgress::render(&ProgressEvent::TableCompleted {
            table: "orders".into(),
            rows: 42,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "table_completed");
        assert_eq!(value["table"], "orders");
        assert_eq!(value["rows"], 42);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_event_table() {
        let event = ProgressEvent::TableFailed {
            table: "customers".into(),
            stage: "ddl".into(),
            error: "boom".into(),
        };
        assert_eq!(event.table(), "customers");
    }
}
