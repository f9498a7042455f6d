//! Row copying for a single table.
//!
//! The source scan runs on its own task and hands batches over a bounded
//! channel; this side writes each batch through one [`TableLoad`], so the
//! table's rows become visible all at once on commit or not at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::TargetMode;
use crate::core::schema::TableDef;
use crate::core::traits::{SourceReader, TableLoad, TargetWriter};
use crate::error::{MigrateError, Result};

/// Statistics from copying one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyStats {
    /// Rows written and committed.
    pub rows: u64,
    /// Non-empty batches written.
    pub batches: usize,
    /// Wall time of the copy.
    pub elapsed: Duration,
}

/// Copies rows from the source to the target, one table at a time.
#[derive(Clone)]
pub struct DataCopier {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    database: String,
    batch_size: usize,
}

impl DataCopier {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        database: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            target,
            database: database.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Copy every row of `table` into the target table of the same name.
    ///
    /// Returns the number of committed rows. An empty source table yields
    /// zero rows and issues no insert. On any error the load is rolled back
    /// and the error returned.
    pub async fn copy_table(&self, table: &TableDef, mode: TargetMode) -> Result<CopyStats> {
        let start = Instant::now();
        let mut load = self.target.begin_load(&self.database, table, mode).await?;

        match self.stream_into(table, load.as_mut()).await {
            Ok((rows, batches)) => {
                load.commit().await?;
                let stats = CopyStats {
                    rows,
                    batches,
                    elapsed: start.elapsed(),
                };
                info!(
                    "{}: copied {} rows in {} batches ({:?})",
                    table.name, stats.rows, stats.batches, stats.elapsed
                );
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback_err) = load.rollback().await {
                    warn!("{}: rollback failed: {}", table.name, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn stream_into(&self, table: &TableDef, load: &mut dyn TableLoad) -> Result<(u64, usize)> {
        let mut rx = self.source.read_table(table, self.batch_size);
        let mut rows = 0u64;
        let mut batches = 0usize;

        while let Some(batch) = rx.recv().await {
            let batch = batch?;
            let is_last = batch.is_last;
            if !batch.is_empty() {
                let written = load.write_batch(batch).await?;
                rows += written;
                batches += 1;
                debug!("{}: wrote batch {} ({} rows total)", table.name, batches, rows);
            }
            if is_last {
                return Ok((rows, batches));
            }
        }

        Err(MigrateError::insert(
            &table.name,
            "source scan ended before the final batch",
        ))
    }
}
