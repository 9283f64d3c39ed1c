//! Per-table data migration: the hot loop.
//!
//! For each table: count (with filter), size the chunk from the memory
//! budget, then fetch-convert-write chunk by chunk, persisting a checkpoint
//! every `checkpoint_interval` chunks. The checkpoint is removed only on
//! completion; cancellation keeps the last persisted one so `--resume`
//! re-executes at most one interval.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MigrationConfig;
use crate::core::TableSchema;
use crate::error::{MigrateError, Result};
use crate::source::{ChunkStreamer, PgSourcePool, Pagination, SelectPlan};
use crate::state::{Checkpoint, CheckpointStore};
use crate::target::{MysqlTargetPool, WriteSession};

/// Conservative per-row estimate for fetch buffers.
const FETCH_BYTES_PER_ROW: u64 = 4096;

/// Conservative per-row estimate for insert batches.
const INSERT_BYTES_PER_ROW: u64 = 2048;

/// Fraction of the budget given to fetch buffers (20%).
const FETCH_BUDGET_NUMERATOR: u64 = 2;

/// Fraction of the budget given to insert batches (30%).
const INSERT_BUDGET_NUMERATOR: u64 = 3;

/// Budget at or under which chunks are additionally capped at 2000 rows.
const SMALL_BUDGET_BYTES: u64 = 150 * 1024 * 1024;

/// Chunk rows for a table under the memory budget `m`.
///
/// `floor(m * 0.2 / 4096)`, floored at 100 and capped at the configured
/// chunk size (the large-table cap replaces the configured one before
/// clamping). Budgets of 150 MiB or less additionally cap at 2000.
pub fn compute_chunk_size(
    budget_bytes: u64,
    configured: usize,
    is_large_table: bool,
    large_table_chunk_size: usize,
) -> usize {
    let cap = if is_large_table {
        large_table_chunk_size
    } else {
        configured
    }
    .max(1);

    let from_memory =
        (budget_bytes * FETCH_BUDGET_NUMERATOR / 10 / FETCH_BYTES_PER_ROW) as usize;
    let mut size = from_memory.max(100).min(cap);
    if budget_bytes <= SMALL_BUDGET_BYTES {
        size = size.min(2000);
    }
    size
}

/// Insert batch rows under the memory budget `m`:
/// `clamp(floor(m * 0.3 / 2048), 100, 1000)`.
pub fn compute_batch_size(budget_bytes: u64) -> usize {
    let from_memory =
        (budget_bytes * INSERT_BUDGET_NUMERATOR / 10 / INSERT_BYTES_PER_ROW) as usize;
    from_memory.clamp(100, 1000)
}

/// Sort table schemas smallest first.
///
/// Small tables finish fast and surface schema problems early, keeping the
/// operator's feedback loop tight.
pub fn order_smallest_first(schemas: &mut [TableSchema]) {
    schemas.sort_by_key(|s| s.size_bytes);
}

/// Result of migrating one table's data.
#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub table: String,
    pub total_rows: i64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub chunks: u64,
    pub resumed: bool,
}

/// Drives chunked streaming for single tables.
///
/// Cloneable so each worker in the pool carries its own handle; the
/// underlying pools hand every worker its own connections.
#[derive(Clone)]
pub struct TableMigrator {
    pub source: Arc<PgSourcePool>,
    pub target: Arc<MysqlTargetPool>,
    pub checkpoints: CheckpointStore,
    pub migration: MigrationConfig,
    pub cancel: CancellationToken,
}

impl TableMigrator {
    /// Migrate one table's rows, honoring resume and cancellation.
    pub async fn migrate_table(&self, schema: &TableSchema, resume: bool) -> Result<TableOutcome> {
        let table_key = schema.table.full_name();
        let filter = self.migration.date_filter.as_ref();
        if let Some(filter) = filter {
            if schema.column(&filter.column).is_none() {
                return Err(MigrateError::Config(format!(
                    "date filter column '{}' does not exist in {}",
                    filter.column, table_key
                )));
            }
        }

        // Counting
        let total_rows = self.source.count_rows(&schema.table, filter).await?;

        let budget = self.migration.memory_budget_bytes();
        let is_large = schema.size_bytes > self.migration.large_table_threshold_bytes();
        let chunk_size = compute_chunk_size(
            budget,
            self.migration.chunk_size,
            is_large,
            self.migration.large_table_chunk_size,
        );
        let batch_size = compute_batch_size(budget);

        info!(
            "{}: {} rows to stream (chunk={}, batch={}{}{})",
            table_key,
            total_rows,
            chunk_size,
            batch_size,
            if is_large { ", large table" } else { "" },
            if filter.is_some() { ", filtered" } else { "" },
        );

        let plan = SelectPlan {
            table: schema.table.clone(),
            columns: schema.columns.clone(),
            pagination: Pagination::for_schema(schema)?,
            filter: filter.cloned(),
            chunk_size,
        };
        let mut streamer = ChunkStreamer::new(self.source.pool(), plan);

        let mut resumed = false;
        if resume {
            if let Some(checkpoint) = self.checkpoints.load(&table_key)? {
                info!(
                    "{}: resuming from checkpoint at cursor {} (written {})",
                    table_key, checkpoint.last_cursor, checkpoint.updated_at
                );
                streamer.resume_from(checkpoint.last_cursor);
                resumed = true;
            }
        }

        // Streaming. The write session must be released on every exit path
        // so FOREIGN_KEY_CHECKS is re-enabled even on error or cancel.
        let mut session = self.target.begin_write_session(schema).await?;
        let stream_result = self
            .stream_all(
                &table_key,
                &mut streamer,
                &mut session,
                total_rows,
                chunk_size,
                batch_size,
            )
            .await;
        let finish_result = session.finish().await;

        let (rows_written, rows_skipped, chunks) = stream_result?;
        finish_result?;

        // Completed: the checkpoint's job is done.
        self.checkpoints.remove(&table_key)?;

        info!(
            "{}: completed ({} written, {} skipped, {} chunks)",
            table_key, rows_written, rows_skipped, chunks
        );
        Ok(TableOutcome {
            table: table_key,
            total_rows,
            rows_written,
            rows_skipped,
            chunks,
            resumed,
        })
    }

    async fn stream_all(
        &self,
        table_key: &str,
        streamer: &mut ChunkStreamer,
        session: &mut WriteSession,
        total_rows: i64,
        chunk_size: usize,
        batch_size: usize,
    ) -> Result<(u64, u64, u64)> {
        let mut rows_written = 0u64;
        let mut rows_skipped = 0u64;
        let mut chunks = 0u64;

        loop {
            // Cancellation is observed between chunks: the in-flight batch
            // is never abandoned halfway, and the last persisted checkpoint
            // survives for --resume.
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let chunk = streamer.next_chunk().await?;
            if chunk.is_empty() {
                break;
            }

            let stats = session.write_chunk(&chunk.rows, batch_size).await?;
            rows_written += stats.written;
            rows_skipped += stats.skipped;
            chunks += 1;

            if chunks % self.migration.checkpoint_interval as u64 == 0 {
                if let Some(position) = streamer.position() {
                    self.checkpoints.save(
                        table_key,
                        &Checkpoint::new(position, total_rows, chunk_size),
                    )?;
                }
                info!(
                    "{}: progress {}/{} rows",
                    table_key,
                    rows_written + rows_skipped,
                    total_rows
                );
            } else {
                debug!(
                    "{}: chunk {} written ({} rows)",
                    table_key,
                    chunks,
                    chunk.len()
                );
            }
        }

        Ok((rows_written, rows_skipped, chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TableRef;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_chunk_size_from_budget() {
        // 512 MiB: 0.2 * 512 MiB / 4096 = 26214 rows, capped by configured.
        assert_eq!(compute_chunk_size(512 * MIB, 10_000, false, 50_000), 10_000);
        // Same budget with a higher configured cap keeps the memory figure.
        assert_eq!(compute_chunk_size(512 * MIB, 30_000, false, 50_000), 26_214);
    }

    #[test]
    fn test_chunk_size_floor() {
        // Tiny budget: floor of 100 applies, then the small-budget cap is
        // irrelevant (100 < 2000).
        assert_eq!(compute_chunk_size(MIB, 10_000, false, 50_000), 100);
    }

    #[test]
    fn test_small_budget_cap() {
        // 150 MiB: 0.2 * 150 MiB / 4096 = 7680, but the small-budget cap
        // pins it to 2000.
        assert_eq!(compute_chunk_size(150 * MIB, 10_000, false, 50_000), 2000);
        // Just above the threshold the cap no longer applies.
        assert_eq!(
            compute_chunk_size(151 * MIB, 10_000, false, 50_000),
            7731
        );
    }

    #[test]
    fn test_large_table_cap_replaces_configured() {
        // 4 GiB budget: memory allows 209715 rows; a large table caps at
        // large_table_chunk_size instead of chunk_size.
        assert_eq!(
            compute_chunk_size(4096 * MIB, 10_000, true, 50_000),
            50_000
        );
        assert_eq!(
            compute_chunk_size(4096 * MIB, 10_000, false, 50_000),
            10_000
        );
    }

    #[test]
    fn test_batch_size_bounds() {
        // 0.3 * 64 MiB / 2048 = 9830 -> capped at 1000.
        assert_eq!(compute_batch_size(64 * MIB), 1000);
        // 0.3 * 1 MiB / 2048 = 153.
        assert_eq!(compute_batch_size(MIB), 153);
        // Tiny budgets floor at 100.
        assert_eq!(compute_batch_size(64 * 1024), 100);
    }

    #[test]
    fn test_order_smallest_first() {
        let make = |name: &str, size: i64| TableSchema {
            table: TableRef::new("public", name),
            columns: vec![],
            primary_key: vec![],
            indexes: vec![],
            foreign_keys: vec![],
            size_bytes: size,
        };
        let mut schemas = vec![make("big", 1_000_000), make("small", 10), make("mid", 500)];
        order_smallest_first(&mut schemas);
        let names: Vec<_> = schemas.iter().map(|s| s.table.name.as_str()).collect();
        assert_eq!(names, vec!["small", "mid", "big"]);
    }
}
