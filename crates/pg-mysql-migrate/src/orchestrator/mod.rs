//! Phase sequencing: schema, data, indexes, foreign keys, validation.
//!
//! Data-phase errors are table-local: the run prefers completing as many
//! tables as possible and reporting the remainder. Schema-read failures and
//! rejected CREATE TABLE statements abort the run. Cancellation drains the
//! worker pool (each worker releases its write session) and surfaces as
//! [`MigrateError::Cancelled`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::TableSchema;
use crate::error::{MigrateError, Result};
use crate::source::PgSourcePool;
use crate::state::CheckpointStore;
use crate::target::{ddl, DdlOptions, MysqlTargetPool};
use crate::transfer::{order_smallest_first, TableMigrator, TableOutcome};
use crate::verify::fk::{FkCheck, FkValidator};
use crate::verify::missing::{MissingReport, MissingRowFinder};
use crate::verify::{PostValidator, TableValidation};

/// Missing-row report size per table.
const MISSING_ROW_LIMIT: usize = 100;

/// Which phases to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Schema, data, indexes, foreign keys, validation.
    #[default]
    Full,
    /// Schema objects only; no data.
    SchemaOnly,
    /// Data only; tables missing on the target are created first.
    DataOnly,
}

/// Per-run switches, mostly mapped from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: Mode,
    pub resume: bool,
    pub dry_run: bool,
    pub skip_indexes: bool,
}

/// A foreign key left disabled, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedFk {
    pub table: String,
    pub constraint: String,
    pub orphan_count: i64,
}

/// Final report of a run.
#[derive(Debug, Default)]
pub struct MigrationResult {
    pub tables: Vec<TableOutcome>,
    /// Tables whose data phase failed, with the error rendering.
    pub failed_tables: Vec<(String, String)>,
    pub skipped_fks: Vec<SkippedFk>,
    pub validations: Vec<TableValidation>,
    pub rows_transferred: u64,
    pub duration: Duration,
}

impl MigrationResult {
    /// True when every table transferred and validated.
    pub fn success(&self) -> bool {
        self.failed_tables.is_empty() && self.validations.iter().all(|v| v.passed())
    }
}

/// Sequences the migration phases over the two pools.
pub struct Orchestrator {
    config: Config,
    source: Arc<PgSourcePool>,
    target: Arc<MysqlTargetPool>,
    checkpoints: CheckpointStore,
}

impl Orchestrator {
    /// Connect both pools and open the checkpoint store.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let max_conns = config.migration.parallel_workers + 2;
        let source = Arc::new(PgSourcePool::connect(&config.source, max_conns).await?);
        let target = Arc::new(MysqlTargetPool::connect(&config.target, max_conns).await?);
        let checkpoints = CheckpointStore::open(&config.paths.checkpoint_dir)?;

        Ok(Self {
            config,
            source,
            target,
            checkpoints,
        })
    }

    /// Run the migration in the requested mode.
    pub async fn run(&self, options: &RunOptions, cancel: CancellationToken) -> Result<MigrationResult> {
        let started = Instant::now();
        let mut result = MigrationResult::default();

        let schemas = self.extract_schemas().await?;
        if schemas.is_empty() {
            warn!("No tables selected; nothing to do");
            result.duration = started.elapsed();
            return Ok(result);
        }

        if options.dry_run {
            self.report_plan(&schemas, options)?;
            result.duration = started.elapsed();
            return Ok(result);
        }

        match options.mode {
            Mode::Full => {
                self.create_tables(&schemas).await?;
                self.run_data_phase(&schemas, options, cancel, &mut result)
                    .await?;
                if !options.skip_indexes && !self.config.migration.skip_indexes {
                    self.create_indexes(&schemas).await;
                }
                self.create_foreign_keys(&schemas, &mut result).await?;
                self.validate(&schemas, &mut result).await?;
            }
            Mode::SchemaOnly => {
                self.create_tables(&schemas).await?;
                if !options.skip_indexes && !self.config.migration.skip_indexes {
                    self.create_indexes(&schemas).await;
                }
                self.create_foreign_keys(&schemas, &mut result).await?;
            }
            Mode::DataOnly => {
                self.create_missing_tables(&schemas).await?;
                self.run_data_phase(&schemas, options, cancel, &mut result)
                    .await?;
            }
        }

        result.duration = started.elapsed();
        info!(
            "Migration finished in {:.1}s: {} tables, {} rows, {} failures, {} FKs skipped",
            result.duration.as_secs_f64(),
            result.tables.len(),
            result.rows_transferred,
            result.failed_tables.len(),
            result.skipped_fks.len()
        );
        Ok(result)
    }

    /// Run only the missing-rows report.
    pub async fn find_missing(&self) -> Result<Vec<MissingReport>> {
        let schemas = self.extract_schemas().await?;
        let finder = MissingRowFinder {
            source: self.source.clone(),
            target: self.target.clone(),
        };

        let mut reports = Vec::new();
        for schema in &schemas {
            if !self.target.table_exists(&schema.table.name).await? {
                warn!("{}: not present on target, skipping", schema.table);
                continue;
            }
            let report = finder.find_missing(schema, MISSING_ROW_LIMIT).await?;
            if report.source_count != report.target_count {
                info!(
                    "{}: {} missing rows located{} (source {}, target {})",
                    report.table,
                    report.missing.len(),
                    if report.truncated { " (truncated)" } else { "" },
                    report.source_count,
                    report.target_count
                );
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Close both pools.
    pub async fn shutdown(&self) {
        self.source.close();
        self.target.close().await;
    }

    /// List, read, and order the selected table schemas (smallest first).
    async fn extract_schemas(&self) -> Result<Vec<TableSchema>> {
        let tables = self
            .source
            .list_tables(self.config.source.schema.as_deref(), &self.config.migration)
            .await?;

        let mut schemas = Vec::with_capacity(tables.len());
        for table in &tables {
            schemas.push(self.source.read_schema(table).await?);
        }
        order_smallest_first(&mut schemas);
        Ok(schemas)
    }

    fn ddl_options(&self) -> DdlOptions {
        DdlOptions {
            charset: self.config.target.charset.clone(),
            collation: self.config.target.collation.clone(),
        }
    }

    async fn create_tables(&self, schemas: &[TableSchema]) -> Result<()> {
        let opts = self.ddl_options();
        for schema in schemas {
            let sql = ddl::create_table(schema, &opts)?;
            self.target.execute_ddl(&schema.table.name, &sql).await?;
            info!("Created table `{}`", schema.table.name);
        }
        Ok(())
    }

    /// Data-only mode: create only the tables the target is missing.
    async fn create_missing_tables(&self, schemas: &[TableSchema]) -> Result<()> {
        let opts = self.ddl_options();
        for schema in schemas {
            if self.target.table_exists(&schema.table.name).await? {
                continue;
            }
            let sql = ddl::create_table(schema, &opts)?;
            self.target.execute_ddl(&schema.table.name, &sql).await?;
            info!("Created missing table `{}`", schema.table.name);
        }
        Ok(())
    }

    /// Stream every table through the worker pool.
    async fn run_data_phase(
        &self,
        schemas: &[TableSchema],
        options: &RunOptions,
        cancel: CancellationToken,
        result: &mut MigrationResult,
    ) -> Result<()> {
        let workers = self.config.migration.parallel_workers;
        info!(
            "Data phase: {} tables, {} workers",
            schemas.len(),
            workers
        );

        if options.resume {
            let pending = self.checkpoints.pending_tables()?;
            if pending.is_empty() {
                info!("--resume: no checkpoints found; all tables start fresh");
            } else {
                info!("--resume: checkpoints present for {}", pending.join(", "));
            }
        }

        let semaphore = Arc::new(Semaphore::new(workers));
        let migrator = TableMigrator {
            source: self.source.clone(),
            target: self.target.clone(),
            checkpoints: self.checkpoints.clone(),
            migration: self.config.migration.clone(),
            cancel: cancel.clone(),
        };

        let mut handles = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let semaphore = semaphore.clone();
            let migrator = migrator.clone();
            let schema = schema.clone();
            let resume = options.resume;
            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquisition only fails
                // if the pool itself is torn down.
                let _permit = semaphore.acquire_owned().await.ok();
                let table = schema.table.full_name();
                let outcome = migrator.migrate_table(&schema, resume).await;
                (table, outcome)
            }));
        }

        // Every handle is awaited even after a cancellation so each worker
        // releases its write session before the run reports.
        let mut cancelled = false;
        for handle in handles {
            match handle.await {
                Ok((_, Ok(outcome))) => {
                    result.rows_transferred += outcome.rows_written;
                    result.tables.push(outcome);
                }
                Ok((table, Err(MigrateError::Cancelled))) => {
                    cancelled = true;
                    warn!("{}: cancelled; checkpoint kept for --resume", table);
                }
                Ok((table, Err(e))) => {
                    error!("{}: {}", table, e);
                    result.failed_tables.push((table, e.to_string()));
                }
                Err(join_error) => {
                    error!("worker panicked: {}", join_error);
                    result
                        .failed_tables
                        .push(("<worker>".to_string(), join_error.to_string()));
                }
            }
        }

        if cancelled {
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }

    /// Create non-PK indexes; failures are logged and do not stop the run.
    async fn create_indexes(&self, schemas: &[TableSchema]) {
        for schema in schemas {
            for index in &schema.indexes {
                let sql = match ddl::create_index(&schema.table.name, index) {
                    Ok(sql) => sql,
                    Err(e) => {
                        warn!("{}: cannot emit index {}: {}", schema.table, index.name, e);
                        continue;
                    }
                };
                match self.target.execute_ddl(&schema.table.name, &sql).await {
                    Ok(()) => info!("Created index {} on `{}`", index.name, schema.table.name),
                    Err(e) => warn!(
                        "{}: index {} failed, continuing: {}",
                        schema.table, index.name, e
                    ),
                }
            }
        }
    }

    /// Validate and enable foreign keys; orphaned ones are skipped and
    /// enumerated in the final report.
    async fn create_foreign_keys(
        &self,
        schemas: &[TableSchema],
        result: &mut MigrationResult,
    ) -> Result<()> {
        let validator = FkValidator {
            target: self.target.clone(),
        };

        for schema in schemas {
            for fk in &schema.foreign_keys {
                match validator.check(&schema.table.name, fk).await? {
                    FkCheck::Clean => {
                        let sql = ddl::add_foreign_key(&schema.table.name, fk)?;
                        match self.target.execute_ddl(&schema.table.name, &sql).await {
                            Ok(()) => {
                                info!("Enabled {} on `{}`", fk.name, schema.table.name)
                            }
                            Err(e) => {
                                warn!("{}: {} failed, continuing: {}", schema.table, fk.name, e);
                                result.skipped_fks.push(SkippedFk {
                                    table: schema.table.name.clone(),
                                    constraint: fk.name.clone(),
                                    orphan_count: 0,
                                });
                            }
                        }
                    }
                    FkCheck::MissingReferencedTable => {
                        result.skipped_fks.push(SkippedFk {
                            table: schema.table.name.clone(),
                            constraint: fk.name.clone(),
                            orphan_count: 0,
                        });
                    }
                    FkCheck::Orphaned { count, .. } => {
                        result.skipped_fks.push(SkippedFk {
                            table: schema.table.name.clone(),
                            constraint: fk.name.clone(),
                            orphan_count: count,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Post-load validation; disagreements log ERROR but never abort.
    async fn validate(
        &self,
        schemas: &[TableSchema],
        result: &mut MigrationResult,
    ) -> Result<()> {
        let validator = PostValidator {
            source: self.source.clone(),
            target: self.target.clone(),
        };
        for schema in schemas {
            let validation = validator
                .validate_table(schema, self.config.migration.date_filter.as_ref())
                .await?;
            result.validations.push(validation);
        }
        Ok(())
    }

    /// Dry run: describe what would happen without touching the target.
    fn report_plan(&self, schemas: &[TableSchema], options: &RunOptions) -> Result<()> {
        info!("Dry run: {:?} mode, {} tables", options.mode, schemas.len());
        let opts = self.ddl_options();
        for schema in schemas {
            let indexes = schema.indexes.len();
            let fks = schema.foreign_keys.len();
            info!(
                "  {} ({} bytes, {} columns, {} indexes, {} FKs)",
                schema.table,
                schema.size_bytes,
                schema.columns.len(),
                indexes,
                fks
            );
            // Emit the DDL now so schema problems surface before a real run.
            let _ = ddl::create_table(schema, &opts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_success() {
        let mut result = MigrationResult::default();
        assert!(result.success());

        result.validations.push(TableValidation {
            table: "public.users".into(),
            source_count: 3,
            target_count: 3,
            counts_match: true,
            samples_match: Some(true),
        });
        assert!(result.success());

        result
            .failed_tables
            .push(("public.orders".into(), "boom".into()));
        assert!(!result.success());
    }

    #[test]
    fn test_result_fails_on_validation_mismatch() {
        let mut result = MigrationResult::default();
        result.validations.push(TableValidation {
            table: "public.users".into(),
            source_count: 3,
            target_count: 2,
            counts_match: false,
            samples_match: None,
        });
        assert!(!result.success());
    }

    #[test]
    fn test_default_mode_is_full() {
        assert_eq!(Mode::default(), Mode::Full);
        let options = RunOptions::default();
        assert!(!options.resume);
        assert!(!options.dry_run);
        assert!(!options.skip_indexes);
    }
}
