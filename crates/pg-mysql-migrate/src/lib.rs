//! # pg-mysql-migrate
//!
//! High-performance PostgreSQL to MariaDB/MySQL migration library.
//!
//! The engine moves multi-gigabyte tables inside a bounded maintenance
//! window, with:
//!
//! - **Chunked streaming** via cursor pagination with bounded memory
//! - **Resume capability** via atomic per-table JSON checkpoints
//! - **Type mapping** with a documented, lossy-but-total PG → MySQL table
//! - **Defensive value conversion** (corrupt timestamps become a greppable
//!   epoch sentinel instead of aborting the run)
//! - **Deferred constraints**: indexes and foreign keys are created after
//!   bulk load, with orphan pre-checks before each foreign key
//! - **Post-load validation** of row counts and sampled content
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_mysql_migrate::{Config, Orchestrator, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pg_mysql_migrate::MigrateError> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator
//!         .run(&RunOptions::default(), CancellationToken::new())
//!         .await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod state;
pub mod target;
pub mod transfer;
pub mod typemap;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, PathsConfig, RowFilter, SourceConfig, TargetConfig};
pub use self::core::{Cursor, PkValue, TableRef, TableSchema};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationResult, Mode, Orchestrator, RunOptions, SkippedFk};
pub use source::{ChunkStreamer, PgSourcePool};
pub use state::{Checkpoint, CheckpointStore};
pub use target::{MysqlTargetPool, WriteStats};
pub use transfer::{TableMigrator, TableOutcome};
pub use verify::{PostValidator, TableValidation};
