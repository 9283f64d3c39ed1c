//! Durable per-table checkpoints for resume capability.
//!
//! One JSON file per in-progress table at
//! `<checkpoint_dir>/<table>_checkpoint.json`. Files are written atomically
//! (write temp, then rename) so a reader never observes a torn record; a
//! present file is an authoritative signal to resume. The file is removed
//! when the table completes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::PkValue;
use crate::error::{MigrateError, Result};

/// Progress record for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Cursor position (PK value) or row offset of the last persisted chunk.
    pub last_cursor: PkValue,

    /// Total rows counted for the table at stream start.
    pub total_rows: i64,

    /// Chunk size in effect when the checkpoint was written.
    pub chunk_size: usize,

    /// When the checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(last_cursor: PkValue, total_rows: i64, chunk_size: usize) -> Self {
        Self {
            last_cursor,
            total_rows,
            chunk_size,
            updated_at: Utc::now(),
        }
    }
}

/// Filesystem-backed checkpoint store.
///
/// Each table writes to its own file, so cross-table writes never contend;
/// per-table writes are serialized by the owning worker.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of a table's checkpoint file.
    pub fn path_for(&self, table: &str) -> PathBuf {
        self.dir
            .join(format!("{}_checkpoint.json", sanitize_file_stem(table)))
    }

    /// Persist a checkpoint atomically.
    pub fn save(&self, table: &str, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(table);
        let content = serde_json::to_string_pretty(checkpoint)?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &path)?;

        debug!(
            "Checkpoint for {} at cursor {} ({} rows total)",
            table, checkpoint.last_cursor, checkpoint.total_rows
        );
        Ok(())
    }

    /// Load a table's checkpoint, or `None` when no file exists.
    pub fn load(&self, table: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(table);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            MigrateError::Checkpoint(format!(
                "corrupt checkpoint file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(checkpoint))
    }

    /// Remove a table's checkpoint after successful completion.
    pub fn remove(&self, table: &str) -> Result<()> {
        let path = self.path_for(table);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List table names that currently have checkpoints.
    pub fn pending_tables(&self) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix("_checkpoint.json") {
                tables.push(stem.to_string());
            } else if name.ends_with(".json.tmp") {
                warn!("Leftover temp checkpoint file: {}", name);
            }
        }
        tables.sort();
        Ok(tables)
    }
}

/// Replace path-hostile characters so `schema.table` maps to a flat file name.
fn sanitize_file_stem(table: &str) -> String {
    table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
