//! Configuration type definitions.
//!
//! All performance knobs have serde defaults matching the documented
//! behavior; the memory budget is auto-detected from system RAM when not
//! set explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use sysinfo::System;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (PostgreSQL).
    pub source: SourceConfig,

    /// Target database configuration (MySQL/MariaDB).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Source database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Driver name (always "pgsql").
    #[serde(default = "default_pgsql")]
    pub driver: String,

    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    pub password: String,

    /// Optional source schema filter; absent means all user schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .finish()
    }
}

/// Target database (MySQL/MariaDB) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Driver name (always "mysql").
    #[serde(default = "default_mysql")]
    pub driver: String,

    pub host: String,

    #[serde(default = "default_mysql_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    pub password: String,

    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_collation")]
    pub collation: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .finish()
    }
}

/// Optional date-range filter pushed into the streaming and COUNT queries.
///
/// Semantics: `column >= after AND column < before`; either bound may be
/// absent, but any bound requires the column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl RowFilter {
    pub fn is_empty(&self) -> bool {
        self.after.is_none() && self.before.is_none()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per chunk before memory clamping.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunk cap for tables above the large-table threshold.
    #[serde(default = "default_large_table_chunk_size")]
    pub large_table_chunk_size: usize,

    /// On-disk size in MiB above which a table counts as large.
    #[serde(default = "default_large_table_threshold_mb")]
    pub large_table_threshold_mb: u64,

    /// Worker pool size for the data phase.
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    /// Checkpoint every N chunks.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Skip index creation after data load.
    #[serde(default)]
    pub skip_indexes: bool,

    /// Table whitelist (empty = all tables).
    #[serde(default)]
    pub tables_include: Vec<String>,

    /// Table blacklist; always wins over the whitelist.
    #[serde(default)]
    pub tables_exclude: Vec<String>,

    /// Process-wide memory envelope in MiB; detected from system RAM when
    /// not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_budget_mb: Option<u64>,

    /// Optional date-range row filter (usually supplied via CLI flags).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_filter: Option<RowFilter>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            large_table_chunk_size: default_large_table_chunk_size(),
            large_table_threshold_mb: default_large_table_threshold_mb(),
            parallel_workers: default_parallel_workers(),
            checkpoint_interval: default_checkpoint_interval(),
            skip_indexes: false,
            tables_include: Vec::new(),
            tables_exclude: Vec::new(),
            memory_budget_mb: None,
            date_filter: None,
        }
    }
}

impl MigrationConfig {
    /// Effective memory budget in bytes.
    ///
    /// Falls back to 25% of detected system RAM, floored at 64 MiB, when no
    /// budget is configured.
    pub fn memory_budget_bytes(&self) -> u64 {
        if let Some(mb) = self.memory_budget_mb {
            return mb * 1024 * 1024;
        }
        let mut sys = System::new();
        sys.refresh_memory();
        let detected = sys.total_memory() / 4;
        let budget = detected.max(64 * 1024 * 1024);
        info!(
            "Memory budget not configured; using {} MiB (25% of system RAM)",
            budget / (1024 * 1024)
        );
        budget
    }

    /// Large-table threshold in bytes.
    pub fn large_table_threshold_bytes(&self) -> i64 {
        (self.large_table_threshold_mb as i64).saturating_mul(1024 * 1024)
    }

    /// Merge CLI table selections into the config lists.
    ///
    /// `--tables` intersects with the config whitelist when both are
    /// present; `--skip-tables` unions with the config blacklist. The
    /// blacklist always wins at selection time.
    pub fn merge_cli_tables(&mut self, tables: &[String], skip_tables: &[String]) {
        if !tables.is_empty() {
            if self.tables_include.is_empty() {
                self.tables_include = tables.to_vec();
            } else {
                self.tables_include
                    .retain(|t| tables.iter().any(|c| c == t));
            }
        }
        for skip in skip_tables {
            if !self.tables_exclude.contains(skip) {
                self.tables_exclude.push(skip.clone());
            }
        }
    }

    /// Apply the included-minus-excluded rule to a table.
    ///
    /// Names match either the bare table name or `schema.table`.
    pub fn is_table_selected(&self, schema: &str, name: &str) -> bool {
        let full = format!("{}.{}", schema, name);
        let matches = |entry: &String| entry == name || *entry == full;
        if self.tables_exclude.iter().any(matches) {
            return false;
        }
        self.tables_include.is_empty() || self.tables_include.iter().any(matches)
    }
}

/// Filesystem locations for durable run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            log_dir: default_log_dir(),
        }
    }
}

// Default value functions for serde

fn default_pgsql() -> String {
    "pgsql".to_string()
}

fn default_mysql() -> String {
    "mysql".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_collation() -> String {
    "utf8mb4_unicode_ci".to_string()
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_large_table_chunk_size() -> usize {
    50_000
}

fn default_large_table_threshold_mb() -> u64 {
    1000
}

fn default_parallel_workers() -> usize {
    4
}

fn default_checkpoint_interval() -> usize {
    100
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let m = MigrationConfig::default();
        assert_eq!(m.chunk_size, 10_000);
        assert_eq!(m.large_table_chunk_size, 50_000);
        assert_eq!(m.large_table_threshold_mb, 1000);
        assert_eq!(m.parallel_workers, 4);
        assert_eq!(m.checkpoint_interval, 100);
        assert!(!m.skip_indexes);
    }

    #[test]
    fn test_table_selection_include_exclude() {
        let m = MigrationConfig {
            tables_include: vec!["users".into(), "orders".into()],
            tables_exclude: vec!["orders".into()],
            ..Default::default()
        };
        assert!(m.is_table_selected("public", "users"));
        // Exclude wins over include.
        assert!(!m.is_table_selected("public", "orders"));
        assert!(!m.is_table_selected("public", "events"));
    }

    #[test]
    fn test_table_selection_empty_include_means_all() {
        let m = MigrationConfig {
            tables_exclude: vec!["audit_log".into()],
            ..Default::default()
        };
        assert!(m.is_table_selected("public", "anything"));
        assert!(!m.is_table_selected("public", "audit_log"));
    }

    #[test]
    fn test_table_selection_qualified_names() {
        let m = MigrationConfig {
            tables_include: vec!["sales.orders".into()],
            ..Default::default()
        };
        assert!(m.is_table_selected("sales", "orders"));
        assert!(!m.is_table_selected("public", "orders"));
    }

    #[test]
    fn test_merge_cli_tables_intersection() {
        let mut m = MigrationConfig {
            tables_include: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        m.merge_cli_tables(&["b".into(), "c".into(), "d".into()], &[]);
        assert_eq!(m.tables_include, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_merge_cli_tables_empty_config_include() {
        let mut m = MigrationConfig::default();
        m.merge_cli_tables(&["x".into()], &["y".into()]);
        assert_eq!(m.tables_include, vec!["x".to_string()]);
        assert_eq!(m.tables_exclude, vec!["y".to_string()]);
    }

    #[test]
    fn test_merge_cli_skip_tables_union() {
        let mut m = MigrationConfig {
            tables_exclude: vec!["a".into()],
            ..Default::default()
        };
        m.merge_cli_tables(&[], &["a".into(), "b".into()]);
        assert_eq!(m.tables_exclude, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_explicit_memory_budget() {
        let m = MigrationConfig {
            memory_budget_mb: Some(256),
            ..Default::default()
        };
        assert_eq!(m.memory_budget_bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let source = SourceConfig {
            driver: "pgsql".into(),
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            user: "app".into(),
            password: "sekrit".into(),
            schema: None,
        };
        let rendered = format!("{:?}", source);
        assert!(!rendered.contains("sekrit"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
