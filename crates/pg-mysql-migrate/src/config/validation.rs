//! Configuration validation, applied before any database work.

use chrono::{NaiveDate, NaiveDateTime};

use super::types::{Config, RowFilter};
use crate::error::{MigrateError, Result};

/// Validate the whole configuration record.
pub fn validate(config: &Config) -> Result<()> {
    require_non_empty("source.host", &config.source.host)?;
    require_non_empty("source.database", &config.source.database)?;
    require_non_empty("source.user", &config.source.user)?;
    require_non_empty("target.host", &config.target.host)?;
    require_non_empty("target.database", &config.target.database)?;
    require_non_empty("target.user", &config.target.user)?;

    let source_driver = config.source.driver.to_lowercase();
    if !matches!(source_driver.as_str(), "pgsql" | "postgres" | "postgresql") {
        return Err(MigrateError::Config(format!(
            "source.driver must be 'pgsql' (got '{}')",
            config.source.driver
        )));
    }

    let target_driver = config.target.driver.to_lowercase();
    if !matches!(target_driver.as_str(), "mysql" | "mariadb") {
        return Err(MigrateError::Config(format!(
            "target.driver must be 'mysql' (got '{}')",
            config.target.driver
        )));
    }

    if config.source.port == 0 || config.target.port == 0 {
        return Err(MigrateError::Config("port must be nonzero".into()));
    }

    let m = &config.migration;
    if m.chunk_size == 0 {
        return Err(MigrateError::Config("migration.chunk_size must be > 0".into()));
    }
    if m.parallel_workers == 0 {
        return Err(MigrateError::Config(
            "migration.parallel_workers must be > 0".into(),
        ));
    }
    if m.checkpoint_interval == 0 {
        return Err(MigrateError::Config(
            "migration.checkpoint_interval must be > 0".into(),
        ));
    }

    if let Some(filter) = &m.date_filter {
        validate_filter(filter)?;
    }

    Ok(())
}

/// Validate a date-range filter: any bound requires the column, bounds must
/// parse as `YYYY-MM-DD[ HH:MM:SS]`, and the range must be non-empty.
pub fn validate_filter(filter: &RowFilter) -> Result<()> {
    if filter.column.trim().is_empty() {
        return Err(MigrateError::Config(
            "date filter requires a column name (--date-column)".into(),
        ));
    }
    if filter.is_empty() {
        return Err(MigrateError::Config(
            "date filter has a column but no bounds".into(),
        ));
    }
    for (name, bound) in [("after", &filter.after), ("before", &filter.before)] {
        if let Some(value) = bound {
            parse_bound(value).ok_or_else(|| {
                MigrateError::Config(format!(
                    "invalid --{}-date '{}': expected YYYY-MM-DD[ HH:MM:SS]",
                    name, value
                ))
            })?;
        }
    }
    if let (Some(after), Some(before)) = (&filter.after, &filter.before) {
        let a = parse_bound(after);
        let b = parse_bound(before);
        if let (Some(a), Some(b)) = (a, b) {
            if a >= b {
                return Err(MigrateError::Config(format!(
                    "empty date range: after '{}' is not before '{}'",
                    after, before
                )));
            }
        }
    }
    Ok(())
}

fn parse_bound(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MigrateError::Config(format!("{} must not be empty", field)));
    }
    Ok(())
}
