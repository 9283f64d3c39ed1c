//! pg-mysql-migrate CLI - PostgreSQL to MariaDB/MySQL migration.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use pg_mysql_migrate::config::validate_filter;
use pg_mysql_migrate::{Config, MigrateError, Mode, Orchestrator, RowFilter, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "pg-mysql-migrate")]
#[command(about = "Migrate a PostgreSQL database into MariaDB/MySQL")]
#[command(version)]
struct Cli {
    /// Path to YAML or JSON configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run all phases: schema, data, indexes, foreign keys, validation
    #[arg(long, conflicts_with_all = ["schema_only", "data_only"])]
    full: bool,

    /// Create schema objects only
    #[arg(long, conflicts_with = "data_only")]
    schema_only: bool,

    /// Transfer data only; missing target tables are created first
    #[arg(long)]
    data_only: bool,

    /// Resume interrupted tables from their checkpoints
    #[arg(long)]
    resume: bool,

    /// Describe the plan without touching the target
    #[arg(long)]
    dry_run: bool,

    /// Skip index creation after data load
    #[arg(long)]
    skip_indexes: bool,

    /// Tables to migrate (intersected with the config whitelist)
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Tables to skip (merged with the config blacklist; always wins)
    #[arg(long, value_delimiter = ',')]
    skip_tables: Vec<String>,

    /// Lower bound (inclusive) for the date filter: YYYY-MM-DD[ HH:MM:SS]
    #[arg(long, requires = "date_column")]
    after_date: Option<String>,

    /// Upper bound (exclusive) for the date filter
    #[arg(long, requires = "date_column")]
    before_date: Option<String>,

    /// Column the date filter applies to
    #[arg(long)]
    date_column: Option<String>,

    /// Run only the missing-rows report
    #[arg(long)]
    find_missing: bool,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.schema_only {
            Mode::SchemaOnly
        } else if self.data_only {
            Mode::DataOnly
        } else {
            Mode::Full
        }
    }

    /// Build the row filter from the date flags, if any are present.
    fn row_filter(&self) -> Result<Option<RowFilter>, MigrateError> {
        if self.after_date.is_none() && self.before_date.is_none() {
            if self.date_column.is_some() {
                return Err(MigrateError::Config(
                    "--date-column given without --after-date or --before-date".into(),
                ));
            }
            return Ok(None);
        }
        let column = self.date_column.clone().ok_or_else(|| {
            MigrateError::Config(
                "--after-date/--before-date require --date-column".into(),
            )
        })?;
        let filter = RowFilter {
            column,
            after: self.after_date.clone(),
            before: self.before_date.clone(),
        };
        validate_filter(&filter)?;
        Ok(Some(filter))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    config
        .migration
        .merge_cli_tables(&cli.tables, &cli.skip_tables);
    if cli.skip_indexes {
        config.migration.skip_indexes = true;
    }
    if let Some(filter) = cli.row_filter()? {
        config.migration.date_filter = Some(filter);
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let orchestrator = Orchestrator::new(config).await?;

    if cli.find_missing {
        let reports = orchestrator.find_missing().await?;
        orchestrator.shutdown().await;
        for report in &reports {
            if report.source_count == report.target_count {
                continue;
            }
            println!(
                "{}: source={} target={} missing_located={}{}",
                report.table,
                report.source_count,
                report.target_count,
                report.missing.len(),
                if report.truncated { " (truncated)" } else { "" }
            );
            for row in &report.missing {
                match &row.pk {
                    Some(pk) => println!("  pk={}", pk),
                    None => println!(
                        "  row: {}",
                        row.values
                            .iter()
                            .map(|(name, value)| format!(
                                "{}={}",
                                name,
                                value.as_deref().unwrap_or("NULL")
                            ))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                }
            }
        }
        return Ok(());
    }

    let options = RunOptions {
        mode: cli.mode(),
        resume: cli.resume,
        dry_run: cli.dry_run,
        skip_indexes: cli.skip_indexes,
    };

    let run_result = orchestrator.run(&options, cancel).await;
    orchestrator.shutdown().await;
    let result = run_result?;

    for skipped in &result.skipped_fks {
        warn!(
            "FK {} on `{}` left disabled ({} orphans)",
            skipped.constraint, skipped.table, skipped.orphan_count
        );
    }

    if !result.success() {
        return Err(MigrateError::Validation(format!(
            "{} tables failed, {} validations mismatched",
            result.failed_tables.len(),
            result.validations.iter().filter(|v| !v.passed()).count()
        )));
    }

    info!(
        "Success: {} tables, {} rows in {:.1}s",
        result.tables.len(),
        result.rows_transferred,
        result.duration.as_secs_f64()
    );
    Ok(())
}

fn setup_logging(verbosity: &str) -> Result<(), MigrateError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            return Err(MigrateError::Config(format!(
                "invalid verbosity '{}'",
                other
            )))
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
    Ok(())
}

/// First interrupt cancels cooperatively; workers finish their in-flight
/// batch, re-enable foreign-key checks, and keep their checkpoints.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight batches and releasing sessions");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_full() {
        let cli = Cli::try_parse_from(["pg-mysql-migrate"]).unwrap();
        assert_eq!(cli.mode(), Mode::Full);
    }

    #[test]
    fn test_mode_flags() {
        let cli = Cli::try_parse_from(["pg-mysql-migrate", "--schema-only"]).unwrap();
        assert_eq!(cli.mode(), Mode::SchemaOnly);

        let cli = Cli::try_parse_from(["pg-mysql-migrate", "--data-only", "--resume"]).unwrap();
        assert_eq!(cli.mode(), Mode::DataOnly);
        assert!(cli.resume);
    }

    #[test]
    fn test_mode_flags_conflict() {
        assert!(Cli::try_parse_from(["pg-mysql-migrate", "--full", "--schema-only"]).is_err());
        assert!(Cli::try_parse_from(["pg-mysql-migrate", "--schema-only", "--data-only"]).is_err());
    }

    #[test]
    fn test_tables_are_comma_separated() {
        let cli =
            Cli::try_parse_from(["pg-mysql-migrate", "--tables", "a,b,c", "--skip-tables", "b"])
                .unwrap();
        assert_eq!(cli.tables, vec!["a", "b", "c"]);
        assert_eq!(cli.skip_tables, vec!["b"]);
    }

    #[test]
    fn test_date_flags_require_column() {
        // clap enforces the pairing at parse time.
        assert!(
            Cli::try_parse_from(["pg-mysql-migrate", "--after-date", "2024-01-01"]).is_err()
        );

        let cli = Cli::try_parse_from([
            "pg-mysql-migrate",
            "--after-date",
            "2024-01-01",
            "--before-date",
            "2024-02-01",
            "--date-column",
            "created_at",
        ])
        .unwrap();
        let filter = cli.row_filter().unwrap().unwrap();
        assert_eq!(filter.column, "created_at");
        assert_eq!(filter.after.as_deref(), Some("2024-01-01"));
        assert_eq!(filter.before.as_deref(), Some("2024-02-01"));
    }

    #[test]
    fn test_date_column_alone_is_rejected() {
        let cli =
            Cli::try_parse_from(["pg-mysql-migrate", "--date-column", "created_at"]).unwrap();
        assert!(cli.row_filter().is_err());
    }

    #[test]
    fn test_no_filter_when_no_date_flags() {
        let cli = Cli::try_parse_from(["pg-mysql-migrate"]).unwrap();
        assert!(cli.row_filter().unwrap().is_none());
    }

    #[test]
    fn test_invalid_date_rejected() {
        let cli = Cli::try_parse_from([
            "pg-mysql-migrate",
            "--after-date",
            "not-a-date",
            "--date-column",
            "created_at",
        ])
        .unwrap();
        assert!(cli.row_filter().is_err());
    }
}
