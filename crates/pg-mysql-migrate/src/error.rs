//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML/JSON, missing fields, inconsistent flags).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error.
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Target database connection or query error.
    #[error("Target database error: {0}")]
    Target(#[from] sqlx::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Catalog query failed while reading a table's schema.
    #[error("Schema read failed for {table}: {message}")]
    SchemaRead { table: String, message: String },

    /// A table came back from extraction with zero columns.
    #[error("Table {0} has no columns - cannot emit DDL")]
    EmptySchema(String),

    /// Emitted DDL was rejected by the target.
    #[error("DDL failed for {table}: {message}")]
    Ddl { table: String, message: String },

    /// Data transfer failed for a specific table.
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Per-row insert errors accumulated past the collection cap.
    #[error("Chunk write failed for {table}: {skipped} rows skipped, {failed} rows failed; first errors:\n{sample}")]
    ChunkWrite {
        table: String,
        skipped: u64,
        failed: u64,
        sample: String,
    },

    /// Row count or sample validation disagreement.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Checkpoint file error.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error (checkpoint writes, config reads).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Migration was cancelled (SIGINT, etc.).
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a SchemaRead error.
    pub fn schema_read(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SchemaRead {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Ddl error.
    pub fn ddl(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Ddl {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error.
    pub fn transfer(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) => 2,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including the source chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
