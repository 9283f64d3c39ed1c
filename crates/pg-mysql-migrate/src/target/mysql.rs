//! MySQL/MariaDB target pool and bulk writer.
//!
//! The writer operates inside a [`WriteSession`]: a dedicated pooled
//! connection with `FOREIGN_KEY_CHECKS` disabled for the duration of one
//! table's data phase. Re-enabling the flag is guaranteed on every exit
//! path; a session dropped without [`WriteSession::finish`] detaches its
//! connection from the pool so the disabled flag can never leak into
//! unrelated work.

use std::time::Duration;

use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, Row};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::{Dialect, SqlValue, TableSchema};
use crate::error::{MigrateError, Result};

/// Connection pool acquire timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL's hard limit on placeholders per prepared statement.
const MYSQL_MAX_PLACEHOLDERS: usize = 65_535;

/// Per-row errors collected before the writer gives up on a chunk.
const MAX_ROW_ERRORS: usize = 10;

/// MySQL/MariaDB target connection pool.
pub struct MysqlTargetPool {
    pool: MySqlPool,
    database: String,
}

/// Outcome of writing one chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteStats {
    pub written: u64,
    pub skipped: u64,
}

impl MysqlTargetPool {
    /// Open a pool and verify one connection.
    pub async fn connect(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .charset(&config.charset);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL target pool"))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL target connection"))?;

        info!(
            "Connected to MySQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Close the pool and all idle connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Execute a DDL statement, attributing failures to `table`.
    pub async fn execute_ddl(&self, table: &str, sql: &str) -> Result<()> {
        debug!("DDL on {}: {}", table, sql);
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrateError::ddl(table, e))?;
        Ok(())
    }

    /// Check whether a table exists in the target database.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
        )
        .bind(&self.database)
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.get("cnt");
        Ok(count > 0)
    }

    /// Exact row count of a target table.
    pub async fn get_row_count(&self, table: &str) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS cnt FROM {}",
            Dialect::Mysql.quote(table)?
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get("cnt"))
    }

    /// Single-column primary key of a target table, when one exists.
    pub async fn primary_key_column(&self, table: &str) -> Result<Option<String>> {
        let rows = sqlx::query(
            "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() == 1 {
            Ok(Some(rows[0].get::<String, _>("COLUMN_NAME")))
        } else {
            Ok(None)
        }
    }

    /// Fetch a single BIGINT scalar, e.g. a COUNT(*).
    pub async fn query_scalar_i64(&self, sql: &str) -> Result<i64> {
        let row = sqlx::query(sql).fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>(0))
    }

    /// Run a query whose select list renders every column to text.
    pub async fn fetch_text_rows(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| {
                        row.try_get::<Option<String>, _>(i).unwrap_or_else(|e| {
                            warn!("sample column {} not text-decodable: {}", i, e);
                            None
                        })
                    })
                    .collect()
            })
            .collect())
    }

    /// Start a write session for one table's data phase.
    ///
    /// Disables `FOREIGN_KEY_CHECKS` on the session's dedicated connection;
    /// callers must invoke [`WriteSession::finish`] on every exit path.
    pub async fn begin_write_session(&self, schema: &TableSchema) -> Result<WriteSession> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring write connection"))?;

        sqlx::query("SET FOREIGN_KEY_CHECKS = 0")
            .execute(&mut *conn)
            .await?;

        let my = Dialect::Mysql;
        let column_names = schema.column_names();
        let insert_prefix = format!(
            "INSERT INTO {} ({}) VALUES ",
            my.quote(&schema.table.name)?,
            my.quote_list(&column_names)?
        );
        let row_placeholders = format!(
            "({})",
            vec!["?"; column_names.len()].join(", ")
        );
        let date_columns = schema
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_datelike())
            .map(|(i, c)| (i, c.name.clone()))
            .collect();

        Ok(WriteSession {
            conn: Some(conn),
            table: schema.table.name.clone(),
            column_count: column_names.len(),
            insert_prefix,
            row_placeholders,
            date_columns,
        })
    }
}

/// Scoped writer for one table with foreign-key checks disabled.
pub struct WriteSession {
    conn: Option<PoolConnection<MySql>>,
    table: String,
    column_count: usize,
    insert_prefix: String,
    row_placeholders: String,
    /// (index, name) of date-typed columns, for skip diagnostics.
    date_columns: Vec<(usize, String)>,
}

impl WriteSession {
    /// Write a chunk as multi-row INSERT batches.
    ///
    /// `batch_size` is additionally capped by the placeholder limit. A
    /// failed batch is retried row by row: rows failing with date errors are
    /// skipped with a diagnostic; other row errors are collected (up to
    /// [`MAX_ROW_ERRORS`]) and raised as one composite error at the chunk
    /// boundary.
    pub async fn write_chunk(
        &mut self,
        rows: &[Vec<SqlValue>],
        batch_size: usize,
    ) -> Result<WriteStats> {
        if rows.is_empty() {
            return Ok(WriteStats::default());
        }
        if self.column_count == 0 {
            return Err(MigrateError::EmptySchema(self.table.clone()));
        }

        let max_rows = (MYSQL_MAX_PLACEHOLDERS / self.column_count).max(1);
        let effective_batch = batch_size.clamp(1, max_rows);

        let mut stats = WriteStats::default();
        for batch in rows.chunks(effective_batch) {
            let batch_stats = self.write_batch(batch).await?;
            stats.written += batch_stats.written;
            stats.skipped += batch_stats.skipped;
        }
        Ok(stats)
    }

    async fn write_batch(&mut self, batch: &[Vec<SqlValue>]) -> Result<WriteStats> {
        let sql = format!(
            "{}{}",
            self.insert_prefix,
            vec![self.row_placeholders.as_str(); batch.len()].join(", ")
        );

        let mut query = sqlx::query(&sql);
        for row in batch {
            for value in row {
                query = bind_value(query, value);
            }
        }

        let conn = self.connection()?;
        match query.execute(&mut **conn).await {
            Ok(_) => Ok(WriteStats {
                written: batch.len() as u64,
                skipped: 0,
            }),
            Err(e) => {
                debug!(
                    "{}: batch of {} rows failed ({}), retrying row by row",
                    self.table,
                    batch.len(),
                    e
                );
                self.write_rows_individually(batch).await
            }
        }
    }

    /// Per-row fallback for a failed batch.
    async fn write_rows_individually(&mut self, batch: &[Vec<SqlValue>]) -> Result<WriteStats> {
        let sql = format!("{}{}", self.insert_prefix, self.row_placeholders);
        let mut stats = WriteStats::default();
        let mut errors: Vec<String> = Vec::new();

        for row in batch {
            let mut query = sqlx::query(&sql);
            for value in row {
                query = bind_value(query, value);
            }
            let conn = self.connection()?;
            match query.execute(&mut **conn).await {
                Ok(_) => stats.written += 1,
                Err(e) => {
                    let message = e.to_string();
                    let lower = message.to_lowercase();
                    if lower.contains("datetime") || lower.contains("date") {
                        stats.skipped += 1;
                        let diagnosis = self
                            .find_problematic_column(row)
                            .unwrap_or_else(|| "no date column stands out".to_string());
                        warn!(
                            "{}: row skipped on date error ({}); {}",
                            self.table, message, diagnosis
                        );
                    } else {
                        errors.push(message);
                        if errors.len() >= MAX_ROW_ERRORS {
                            break;
                        }
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(MigrateError::ChunkWrite {
                table: self.table.clone(),
                skipped: stats.skipped,
                failed: errors.len() as u64,
                sample: errors.join("\n"),
            });
        }
        Ok(stats)
    }

    /// Best-effort scan of date-typed columns for 5+ digit years.
    fn find_problematic_column(&self, row: &[SqlValue]) -> Option<String> {
        for (idx, name) in &self.date_columns {
            if let Some(SqlValue::Text(value)) = row.get(*idx) {
                let digits = value.bytes().take_while(|b| b.is_ascii_digit()).count();
                if digits >= 5 {
                    return Some(format!(
                        "column `{}` holds out-of-range year in {:?}",
                        name, value
                    ));
                }
            }
        }
        None
    }

    /// Re-enable foreign-key checks and return the connection to the pool.
    ///
    /// Must run on success, error, and cancellation paths alike.
    pub async fn finish(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SET FOREIGN_KEY_CHECKS = 1")
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    fn connection(&mut self) -> Result<&mut PoolConnection<MySql>> {
        self.conn.as_mut().ok_or_else(|| {
            MigrateError::transfer(self.table.clone(), "write session already finished")
        })
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        // A session dropped without finish() still has FOREIGN_KEY_CHECKS=0
        // on its connection. Detach it so it is physically closed instead of
        // rejoining the pool with the flag set.
        if let Some(conn) = self.conn.take() {
            warn!(
                "{}: write session dropped without finish(); closing its connection",
                self.table
            );
            let raw = conn.detach();
            tokio::spawn(async move {
                let _ = raw.close().await;
            });
        }
    }
}

/// Bind one converted value to a target query.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(s) => query.bind(s.as_str()),
        SqlValue::Bytes(b) => query.bind(b.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_cap() {
        // 20 columns -> at most 3276 rows per statement.
        let max_rows = MYSQL_MAX_PLACEHOLDERS / 20;
        assert_eq!(max_rows, 3276);
        assert!(max_rows * 20 <= MYSQL_MAX_PLACEHOLDERS);
    }

    #[test]
    fn test_insert_sql_shape() {
        let prefix = "INSERT INTO `users` (`id`, `name`) VALUES ";
        let placeholders = "(?, ?)";
        let sql = format!("{}{}", prefix, vec![placeholders; 3].join(", "));
        assert_eq!(
            sql,
            "INSERT INTO `users` (`id`, `name`) VALUES (?, ?), (?, ?), (?, ?)"
        );
    }
}
