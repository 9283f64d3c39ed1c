//! Missing-row detection for tables whose counts disagree.
//!
//! With a single-column primary key on both sides, source keys are streamed
//! in batches and probed against the target with IN lists; the first `limit`
//! missing keys are reported with their full source rows. Without a key the
//! finder falls back to a per-row equality probe using every column, which
//! is O(N·M) and only acceptable because keyless tables are rare and small.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::{Cursor, Dialect, PkValue, TableSchema};
use crate::error::Result;
use crate::source::PgSourcePool;
use crate::target::MysqlTargetPool;
use crate::verify::{mysql_normalized_expr, pg_normalized_expr};

/// Source keys fetched and probed per round trip.
const PK_BATCH: usize = 500;

/// Source rows fetched per page in the keyless fallback.
const FALLBACK_PAGE: usize = 100;

/// One row present on the source but absent from the target.
#[derive(Debug, Clone)]
pub struct MissingRow {
    /// Primary key rendering, when the probe was key-based.
    pub pk: Option<String>,
    /// Column name / normalized value pairs.
    pub values: Vec<(String, Option<String>)>,
}

/// Missing-rows report for one table.
#[derive(Debug, Clone)]
pub struct MissingReport {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub missing: Vec<MissingRow>,
    /// Whether the key-based probe was used (false = full-row fallback).
    pub used_pk_probe: bool,
    /// True when the search stopped at the limit.
    pub truncated: bool,
}

/// Locates rows that did not make it to the target.
pub struct MissingRowFinder {
    pub source: Arc<PgSourcePool>,
    pub target: Arc<MysqlTargetPool>,
}

impl MissingRowFinder {
    /// Find up to `limit` missing rows for one table.
    pub async fn find_missing(&self, schema: &TableSchema, limit: usize) -> Result<MissingReport> {
        let table_key = schema.table.full_name();
        let source_count = self.source.count_rows(&schema.table, None).await?;
        let target_count = self.target.get_row_count(&schema.table.name).await?;

        if source_count == target_count {
            return Ok(MissingReport {
                table: table_key,
                source_count,
                target_count,
                missing: Vec::new(),
                used_pk_probe: false,
                truncated: false,
            });
        }

        info!(
            "{}: counts differ (source {}, target {}), locating missing rows",
            table_key, source_count, target_count
        );

        let pk = match schema.single_pk() {
            Some(source_pk) => {
                // The target key is discovered independently; the probe only
                // runs key-based when both sides agree on the column.
                match self.target.primary_key_column(&schema.table.name).await? {
                    Some(target_pk) if target_pk == source_pk => Some(source_pk.to_string()),
                    _ => None,
                }
            }
            None => None,
        };

        let (missing, truncated, used_pk_probe) = match pk {
            Some(pk) => {
                let (rows, truncated) = self.probe_by_pk(schema, &pk, limit).await?;
                (rows, truncated, true)
            }
            None => {
                warn!(
                    "{}: no usable single-column key; falling back to per-row probe",
                    table_key
                );
                let (rows, truncated) = self.probe_by_full_row(schema, limit).await?;
                (rows, truncated, false)
            }
        };

        Ok(MissingReport {
            table: table_key,
            source_count,
            target_count,
            missing,
            used_pk_probe,
            truncated,
        })
    }

    /// Key-based probe: stream source keys, check them against the target
    /// in IN-list batches, then fetch full rows for the missing ones.
    async fn probe_by_pk(
        &self,
        schema: &TableSchema,
        pk: &str,
        limit: usize,
    ) -> Result<(Vec<MissingRow>, bool)> {
        let pg = Dialect::Pg;
        let my = Dialect::Mysql;
        let source_table = pg.qualify(&schema.table.schema, &schema.table.name)?;
        let pk_quoted_pg = pg.quote(pk)?;
        let pk_quoted_my = my.quote(pk)?;
        let target_table = my.quote(&schema.table.name)?;

        let mut cursor = Cursor::Start;
        let mut missing_keys: Vec<String> = Vec::new();
        let mut truncated = false;

        'outer: loop {
            let mut sql = format!(
                "SELECT {pk}::text FROM {table}",
                pk = pk_quoted_pg,
                table = source_table
            );
            if let Cursor::At(position) = &cursor {
                sql.push_str(&format!(" WHERE {} > {}", pk_quoted_pg, position.to_sql_literal()));
            }
            sql.push_str(&format!(" ORDER BY {} LIMIT {}", pk_quoted_pg, PK_BATCH));

            let batch = self.source.fetch_text_rows(&sql).await?;
            if batch.is_empty() {
                break;
            }

            let keys: Vec<String> = batch
                .iter()
                .filter_map(|row| row.first().cloned().flatten())
                .collect();
            if keys.is_empty() {
                break;
            }

            let in_list = keys
                .iter()
                .map(|k| my.string_literal(k))
                .collect::<Vec<_>>()
                .join(", ");
            let probe_sql = format!(
                "SELECT CAST({pk} AS CHAR) FROM {table} WHERE {pk} IN ({list})",
                pk = pk_quoted_my,
                table = target_table,
                list = in_list
            );
            let found: HashSet<String> = self
                .target
                .fetch_text_rows(&probe_sql)
                .await?
                .into_iter()
                .filter_map(|row| row.into_iter().next().flatten())
                .collect();

            for key in &keys {
                if !found.contains(key) {
                    missing_keys.push(key.clone());
                    if missing_keys.len() >= limit {
                        truncated = true;
                        break 'outer;
                    }
                }
            }

            let exhausted = batch.len() < PK_BATCH;
            cursor = Cursor::At(parse_pk(keys.last().map(String::as_str).unwrap_or("")));
            if exhausted {
                break;
            }
        }

        if missing_keys.is_empty() {
            return Ok((Vec::new(), truncated));
        }

        let rows = self.fetch_source_rows_by_pk(schema, pk, &missing_keys).await?;
        Ok((rows, truncated))
    }

    /// Fetch the full (normalized) source rows for a set of missing keys.
    async fn fetch_source_rows_by_pk(
        &self,
        schema: &TableSchema,
        pk: &str,
        keys: &[String],
    ) -> Result<Vec<MissingRow>> {
        let pg = Dialect::Pg;
        let exprs = schema
            .columns
            .iter()
            .map(pg_normalized_expr)
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let in_list = keys
            .iter()
            .map(|k| parse_pk(k).to_sql_literal())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {exprs} FROM {table} WHERE {pk} IN ({list}) ORDER BY {pk}",
            exprs = exprs,
            table = pg.qualify(&schema.table.schema, &schema.table.name)?,
            pk = pg.quote(pk)?,
            list = in_list
        );

        let column_names = schema.column_names();
        let pk_index = schema.columns.iter().position(|c| c.name == pk);
        let rows = self.source.fetch_text_rows(&sql).await?;

        Ok(rows
            .into_iter()
            .map(|row| MissingRow {
                pk: pk_index.and_then(|i| row.get(i).cloned().flatten()),
                values: column_names.iter().cloned().zip(row).collect(),
            })
            .collect())
    }

    /// Keyless fallback: page through the source and probe the target with
    /// an all-column equality predicate per row.
    async fn probe_by_full_row(
        &self,
        schema: &TableSchema,
        limit: usize,
    ) -> Result<(Vec<MissingRow>, bool)> {
        let pg = Dialect::Pg;
        let exprs = schema
            .columns
            .iter()
            .map(pg_normalized_expr)
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let order_column = match schema.columns.first() {
            Some(c) => pg.quote(&c.name)?,
            None => return Ok((Vec::new(), false)),
        };
        let source_table = pg.qualify(&schema.table.schema, &schema.table.name)?;
        let column_names = schema.column_names();

        let mut missing = Vec::new();
        let mut truncated = false;
        let mut offset = 0usize;

        'outer: loop {
            let sql = format!(
                "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
                exprs, source_table, order_column, FALLBACK_PAGE, offset
            );
            let page = self.source.fetch_text_rows(&sql).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();

            for row in page {
                let probe = self.row_exists_query(schema, &row)?;
                if self.target.query_scalar_i64(&probe).await? == 0 {
                    missing.push(MissingRow {
                        pk: None,
                        values: column_names.iter().cloned().zip(row).collect(),
                    });
                    if missing.len() >= limit {
                        truncated = true;
                        break 'outer;
                    }
                }
            }

            if page_len < FALLBACK_PAGE {
                break;
            }
            offset += page_len;
        }

        Ok((missing, truncated))
    }

    /// Count target rows equal to a normalized source row on every column.
    fn row_exists_query(&self, schema: &TableSchema, row: &[Option<String>]) -> Result<String> {
        let my = Dialect::Mysql;
        let conditions = schema
            .columns
            .iter()
            .zip(row)
            .map(|(col, value)| {
                let expr = mysql_normalized_expr(col)?;
                Ok(match value {
                    Some(v) => format!("{} = {}", expr, my.string_literal(v)),
                    None => format!("{} IS NULL", expr),
                })
            })
            .collect::<Result<Vec<_>>>()?
            .join(" AND ");
        Ok(format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            my.quote(&schema.table.name)?,
            conditions
        ))
    }
}

/// Interpret a key rendering as an integer when possible, else text.
fn parse_pk(raw: &str) -> PkValue {
    raw.parse::<i64>()
        .map(PkValue::Int)
        .unwrap_or_else(|_| PkValue::Text(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pk() {
        assert_eq!(parse_pk("42"), PkValue::Int(42));
        assert_eq!(parse_pk("-7"), PkValue::Int(-7));
        assert_eq!(
            parse_pk("b3c0ffee"),
            PkValue::Text("b3c0ffee".to_string())
        );
    }
}
