//! Chunked row streaming from the source with bounded memory.
//!
//! Cursor pagination (`WHERE pk > last ORDER BY pk LIMIT n`) when a
//! single-column primary key exists, offset pagination otherwise. The very
//! first cursor fetch omits the WHERE clause entirely (`Cursor::Start`), so
//! no sentinel "smaller than any value" is ever compared against real keys.
//!
//! The select list is shaped per column kind so every value arrives in a
//! form the converter can always handle: temporal and numeric columns are
//! cast to text, arrays to JSON text.

use deadpool_postgres::Pool;
use tokio_postgres::types::FromSqlOwned;
use tracing::warn;

use crate::config::RowFilter;
use crate::core::{Column, Cursor, Dialect, PgColumnKind, PkValue, SqlValue, TableRef, TableSchema};
use crate::error::{MigrateError, Result};
use crate::typemap::convert;

/// One fetched chunk of converted rows.
#[derive(Debug)]
pub struct Chunk {
    pub rows: Vec<Vec<SqlValue>>,
    /// PK value of the last row, for cursor advancement.
    pub last_pk: Option<PkValue>,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// How a table is paged.
#[derive(Debug, Clone, PartialEq)]
pub enum Pagination {
    /// Keyset pagination over a single-column primary key.
    Cursor { pk_column: String, pk_index: usize },
    /// ORDER BY first column, LIMIT/OFFSET. Slower; used only without a PK.
    Offset { order_column: String },
}

impl Pagination {
    /// Pick the pagination mode for a table.
    ///
    /// The true primary key comes from the schema reader; the first column
    /// is only ever an ORDER BY tiebreaker for keyless tables.
    pub fn for_schema(schema: &TableSchema) -> Result<Pagination> {
        if let Some(pk) = schema.single_pk() {
            let pk_index = schema
                .columns
                .iter()
                .position(|c| c.name == pk)
                .ok_or_else(|| {
                    MigrateError::schema_read(
                        schema.table.full_name(),
                        format!("primary key column '{}' missing from column list", pk),
                    )
                })?;
            return Ok(Pagination::Cursor {
                pk_column: pk.to_string(),
                pk_index,
            });
        }
        let first = schema.columns.first().ok_or_else(|| {
            MigrateError::EmptySchema(schema.table.full_name())
        })?;
        Ok(Pagination::Offset {
            order_column: first.name.clone(),
        })
    }
}

/// Pure query plan for one table's streaming reads; testable without a pool.
#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub table: TableRef,
    pub columns: Vec<Column>,
    pub pagination: Pagination,
    pub filter: Option<RowFilter>,
    pub chunk_size: usize,
}

impl SelectPlan {
    /// Build the fetch query for the current cursor/offset position.
    pub fn query(&self, cursor: &Cursor, offset: u64) -> Result<String> {
        let pg = Dialect::Pg;
        let select_list = self
            .columns
            .iter()
            .map(|c| select_expr(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_list,
            pg.qualify(&self.table.schema, &self.table.name)?
        );

        let mut conditions = Vec::new();
        if let Pagination::Cursor { pk_column, .. } = &self.pagination {
            if let Cursor::At(position) = cursor {
                conditions.push(format!(
                    "{} > {}",
                    pg.quote(pk_column)?,
                    position.to_sql_literal()
                ));
            }
        }
        if let Some(filter) = &self.filter {
            if let Some(condition) = filter_condition(filter)? {
                conditions.push(condition);
            }
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        match &self.pagination {
            Pagination::Cursor { pk_column, .. } => {
                sql.push_str(&format!(" ORDER BY {}", pg.quote(pk_column)?));
                sql.push_str(&format!(" LIMIT {}", self.chunk_size));
            }
            Pagination::Offset { order_column } => {
                sql.push_str(&format!(" ORDER BY {}", pg.quote(order_column)?));
                // The filter column as tiebreaker keeps page boundaries
                // stable when the first column is not unique.
                if let Some(filter) = &self.filter {
                    if filter.column != *order_column {
                        sql.push_str(&format!(", {}", pg.quote(&filter.column)?));
                    }
                }
                sql.push_str(&format!(" LIMIT {} OFFSET {}", self.chunk_size, offset));
            }
        }

        Ok(sql)
    }
}

/// Streams a table chunk by chunk, advancing a cursor or offset.
pub struct ChunkStreamer {
    pool: Pool,
    plan: SelectPlan,
    cursor: Cursor,
    offset: u64,
    exhausted: bool,
}

impl ChunkStreamer {
    pub fn new(pool: Pool, plan: SelectPlan) -> Self {
        Self {
            pool,
            plan,
            cursor: Cursor::Start,
            offset: 0,
            exhausted: false,
        }
    }

    /// Seed the stream position from a checkpoint.
    pub fn resume_from(&mut self, position: PkValue) {
        match &self.plan.pagination {
            Pagination::Cursor { .. } => self.cursor = Cursor::At(position),
            Pagination::Offset { .. } => {
                if let PkValue::Int(n) = position {
                    self.offset = n.max(0) as u64;
                }
            }
        }
    }

    /// Current position for checkpointing, if any rows have been read.
    pub fn position(&self) -> Option<PkValue> {
        match &self.plan.pagination {
            Pagination::Cursor { .. } => self.cursor.position().cloned(),
            Pagination::Offset { .. } => {
                if self.offset > 0 {
                    Some(PkValue::Int(self.offset as i64))
                } else {
                    None
                }
            }
        }
    }

    /// Fetch the next chunk, converting each value on the way out.
    ///
    /// Returns an empty chunk once the table is exhausted; every row is
    /// seen exactly once across the whole sequence of calls.
    pub async fn next_chunk(&mut self) -> Result<Chunk> {
        if self.exhausted {
            return Ok(Chunk {
                rows: Vec::new(),
                last_pk: None,
            });
        }

        let sql = self.plan.query(&self.cursor, self.offset)?;
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "fetching chunk"))?;
        let rows = client.query(&sql, &[]).await?;

        let table_name = self.plan.table.full_name();
        let decoded: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| decode_row(row, &self.plan.columns, &table_name))
            .collect();

        if decoded.len() < self.plan.chunk_size {
            self.exhausted = true;
        }

        let last_pk = match &self.plan.pagination {
            Pagination::Cursor { pk_index, .. } => decoded
                .last()
                .and_then(|row| pk_from_value(&row[*pk_index])),
            Pagination::Offset { .. } => None,
        };

        match &self.plan.pagination {
            Pagination::Cursor { .. } => {
                if let Some(pk) = &last_pk {
                    self.cursor = Cursor::At(pk.clone());
                } else if !decoded.is_empty() {
                    // A NULL or undecodable PK would make the cursor stall
                    // and re-read this chunk forever.
                    return Err(MigrateError::transfer(
                        table_name,
                        "could not extract cursor value from last row",
                    ));
                }
            }
            Pagination::Offset { .. } => {
                self.offset += decoded.len() as u64;
            }
        }

        Ok(Chunk {
            rows: decoded,
            last_pk,
        })
    }
}

/// Render the row filter as a SQL condition on the source dialect.
pub(crate) fn filter_condition(filter: &RowFilter) -> Result<Option<String>> {
    if filter.is_empty() {
        return Ok(None);
    }
    let pg = Dialect::Pg;
    let column = pg.quote(&filter.column)?;
    let mut parts = Vec::new();
    if let Some(after) = &filter.after {
        parts.push(format!("{} >= {}", column, pg.string_literal(after)));
    }
    if let Some(before) = &filter.before {
        parts.push(format!("{} < {}", column, pg.string_literal(before)));
    }
    Ok(Some(parts.join(" AND ")))
}

/// Select-list expression for a column, shaped by its kind.
fn select_expr(col: &Column) -> Result<String> {
    let quoted = Dialect::Pg.quote(&col.name)?;
    Ok(match col.kind {
        PgColumnKind::Timestamp
        | PgColumnKind::TimestampTz
        | PgColumnKind::Date
        | PgColumnKind::Time
        | PgColumnKind::Interval
        | PgColumnKind::Numeric => format!("{}::text", quoted),
        PgColumnKind::Array => format!("to_jsonb({})::text", quoted),
        PgColumnKind::Json => format!("{}::text", quoted),
        _ => quoted,
    })
}

/// Decode one source row into converted values, per the column kinds.
///
/// Conversion never fails the row: undecodable or malformed values become
/// sentinels or NULL with a WARNING.
fn decode_row(row: &tokio_postgres::Row, columns: &[Column], table: &str) -> Vec<SqlValue> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| decode_value(row, idx, col, table))
        .collect()
}

fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    col: &Column,
    table: &str,
) -> SqlValue {
    match col.kind {
        // Booleans normally decode natively; a column tagged Bool that the
        // driver reads as text (a domain over a char type, say) goes through
        // the truthy-string set.
        PgColumnKind::Bool => match row.try_get::<_, Option<bool>>(idx) {
            Ok(Some(b)) => SqlValue::Bool(b),
            Ok(None) => SqlValue::Null,
            Err(_) => get_opt::<String>(row, idx, table, &col.name)
                .map(|s| SqlValue::Bool(convert::boolean_from_text(&s)))
                .unwrap_or(SqlValue::Null),
        },
        PgColumnKind::Int2 => get_opt::<i16>(row, idx, table, &col.name)
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null),
        PgColumnKind::Int4 => get_opt::<i32>(row, idx, table, &col.name)
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null),
        PgColumnKind::Int8 => get_opt::<i64>(row, idx, table, &col.name)
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null),
        PgColumnKind::Float4 => get_opt::<f32>(row, idx, table, &col.name)
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null),
        PgColumnKind::Float8 => get_opt::<f64>(row, idx, table, &col.name)
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null),
        PgColumnKind::Numeric => get_opt::<String>(row, idx, table, &col.name)
            .map(|s| SqlValue::Text(convert::convert_numeric(&s, table, &col.name)))
            .unwrap_or(SqlValue::Null),
        PgColumnKind::Bytea => get_opt::<Vec<u8>>(row, idx, table, &col.name)
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null),
        PgColumnKind::Uuid => match row.try_get::<_, Option<uuid::Uuid>>(idx) {
            Ok(Some(u)) => SqlValue::Text(u.to_string()),
            Ok(None) => SqlValue::Null,
            Err(_) => get_opt::<String>(row, idx, table, &col.name)
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
        },
        PgColumnKind::Timestamp | PgColumnKind::TimestampTz => {
            match get_opt::<String>(row, idx, table, &col.name) {
                Some(raw) => {
                    let normalized = convert::normalize_timestamp(&raw);
                    if normalized == convert::EPOCH_TIMESTAMP
                        && !raw.starts_with("1970-01-01")
                    {
                        warn!(
                            "{}.{}: corrupt timestamp {:?} replaced with epoch sentinel",
                            table, col.name, raw
                        );
                    }
                    SqlValue::Text(normalized)
                }
                None => SqlValue::Null,
            }
        }
        PgColumnKind::Date => match get_opt::<String>(row, idx, table, &col.name) {
            Some(raw) => {
                let normalized = convert::normalize_date(&raw);
                if normalized == convert::EPOCH_DATE && !raw.starts_with("1970-01-01") {
                    warn!(
                        "{}.{}: corrupt date {:?} replaced with epoch sentinel",
                        table, col.name, raw
                    );
                }
                SqlValue::Text(normalized)
            }
            None => SqlValue::Null,
        },
        PgColumnKind::Time | PgColumnKind::Interval => {
            match get_opt::<String>(row, idx, table, &col.name) {
                Some(raw) => match convert::normalize_time(&raw) {
                    Some(t) => SqlValue::Text(t),
                    None => {
                        warn!(
                            "{}.{}: unusable time value {:?} replaced with NULL",
                            table, col.name, raw
                        );
                        SqlValue::Null
                    }
                },
                None => SqlValue::Null,
            }
        }
        PgColumnKind::Json | PgColumnKind::Array => {
            match get_opt::<String>(row, idx, table, &col.name) {
                Some(raw) => SqlValue::Text(convert::convert_json(&raw)),
                None => SqlValue::Null,
            }
        }
        PgColumnKind::Varchar | PgColumnKind::Char | PgColumnKind::Text | PgColumnKind::Other => {
            get_opt::<String>(row, idx, table, &col.name)
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null)
        }
    }
}

/// Typed optional get with a WARNING on driver-level decode failures.
fn get_opt<T: FromSqlOwned>(
    row: &tokio_postgres::Row,
    idx: usize,
    table: &str,
    column: &str,
) -> Option<T> {
    match row.try_get::<_, Option<T>>(idx) {
        Ok(v) => v,
        Err(e) => {
            warn!("{}.{}: value not decodable: {}", table, column, e);
            None
        }
    }
}

/// Extract a cursor position from a decoded PK value.
fn pk_from_value(value: &SqlValue) -> Option<PkValue> {
    match value {
        SqlValue::I16(v) => Some(PkValue::Int(*v as i64)),
        SqlValue::I32(v) => Some(PkValue::Int(*v as i64)),
        SqlValue::I64(v) => Some(PkValue::Int(*v)),
        SqlValue::Text(s) => Some(PkValue::Text(s.clone())),
        SqlValue::Null => None,
        other => Some(PkValue::Text(other.render())),
    }
}
