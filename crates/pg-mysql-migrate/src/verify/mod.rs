//! Post-load validation: row counts and sampled content comparison.
//!
//! Both sides render every column to text with normalization expressions
//! chosen so identical data produces identical strings (booleans as 0/1,
//! decimals at scale 10, timestamps without fractional seconds, binary as
//! lowercase hex). Rows are then canonicalized and hashed in Rust, and the
//! two hash multisets are compared order-insensitively.

pub mod fk;
pub mod missing;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::config::RowFilter;
use crate::core::{Column, Dialect, PgColumnKind, TableSchema};
use crate::error::Result;
use crate::source::PgSourcePool;
use crate::target::MysqlTargetPool;

/// Rows sampled from each side for content comparison.
const SAMPLE_ROWS: usize = 100;

/// Validation verdict for one table.
#[derive(Debug, Clone)]
pub struct TableValidation {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub counts_match: bool,
    /// `None` when counts differ or the table is empty (samples skipped).
    pub samples_match: Option<bool>,
}

impl TableValidation {
    pub fn passed(&self) -> bool {
        self.counts_match && self.samples_match.unwrap_or(true)
    }
}

/// Source-side normalization expression for one column.
///
/// Chosen to textually match [`mysql_normalized_expr`] for equal data.
pub fn pg_normalized_expr(col: &Column) -> Result<String> {
    let quoted = Dialect::Pg.quote(&col.name)?;
    Ok(match col.kind {
        PgColumnKind::Bool => format!("CASE WHEN {q} THEN '1' ELSE '0' END", q = quoted),
        PgColumnKind::Float4 | PgColumnKind::Float8 => {
            format!("round({}::numeric, 6)::text", quoted)
        }
        PgColumnKind::Numeric => format!("round({}, 10)::text", quoted),
        PgColumnKind::Bytea => format!("encode({}, 'hex')", quoted),
        PgColumnKind::Date => format!("to_char({}, 'YYYY-MM-DD')", quoted),
        // No to_char overload exists for time; time(0) rounds fractional
        // seconds the same way the target does on insert.
        PgColumnKind::Time => format!("{}::time(0)::text", quoted),
        PgColumnKind::Interval => format!("to_char({}, 'HH24:MI:SS')", quoted),
        PgColumnKind::Timestamp | PgColumnKind::TimestampTz => {
            format!("to_char({}, 'YYYY-MM-DD HH24:MI:SS')", quoted)
        }
        PgColumnKind::Json => format!("{}::jsonb::text", quoted),
        PgColumnKind::Array => format!("to_jsonb({})::text", quoted),
        PgColumnKind::Uuid => format!("lower({}::text)", quoted),
        _ => format!("{}::text", quoted),
    })
}

/// Target-side normalization expression for one column.
pub fn mysql_normalized_expr(col: &Column) -> Result<String> {
    let quoted = Dialect::Mysql.quote(&col.name)?;
    Ok(match col.kind {
        PgColumnKind::Bytea => format!("LOWER(HEX({}))", quoted),
        PgColumnKind::Float4 | PgColumnKind::Float8 => {
            format!("CAST(CAST({} AS DECIMAL(30,6)) AS CHAR)", quoted)
        }
        PgColumnKind::Uuid => format!("LOWER(CAST({} AS CHAR))", quoted),
        _ => format!("CAST({} AS CHAR)", quoted),
    })
}

/// Canonical string for one sampled row: column names sorted, values paired
/// with their column, NULLs as a fixed sentinel, fields joined with an
/// unprintable separator.
pub fn canonical_row(columns: &[String], values: &[Option<String>]) -> String {
    let mut pairs: Vec<(usize, &String)> = columns.iter().enumerate().collect();
    pairs.sort_by(|a, b| a.1.cmp(b.1));
    pairs
        .iter()
        .map(|(idx, name)| {
            let value = values
                .get(*idx)
                .and_then(|v| v.as_deref())
                .unwrap_or("NULL");
            format!("{}={}", name, value)
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// 128-bit hex digest of a canonical row (SHA-256 truncated).
pub fn row_digest(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..16])
}

/// Sorted digest multiset for a sample; order-insensitive by construction.
pub fn sample_digests(columns: &[String], rows: &[Vec<Option<String>>]) -> Vec<String> {
    let mut digests: Vec<String> = rows
        .iter()
        .map(|row| row_digest(&canonical_row(columns, row)))
        .collect();
    digests.sort();
    digests
}

/// Row-count and sample-content validator.
pub struct PostValidator {
    pub source: Arc<PgSourcePool>,
    pub target: Arc<MysqlTargetPool>,
}

impl PostValidator {
    /// Validate one table; a failed validation logs ERROR but never aborts
    /// the migration.
    pub async fn validate_table(
        &self,
        schema: &TableSchema,
        filter: Option<&RowFilter>,
    ) -> Result<TableValidation> {
        let table_key = schema.table.full_name();

        let source_count = self.source.count_rows(&schema.table, filter).await?;
        let target_count = self.target.get_row_count(&schema.table.name).await?;
        let counts_match = source_count == target_count;

        if !counts_match {
            error!(
                "{}: row count mismatch (source {}, target {})",
                table_key, source_count, target_count
            );
            return Ok(TableValidation {
                table: table_key,
                source_count,
                target_count,
                counts_match: false,
                samples_match: None,
            });
        }

        if source_count == 0 {
            info!("{}: validated (empty table)", table_key);
            return Ok(TableValidation {
                table: table_key,
                source_count,
                target_count,
                counts_match: true,
                samples_match: None,
            });
        }

        let samples_match = self.compare_samples(schema, filter).await?;
        if samples_match {
            info!("{}: validated ({} rows, samples match)", table_key, source_count);
        } else {
            error!("{}: sample content mismatch", table_key);
        }

        Ok(TableValidation {
            table: table_key,
            source_count,
            target_count,
            counts_match: true,
            samples_match: Some(samples_match),
        })
    }

    /// Hash the first [`SAMPLE_ROWS`] rows from each side and compare.
    ///
    /// Samples are ordered by primary key when one is known; without a PK
    /// the sampling order is engine-defined and the comparison is a weak
    /// guarantee.
    async fn compare_samples(
        &self,
        schema: &TableSchema,
        filter: Option<&RowFilter>,
    ) -> Result<bool> {
        let columns = schema.column_names();

        let source_sql = source_sample_query(schema, filter)?;
        let target_sql = target_sample_query(schema)?;

        let source_rows = self.source.fetch_text_rows(&source_sql).await?;
        let target_rows = self.target.fetch_text_rows(&target_sql).await?;

        let source_digests = sample_digests(&columns, &source_rows);
        let target_digests = sample_digests(&columns, &target_rows);
        Ok(source_digests == target_digests)
    }
}

/// Source sample query: normalized expressions, PK order when available.
fn source_sample_query(schema: &TableSchema, filter: Option<&RowFilter>) -> Result<String> {
    let pg = Dialect::Pg;
    let exprs = schema
        .columns
        .iter()
        .map(pg_normalized_expr)
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let mut sql = format!(
        "SELECT {} FROM {}",
        exprs,
        pg.qualify(&schema.table.schema, &schema.table.name)?
    );
    if let Some(condition) = filter
        .map(crate::source::stream::filter_condition)
        .transpose()?
        .flatten()
    {
        sql.push_str(" WHERE ");
        sql.push_str(&condition);
    }
    if let Some(pk) = schema.single_pk() {
        sql.push_str(&format!(" ORDER BY {}", pg.quote(pk)?));
    }
    sql.push_str(&format!(" LIMIT {}", SAMPLE_ROWS));
    Ok(sql)
}

/// Target sample query, mirroring [`source_sample_query`].
fn target_sample_query(schema: &TableSchema) -> Result<String> {
    let my = Dialect::Mysql;
    let exprs = schema
        .columns
        .iter()
        .map(mysql_normalized_expr)
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let mut sql = format!("SELECT {} FROM {}", exprs, my.quote(&schema.table.name)?);
    if let Some(pk) = schema.single_pk() {
        sql.push_str(&format!(" ORDER BY {}", my.quote(pk)?));
    }
    sql.push_str(&format!(" LIMIT {}", SAMPLE_ROWS));
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TableRef;

    fn make_column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            kind: PgColumnKind::from_type_name(data_type),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            default_expr: None,
            ordinal: 1,
        }
    }

    #[test]
    fn test_pg_normalized_exprs() {
        assert_eq!(
            pg_normalized_expr(&make_column("active", "bool")).unwrap(),
            "CASE WHEN \"active\" THEN '1' ELSE '0' END"
        );
        assert_eq!(
            pg_normalized_expr(&make_column("amount", "numeric")).unwrap(),
            "round(\"amount\", 10)::text"
        );
        assert_eq!(
            pg_normalized_expr(&make_column("created_at", "timestamp")).unwrap(),
            "to_char(\"created_at\", 'YYYY-MM-DD HH24:MI:SS')"
        );
        assert_eq!(
            pg_normalized_expr(&make_column("payload", "bytea")).unwrap(),
            "encode(\"payload\", 'hex')"
        );
        assert_eq!(
            pg_normalized_expr(&make_column("id", "int8")).unwrap(),
            "\"id\"::text"
        );
    }

    #[test]
    fn test_mysql_normalized_exprs() {
        assert_eq!(
            mysql_normalized_expr(&make_column("payload", "bytea")).unwrap(),
            "LOWER(HEX(`payload`))"
        );
        assert_eq!(
            mysql_normalized_expr(&make_column("score", "float8")).unwrap(),
            "CAST(CAST(`score` AS DECIMAL(30,6)) AS CHAR)"
        );
        assert_eq!(
            mysql_normalized_expr(&make_column("id", "int8")).unwrap(),
            "CAST(`id` AS CHAR)"
        );
    }

    #[test]
    fn test_canonical_row_sorts_columns() {
        let columns = vec!["b".to_string(), "a".to_string()];
        let values = vec![Some("2".to_string()), Some("1".to_string())];
        assert_eq!(canonical_row(&columns, &values), "a=1\u{1f}b=2");
    }

    #[test]
    fn test_canonical_row_null_sentinel() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let values = vec![None, Some("x".to_string())];
        assert_eq!(canonical_row(&columns, &values), "a=NULL\u{1f}b=x");
    }

    #[test]
    fn test_row_digest_is_128_bit_hex() {
        let digest = row_digest("a=1");
        assert_eq!(digest.len(), 32);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
        // Deterministic.
        assert_eq!(digest, row_digest("a=1"));
        assert_ne!(digest, row_digest("a=2"));
    }

    #[test]
    fn test_sample_digests_order_insensitive() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows_a = vec![
            vec![Some("1".to_string()), Some("Ann".to_string())],
            vec![Some("2".to_string()), Some("Bo".to_string())],
            vec![Some("3".to_string()), Some("Cy".to_string())],
        ];
        let mut rows_b = rows_a.clone();
        rows_b.reverse();
        // Permuting either side's sample does not change the verdict.
        assert_eq!(sample_digests(&columns, &rows_a), sample_digests(&columns, &rows_b));
    }

    #[test]
    fn test_sample_digests_detect_differences() {
        let columns = vec!["id".to_string()];
        let rows_a = vec![vec![Some("1".to_string())], vec![Some("2".to_string())]];
        let rows_b = vec![vec![Some("1".to_string())], vec![Some("3".to_string())]];
        assert_ne!(sample_digests(&columns, &rows_a), sample_digests(&columns, &rows_b));
    }

    #[test]
    fn test_validation_passed() {
        let ok = TableValidation {
            table: "public.users".into(),
            source_count: 3,
            target_count: 3,
            counts_match: true,
            samples_match: Some(true),
        };
        assert!(ok.passed());

        let count_bad = TableValidation {
            counts_match: false,
            samples_match: None,
            ..ok.clone()
        };
        assert!(!count_bad.passed());

        let sample_bad = TableValidation {
            samples_match: Some(false),
            ..ok
        };
        assert!(!sample_bad.passed());
    }

    fn users_schema() -> TableSchema {
        TableSchema {
            table: TableRef::new("public", "users"),
            columns: vec![make_column("id", "int4"), make_column("name", "varchar")],
            primary_key: vec!["id".into()],
            indexes: vec![],
            foreign_keys: vec![],
            size_bytes: 0,
        }
    }

    #[test]
    fn test_source_sample_query_orders_by_pk() {
        let sql = source_sample_query(&users_schema(), None).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\"::text, \"name\"::text FROM \"public\".\"users\" \
             ORDER BY \"id\" LIMIT 100"
        );
    }

    #[test]
    fn test_source_sample_query_applies_filter() {
        let filter = crate::config::RowFilter {
            column: "created_at".into(),
            after: Some("2024-01-01".into()),
            before: None,
        };
        let sql = source_sample_query(&users_schema(), Some(&filter)).unwrap();
        assert!(sql.contains("WHERE \"created_at\" >= '2024-01-01'"));
    }

    #[test]
    fn test_target_sample_query_shape() {
        let sql = target_sample_query(&users_schema()).unwrap();
        assert_eq!(
            sql,
            "SELECT CAST(`id` AS CHAR), CAST(`name` AS CHAR) FROM `users` \
             ORDER BY `id` LIMIT 100"
        );
    }

    #[test]
    fn test_keyless_sample_query_has_no_order() {
        let mut schema = users_schema();
        schema.primary_key.clear();
        let sql = target_sample_query(&schema).unwrap();
        assert!(!sql.contains("ORDER BY"));
        assert!(sql.ends_with("LIMIT 100"));
    }
}
