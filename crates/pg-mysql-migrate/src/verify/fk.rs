//! Pre-flight validation of foreign keys on the target.
//!
//! Run after data load, before each `ADD CONSTRAINT`: counts referencing
//! rows whose key columns are all non-NULL but match no referenced row. A
//! constraint with orphans is skipped (with samples logged) rather than
//! aborting the run; if the count is zero, enabling the constraint cannot
//! fail an integrity check.

use std::sync::Arc;

use tracing::warn;

use crate::core::{Dialect, ForeignKey};
use crate::error::Result;
use crate::target::MysqlTargetPool;

/// Orphan sample tuples shown in the warning.
const SAMPLE_LIMIT: usize = 10;

/// Outcome of checking one foreign key.
#[derive(Debug, Clone)]
pub enum FkCheck {
    /// Safe to enable.
    Clean,
    /// Referenced table does not exist on the target.
    MissingReferencedTable,
    /// Referencing rows with no match; the constraint must be skipped.
    Orphaned { count: i64, samples: Vec<String> },
}

/// Validates foreign keys against loaded target data.
pub struct FkValidator {
    pub target: Arc<MysqlTargetPool>,
}

impl FkValidator {
    /// Check one foreign key on `table`.
    pub async fn check(&self, table: &str, fk: &ForeignKey) -> Result<FkCheck> {
        if !self.target.table_exists(&fk.ref_table).await? {
            warn!(
                "{}: skipping {} - referenced table `{}` does not exist",
                table, fk.name, fk.ref_table
            );
            return Ok(FkCheck::MissingReferencedTable);
        }

        let count = self
            .target
            .query_scalar_i64(&orphan_query(table, fk, None)?)
            .await?;
        if count == 0 {
            return Ok(FkCheck::Clean);
        }

        let rows = self
            .target
            .fetch_text_rows(&orphan_query(table, fk, Some(SAMPLE_LIMIT))?)
            .await?;
        let samples: Vec<String> = rows
            .iter()
            .map(|row| {
                let tuple: Vec<&str> = row
                    .iter()
                    .map(|v| v.as_deref().unwrap_or("NULL"))
                    .collect();
                format!("({})", tuple.join(", "))
            })
            .collect();

        warn!(
            "{}: skipping {} - {} orphaned rows reference `{}`; samples: {}",
            table,
            fk.name,
            count,
            fk.ref_table,
            samples.join(" ")
        );

        Ok(FkCheck::Orphaned { count, samples })
    }
}

/// Build the orphan query; with a limit it selects sample tuples, without
/// one it counts.
///
/// NULLs in the referencing columns are permitted by SQL foreign-key
/// semantics, so only all-non-NULL tuples can be orphans. The referenced
/// columns are a key, so a NULL on the parent side marks "no match".
fn orphan_query(table: &str, fk: &ForeignKey, limit: Option<usize>) -> Result<String> {
    let my = Dialect::Mysql;
    let child = my.quote(table)?;
    let parent = my.quote(&fk.ref_table)?;

    let join_on = fk
        .columns
        .iter()
        .zip(&fk.ref_columns)
        .map(|(local, referenced)| {
            Ok(format!(
                "c.{} = p.{}",
                my.quote(local)?,
                my.quote(referenced)?
            ))
        })
        .collect::<Result<Vec<_>>>()?
        .join(" AND ");

    let mut conditions: Vec<String> = fk
        .columns
        .iter()
        .map(|local| Ok(format!("c.{} IS NOT NULL", my.quote(local)?)))
        .collect::<Result<Vec<_>>>()?;
    let first_ref = fk.ref_columns.first().map(String::as_str).unwrap_or("");
    conditions.push(format!("p.{} IS NULL", my.quote(first_ref)?));

    let select = match limit {
        None => "COUNT(*)".to_string(),
        Some(_) => fk
            .columns
            .iter()
            .map(|local| Ok(format!("DISTINCT CAST(c.{} AS CHAR)", my.quote(local)?)))
            .collect::<Result<Vec<_>>>()?
            .join(", "),
    };

    let mut sql = format!(
        "SELECT {} FROM {} c LEFT JOIN {} p ON {} WHERE {}",
        select,
        child,
        parent,
        join_on,
        conditions.join(" AND ")
    );
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReferentialAction;

    fn make_fk() -> ForeignKey {
        ForeignKey {
            name: "fk_orders_user".into(),
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec!["id".into()],
            on_update: ReferentialAction::NoAction,
            on_delete: ReferentialAction::Restrict,
        }
    }

    #[test]
    fn test_orphan_count_query_shape() {
        let sql = orphan_query("orders", &make_fk(), None).unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM `orders` c LEFT JOIN `users` p ON c.`user_id` = p.`id` \
             WHERE c.`user_id` IS NOT NULL AND p.`id` IS NULL"
        );
    }

    #[test]
    fn test_orphan_sample_query_shape() {
        let sql = orphan_query("orders", &make_fk(), Some(10)).unwrap();
        assert!(sql.starts_with("SELECT DISTINCT CAST(c.`user_id` AS CHAR) FROM `orders` c"));
        assert!(sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_composite_key_orphan_query() {
        let fk = ForeignKey {
            name: "fk_lines".into(),
            columns: vec!["order_id".into(), "region".into()],
            ref_table: "orders".into(),
            ref_columns: vec!["id".into(), "region".into()],
            on_update: ReferentialAction::NoAction,
            on_delete: ReferentialAction::NoAction,
        };
        let sql = orphan_query("order_lines", &fk, None).unwrap();
        assert!(sql.contains("c.`order_id` = p.`id` AND c.`region` = p.`region`"));
        assert!(sql.contains("c.`order_id` IS NOT NULL AND c.`region` IS NOT NULL"));
        assert!(sql.contains("p.`id` IS NULL"));
    }
}
