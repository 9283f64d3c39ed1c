//! PostgreSQL source pool and catalog reader.
//!
//! Owns the source connection pool and extracts tables, columns, primary
//! keys, indexes, and foreign keys from the catalogs. All row streaming is
//! in [`crate::source::stream`]; this module only answers metadata and
//! aggregate queries.

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use crate::config::{MigrationConfig, RowFilter, SourceConfig};
use crate::core::{
    Column, Dialect, ForeignKey, Index, IndexColumn, PgColumnKind, ReferentialAction, TableRef,
    TableSchema,
};
use crate::error::{MigrateError, Result};
use crate::source::stream::filter_condition;

/// Namespaces that never hold user tables.
const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema"];

/// PostgreSQL source connection pool and schema reader.
pub struct PgSourcePool {
    pool: Pool,
}

impl PgSourcePool {
    /// Open a lazily-connecting pool and verify one connection.
    pub async fn connect(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL source pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL source connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    pub(crate) async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context.to_string()))
    }

    pub(crate) fn pool(&self) -> Pool {
        self.pool.clone()
    }

    /// Close the pool; outstanding connections drop as they are returned.
    pub fn close(&self) {
        self.pool.close();
    }

    /// List user tables, applying the include/exclude selection.
    ///
    /// Queries `pg_tables` first; if that comes back empty (restricted
    /// catalog privileges), falls back to `information_schema.tables`.
    pub async fn list_tables(
        &self,
        schema: Option<&str>,
        selection: &MigrationConfig,
    ) -> Result<Vec<TableRef>> {
        let client = self.client("listing tables").await?;

        let mut tables = self.list_from_pg_tables(&client, schema).await?;
        if tables.is_empty() {
            debug!("pg_tables returned nothing; falling back to information_schema");
            tables = self.list_from_information_schema(&client, schema).await?;
        }

        tables.retain(|t| selection.is_table_selected(&t.schema, &t.name));
        info!("Selected {} tables for migration", tables.len());
        Ok(tables)
    }

    async fn list_from_pg_tables(
        &self,
        client: &Object,
        schema: Option<&str>,
    ) -> Result<Vec<TableRef>> {
        let base = r#"
            SELECT schemaname, tablename
            FROM pg_catalog.pg_tables
            WHERE schemaname NOT IN ('pg_catalog', 'information_schema')
              AND schemaname NOT LIKE 'pg_toast%'
              AND schemaname NOT LIKE 'pg_temp%'
              AND schemaname NOT LIKE 'pg_toast_temp%'
        "#;
        let rows = match schema {
            Some(s) => {
                let sql = format!("{} AND schemaname = $1 ORDER BY schemaname, tablename", base);
                client.query(&sql, &[&s]).await?
            }
            None => {
                let sql = format!("{} ORDER BY schemaname, tablename", base);
                client.query(&sql, &[]).await?
            }
        };
        Ok(rows
            .iter()
            .map(|r| TableRef::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect())
    }

    async fn list_from_information_schema(
        &self,
        client: &Object,
        schema: Option<&str>,
    ) -> Result<Vec<TableRef>> {
        let base = r#"
            SELECT table_schema, table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema NOT IN ('pg_catalog', 'information_schema')
        "#;
        let rows = match schema {
            Some(s) => {
                let sql = format!("{} AND table_schema = $1 ORDER BY table_schema, table_name", base);
                client.query(&sql, &[&s]).await?
            }
            None => {
                let sql = format!("{} ORDER BY table_schema, table_name", base);
                client.query(&sql, &[]).await?
            }
        };
        Ok(rows
            .iter()
            .map(|r| TableRef::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect())
    }

    /// Read the complete schema of one table.
    pub async fn read_schema(&self, table: &TableRef) -> Result<TableSchema> {
        let columns = self.read_columns(table).await?;
        let primary_key = self.read_primary_key(table).await?;
        let indexes = self.read_indexes(table).await?;
        let foreign_keys = self.read_foreign_keys(table).await?;
        let size_bytes = self.table_size_bytes(table).await?;

        let schema = TableSchema {
            table: table.clone(),
            columns,
            primary_key,
            indexes,
            foreign_keys,
            size_bytes,
        };

        if !schema.is_self_consistent() {
            return Err(MigrateError::schema_read(
                table.full_name(),
                "extracted schema references columns that do not exist (concurrent DDL?)",
            ));
        }

        debug!(
            "Read schema for {}: {} columns, pk={:?}, {} indexes, {} fks, {} bytes",
            table,
            schema.columns.len(),
            schema.primary_key,
            schema.indexes.len(),
            schema.foreign_keys.len(),
            schema.size_bytes
        );
        Ok(schema)
    }

    /// Columns ordered by ordinal position, with the type tag precomputed.
    pub async fn read_columns(&self, table: &TableRef) -> Result<Vec<Column>> {
        let client = self.client("reading columns").await?;

        let query = r#"
            SELECT
                column_name,
                udt_name,
                COALESCE(character_maximum_length, 0)::int4,
                COALESCE(numeric_precision, 0)::int4,
                COALESCE(numeric_scale, 0)::int4,
                CASE WHEN is_nullable = 'YES' THEN true ELSE false END,
                column_default,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client
            .query(query, &[&table.schema, &table.name])
            .await
            .map_err(|e| MigrateError::schema_read(table.full_name(), e))?;

        let columns = rows
            .iter()
            .map(|row| {
                let data_type: String = row.get(1);
                Column {
                    name: row.get(0),
                    kind: PgColumnKind::from_type_name(&data_type),
                    data_type,
                    max_length: row.get(2),
                    precision: row.get(3),
                    scale: row.get(4),
                    is_nullable: row.get(5),
                    default_expr: row.get(6),
                    ordinal: row.get(7),
                }
            })
            .collect();

        Ok(columns)
    }

    /// Ordered primary key column names, or empty when the table has no PK.
    pub async fn read_primary_key(&self, table: &TableRef) -> Result<Vec<String>> {
        let client = self.client("reading primary key").await?;

        let query = r#"
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_name = tc.constraint_name
             AND kcu.table_schema = tc.table_schema
             AND kcu.table_name = tc.table_name
            WHERE tc.table_schema = $1
              AND tc.table_name = $2
              AND tc.constraint_type = 'PRIMARY KEY'
            ORDER BY kcu.ordinal_position
        "#;

        let rows = client
            .query(query, &[&table.schema, &table.name])
            .await
            .map_err(|e| MigrateError::schema_read(table.full_name(), e))?;

        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    /// Non-primary-key indexes with per-column sort direction.
    ///
    /// `indkey` is unnested WITH ORDINALITY so column order is stable, and
    /// the matching `indoption` element is picked by position; bit 0 of
    /// that element is the DESC flag.
    pub async fn read_indexes(&self, table: &TableRef) -> Result<Vec<Index>> {
        let client = self.client("reading indexes").await?;

        let query = r#"
            SELECT
                i.relname AS index_name,
                ix.indisunique,
                am.amname,
                a.attname,
                (ix.indoption[k.ord - 1] & 1)::int4 AS desc_flag
            FROM pg_catalog.pg_index ix
            JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
            JOIN pg_catalog.pg_am am ON am.oid = i.relam
            CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_catalog.pg_attribute a
              ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1
              AND t.relname = $2
              AND NOT ix.indisprimary
            ORDER BY i.relname, k.ord
        "#;

        let rows = client
            .query(query, &[&table.schema, &table.name])
            .await
            .map_err(|e| MigrateError::schema_read(table.full_name(), e))?;

        let mut indexes: Vec<Index> = Vec::new();
        for row in rows {
            let name: String = row.get(0);
            let column = IndexColumn {
                name: row.get(3),
                descending: row.get::<_, i32>(4) & 1 == 1,
            };
            match indexes.last_mut() {
                Some(last) if last.name == name => last.columns.push(column),
                _ => indexes.push(Index {
                    name,
                    is_unique: row.get(1),
                    method: row.get(2),
                    columns: vec![column],
                }),
            }
        }

        Ok(indexes)
    }

    /// Foreign keys grouped by constraint name, column order preserved.
    pub async fn read_foreign_keys(&self, table: &TableRef) -> Result<Vec<ForeignKey>> {
        let client = self.client("reading foreign keys").await?;

        let query = r#"
            SELECT
                tc.constraint_name,
                kcu.column_name,
                ccu.table_name AS ref_table,
                ccu.column_name AS ref_column,
                rc.update_rule,
                rc.delete_rule
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_name = tc.constraint_name
             AND kcu.table_schema = tc.table_schema
            JOIN information_schema.referential_constraints rc
              ON rc.constraint_name = tc.constraint_name
             AND rc.constraint_schema = tc.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.constraint_schema = tc.table_schema
            WHERE tc.table_schema = $1
              AND tc.table_name = $2
              AND tc.constraint_type = 'FOREIGN KEY'
            ORDER BY tc.constraint_name, kcu.ordinal_position
        "#;

        let rows = client
            .query(query, &[&table.schema, &table.name])
            .await
            .map_err(|e| MigrateError::schema_read(table.full_name(), e))?;

        let mut fks: Vec<ForeignKey> = Vec::new();
        for row in rows {
            let name: String = row.get(0);
            let column: String = row.get(1);
            let ref_table: String = row.get(2);
            let ref_column: String = row.get(3);

            match fks.last_mut() {
                Some(last) if last.name == name => {
                    // The join fans out for multi-column keys; keep each
                    // column once, in first-seen (ordinal) order.
                    if !last.columns.contains(&column) {
                        last.columns.push(column);
                    }
                    if !last.ref_columns.contains(&ref_column) {
                        last.ref_columns.push(ref_column);
                    }
                }
                _ => fks.push(ForeignKey {
                    name,
                    columns: vec![column],
                    ref_table,
                    ref_columns: vec![ref_column],
                    on_update: ReferentialAction::parse(row.get::<_, String>(4).as_str()),
                    on_delete: ReferentialAction::parse(row.get::<_, String>(5).as_str()),
                }),
            }
        }

        Ok(fks)
    }

    /// On-disk size of a table, 0 when the relation is missing.
    pub async fn table_size_bytes(&self, table: &TableRef) -> Result<i64> {
        let client = self.client("reading table size").await?;

        let query = r#"
            SELECT COALESCE(pg_total_relation_size(c.oid), 0)::int8
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
        "#;

        let rows = client.query(query, &[&table.schema, &table.name]).await?;
        Ok(rows.first().map(|r| r.get::<_, i64>(0)).unwrap_or(0))
    }

    /// Exact row count, with the row filter applied when present.
    pub async fn count_rows(&self, table: &TableRef, filter: Option<&RowFilter>) -> Result<i64> {
        let client = self.client("counting rows").await?;

        let mut sql = format!(
            "SELECT COUNT(*)::int8 FROM {}",
            Dialect::Pg.qualify(&table.schema, &table.name)?
        );
        if let Some(condition) = filter.map(filter_condition).transpose()?.flatten() {
            sql.push_str(" WHERE ");
            sql.push_str(&condition);
        }

        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    /// Run a query whose select list is all-text and collect the rows.
    ///
    /// Used by the validators, whose normalization expressions render every
    /// column to text on the server.
    pub async fn fetch_text_rows(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let client = self.client("fetching sample rows").await?;
        let rows = client.query(sql, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<_, Option<String>>(i).unwrap_or_else(|e| {
                        warn!("sample column {} not text-decodable: {}", i, e);
                        None
                    }))
                    .collect()
            })
            .collect())
    }

    /// True when `schema` is a namespace users cannot own tables in.
    pub fn is_system_schema(schema: &str) -> bool {
        SYSTEM_SCHEMAS.contains(&schema)
            || schema.starts_with("pg_toast")
            || schema.starts_with("pg_temp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_system_schema() {
        assert!(PgSourcePool::is_system_schema("pg_catalog"));
        assert!(PgSourcePool::is_system_schema("information_schema"));
        assert!(PgSourcePool::is_system_schema("pg_toast"));
        assert!(PgSourcePool::is_system_schema("pg_temp_1"));
        assert!(PgSourcePool::is_system_schema("pg_toast_temp_1"));
        assert!(!PgSourcePool::is_system_schema("public"));
        assert!(!PgSourcePool::is_system_schema("sales"));
    }
}
