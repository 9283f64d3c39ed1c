//! DDL generation for the MySQL/MariaDB target.
//!
//! Pure string builders; execution lives in [`crate::target::mysql`]. The
//! target namespace is flat, so emitted statements reference bare table
//! names inside the connected database.

use crate::core::{Dialect, ForeignKey, Index, PgColumnKind, TableSchema};
use crate::error::{MigrateError, Result};
use crate::typemap::{map_column, translate_default};
use tracing::warn;

/// Table-level options carried from the target configuration.
#[derive(Debug, Clone)]
pub struct DdlOptions {
    pub charset: String,
    pub collation: String,
}

impl Default for DdlOptions {
    fn default() -> Self {
        Self {
            charset: "utf8mb4".to_string(),
            collation: "utf8mb4_unicode_ci".to_string(),
        }
    }
}

/// Emit `CREATE TABLE IF NOT EXISTS` for a table.
///
/// Integer columns whose source default is a sequence become
/// `AUTO_INCREMENT` (only for primary-key members, since the target requires
/// auto-increment columns to be keyed, and only one per table).
pub fn create_table(schema: &TableSchema, opts: &DdlOptions) -> Result<String> {
    if schema.columns.is_empty() {
        return Err(MigrateError::EmptySchema(schema.table.full_name()));
    }

    let my = Dialect::Mysql;
    let mut auto_increment_used = false;
    let mut col_defs = Vec::with_capacity(schema.columns.len());

    for col in &schema.columns {
        let mapping = map_column(col);
        if let Some(warning) = &mapping.warning {
            warn!("{}.{}: {}", schema.table, col.name, warning);
        }

        let mut target_type = mapping.target_type;
        let mut is_auto_increment = target_type.ends_with("AUTO_INCREMENT");

        let sequence_default = col
            .default_expr
            .as_deref()
            .map(is_sequence_default)
            .unwrap_or(false);
        if sequence_default
            && !is_auto_increment
            && !auto_increment_used
            && is_integer_kind(col.kind)
            && schema.primary_key.contains(&col.name)
        {
            target_type.push_str(" AUTO_INCREMENT");
            is_auto_increment = true;
        }
        if is_auto_increment {
            auto_increment_used = true;
        }

        let mut def = format!("{} {}", my.quote(&col.name)?, target_type);
        if !col.is_nullable {
            def.push_str(" NOT NULL");
        }
        if !is_auto_increment {
            if let Some(default) = col.default_expr.as_deref().and_then(translate_default) {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
        col_defs.push(def);
    }

    if !schema.primary_key.is_empty() {
        col_defs.push(format!(
            "PRIMARY KEY ({})",
            my.quote_list(&schema.primary_key)?
        ));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET={} COLLATE={}",
        my.quote(&schema.table.name)?,
        col_defs.join(",\n    "),
        opts.charset,
        opts.collation
    ))
}

/// Emit `CREATE [UNIQUE] INDEX` with per-column directions.
pub fn create_index(table_name: &str, index: &Index) -> Result<String> {
    let my = Dialect::Mysql;
    let cols = index
        .columns
        .iter()
        .map(|c| {
            Ok(format!(
                "{} {}",
                my.quote(&c.name)?,
                if c.descending { "DESC" } else { "ASC" }
            ))
        })
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    Ok(format!(
        "CREATE {}INDEX {} ON {} ({}) USING {}",
        if index.is_unique { "UNIQUE " } else { "" },
        my.quote(&index.name)?,
        my.quote(table_name)?,
        cols,
        index_method(&index.method)
    ))
}

/// Emit `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`.
pub fn add_foreign_key(table_name: &str, fk: &ForeignKey) -> Result<String> {
    let my = Dialect::Mysql;
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
        my.quote(table_name)?,
        my.quote(&fk.name)?,
        my.quote_list(&fk.columns)?,
        my.quote(&fk.ref_table)?,
        my.quote_list(&fk.ref_columns)?,
        fk.on_update.as_sql(),
        fk.on_delete.as_sql()
    ))
}

/// Map a PostgreSQL access method to one the target supports.
fn index_method(method: &str) -> &'static str {
    match method.to_lowercase().as_str() {
        "hash" => "HASH",
        // gin, gist, spgist, brin have no target equivalent.
        _ => "BTREE",
    }
}

fn is_integer_kind(kind: PgColumnKind) -> bool {
    matches!(
        kind,
        PgColumnKind::Int2 | PgColumnKind::Int4 | PgColumnKind::Int8
    )
}

/// Sequence-backed defaults, in either catalog rendering.
fn is_sequence_default(default: &str) -> bool {
    let trimmed = default.trim();
    trimmed.to_lowercase().starts_with("nextval(") || trimmed.ends_with("::regclass")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, IndexColumn, ReferentialAction, TableRef};

    fn make_column(name: &str, data_type: &str, nullable: bool, default: Option<&str>) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            kind: PgColumnKind::from_type_name(data_type),
            max_length: if data_type == "varchar" { 64 } else { 0 },
            precision: 0,
            scale: 0,
            is_nullable: nullable,
            default_expr: default.map(String::from),
            ordinal: 1,
        }
    }

    fn users_schema() -> TableSchema {
        TableSchema {
            table: TableRef::new("public", "users"),
            columns: vec![
                make_column(
                    "id",
                    "int4",
                    false,
                    Some("nextval('users_id_seq'::regclass)"),
                ),
                make_column("name", "varchar", true, None),
                make_column("created_at", "timestamp", true, None),
            ],
            primary_key: vec!["id".into()],
            indexes: vec![],
            foreign_keys: vec![],
            size_bytes: 0,
        }
    }

    #[test]
    fn test_create_table_basic_shape() {
        let sql = create_table(&users_schema(), &DdlOptions::default()).unwrap();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `users` (\n"));
        assert!(sql.contains("`id` INT AUTO_INCREMENT NOT NULL"));
        assert!(sql.contains("`name` VARCHAR(64)"));
        assert!(sql.contains("`created_at` DATETIME"));
        assert!(sql.contains("PRIMARY KEY (`id`)"));
        assert!(sql.ends_with(
            ") ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        ));
    }

    #[test]
    fn test_sequence_default_not_emitted_as_default() {
        let sql = create_table(&users_schema(), &DdlOptions::default()).unwrap();
        assert!(!sql.contains("DEFAULT nextval"));
        assert!(!sql.contains("regclass"));
    }

    #[test]
    fn test_auto_increment_requires_pk_membership() {
        let mut schema = users_schema();
        // Sequence default on a non-key column must not become AUTO_INCREMENT.
        schema.columns[0].default_expr = None;
        schema.columns.push(make_column(
            "counter",
            "int8",
            true,
            Some("nextval('counter_seq'::regclass)"),
        ));
        let sql = create_table(&schema, &DdlOptions::default()).unwrap();
        assert!(!sql.contains("`counter` BIGINT AUTO_INCREMENT"));
        assert!(sql.contains("`counter` BIGINT"));
    }

    #[test]
    fn test_translated_defaults_are_emitted() {
        let mut schema = users_schema();
        schema.columns.push(make_column(
            "status",
            "varchar",
            false,
            Some("'active'::character varying"),
        ));
        schema
            .columns
            .push(make_column("updated_at", "timestamp", true, Some("now()")));
        let sql = create_table(&schema, &DdlOptions::default()).unwrap();
        assert!(sql.contains("`status` VARCHAR(64) NOT NULL DEFAULT 'active'"));
        assert!(sql.contains("`updated_at` DATETIME DEFAULT CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_empty_schema_rejected() {
        let schema = TableSchema {
            table: TableRef::new("public", "empty"),
            columns: vec![],
            primary_key: vec![],
            indexes: vec![],
            foreign_keys: vec![],
            size_bytes: 0,
        };
        assert!(matches!(
            create_table(&schema, &DdlOptions::default()),
            Err(MigrateError::EmptySchema(_))
        ));
    }

    #[test]
    fn test_charset_and_collation_from_options() {
        let opts = DdlOptions {
            charset: "utf8mb4".into(),
            collation: "utf8mb4_general_ci".into(),
        };
        let sql = create_table(&users_schema(), &opts).unwrap();
        assert!(sql.ends_with("COLLATE=utf8mb4_general_ci"));
    }

    #[test]
    fn test_create_index_directions() {
        let index = Index {
            name: "idx_users_name".into(),
            is_unique: false,
            method: "btree".into(),
            columns: vec![
                IndexColumn {
                    name: "name".into(),
                    descending: false,
                },
                IndexColumn {
                    name: "created_at".into(),
                    descending: true,
                },
            ],
        };
        let sql = create_index("users", &index).unwrap();
        assert_eq!(
            sql,
            "CREATE INDEX `idx_users_name` ON `users` (`name` ASC, `created_at` DESC) USING BTREE"
        );
    }

    #[test]
    fn test_create_unique_index() {
        let index = Index {
            name: "uq_email".into(),
            is_unique: true,
            method: "btree".into(),
            columns: vec![IndexColumn {
                name: "email".into(),
                descending: false,
            }],
        };
        let sql = create_index("users", &index).unwrap();
        assert!(sql.starts_with("CREATE UNIQUE INDEX `uq_email`"));
    }

    #[test]
    fn test_unsupported_access_methods_map_to_btree() {
        for method in ["gin", "gist", "spgist", "brin", "bloom"] {
            assert_eq!(index_method(method), "BTREE", "method {}", method);
        }
        assert_eq!(index_method("hash"), "HASH");
        assert_eq!(index_method("btree"), "BTREE");
    }

    #[test]
    fn test_add_foreign_key() {
        let fk = ForeignKey {
            name: "fk_orders_user".into(),
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec!["id".into()],
            on_update: ReferentialAction::Cascade,
            on_delete: ReferentialAction::SetNull,
        };
        let sql = add_foreign_key("orders", &fk).unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE `orders` ADD CONSTRAINT `fk_orders_user` FOREIGN KEY (`user_id`) \
             REFERENCES `users` (`id`) ON UPDATE CASCADE ON DELETE SET NULL"
        );
    }

    #[test]
    fn test_composite_foreign_key() {
        let fk = ForeignKey {
            name: "fk_lines_order".into(),
            columns: vec!["order_id".into(), "region".into()],
            ref_table: "orders".into(),
            ref_columns: vec!["id".into(), "region".into()],
            on_update: ReferentialAction::NoAction,
            on_delete: ReferentialAction::Restrict,
        };
        let sql = add_foreign_key("order_lines", &fk).unwrap();
        assert!(sql.contains("FOREIGN KEY (`order_id`, `region`)"));
        assert!(sql.contains("REFERENCES `orders` (`id`, `region`)"));
        assert!(sql.ends_with("ON UPDATE NO ACTION ON DELETE RESTRICT"));
    }
}
