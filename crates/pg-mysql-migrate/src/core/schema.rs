//! Schema and metadata types for source tables, columns, indexes, and constraints.
//!
//! These types are extracted once from the PostgreSQL catalogs and carried
//! through the whole run; the hot per-row paths dispatch on [`PgColumnKind`]
//! instead of re-matching type-name strings.

use serde::{Deserialize, Serialize};

/// Identity of a source table: PostgreSQL namespace plus relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Fully qualified `schema.table` form, used in logs and reports.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Closed tag for a column's PostgreSQL base type.
///
/// Computed once per column during schema read so value conversion and
/// select-list shaping never match on type-name strings per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Varchar,
    Char,
    Text,
    Bytea,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Json,
    Uuid,
    Array,
    Other,
}

impl PgColumnKind {
    /// Classify a catalog `udt_name` (or spelled-out type name).
    ///
    /// Array types appear in `udt_name` with a leading underscore and in
    /// spelled form with a `[]` suffix; both are collapsed to `Array`.
    pub fn from_type_name(name: &str) -> Self {
        let lower = name.trim().to_lowercase();
        if lower.starts_with('_') || lower.ends_with("[]") {
            return PgColumnKind::Array;
        }
        // Strip a parenthesized length/precision suffix, e.g. "varchar(64)".
        let base = lower.split('(').next().unwrap_or(&lower).trim();
        match base {
            "bool" | "boolean" => PgColumnKind::Bool,
            "int2" | "smallint" | "smallserial" => PgColumnKind::Int2,
            "int4" | "integer" | "int" | "serial" => PgColumnKind::Int4,
            "int8" | "bigint" | "bigserial" => PgColumnKind::Int8,
            "float4" | "real" => PgColumnKind::Float4,
            "float8" | "double precision" => PgColumnKind::Float8,
            "numeric" | "decimal" => PgColumnKind::Numeric,
            "varchar" | "character varying" => PgColumnKind::Varchar,
            "char" | "character" | "bpchar" => PgColumnKind::Char,
            "text" | "name" | "citext" => PgColumnKind::Text,
            "bytea" => PgColumnKind::Bytea,
            "date" => PgColumnKind::Date,
            "time" | "timetz" | "time without time zone" | "time with time zone" => {
                PgColumnKind::Time
            }
            "timestamp" | "timestamp without time zone" => PgColumnKind::Timestamp,
            "timestamptz" | "timestamp with time zone" => PgColumnKind::TimestampTz,
            "interval" => PgColumnKind::Interval,
            "json" | "jsonb" => PgColumnKind::Json,
            "uuid" => PgColumnKind::Uuid,
            _ => PgColumnKind::Other,
        }
    }

    /// Whether values of this kind hold calendar dates (used by the writer's
    /// problematic-column diagnostic).
    pub fn is_datelike(self) -> bool {
        matches!(
            self,
            PgColumnKind::Date | PgColumnKind::Timestamp | PgColumnKind::TimestampTz
        )
    }
}

/// Column metadata as extracted from `information_schema.columns`.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Raw source type name (`udt_name`).
    pub data_type: String,

    /// Closed type tag for per-row dispatch.
    pub kind: PgColumnKind,

    /// Maximum length for string types (0 when not applicable).
    pub max_length: i32,

    /// Numeric precision (0 when not applicable).
    pub precision: i32,

    /// Numeric scale (0 when not applicable).
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Raw PostgreSQL-rendered default expression, if any.
    pub default_expr: Option<String>,

    /// Ordinal position (1-based).
    pub ordinal: i32,
}

/// A single indexed column with its sort direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    /// Derived from bit 0 of the per-column `indoption` entry.
    pub descending: bool,
}

/// Index metadata (primary-key indexes are excluded at extraction).
#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub is_unique: bool,
    /// PostgreSQL access method name (btree, hash, gin, ...).
    pub method: String,
    /// Key columns in index order.
    pub columns: Vec<IndexColumn>,
}

/// Referential action for foreign keys.
///
/// Anything the catalog reports that is not recognized normalizes to
/// `Restrict`, the most conservative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" | "SET_NULL" => ReferentialAction::SetNull,
            "SET DEFAULT" | "SET_DEFAULT" => ReferentialAction::SetDefault,
            "NO ACTION" | "NO_ACTION" => ReferentialAction::NoAction,
            "RESTRICT" => ReferentialAction::Restrict,
            _ => ReferentialAction::Restrict,
        }
    }

    /// SQL rendering for the target dialect.
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub name: String,
    /// Referencing columns, in constraint order.
    pub columns: Vec<String>,
    /// Referenced table name (target namespace is flat, so no schema).
    pub ref_table: String,
    /// Referenced columns, matching `columns` by position.
    pub ref_columns: Vec<String>,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

/// Complete extracted schema for one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: TableRef,
    pub columns: Vec<Column>,
    /// Primary key column names in key order; empty when no PK exists.
    pub primary_key: Vec<String>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    /// On-disk size from `pg_total_relation_size`, drives smallest-first
    /// table ordering.
    pub size_bytes: i64,
}

impl TableSchema {
    /// Single-column primary key name, when cursor pagination is possible.
    pub fn single_pk(&self) -> Option<&str> {
        if self.primary_key.len() == 1 {
            Some(&self.primary_key[0])
        } else {
            None
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Check that every PK, index, and FK column name exists in `columns`.
    ///
    /// Catalog joins can silently drop rows under concurrent DDL; a schema
    /// that fails this check must not drive DDL emission or streaming.
    pub fn is_self_consistent(&self) -> bool {
        let has = |name: &str| self.columns.iter().any(|c| c.name == name);
        self.primary_key.iter().all(|c| has(c))
            && self
                .indexes
                .iter()
                .all(|ix| ix.columns.iter().all(|c| has(&c.name)))
            && self
                .foreign_keys
                .iter()
                .all(|fk| fk.columns.iter().all(|c| has(c)))
    }
}

/// A primary-key (or offset) position of various types.
///
/// Integer keys cover the serial/int families; everything else (uuid, text
/// keys) travels as its string rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PkValue {
    Int(i64),
    Text(String),
}

impl PkValue {
    /// Render as a SQL literal for cursor WHERE clauses.
    ///
    /// Single quotes are doubled; identifiers never pass through here.
    pub fn to_sql_literal(&self) -> String {
        match self {
            PkValue::Int(v) => v.to_string(),
            PkValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }
}

impl std::fmt::Display for PkValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PkValue::Int(v) => write!(f, "{}", v),
            PkValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Cursor position for keyset pagination.
///
/// `Start` means "from the beginning": the first fetch omits the
/// `pk > value` clause entirely, so tables with non-positive or string
/// keys never lose their first rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    Start,
    At(PkValue),
}

impl Cursor {
    pub fn position(&self) -> Option<&PkValue> {
        match self {
            Cursor::Start => None,
            Cursor::At(v) => Some(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_udt_names() {
        assert_eq!(PgColumnKind::from_type_name("int4"), PgColumnKind::Int4);
        assert_eq!(PgColumnKind::from_type_name("bigint"), PgColumnKind::Int8);
        assert_eq!(PgColumnKind::from_type_name("bpchar"), PgColumnKind::Char);
        assert_eq!(
            PgColumnKind::from_type_name("character varying"),
            PgColumnKind::Varchar
        );
        assert_eq!(
            PgColumnKind::from_type_name("timestamptz"),
            PgColumnKind::TimestampTz
        );
        assert_eq!(PgColumnKind::from_type_name("jsonb"), PgColumnKind::Json);
    }

    #[test]
    fn test_kind_arrays() {
        assert_eq!(PgColumnKind::from_type_name("_int4"), PgColumnKind::Array);
        assert_eq!(
            PgColumnKind::from_type_name("integer[]"),
            PgColumnKind::Array
        );
        assert_eq!(PgColumnKind::from_type_name("_text"), PgColumnKind::Array);
    }

    #[test]
    fn test_kind_parenthesized_and_unknown() {
        assert_eq!(
            PgColumnKind::from_type_name("varchar(64)"),
            PgColumnKind::Varchar
        );
        assert_eq!(
            PgColumnKind::from_type_name("hstore"),
            PgColumnKind::Other
        );
    }

    #[test]
    fn test_referential_action_parse() {
        assert_eq!(
            ReferentialAction::parse("CASCADE"),
            ReferentialAction::Cascade
        );
        assert_eq!(
            ReferentialAction::parse("set null"),
            ReferentialAction::SetNull
        );
        assert_eq!(
            ReferentialAction::parse("NO ACTION"),
            ReferentialAction::NoAction
        );
        // Unknown actions normalize to the most conservative one.
        assert_eq!(
            ReferentialAction::parse("FROBNICATE"),
            ReferentialAction::Restrict
        );
    }

    #[test]
    fn test_pk_value_literals() {
        assert_eq!(PkValue::Int(42).to_sql_literal(), "42");
        assert_eq!(PkValue::Int(-3).to_sql_literal(), "-3");
        assert_eq!(
            PkValue::Text("O'Brien".into()).to_sql_literal(),
            "'O''Brien'"
        );
    }

    #[test]
    fn test_pk_value_serde_round_trip() {
        let v = PkValue::Int(123);
        let json = serde_json::to_string(&v).unwrap();
        let back: PkValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);

        let v = PkValue::Text("ab'c".into());
        let json = serde_json::to_string(&v).unwrap();
        let back: PkValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_cursor_start_has_no_position() {
        assert!(Cursor::Start.position().is_none());
        assert_eq!(
            Cursor::At(PkValue::Int(7)).position(),
            Some(&PkValue::Int(7))
        );
    }

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
    fn test_schema_self_consistency() {
        let mut schema = TableSchema {
            table: TableRef::new("public", "users"),
            columns: vec![make_column("id", "int4"), make_column("name", "varchar")],
            primary_key: vec!["id".into()],
            indexes: vec![Index {
                name: "idx_name".into(),
                is_unique: false,
                method: "btree".into(),
                columns: vec![IndexColumn {
                    name: "name".into(),
                    descending: false,
                }],
            }],
            foreign_keys: vec![],
            size_bytes: 0,
        };
        assert!(schema.is_self_consistent());

        schema.primary_key = vec!["missing".into()];
        assert!(!schema.is_self_consistent());
    }

    #[test]
    fn test_column_lookup() {
        let schema = TableSchema {
            table: TableRef::new("public", "users"),
            columns: vec![make_column("id", "int4"), make_column("name", "varchar")],
            primary_key: vec!["id".into()],
            indexes: vec![],
            foreign_keys: vec![],
            size_bytes: 0,
        };
        assert_eq!(schema.column("name").map(|c| c.kind), Some(PgColumnKind::Varchar));
        assert!(schema.column("missing").is_none());
    }

    #[test]
    fn test_single_pk() {
        let schema = TableSchema {
            table: TableRef::new("public", "t"),
            columns: vec![make_column("a", "int4"), make_column("b", "int4")],
            primary_key: vec!["a".into(), "b".into()],
            indexes: vec![],
            foreign_keys: vec![],
            size_bytes: 0,
        };
        assert!(schema.single_pk().is_none());
    }
}
