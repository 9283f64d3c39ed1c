//! Core types shared across the migration engine.

pub mod dialect;
pub mod schema;
pub mod value;

pub use dialect::Dialect;
pub use schema::{
    Column, Cursor, ForeignKey, Index, IndexColumn, PgColumnKind, PkValue, ReferentialAction,
    TableRef, TableSchema,
};
pub use value::SqlValue;
