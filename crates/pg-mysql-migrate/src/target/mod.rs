//! Target-side access: connection pool, DDL emission, and bulk writer.

pub mod ddl;
pub mod mysql;

pub use ddl::DdlOptions;
pub use mysql::{MysqlTargetPool, WriteSession, WriteStats};
