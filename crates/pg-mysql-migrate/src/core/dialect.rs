//! Identifier quoting for the two SQL dialects in play.
//!
//! Two quoting schemes coexist in this tool: PostgreSQL double quotes on the
//! source side and MySQL backticks on the target side. Quoting is modeled as
//! a small capability object passed to the SQL builders instead of free
//! functions, so a builder can never mix schemes by accident.
//!
//! Identifiers cannot be parameterized in prepared statements; validation
//! plus dialect-specific escaping is the only safe way to splice them into
//! dynamic SQL.

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across both databases:
/// PostgreSQL allows 63 bytes, MySQL 64 characters).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// SQL dialect selector for identifier quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL: `"identifier"`, embedded double quotes doubled.
    Pg,
    /// MySQL/MariaDB: `` `identifier` ``, embedded backticks doubled.
    Mysql,
}

impl Dialect {
    /// Quote a single identifier after validating it.
    pub fn quote(&self, name: &str) -> Result<String> {
        validate_identifier(name)?;
        Ok(match self {
            Dialect::Pg => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        })
    }

    /// Quote a `schema.table` pair.
    pub fn qualify(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("{}.{}", self.quote(schema)?, self.quote(table)?))
    }

    /// Quote a comma-separated column list.
    pub fn quote_list(&self, names: &[String]) -> Result<String> {
        let quoted: Result<Vec<String>> = names.iter().map(|n| self.quote(n)).collect();
        Ok(quoted?.join(", "))
    }

    /// Render a string as a SQL string literal (single quotes doubled).
    ///
    /// Used for cursor positions and filter bounds, which travel inside
    /// dynamically built queries.
    pub fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Validate an identifier before it is spliced into SQL.
///
/// Rejects empty names, embedded null bytes, and names exceeding the
/// cross-database maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_pg() {
        assert_eq!(Dialect::Pg.quote("users").unwrap(), "\"users\"");
        assert_eq!(
            Dialect::Pg.quote("user\"table").unwrap(),
            "\"user\"\"table\""
        );
    }

    #[test]
    fn test_quote_mysql() {
        assert_eq!(Dialect::Mysql.quote("users").unwrap(), "`users`");
        assert_eq!(
            Dialect::Mysql.quote("table`name").unwrap(),
            "`table``name`"
        );
    }

    #[test]
    fn test_qualify() {
        assert_eq!(
            Dialect::Pg.qualify("public", "users").unwrap(),
            "\"public\".\"users\""
        );
        assert_eq!(
            Dialect::Mysql.qualify("appdb", "users").unwrap(),
            "`appdb`.`users`"
        );
    }

    #[test]
    fn test_quote_list() {
        let cols = vec!["a".to_string(), "b".to_string()];
        assert_eq!(Dialect::Mysql.quote_list(&cols).unwrap(), "`a`, `b`");
    }

    #[test]
    fn test_injection_attempts_are_quoted_not_rejected() {
        let q = Dialect::Mysql
            .quote("Robert`); DROP TABLE Students;--")
            .unwrap();
        assert_eq!(q, "`Robert``); DROP TABLE Students;--`");
    }

    #[test]
    fn test_validation_rejects_bad_identifiers() {
        assert!(Dialect::Pg.quote("").is_err());
        assert!(Dialect::Mysql.quote("a\0b").is_err());
        assert!(Dialect::Pg.quote(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(Dialect::Pg.string_literal("it's"), "'it''s'");
    }
}
