//! Type mapping from PostgreSQL to MySQL/MariaDB.
//!
//! Two pure layers: [`map_type`] translates a column's declared type into the
//! target type string, and [`translate_default`] rewrites PostgreSQL-rendered
//! default expressions into target-acceptable ones (or drops them). Per-row
//! value conversion lives in [`convert`].

pub mod convert;

use crate::core::Column;

/// Result of a type mapping operation.
#[derive(Debug, Clone)]
pub struct TypeMapping {
    /// The target type string, possibly including `AUTO_INCREMENT`.
    pub target_type: String,
    /// Whether the mapping loses data, precision, or functionality.
    pub is_lossy: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless type mapping.
    pub fn lossless(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy type mapping with a warning.
    pub fn lossy(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// Map a PostgreSQL type to its MySQL equivalent.
///
/// Total over all inputs: unrecognized types fall back to `LONGTEXT` rather
/// than failing the run.
pub fn map_type(data_type: &str, max_length: i32, _precision: i32, _scale: i32) -> TypeMapping {
    let lower = data_type.trim().to_lowercase();

    // Array types are stored as JSON documents on the target.
    if lower.ends_with("[]") || lower.starts_with('_') {
        return TypeMapping::lossy(
            "JSON",
            format!(
                "Array type '{}' stored as JSON. Array operators unavailable on the target.",
                data_type
            ),
        );
    }

    // Strip a parenthesized suffix: the catalog supplies length/precision
    // through dedicated columns.
    let base = lower.split('(').next().unwrap_or(&lower).trim();

    match base {
        // Integer types
        "int2" | "smallint" => TypeMapping::lossless("SMALLINT"),
        "int4" | "integer" | "int" => TypeMapping::lossless("INT"),
        "int8" | "bigint" => TypeMapping::lossless("BIGINT"),
        "serial" => TypeMapping::lossless("INT AUTO_INCREMENT"),
        "bigserial" => TypeMapping::lossless("BIGINT AUTO_INCREMENT"),
        "smallserial" => TypeMapping::lossless("SMALLINT AUTO_INCREMENT"),

        // Arbitrary-precision numerics collapse to one wide fixed form.
        // Source systems routinely declare NUMERIC without a scale, which the
        // catalog reports as scale 0 even when fractional values are stored;
        // a single DECIMAL(20,10) is the minimum-surprise target shape.
        "numeric" | "decimal" => TypeMapping::lossy(
            "DECIMAL(20,10)",
            "NUMERIC coerced to DECIMAL(20,10); values beyond 10 integer or 10 fractional digits lose precision.",
        ),

        // Floating point
        "float4" | "real" => TypeMapping::lossless("FLOAT"),
        "float8" | "double precision" => TypeMapping::lossless("DOUBLE"),

        // String types
        "varchar" | "character varying" => {
            if max_length > 0 && max_length <= 65535 {
                TypeMapping::lossless(format!("VARCHAR({})", max_length))
            } else {
                TypeMapping::lossless("LONGTEXT")
            }
        }
        "char" | "character" | "bpchar" => {
            if max_length > 255 {
                TypeMapping::lossy(
                    format!("VARCHAR({})", max_length.min(65535)),
                    format!(
                        "CHAR({}) exceeds the target CHAR limit; padding semantics are lost.",
                        max_length
                    ),
                )
            } else if max_length > 0 {
                TypeMapping::lossless(format!("CHAR({})", max_length))
            } else {
                TypeMapping::lossless("CHAR(1)")
            }
        }
        "text" | "name" | "citext" => TypeMapping::lossless("LONGTEXT"),

        // Binary
        "bytea" => TypeMapping::lossless("LONGBLOB"),

        // Date/time
        "date" => TypeMapping::lossless("DATE"),
        "time" | "timetz" | "time without time zone" | "time with time zone" => {
            TypeMapping::lossless("TIME")
        }
        "timestamp" | "timestamp without time zone" => TypeMapping::lossless("DATETIME"),
        "timestamptz" | "timestamp with time zone" => TypeMapping::lossy(
            "DATETIME",
            "Timezone information is discarded; values are stored as rendered by the source session.",
        ),
        "interval" => TypeMapping::lossy(
            "TIME",
            "Intervals are stored as TIME; components beyond hours/minutes/seconds are lost.",
        ),

        // Boolean
        "bool" | "boolean" => TypeMapping::lossless("BOOLEAN"),

        // Documents
        "json" | "jsonb" => TypeMapping::lossless("JSON"),

        // UUID
        "uuid" => TypeMapping::lossless("CHAR(36)"),

        // Defensive fallback
        _ => TypeMapping::lossy(
            "LONGTEXT",
            format!("Unknown PostgreSQL type '{}' stored as LONGTEXT.", data_type),
        ),
    }
}

/// Map a column, taking its catalog length/precision into account.
pub fn map_column(col: &Column) -> TypeMapping {
    map_type(&col.data_type, col.max_length, col.precision, col.scale)
}

/// Translate a PostgreSQL-rendered default expression to target SQL.
///
/// Returns `None` when the default cannot be carried over safely; dropping a
/// default is always preferable to emitting invalid target SQL. Sequence
/// defaults are dropped because sequence-backed columns become
/// `AUTO_INCREMENT` on the target.
pub fn translate_default(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Sequence references, in either catalog rendering.
    if trimmed.ends_with("::regclass") {
        return None;
    }
    if trimmed.to_lowercase().starts_with("nextval(") {
        return None;
    }

    // Quoted literal, possibly with a trailing cast: 'abc'::character varying
    if let Some((literal, rest)) = split_leading_string_literal(trimmed) {
        if rest.is_empty() || rest.starts_with("::") {
            return Some(format!("'{}'", literal.replace('\'', "''")));
        }
        return None;
    }

    let lower = trimmed.to_lowercase();

    // Current-time functions.
    if lower == "now()" || lower == "current_timestamp" || lower == "current_timestamp()" {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    if lower == "current_date" {
        return Some("CURRENT_DATE".to_string());
    }

    // Boolean literals.
    if lower == "true" {
        return Some("TRUE".to_string());
    }
    if lower == "false" {
        return Some("FALSE".to_string());
    }

    // Signed integer or decimal literal.
    if is_numeric_literal(trimmed) {
        return Some(trimmed.to_string());
    }

    // Anything else (function calls, casts of expressions) is dropped.
    None
}

/// Split a leading single-quoted literal off an expression.
///
/// Returns the unescaped literal body and the remainder after the closing
/// quote. `''` inside the literal is a quote escape.
fn split_leading_string_literal(s: &str) -> Option<(String, &str)> {
    let rest = s.strip_prefix('\'')?;
    let mut body = String::new();
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                body.push('\'');
                i += 2;
                continue;
            }
            return Some((body, &rest[i + 1..]));
        }
        let ch = rest[i..].chars().next()?;
        body.push(ch);
        i += ch.len_utf8();
    }
    None
}

/// Check for a bare signed integer or decimal literal.
fn is_numeric_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').or_else(|| s.strip_prefix('+')).unwrap_or(s);
    if unsigned.is_empty() {
        return false;
    }
    let mut seen_dot = false;
    let mut seen_digit = false;
    for ch in unsigned.chars() {
        match ch {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    seen_digit
}
