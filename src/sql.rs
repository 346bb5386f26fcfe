//! SQL utilities for PostgreSQL identifier and literal handling.

/// Quote a PostgreSQL identifier unconditionally.
///
/// Always wraps the identifier in double quotes and escapes any embedded
/// double quotes by doubling them. Extension names are quoted this way, so
/// `uuid-ossp` works without special casing.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a string as a PostgreSQL literal (single quotes, embedded quotes doubled).
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Databases visited during extension handling: everything except template0
/// and databases that refuse connections.
pub const LIST_DATABASES_SQL: &str = "SELECT datname FROM pg_database \
     WHERE datname <> 'template0' AND datallowconn ORDER BY datname";

pub const IN_RECOVERY_SQL: &str = "SELECT pg_is_in_recovery()";

/// Catalog lookup for a single extension, returns `1` when installed.
pub fn extension_exists_sql(extension: &str) -> String {
    format!(
        "SELECT 1 FROM pg_extension WHERE extname = {}",
        quote_literal(extension)
    )
}

pub fn drop_extension_sql(extension: &str) -> String {
    format!("DROP EXTENSION IF EXISTS {}", quote_ident(extension))
}

pub fn create_extension_sql(extension: &str) -> String {
    format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(extension))
}
