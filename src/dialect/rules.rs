//! Per-dialect rewrite rules.

/// How a dialect handles `#temp` tables from canonical SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempTables {
    /// `#name` is understood as is.
    Native,
    /// Session-scoped temporary tables, created with the given keyword.
    SessionLocal(&'static str),
    /// No session temp tables: emulated as `<schema>.<session><name>`.
    Emulated,
}

/// Trait for dialect-specific SQL rewriting.
pub trait DialectRules: Send + Sync {
    /// Bind marker for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Quote an identifier that was written as `[id]`.
    fn quote_identifier(&self, id: &str) -> String {
        format!("\"{}\"", id.replace('"', "\"\""))
    }

    /// Replacement for a canonical function name (upper case), if any.
    fn function_name(&self, name: &str) -> Option<&'static str> {
        match name {
            "ISNULL" => Some("COALESCE"),
            "LEN" => Some("LENGTH"),
            _ => None,
        }
    }

    /// Replacement for `GETDATE()`.
    fn current_timestamp(&self) -> Option<&'static str> {
        Some("CURRENT_TIMESTAMP")
    }

    /// Trailing row limit replacing `TOP n`. `None` means `TOP` is native.
    fn limit_clause(&self, rows: &str) -> Option<String> {
        Some(format!("LIMIT {}", rows))
    }

    fn temp_tables(&self) -> TempTables;
}

pub struct SqlServerRules;

impl DialectRules for SqlServerRules {
    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn quote_identifier(&self, id: &str) -> String {
        format!("[{}]", id)
    }

    fn function_name(&self, _name: &str) -> Option<&'static str> {
        None
    }

    fn current_timestamp(&self) -> Option<&'static str> {
        None
    }

    fn limit_clause(&self, _rows: &str) -> Option<String> {
        None
    }

    fn temp_tables(&self) -> TempTables {
        TempTables::Native
    }
}

/// PostgreSQL and Redshift.
pub struct PostgresRules;

impl DialectRules for PostgresRules {
    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn temp_tables(&self) -> TempTables {
        TempTables::SessionLocal("TEMP")
    }
}

pub struct MySqlRules;

impl DialectRules for MySqlRules {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn quote_identifier(&self, id: &str) -> String {
        format!("`{}`", id.replace('`', "``"))
    }

    fn function_name(&self, name: &str) -> Option<&'static str> {
        match name {
            "ISNULL" => Some("COALESCE"),
            "LEN" => Some("CHAR_LENGTH"),
            _ => None,
        }
    }

    fn temp_tables(&self) -> TempTables {
        TempTables::SessionLocal("TEMPORARY")
    }
}

pub struct SqliteRules;

impl DialectRules for SqliteRules {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn temp_tables(&self) -> TempTables {
        TempTables::SessionLocal("TEMP")
    }
}

pub struct OracleRules;

impl DialectRules for OracleRules {
    fn placeholder(&self, index: usize) -> String {
        // Oracle uses :1, :2, etc.
        format!(":{}", index)
    }

    fn limit_clause(&self, rows: &str) -> Option<String> {
        // 12c+ row limiting
        Some(format!("FETCH FIRST {} ROWS ONLY", rows))
    }

    fn temp_tables(&self) -> TempTables {
        TempTables::Emulated
    }
}

pub struct BigQueryRules;

impl DialectRules for BigQueryRules {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn quote_identifier(&self, id: &str) -> String {
        format!("`{}`", id.replace('`', "\\`"))
    }

    fn temp_tables(&self) -> TempTables {
        TempTables::Emulated
    }
}

pub struct SnowflakeRules;

impl DialectRules for SnowflakeRules {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn temp_tables(&self) -> TempTables {
        TempTables::SessionLocal("TEMPORARY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(PostgresRules.placeholder(2), "$2");
        assert_eq!(SqlServerRules.placeholder(1), "@p1");
        assert_eq!(OracleRules.placeholder(3), ":3");
        assert_eq!(MySqlRules.placeholder(9), "?");
    }

    #[test]
    fn test_identifier_quoting_escapes() {
        assert_eq!(PostgresRules.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(MySqlRules.quote_identifier("order"), "`order`");
        assert_eq!(SqlServerRules.quote_identifier("order"), "[order]");
    }

    #[test]
    fn test_functions() {
        assert_eq!(PostgresRules.function_name("ISNULL"), Some("COALESCE"));
        assert_eq!(MySqlRules.function_name("LEN"), Some("CHAR_LENGTH"));
        assert_eq!(SqlServerRules.function_name("ISNULL"), None);
    }
}
