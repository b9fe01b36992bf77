//! Dialect translation.
//!
//! Templates are written in one canonical dialect (SQL Server). Before
//! execution, [`DialectTranslator`] rewrites a [`RenderedStatement`] into the
//! dialect of the connection it will run on:
//!
//! | Canonical            | PostgreSQL                 | Oracle                          |
//! |----------------------|----------------------------|---------------------------------|
//! | `?`                  | `$1`, `$2`, ...            | `:1`, `:2`, ...                 |
//! | `[name]`             | `"name"`                   | `"name"`                        |
//! | `ISNULL(a, b)`       | `COALESCE(a, b)`           | `COALESCE(a, b)`                |
//! | `SELECT TOP 5 ...`   | `SELECT ... LIMIT 5`       | `SELECT ... FETCH FIRST 5 ROWS ONLY` |
//! | `CREATE TABLE #t`    | `CREATE TEMP TABLE t`      | `CREATE TABLE scratch.s1a2b3ct` |
//!
//! Translation is a pure function of its inputs.

pub mod lexer;
pub mod rules;

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::engine::SqlValue;
use crate::error::{StudyError, StudyResult};
use crate::template::RenderedStatement;
use lexer::Token;
use rules::*;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Dialect {
    #[default]
    SqlServer,
    Postgres,
    Redshift,
    Oracle,
    MySql,
    Sqlite,
    BigQuery,
    Snowflake,
}

impl Dialect {
    /// The dialect templates are authored in.
    pub const CANONICAL: Dialect = Dialect::SqlServer;

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "sql server",
            Dialect::Postgres => "postgresql",
            Dialect::Redshift => "redshift",
            Dialect::Oracle => "oracle",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::BigQuery => "bigquery",
            Dialect::Snowflake => "snowflake",
        }
    }

    pub fn rules(&self) -> Box<dyn DialectRules> {
        match self {
            Dialect::SqlServer => Box::new(SqlServerRules),
            Dialect::Postgres | Dialect::Redshift => Box::new(PostgresRules),
            Dialect::Oracle => Box::new(OracleRules),
            Dialect::MySql => Box::new(MySqlRules),
            Dialect::Sqlite => Box::new(SqliteRules),
            Dialect::BigQuery => Box::new(BigQueryRules),
            Dialect::Snowflake => Box::new(SnowflakeRules),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql server" | "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            "redshift" => Ok(Dialect::Redshift),
            "oracle" => Ok(Dialect::Oracle),
            "mysql" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            "bigquery" => Ok(Dialect::BigQuery),
            "snowflake" => Ok(Dialect::Snowflake),
            other => Err(StudyError::translation(other, "unsupported dialect")),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = StudyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Per-request token used to name emulated temp tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    id: String,
}

impl SessionContext {
    /// A fresh session id: a letter followed by seven hex digits.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("s{}", &uuid[..7]),
        }
    }

    pub fn new(id: impl Into<String>) -> StudyResult<Self> {
        let id = id.into();
        let valid = id
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StudyError::Config(format!("invalid session id '{}'", id)));
        }
        Ok(Self { id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A statement ready to run on a connection of `dialect`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub dialect: Dialect,
}

impl fmt::Display for TranslatedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Rewrites canonical SQL into a target dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialectTranslator;

impl DialectTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Translate `statement` from `source` to `target`.
    ///
    /// `session` and `default_schema` are only consulted when a dialect
    /// emulates `#temp` tables and the statement references one.
    pub fn translate(
        &self,
        statement: &RenderedStatement,
        source: Dialect,
        target: Dialect,
        session: Option<&SessionContext>,
        default_schema: Option<&str>,
    ) -> StudyResult<TranslatedStatement> {
        if source != Dialect::CANONICAL {
            return Err(StudyError::translation(
                target.name(),
                format!(
                    "cannot translate from '{}', only '{}' is supported as a source",
                    source,
                    Dialect::CANONICAL
                ),
            ));
        }

        let tokens = lexer::tokenize(&statement.sql)
            .map_err(|message| StudyError::translation(target.name(), message))?;

        let mut writer = Writer {
            tokens: &tokens,
            rules: target.rules(),
            target,
            session,
            default_schema,
            out: String::with_capacity(statement.sql.len() + 16),
            depth: 0,
            placeholders: 0,
            pending_limit: None,
            limit_anchor: 0,
        };
        writer.run()?;

        if writer.placeholders != statement.params.len() {
            return Err(StudyError::translation(
                target.name(),
                format!(
                    "statement has {} bind markers but {} parameters",
                    writer.placeholders,
                    statement.params.len()
                ),
            ));
        }

        tracing::debug!(
            dialect = %target,
            params = statement.params.len(),
            "translated statement"
        );

        Ok(TranslatedStatement {
            sql: writer.out,
            params: statement.params.clone(),
            dialect: target,
        })
    }
}

struct Writer<'t, 'a> {
    tokens: &'t [Token<'a>],
    rules: Box<dyn DialectRules>,
    target: Dialect,
    session: Option<&'t SessionContext>,
    default_schema: Option<&'t str>,
    out: String,
    depth: usize,
    placeholders: usize,
    pending_limit: Option<String>,
    /// End of the output written for the last non-trivia token.
    limit_anchor: usize,
}

impl Writer<'_, '_> {
    fn run(&mut self) -> StudyResult<()> {
        let mut i = 0;
        while i < self.tokens.len() {
            let next = self.write_token(i)?;
            if self.tokens[i..next].iter().any(|t| !t.is_trivia()) {
                self.limit_anchor = self.out.trim_end().len();
            }
            i = next;
        }
        self.flush_limit();
        Ok(())
    }

    /// Write the token at `i`, returning the index of the next unwritten token.
    fn write_token(&mut self, i: usize) -> StudyResult<usize> {
        let tokens = self.tokens;
        match &tokens[i] {
            Token::Symbol('(') => {
                self.depth += 1;
                self.out.push('(');
            }
            Token::Symbol(')') => {
                self.depth = self.depth.saturating_sub(1);
                self.out.push(')');
            }
            Token::Symbol(';') if self.depth == 0 => {
                self.flush_limit();
                self.out.push(';');
            }
            Token::Placeholder => {
                self.placeholders += 1;
                let marker = self.rules.placeholder(self.placeholders);
                self.out.push_str(&marker);
            }
            Token::BracketIdent(id) => {
                let quoted = self.rules.quote_identifier(id);
                self.out.push_str(&quoted);
            }
            Token::TempTable(name) => {
                let name = self.temp_table_name(name)?;
                self.out.push_str(&name);
            }
            Token::Word(word) => return self.write_word(i, word),
            other => self.out.push_str(&other.to_string()),
        }
        Ok(i + 1)
    }

    fn write_word(&mut self, i: usize, word: &str) -> StudyResult<usize> {
        let upper = word.to_ascii_uppercase();
        let next = self.next_significant(i + 1);

        if upper == "SELECT" {
            if let Some(resume) = self.rewrite_top(i)? {
                return Ok(resume);
            }
        }

        if upper == "CREATE" {
            if let Some(resume) = self.rewrite_create_temp(i) {
                return Ok(resume);
            }
        }

        if let Some(open) = next.filter(|n| self.tokens[*n] == Token::Symbol('(')) {
            if upper == "GETDATE" {
                if let Some(now) = self.rules.current_timestamp() {
                    if let Some(close) = self
                        .next_significant(open + 1)
                        .filter(|c| self.tokens[*c] == Token::Symbol(')'))
                    {
                        self.out.push_str(now);
                        return Ok(close + 1);
                    }
                }
            } else if let Some(renamed) = self.rules.function_name(&upper) {
                self.out.push_str(renamed);
                return Ok(i + 1);
            }
        }

        self.out.push_str(word);
        Ok(i + 1)
    }

    /// `SELECT [DISTINCT|ALL] TOP n` → limit clause at the end of the statement.
    fn rewrite_top(&mut self, select: usize) -> StudyResult<Option<usize>> {
        let tokens = self.tokens;
        let Some(mut top) = self.next_significant(select + 1) else {
            return Ok(None);
        };
        if self.tokens[top].is_word("DISTINCT") || self.tokens[top].is_word("ALL") {
            match self.next_significant(top + 1) {
                Some(next) => top = next,
                None => return Ok(None),
            }
        }
        if !self.tokens[top].is_word("TOP") {
            return Ok(None);
        }
        let Some(count) = self.next_significant(top + 1) else {
            return Ok(None);
        };
        let Token::Number(rows) = self.tokens[count] else {
            return Ok(None);
        };
        let Some(limit) = self.rules.limit_clause(rows) else {
            return Ok(None);
        };

        if self.depth > 0 {
            return Err(StudyError::translation(
                self.target.name(),
                "TOP inside a subquery has no equivalent in this dialect",
            ));
        }
        if self.pending_limit.is_some() {
            return Err(StudyError::translation(
                self.target.name(),
                "more than one top-level TOP in a single statement",
            ));
        }
        self.pending_limit = Some(limit);

        // Keep SELECT and anything up to TOP, drop `TOP n` and the whitespace after it.
        for token in &tokens[select..top] {
            self.out.push_str(&token.to_string());
        }
        let mut resume = count + 1;
        if matches!(self.tokens.get(resume), Some(Token::Whitespace(_))) {
            resume += 1;
        }
        Ok(Some(resume))
    }

    /// `CREATE TABLE #t` → `CREATE <TEMP> TABLE t` for session-local dialects.
    fn rewrite_create_temp(&mut self, create: usize) -> Option<usize> {
        let TempTables::SessionLocal(keyword) = self.rules.temp_tables() else {
            return None;
        };
        let table = self
            .next_significant(create + 1)
            .filter(|t| self.tokens[*t].is_word("TABLE"))?;
        let name_at = self.next_significant(table + 1)?;
        let Token::TempTable(name) = self.tokens[name_at] else {
            return None;
        };
        self.out
            .push_str(&format!("CREATE {} TABLE {}", keyword, name));
        Some(name_at + 1)
    }

    fn temp_table_name(&self, name: &str) -> StudyResult<String> {
        match self.rules.temp_tables() {
            TempTables::Native => Ok(format!("#{}", name)),
            TempTables::SessionLocal(_) => Ok(name.to_string()),
            TempTables::Emulated => {
                let session = self.session.ok_or_else(|| {
                    StudyError::translation(
                        self.target.name(),
                        format!("temp table #{} requires a session context", name),
                    )
                })?;
                let schema = self.default_schema.ok_or_else(|| {
                    StudyError::translation(
                        self.target.name(),
                        format!("temp table #{} requires a default schema", name),
                    )
                })?;
                Ok(format!("{}.{}{}", schema, session.id(), name))
            }
        }
    }

    /// Insert the pending limit after the last significant token, ahead of
    /// any trailing whitespace or comments.
    fn flush_limit(&mut self) {
        if let Some(limit) = self.pending_limit.take() {
            let tail = self.out.split_off(self.limit_anchor);
            self.out.push(' ');
            self.out.push_str(&limit);
            self.out.push_str(&tail);
        }
    }

    fn next_significant(&self, from: usize) -> Option<usize> {
        (from..self.tokens.len()).find(|&j| !self.tokens[j].is_trivia())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stmt(sql: &str, params: Vec<SqlValue>) -> RenderedStatement {
        RenderedStatement {
            sql: sql.to_string(),
            params,
        }
    }

    fn to(target: Dialect, sql: &str) -> StudyResult<String> {
        let markers = lexer::tokenize(sql)
            .unwrap()
            .iter()
            .filter(|t| **t == Token::Placeholder)
            .count();
        let params = vec![SqlValue::Null; markers];
        DialectTranslator::new()
            .translate(&stmt(sql, params), Dialect::SqlServer, target, None, None)
            .map(|t| t.sql)
    }

    #[test]
    fn test_parse_dialect_names() {
        assert_eq!("sql server".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("oracle".parse::<Dialect>().unwrap(), Dialect::Oracle);
    }

    #[test]
    fn test_default_dialect_is_canonical() {
        assert_eq!(Dialect::default(), Dialect::CANONICAL);
    }

    #[test]
    fn test_unsupported_dialect_is_named() {
        let err = "netezza".parse::<Dialect>().unwrap_err();
        assert!(matches!(
            &err,
            StudyError::Translation { dialect, .. } if dialect == "netezza"
        ));
    }

    #[test]
    fn test_postgres_placeholders_and_functions() {
        let sql = to(
            Dialect::Postgres,
            "SELECT ISNULL(a.x, 0) AS x FROM s.t a WHERE a.y = ? AND a.z = ?",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT COALESCE(a.x, 0) AS x FROM s.t a WHERE a.y = $1 AND a.z = $2"
        );
    }

    #[test]
    fn test_top_becomes_limit() {
        let sql = to(
            Dialect::Postgres,
            "SELECT TOP 1 c.id\nFROM s.cohort c\nWHERE c.id = 5;",
        )
        .unwrap();
        assert_eq!(sql, "SELECT c.id\nFROM s.cohort c\nWHERE c.id = 5 LIMIT 1;");
    }

    #[test]
    fn test_limit_goes_before_trailing_comments() {
        let sql = to(Dialect::Postgres, "SELECT TOP 1 a FROM t -- first row only").unwrap();
        assert_eq!(sql, "SELECT a FROM t LIMIT 1 -- first row only");

        let sql = to(
            Dialect::Oracle,
            "SELECT TOP 3 a FROM t /* newest */\n-- done\n;",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT a FROM t FETCH FIRST 3 ROWS ONLY /* newest */\n-- done\n;"
        );
    }

    #[test]
    fn test_top_on_oracle_and_sql_server() {
        let oracle = to(Dialect::Oracle, "SELECT DISTINCT TOP 10 a FROM t").unwrap();
        assert_eq!(oracle, "SELECT DISTINCT a FROM t FETCH FIRST 10 ROWS ONLY");

        let mssql = to(Dialect::SqlServer, "SELECT TOP 10 a FROM t").unwrap();
        assert_eq!(mssql, "SELECT TOP 10 a FROM t");
    }

    #[test]
    fn test_nested_top_is_rejected() {
        let err = to(Dialect::Postgres, "SELECT * FROM (SELECT TOP 1 a FROM t) x").unwrap_err();
        assert!(matches!(err, StudyError::Translation { .. }));
    }

    #[test]
    fn test_literals_untouched() {
        let sql = to(
            Dialect::Postgres,
            "SELECT 'ISNULL(?) [x] TOP 1' AS s, [name] FROM t -- ISNULL(?)",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT 'ISNULL(?) [x] TOP 1' AS s, \"name\" FROM t -- ISNULL(?)"
        );
    }

    #[test]
    fn test_getdate() {
        let sql = to(Dialect::Sqlite, "SELECT GETDATE ( ) AS now").unwrap();
        assert_eq!(sql, "SELECT CURRENT_TIMESTAMP AS now");
    }

    #[test]
    fn test_temp_tables_session_local() {
        let sql = to(
            Dialect::Postgres,
            "CREATE TABLE #ids (id BIGINT); SELECT id FROM #ids;",
        )
        .unwrap();
        assert_eq!(
            sql,
            "CREATE TEMP TABLE ids (id BIGINT); SELECT id FROM ids;"
        );
    }

    #[test]
    fn test_temp_tables_emulated() {
        let session = SessionContext::new("sabc1234").unwrap();
        let out = DialectTranslator::new()
            .translate(
                &stmt("CREATE TABLE #ids (id INT)", vec![]),
                Dialect::SqlServer,
                Dialect::Oracle,
                Some(&session),
                Some("scratch"),
            )
            .unwrap();
        assert_eq!(out.sql, "CREATE TABLE scratch.sabc1234ids (id INT)");
    }

    #[test]
    fn test_emulated_temp_tables_need_session() {
        let err = to(Dialect::Oracle, "SELECT * FROM #ids").unwrap_err();
        assert!(err.to_string().contains("session context"));

        // Without temp tables the session is not needed.
        assert!(to(Dialect::Oracle, "SELECT * FROM ids").is_ok());
    }

    #[test]
    fn test_translation_is_deterministic() {
        let session = SessionContext::new("sdeadbee").unwrap();
        let s = stmt(
            "SELECT TOP 5 [a], ISNULL(b, 0) FROM #t WHERE c = ? AND d LIKE ? ESCAPE '!'",
            vec![SqlValue::Int(1), SqlValue::String("%x%".into())],
        );
        let translator = DialectTranslator::new();
        for target in [Dialect::Postgres, Dialect::Oracle, Dialect::MySql] {
            let first = translator
                .translate(&s, Dialect::SqlServer, target, Some(&session), Some("scratch"))
                .unwrap();
            let second = translator
                .translate(&s, Dialect::SqlServer, target, Some(&session), Some("scratch"))
                .unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_param_count_mismatch() {
        let err = DialectTranslator::new()
            .translate(
                &stmt("SELECT ? , ?", vec![SqlValue::Int(1)]),
                Dialect::SqlServer,
                Dialect::Postgres,
                None,
                None,
            )
            .unwrap_err();
        assert!(err.to_string().contains("2 bind markers but 1 parameters"));
    }

    #[test]
    fn test_non_canonical_source_rejected() {
        let err = DialectTranslator::new()
            .translate(&stmt("SELECT 1", vec![]), Dialect::Postgres, Dialect::Oracle, None, None)
            .unwrap_err();
        assert!(matches!(err, StudyError::Translation { .. }));
    }

    #[test]
    fn test_session_context() {
        let generated = SessionContext::generate();
        assert_eq!(generated.id().len(), 8);
        assert!(SessionContext::new(generated.id()).is_ok());
        assert!(SessionContext::new("1abc").is_err());
        assert!(SessionContext::new("a; DROP").is_err());
    }
}
