//! Service configuration
//!
//! Loaded from a TOML file. See [`StudyConfig::default_path`] for the lookup
//! location.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dialect::Dialect;
use crate::engine::{ConnectionRegistry, ConnectionTarget};
use crate::error::{StudyError, StudyResult};

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "STUDY_ANALYTICS_CONFIG";

/// Main service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StudyConfig {
    /// Connection holding the study results tables
    #[serde(default = "default_study_results_connection")]
    pub study_results_connection: String,

    /// Connection holding cohort definitions and reports
    #[serde(default = "default_ohdsi_connection")]
    pub ohdsi_connection: String,

    /// Directory of SQL template overrides (optional)
    pub template_dir: Option<PathBuf>,

    /// JSON catalog of studies and cohort sets (optional)
    pub catalog_path: Option<PathBuf>,

    #[serde(default)]
    pub schemas: SchemaConfig,

    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

/// Schema names substituted into templates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_study_results_schema")]
    pub study_results: String,
    #[serde(default = "default_ohdsi_schema")]
    pub ohdsi: String,
}

/// One logical database connection.
///
/// When `dialect` is omitted it is taken from the URL scheme.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawConnectionConfig")]
pub struct ConnectionConfig {
    pub url: String,
    pub dialect: Dialect,
    /// Schema for emulated temp tables
    pub default_schema: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Deserialize)]
struct RawConnectionConfig {
    url: String,
    dialect: Option<Dialect>,
    default_schema: Option<String>,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    acquire_timeout_secs: u64,
}

impl TryFrom<RawConnectionConfig> for ConnectionConfig {
    type Error = StudyError;

    fn try_from(raw: RawConnectionConfig) -> StudyResult<Self> {
        let dialect = match raw.dialect {
            Some(dialect) => dialect,
            None => driver_dialects(&raw.url)
                .map(|dialects| dialects[0])
                .ok_or_else(|| {
                    StudyError::Config(format!(
                        "cannot infer a dialect from URL scheme '{}'; set `dialect`",
                        url_scheme(&raw.url)
                    ))
                })?,
        };
        Ok(Self {
            url: raw.url,
            dialect,
            default_schema: raw.default_schema,
            max_connections: raw.max_connections,
            acquire_timeout_secs: raw.acquire_timeout_secs,
        })
    }
}

fn url_scheme(url: &str) -> &str {
    url.split_once(':').map_or(url, |(scheme, _)| scheme)
}

/// Dialects the bundled sqlx drivers can serve for a URL's scheme.
fn driver_dialects(url: &str) -> Option<&'static [Dialect]> {
    match url_scheme(url).to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Some(&[Dialect::Postgres, Dialect::Redshift]),
        "mysql" => Some(&[Dialect::MySql]),
        "sqlite" => Some(&[Dialect::Sqlite]),
        _ => None,
    }
}

fn default_study_results_connection() -> String {
    "study-results".to_string()
}

fn default_ohdsi_connection() -> String {
    "ohdsi".to_string()
}

fn default_study_results_schema() -> String {
    "study_results".to_string()
}

fn default_ohdsi_schema() -> String {
    "ohdsi".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            study_results: default_study_results_schema(),
            ohdsi: default_ohdsi_schema(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            url: url.into(),
            dialect,
            default_schema: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            study_results_connection: default_study_results_connection(),
            ohdsi_connection: default_ohdsi_connection(),
            template_dir: None,
            catalog_path: None,
            schemas: SchemaConfig::default(),
            connections: BTreeMap::new(),
        }
    }
}

impl StudyConfig {
    /// Create a new configuration builder
    pub fn builder() -> StudyConfigBuilder {
        StudyConfigBuilder::default()
    }

    /// `$STUDY_ANALYTICS_CONFIG`, else `<config_dir>/study-analytics/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("study-analytics").join("config.toml"))
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> StudyResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StudyError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;

        // Relative paths are taken from the config file's directory
        if let Some(base) = path.parent() {
            config.template_dir = config.template_dir.map(|p| base.join(p));
            config.catalog_path = config.catalog_path.map(|p| base.join(p));
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> StudyResult<Self> {
        let config: StudyConfig =
            toml::from_str(content).map_err(|e| StudyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Both named connections must be declared, and every connection's
    /// dialect must be one its URL's driver can serve.
    pub fn validate(&self) -> StudyResult<()> {
        for name in [&self.study_results_connection, &self.ohdsi_connection] {
            if !self.connections.contains_key(name) {
                return Err(StudyError::Config(format!(
                    "connection '{}' is not declared under [connections]",
                    name
                )));
            }
        }

        for (name, settings) in &self.connections {
            let scheme = url_scheme(&settings.url);
            let dialects = driver_dialects(&settings.url).ok_or_else(|| {
                StudyError::Config(format!(
                    "connection '{}': no database driver for URL scheme '{}'",
                    name, scheme
                ))
            })?;
            if !dialects.contains(&settings.dialect) {
                return Err(StudyError::Config(format!(
                    "connection '{}' is declared as {} but its URL scheme is '{}'",
                    name, settings.dialect, scheme
                )));
            }
        }
        Ok(())
    }
}

/// Resolves connections from the declared settings, without connecting.
impl ConnectionRegistry for StudyConfig {
    fn resolve(&self, connection: &str) -> StudyResult<ConnectionTarget> {
        self.connections
            .get(connection)
            .map(|c| ConnectionTarget {
                dialect: c.dialect,
                default_schema: c.default_schema.clone(),
            })
            .ok_or_else(|| StudyError::Config(format!("unknown connection '{}'", connection)))
    }
}

/// Builder for StudyConfig
#[derive(Debug, Default)]
pub struct StudyConfigBuilder {
    config: StudyConfig,
}

impl StudyConfigBuilder {
    /// Declare a connection
    pub fn connection(mut self, name: impl Into<String>, settings: ConnectionConfig) -> Self {
        self.config.connections.insert(name.into(), settings);
        self
    }

    pub fn study_results_connection(mut self, name: impl Into<String>) -> Self {
        self.config.study_results_connection = name.into();
        self
    }

    pub fn ohdsi_connection(mut self, name: impl Into<String>) -> Self {
        self.config.ohdsi_connection = name.into();
        self
    }

    pub fn schemas(mut self, study_results: impl Into<String>, ohdsi: impl Into<String>) -> Self {
        self.config.schemas = SchemaConfig {
            study_results: study_results.into(),
            ohdsi: ohdsi.into(),
        };
        self
    }

    pub fn template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.template_dir = Some(dir.into());
        self
    }

    pub fn catalog(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.catalog_path = Some(path.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> StudyResult<StudyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
catalog_path = "catalog.json"

[schemas]
study_results = "results_v2"

[connections.study-results]
url = "postgres://localhost/results"
dialect = "postgresql"
default_schema = "scratch"

[connections.ohdsi]
url = "sqlite::memory:"
dialect = "sqlite"
max_connections = 1
"#;

    #[test]
    fn test_parse_sample() {
        let config = StudyConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.study_results_connection, "study-results");
        assert_eq!(config.schemas.study_results, "results_v2");
        assert_eq!(config.schemas.ohdsi, "ohdsi");

        let results = &config.connections["study-results"];
        assert_eq!(results.dialect, Dialect::Postgres);
        assert_eq!(results.default_schema.as_deref(), Some("scratch"));
        assert_eq!(results.max_connections, 5);
        assert_eq!(results.acquire_timeout_secs, 30);

        assert_eq!(config.connections["ohdsi"].max_connections, 1);
    }

    #[test]
    fn test_demo_config_parses() {
        let config = StudyConfig::from_toml_str(include_str!("../demos/config.toml")).unwrap();
        assert_eq!(config.connections["ohdsi"].acquire_timeout_secs, 10);
        assert_eq!(config.catalog_path.as_deref(), Some(Path::new("catalog.json")));
    }

    #[test]
    fn test_missing_connection_is_rejected() {
        let err = StudyConfig::from_toml_str(
            "[connections.ohdsi]\nurl = \"sqlite::memory:\"\ndialect = \"sqlite\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, StudyError::Config(_)));
        assert!(err.to_string().contains("study-results"));
    }

    #[test]
    fn test_unknown_dialect_is_rejected() {
        let err = StudyConfig::from_toml_str(
            "[connections.ohdsi]\nurl = \"x\"\ndialect = \"db2\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("db2"));
    }

    #[test]
    fn test_dialect_is_inferred_from_url() {
        let config = StudyConfig::from_toml_str(
            "[connections.study-results]\nurl = \"postgresql://db/results\"\n\
             [connections.ohdsi]\nurl = \"sqlite::memory:\"\n",
        )
        .unwrap();
        assert_eq!(config.connections["study-results"].dialect, Dialect::Postgres);
        assert_eq!(config.connections["ohdsi"].dialect, Dialect::Sqlite);

        let err = StudyConfig::from_toml_str(
            "[connections.ohdsi]\nurl = \"snowflake://acct/db\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("snowflake"));
    }

    #[test]
    fn test_dialect_must_match_url_driver() {
        let mismatch = StudyConfig::builder()
            .connection(
                "study-results",
                ConnectionConfig::new("postgres://db/results", Dialect::SqlServer),
            )
            .connection("ohdsi", ConnectionConfig::new("sqlite::memory:", Dialect::Sqlite))
            .build()
            .unwrap_err();
        assert!(mismatch.to_string().contains("declared as sql server"));

        let no_driver = StudyConfig::builder()
            .connection(
                "study-results",
                ConnectionConfig::new("oracle://db/results", Dialect::Oracle),
            )
            .connection("ohdsi", ConnectionConfig::new("sqlite::memory:", Dialect::Sqlite))
            .build()
            .unwrap_err();
        assert!(no_driver.to_string().contains("no database driver"));

        let redshift = StudyConfig::builder()
            .connection(
                "study-results",
                ConnectionConfig::new("postgres://cluster/dev", Dialect::Redshift),
            )
            .connection("ohdsi", ConnectionConfig::new("sqlite::memory:", Dialect::Sqlite))
            .build();
        assert!(redshift.is_ok());
    }

    #[test]
    fn test_builder() {
        let config = StudyConfig::builder()
            .connection("results", ConnectionConfig::new("sqlite::memory:", Dialect::Sqlite))
            .connection("ohdsi", ConnectionConfig::new("sqlite::memory:", Dialect::Sqlite))
            .study_results_connection("results")
            .schemas("r", "o")
            .build()
            .unwrap();
        assert_eq!(config.study_results_connection, "results");
        assert_eq!(config.schemas.ohdsi, "o");

        assert!(StudyConfig::builder().build().is_err());
    }

    #[test]
    fn test_resolve_declared_connection() {
        let config = StudyConfig::from_toml_str(SAMPLE).unwrap();
        let target = config.resolve("study-results").unwrap();
        assert_eq!(target.dialect, Dialect::Postgres);
        assert_eq!(target.default_schema.as_deref(), Some("scratch"));
        assert!(config.resolve("warehouse").is_err());
    }
}
