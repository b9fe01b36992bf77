//! study-analytics command line front end
//!
//! # Usage
//!
//! ```bash
//! # Dashboard for cohort set 3 of study 7
//! study-analytics dashboard 7 3
//!
//! # Covariate prevalence with filters, JSON output
//! study-analytics --format json prevalence 7 1770 2 --search diabetes --analysis 101,200:210
//!
//! # Show the SQL that would run, without a database
//! study-analytics --dry-run distribution 7 1770 2 --domain condition
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use study_analytics::config::CONFIG_ENV;
use study_analytics::engine::BoxFuture;
use study_analytics::prelude::*;

#[derive(Parser)]
#[command(name = "study-analytics")]
#[command(version)]
#[command(about = "Query prevalence, distribution and dashboard statistics of a study", long_about = None)]
#[command(after_help = "EXAMPLES:
    study-analytics studies
    study-analytics dashboard 7 3 --explore 316866
    study-analytics --dry-run prevalence 7 1770 2 --search diabetes
    study-analytics translate query.sql --to oracle --schema scratch")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Don't execute, just show the generated SQL
    #[arg(short, long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
struct CriteriaArgs {
    /// Covariate name contains (case-insensitive)
    #[arg(long)]
    search: Option<String>,

    /// Analysis ids or ranges, e.g. 101,200:210
    #[arg(long, value_delimiter = ',')]
    analysis: Vec<String>,

    /// Time windows
    #[arg(long = "time-window")]
    time_window: Vec<String>,

    /// Domains ("null" matches a missing domain)
    #[arg(long, value_delimiter = ',')]
    domain: Vec<String>,
}

impl From<CriteriaArgs> for Criteria {
    fn from(args: CriteriaArgs) -> Self {
        Criteria {
            search_term: args.search,
            analysis_ids: args.analysis,
            time_windows: args.time_window,
            domains: args.domain,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List studies, or the data sources of one study
    Studies {
        #[arg(long)]
        study: Option<i32>,
        /// Show the study with its cohorts and sources
        #[arg(long, requires = "study")]
        detail: bool,
    },
    /// Categorical covariate statistics for a cohort
    Prevalence {
        study: i32,
        cohort: i64,
        source: i32,
        /// Explore descendants of this covariate instead of filtering
        #[arg(long, conflicts_with_all = ["search", "analysis", "time_window", "domain"])]
        explore: Option<i64>,
        #[command(flatten)]
        criteria: CriteriaArgs,
    },
    /// Continuous covariate statistics for a cohort
    Distribution {
        study: i32,
        cohort: i64,
        source: i32,
        #[arg(long, conflicts_with_all = ["search", "analysis", "time_window", "domain"])]
        explore: Option<i64>,
        #[command(flatten)]
        criteria: CriteriaArgs,
    },
    /// Target/outcome dashboard of a cohort set
    Dashboard {
        study: i32,
        cohort_set: i32,
        /// Restrict to outcomes descending from this concept
        #[arg(long)]
        explore: Option<i64>,
    },
    /// Distinct outcomes on a cohort set's dashboard
    Outcomes { study: i32, cohort_set: i32 },
    /// Prevalence of one covariate across a cohort set
    Covariate {
        study: i32,
        cohort_set: i32,
        covariate: i64,
    },
    /// Show one cohort definition
    Cohort { study: i32, cohort: i64 },
    /// Show one cohort set
    CohortSet { study: i32, cohort_set: i32 },
    /// Search cohort sets by name
    CohortSets {
        study: i32,
        #[arg(long)]
        search: Option<String>,
    },
    /// Translate a canonical SQL file to another dialect
    Translate {
        file: PathBuf,
        /// Target dialect
        #[arg(long, default_value = "postgresql")]
        to: String,
        /// Placeholder values, name=value
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
        /// Session id for emulated temp tables
        #[arg(long)]
        session: Option<String>,
        /// Schema for emulated temp tables
        #[arg(long)]
        schema: Option<String>,
    },
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", s))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.format;
    let dry_run = cli.dry_run;

    if let Commands::Translate {
        file,
        to,
        set,
        session,
        schema,
    } = &cli.command
    {
        return translate_file(file, to, set, session.as_deref(), schema.as_deref());
    }

    let config_path = cli
        .config
        .clone()
        .or_else(StudyConfig::default_path)
        .context("no configuration file; use --config")?;
    let config = StudyConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let service = if dry_run {
        StudyAnalyticsService::with_executor(
            &config,
            Arc::new(DryRunExecutor),
            Arc::new(config.clone()),
        )?
    } else {
        StudyAnalyticsService::from_config(&config).await?
    };

    match cli.command {
        Commands::Studies { study: None, .. } => print_records(&service.list_studies()?, format),
        Commands::Studies {
            study: Some(id),
            detail: true,
        } => {
            let study = service.study(id)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&study)?),
                OutputFormat::Table => {
                    println!("{} {}", study.id.to_string().cyan(), study.name.white().bold());
                    if !study.description.is_empty() {
                        println!("{}", study.description.dimmed());
                    }
                    println!();
                    print_records(&study.cohorts, format)?;
                    print_records(&study.sources, format)?;
                }
            }
            Ok(())
        }
        Commands::Studies {
            study: Some(id),
            detail: false,
        } => print_records(&service.study_sources(id)?, format),
        Commands::Prevalence {
            study,
            cohort,
            source,
            explore,
            criteria,
        } => {
            let stats = match explore {
                Some(covariate) => {
                    service
                        .prevalence_stats_by_vocab(study, cohort, source, covariate)
                        .await?
                }
                None => {
                    service
                        .prevalence_stats(study, cohort, source, &criteria.into())
                        .await?
                }
            };
            print_records(&stats, format)
        }
        Commands::Distribution {
            study,
            cohort,
            source,
            explore,
            criteria,
        } => {
            let stats = match explore {
                Some(covariate) => {
                    service
                        .distribution_stats_by_vocab(study, cohort, source, covariate)
                        .await?
                }
                None => {
                    service
                        .distribution_stats(study, cohort, source, &criteria.into())
                        .await?
                }
            };
            print_records(&stats, format)
        }
        Commands::Dashboard {
            study,
            cohort_set,
            explore,
        } => {
            let items = match explore {
                Some(concept) => service.dashboard_by_vocab(study, cohort_set, concept).await?,
                None => service.dashboard(study, cohort_set).await?,
            };
            print_records(&items, format)
        }
        Commands::Outcomes { study, cohort_set } => {
            print_records(&service.cohort_set_outcomes(study, cohort_set).await?, format)
        }
        Commands::Covariate {
            study,
            cohort_set,
            covariate,
        } => print_records(
            &service
                .cohort_set_prevalence(study, cohort_set, covariate)
                .await?,
            format,
        ),
        Commands::Cohort { study, cohort } => print_records(
            &cohort_records(service.cohort_by_id(study, cohort).await, dry_run)?,
            format,
        ),
        Commands::CohortSet { study, cohort_set } => {
            print_records(&[service.cohort_set_by_id(study, cohort_set)?], format)
        }
        Commands::CohortSets { study, search } => print_records(
            &service.search_cohort_sets(study, search.as_deref()).await?,
            format,
        ),
        Commands::Translate { .. } => unreachable!(), // Handled above
    }
}

fn translate_file(
    file: &Path,
    to: &str,
    set: &[(String, String)],
    session: Option<&str>,
    schema: Option<&str>,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let template = study_analytics::template::SqlTemplate::new(file.display().to_string(), text);

    let names: Vec<&str> = set.iter().map(|(k, _)| k.as_str()).collect();
    let values: Vec<Fragment> = set.iter().map(|(_, v)| Fragment::literal(v.as_str())).collect();
    let rendered = render(&template, &names, &values)?;

    let target: Dialect = to.parse()?;
    let session = session.map(|id| SessionContext::new(id)).transpose()?;
    let statement = DialectTranslator::new().translate(
        &rendered,
        Dialect::CANONICAL,
        target,
        session.as_ref(),
        schema,
    )?;

    println!("{}", statement.sql);
    Ok(())
}

/// A dry run returns no rows, so the cohort lookup finding nothing is expected.
fn cohort_records(
    result: StudyResult<CohortDefinitionSummary>,
    dry_run: bool,
) -> StudyResult<Vec<CohortDefinitionSummary>> {
    match result {
        Ok(cohort) => Ok(vec![cohort]),
        Err(StudyError::NotFound { entity: "cohort", .. }) if dry_run => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Prints statements instead of running them.
struct DryRunExecutor;

impl QueryExecutor for DryRunExecutor {
    fn execute<'a>(
        &'a self,
        connection: &'a str,
        statement: &'a TranslatedStatement,
    ) -> BoxFuture<'a, StudyResult<Vec<ResultRow>>> {
        Box::pin(async move {
            println!(
                "{} {} ({})",
                "Generated SQL for".green().bold(),
                connection.cyan(),
                statement.dialect
            );
            println!("{}", statement.sql.white());

            if !statement.params.is_empty() {
                println!();
                println!("{}", "Bindings:".cyan());
                for (i, b) in statement.params.iter().enumerate() {
                    println!("  #{} = {}", i + 1, b.to_string().yellow());
                }
            }
            println!();
            Ok(Vec::new())
        })
    }
}

fn print_records<T: Serialize>(records: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
        OutputFormat::Table => {
            let rows: Vec<serde_json::Map<String, Value>> = records
                .iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<Vec<_>>>()?
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            print_table(&rows);
        }
    }
    Ok(())
}

fn print_table(rows: &[serde_json::Map<String, Value>]) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    // Get column names from first row
    let columns: Vec<&String> = rows[0].keys().collect();

    // Calculate column widths
    let mut widths: HashMap<&String, usize> = columns.iter().map(|c| (*c, c.len())).collect();
    for row in rows {
        for (col, val) in row {
            let len = val_to_string(val).chars().count();
            if let Some(w) = widths.get_mut(col) {
                *w = (*w).max(len);
            }
        }
    }

    let header: Vec<String> = columns
        .iter()
        .map(|c| format!("{:width$}", c, width = widths[*c]))
        .collect();
    println!("{}", header.join(" │ ").white().bold());

    let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| {
                let val = row.get(*c).map(val_to_string).unwrap_or_default();
                format!("{:width$}", val, width = widths[*c])
            })
            .collect();
        println!("{}", cells.join(" │ "));
    }

    println!();
    println!("{} row(s) returned", rows.len().to_string().cyan());
}

fn val_to_string(val: &Value) -> String {
    match val {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => val.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_cohort_without_rows_is_not_an_error() {
        let missing = || Err(StudyError::not_found("cohort", 1770));

        assert!(cohort_records(missing(), true).unwrap().is_empty());
        assert!(matches!(
            cohort_records(missing(), false),
            Err(StudyError::NotFound { .. })
        ));
    }

    #[test]
    fn test_dry_run_still_reports_missing_study() {
        let err = cohort_records(Err(StudyError::not_found("study", 9)), true).unwrap_err();
        assert!(matches!(err, StudyError::NotFound { entity: "study", .. }));
    }

    #[test]
    fn test_study_detail_flag_needs_study() {
        assert!(Cli::try_parse_from(["study-analytics", "studies", "--detail"]).is_err());
        let cli =
            Cli::try_parse_from(["study-analytics", "studies", "--study", "7", "--detail"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Studies {
                study: Some(7),
                detail: true
            }
        ));
    }
}
