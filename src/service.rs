//! Study analytics service.
//!
//! Every request runs the same pipeline:
//!
//! 1. resolve the study (and cohort set) from the repository
//! 2. render a template with schema names, ids and criteria fragments
//! 3. translate the canonical SQL for the connection's dialect
//! 4. execute and project each row into a typed record
//!
//! Dashboards additionally mark rows whose target/outcome pair has been
//! published.

use std::sync::Arc;

use crate::config::StudyConfig;
use crate::criteria::{join_clauses, like_contains_pattern, Criteria, CriteriaClauseBuilder};
use crate::dialect::{Dialect, DialectTranslator, SessionContext, TranslatedStatement};
use crate::engine::{ConnectionRegistry, QueryExecutor, StudyDB};
use crate::error::{StudyError, StudyResult};
use crate::model::*;
use crate::projection::{project, Projection};
use crate::published::{PublishedPairIndex, ReportStore, SqlReportStore};
use crate::repository::{CohortSet, InMemoryRepository, Study, StudyRepository};
use crate::template::{render, Fragment, TemplateKind, TemplateStore};

/// Connection and schema names used by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub study_results_connection: String,
    pub ohdsi_connection: String,
    pub study_results_schema: String,
    pub ohdsi_schema: String,
}

impl From<&StudyConfig> for ServiceSettings {
    fn from(config: &StudyConfig) -> Self {
        Self {
            study_results_connection: config.study_results_connection.clone(),
            ohdsi_connection: config.ohdsi_connection.clone(),
            study_results_schema: config.schemas.study_results.clone(),
            ohdsi_schema: config.schemas.ohdsi.clone(),
        }
    }
}

/// `= id` for a single cohort, `IN (a,b,c)` for several.
pub fn cohort_list_equality(cohort_set: &CohortSet) -> StudyResult<String> {
    match cohort_set.cohort_ids.as_slice() {
        [] => Err(StudyError::not_found("cohort set", cohort_set.id)),
        [id] => Ok(format!("= {}", id)),
        ids => {
            let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
            Ok(format!("IN ({})", ids.join(",")))
        }
    }
}

pub struct StudyAnalyticsService {
    settings: ServiceSettings,
    templates: Arc<TemplateStore>,
    translator: DialectTranslator,
    criteria: CriteriaClauseBuilder,
    executor: Arc<dyn QueryExecutor>,
    registry: Arc<dyn ConnectionRegistry>,
    repository: Arc<dyn StudyRepository>,
    reports: Arc<dyn ReportStore>,
}

impl StudyAnalyticsService {
    pub fn new(
        settings: ServiceSettings,
        templates: Arc<TemplateStore>,
        executor: Arc<dyn QueryExecutor>,
        registry: Arc<dyn ConnectionRegistry>,
        repository: Arc<dyn StudyRepository>,
        reports: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            settings,
            templates,
            translator: DialectTranslator::new(),
            criteria: CriteriaClauseBuilder::default(),
            executor,
            registry,
            repository,
            reports,
        }
    }

    /// Build a service over pooled connections with a SQL report store.
    pub async fn from_config(config: &StudyConfig) -> StudyResult<Self> {
        let db = Arc::new(StudyDB::connect(config).await?);
        Self::with_executor(config, db.clone(), db)
    }

    /// Build a service from configuration around an existing executor.
    pub fn with_executor(
        config: &StudyConfig,
        executor: Arc<dyn QueryExecutor>,
        registry: Arc<dyn ConnectionRegistry>,
    ) -> StudyResult<Self> {
        let templates = Arc::new(match &config.template_dir {
            Some(dir) => TemplateStore::load_dir(dir)?,
            None => TemplateStore::builtin(),
        });
        let repository: Arc<dyn StudyRepository> = Arc::new(match &config.catalog_path {
            Some(path) => InMemoryRepository::load(path)?,
            None => InMemoryRepository::default(),
        });
        let reports = Arc::new(SqlReportStore::new(
            executor.clone(),
            registry.clone(),
            templates.clone(),
            config.ohdsi_connection.clone(),
            config.schemas.ohdsi.clone(),
        ));

        Ok(Self::new(
            ServiceSettings::from(config),
            templates,
            executor,
            registry,
            repository,
            reports,
        ))
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Render and translate a template for `connection` without running it.
    pub fn prepare(
        &self,
        kind: TemplateKind,
        connection: &str,
        names: &[&str],
        values: &[Fragment],
    ) -> StudyResult<TranslatedStatement> {
        let rendered = render(self.templates.get(kind), names, values)?;
        let target = self.registry.resolve(connection)?;
        let session = SessionContext::generate();
        self.translator.translate(
            &rendered,
            Dialect::CANONICAL,
            target.dialect,
            Some(&session),
            target.default_schema.as_deref(),
        )
    }

    async fn run_query<T: Projection>(
        &self,
        kind: TemplateKind,
        connection: &str,
        names: &[&str],
        values: &[Fragment],
    ) -> StudyResult<Vec<T>> {
        let statement = self.prepare(kind, connection, names, values)?;
        let rows = self.executor.execute(connection, &statement).await?;
        let records = rows
            .iter()
            .map(project::<T, _>)
            .collect::<StudyResult<Vec<_>>>()?;

        tracing::info!(
            template = self.templates.get(kind).name(),
            connection,
            rows = records.len(),
            "query complete"
        );
        Ok(records)
    }

    fn resolve_study(&self, study_id: i32) -> StudyResult<Study> {
        self.repository
            .find_study(study_id)?
            .ok_or_else(|| StudyError::not_found("study", study_id))
    }

    fn cohort_set(&self, study_id: i32, cohort_set_id: i32) -> StudyResult<CohortSet> {
        self.resolve_study(study_id)?;
        self.repository
            .find_cohort_set(cohort_set_id)?
            .filter(|cs| cs.study_id == study_id)
            .ok_or_else(|| StudyError::not_found("cohort set", cohort_set_id))
    }

    fn results_schema(&self) -> Fragment {
        Fragment::literal(&self.settings.study_results_schema)
    }

    pub fn list_studies(&self) -> StudyResult<Vec<StudyListItem>> {
        Ok(self
            .repository
            .find_all_studies()?
            .into_iter()
            .map(|s| StudyListItem {
                id: s.id,
                name: s.name,
                description: s.description,
            })
            .collect())
    }

    pub fn study_sources(&self, study_id: i32) -> StudyResult<Vec<StudySourceItem>> {
        Ok(self
            .resolve_study(study_id)?
            .sources
            .into_iter()
            .map(StudySourceItem::from)
            .collect())
    }

    /// One study with its cohorts and data sources.
    pub fn study(&self, study_id: i32) -> StudyResult<StudyDetail> {
        let study = self.resolve_study(study_id)?;
        Ok(StudyDetail {
            id: study.id,
            name: study.name,
            description: study.description,
            cohorts: study
                .cohorts
                .into_iter()
                .map(|c| StudyCohortItem {
                    cohort_id: c.id,
                    name: c.name,
                    short_name: c.short_name,
                })
                .collect(),
            sources: study.sources.into_iter().map(StudySourceItem::from).collect(),
        })
    }

    /// Categorical covariate statistics for one cohort on one source.
    pub async fn prevalence_stats(
        &self,
        study_id: i32,
        cohort_id: i64,
        source_id: i32,
        criteria: &Criteria,
    ) -> StudyResult<Vec<PrevalenceStat>> {
        self.resolve_study(study_id)?;
        let clauses = join_clauses(&self.criteria.build(criteria)?);
        self.run_query(
            TemplateKind::CovariateStats,
            &self.settings.study_results_connection,
            &["study_results_schema", "cohort_definition_id", "source_id", "criteria_clauses"],
            &[
                self.results_schema(),
                Fragment::literal(cohort_id.to_string()),
                Fragment::literal(source_id.to_string()),
                clauses,
            ],
        )
        .await
    }

    /// Prevalence of the descendants of `covariate_id` in the concept hierarchy.
    pub async fn prevalence_stats_by_vocab(
        &self,
        study_id: i32,
        cohort_id: i64,
        source_id: i32,
        covariate_id: i64,
    ) -> StudyResult<Vec<PrevalenceStat>> {
        self.resolve_study(study_id)?;
        self.run_query(
            TemplateKind::CovariateStatsVocab,
            &self.settings.study_results_connection,
            &["study_results_schema", "cohort_definition_id", "source_id", "covariate_id"],
            &[
                self.results_schema(),
                Fragment::literal(cohort_id.to_string()),
                Fragment::literal(source_id.to_string()),
                Fragment::literal(covariate_id.to_string()),
            ],
        )
        .await
    }

    /// Continuous covariate statistics for one cohort on one source.
    pub async fn distribution_stats(
        &self,
        study_id: i32,
        cohort_id: i64,
        source_id: i32,
        criteria: &Criteria,
    ) -> StudyResult<Vec<DistributionStat>> {
        self.resolve_study(study_id)?;
        let clauses = join_clauses(&self.criteria.build(criteria)?);
        self.run_query(
            TemplateKind::CovariateDist,
            &self.settings.study_results_connection,
            &["study_results_schema", "cohort_definition_id", "source_id", "criteria_clauses"],
            &[
                self.results_schema(),
                Fragment::literal(cohort_id.to_string()),
                Fragment::literal(source_id.to_string()),
                clauses,
            ],
        )
        .await
    }

    pub async fn distribution_stats_by_vocab(
        &self,
        study_id: i32,
        cohort_id: i64,
        source_id: i32,
        covariate_id: i64,
    ) -> StudyResult<Vec<DistributionStat>> {
        self.resolve_study(study_id)?;
        self.run_query(
            TemplateKind::CovariateDistVocab,
            &self.settings.study_results_connection,
            &["study_results_schema", "cohort_definition_id", "source_id", "covariate_id"],
            &[
                self.results_schema(),
                Fragment::literal(cohort_id.to_string()),
                Fragment::literal(source_id.to_string()),
                Fragment::literal(covariate_id.to_string()),
            ],
        )
        .await
    }

    /// Prevalence of one covariate for every cohort of a cohort set.
    pub async fn cohort_set_prevalence(
        &self,
        study_id: i32,
        cohort_set_id: i32,
        covariate_id: i64,
    ) -> StudyResult<Vec<CohortSetPrevalenceStat>> {
        let cohort_set = self.cohort_set(study_id, cohort_set_id)?;
        let equality = cohort_list_equality(&cohort_set)?;
        self.run_query(
            TemplateKind::Covariate,
            &self.settings.study_results_connection,
            &["study_results_schema", "cohort_list_equality", "covariate_id"],
            &[
                self.results_schema(),
                Fragment::literal(equality),
                Fragment::literal(covariate_id.to_string()),
            ],
        )
        .await
    }

    pub async fn dashboard(
        &self,
        study_id: i32,
        cohort_set_id: i32,
    ) -> StudyResult<Vec<DashboardItem>> {
        let cohort_set = self.cohort_set(study_id, cohort_set_id)?;
        let values = [
            self.results_schema(),
            Fragment::literal(cohort_list_equality(&cohort_set)?),
            Fragment::literal(study_id.to_string()),
        ];
        self.published_dashboard(
            TemplateKind::Dashboard,
            &["study_results_schema", "cohort_list_equality", "study_id"],
            &values,
        )
        .await
    }

    /// Dashboard restricted to outcomes descending from `concept_id`.
    pub async fn dashboard_by_vocab(
        &self,
        study_id: i32,
        cohort_set_id: i32,
        concept_id: i64,
    ) -> StudyResult<Vec<DashboardItem>> {
        let cohort_set = self.cohort_set(study_id, cohort_set_id)?;
        let values = [
            self.results_schema(),
            Fragment::literal(cohort_list_equality(&cohort_set)?),
            Fragment::literal(study_id.to_string()),
            Fragment::literal(concept_id.to_string()),
        ];
        self.published_dashboard(
            TemplateKind::DashboardVocab,
            &["study_results_schema", "cohort_list_equality", "study_id", "outcome_concept_id"],
            &values,
        )
        .await
    }

    async fn published_dashboard(
        &self,
        kind: TemplateKind,
        names: &[&str],
        values: &[Fragment],
    ) -> StudyResult<Vec<DashboardItem>> {
        let (mut items, index) = tokio::try_join!(
            self.run_query::<DashboardItem>(
                kind,
                &self.settings.study_results_connection,
                names,
                values
            ),
            PublishedPairIndex::load(self.reports.as_ref()),
        )?;

        for item in &mut items {
            item.published =
                i32::from(index.is_published(item.target_cohort_id, item.outcome_cohort_id));
        }
        tracing::debug!(
            published_pairs = index.len(),
            rows = items.len(),
            "annotated dashboard"
        );
        Ok(items)
    }

    /// Distinct outcomes on the dashboard of a cohort set.
    pub async fn cohort_set_outcomes(
        &self,
        study_id: i32,
        cohort_set_id: i32,
    ) -> StudyResult<Vec<CohortSetOutcomeItem>> {
        let cohort_set = self.cohort_set(study_id, cohort_set_id)?;
        self.run_query(
            TemplateKind::DashboardOutcomes,
            &self.settings.study_results_connection,
            &["study_results_schema", "cohort_list_equality", "study_id"],
            &[
                self.results_schema(),
                Fragment::literal(cohort_list_equality(&cohort_set)?),
                Fragment::literal(study_id.to_string()),
            ],
        )
        .await
    }

    pub async fn cohort_by_id(
        &self,
        study_id: i32,
        cohort_id: i64,
    ) -> StudyResult<CohortDefinitionSummary> {
        self.resolve_study(study_id)?;
        self.run_query::<CohortDefinitionSummary>(
            TemplateKind::CohortDefinition,
            &self.settings.study_results_connection,
            &["study_results_schema", "cohort_definition_id"],
            &[self.results_schema(), Fragment::literal(cohort_id.to_string())],
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StudyError::not_found("cohort", cohort_id))
    }

    pub fn cohort_set_by_id(
        &self,
        study_id: i32,
        cohort_set_id: i32,
    ) -> StudyResult<CohortSetListItem> {
        let cs = self.cohort_set(study_id, cohort_set_id)?;
        Ok(CohortSetListItem {
            id: cs.id,
            members: i32::try_from(cs.cohort_ids.len()).unwrap_or(i32::MAX),
            name: Some(cs.name),
            description: Some(cs.description),
        })
    }

    /// Cohort sets of a study whose name contains `term` (case-insensitive).
    pub async fn search_cohort_sets(
        &self,
        study_id: i32,
        term: Option<&str>,
    ) -> StudyResult<Vec<CohortSetListItem>> {
        self.resolve_study(study_id)?;
        let pattern = like_contains_pattern(&term.unwrap_or_default().to_lowercase());
        self.run_query(
            TemplateKind::CohortSets,
            &self.settings.ohdsi_connection,
            &["ohdsi_schema", "study_id", "search_term"],
            &[
                Fragment::literal(&self.settings.ohdsi_schema),
                Fragment::literal(study_id.to_string()),
                Fragment::param(pattern),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cohort_set(ids: &[i64]) -> CohortSet {
        CohortSet {
            id: 4,
            study_id: 1,
            cohort_ids: ids.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cohort_list_equality() {
        assert_eq!(cohort_list_equality(&cohort_set(&[12])).unwrap(), "= 12");
        assert_eq!(
            cohort_list_equality(&cohort_set(&[1, 2, 3])).unwrap(),
            "IN (1,2,3)"
        );
        assert!(matches!(
            cohort_list_equality(&cohort_set(&[])),
            Err(StudyError::NotFound { entity: "cohort set", .. })
        ));
    }

    #[test]
    fn test_settings_from_config() {
        let config = StudyConfig::default();
        let settings = ServiceSettings::from(&config);
        assert_eq!(settings.study_results_connection, "study-results");
        assert_eq!(settings.ohdsi_schema, "ohdsi");
    }
}
