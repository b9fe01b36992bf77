//! Published target/outcome pairs.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

use crate::dialect::{Dialect, DialectTranslator, SessionContext};
use crate::engine::{BoxFuture, ConnectionRegistry, QueryExecutor};
use crate::error::StudyResult;
use crate::projection::{project, FieldSpec, Projection, Setter};
use crate::template::{render, Fragment, TemplateKind, TemplateStore};

/// Report status whose pairs count as published.
pub const PUBLISHED_STATUS: &str = "PUBLISHED";

/// A target/outcome cohort pair from a study report.
///
/// Equality and hashing use `target` and `outcome` only; `active` is carried
/// along but never compared.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TargetOutcomePair {
    pub target: i64,
    pub outcome: i64,
    pub active: bool,
}

impl TargetOutcomePair {
    pub fn new(target: i64, outcome: i64, active: bool) -> Self {
        Self {
            target,
            outcome,
            active,
        }
    }
}

impl PartialEq for TargetOutcomePair {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.outcome == other.outcome
    }
}

impl Eq for TargetOutcomePair {}

impl Hash for TargetOutcomePair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
        self.outcome.hash(state);
    }
}

impl Projection for TargetOutcomePair {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required("target_cohort_id", Setter::Long(|r: &mut Self, v| r.target = v)),
        FieldSpec::required("outcome_cohort_id", Setter::Long(|r: &mut Self, v| r.outcome = v)),
        FieldSpec::optional("active", Setter::Flag(|r: &mut Self, v| r.active = v)),
    ];
}

/// Source of published report pairs.
pub trait ReportStore: Send + Sync {
    fn published_pairs<'a>(&'a self) -> BoxFuture<'a, StudyResult<Vec<TargetOutcomePair>>>;
}

/// Deduplicated set of published pairs.
#[derive(Debug, Clone, Default)]
pub struct PublishedPairIndex {
    pairs: HashSet<TargetOutcomePair>,
}

impl PublishedPairIndex {
    pub async fn load(store: &dyn ReportStore) -> StudyResult<Self> {
        let pairs = store.published_pairs().await?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = TargetOutcomePair>) -> Self {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    /// Membership ignores `active`.
    pub fn contains(&self, pair: &TargetOutcomePair) -> bool {
        self.pairs.contains(pair)
    }

    pub fn is_published(&self, target: i64, outcome: i64) -> bool {
        self.contains(&TargetOutcomePair::new(target, outcome, false))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Reads published pairs from the report tables on the OHDSI connection.
pub struct SqlReportStore {
    executor: Arc<dyn QueryExecutor>,
    registry: Arc<dyn ConnectionRegistry>,
    templates: Arc<TemplateStore>,
    translator: DialectTranslator,
    connection: String,
    schema: String,
}

impl SqlReportStore {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        registry: Arc<dyn ConnectionRegistry>,
        templates: Arc<TemplateStore>,
        connection: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            registry,
            templates,
            translator: DialectTranslator::new(),
            connection: connection.into(),
            schema: schema.into(),
        }
    }
}

impl ReportStore for SqlReportStore {
    fn published_pairs<'a>(&'a self) -> BoxFuture<'a, StudyResult<Vec<TargetOutcomePair>>> {
        Box::pin(async move {
            let rendered = render(
                self.templates.get(TemplateKind::PublishedPairs),
                &["ohdsi_schema", "report_status"],
                &[
                    Fragment::literal(self.schema.as_str()),
                    Fragment::param(PUBLISHED_STATUS),
                ],
            )?;
            let target = self.registry.resolve(&self.connection)?;
            let session = SessionContext::generate();
            let statement = self.translator.translate(
                &rendered,
                Dialect::CANONICAL,
                target.dialect,
                Some(&session),
                target.default_schema.as_deref(),
            )?;

            let rows = self.executor.execute(&self.connection, &statement).await?;
            let pairs = rows
                .iter()
                .map(project::<TargetOutcomePair, _>)
                .collect::<StudyResult<Vec<_>>>()?;
            tracing::debug!(pairs = pairs.len(), "loaded published pairs");
            Ok(pairs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStore(Vec<TargetOutcomePair>);

    impl ReportStore for FixedStore {
        fn published_pairs<'a>(&'a self) -> BoxFuture<'a, StudyResult<Vec<TargetOutcomePair>>> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    #[test]
    fn test_equality_ignores_active() {
        let a = TargetOutcomePair::new(1, 2, true);
        let b = TargetOutcomePair::new(1, 2, false);
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);

        assert_ne!(a, TargetOutcomePair::new(2, 1, true));
    }

    #[tokio::test]
    async fn test_load_deduplicates() {
        let store = FixedStore(vec![
            TargetOutcomePair::new(1, 2, true),
            TargetOutcomePair::new(1, 2, false),
            TargetOutcomePair::new(3, 4, true),
        ]);
        let index = PublishedPairIndex::load(&store).await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.is_published(1, 2));
        assert!(index.contains(&TargetOutcomePair::new(3, 4, false)));
        assert!(!index.is_published(4, 3));
    }
}
