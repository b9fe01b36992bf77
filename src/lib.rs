//! # study-analytics
//!
//! Cohort prevalence, covariate distribution and outcome dashboard queries
//! over a pre-computed study results warehouse.
//!
//! ## Pipeline
//!
//! ```text
//! Criteria ──► clauses ──► template ──► canonical SQL ──► dialect SQL ──► rows ──► records
//!            (criteria)   (template)                     (dialect)      (engine)  (projection)
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use study_analytics::prelude::*;
//!
//! let config = StudyConfig::load(Path::new("config.toml"))?;
//! let service = StudyAnalyticsService::from_config(&config).await?;
//!
//! let criteria = Criteria {
//!     search_term: Some("diabetes".into()),
//!     analysis_ids: vec!["101".into(), "200:210".into()],
//!     ..Default::default()
//! };
//! let stats = service.distribution_stats(7, 1770, 2, &criteria).await?;
//! ```
//!
//! ## Canonical Dialect
//!
//! Templates are written for SQL Server with `@name` placeholders and `?`
//! bind markers. See [`dialect`] for the rewrites applied per target.

pub mod config;
pub mod criteria;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod model;
pub mod projection;
pub mod published;
pub mod repository;
pub mod service;
pub mod template;

pub mod prelude {
    pub use crate::config::{ConnectionConfig, StudyConfig};
    pub use crate::criteria::{Criteria, CriteriaClauseBuilder};
    pub use crate::dialect::{Dialect, DialectTranslator, SessionContext, TranslatedStatement};
    pub use crate::engine::{ConnectionRegistry, QueryExecutor, ResultRow, SqlValue, StudyDB};
    pub use crate::error::*;
    pub use crate::model::*;
    pub use crate::published::{PublishedPairIndex, ReportStore, TargetOutcomePair};
    pub use crate::repository::{InMemoryRepository, StudyRepository};
    pub use crate::service::StudyAnalyticsService;
    pub use crate::template::{render, Fragment, TemplateKind, TemplateStore};
}
