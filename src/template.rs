//! SQL templates and placeholder substitution.
//!
//! Templates are authored in the canonical (SQL Server) dialect and contain
//! `@name` placeholders. Rendering pairs placeholder names with
//! [`Fragment`]s; each fragment is raw SQL text plus the bind parameters its
//! `?` markers refer to.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::engine::SqlValue;
use crate::error::{StudyError, StudyResult};

/// The named queries the service knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    CohortSets,
    CohortDefinition,
    Covariate,
    CovariateStats,
    CovariateStatsVocab,
    CovariateDist,
    CovariateDistVocab,
    Dashboard,
    DashboardVocab,
    DashboardOutcomes,
    PublishedPairs,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 11] = [
        TemplateKind::CohortSets,
        TemplateKind::CohortDefinition,
        TemplateKind::Covariate,
        TemplateKind::CovariateStats,
        TemplateKind::CovariateStatsVocab,
        TemplateKind::CovariateDist,
        TemplateKind::CovariateDistVocab,
        TemplateKind::Dashboard,
        TemplateKind::DashboardVocab,
        TemplateKind::DashboardOutcomes,
        TemplateKind::PublishedPairs,
    ];

    /// File name of the template inside a template directory.
    pub fn file_name(self) -> &'static str {
        match self {
            TemplateKind::CohortSets => "cohort_sets.sql",
            TemplateKind::CohortDefinition => "cohort_definition.sql",
            TemplateKind::Covariate => "covariate.sql",
            TemplateKind::CovariateStats => "covariate_stats.sql",
            TemplateKind::CovariateStatsVocab => "covariate_stats_vocab.sql",
            TemplateKind::CovariateDist => "covariate_dist.sql",
            TemplateKind::CovariateDistVocab => "covariate_dist_vocab.sql",
            TemplateKind::Dashboard => "dashboard.sql",
            TemplateKind::DashboardVocab => "dashboard_vocab.sql",
            TemplateKind::DashboardOutcomes => "dashboard_outcomes.sql",
            TemplateKind::PublishedPairs => "published_pairs.sql",
        }
    }

    fn builtin_text(self) -> &'static str {
        match self {
            TemplateKind::CohortSets => include_str!("../resources/sql/cohort_sets.sql"),
            TemplateKind::CohortDefinition => {
                include_str!("../resources/sql/cohort_definition.sql")
            }
            TemplateKind::Covariate => include_str!("../resources/sql/covariate.sql"),
            TemplateKind::CovariateStats => include_str!("../resources/sql/covariate_stats.sql"),
            TemplateKind::CovariateStatsVocab => {
                include_str!("../resources/sql/covariate_stats_vocab.sql")
            }
            TemplateKind::CovariateDist => include_str!("../resources/sql/covariate_dist.sql"),
            TemplateKind::CovariateDistVocab => {
                include_str!("../resources/sql/covariate_dist_vocab.sql")
            }
            TemplateKind::Dashboard => include_str!("../resources/sql/dashboard.sql"),
            TemplateKind::DashboardVocab => include_str!("../resources/sql/dashboard_vocab.sql"),
            TemplateKind::DashboardOutcomes => {
                include_str!("../resources/sql/dashboard_outcomes.sql")
            }
            TemplateKind::PublishedPairs => include_str!("../resources/sql/published_pairs.sql"),
        }
    }
}

/// An immutable, named SQL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    name: String,
    text: String,
}

impl SqlTemplate {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Every template the service needs, loaded once at startup.
///
/// The store is always complete: construction fails if a template is missing,
/// so lookups never do.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: HashMap<TemplateKind, SqlTemplate>,
}

impl TemplateStore {
    /// Templates compiled into the binary.
    pub fn builtin() -> Self {
        let templates = TemplateKind::ALL
            .iter()
            .map(|kind| {
                (
                    *kind,
                    SqlTemplate::new(kind.file_name(), kind.builtin_text()),
                )
            })
            .collect();
        Self { templates }
    }

    /// Load every template from `dir`, one `.sql` file per [`TemplateKind`].
    pub fn load_dir(dir: &Path) -> StudyResult<Self> {
        let mut templates = HashMap::new();
        for kind in TemplateKind::ALL {
            let path = dir.join(kind.file_name());
            let text = std::fs::read_to_string(&path).map_err(|e| {
                StudyError::Config(format!("cannot read template {}: {}", path.display(), e))
            })?;
            templates.insert(kind, SqlTemplate::new(kind.file_name(), text));
        }
        tracing::info!("Loaded {} templates from {}", templates.len(), dir.display());
        Ok(Self { templates })
    }

    /// Replace one template, keeping the rest.
    pub fn with_template(mut self, kind: TemplateKind, text: impl Into<String>) -> Self {
        self.templates
            .insert(kind, SqlTemplate::new(kind.file_name(), text));
        self
    }

    pub fn get(&self, kind: TemplateKind) -> &SqlTemplate {
        // Both constructors populate every kind.
        &self.templates[&kind]
    }
}

/// A piece of SQL text together with the parameters bound to its `?` markers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Fragment {
    /// Raw text with no bind parameters.
    pub fn literal(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Text whose `?` markers are bound, in order, to `params`.
    pub fn bound(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A single bind marker.
    pub fn param(value: impl Into<SqlValue>) -> Self {
        Self::bound("?", vec![value.into()])
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

impl From<&str> for Fragment {
    fn from(sql: &str) -> Self {
        Fragment::literal(sql)
    }
}

impl From<String> for Fragment {
    fn from(sql: String) -> Self {
        Fragment::literal(sql)
    }
}

/// Canonical-dialect SQL produced by [`render`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl fmt::Display for RenderedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Substitute `@name` placeholders in `template`.
///
/// `names` and `values` are paired by position and must have equal length.
/// A placeholder matches a name only as a whole identifier; matching is
/// purely textual, so placeholders inside string literals are substituted too.
/// Placeholders without a matching name are left in place.
pub fn render(
    template: &SqlTemplate,
    names: &[&str],
    values: &[Fragment],
) -> StudyResult<RenderedStatement> {
    if names.len() != values.len() {
        return Err(StudyError::TemplateArity {
            template: template.name().to_string(),
            names: names.len(),
            values: values.len(),
        });
    }

    let text = template.text();
    let mut sql = String::with_capacity(text.len());
    let mut params = Vec::new();
    let mut rest = text;

    while let Some(at) = rest.find('@') {
        sql.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let ident_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let ident = &after[..ident_len];

        match names.iter().position(|name| *name == ident) {
            Some(i) if !ident.is_empty() => {
                sql.push_str(&values[i].sql);
                params.extend(values[i].params.iter().cloned());
            }
            _ => {
                sql.push('@');
                sql.push_str(ident);
            }
        }
        rest = &after[ident_len..];
    }
    sql.push_str(rest);

    Ok(RenderedStatement { sql, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_substitutes_named_values() {
        let t = SqlTemplate::new(
            "t",
            "SELECT * FROM @schema.results WHERE cohort_definition_id = @cohort_id",
        );
        let out = render(&t, &["schema", "cohort_id"], &["res".into(), "42".into()]).unwrap();
        assert_eq!(
            out.sql,
            "SELECT * FROM res.results WHERE cohort_definition_id = 42"
        );
        assert!(out.params.is_empty());
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let t = SqlTemplate::new("t", "SELECT @a, @unknown, @@ROWCOUNT");
        let out = render(&t, &["a"], &["1".into()]).unwrap();
        assert_eq!(out.sql, "SELECT 1, @unknown, @@ROWCOUNT");
    }

    #[test]
    fn test_render_matches_whole_names_only() {
        let t = SqlTemplate::new("t", "@study_id @study_id_x");
        let out = render(&t, &["study_id"], &["7".into()]).unwrap();
        assert_eq!(out.sql, "7 @study_id_x");
    }

    #[test]
    fn test_render_substitutes_inside_literals() {
        let t = SqlTemplate::new("t", "SELECT '@label' AS tag, '@@label' AS raw");
        let out = render(&t, &["label"], &["v2".into()]).unwrap();
        assert_eq!(out.sql, "SELECT 'v2' AS tag, '@v2' AS raw");
    }

    #[test]
    fn test_render_collects_params_in_text_order() {
        let t = SqlTemplate::new("t", "WHERE a = @first AND b = @second AND c = @first");
        let out = render(
            &t,
            &["second", "first"],
            &[Fragment::param("two"), Fragment::param(1i64)],
        )
        .unwrap();
        assert_eq!(out.sql, "WHERE a = ? AND b = ? AND c = ?");
        assert_eq!(
            out.params,
            vec![
                SqlValue::Int(1),
                SqlValue::String("two".to_string()),
                SqlValue::Int(1)
            ]
        );
    }

    #[test]
    fn test_render_rejects_arity_mismatch() {
        let t = SqlTemplate::new("t", "@a @b");
        let err = render(&t, &["a", "b"], &["1".into()]).unwrap_err();
        assert!(matches!(
            err,
            StudyError::TemplateArity {
                names: 2,
                values: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_builtin_store_is_complete() {
        let store = TemplateStore::builtin();
        for kind in TemplateKind::ALL {
            assert!(!store.get(kind).text().trim().is_empty(), "{:?}", kind);
        }
    }

    #[test]
    fn test_with_template_overrides() {
        let store = TemplateStore::builtin().with_template(TemplateKind::Dashboard, "SELECT 1");
        assert_eq!(store.get(TemplateKind::Dashboard).text(), "SELECT 1");
        assert_eq!(store.get(TemplateKind::Dashboard).name(), "dashboard.sql");
    }
}
