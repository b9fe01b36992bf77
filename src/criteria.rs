//! Filter criteria → SQL boolean fragments.
//!
//! Each filter dimension (search term, analysis ids, time windows, domains)
//! produces at most one clause. The caller AND-joins them with
//! [`join_clauses`]. Free text is always bound as a parameter; only
//! validated integers are written into the SQL text.

use serde::{Deserialize, Serialize};

use crate::engine::SqlValue;
use crate::error::{StudyError, StudyResult};
use crate::template::Fragment;

/// A boolean SQL fragment with its bound parameters.
pub type CriteriaClause = Fragment;

/// Optional filters for covariate queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criteria {
    pub search_term: Option<String>,
    #[serde(default)]
    pub analysis_ids: Vec<String>,
    #[serde(default)]
    pub time_windows: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl Criteria {
    pub fn is_empty(&self) -> bool {
        self.search_term.as_deref().is_none_or(str::is_empty)
            && self.analysis_ids.is_empty()
            && self.time_windows.is_empty()
            && self.domains.is_empty()
    }
}

/// An analysis id or an inclusive range of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSelector {
    Id(i64),
    Range { low: i64, high: i64 },
}

impl AnalysisSelector {
    /// Parse `"5"` or `"10:20"`.
    pub fn parse(token: &str) -> StudyResult<Self> {
        let parts: Vec<&str> = token.split(':').collect();
        match parts.as_slice() {
            [id] => Ok(AnalysisSelector::Id(parse_id(token, id)?)),
            [low, high] => {
                let low = parse_id(token, low)?;
                let high = parse_id(token, high)?;
                if low > high {
                    return Err(StudyError::malformed(
                        token,
                        "range start is greater than range end",
                    ));
                }
                Ok(AnalysisSelector::Range { low, high })
            }
            _ => Err(StudyError::malformed(
                token,
                "expected an id or a single 'low:high' range",
            )),
        }
    }
}

fn parse_id(token: &str, part: &str) -> StudyResult<i64> {
    part.trim()
        .parse::<i64>()
        .map_err(|_| StudyError::malformed(token, format!("'{}' is not an analysis id", part)))
}

/// Escape character used in generated LIKE patterns.
pub const LIKE_ESCAPE: char = '!';

/// `%term%` with LIKE metacharacters escaped by [`LIKE_ESCAPE`].
pub fn like_contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '!' | '%' | '_' | '[') {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Builds criteria clauses against a results table alias.
#[derive(Debug, Clone)]
pub struct CriteriaClauseBuilder {
    alias: String,
}

impl Default for CriteriaClauseBuilder {
    fn default() -> Self {
        Self::new("ar1")
    }
}

impl CriteriaClauseBuilder {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
        }
    }

    /// Build one clause per non-empty filter dimension.
    pub fn build(&self, criteria: &Criteria) -> StudyResult<Vec<CriteriaClause>> {
        let mut clauses = Vec::new();
        let a = &self.alias;

        if let Some(term) = criteria.search_term.as_deref().filter(|t| !t.is_empty()) {
            clauses.push(Fragment::bound(
                format!("lower({a}.covariate_name) LIKE ? ESCAPE '{LIKE_ESCAPE}'"),
                vec![SqlValue::String(like_contains_pattern(&term.to_lowercase()))],
            ));
        }

        if !criteria.analysis_ids.is_empty() {
            clauses.push(self.analysis_clause(&criteria.analysis_ids)?);
        }

        if !criteria.time_windows.is_empty() {
            let terms = vec![format!("{a}.time_window = ?"); criteria.time_windows.len()];
            clauses.push(Fragment::bound(
                format!("({})", terms.join(" OR ")),
                criteria
                    .time_windows
                    .iter()
                    .map(|w| SqlValue::from(w.as_str()))
                    .collect(),
            ));
        }

        if !criteria.domains.is_empty() {
            let mut terms = Vec::with_capacity(criteria.domains.len());
            let mut params = Vec::new();
            for domain in &criteria.domains {
                if domain.eq_ignore_ascii_case("null") {
                    terms.push(format!("{a}.domain_id IS NULL"));
                } else {
                    terms.push(format!("lower({a}.domain_id) = lower(?)"));
                    params.push(SqlValue::from(domain.as_str()));
                }
            }
            clauses.push(Fragment::bound(format!("({})", terms.join(" OR ")), params));
        }

        Ok(clauses)
    }

    fn analysis_clause(&self, tokens: &[String]) -> StudyResult<CriteriaClause> {
        let a = &self.alias;
        let mut ids = Vec::new();
        let mut ranges = Vec::new();

        for token in tokens {
            match AnalysisSelector::parse(token)? {
                AnalysisSelector::Id(id) => ids.push(id.to_string()),
                AnalysisSelector::Range { low, high } => ranges.push(format!(
                    "({a}.analysis_id >= {low} AND {a}.analysis_id <= {high})"
                )),
            }
        }

        let mut groups = Vec::new();
        if !ids.is_empty() {
            groups.push(format!("{a}.analysis_id IN ({})", ids.join(",")));
        }
        groups.extend(ranges);

        Ok(Fragment::literal(format!("({})", groups.join(" OR "))))
    }
}

/// AND-join clauses into the `criteria_clauses` template value.
///
/// Non-empty results start with `AND` so they can follow a fixed predicate.
pub fn join_clauses(clauses: &[CriteriaClause]) -> Fragment {
    if clauses.is_empty() {
        return Fragment::empty();
    }
    let sql: Vec<&str> = clauses.iter().map(|c| c.sql.as_str()).collect();
    Fragment::bound(
        format!(" AND\n{}", sql.join("\n AND ")),
        clauses.iter().flat_map(|c| c.params.iter().cloned()).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn criteria() -> Criteria {
        Criteria::default()
    }

    #[test]
    fn test_empty_criteria_builds_nothing() {
        let builder = CriteriaClauseBuilder::default();
        assert!(builder.build(&criteria()).unwrap().is_empty());

        let blank = Criteria {
            search_term: Some(String::new()),
            ..criteria()
        };
        assert!(builder.build(&blank).unwrap().is_empty());
        assert!(blank.is_empty());
    }

    #[test]
    fn test_ids_and_ranges_share_one_clause() {
        let c = Criteria {
            analysis_ids: vec!["5".into(), "10:20".into()],
            ..criteria()
        };
        let clauses = CriteriaClauseBuilder::default().build(&c).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(
            clauses[0].sql,
            "(ar1.analysis_id IN (5) OR (ar1.analysis_id >= 10 AND ar1.analysis_id <= 20))"
        );
        assert!(clauses[0].params.is_empty());
    }

    #[test]
    fn test_ranges_only() {
        let c = Criteria {
            analysis_ids: vec!["1:2".into(), "7:9".into()],
            ..criteria()
        };
        let clauses = CriteriaClauseBuilder::new("x").build(&c).unwrap();
        assert_eq!(
            clauses[0].sql,
            "((x.analysis_id >= 1 AND x.analysis_id <= 2) OR (x.analysis_id >= 7 AND x.analysis_id <= 9))"
        );
    }

    #[test]
    fn test_malformed_selectors() {
        for token in ["5:10:20", "abc", "5:", "", "20:10", "1; DROP TABLE x"] {
            let c = Criteria {
                analysis_ids: vec![token.to_string()],
                ..criteria()
            };
            let err = CriteriaClauseBuilder::default().build(&c).unwrap_err();
            assert!(
                matches!(err, StudyError::MalformedCriteria { .. }),
                "{token}: {err}"
            );
        }
    }

    #[test]
    fn test_search_term_is_bound_and_escaped() {
        let c = Criteria {
            search_term: Some("Type_2 100%'".into()),
            ..criteria()
        };
        let clauses = CriteriaClauseBuilder::default().build(&c).unwrap();
        assert_eq!(
            clauses[0].sql,
            "lower(ar1.covariate_name) LIKE ? ESCAPE '!'"
        );
        assert_eq!(
            clauses[0].params,
            vec![SqlValue::String("%type!_2 100!%'%".into())]
        );
    }

    #[test]
    fn test_time_windows() {
        let c = Criteria {
            time_windows: vec!["Long term".into(), "Short term".into()],
            ..criteria()
        };
        let clauses = CriteriaClauseBuilder::default().build(&c).unwrap();
        assert_eq!(
            clauses[0].sql,
            "(ar1.time_window = ? OR ar1.time_window = ?)"
        );
        assert_eq!(clauses[0].params.len(), 2);
    }

    #[test]
    fn test_null_domain_uses_is_null() {
        let c = Criteria {
            domains: vec!["Condition".into(), "NULL".into()],
            ..criteria()
        };
        let clauses = CriteriaClauseBuilder::default().build(&c).unwrap();
        assert_eq!(
            clauses[0].sql,
            "(lower(ar1.domain_id) = lower(?) OR ar1.domain_id IS NULL)"
        );
        assert_eq!(clauses[0].params, vec![SqlValue::from("Condition")]);
    }

    #[test]
    fn test_join_clauses() {
        assert!(join_clauses(&[]).is_empty());

        let joined = join_clauses(&[
            Fragment::bound("a = ?", vec![SqlValue::Int(1)]),
            Fragment::literal("b IS NULL"),
            Fragment::bound("c = ?", vec![SqlValue::Int(3)]),
        ]);
        assert_eq!(joined.sql, " AND\na = ?\n AND b IS NULL\n AND c = ?");
        assert_eq!(joined.params, vec![SqlValue::Int(1), SqlValue::Int(3)]);
    }
}
