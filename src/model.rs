//! Statistic records returned by the service.
//!
//! All records serialize with camelCase field names. Decimal statistics carry
//! a fixed scale of 5 and serialize as strings so the scale survives. Text
//! columns read from the warehouse are optional and serialize NULL as `null`.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::repository::StudySource;

/// Categorical covariate statistic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrevalenceStat {
    pub covariate_id: i64,
    pub covariate_name: Option<String>,
    pub analysis_id: i64,
    pub analysis_name: Option<String>,
    pub domain_id: Option<String>,
    pub time_window: Option<String>,
    pub concept_id: i64,
    pub count_value: i64,
    pub stat_value: Decimal,
    pub z_score: Decimal,
    /// Levels of separation from the explored concept (vocabulary queries only).
    pub distance: i64,
}

/// Continuous covariate statistic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStat {
    pub covariate_id: i64,
    pub covariate_name: Option<String>,
    pub analysis_id: i64,
    pub analysis_name: Option<String>,
    pub domain_id: Option<String>,
    pub time_window: Option<String>,
    pub concept_id: i64,
    pub count_value: i64,
    pub avg_value: Decimal,
    pub stdev_value: Decimal,
    pub min_value: i64,
    pub p10_value: i64,
    pub p25_value: i64,
    pub median_value: i64,
    pub p75_value: i64,
    pub p90_value: i64,
    pub max_value: i64,
    pub z_score: Decimal,
    pub distance: i64,
}

/// One target/outcome row of a study dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardItem {
    pub target_cohort_id: i64,
    pub target_cohort_name: Option<String>,
    pub outcome_cohort_id: i64,
    pub outcome_cohort_name: Option<String>,
    pub outcome_concept_id: i64,
    pub outcome_concept_name: Option<String>,
    pub seriousness: i64,
    pub incidence: Decimal,
    pub estimate: Decimal,
    pub on_label: i32,
    pub negative_control: i32,
    pub requested: i32,
    /// 1 when the target/outcome pair appears in a published report.
    pub published: i32,
    pub distance: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSetListItem {
    pub id: i32,
    pub name: Option<String>,
    pub description: Option<String>,
    pub members: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortDefinitionSummary {
    pub cohort_id: i64,
    pub cohort_name: Option<String>,
    pub cohort_short_name: Option<String>,
}

/// Prevalence of one covariate across the cohorts of a cohort set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSetPrevalenceStat {
    pub source_id: i32,
    pub source_key: Option<String>,
    pub source_name: Option<String>,
    pub cohort_id: i64,
    pub cohort_name: Option<String>,
    pub cohort_short_name: Option<String>,
    pub covariate_id: i64,
    pub covariate_name: Option<String>,
    pub analysis_id: i64,
    pub analysis_name: Option<String>,
    pub domain_id: Option<String>,
    pub time_window: Option<String>,
    pub concept_id: i64,
    pub count_value: i64,
    pub stat_value: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSetOutcomeItem {
    pub outcome_cohort_id: i64,
    pub outcome_cohort_name: Option<String>,
    pub outcome_concept_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyListItem {
    pub id: i32,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySourceItem {
    pub source_id: i32,
    pub source_key: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyCohortItem {
    pub cohort_id: i64,
    pub name: String,
    pub short_name: String,
}

/// A study with its cohorts and data sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDetail {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub cohorts: Vec<StudyCohortItem>,
    pub sources: Vec<StudySourceItem>,
}

impl From<StudySource> for StudySourceItem {
    fn from(source: StudySource) -> Self {
        Self {
            source_id: source.id,
            source_key: source.key,
            name: source.name,
        }
    }
}

/// Record shapes a result row can be projected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Prevalence,
    Distribution,
    Dashboard,
    CohortSetListItem,
    CohortDefinition,
    CohortSetPrevalence,
    CohortSetOutcome,
}

/// A projected row of any [`Shape`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatisticRow {
    Prevalence(PrevalenceStat),
    Distribution(DistributionStat),
    Dashboard(DashboardItem),
    CohortSetListItem(CohortSetListItem),
    CohortDefinition(CohortDefinitionSummary),
    CohortSetPrevalence(CohortSetPrevalenceStat),
    CohortSetOutcome(CohortSetOutcomeItem),
}

impl StatisticRow {
    pub fn shape(&self) -> Shape {
        match self {
            StatisticRow::Prevalence(_) => Shape::Prevalence,
            StatisticRow::Distribution(_) => Shape::Distribution,
            StatisticRow::Dashboard(_) => Shape::Dashboard,
            StatisticRow::CohortSetListItem(_) => Shape::CohortSetListItem,
            StatisticRow::CohortDefinition(_) => Shape::CohortDefinition,
            StatisticRow::CohortSetPrevalence(_) => Shape::CohortSetPrevalence,
            StatisticRow::CohortSetOutcome(_) => Shape::CohortSetOutcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_camel_case_and_decimal_strings() {
        let item = DashboardItem {
            target_cohort_id: 1,
            outcome_cohort_id: 2,
            incidence: Decimal::new(250000, 5),
            negative_control: 1,
            ..Default::default()
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["targetCohortId"], json!(1));
        assert_eq!(value["negativeControl"], json!(1));
        assert_eq!(value["incidence"], json!("2.50000"));
    }

    #[test]
    fn test_statistic_row_serializes_inner_record() {
        let row = StatisticRow::CohortSetOutcome(CohortSetOutcomeItem {
            outcome_cohort_id: 9,
            outcome_cohort_name: Some("MI".into()),
            outcome_concept_id: 4329847,
        });
        assert_eq!(row.shape(), Shape::CohortSetOutcome);
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            json!({"outcomeCohortId": 9, "outcomeCohortName": "MI", "outcomeConceptId": 4329847})
        );
    }

    #[test]
    fn test_null_text_serializes_as_null() {
        let stat = DistributionStat {
            domain_id: None,
            time_window: Some("Long term".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&stat).unwrap();
        assert_eq!(value["domainId"], Value::Null);
        assert_eq!(value["timeWindow"], json!("Long term"));
    }
}
