//! Row projection.
//!
//! Each record type declares an ordered table of [`FieldSpec`]s: the source
//! column, whether it must be present, and a typed setter. The setter variant
//! fixes the conversion applied to the column value.

use rust_decimal::prelude::*;
use serde_json::Value;

use crate::engine::RowAccess;
use crate::error::{StudyError, StudyResult};
use crate::model::*;

/// Fractional digits kept on decimal statistics.
pub const STATISTIC_SCALE: u32 = 5;

/// Typed field setter.
pub enum Setter<T> {
    Long(fn(&mut T, i64)),
    Int(fn(&mut T, i32)),
    /// Nullable text; SQL NULL becomes `None`.
    Text(fn(&mut T, Option<String>)),
    Flag(fn(&mut T, bool)),
    Decimal(fn(&mut T, Decimal)),
}

/// Column → field mapping entry.
pub struct FieldSpec<T> {
    pub column: &'static str,
    pub required: bool,
    pub setter: Setter<T>,
}

impl<T> FieldSpec<T> {
    pub const fn required(column: &'static str, setter: Setter<T>) -> Self {
        Self {
            column,
            required: true,
            setter,
        }
    }

    /// A column that may be absent from the result; the field keeps its default.
    pub const fn optional(column: &'static str, setter: Setter<T>) -> Self {
        Self {
            column,
            required: false,
            setter,
        }
    }

    fn apply(&self, record: &mut T, value: &Value) -> StudyResult<()> {
        match &self.setter {
            Setter::Long(set) => set(record, to_long(self.column, value)?),
            Setter::Int(set) => {
                let v = to_long(self.column, value)?;
                let v = i32::try_from(v).map_err(|_| {
                    StudyError::projection(self.column, format!("{} does not fit in 32 bits", v))
                })?;
                set(record, v)
            }
            Setter::Text(set) => set(record, to_text(value)),
            Setter::Flag(set) => set(record, to_flag(self.column, value)?),
            Setter::Decimal(set) => set(record, to_decimal(self.column, value)?),
        }
        Ok(())
    }
}

/// A record that can be built from a result row.
pub trait Projection: Default + Sized + 'static {
    const FIELDS: &'static [FieldSpec<Self>];
}

/// Project one row into `T`.
pub fn project<T, R>(row: &R) -> StudyResult<T>
where
    T: Projection,
    R: RowAccess + ?Sized,
{
    let mut record = T::default();
    for field in T::FIELDS {
        match row.value(field.column) {
            Some(value) => field.apply(&mut record, value)?,
            None if field.required => {
                return Err(StudyError::projection(
                    field.column,
                    "column missing from result",
                ));
            }
            None => {}
        }
    }
    Ok(record)
}

/// Project one row into the record for `shape`.
pub fn project_row<R: RowAccess + ?Sized>(row: &R, shape: Shape) -> StudyResult<StatisticRow> {
    Ok(match shape {
        Shape::Prevalence => StatisticRow::Prevalence(project(row)?),
        Shape::Distribution => StatisticRow::Distribution(project(row)?),
        Shape::Dashboard => StatisticRow::Dashboard(project(row)?),
        Shape::CohortSetListItem => StatisticRow::CohortSetListItem(project(row)?),
        Shape::CohortDefinition => StatisticRow::CohortDefinition(project(row)?),
        Shape::CohortSetPrevalence => StatisticRow::CohortSetPrevalence(project(row)?),
        Shape::CohortSetOutcome => StatisticRow::CohortSetOutcome(project(row)?),
    })
}

/// Truncate toward zero to [`STATISTIC_SCALE`] digits, keeping that scale.
///
/// The full binary value of `value` is kept before truncating, so `2.3`
/// (stored as 2.29999...) becomes `2.29999`.
pub fn truncate_statistic(value: f64) -> Option<Decimal> {
    let mut d = Decimal::from_f64_retain(value)?
        .round_dp_with_strategy(STATISTIC_SCALE, RoundingStrategy::ToZero);
    d.rescale(STATISTIC_SCALE);
    if d.is_zero() {
        d.set_sign_positive(true);
    }
    Some(d)
}

fn type_error(column: &str, expected: &str, value: &Value) -> StudyError {
    StudyError::projection(column, format!("expected {}, got {}", expected, value))
}

fn to_long(column: &str, value: &Value) -> StudyResult<i64> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(|| type_error(column, "an integer", value)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| {
                s.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
            .ok_or_else(|| type_error(column, "an integer", value)),
        _ => Err(type_error(column, "an integer", value)),
    }
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn to_flag(column: &str, value: &Value) -> StudyResult<bool> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        _ => to_long(column, value).map(|v| v != 0),
    }
}

fn to_decimal(column: &str, value: &Value) -> StudyResult<Decimal> {
    let raw = match value {
        Value::Null => 0.0,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| type_error(column, "a number", value))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| type_error(column, "a number", value))?,
        _ => return Err(type_error(column, "a number", value)),
    };
    truncate_statistic(raw)
        .ok_or_else(|| StudyError::projection(column, format!("{} is not a finite decimal", raw)))
}

impl Projection for PrevalenceStat {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required("covariate_id", Setter::Long(|r: &mut Self, v| r.covariate_id = v)),
        FieldSpec::required("covariate_name", Setter::Text(|r: &mut Self, v| r.covariate_name = v)),
        FieldSpec::required("analysis_id", Setter::Long(|r: &mut Self, v| r.analysis_id = v)),
        FieldSpec::required("analysis_name", Setter::Text(|r: &mut Self, v| r.analysis_name = v)),
        FieldSpec::required("domain_id", Setter::Text(|r: &mut Self, v| r.domain_id = v)),
        FieldSpec::required("time_window", Setter::Text(|r: &mut Self, v| r.time_window = v)),
        FieldSpec::required("concept_id", Setter::Long(|r: &mut Self, v| r.concept_id = v)),
        FieldSpec::required("count_value", Setter::Long(|r: &mut Self, v| r.count_value = v)),
        FieldSpec::required("stat_value", Setter::Decimal(|r: &mut Self, v| r.stat_value = v)),
        FieldSpec::required("z_score", Setter::Decimal(|r: &mut Self, v| r.z_score = v)),
        FieldSpec::optional(
            "min_levels_of_separation",
            Setter::Long(|r: &mut Self, v| r.distance = v),
        ),
    ];
}

impl Projection for DistributionStat {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required("covariate_id", Setter::Long(|r: &mut Self, v| r.covariate_id = v)),
        FieldSpec::required("covariate_name", Setter::Text(|r: &mut Self, v| r.covariate_name = v)),
        FieldSpec::required("analysis_id", Setter::Long(|r: &mut Self, v| r.analysis_id = v)),
        FieldSpec::required("analysis_name", Setter::Text(|r: &mut Self, v| r.analysis_name = v)),
        FieldSpec::required("domain_id", Setter::Text(|r: &mut Self, v| r.domain_id = v)),
        FieldSpec::required("time_window", Setter::Text(|r: &mut Self, v| r.time_window = v)),
        FieldSpec::required("concept_id", Setter::Long(|r: &mut Self, v| r.concept_id = v)),
        FieldSpec::required("count_value", Setter::Long(|r: &mut Self, v| r.count_value = v)),
        FieldSpec::required("avg_value", Setter::Decimal(|r: &mut Self, v| r.avg_value = v)),
        FieldSpec::required("stdev_value", Setter::Decimal(|r: &mut Self, v| r.stdev_value = v)),
        FieldSpec::required("min_value", Setter::Long(|r: &mut Self, v| r.min_value = v)),
        FieldSpec::required("p10_value", Setter::Long(|r: &mut Self, v| r.p10_value = v)),
        FieldSpec::required("p25_value", Setter::Long(|r: &mut Self, v| r.p25_value = v)),
        FieldSpec::required("median_value", Setter::Long(|r: &mut Self, v| r.median_value = v)),
        FieldSpec::required("p75_value", Setter::Long(|r: &mut Self, v| r.p75_value = v)),
        FieldSpec::required("p90_value", Setter::Long(|r: &mut Self, v| r.p90_value = v)),
        FieldSpec::required("max_value", Setter::Long(|r: &mut Self, v| r.max_value = v)),
        FieldSpec::required("z_score", Setter::Decimal(|r: &mut Self, v| r.z_score = v)),
        FieldSpec::optional(
            "min_levels_of_separation",
            Setter::Long(|r: &mut Self, v| r.distance = v),
        ),
    ];
}

impl Projection for DashboardItem {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required(
            "target_cohort_definition_id",
            Setter::Long(|r: &mut Self, v| r.target_cohort_id = v),
        ),
        FieldSpec::required(
            "target_cohort_name",
            Setter::Text(|r: &mut Self, v| r.target_cohort_name = v),
        ),
        FieldSpec::required(
            "outcome_cohort_definition_id",
            Setter::Long(|r: &mut Self, v| r.outcome_cohort_id = v),
        ),
        FieldSpec::required(
            "outcome_cohort_name",
            Setter::Text(|r: &mut Self, v| r.outcome_cohort_name = v),
        ),
        FieldSpec::required(
            "outcome_concept_id",
            Setter::Long(|r: &mut Self, v| r.outcome_concept_id = v),
        ),
        FieldSpec::required(
            "concept_name",
            Setter::Text(|r: &mut Self, v| r.outcome_concept_name = v),
        ),
        FieldSpec::required("seriousness", Setter::Long(|r: &mut Self, v| r.seriousness = v)),
        FieldSpec::required("incidence", Setter::Decimal(|r: &mut Self, v| r.incidence = v)),
        FieldSpec::required("estimate", Setter::Decimal(|r: &mut Self, v| r.estimate = v)),
        FieldSpec::required("on_label", Setter::Int(|r: &mut Self, v| r.on_label = v)),
        FieldSpec::required("nc", Setter::Int(|r: &mut Self, v| r.negative_control = v)),
        FieldSpec::optional("requested", Setter::Int(|r: &mut Self, v| r.requested = v)),
        FieldSpec::optional(
            "min_levels_of_separation",
            Setter::Int(|r: &mut Self, v| r.distance = v),
        ),
    ];
}

impl Projection for CohortSetListItem {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required("id", Setter::Int(|r: &mut Self, v| r.id = v)),
        FieldSpec::required("name", Setter::Text(|r: &mut Self, v| r.name = v)),
        FieldSpec::required("description", Setter::Text(|r: &mut Self, v| r.description = v)),
        FieldSpec::required("members", Setter::Int(|r: &mut Self, v| r.members = v)),
    ];
}

impl Projection for CohortDefinitionSummary {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required(
            "cohort_definition_id",
            Setter::Long(|r: &mut Self, v| r.cohort_id = v),
        ),
        FieldSpec::required(
            "cohort_definition_name",
            Setter::Text(|r: &mut Self, v| r.cohort_name = v),
        ),
        FieldSpec::required("short_name", Setter::Text(|r: &mut Self, v| r.cohort_short_name = v)),
    ];
}

impl Projection for CohortSetPrevalenceStat {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required("source_id", Setter::Int(|r: &mut Self, v| r.source_id = v)),
        FieldSpec::required("source_key", Setter::Text(|r: &mut Self, v| r.source_key = v)),
        FieldSpec::required("source_name", Setter::Text(|r: &mut Self, v| r.source_name = v)),
        FieldSpec::required(
            "cohort_definition_id",
            Setter::Long(|r: &mut Self, v| r.cohort_id = v),
        ),
        FieldSpec::required(
            "cohort_definition_name",
            Setter::Text(|r: &mut Self, v| r.cohort_name = v),
        ),
        FieldSpec::required("short_name", Setter::Text(|r: &mut Self, v| r.cohort_short_name = v)),
        FieldSpec::required("covariate_id", Setter::Long(|r: &mut Self, v| r.covariate_id = v)),
        FieldSpec::required("covariate_name", Setter::Text(|r: &mut Self, v| r.covariate_name = v)),
        FieldSpec::required("analysis_id", Setter::Long(|r: &mut Self, v| r.analysis_id = v)),
        FieldSpec::required("analysis_name", Setter::Text(|r: &mut Self, v| r.analysis_name = v)),
        FieldSpec::required("domain_id", Setter::Text(|r: &mut Self, v| r.domain_id = v)),
        FieldSpec::required("time_window", Setter::Text(|r: &mut Self, v| r.time_window = v)),
        FieldSpec::required("concept_id", Setter::Long(|r: &mut Self, v| r.concept_id = v)),
        FieldSpec::required("count_value", Setter::Long(|r: &mut Self, v| r.count_value = v)),
        FieldSpec::required("stat_value", Setter::Decimal(|r: &mut Self, v| r.stat_value = v)),
    ];
}

impl Projection for CohortSetOutcomeItem {
    const FIELDS: &'static [FieldSpec<Self>] = &[
        FieldSpec::required(
            "outcome_cohort_definition_id",
            Setter::Long(|r: &mut Self, v| r.outcome_cohort_id = v),
        ),
        FieldSpec::required(
            "outcome_cohort_name",
            Setter::Text(|r: &mut Self, v| r.outcome_cohort_name = v),
        ),
        FieldSpec::required(
            "outcome_concept_id",
            Setter::Long(|r: &mut Self, v| r.outcome_concept_id = v),
        ),
    ];
}
