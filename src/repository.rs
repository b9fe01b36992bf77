//! Study catalog entities and lookup.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{StudyError, StudyResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySource {
    pub id: i32,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyCohort {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cohorts: Vec<StudyCohort>,
    #[serde(default)]
    pub sources: Vec<StudySource>,
}

/// A named group of cohorts within a study.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSet {
    pub id: i32,
    pub study_id: i32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cohort_ids: Vec<i64>,
}

/// Read-only access to studies, cohorts and cohort sets.
pub trait StudyRepository: Send + Sync {
    fn find_all_studies(&self) -> StudyResult<Vec<Study>>;

    fn find_study(&self, study_id: i32) -> StudyResult<Option<Study>>;

    fn find_cohort_set(&self, cohort_set_id: i32) -> StudyResult<Option<CohortSet>>;
}

/// JSON catalog file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub studies: Vec<Study>,
    #[serde(default)]
    pub cohort_sets: Vec<CohortSet>,
}

/// Repository backed by an in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    studies: BTreeMap<i32, Study>,
    cohort_sets: BTreeMap<i32, CohortSet>,
}

impl InMemoryRepository {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            studies: catalog.studies.into_iter().map(|s| (s.id, s)).collect(),
            cohort_sets: catalog.cohort_sets.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn from_json(json: &str) -> StudyResult<Self> {
        let catalog: Catalog = serde_json::from_str(json)
            .map_err(|e| StudyError::Config(format!("invalid catalog: {}", e)))?;
        Ok(Self::new(catalog))
    }

    pub fn load(path: &Path) -> StudyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let repo = Self::from_json(&content)?;
        tracing::info!(
            "Loaded catalog {} ({} studies, {} cohort sets)",
            path.display(),
            repo.studies.len(),
            repo.cohort_sets.len()
        );
        Ok(repo)
    }

    pub fn with_study(mut self, study: Study) -> Self {
        self.studies.insert(study.id, study);
        self
    }

    pub fn with_cohort_set(mut self, cohort_set: CohortSet) -> Self {
        self.cohort_sets.insert(cohort_set.id, cohort_set);
        self
    }
}

impl StudyRepository for InMemoryRepository {
    fn find_all_studies(&self) -> StudyResult<Vec<Study>> {
        Ok(self.studies.values().cloned().collect())
    }

    fn find_study(&self, study_id: i32) -> StudyResult<Option<Study>> {
        Ok(self.studies.get(&study_id).cloned())
    }

    fn find_cohort_set(&self, cohort_set_id: i32) -> StudyResult<Option<CohortSet>> {
        Ok(self.cohort_sets.get(&cohort_set_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "studies": [{
            "id": 7,
            "name": "Hypertension outcomes",
            "cohorts": [{"id": 1770, "name": "ACE inhibitor new users", "shortName": "ACEi"}],
            "sources": [{"id": 2, "key": "CCAE", "name": "Commercial Claims"}]
        }],
        "cohortSets": [{"id": 3, "studyId": 7, "name": "Targets", "cohortIds": [1770, 1771]}]
    }"#;

    #[test]
    fn test_from_json() {
        let repo = InMemoryRepository::from_json(CATALOG).unwrap();
        let study = repo.find_study(7).unwrap().unwrap();
        assert_eq!(study.sources[0].key, "CCAE");
        assert_eq!(study.description, "");
        assert_eq!(repo.find_cohort_set(3).unwrap().unwrap().cohort_ids, vec![1770, 1771]);
        assert!(repo.find_study(8).unwrap().is_none());
    }

    #[test]
    fn test_study_cohorts_are_read() {
        let repo = InMemoryRepository::from_json(CATALOG).unwrap();
        let cohorts = repo.find_study(7).unwrap().unwrap().cohorts;
        assert_eq!(cohorts.len(), 1);
        assert_eq!(cohorts[0].short_name, "ACEi");
    }

    #[test]
    fn test_demo_catalog_parses() {
        let repo = InMemoryRepository::from_json(include_str!("../demos/catalog.json")).unwrap();
        assert_eq!(repo.find_all_studies().unwrap().len(), 1);
        assert_eq!(repo.find_cohort_set(3).unwrap().unwrap().study_id, 7);
    }

    #[test]
    fn test_invalid_catalog() {
        assert!(matches!(
            InMemoryRepository::from_json("{\"studies\": 1}"),
            Err(StudyError::Config(_))
        ));
    }
}
