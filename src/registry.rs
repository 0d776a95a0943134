//! TTL-cached registry reference data: project types, fact types, fact
//! enum values, fact ranges, and environments.
//!
//! Used to validate workflow filters before any project runs. The cache
//! lives at `~/.imbi-automations/fact-cache.json` and is invalidated
//! when the registry hostname changes or after 24 hours.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::ImbiClient;
use crate::errors::{Error, Result};
use crate::models::{
    ImbiEnvironment, ImbiProjectFactType, ImbiProjectFactTypeEnum, ImbiProjectFactTypeRange,
    ImbiProjectType,
};

pub const CACHE_TTL_HOURS: i64 = 24;
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheData {
    pub version: u32,
    pub hostname: String,
    pub cached_at: DateTime<Utc>,
    pub environments: Vec<ImbiEnvironment>,
    pub project_fact_types: Vec<ImbiProjectFactType>,
    pub project_fact_type_enums: Vec<ImbiProjectFactTypeEnum>,
    pub project_fact_type_ranges: Vec<ImbiProjectFactTypeRange>,
    pub project_types: Vec<ImbiProjectType>,
}

pub struct DataRegistry {
    data: CacheData,
}

impl DataRegistry {
    pub fn default_cache_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".imbi-automations")
            .join("fact-cache.json")
    }

    /// Load from a valid cache file, or fetch the five reference-data
    /// endpoints concurrently and persist the result.
    pub async fn load(client: &ImbiClient, cache_path: &Path) -> Result<Self> {
        let hostname = client.base_url().to_string();
        if let Some(data) = read_cache(cache_path, &hostname) {
            log::debug!("Loaded registry data from cache");
            return Ok(Self { data });
        }

        let (environments, fact_types, fact_type_enums, fact_type_ranges, project_types) = tokio::try_join!(
            client.get_environments(),
            client.get_project_fact_types(),
            client.get_project_fact_type_enums(),
            client.get_project_fact_type_ranges(),
            client.get_project_types(),
        )?;
        let data = CacheData {
            version: CACHE_VERSION,
            hostname,
            cached_at: Utc::now(),
            environments,
            project_fact_types: fact_types,
            project_fact_type_enums: fact_type_enums,
            project_fact_type_ranges: fact_type_ranges,
            project_types,
        };
        log::info!(
            "Loaded {} fact types from the registry",
            data.project_fact_types.len()
        );

        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(cache_path, serde_json::to_string_pretty(&data)?)?;
        log::debug!("Saved registry data to {}", cache_path.display());
        Ok(Self { data })
    }

    pub fn from_data(data: CacheData) -> Self {
        Self { data }
    }

    pub fn environments(&self) -> HashSet<String> {
        self.data
            .environments
            .iter()
            .map(|environment| environment.name.to_lowercase())
            .collect()
    }

    pub fn project_type_slugs(&self) -> HashSet<String> {
        self.data
            .project_types
            .iter()
            .map(|project_type| project_type.slug.clone())
            .collect()
    }

    pub fn project_fact_type_names(&self) -> HashSet<String> {
        self.data
            .project_fact_types
            .iter()
            .map(|fact_type| fact_type.name.clone())
            .collect()
    }

    /// Enum values available for a fact name (across all project types
    /// sharing that name).
    pub fn project_fact_type_values(&self, name: &str) -> HashSet<String> {
        let fact_type_ids: HashSet<i64> = self
            .facts_by_name(name)
            .map(|fact_type| fact_type.id)
            .collect();
        self.data
            .project_fact_type_enums
            .iter()
            .filter(|value| fact_type_ids.contains(&value.fact_type_id))
            .map(|value| value.value.clone())
            .collect()
    }

    /// Validate a value against a fact's data type and constraint.
    ///
    /// Coerces the raw string per the fact's `data_type`, then applies
    /// the `fact_type` constraint: enum membership, range bounds, or
    /// nothing for free-form facts.
    pub fn validate_value(&self, fact_name: &str, value: &str) -> (bool, Option<String>) {
        let Some(fact_type) = self.facts_by_name(fact_name).next() else {
            return (false, Some(format!("unknown fact type: {fact_name}")));
        };

        let numeric = match coerce_value(&fact_type.data_type, value) {
            Ok(numeric) => numeric,
            Err(reason) => return (false, Some(reason)),
        };

        match fact_type.fact_type.as_str() {
            "enum" => {
                let values = self.project_fact_type_values(&fact_type.name);
                if values.contains(value) {
                    (true, None)
                } else {
                    let mut sorted: Vec<&String> = values.iter().collect();
                    sorted.sort();
                    (
                        false,
                        Some(format!(
                            "value must be one of: {}",
                            sorted
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        )),
                    )
                }
            }
            "range" => {
                let Some(number) = numeric else {
                    return (false, Some("range fact requires a numeric value".to_string()));
                };
                let Some(range) = self
                    .data
                    .project_fact_type_ranges
                    .iter()
                    .find(|range| range.fact_type_id == fact_type.id)
                else {
                    return (
                        false,
                        Some("range bounds not defined for range fact type".to_string()),
                    );
                };
                if number >= range.min_value && number <= range.max_value {
                    (true, None)
                } else {
                    (
                        false,
                        Some(format!(
                            "value must be between {} and {}",
                            range.min_value, range.max_value
                        )),
                    )
                }
            }
            _ => (true, None),
        }
    }

    fn facts_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a ImbiProjectFactType> + 'a {
        self.data
            .project_fact_types
            .iter()
            .filter(move |fact_type| fact_type.name.eq_ignore_ascii_case(name))
    }
}

/// Coerce the raw value per the fact's data type, returning its numeric
/// form when it has one.
fn coerce_value(data_type: &str, value: &str) -> std::result::Result<Option<f64>, String> {
    match data_type {
        "boolean" => match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "false" | "0" | "no" => Ok(None),
            _ => Err(format!("cannot convert {value:?} to boolean")),
        },
        "integer" => value
            .parse::<i64>()
            .map(|number| Some(number as f64))
            .map_err(|_| format!("cannot convert {value:?} to integer")),
        "decimal" => value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("cannot convert {value:?} to decimal")),
        "string" => Ok(None),
        "date" => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|_| None)
            .map_err(|err| format!("invalid ISO format for date: {err}")),
        "timestamp" => {
            DateTime::parse_from_rfc3339(&value.replace('Z', "+00:00"))
                .map(|_| None)
                .map_err(|err| format!("invalid ISO format for timestamp: {err}"))
        }
        other => Err(format!("unknown data type: {other}")),
    }
}

/// A cache file is usable when it parses, its hostname matches, and it
/// is younger than the TTL.
fn read_cache(path: &Path, hostname: &str) -> Option<CacheData> {
    let contents = std::fs::read_to_string(path).ok()?;
    let data: CacheData = match serde_json::from_str(&contents) {
        Ok(data) => data,
        Err(err) => {
            log::warn!("Invalid registry cache, refetching: {err}");
            return None;
        }
    };
    if data.hostname != hostname {
        return None;
    }
    let age = Utc::now() - data.cached_at;
    (age < chrono::Duration::hours(CACHE_TTL_HOURS)).then_some(data)
}

/// Validate a workflow filter against registry reference data before any
/// project runs; violations are configuration errors.
pub fn validate_filter(
    registry: &DataRegistry,
    filter: &crate::models::WorkflowFilter,
) -> Result<()> {
    let known_types = registry.project_type_slugs();
    for slug in &filter.project_types {
        if !known_types.contains(slug) {
            return Err(Error::config(format!(
                "filter references unknown project type: {slug}"
            )));
        }
    }
    let known_environments = registry.environments();
    for environment in &filter.project_environments {
        if !known_environments.contains(&environment.to_lowercase()) {
            return Err(Error::config(format!(
                "filter references unknown environment: {environment}"
            )));
        }
    }
    for (name, value) in &filter.project_facts {
        let (ok, reason) = registry.validate_value(name, value);
        if !ok {
            return Err(Error::config(format!(
                "filter fact {name:?}: {}",
                reason.unwrap_or_else(|| "invalid value".to_string())
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DataRegistry {
        DataRegistry::from_data(CacheData {
            version: CACHE_VERSION,
            hostname: "https://imbi.example.com".to_string(),
            cached_at: Utc::now(),
            environments: vec![
                serde_json::from_value(serde_json::json!({"name": "Production"})).unwrap(),
                serde_json::from_value(serde_json::json!({"name": "Staging"})).unwrap(),
            ],
            project_fact_types: vec![
                serde_json::from_value(serde_json::json!({
                    "id": 1,
                    "name": "Programming Language",
                    "fact_type": "enum",
                    "data_type": "string",
                }))
                .unwrap(),
                serde_json::from_value(serde_json::json!({
                    "id": 2,
                    "name": "Coverage",
                    "fact_type": "range",
                    "data_type": "decimal",
                }))
                .unwrap(),
                serde_json::from_value(serde_json::json!({
                    "id": 3,
                    "name": "Notes",
                    "fact_type": "free-form",
                    "data_type": "string",
                }))
                .unwrap(),
                serde_json::from_value(serde_json::json!({
                    "id": 4,
                    "name": "Launched On",
                    "fact_type": "free-form",
                    "data_type": "date",
                }))
                .unwrap(),
            ],
            project_fact_type_enums: vec![
                serde_json::from_value(
                    serde_json::json!({"id": 10, "fact_type_id": 1, "value": "Python 3.12"}),
                )
                .unwrap(),
                serde_json::from_value(
                    serde_json::json!({"id": 11, "fact_type_id": 1, "value": "Rust 1.89"}),
                )
                .unwrap(),
            ],
            project_fact_type_ranges: vec![serde_json::from_value(
                serde_json::json!({"id": 20, "fact_type_id": 2, "min_value": 0.0, "max_value": 100.0}),
            )
            .unwrap()],
            project_types: vec![serde_json::from_value(serde_json::json!({
                "id": 1,
                "name": "API",
                "plural_name": "APIs",
                "slug": "api",
                "icon_class": "fas fa-cogs",
            }))
            .unwrap()],
        })
    }

    #[test]
    fn test_views() {
        let registry = registry();
        assert_eq!(
            registry.environments(),
            HashSet::from(["production".to_string(), "staging".to_string()])
        );
        assert_eq!(registry.project_type_slugs(), HashSet::from(["api".to_string()]));
        assert!(registry
            .project_fact_type_names()
            .contains("Programming Language"));
        assert_eq!(
            registry.project_fact_type_values("Programming Language"),
            HashSet::from(["Python 3.12".to_string(), "Rust 1.89".to_string()])
        );
    }

    #[test]
    fn test_validate_enum_fact() {
        let registry = registry();
        assert_eq!(
            registry.validate_value("Programming Language", "Python 3.12"),
            (true, None)
        );
        let (ok, reason) = registry.validate_value("Programming Language", "COBOL");
        assert!(!ok);
        assert!(reason.unwrap().contains("one of"));
    }

    #[test]
    fn test_validate_range_fact() {
        let registry = registry();
        assert_eq!(registry.validate_value("Coverage", "85.5"), (true, None));
        let (ok, reason) = registry.validate_value("Coverage", "120");
        assert!(!ok);
        assert!(reason.unwrap().contains("between"));
        let (ok, _) = registry.validate_value("Coverage", "not-a-number");
        assert!(!ok);
    }

    #[test]
    fn test_validate_free_form_and_date() {
        let registry = registry();
        assert_eq!(registry.validate_value("Notes", "anything goes"), (true, None));
        assert_eq!(
            registry.validate_value("Launched On", "2025-06-01"),
            (true, None)
        );
        let (ok, _) = registry.validate_value("Launched On", "June 1st");
        assert!(!ok);
    }

    #[test]
    fn test_unknown_fact() {
        let registry = registry();
        let (ok, reason) = registry.validate_value("Nonexistent", "x");
        assert!(!ok);
        assert!(reason.unwrap().contains("unknown fact type"));
    }

    #[test]
    fn test_cache_validity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fact-cache.json");
        let registry = registry();
        std::fs::write(&path, serde_json::to_string(&registry.data).unwrap()).unwrap();

        assert!(read_cache(&path, "https://imbi.example.com").is_some());
        assert!(read_cache(&path, "https://other.example.com").is_none());

        // Stale entries are discarded.
        let mut stale = registry.data.clone();
        stale.cached_at = Utc::now() - chrono::Duration::hours(CACHE_TTL_HOURS + 1);
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        assert!(read_cache(&path, "https://imbi.example.com").is_none());

        assert!(read_cache(dir.path().join("missing.json").as_path(), "x").is_none());
    }

    #[test]
    fn test_validate_filter() {
        let registry = registry();
        let mut filter = crate::models::WorkflowFilter::default();
        filter.project_types.insert("api".to_string());
        filter.project_environments.insert("Production".to_string());
        validate_filter(&registry, &filter).unwrap();

        filter.project_types.insert("mainframe".to_string());
        assert!(validate_filter(&registry, &filter).is_err());
    }

    #[test]
    fn test_coerce_boolean_and_timestamp() {
        assert!(coerce_value("boolean", "Yes").is_ok());
        assert!(coerce_value("boolean", "maybe").is_err());
        assert!(coerce_value("timestamp", "2025-06-01T12:00:00Z").is_ok());
        assert!(coerce_value("timestamp", "12 o'clock").is_err());
        assert!(coerce_value("integer", "42").is_ok());
        assert!(coerce_value("integer", "4.2").is_err());
    }
}
