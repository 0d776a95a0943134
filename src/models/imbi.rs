//! Entities returned by the Imbi project registry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A project record from the registry search index.
///
/// `facts`, `identifiers`, and `links` are opaque mappings maintained by
/// registry operators; values are scalars whose concrete type depends on
/// the fact or identifier definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImbiProject {
    pub id: i64,
    pub name: String,
    pub namespace: String,
    pub namespace_slug: String,
    pub slug: String,
    pub project_type: String,
    pub project_type_slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub environments: Option<Vec<String>>,
    #[serde(default)]
    pub facts: Option<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub identifiers: Option<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub links: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub imbi_url: Option<String>,
}

impl ImbiProject {
    /// Scalar identifier value by name, if present and non-null.
    pub fn identifier(&self, name: &str) -> Option<&serde_json::Value> {
        self.identifiers
            .as_ref()
            .and_then(|identifiers| identifiers.get(name))
            .filter(|value| !value.is_null())
    }

    pub fn link(&self, name: &str) -> Option<&str> {
        self.links
            .as_ref()
            .and_then(|links| links.get(name))
            .map(String::as_str)
    }

    /// Compare a fact against a filter value using string equality over
    /// the scalar's canonical rendering.
    pub fn fact_matches(&self, name: &str, expected: &str) -> bool {
        let Some(value) = self.facts.as_ref().and_then(|facts| facts.get(name)) else {
            return false;
        };
        match value {
            serde_json::Value::String(actual) => actual == expected,
            serde_json::Value::Number(actual) => actual.to_string() == expected,
            serde_json::Value::Bool(actual) => actual.to_string() == expected,
            _ => false,
        }
    }

    pub fn environments(&self) -> &[String] {
        self.environments.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImbiProjectType {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub plural_name: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon_class: Option<String>,
    #[serde(default)]
    pub environment_urls: bool,
    #[serde(default)]
    pub gitlab_project_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImbiProjectFactType {
    pub id: i64,
    pub name: String,
    /// One of `enum`, `range`, `free-form`.
    pub fact_type: String,
    /// One of `boolean`, `date`, `decimal`, `integer`, `string`,
    /// `timestamp`.
    pub data_type: String,
    #[serde(default)]
    pub project_type_ids: Vec<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ui_options: Vec<String>,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImbiProjectFactTypeEnum {
    pub id: i64,
    pub fact_type_id: i64,
    pub value: String,
    #[serde(default)]
    pub icon_class: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImbiProjectFactTypeRange {
    pub id: i64,
    pub fact_type_id: i64,
    pub min_value: f64,
    pub max_value: f64,
    #[serde(default)]
    pub score: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImbiEnvironment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon_class: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_facts(facts: serde_json::Value) -> ImbiProject {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "Widget",
            "namespace": "Acme",
            "namespace_slug": "acme",
            "slug": "widget",
            "project_type": "API",
            "project_type_slug": "api",
            "facts": facts,
        }))
        .unwrap()
    }

    #[test]
    fn test_fact_matches_scalar_types() {
        let project = project_with_facts(serde_json::json!({
            "Programming Language": "Python 3.12",
            "Replica Count": 3,
            "Monitored": true,
        }));
        assert!(project.fact_matches("Programming Language", "Python 3.12"));
        assert!(project.fact_matches("Replica Count", "3"));
        assert!(project.fact_matches("Monitored", "true"));
        assert!(!project.fact_matches("Programming Language", "Rust"));
        assert!(!project.fact_matches("Missing", "x"));
    }

    #[test]
    fn test_identifier_filters_null() {
        let project: ImbiProject = serde_json::from_value(serde_json::json!({
            "id": 2,
            "name": "Gadget",
            "namespace": "Acme",
            "namespace_slug": "acme",
            "slug": "gadget",
            "project_type": "API",
            "project_type_slug": "api",
            "identifiers": {"github": 12345, "gitlab": null},
        }))
        .unwrap();
        assert_eq!(
            project.identifier("github"),
            Some(&serde_json::json!(12345))
        );
        assert!(project.identifier("gitlab").is_none());
    }
}
