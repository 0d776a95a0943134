//! Imbi project registry client.
//!
//! Project lookups go through the registry's search index; reference
//! data (project types, fact types, environments) comes from plain REST
//! endpoints and feeds the data registry cache.

use std::sync::{Arc, OnceLock};

use serde_json::json;

use crate::clients::http::{error_for_status, HttpClient};
use crate::config::ImbiConfiguration;
use crate::errors::Result;
use crate::models::{
    ImbiEnvironment, ImbiProject, ImbiProjectFactType, ImbiProjectFactTypeEnum,
    ImbiProjectFactTypeRange, ImbiProjectType,
};

const PAGE_SIZE: usize = 100;

static INSTANCE: OnceLock<Arc<ImbiClient>> = OnceLock::new();

#[derive(Debug)]
pub struct ImbiClient {
    http: HttpClient,
}

impl ImbiClient {
    pub fn new(config: &ImbiConfiguration) -> Result<Self> {
        let http = HttpClient::new(
            format!("https://{}", config.hostname),
            vec![("private-token", config.api_key.expose().to_string())],
        )?;
        Ok(Self { http })
    }

    /// Process-wide instance; the first configuration wins.
    pub fn get_instance(config: &ImbiConfiguration) -> Result<Arc<Self>> {
        if let Some(instance) = INSTANCE.get() {
            return Ok(instance.clone());
        }
        let instance = Arc::new(Self::new(config)?);
        Ok(INSTANCE.get_or_init(|| instance).clone())
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    pub async fn get_project(&self, id: i64) -> Result<Option<ImbiProject>> {
        let mut query = base_payload();
        query["query"] = json!({
            "bool": {"filter": [{"term": {"_id": id.to_string()}}]}
        });
        let mut results = self.search_projects(query).await?;
        Ok(if results.is_empty() {
            None
        } else {
            Some(results.swap_remove(0))
        })
    }

    /// All active projects of a type, sorted by slug.
    pub async fn get_projects_by_type(&self, slug: &str) -> Result<Vec<ImbiProject>> {
        let query = json!({
            "bool": {
                "must": [
                    {"match": {"archived": false}},
                    {"term": {"project_type_slug.keyword": slug}},
                ]
            }
        });
        let projects = self.search_all(query).await?;
        log::debug!(
            "Found {} total projects with project_type_slug: {slug}",
            projects.len()
        );
        Ok(projects)
    }

    /// Every active project in the registry, sorted by slug.
    pub async fn get_all_projects(&self) -> Result<Vec<ImbiProject>> {
        let projects = self.search_all(json!({"match": {"archived": false}})).await?;
        log::info!("Found {} total active projects", projects.len());
        Ok(projects)
    }

    /// Active projects whose links contain the given repository URL.
    pub async fn search_projects_by_url(&self, url: &str) -> Result<Vec<ImbiProject>> {
        let mut query = base_payload();
        query["query"] = json!({
            "bool": {
                "must": [
                    {"match": {"archived": false}},
                    {
                        "nested": {
                            "path": "links",
                            "query": {
                                "bool": {"must": [{"match": {"links.url": url}}]}
                            },
                        }
                    },
                ]
            }
        });
        self.search_projects(query).await
    }

    pub async fn get_project_types(&self) -> Result<Vec<ImbiProjectType>> {
        self.get_reference_data("/project-types").await
    }

    pub async fn get_project_fact_types(&self) -> Result<Vec<ImbiProjectFactType>> {
        self.get_reference_data("/project-fact-types").await
    }

    pub async fn get_project_fact_type_enums(&self) -> Result<Vec<ImbiProjectFactTypeEnum>> {
        self.get_reference_data("/project-fact-type-enums").await
    }

    pub async fn get_project_fact_type_ranges(&self) -> Result<Vec<ImbiProjectFactTypeRange>> {
        self.get_reference_data("/project-fact-type-ranges").await
    }

    pub async fn get_environments(&self) -> Result<Vec<ImbiEnvironment>> {
        self.get_reference_data("/environments").await
    }

    async fn get_reference_data<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>> {
        let response = error_for_status(self.http.get(path).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Page through the search index until a short page, then sort by
    /// slug for deterministic ordering.
    async fn search_all(&self, query: serde_json::Value) -> Result<Vec<ImbiProject>> {
        let mut projects = Vec::new();
        let mut start_from = 0usize;
        loop {
            let mut payload = base_payload();
            payload["query"] = query.clone();
            payload["from"] = json!(start_from);
            payload["size"] = json!(PAGE_SIZE);
            log::debug!("Fetching projects page: from={start_from}, size={PAGE_SIZE}");

            let page = self.search_projects(payload).await?;
            let page_len = page.len();
            projects.extend(page);
            if page_len < PAGE_SIZE {
                break;
            }
            start_from += PAGE_SIZE;
        }
        projects.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(projects)
    }

    async fn search_projects(&self, query: serde_json::Value) -> Result<Vec<ImbiProject>> {
        log::debug!("Query: {query}");
        let response = self
            .http
            .post("/opensearch/projects")
            .json(&query)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: serde_json::Value = response.json().await?;
        let Some(hits) = payload
            .get("hits")
            .and_then(|hits| hits.get("hits"))
            .and_then(serde_json::Value::as_array)
        else {
            return Ok(Vec::new());
        };
        let mut projects = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(source) = hit.get("_source") else {
                continue;
            };
            let mut project: ImbiProject = serde_json::from_value(source.clone())?;
            project.imbi_url = Some(format!("{}/ui/projects/{}", self.base_url(), project.id));
            projects.push(project);
        }
        Ok(projects)
    }
}

fn base_payload() -> serde_json::Value {
    json!({
        "_source": {
            "exclude": ["archived", "component_versions", "components"]
        },
        "query": {"bool": {"must": {"term": {"archived": false}}}},
    })
}
