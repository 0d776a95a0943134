//! GitLab REST API client.

use std::sync::{Arc, OnceLock};

use crate::clients::http::{error_for_status, HttpClient};
use crate::config::GitLabConfiguration;
use crate::errors::{Error, Result};
use crate::models::{GitLabProject, WorkflowContext};

static INSTANCE: OnceLock<Arc<GitLabClient>> = OnceLock::new();

#[derive(Debug)]
pub struct GitLabClient {
    http: HttpClient,
}

impl GitLabClient {
    pub fn new(config: &GitLabConfiguration) -> Result<Self> {
        let http = HttpClient::new(
            format!("https://{}", config.hostname),
            vec![("private-token", config.api_key.expose().to_string())],
        )?;
        Ok(Self { http })
    }

    /// Process-wide instance; the first configuration wins.
    pub fn get_instance(config: &GitLabConfiguration) -> Result<Arc<Self>> {
        if let Some(instance) = INSTANCE.get() {
            return Ok(instance.clone());
        }
        let instance = Arc::new(Self::new(config)?);
        Ok(INSTANCE.get_or_init(|| instance).clone())
    }

    pub async fn get_project(&self, id: i64) -> Result<Option<GitLabProject>> {
        let response = self.http.get(&format!("/api/v4/projects/{id}")).send().await?;
        self.read_project(response).await
    }

    /// Look up a project by its full path, e.g. `group/subgroup/project`.
    pub async fn get_project_by_path(&self, path: &str) -> Result<Option<GitLabProject>> {
        let encoded = urlencoding::encode(path);
        let response = self
            .http
            .get(&format!("/api/v4/projects/{encoded}"))
            .send()
            .await?;
        self.read_project(response).await
    }

    /// Resolve a project from a browse URL such as
    /// `https://gitlab.com/group/project`.
    pub async fn get_project_by_url(&self, url: &str) -> Result<Option<GitLabProject>> {
        let path = parse_project_path(url)
            .ok_or_else(|| Error::config(format!("invalid GitLab project URL: {url}")))?;
        self.get_project_by_path(&path).await
    }

    /// Fetch raw file content from the project's default branch. Returns
    /// `None` when the file does not exist.
    pub async fn get_file_contents(
        &self,
        context: &WorkflowContext,
        path: &std::path::Path,
    ) -> Result<Option<String>> {
        let project = context
            .gitlab_project
            .as_ref()
            .ok_or_else(|| Error::config("no GitLab project in workflow context"))?;
        let encoded = urlencoding::encode(&path.to_string_lossy()).into_owned();
        let response = self
            .http
            .get(&format!(
                "/api/v4/projects/{}/repository/files/{encoded}/raw",
                project.id
            ))
            .query(&[("ref", project.default_branch.as_str())])
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = error_for_status(response).await?;
        Ok(Some(response.text().await?))
    }

    async fn read_project(&self, response: reqwest::Response) -> Result<Option<GitLabProject>> {
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = error_for_status(response).await?;
        Ok(Some(response.json().await?))
    }
}

/// Extract the project path from a GitLab browse or clone URL.
pub fn parse_project_path(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    let rest = if let Some(rest) = url.strip_prefix("https://") {
        rest
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else if let Some(rest) = url.strip_prefix("git@") {
        let (_, path) = rest.split_once(':')?;
        let path = path.trim_matches('/').trim_end_matches(".git");
        return (!path.is_empty()).then(|| path.to_string());
    } else {
        return None;
    };
    let (_, path) = rest.split_once('/')?;
    let path = path.trim_matches('/').trim_end_matches(".git");
    (!path.is_empty() && path.contains('/')).then(|| path.to_string())
}
