//! GitHub REST API client.

use std::sync::{Arc, OnceLock};

use base64::Engine;
use serde_json::json;

use crate::clients::http::{error_for_status, truncate, HttpClient};
use crate::config::GitHubConfiguration;
use crate::errors::{Error, Result};
use crate::models::{
    EnvironmentSyncResult, GitHubEnvironment, GitHubOrganization, GitHubRepository, GitHubTeam,
    GitHubUser, GitHubWorkflowJob, GitHubWorkflowRun, WorkflowContext,
};

static INSTANCE: OnceLock<Arc<GitHubClient>> = OnceLock::new();

#[derive(Debug)]
pub struct GitHubClient {
    http: HttpClient,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfiguration) -> Result<Self> {
        let http = HttpClient::new(
            config.api_base_url(),
            vec![
                (
                    "authorization",
                    format!("Bearer {}", config.api_key.expose()),
                ),
                ("x-github-api-version", "2022-11-28".to_string()),
                ("accept", "application/vnd.github+json".to_string()),
            ],
        )?;
        Ok(Self { http })
    }

    /// Process-wide instance; the first configuration wins.
    pub fn get_instance(config: &GitHubConfiguration) -> Result<Arc<Self>> {
        if let Some(instance) = INSTANCE.get() {
            return Ok(instance.clone());
        }
        let instance = Arc::new(Self::new(config)?);
        Ok(INSTANCE.get_or_init(|| instance).clone())
    }

    pub async fn get_organizations(&self) -> Result<Vec<GitHubOrganization>> {
        let response = error_for_status(self.http.get("/user/orgs").send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn get_organization(&self, org: &str) -> Result<Option<GitHubOrganization>> {
        let response = self.http.get(&format!("/orgs/{org}")).send().await?;
        match self.read_optional(response, org).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    pub async fn get_repository(&self, org: &str, name: &str) -> Result<Option<GitHubRepository>> {
        let response = self.http.get(&format!("/repos/{org}/{name}")).send().await?;
        match self.read_optional(response, &format!("{org}/{name}")).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => {
                log::debug!("Repository not found: {org}/{name} (404)");
                Ok(None)
            }
        }
    }

    pub async fn get_repository_by_id(&self, id: i64) -> Result<Option<GitHubRepository>> {
        let response = self.http.get(&format!("/repositories/{id}")).send().await?;
        match self.read_optional(response, &format!("repository id {id}")).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => {
                log::debug!("Repository not found for ID {id} (404)");
                Ok(None)
            }
        }
    }

    /// Resolve a repository from a browse URL such as
    /// `https://github.com/org/repo`.
    pub async fn get_repository_by_url(&self, url: &str) -> Result<Option<GitHubRepository>> {
        match parse_repository_url(url) {
            Some((org, name)) => self.get_repository(&org, &name).await,
            None => Err(Error::config(format!("invalid GitHub repository URL: {url}"))),
        }
    }

    /// Fetch and decode a file from the repository's default branch.
    /// Returns `None` when the file does not exist.
    pub async fn get_file_contents(
        &self,
        context: &WorkflowContext,
        path: &std::path::Path,
    ) -> Result<Option<String>> {
        let repository = context
            .github_repository
            .as_ref()
            .ok_or_else(|| Error::config("no GitHub repository in workflow context"))?;
        let (org, name) = repository.owner_and_name();
        let response = self
            .http
            .get(&format!("/repos/{org}/{name}/contents/{}", path.display()))
            .send()
            .await?;
        let Some(response) = self.read_optional(response, &format!("{org}/{name}")).await? else {
            return Ok(None);
        };
        let payload: serde_json::Value = response.json().await?;
        let encoded = payload
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .replace(['\n', '\r'], "");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| Error::Http {
                status: 200,
                message: format!("invalid base64 content for {}: {err}", path.display()),
            })?;
        Ok(Some(String::from_utf8_lossy(&decoded).into_owned()))
    }

    pub async fn get_latest_workflow_run(
        &self,
        org: &str,
        name: &str,
    ) -> Result<Option<GitHubWorkflowRun>> {
        let response = self
            .http
            .get(&format!("/repos/{org}/{name}/actions/runs"))
            .query(&[("per_page", "1")])
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: serde_json::Value = response.json().await?;
        let Some(run) = payload
            .get("workflow_runs")
            .and_then(serde_json::Value::as_array)
            .and_then(|runs| runs.first())
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(run.clone())?))
    }

    /// The repository's most recent workflow state: the conclusion when
    /// the run completed, otherwise the in-flight status. `None` when the
    /// repository has no runs.
    pub async fn get_repository_workflow_status(
        &self,
        repository: &GitHubRepository,
    ) -> Result<Option<String>> {
        let (org, name) = repository.owner_and_name();
        let run = self.get_latest_workflow_run(org, name).await?;
        Ok(run.and_then(|run| run.effective_status().map(str::to_string)))
    }

    /// Status of the first job whose name contains `keyword` in the most
    /// recent workflow run.
    pub async fn get_workflow_job_status(
        &self,
        org: &str,
        name: &str,
        branch: Option<&str>,
        keyword: &str,
    ) -> Result<Option<String>> {
        let mut query = vec![("per_page".to_string(), "1".to_string())];
        if let Some(branch) = branch {
            query.push(("branch".to_string(), branch.to_string()));
        }
        let response = self
            .http
            .get(&format!("/repos/{org}/{name}/actions/runs"))
            .query(&query)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: serde_json::Value = response.json().await?;
        let Some(run_id) = payload
            .get("workflow_runs")
            .and_then(serde_json::Value::as_array)
            .and_then(|runs| runs.first())
            .and_then(|run| run.get("id"))
            .and_then(serde_json::Value::as_i64)
        else {
            log::debug!("No workflow runs found for {org}/{name}");
            return Ok(None);
        };

        let response = self
            .http
            .get(&format!("/repos/{org}/{name}/actions/runs/{run_id}/jobs"))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: serde_json::Value = response.json().await?;
        let jobs: Vec<GitHubWorkflowJob> = serde_json::from_value(
            payload.get("jobs").cloned().unwrap_or_else(|| json!([])),
        )?;

        let keyword = keyword.to_lowercase();
        for job in jobs {
            if job.name.to_lowercase().contains(&keyword) {
                if job.status.as_deref() == Some("completed") && job.conclusion.is_some() {
                    return Ok(job.conclusion);
                }
                return Ok(job.status);
            }
        }
        log::debug!("No jobs matching {keyword:?} in latest run for {org}/{name}");
        Ok(None)
    }

    pub async fn get_repository_custom_properties(
        &self,
        org: &str,
        name: &str,
    ) -> Result<indexmap::IndexMap<String, serde_json::Value>> {
        let response = self
            .http
            .get(&format!("/repos/{org}/{name}/properties/values"))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: Vec<serde_json::Value> = response.json().await?;
        let mut properties = indexmap::IndexMap::new();
        for property in payload {
            if let Some(name) = property.get("property_name").and_then(serde_json::Value::as_str) {
                properties.insert(
                    name.to_string(),
                    property.get("value").cloned().unwrap_or(serde_json::Value::Null),
                );
            }
        }
        Ok(properties)
    }

    pub async fn update_repository_custom_properties(
        &self,
        org: &str,
        name: &str,
        properties: &indexmap::IndexMap<String, serde_json::Value>,
    ) -> Result<()> {
        let payload = json!({
            "properties": properties
                .iter()
                .map(|(name, value)| json!({"property_name": name, "value": value}))
                .collect::<Vec<_>>(),
        });
        let response = self
            .http
            .patch(&format!("/repos/{org}/{name}/properties/values"))
            .json(&payload)
            .send()
            .await?;
        error_for_status(response).await?;
        Ok(())
    }

    pub async fn get_organization_teams(&self, org: &str) -> Result<Vec<GitHubTeam>> {
        let response = self.http.get(&format!("/orgs/{org}/teams")).send().await?;
        let response = error_for_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn get_repository_team_permissions(
        &self,
        org: &str,
        name: &str,
    ) -> Result<indexmap::IndexMap<String, String>> {
        let response = self
            .http
            .get(&format!("/repos/{org}/{name}/teams"))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let teams: Vec<GitHubTeam> = response.json().await?;
        Ok(teams
            .into_iter()
            .map(|team| (team.slug, team.permission.unwrap_or_default()))
            .collect())
    }

    /// Reconcile team access with the desired mapping. Returns
    /// `success`, `partial`, or `failed`; partial syncs log a warning per
    /// failed operation.
    pub async fn sync_repository_team_access(
        &self,
        org: &str,
        name: &str,
        current: &indexmap::IndexMap<String, String>,
        desired: &indexmap::IndexMap<String, String>,
    ) -> Result<&'static str> {
        let mut total = 0usize;
        let mut succeeded = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for (team, permission) in desired {
            if current.get(team) == Some(permission) {
                continue;
            }
            total += 1;
            let response = self
                .http
                .put(&format!("/orgs/{org}/teams/{team}/repos/{org}/{name}"))
                .json(&json!({"permission": permission}))
                .send()
                .await?;
            match error_for_status(response).await {
                Ok(_) => {
                    succeeded += 1;
                    log::info!("Updated team {team} permission to {permission} for {org}/{name}");
                }
                Err(err) => {
                    errors.push(format!("failed to assign team {team}: {err}"));
                }
            }
        }

        for team in current.keys() {
            if desired.contains_key(team) {
                continue;
            }
            total += 1;
            let response = self
                .http
                .delete(&format!("/orgs/{org}/teams/{team}/repos/{org}/{name}"))
                .send()
                .await?;
            match error_for_status(response).await {
                Ok(_) => {
                    succeeded += 1;
                    log::info!("Removed team {team} access from {org}/{name}");
                }
                Err(err) => {
                    errors.push(format!("failed to remove team {team}: {err}"));
                }
            }
        }

        for error in &errors {
            log::warn!("Team sync for {org}/{name}: {error}");
        }
        Ok(if total == 0 || succeeded == total {
            "success"
        } else if succeeded > 0 {
            "partial"
        } else {
            "failed"
        })
    }

    pub async fn get_repository_environments(
        &self,
        org: &str,
        name: &str,
    ) -> Result<Vec<GitHubEnvironment>> {
        let response = self
            .http
            .get(&format!("/repos/{org}/{name}/environments"))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: serde_json::Value = response.json().await?;
        match payload.get("environments") {
            Some(environments) => Ok(serde_json::from_value(environments.clone())?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn create_environment(&self, org: &str, name: &str, environment: &str) -> Result<()> {
        let response = self
            .http
            .put(&format!("/repos/{org}/{name}/environments/{environment}"))
            .send()
            .await?;
        error_for_status(response).await?;
        log::info!("Created environment {environment:?} for {org}/{name}");
        Ok(())
    }

    pub async fn delete_environment(&self, org: &str, name: &str, environment: &str) -> Result<()> {
        let response = self
            .http
            .delete(&format!("/repos/{org}/{name}/environments/{environment}"))
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            log::warn!("Environment {environment:?} not found in {org}/{name} (already deleted?)");
            return Ok(());
        }
        error_for_status(response).await?;
        log::info!("Deleted environment {environment:?} from {org}/{name}");
        Ok(())
    }

    /// Make repository environments match the registry's desired list.
    ///
    /// Names are compared case-insensitively; missing environments are
    /// created and extras deleted. Individual failures are collected
    /// rather than aborting the sync.
    pub async fn sync_project_environments(
        &self,
        org: &str,
        name: &str,
        desired: &[String],
    ) -> Result<EnvironmentSyncResult> {
        let mut result = EnvironmentSyncResult::default();
        let existing = match self.get_repository_environments(org, name).await {
            Ok(environments) => environments,
            Err(err) => {
                result.errors.push(err.to_string());
                return Ok(result);
            }
        };

        let desired_lower: Vec<String> = desired.iter().map(|name| name.to_lowercase()).collect();
        let existing_lower: Vec<String> =
            existing.iter().map(|env| env.name.to_lowercase()).collect();

        for (environment, lowered) in desired.iter().zip(&desired_lower) {
            if existing_lower.contains(lowered) {
                continue;
            }
            result.total_operations += 1;
            match self.create_environment(org, name, environment).await {
                Ok(()) => result.created.push(environment.clone()),
                Err(err) => result
                    .errors
                    .push(format!("failed to create {environment}: {err}")),
            }
        }

        for environment in &existing {
            if desired_lower.contains(&environment.name.to_lowercase()) {
                continue;
            }
            result.total_operations += 1;
            match self.delete_environment(org, name, &environment.name).await {
                Ok(()) => result.deleted.push(environment.name.clone()),
                Err(err) => result
                    .errors
                    .push(format!("failed to delete {}: {err}", environment.name)),
            }
        }

        result.success = result.errors.is_empty();
        Ok(result)
    }

    /// Open a pull request and return its browse URL.
    pub async fn create_pull_request(
        &self,
        context: &WorkflowContext,
        title: &str,
        body: &str,
        head_branch: &str,
        base_branch: &str,
    ) -> Result<String> {
        let repository = context
            .github_repository
            .as_ref()
            .ok_or_else(|| Error::config("no GitHub repository in workflow context"))?;
        let (org, name) = repository.owner_and_name();
        log::debug!("Creating pull request for {org}/{name}: {head_branch} -> {base_branch}");

        let response = self
            .http
            .post(&format!("/repos/{org}/{name}/pulls"))
            .json(&json!({
                "title": title,
                "body": body,
                "head": head_branch,
                "base": base_branch,
            }))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: serde_json::Value = response.json().await?;
        let url = payload
            .get("html_url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        log::info!(
            "Created pull request #{} for {org}/{name}: {url}",
            payload.get("number").and_then(serde_json::Value::as_i64).unwrap_or_default()
        );
        Ok(url)
    }

    /// Apply the GitHub error policy: 404 is `None`, 403 is a rate-limit
    /// or access-denied error, anything else non-2xx is an HTTP error.
    async fn read_optional(
        &self,
        response: reqwest::Response,
        what: &str,
    ) -> Result<Option<reqwest::Response>> {
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, what));
        }
        Ok(Some(response))
    }
}

/// Map a failed GitHub response to the error taxonomy.
pub fn classify_error(status: u16, body: &str, what: &str) -> Error {
    if status == 403 {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|payload| {
                payload
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Access forbidden".to_string());
        if message.to_lowercase().contains("rate limit exceeded") {
            return Error::RateLimit(message);
        }
        return Error::AccessDenied(format!("{what}: {message}"));
    }
    Error::Http {
        status,
        message: truncate(body, 512),
    }
}

/// Extract `(org, repo)` from a GitHub browse or clone URL.
pub fn parse_repository_url(url: &str) -> Option<(String, String)> {
    let url = url.trim().trim_end_matches('/');
    let rest = if let Some(rest) = url.strip_prefix("https://") {
        rest
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else if let Some(rest) = url.strip_prefix("git@") {
        return match rest.split_once(':') {
            Some((_, path)) => split_org_repo(path),
            None => None,
        };
    } else {
        return None;
    };
    let path = rest.split_once('/').map(|(_, path)| path)?;
    split_org_repo(path)
}

fn split_org_repo(path: &str) -> Option<(String, String)> {
    let mut segments = path.trim_matches('/').splitn(2, '/');
    let org = segments.next()?.to_string();
    let repo = segments.next()?.trim_end_matches(".git").to_string();
    if org.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((org, repo))
}

impl GitHubRepository {
    /// Placeholder repository used when a target is addressed directly by
    /// URL without registry metadata.
    pub fn from_parts(org: &str, name: &str, hostname: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            full_name: format!("{org}/{name}"),
            owner: GitHubUser {
                login: org.to_string(),
                id: None,
            },
            default_branch: "main".to_string(),
            ssh_url: format!("git@{hostname}:{org}/{name}.git"),
            clone_url: format!("https://{hostname}/{org}/{name}.git"),
            html_url: Some(format!("https://{hostname}/{org}/{name}")),
        }
    }
}
