//! External-service clients and project-to-repository resolution.
//!
//! Each client is a process-wide singleton created lazily from its
//! configuration section; the underlying connection pools are shared for
//! the process lifetime and dropped at exit.

pub mod anthropic;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod imbi;

pub use anthropic::AnthropicClient;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use http::HttpClient;
pub use imbi::ImbiClient;

use crate::config::Configuration;
use crate::errors::Result;
use crate::models::{GitLabProject, GitHubRepository, ImbiProject};

/// Resolve a registry project's GitHub repository, preferring the stored
/// repository id identifier over the browse-URL link.
pub async fn github_repository_for(
    config: &Configuration,
    project: &ImbiProject,
) -> Result<Option<GitHubRepository>> {
    let (Some(github), Some(imbi)) = (&config.github, &config.imbi) else {
        return Ok(None);
    };
    let client = GitHubClient::get_instance(github)?;
    if let Some(identifier) = project.identifier(&imbi.github_identifier) {
        if let Some(id) = identifier_as_i64(identifier) {
            return client.get_repository_by_id(id).await;
        }
    }
    if let Some(url) = project.link(&imbi.github_link) {
        return client.get_repository_by_url(url).await;
    }
    log::debug!("{} has no GitHub identifier or link", project.slug);
    Ok(None)
}

/// Resolve a registry project's GitLab project.
pub async fn gitlab_project_for(
    config: &Configuration,
    project: &ImbiProject,
) -> Result<Option<GitLabProject>> {
    let (Some(gitlab), Some(imbi)) = (&config.gitlab, &config.imbi) else {
        return Ok(None);
    };
    let client = GitLabClient::get_instance(gitlab)?;
    if let Some(identifier) = project.identifier(&imbi.gitlab_identifier) {
        if let Some(id) = identifier_as_i64(identifier) {
            return client.get_project(id).await;
        }
    }
    if let Some(url) = project.link(&imbi.gitlab_link) {
        return client.get_project_by_url(url).await;
    }
    log::debug!("{} has no GitLab identifier or link", project.slug);
    Ok(None)
}

fn identifier_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_as_i64() {
        assert_eq!(identifier_as_i64(&serde_json::json!(42)), Some(42));
        assert_eq!(identifier_as_i64(&serde_json::json!("42")), Some(42));
        assert_eq!(identifier_as_i64(&serde_json::json!("not a number")), None);
        assert_eq!(identifier_as_i64(&serde_json::json!(null)), None);
    }
}
