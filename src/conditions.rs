//! Condition evaluation: local predicates over the cloned repository and
//! remote predicates over a code host.
//!
//! Local and remote conditions are gated separately by the engine (remote
//! conditions run before the clone exists). A list with no conditions in
//! the relevant group passes for both `all` and `any`; the engine treats
//! "no conditions" as "proceed".

use std::path::Path;
use std::sync::Arc;

use crate::clients::{GitHubClient, GitLabClient};
use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::models::{Condition, ConditionType, RemoteClient, WorkflowContext};

#[derive(Default)]
pub struct ConditionChecker {
    github: Option<Arc<GitHubClient>>,
    gitlab: Option<Arc<GitLabClient>>,
}

impl ConditionChecker {
    pub fn new(config: &Configuration) -> Result<Self> {
        Ok(Self {
            github: config
                .github
                .as_ref()
                .map(GitHubClient::get_instance)
                .transpose()?,
            gitlab: config
                .gitlab
                .as_ref()
                .map(GitLabClient::get_instance)
                .transpose()?,
        })
    }

    /// Evaluate the local predicates of `conditions` against the clone.
    pub fn check(
        &self,
        context: &WorkflowContext,
        condition_type: ConditionType,
        conditions: &[Condition],
    ) -> Result<bool> {
        let repository = context.repository_dir();
        let mut results = Vec::new();
        for condition in conditions.iter().filter(|condition| condition.has_local()) {
            results.push(self.check_local(&repository, condition)?);
        }
        Ok(compose(condition_type, &results))
    }

    /// Evaluate the remote predicates of `conditions` via the code host.
    pub async fn check_remote(
        &self,
        context: &WorkflowContext,
        condition_type: ConditionType,
        conditions: &[Condition],
    ) -> Result<bool> {
        let mut results = Vec::new();
        for condition in conditions.iter().filter(|condition| condition.has_remote()) {
            results.push(self.check_one_remote(context, condition).await?);
        }
        Ok(compose(condition_type, &results))
    }

    fn check_local(&self, repository: &Path, condition: &Condition) -> Result<bool> {
        if let Some(target) = &condition.file_exists {
            return path_or_pattern_exists(repository, target);
        }
        if let Some(target) = &condition.file_not_exists {
            return Ok(!path_or_pattern_exists(repository, target)?);
        }
        if let Some(needle) = &condition.file_contains {
            return Ok(self.file_content(repository, condition)?
                .is_some_and(|content| content.contains(needle)));
        }
        if let Some(needle) = &condition.file_doesnt_contain {
            return Ok(self.file_content(repository, condition)?
                .is_some_and(|content| !content.contains(needle)));
        }
        Ok(true)
    }

    /// Read the condition's paired file; missing or unreadable files
    /// evaluate as absent.
    fn file_content(&self, repository: &Path, condition: &Condition) -> Result<Option<String>> {
        let file = condition
            .file
            .as_ref()
            .ok_or_else(|| Error::config("condition is missing the paired 'file' field"))?;
        let path = repository.join(file);
        if !path.is_file() {
            log::debug!("File {} does not exist for contains check", file.display());
            return Ok(None);
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) => {
                log::warn!(
                    "Failed to read file {} for contains check: {err}",
                    file.display()
                );
                Ok(None)
            }
        }
    }

    async fn check_one_remote(
        &self,
        context: &WorkflowContext,
        condition: &Condition,
    ) -> Result<bool> {
        let file = condition
            .remote_file
            .as_ref()
            .map(|path| path.as_path())
            .or_else(|| condition.remote_file_exists.as_ref().map(Path::new))
            .or_else(|| condition.remote_file_not_exists.as_ref().map(Path::new))
            .ok_or_else(|| Error::config("remote condition has no file path"))?;

        let content = match condition.remote_client {
            RemoteClient::Github => {
                let client = self.github.as_ref().ok_or_else(|| {
                    Error::config("remote condition uses GitHub, but GitHub is not configured")
                })?;
                client.get_file_contents(context, file).await?
            }
            RemoteClient::Gitlab => {
                let client = self.gitlab.as_ref().ok_or_else(|| {
                    Error::config("remote condition uses GitLab, but GitLab is not configured")
                })?;
                client.get_file_contents(context, file).await?
            }
        };

        Ok(if let Some(needle) = &condition.remote_file_contains {
            content.is_some_and(|content| content.contains(needle))
        } else if let Some(needle) = &condition.remote_file_doesnt_contain {
            content.is_some_and(|content| !content.contains(needle))
        } else if condition.remote_file_exists.is_some() {
            content.is_some()
        } else {
            content.is_none()
        })
    }
}

fn compose(condition_type: ConditionType, results: &[bool]) -> bool {
    if results.is_empty() {
        return true;
    }
    match condition_type {
        ConditionType::All => results.iter().all(|result| *result),
        ConditionType::Any => results.iter().any(|result| *result),
    }
}

/// Strings containing regex metacharacters match against every
/// repository-relative path; plain strings are exact existence checks.
/// Invalid patterns are configuration errors.
fn path_or_pattern_exists(repository: &Path, target: &str) -> Result<bool> {
    if !looks_like_pattern(target) {
        return Ok(repository.join(target).exists());
    }
    let pattern = regex::Regex::new(target)
        .map_err(|err| Error::config(format!("invalid regex pattern {target:?}: {err}")))?;
    for entry in walkdir::WalkDir::new(repository)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        let Ok(relative) = entry.path().strip_prefix(repository) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if pattern.is_match(&relative.to_string_lossy()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn looks_like_pattern(target: &str) -> bool {
    target
        .chars()
        .any(|ch| matches!(ch, '*' | '+' | '?' | '[' | ']' | '(' | ')' | '{' | '}' | '|' | '^' | '$' | '\\'))
}
