//! Cohort filtering ahead of per-project execution.
//!
//! The cheap, pure stages run first in a fixed order so the expensive
//! workflow-status stage sees the smallest possible cohort. Stage
//! results are deterministic: the pipeline preserves input order and is
//! idempotent over its own output.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::clients;
use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::models::{ImbiProject, WorkflowFilter};

/// Apply the full filter pipeline to a cohort.
pub async fn apply(
    config: &Arc<Configuration>,
    projects: Vec<ImbiProject>,
    filter: &WorkflowFilter,
    max_concurrency: usize,
) -> Result<Vec<ImbiProject>> {
    let original_count = projects.len();
    let github_identifier = config
        .imbi
        .as_ref()
        .map(|imbi| imbi.github_identifier.as_str())
        .unwrap_or("github");

    let mut projects = apply_static_filters(projects, filter, github_identifier);

    if !filter.github_workflow_status_exclude.is_empty() && !projects.is_empty() {
        log::debug!("Project workflow statuses start: {}", projects.len());
        projects = filter_workflow_statuses(config, projects, filter, max_concurrency).await?;
        log::debug!("Project workflow statuses end: {}", projects.len());
    }

    log::debug!("Filtered {} projects", original_count - projects.len());
    Ok(projects)
}

/// Stages 1-5: identifier requirement, ids, environments, facts, types.
/// Pure and synchronous; order of survivors matches the input.
pub fn apply_static_filters(
    mut projects: Vec<ImbiProject>,
    filter: &WorkflowFilter,
    github_identifier: &str,
) -> Vec<ImbiProject> {
    if filter.github_identifier_required {
        log::debug!("GitHub identifier start: {}", projects.len());
        projects.retain(|project| project.identifier(github_identifier).is_some());
        log::debug!("GitHub identifier end: {}", projects.len());
    }

    if !filter.project_ids.is_empty() {
        log::debug!("Project IDs start: {}", projects.len());
        projects.retain(|project| filter.project_ids.contains(&project.id));
        log::debug!("Project IDs end: {}", projects.len());
    }

    if !filter.project_environments.is_empty() {
        log::debug!("Project environments start: {}", projects.len());
        projects.retain(|project| {
            project
                .environments()
                .iter()
                .any(|environment| filter.project_environments.contains(environment))
        });
        log::debug!("Project environments end: {}", projects.len());
    }

    if !filter.project_facts.is_empty() {
        log::debug!("Project facts start: {}", projects.len());
        projects.retain(|project| {
            filter
                .project_facts
                .iter()
                .all(|(name, expected)| project.fact_matches(name, expected))
        });
        log::debug!("Project facts end: {}", projects.len());
    }

    if !filter.project_types.is_empty() {
        log::debug!("Project types start: {}", projects.len());
        projects.retain(|project| filter.project_types.contains(&project.project_type_slug));
        log::debug!("Project types end: {}", projects.len());
    }

    projects
}

/// Stage 6: drop projects whose latest GitHub workflow status is in the
/// exclude set. Projects without a resolvable repository or without any
/// workflow run are dropped too. Lookups run concurrently under the
/// orchestrator's concurrency bound.
async fn filter_workflow_statuses(
    config: &Arc<Configuration>,
    projects: Vec<ImbiProject>,
    filter: &WorkflowFilter,
    max_concurrency: usize,
) -> Result<Vec<ImbiProject>> {
    log::debug!(
        "Filtering on statuses: {:?}",
        filter.github_workflow_status_exclude
    );
    let github = config
        .github
        .as_ref()
        .ok_or_else(|| Error::config("workflow status filter requires GitHub configuration"))?;
    let client = clients::GitHubClient::get_instance(github)?;
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let mut tasks: JoinSet<Result<(usize, Option<String>)>> = JoinSet::new();
    for (index, project) in projects.iter().enumerate() {
        let config = config.clone();
        let client = client.clone();
        let semaphore = semaphore.clone();
        let project = project.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("filter semaphore is never closed");
            let Some(repository) = clients::github_repository_for(&config, &project).await? else {
                return Ok((index, None));
            };
            let status = client.get_repository_workflow_status(&repository).await?;
            Ok((index, status))
        });
    }

    let mut statuses: Vec<Option<String>> = vec![None; projects.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, status) =
            joined.map_err(|err| Error::config(format!("status lookup task failed: {err}")))??;
        statuses[index] = status;
    }

    Ok(projects
        .into_iter()
        .zip(statuses)
        .filter_map(|(project, status)| match status {
            Some(status) if !filter.github_workflow_status_exclude.contains(&status) => {
                Some(project)
            }
            Some(status) => {
                log::debug!("Excluding {} with workflow status {status}", project.slug);
                None
            }
            None => {
                log::debug!("Excluding {} without repository or workflow runs", project.slug);
                None
            }
        })
        .collect())
}

/// Evaluate a per-action filter against a single project.
pub async fn filter_project(
    config: &Arc<Configuration>,
    project: &ImbiProject,
    filter: &WorkflowFilter,
) -> Result<bool> {
    let github_identifier = config
        .imbi
        .as_ref()
        .map(|imbi| imbi.github_identifier.as_str())
        .unwrap_or("github");
    let survivors = apply_static_filters(vec![project.clone()], filter, github_identifier);
    if survivors.is_empty() {
        return Ok(false);
    }
    if filter.github_workflow_status_exclude.is_empty() {
        return Ok(true);
    }
    let survivors = filter_workflow_statuses(config, survivors, filter, 1).await?;
    Ok(!survivors.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn project(id: i64, slug: &str, project_type: &str, payload: serde_json::Value) -> ImbiProject {
        let mut base = serde_json::json!({
            "id": id,
            "name": slug,
            "namespace": "Acme",
            "namespace_slug": "acme",
            "slug": slug,
            "project_type": project_type,
            "project_type_slug": project_type,
        });
        base.as_object_mut()
            .unwrap()
            .extend(payload.as_object().cloned().unwrap_or_default());
        serde_json::from_value(base).unwrap()
    }

    fn cohort() -> Vec<ImbiProject> {
        vec![
            project(
                1,
                "alpha",
                "api",
                serde_json::json!({
                    "identifiers": {"github": 101},
                    "environments": ["production"],
                    "facts": {"Programming Language": "Python 3.12"},
                }),
            ),
            project(
                2,
                "bravo",
                "consumer",
                serde_json::json!({
                    "identifiers": {"github": 102},
                    "environments": ["staging"],
                }),
            ),
            project(3, "charlie", "api", serde_json::json!({})),
        ]
    }

    #[test]
    fn test_identifier_required() {
        let filter = WorkflowFilter {
            github_identifier_required: true,
            ..WorkflowFilter::default()
        };
        let survivors = apply_static_filters(cohort(), &filter, "github");
        assert_eq!(
            survivors.iter().map(|p| p.slug.as_str()).collect::<Vec<_>>(),
            ["alpha", "bravo"]
        );
    }

    #[test]
    fn test_project_ids() {
        let filter = WorkflowFilter {
            project_ids: HashSet::from([2, 3]),
            ..WorkflowFilter::default()
        };
        let survivors = apply_static_filters(cohort(), &filter, "github");
        assert_eq!(
            survivors.iter().map(|p| p.slug.as_str()).collect::<Vec<_>>(),
            ["bravo", "charlie"]
        );
    }

    #[test]
    fn test_environments_intersection() {
        let filter = WorkflowFilter {
            project_environments: HashSet::from(["production".to_string()]),
            ..WorkflowFilter::default()
        };
        let survivors = apply_static_filters(cohort(), &filter, "github");
        assert_eq!(
            survivors.iter().map(|p| p.slug.as_str()).collect::<Vec<_>>(),
            ["alpha"]
        );
    }

    #[test]
    fn test_facts_all_must_match() {
        let mut facts = indexmap::IndexMap::new();
        facts.insert(
            "Programming Language".to_string(),
            "Python 3.12".to_string(),
        );
        let filter = WorkflowFilter {
            project_facts: facts,
            ..WorkflowFilter::default()
        };
        let survivors = apply_static_filters(cohort(), &filter, "github");
        assert_eq!(
            survivors.iter().map(|p| p.slug.as_str()).collect::<Vec<_>>(),
            ["alpha"]
        );
    }

    #[test]
    fn test_project_types() {
        let filter = WorkflowFilter {
            project_types: HashSet::from(["api".to_string()]),
            ..WorkflowFilter::default()
        };
        let survivors = apply_static_filters(cohort(), &filter, "github");
        assert_eq!(
            survivors.iter().map(|p| p.slug.as_str()).collect::<Vec<_>>(),
            ["alpha", "charlie"]
        );
    }

    #[test]
    fn test_pipeline_idempotent() {
        let filter = WorkflowFilter {
            github_identifier_required: true,
            project_types: HashSet::from(["api".to_string()]),
            ..WorkflowFilter::default()
        };
        let once = apply_static_filters(cohort(), &filter, "github");
        let twice = apply_static_filters(once.clone(), &filter, "github");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let filter = WorkflowFilter::default();
        let survivors = apply_static_filters(cohort(), &filter, "github");
        assert_eq!(survivors.len(), 3);
    }
}
