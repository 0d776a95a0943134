//! GitHub action executor: repository-state synchronization driven by
//! registry data.

use std::sync::Arc;

use crate::clients::GitHubClient;
use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::models::{GitHubAction, GitHubCommand, WorkflowContext};

pub async fn execute(
    config: &Arc<Configuration>,
    context: &WorkflowContext,
    action: &GitHubAction,
) -> Result<()> {
    match action.command {
        GitHubCommand::SyncEnvironments => sync_environments(config, context, action).await,
    }
}

/// Make the repository's environments match the registry project's
/// environment list.
async fn sync_environments(
    config: &Arc<Configuration>,
    context: &WorkflowContext,
    action: &GitHubAction,
) -> Result<()> {
    let github = config
        .github
        .as_ref()
        .ok_or_else(|| Error::config("github action requires GitHub configuration"))?;
    let repository = context
        .github_repository
        .as_ref()
        .ok_or_else(|| Error::config("github action requires a GitHub repository"))?;
    let client = GitHubClient::get_instance(github)?;

    let (org, name) = repository.owner_and_name();
    let desired = context.imbi_project.environments().to_vec();
    let result = client.sync_project_environments(org, name, &desired).await?;

    log::info!(
        "Environment sync for {org}/{name}: created={:?} deleted={:?} ({} operations)",
        result.created,
        result.deleted,
        result.total_operations
    );
    if !result.success {
        return Err(Error::Action {
            action: action.common.name.clone(),
            message: format!("environment sync failed: {}", result.errors.join("; ")),
        });
    }
    Ok(())
}
