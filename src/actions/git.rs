//! Git action executor: extract a file as it existed before a matching
//! commit, writing the result under `extracted/`.

use crate::errors::{Error, Result};
use crate::git;
use crate::models::{GitAction, GitCommand, GitSearchStrategy, WorkflowContext};

pub async fn execute(context: &WorkflowContext, action: &GitAction) -> Result<()> {
    match action.command {
        GitCommand::Extract => extract(context, action).await,
    }
}

async fn extract(context: &WorkflowContext, action: &GitAction) -> Result<()> {
    let keyword = action
        .commit_keyword
        .as_deref()
        .expect("validated at parse time");
    let strategy = action
        .search_strategy
        .unwrap_or(GitSearchStrategy::BeforeLastMatch);
    let destination = context.extracted_dir().join(&action.destination);

    let extracted = git::extract_file_from_commit(
        &context.repository_dir(),
        &action.source,
        &destination,
        keyword,
        strategy,
    )
    .await?;

    if !extracted && !action.ignore_errors {
        return Err(Error::Action {
            action: action.common.name.clone(),
            message: format!("git extraction failed for {}", action.source.display()),
        });
    }
    Ok(())
}
