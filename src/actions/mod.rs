//! Action dispatch: one executor per action kind.
//!
//! The engine gates each action on its filter and conditions before
//! dispatching here; executors only perform the work.

pub mod docker;
pub mod file;
pub mod git;
pub mod github;
pub mod shell;
pub mod template;

use std::sync::Arc;

use crate::claude::Claude;
use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::models::{WorkflowAction, WorkflowContext};

pub struct ActionDispatcher {
    config: Arc<Configuration>,
    claude: Option<Arc<Claude>>,
}

impl ActionDispatcher {
    pub fn new(config: Arc<Configuration>, claude: Option<Arc<Claude>>) -> Self {
        Self { config, claude }
    }

    pub async fn execute(&self, context: &WorkflowContext, action: &WorkflowAction) -> Result<()> {
        log::info!("Executing action: {}", action.name());
        match action {
            WorkflowAction::File(action) => file::execute(context, action).await,
            WorkflowAction::Git(action) => git::execute(context, action).await,
            WorkflowAction::Docker(action) => docker::execute(context, action).await,
            WorkflowAction::Shell(action) => shell::execute(context, action).await,
            WorkflowAction::Template(action) => template::execute(context, action).await,
            WorkflowAction::GitHub(action) => {
                github::execute(&self.config, context, action).await
            }
            WorkflowAction::Claude(action) => {
                let claude = self.claude.as_ref().ok_or_else(|| {
                    Error::config("workflow requires Claude Code, but it is not enabled")
                })?;
                claude.execute(context, action).await
            }
            WorkflowAction::Utility(_) => Err(Error::NotImplemented("utility commands")),
            WorkflowAction::Callable(_) => Err(Error::NotImplemented("callable actions")),
        }
    }
}
