//! Per-project workflow execution.
//!
//! One engine instance serves a whole orchestration run; `execute` is
//! called once per project and owns that project's workspace lifecycle:
//! create, symlink the workflow source, clone, gate on conditions, run
//! the action pipeline, commit, push or open a pull request, clean up.
//! On failure the workspace is optionally snapshotted into the error
//! directory before removal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::actions::ActionDispatcher;
use crate::claude::Claude;
use crate::clients::GitHubClient;
use crate::conditions::ConditionChecker;
use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::git;
use crate::models::{
    CloneType, GitLabProject, GitHubRepository, ImbiProject, Workflow, WorkflowAction,
    WorkflowContext,
};
use crate::utils;
use crate::workflow_filter;

/// How a project run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// A condition gate decided the workflow does not apply.
    Skipped,
}

pub struct WorkflowEngine {
    configuration: Arc<Configuration>,
    workflow: Arc<Workflow>,
    checker: ConditionChecker,
    github: Option<Arc<GitHubClient>>,
    last_error_path: std::sync::Mutex<Option<PathBuf>>,
}

impl WorkflowEngine {
    pub fn new(configuration: Arc<Configuration>, workflow: Arc<Workflow>) -> Result<Self> {
        if !configuration.claude_code.enabled
            && (workflow.configuration.needs_claude()
                || workflow.configuration.github.create_pull_request)
        {
            return Err(Error::config(
                "workflow requires Claude Code, but it is not enabled",
            ));
        }
        let github = configuration
            .github
            .as_ref()
            .map(GitHubClient::get_instance)
            .transpose()?;
        Ok(Self {
            checker: ConditionChecker::new(&configuration)?,
            github,
            workflow,
            configuration,
            last_error_path: std::sync::Mutex::new(None),
        })
    }

    /// Where the last failed workspace was preserved, if any.
    pub fn last_error_path(&self) -> Option<PathBuf> {
        self.last_error_path
            .lock()
            .expect("error path mutex is never poisoned")
            .clone()
    }

    /// Run the workflow for one project. `Err` means the run failed; the
    /// workspace is removed in every case, after an optional snapshot
    /// into the error directory.
    pub async fn execute(
        &self,
        project: ImbiProject,
        github_repository: Option<GitHubRepository>,
        gitlab_project: Option<GitLabProject>,
    ) -> Result<RunOutcome> {
        let workspace = tempfile::tempdir()?;
        let context = self.setup_workspace(
            workspace.path(),
            project,
            github_repository,
            gitlab_project,
        )?;

        let result = self.run(&context).await;
        if let Err(err) = &result {
            log::error!(
                "Workflow failed for {} ({}): {err}",
                context.imbi_project.name,
                context.imbi_project.id
            );
            if self.configuration.preserve_on_error {
                self.preserve_error_state(&context, workspace.path());
            }
        }
        if let Err(err) = workspace.close() {
            log::warn!("Failed to remove workspace: {err}");
        }
        result
    }

    async fn run(&self, context: &WorkflowContext) -> Result<RunOutcome> {
        let configuration = &self.workflow.configuration;
        let mut context = context.clone();

        // Remote conditions run before paying for the clone.
        if !self
            .checker
            .check_remote(
                &context,
                configuration.condition_type,
                &configuration.conditions,
            )
            .await?
        {
            log::info!(
                "Remote workflow conditions not met for {}",
                context.imbi_project.name
            );
            return Ok(RunOutcome::Skipped);
        }

        if configuration.git.clone {
            let url = self.clone_url(&context)?;
            let starting_commit = git::clone_repository(
                &context.working_directory,
                &url,
                configuration.git.starting_branch.as_deref(),
                configuration.git.depth,
            )
            .await?;
            context.starting_commit = Some(starting_commit);
        }

        if !self
            .checker
            .check(&context, configuration.condition_type, &configuration.conditions)?
        {
            log::info!(
                "Workflow conditions not met for {}",
                context.imbi_project.name
            );
            return Ok(RunOutcome::Skipped);
        }

        let claude = if self.configuration.claude_code.enabled {
            Some(Arc::new(Claude::new(self.configuration.clone(), &context)?))
        } else {
            None
        };
        let dispatcher = ActionDispatcher::new(self.configuration.clone(), claude.clone());

        for action in &configuration.actions {
            if !self.action_applies(&context, action).await? {
                continue;
            }
            dispatcher.execute(&context, action).await.map_err(|err| {
                log::error!("Error executing action \"{}\": {err}", action.name());
                err
            })?;
            if action.committable() {
                if self.configuration.ai_commits {
                    let claude = claude
                        .as_ref()
                        .expect("ai_commits requires claude_code.enabled");
                    claude.commit(&context, action.name()).await?;
                } else {
                    self.fallback_commit(&context, action).await?;
                }
            }
        }

        if configuration.github.create_pull_request && self.configuration.claude_code.enabled {
            let claude = claude
                .as_ref()
                .ok_or_else(|| Error::config("pull requests require Claude Code"))?;
            self.create_pull_request(&context, claude).await?;
        } else if configuration.git.clone {
            git::push_changes(&context.repository_dir(), "origin", "main", true, false).await?;
        }

        Ok(RunOutcome::Completed)
    }

    /// Pre-dispatch gates: per-action project filter, then local
    /// conditions, then remote conditions. A failed gate skips the
    /// action without error.
    async fn action_applies(
        &self,
        context: &WorkflowContext,
        action: &WorkflowAction,
    ) -> Result<bool> {
        let common = action.common();
        if let Some(filter) = &common.filter {
            if !workflow_filter::filter_project(
                &self.configuration,
                &context.imbi_project,
                filter,
            )
            .await?
            {
                log::debug!("Skipping {} due to project filter", common.name);
                return Ok(false);
            }
        }
        if !self
            .checker
            .check(context, common.condition_type, &common.conditions)?
        {
            log::debug!("Skipping {} due to failed condition check", common.name);
            return Ok(false);
        }
        if !self
            .checker
            .check_remote(context, common.condition_type, &common.conditions)
            .await?
        {
            log::debug!("Skipping {} due to failed remote condition check", common.name);
            return Ok(false);
        }
        Ok(true)
    }

    /// Stage everything and commit with the fixed message format.
    async fn fallback_commit(
        &self,
        context: &WorkflowContext,
        action: &WorkflowAction,
    ) -> Result<()> {
        let repository = context.repository_dir();
        git::add_files(&repository, &["--all"]).await?;

        let message = format!(
            "imbi-automations: {} {}\n\n🤖 Generated with [Imbi Automations]\
             (https://github.com/AWeber-Imbi/imbi-automations).",
            self.workflow.slug,
            action.name()
        );
        match git::commit_changes(&repository, &message, &self.configuration.commit_author).await? {
            Some(sha) => log::info!("Committed changes (fallback): {sha}"),
            None => log::info!("No changes to commit (fallback)"),
        }
        Ok(())
    }

    /// Push a workflow branch and open a pull request with an
    /// LLM-written body summarizing the commit walk.
    async fn create_pull_request(&self, context: &WorkflowContext, claude: &Claude) -> Result<()> {
        let github = self
            .github
            .as_ref()
            .ok_or_else(|| Error::config("pull requests require GitHub configuration"))?;
        let repository_dir = context.repository_dir();
        let branch = format!("imbi-automations/{}", self.workflow.slug);

        if self.workflow.configuration.github.replace_branch {
            log::debug!(
                "Deleting remote branch {branch} if it exists for {}",
                context.imbi_project.slug
            );
            git::delete_remote_branch_if_exists(&repository_dir, &branch).await?;
        }

        git::create_branch(&repository_dir, &branch, true).await?;
        git::push_changes(&repository_dir, "origin", &branch, true, false).await?;
        log::debug!(
            "Pushed branch {branch} for pull request for {}",
            context.imbi_project.slug
        );

        let starting_commit = context
            .starting_commit
            .as_deref()
            .ok_or_else(|| Error::config("pull requests require a cloned repository"))?;
        let summary = git::get_commits_since(&repository_dir, starting_commit).await?;
        log::debug!("{} commits made in workflow", summary.commits.len());

        let prompt = claude.pull_request_prompt(context, &summary)?;
        let body = claude.query(&prompt).await?;

        let base_branch = context
            .github_repository
            .as_ref()
            .map(|repository| repository.default_branch.clone())
            .unwrap_or_else(|| "main".to_string());
        let title = format!("imbi-automations: {}", self.workflow.configuration.name);
        let url = github
            .create_pull_request(context, &title, &body, &branch, &base_branch)
            .await?;
        log::info!(
            "Created pull request for {}: {url}",
            context.imbi_project.slug
        );
        Ok(())
    }

    fn clone_url(&self, context: &WorkflowContext) -> Result<String> {
        let clone_type = self.workflow.configuration.git.clone_type;
        if let Some(repository) = &context.github_repository {
            return Ok(match clone_type {
                CloneType::Ssh => repository.ssh_url.clone(),
                CloneType::Http => repository.clone_url.clone(),
            });
        }
        if let Some(project) = &context.gitlab_project {
            return Ok(match clone_type {
                CloneType::Ssh => project.ssh_url_to_repo.clone(),
                CloneType::Http => project.http_url_to_repo.clone(),
            });
        }
        Err(Error::config("no repository available to clone"))
    }

    /// Create the workspace skeleton: `workflow` symlink to the workflow
    /// source and an empty `extracted/` directory.
    fn setup_workspace(
        &self,
        working_directory: &Path,
        project: ImbiProject,
        github_repository: Option<GitHubRepository>,
        gitlab_project: Option<GitLabProject>,
    ) -> Result<WorkflowContext> {
        let workflow_source = self.workflow.path.canonicalize().map_err(|err| {
            Error::config(format!(
                "unable to resolve workflow directory {}: {err}",
                self.workflow.path.display()
            ))
        })?;
        let link = working_directory.join("workflow");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&workflow_source, &link)?;
        #[cfg(not(unix))]
        utils::copy_tree(&workflow_source, &link)?;

        std::fs::create_dir_all(working_directory.join("extracted"))?;

        Ok(WorkflowContext {
            workflow: self.workflow.clone(),
            imbi_project: project,
            github_repository,
            gitlab_project,
            working_directory: working_directory.to_path_buf(),
            starting_commit: None,
        })
    }

    /// Snapshot a failed workspace to
    /// `<error_dir>/<workflow-slug>/<project-slug>-<UTC timestamp>/`.
    fn preserve_error_state(&self, context: &WorkflowContext, working_directory: &Path) {
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let error_path = self
            .configuration
            .error_dir
            .join(&self.workflow.slug)
            .join(format!("{}-{timestamp}", context.imbi_project.slug));

        match utils::copy_tree(working_directory, &error_path) {
            Ok(()) => {
                log::info!(
                    "Preserved error state to {} for debugging",
                    error_path.display()
                );
                *self
                    .last_error_path
                    .lock()
                    .expect("error path mutex is never poisoned") = Some(error_path);
            }
            Err(err) => {
                log::error!(
                    "Failed to preserve error state to {}: {err}",
                    error_path.display()
                );
            }
        }
    }
}
