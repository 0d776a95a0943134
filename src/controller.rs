//! Fan-out orchestration: resolve the target cohort, filter it, and run
//! the per-project workflow engine under a concurrency bound.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::clients::{self, ImbiClient};
use crate::config::Configuration;
use crate::engine::{RunOutcome, WorkflowEngine};
use crate::errors::{Error, Result};
use crate::models::{ImbiProject, Workflow};
use crate::registry::{self, DataRegistry};
use crate::workflow_filter;

/// What the automation run targets, from the CLI selector flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    ImbiProject(i64),
    ImbiProjectType(String),
    AllImbiProjects,
    GitHubRepository(String),
    GitHubOrganization(String),
    AllGitHubRepositories,
    GitLabRepository(String),
    GitLabGroup(String),
    AllGitLabRepositories,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: Target,
    pub max_concurrency: usize,
    pub exit_on_error: bool,
    pub start_from_project: Option<String>,
}

/// Aggregate outcome of an orchestration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, result: &Result<RunOutcome>) {
        match result {
            Ok(RunOutcome::Completed) => self.succeeded += 1,
            Ok(RunOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Automation {
    configuration: Arc<Configuration>,
    workflow: Arc<Workflow>,
    engine: Arc<WorkflowEngine>,
    options: RunOptions,
}

impl Automation {
    pub fn new(
        configuration: Arc<Configuration>,
        workflow: Arc<Workflow>,
        options: RunOptions,
    ) -> Result<Self> {
        let engine = Arc::new(WorkflowEngine::new(
            configuration.clone(),
            workflow.clone(),
        )?);
        Ok(Self {
            configuration,
            workflow,
            engine,
            options,
        })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        match &self.options.target {
            Target::ImbiProject(id) => {
                let client = self.imbi_client()?;
                let project = client
                    .get_project(*id)
                    .await?
                    .ok_or_else(|| Error::config(format!("Imbi project {id} not found")))?;
                self.process_projects(vec![project]).await
            }
            Target::ImbiProjectType(slug) => {
                let client = self.imbi_client()?;
                let projects = client.get_projects_by_type(slug).await?;
                self.process_projects(projects).await
            }
            Target::AllImbiProjects => {
                let client = self.imbi_client()?;
                let projects = client.get_all_projects().await?;
                self.process_projects(projects).await
            }
            Target::GitHubRepository(url) => {
                let client = self.imbi_client()?;
                let projects = client.search_projects_by_url(url).await?;
                if projects.is_empty() {
                    return Err(Error::config(format!(
                        "no Imbi project links to repository {url}"
                    )));
                }
                self.process_projects(projects).await
            }
            Target::GitHubOrganization(_) | Target::AllGitHubRepositories => {
                Err(Error::NotImplemented("GitHub cohort targets"))
            }
            Target::GitLabRepository(_)
            | Target::GitLabGroup(_)
            | Target::AllGitLabRepositories => {
                Err(Error::NotImplemented("GitLab cohort targets"))
            }
        }
    }

    fn imbi_client(&self) -> Result<Arc<ImbiClient>> {
        let imbi = self
            .configuration
            .imbi
            .as_ref()
            .ok_or_else(|| Error::config("this target requires [imbi] configuration"))?;
        ImbiClient::get_instance(imbi)
    }

    /// Validate the workflow filter against registry reference data,
    /// apply it to the cohort, and run the survivors.
    async fn process_projects(&self, projects: Vec<ImbiProject>) -> Result<RunSummary> {
        log::debug!("Found {} total active projects", projects.len());

        let mut projects = projects;
        if let Some(filter) = &self.workflow.configuration.filter {
            self.validate_filter(filter).await?;
            projects = workflow_filter::apply(
                &self.configuration,
                projects,
                filter,
                self.options.max_concurrency,
            )
            .await?;
        }

        if let Some(start_from) = &self.options.start_from_project {
            let before = projects.len();
            projects.retain(|project| project.slug.as_str() >= start_from.as_str());
            log::debug!(
                "Skipped {} projects before {start_from}",
                before - projects.len()
            );
        }

        if self.options.exit_on_error {
            self.run_exit_on_error(projects).await
        } else {
            self.run_best_effort(projects).await
        }
    }

    async fn validate_filter(&self, filter: &crate::models::WorkflowFilter) -> Result<()> {
        if filter.project_types.is_empty()
            && filter.project_environments.is_empty()
            && filter.project_facts.is_empty()
        {
            return Ok(());
        }
        let Some(imbi) = &self.configuration.imbi else {
            return Ok(());
        };
        let client = ImbiClient::get_instance(imbi)?;
        let data = DataRegistry::load(&client, &DataRegistry::default_cache_path()).await?;
        registry::validate_filter(&data, filter)
    }

    /// Run every project, aggregating results; failures do not stop the
    /// rest of the cohort.
    async fn run_best_effort(&self, projects: Vec<ImbiProject>) -> Result<RunSummary> {
        let mut tasks = self.spawn_project_tasks(projects);
        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let result =
                joined.map_err(|err| Error::config(format!("project task failed: {err}")))?;
            summary.record(&result);
        }
        Ok(summary)
    }

    /// Run until the first failure, then cancel the remaining tasks.
    async fn run_exit_on_error(&self, projects: Vec<ImbiProject>) -> Result<RunSummary> {
        let mut tasks = self.spawn_project_tasks(projects);
        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let result =
                joined.map_err(|err| Error::config(format!("project task failed: {err}")))?;
            summary.record(&result);
            if let Err(err) = result {
                log::error!("Aborting remaining projects: {err}");
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return Ok(summary);
            }
        }
        Ok(summary)
    }

    fn spawn_project_tasks(&self, projects: Vec<ImbiProject>) -> JoinSet<Result<RunOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks: JoinSet<Result<RunOutcome>> = JoinSet::new();
        for project in projects {
            let semaphore = semaphore.clone();
            let configuration = self.configuration.clone();
            let engine = self.engine.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("project semaphore is never closed");
                log::info!("Processing {} ({})", project.name, project.id);

                let github_repository =
                    clients::github_repository_for(&configuration, &project).await?;
                let gitlab_project = clients::gitlab_project_for(&configuration, &project).await?;

                let name = project.name.clone();
                let id = project.id;
                let outcome = engine
                    .execute(project, github_repository, gitlab_project)
                    .await?;
                log::info!("Completed processing Imbi project {name} ({id})");
                Ok(outcome)
            });
        }
        tasks
    }
}
