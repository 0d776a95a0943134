//! Typed entities shared across the engine: registry projects, code-host
//! repositories, and workflow definitions.

pub mod github;
pub mod gitlab;
pub mod imbi;
pub mod workflow;

pub use github::{
    EnvironmentSyncResult, GitHubEnvironment, GitHubOrganization, GitHubRepository, GitHubTeam,
    GitHubUser, GitHubWorkflowJob, GitHubWorkflowRun,
};
pub use gitlab::GitLabProject;
pub use imbi::{
    ImbiEnvironment, ImbiProject, ImbiProjectFactType, ImbiProjectFactTypeEnum,
    ImbiProjectFactTypeRange, ImbiProjectType,
};
pub use workflow::{
    ActionCommon, CallableAction, ClaudeAction, CloneType, Condition, ConditionType, DockerAction,
    DockerCommand, FileAction, FileCommand, GitAction, GitCommand, GitHubAction, GitHubCommand,
    GitSearchStrategy, RemoteClient, ShellAction, TemplateAction, UtilityAction, UtilityCommand,
    Workflow, WorkflowAction, WorkflowConfiguration, WorkflowContext, WorkflowFilter, WorkflowGit,
    WorkflowGitHub, WorkflowGitLab,
};
