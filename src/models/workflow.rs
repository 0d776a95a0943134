//! Workflow definitions: the parsed form of a workflow directory's
//! `config.toml` plus the per-run execution context.
//!
//! Actions are a tagged sum type. Parsing is strict: unknown fields are
//! rejected, and each command's required/allowed field sets are enforced
//! before a workflow is accepted. Validation failures are configuration
//! errors and fail the process before any project runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::models::github::GitHubRepository;
use crate::models::gitlab::GitLabProject;
use crate::models::imbi::ImbiProject;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConditionType {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RemoteClient {
    #[default]
    Github,
    Gitlab,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloneType {
    #[default]
    Ssh,
    Http,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GitSearchStrategy {
    BeforeFirstMatch,
    BeforeLastMatch,
}

/// Cohort-level (or per-action) project filter.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowFilter {
    #[serde(default)]
    pub project_ids: HashSet<i64>,
    #[serde(default)]
    pub project_types: HashSet<String>,
    #[serde(default)]
    pub project_facts: IndexMap<String, String>,
    #[serde(default)]
    pub project_environments: HashSet<String>,
    #[serde(default)]
    pub github_identifier_required: bool,
    #[serde(default)]
    pub github_workflow_status_exclude: HashSet<String>,
}

/// A predicate over the cloned repository or a remote code host.
///
/// Exactly one variant from the local group and one from the remote group
/// may be populated (either group may be empty). `file` pairs with the
/// contains variants; the exists variants accept an exact relative path
/// or a regex over repository-relative paths.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_exists: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_not_exists: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_doesnt_contain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub remote_client: RemoteClient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_exists: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_not_exists: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_doesnt_contain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file: Option<PathBuf>,
}

impl Condition {
    pub fn has_local(&self) -> bool {
        self.file_exists.is_some()
            || self.file_not_exists.is_some()
            || self.file_contains.is_some()
            || self.file_doesnt_contain.is_some()
    }

    pub fn has_remote(&self) -> bool {
        self.remote_file_exists.is_some()
            || self.remote_file_not_exists.is_some()
            || self.remote_file_contains.is_some()
            || self.remote_file_doesnt_contain.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        let local = [
            ("file_exists", self.file_exists.is_some()),
            ("file_not_exists", self.file_not_exists.is_some()),
            ("file_contains", self.file_contains.is_some()),
            ("file_doesnt_contain", self.file_doesnt_contain.is_some()),
        ];
        Self::check_group(&local, "local")?;
        let remote = [
            ("remote_file_exists", self.remote_file_exists.is_some()),
            ("remote_file_not_exists", self.remote_file_not_exists.is_some()),
            ("remote_file_contains", self.remote_file_contains.is_some()),
            (
                "remote_file_doesnt_contain",
                self.remote_file_doesnt_contain.is_some(),
            ),
        ];
        Self::check_group(&remote, "remote")?;

        let needs_file = self.file_contains.is_some() || self.file_doesnt_contain.is_some();
        if needs_file && self.file.is_none() {
            return Err(Error::config(
                "condition field 'file' is required with 'file_contains' or \
                 'file_doesnt_contain'",
            ));
        }
        if self.file.is_some() && !needs_file {
            return Err(Error::config(
                "condition field 'file' is only valid with 'file_contains' or \
                 'file_doesnt_contain'",
            ));
        }

        let needs_remote_file =
            self.remote_file_contains.is_some() || self.remote_file_doesnt_contain.is_some();
        if needs_remote_file && self.remote_file.is_none() {
            return Err(Error::config(
                "condition field 'remote_file' is required with \
                 'remote_file_contains' or 'remote_file_doesnt_contain'",
            ));
        }
        if self.remote_file.is_some() && !needs_remote_file {
            return Err(Error::config(
                "condition field 'remote_file' is only valid with \
                 'remote_file_contains' or 'remote_file_doesnt_contain'",
            ));
        }
        Ok(())
    }

    fn check_group(variants: &[(&str, bool)], group: &str) -> Result<()> {
        let set: Vec<&str> = variants
            .iter()
            .filter(|(_, populated)| *populated)
            .map(|(name, _)| *name)
            .collect();
        if set.len() > 1 {
            return Err(Error::config(format!(
                "condition sets multiple {group} variants: {}",
                set.join(", ")
            )));
        }
        Ok(())
    }
}

/// Fields shared by every action kind.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActionCommon {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_type: ConditionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<WorkflowFilter>,
    #[serde(default = "ActionCommon::default_timeout")]
    pub timeout: u64,
    /// Informational references; no branching is performed on them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

impl ActionCommon {
    fn default_timeout() -> u64 {
        3600
    }
}

const COMMON_FIELDS: &[&str] = &[
    "name",
    "type",
    "conditions",
    "condition_type",
    "committable",
    "filter",
    "timeout",
    "on_success",
    "on_failure",
];

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileCommand {
    Append,
    Copy,
    Delete,
    Move,
    Rename,
    Write,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FileAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    pub command: FileCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl FileAction {
    /// Text encoding for append/write content; only UTF-8 is supported.
    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("utf-8")
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("path", self.path.is_some()),
            ("pattern", self.pattern.is_some()),
            ("source", self.source.is_some()),
            ("destination", self.destination.is_some()),
            ("content", self.content.is_some()),
            ("encoding", self.encoding.is_some()),
        ];
        let (required, allowed): (&[&str], &[&str]) = match self.command {
            FileCommand::Append | FileCommand::Write => {
                (&["path", "content"], &["path", "content", "encoding"])
            }
            FileCommand::Copy | FileCommand::Move | FileCommand::Rename => {
                (&["source", "destination"], &["source", "destination"])
            }
            FileCommand::Delete => (&[], &["path", "pattern"]),
        };
        check_command_rules(&self.common.name, &self.command.to_string(), &fields, required, allowed)?;
        if self.command == FileCommand::Delete && self.path.is_none() && self.pattern.is_none() {
            return Err(Error::config(format!(
                "action '{}': field 'path' or 'pattern' is required for command 'delete'",
                self.common.name
            )));
        }
        if let Some(pattern) = &self.pattern {
            regex::Regex::new(pattern).map_err(|err| {
                Error::config(format!(
                    "action '{}': invalid pattern {pattern:?}: {err}",
                    self.common.name
                ))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GitCommand {
    Extract,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    pub command: GitCommand,
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_strategy: Option<GitSearchStrategy>,
    #[serde(default)]
    pub ignore_errors: bool,
}

impl GitAction {
    fn validate(&self) -> Result<()> {
        match self.command {
            GitCommand::Extract => {
                if self.commit_keyword.is_none() {
                    return Err(Error::config(format!(
                        "action '{}': field 'commit_keyword' is required for command 'extract'",
                        self.common.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DockerCommand {
    Build,
    Extract,
    Pull,
    Push,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DockerAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    pub command: DockerCommand,
    pub image: String,
    #[serde(default = "DockerAction::default_tag")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

impl DockerAction {
    fn default_tag() -> String {
        "latest".to_string()
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("path", self.path.is_some()),
            ("source", self.source.is_some()),
            ("destination", self.destination.is_some()),
        ];
        let (required, allowed): (&[&str], &[&str]) = match self.command {
            DockerCommand::Build => (&["path"], &["image", "tag", "path"]),
            DockerCommand::Extract => (
                &["source", "destination"],
                &["image", "tag", "source", "destination"],
            ),
            DockerCommand::Pull | DockerCommand::Push => (&[], &["image", "tag"]),
        };
        check_command_rules(&self.common.name, &self.command.to_string(), &fields, required, allowed)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ShellAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    /// Single command string; may contain template expressions.
    pub command: String,
    #[serde(default)]
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TemplateAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GitHubCommand {
    SyncEnvironments,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GitHubAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    pub command: GitHubCommand,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClaudeAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    /// Prompt file path, relative to the workflow directory.
    pub prompt: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_prompt: Option<PathBuf>,
    #[serde(default = "ClaudeAction::default_max_cycles")]
    pub max_cycles: u32,
}

impl ClaudeAction {
    fn default_max_cycles() -> u32 {
        3
    }

    fn validate(&self) -> Result<()> {
        if self.max_cycles < 1 {
            return Err(Error::config(format!(
                "action '{}': max_cycles must be at least 1",
                self.common.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UtilityCommand {
    DockerTag,
    DockerfileFrom,
    CompareSemver,
    ParsePythonConstraints,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UtilityAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    pub command: UtilityCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
}

/// Reserved extension point; parsed but never executed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CallableAction {
    #[serde(flatten)]
    pub common: ActionCommon,
    #[serde(default, rename = "import", skip_serializing_if = "Option::is_none")]
    pub import_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkflowAction {
    Callable(CallableAction),
    Claude(ClaudeAction),
    Docker(DockerAction),
    File(FileAction),
    Git(GitAction),
    #[serde(rename = "github")]
    GitHub(GitHubAction),
    Shell(ShellAction),
    Template(TemplateAction),
    Utility(UtilityAction),
}

impl WorkflowAction {
    pub fn common(&self) -> &ActionCommon {
        match self {
            WorkflowAction::Callable(action) => &action.common,
            WorkflowAction::Claude(action) => &action.common,
            WorkflowAction::Docker(action) => &action.common,
            WorkflowAction::File(action) => &action.common,
            WorkflowAction::Git(action) => &action.common,
            WorkflowAction::GitHub(action) => &action.common,
            WorkflowAction::Shell(action) => &action.common,
            WorkflowAction::Template(action) => &action.common,
            WorkflowAction::Utility(action) => &action.common,
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowAction::Callable(_) => "callable",
            WorkflowAction::Claude(_) => "claude",
            WorkflowAction::Docker(_) => "docker",
            WorkflowAction::File(_) => "file",
            WorkflowAction::Git(_) => "git",
            WorkflowAction::GitHub(_) => "github",
            WorkflowAction::Shell(_) => "shell",
            WorkflowAction::Template(_) => "template",
            WorkflowAction::Utility(_) => "utility",
        }
    }

    /// Whether completing this action triggers the commit path.
    ///
    /// Extractions produce artifacts outside the repository and never
    /// commit, regardless of configuration.
    pub fn committable(&self) -> bool {
        match self {
            WorkflowAction::Git(_) | WorkflowAction::Docker(_) => false,
            _ => self.common().committable.unwrap_or(true),
        }
    }

    /// Parse one action from its raw `[[workflow.actions]]` table.
    ///
    /// Rejects unknown fields, then applies the per-command field rules.
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        let table = value
            .as_object()
            .ok_or_else(|| Error::config("workflow action must be a table"))?;
        let kind = table
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::config("workflow action is missing the 'type' field"))?;

        let variant_fields: &[&str] = match kind {
            "callable" => &["import", "args"],
            "claude" => &["prompt", "validation_prompt", "max_cycles"],
            "docker" => &["command", "image", "tag", "path", "source", "destination"],
            "file" => &[
                "command",
                "path",
                "pattern",
                "source",
                "destination",
                "content",
                "encoding",
            ],
            "git" => &[
                "command",
                "source",
                "destination",
                "commit_keyword",
                "search_strategy",
                "ignore_errors",
            ],
            "github" => &["command"],
            "shell" => &["command", "ignore_errors"],
            "template" => &["source_path", "destination_path"],
            "utility" => &["command", "path", "args"],
            other => {
                return Err(Error::config(format!("unknown action type: {other}")));
            }
        };

        for key in table.keys() {
            if !COMMON_FIELDS.contains(&key.as_str()) && !variant_fields.contains(&key.as_str()) {
                return Err(Error::config(format!(
                    "unknown field '{key}' for {kind} action"
                )));
            }
        }

        let mut body = value.clone();
        if let Some(object) = body.as_object_mut() {
            object.remove("type");
        }

        let action = match kind {
            "callable" => WorkflowAction::Callable(from_value(body)?),
            "claude" => WorkflowAction::Claude(from_value(body)?),
            "docker" => WorkflowAction::Docker(from_value(body)?),
            "file" => WorkflowAction::File(from_value(body)?),
            "git" => WorkflowAction::Git(from_value(body)?),
            "github" => WorkflowAction::GitHub(from_value(body)?),
            "shell" => WorkflowAction::Shell(from_value(body)?),
            "template" => WorkflowAction::Template(from_value(body)?),
            "utility" => WorkflowAction::Utility(from_value(body)?),
            _ => unreachable!("kind validated above"),
        };
        action.validate()?;
        Ok(action)
    }

    fn validate(&self) -> Result<()> {
        for condition in &self.common().conditions {
            condition.validate()?;
        }
        match self {
            WorkflowAction::File(action) => action.validate(),
            WorkflowAction::Docker(action) => action.validate(),
            WorkflowAction::Git(action) => action.validate(),
            WorkflowAction::Claude(action) => action.validate(),
            _ => Ok(()),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| Error::config(err.to_string()))
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowGit {
    #[serde(default = "WorkflowGit::default_clone")]
    pub clone: bool,
    /// Clone depth; 1 is a shallow clone.
    #[serde(default = "WorkflowGit::default_depth")]
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_branch: Option<String>,
    #[serde(default)]
    pub clone_type: CloneType,
}

impl WorkflowGit {
    fn default_clone() -> bool {
        true
    }

    fn default_depth() -> u32 {
        1
    }

    fn validate(&self) -> Result<()> {
        if self.depth < 1 {
            return Err(Error::config("git.depth must be at least 1"));
        }
        Ok(())
    }
}

impl Default for WorkflowGit {
    fn default() -> Self {
        Self {
            clone: true,
            depth: 1,
            starting_branch: None,
            clone_type: CloneType::Ssh,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowGitHub {
    #[serde(default = "WorkflowGitHub::default_create_pull_request")]
    pub create_pull_request: bool,
    #[serde(default)]
    pub replace_branch: bool,
}

impl WorkflowGitHub {
    fn default_create_pull_request() -> bool {
        true
    }
}

impl Default for WorkflowGitHub {
    fn default() -> Self {
        Self {
            create_pull_request: true,
            replace_branch: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowGitLab {
    #[serde(default = "WorkflowGitLab::default_create_merge_request")]
    pub create_merge_request: bool,
}

impl WorkflowGitLab {
    fn default_create_merge_request() -> bool {
        true
    }
}

impl Default for WorkflowGitLab {
    fn default() -> Self {
        Self {
            create_merge_request: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkflowConfiguration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub git: WorkflowGit,
    #[serde(default)]
    pub github: WorkflowGitHub,
    #[serde(default)]
    pub gitlab: WorkflowGitLab,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<WorkflowFilter>,
    #[serde(default)]
    pub condition_type: ConditionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<WorkflowAction>,
}

impl WorkflowConfiguration {
    /// Parse the `[workflow]` table of a workflow `config.toml`.
    pub fn parse(contents: &str) -> Result<Self> {
        let document: toml::Value = toml::from_str(contents)
            .map_err(|err| Error::config(format!("invalid workflow TOML: {err}")))?;
        let document = serde_json::to_value(&document)
            .map_err(|err| Error::config(err.to_string()))?;
        let workflow = document
            .get("workflow")
            .cloned()
            .ok_or_else(|| Error::config("workflow config.toml is missing [workflow]"))?;

        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Raw {
            name: String,
            #[serde(default)]
            description: Option<String>,
            #[serde(default)]
            git: WorkflowGit,
            #[serde(default)]
            github: WorkflowGitHub,
            #[serde(default)]
            gitlab: WorkflowGitLab,
            #[serde(default)]
            filter: Option<WorkflowFilter>,
            #[serde(default)]
            condition_type: ConditionType,
            #[serde(default)]
            conditions: Vec<Condition>,
            #[serde(default)]
            actions: Vec<serde_json::Value>,
        }

        let raw: Raw =
            serde_json::from_value(workflow).map_err(|err| Error::config(err.to_string()))?;
        raw.git.validate()?;
        for condition in &raw.conditions {
            condition.validate()?;
        }
        let actions = raw
            .actions
            .iter()
            .map(WorkflowAction::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: raw.name,
            description: raw.description,
            git: raw.git,
            github: raw.github,
            gitlab: raw.gitlab,
            filter: raw.filter,
            condition_type: raw.condition_type,
            conditions: raw.conditions,
            actions,
        })
    }

    /// True when any action requires the LLM runtime.
    pub fn needs_claude(&self) -> bool {
        self.actions
            .iter()
            .any(|action| matches!(action, WorkflowAction::Claude(_)))
    }
}

/// A workflow directory plus its parsed configuration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Workflow {
    pub path: PathBuf,
    pub slug: String,
    pub configuration: WorkflowConfiguration,
}

impl Workflow {
    /// Load a workflow from a directory containing `config.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        let contents = std::fs::read_to_string(&config_path).map_err(|err| {
            Error::config(format!("unable to read {}: {err}", config_path.display()))
        })?;
        let configuration = WorkflowConfiguration::parse(&contents)?;
        Ok(Self {
            slug: Self::derive_slug(path),
            path: path.to_path_buf(),
            configuration,
        })
    }

    /// The slug is the directory basename, lowercased with underscores
    /// replaced by hyphens.
    pub fn derive_slug(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase().replace('_', "-"))
            .unwrap_or_default()
    }
}

/// Per-project mutable state threaded through a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub workflow: Arc<Workflow>,
    pub imbi_project: ImbiProject,
    pub github_repository: Option<GitHubRepository>,
    pub gitlab_project: Option<GitLabProject>,
    pub working_directory: PathBuf,
    /// HEAD immediately after clone; set iff the workflow clones.
    pub starting_commit: Option<String>,
}

impl WorkflowContext {
    pub fn repository_dir(&self) -> PathBuf {
        self.working_directory.join("repository")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.working_directory.join("extracted")
    }

    pub fn workflow_dir(&self) -> PathBuf {
        self.working_directory.join("workflow")
    }

    /// Resolve an action path against the working directory unless it is
    /// already absolute.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_directory.join(path)
        }
    }
}

fn check_command_rules(
    action: &str,
    command: &str,
    fields: &[(&str, bool)],
    required: &[&str],
    allowed: &[&str],
) -> Result<()> {
    for name in required {
        let populated = fields
            .iter()
            .any(|(field, set)| field == name && *set);
        if !populated {
            return Err(Error::config(format!(
                "action '{action}': field '{name}' is required for command '{command}'"
            )));
        }
    }
    for (name, populated) in fields {
        if *populated && !allowed.contains(name) {
            return Err(Error::config(format!(
                "action '{action}': field '{name}' is not allowed for command '{command}'"
            )));
        }
    }
    Ok(())
}
