//! Claude Code integration.
//!
//! Code transformation and commits run the external Claude Code
//! executable as a subprocess with the rendered prompt on stdin; its
//! final stdout must carry a JSON run report (`result`, `message`,
//! `errors`). One-off completions (pull-request bodies) go through the
//! Anthropic Messages API instead.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::clients::AnthropicClient;
use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::git::CommitSummary;
use crate::models::{ClaudeAction, WorkflowContext};
use crate::process::run_command;
use crate::template;
use crate::utils;

const COMMIT_TIMEOUT_SECS: u64 = 3600;

/// Prompt used for LLM-backed commits after a committable action.
const COMMIT_TEMPLATE: &str = r#"Stage and commit all pending changes in this repository.

- Stage every pending change, including deletions, with `git add --all`.
- Write the commit message yourself based on the staged diff.
- First line: `imbi-automations: {{ workflow.slug }} {{ action_name }}`
- After a blank line, add a short body describing WHAT changed.
- End the message with this trailer on its own line:
  🤖 Generated with [Imbi Automations](https://github.com/AWeber-Imbi/imbi-automations).
- Commit as `{{ commit_author }}`.
- If there is nothing to commit, do not create an empty commit.

When finished, reply with ONLY a JSON object:
{"result": "success" | "failure", "message": "<short explanation>", "errors": []}
"#;

/// Prompt used to generate a pull-request body from the commit walk.
const PULL_REQUEST_TEMPLATE: &str = r#"Write a pull request description for the changes summarized below.

- Start with a one-paragraph overview of what changed and why.
- Follow with a bulleted list of the notable changes.
- Do not invent changes that are not in the summary.
- Reply with ONLY the pull request body in Markdown, no preamble.

Workflow: {{ workflow.name }}
Project: {{ imbi_project.name }}

Commits between {{ starting_commit }} and HEAD:
```json
{{ summary }}
```
"#;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunResult {
    Success,
    Failure,
}

/// The run report every agent invocation must produce.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentRun {
    pub result: AgentRunResult,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl AgentRun {
    fn contract_failure(message: impl Into<String>) -> Self {
        Self {
            result: AgentRunResult::Failure,
            message: Some("agent contract failure".to_string()),
            errors: vec![message.into()],
        }
    }
}

pub struct Claude {
    config: Arc<Configuration>,
    anthropic: Option<Arc<AnthropicClient>>,
    prompt_extras: Vec<(&'static str, serde_json::Value)>,
}

impl Claude {
    pub fn new(config: Arc<Configuration>, context: &WorkflowContext) -> Result<Self> {
        let (author_name, author_address) = utils::parse_commit_author(&config.commit_author);
        let prompt_extras = vec![
            (
                "commit_author",
                serde_json::Value::String(config.commit_author.clone()),
            ),
            ("commit_author_name", serde_json::Value::String(author_name)),
            (
                "commit_author_address",
                serde_json::Value::String(author_address),
            ),
            (
                "workflow_name",
                serde_json::Value::String(context.workflow.configuration.name.clone()),
            ),
        ];
        let anthropic = if config.anthropic.api_key.is_some() {
            Some(AnthropicClient::get_instance(&config.anthropic)?)
        } else {
            None
        };
        Ok(Self {
            config,
            anthropic,
            prompt_extras,
        })
    }

    /// Run the generator/validator loop for a claude action.
    ///
    /// Each cycle runs the task prompt and, when configured, the
    /// validation prompt; a failing agent fails the cycle and the next
    /// one starts. The action fails once every cycle has failed.
    pub async fn execute(&self, context: &WorkflowContext, action: &ClaudeAction) -> Result<()> {
        for cycle in 1..=action.max_cycles {
            log::info!(
                "Claude Code cycle {cycle}/{} for action {}",
                action.max_cycles,
                action.common.name
            );
            if self.execute_cycle(context, action, cycle).await? {
                log::debug!("Claude Code {} cycle {cycle} successful", action.common.name);
                return Ok(());
            }
        }
        Err(Error::Agent(format!(
            "Claude Code action {} failed after {} cycles",
            action.common.name, action.max_cycles
        )))
    }

    async fn execute_cycle(
        &self,
        context: &WorkflowContext,
        action: &ClaudeAction,
        cycle: u32,
    ) -> Result<bool> {
        let task_prompt = self.prompt_from_file(context, &action.prompt)?;
        let run = self
            .run_agent(context, &task_prompt, action.common.timeout)
            .await?;
        if run.result == AgentRunResult::Failure {
            log::error!(
                "Claude Code task agent {} failed in cycle {cycle}: {}",
                action.common.name,
                run.message.as_deref().unwrap_or("unspecified failure")
            );
            return Ok(false);
        }

        if let Some(validation_prompt) = &action.validation_prompt {
            let prompt = self.prompt_from_file(context, validation_prompt)?;
            let run = self
                .run_agent(context, &prompt, action.common.timeout)
                .await?;
            if run.result == AgentRunResult::Failure {
                log::error!(
                    "Claude Code validator agent {} failed in cycle {cycle}: {}",
                    action.common.name,
                    run.message.as_deref().unwrap_or("unspecified failure")
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Commit pending changes via the agent. A clean working tree is a
    /// successful no-op.
    pub async fn commit(&self, context: &WorkflowContext, action_name: &str) -> Result<()> {
        log::debug!("Using Claude Code to commit changes for {action_name}");
        let mut extras = self.prompt_extras.clone();
        extras.push(("action_name", serde_json::Value::String(action_name.to_string())));
        let prompt = template::render(context, COMMIT_TEMPLATE, &extras)?;

        let run = self.run_agent(context, &prompt, COMMIT_TIMEOUT_SECS).await?;
        if run.result == AgentRunResult::Failure {
            let message = run.message.clone().unwrap_or_default().to_lowercase();
            for phrase in ["no changes to commit", "working tree is clean"] {
                if message.contains(phrase) {
                    log::info!("No changes to commit for {action_name}");
                    return Ok(());
                }
            }
            return Err(Error::Agent(format!(
                "Claude Code commit failed: {}",
                run.message.unwrap_or_else(|| "unspecified failure".to_string())
            )));
        }
        Ok(())
    }

    /// One-off completion via the Anthropic API.
    pub async fn query(&self, prompt: &str) -> Result<String> {
        let anthropic = self
            .anthropic
            .as_ref()
            .ok_or_else(|| Error::config("anthropic.api_key is required for completions"))?;
        anthropic.query(prompt).await
    }

    /// Render the pull-request body prompt from the commit walk.
    pub fn pull_request_prompt(
        &self,
        context: &WorkflowContext,
        summary: &CommitSummary,
    ) -> Result<String> {
        let mut extras = self.prompt_extras.clone();
        extras.push((
            "summary",
            serde_json::Value::String(serde_json::to_string_pretty(summary)?),
        ));
        template::render(context, PULL_REQUEST_TEMPLATE, &extras)
    }

    /// Load a prompt file from the workflow directory, rendering it when
    /// it carries the template extension.
    fn prompt_from_file(&self, context: &WorkflowContext, prompt: &Path) -> Result<String> {
        let path = context.workflow_dir().join(prompt);
        if !path.is_file() {
            return Err(Error::MissingPath(path));
        }
        let contents = std::fs::read_to_string(&path)?;
        if path.extension().and_then(|extension| extension.to_str()) == Some("j2") {
            template::render(context, &contents, &self.prompt_extras)
        } else {
            Ok(contents)
        }
    }

    async fn run_agent(
        &self,
        context: &WorkflowContext,
        prompt: &str,
        timeout_secs: u64,
    ) -> Result<AgentRun> {
        let claude_code = &self.config.claude_code;
        let args: Vec<&str> = claude_code.args.iter().map(String::as_str).collect();
        log::debug!("$ {} {}", claude_code.executable, args.join(" "));
        for line in prompt.lines() {
            log::debug!("  {line}");
        }

        let output = run_command(
            &claude_code.executable,
            &args,
            Some(&context.working_directory),
            Some(prompt),
            timeout_secs,
        )
        .await?;
        if !output.success() {
            return Err(Error::Agent(format!(
                "{} exited with code {}: {}",
                claude_code.executable,
                output.code,
                output.failure_output()
            )));
        }
        Ok(parse_agent_output(&output.stdout))
    }
}

/// Parse the agent's final JSON report; malformed output counts as a
/// cycle failure rather than a hard error.
fn parse_agent_output(stdout: &str) -> AgentRun {
    match utils::extract_json(stdout) {
        Ok(payload) => match serde_json::from_value::<AgentRun>(payload) {
            Ok(run) => run,
            Err(err) => AgentRun::contract_failure(format!("invalid run report: {err}")),
        },
        Err(err) => AgentRun::contract_failure(err.to_string()),
    }
}
