//! Shell action executor.
//!
//! The command string is template-rendered when it contains template
//! syntax, then tokenized with POSIX shell splitting and executed
//! directly (no shell interpolation of the result).

use crate::errors::{Error, Result};
use crate::models::{ShellAction, WorkflowContext};
use crate::process::run_command;
use crate::template;

pub async fn execute(context: &WorkflowContext, action: &ShellAction) -> Result<()> {
    let command = if template::has_template_syntax(&action.command) {
        log::debug!("Rendering templated command: {}", action.command);
        template::render(context, &action.command, &[])?
    } else {
        action.command.clone()
    };
    log::debug!("Executing shell command: {command}");

    let arguments = shlex::split(&command)
        .ok_or_else(|| Error::config(format!("invalid shell command syntax: {command}")))?;
    if arguments.is_empty() {
        return Err(Error::config("empty command after template rendering"));
    }
    let argument_refs: Vec<&str> = arguments.iter().map(String::as_str).collect();

    let repository = context.repository_dir();
    let cwd = if repository.exists() {
        repository
    } else {
        context.working_directory.clone()
    };

    let output = run_command(
        argument_refs[0],
        &argument_refs[1..],
        Some(&cwd),
        None,
        action.common.timeout,
    )
    .await?;

    if !output.success() {
        if action.ignore_errors {
            log::info!(
                "Shell command failed with exit code {} (ignored): {}",
                output.code,
                output.failure_output()
            );
            return Ok(());
        }
        log::error!(
            "Shell command failed with exit code {}: {}",
            output.code,
            output.failure_output()
        );
        return Err(Error::Shell {
            code: output.code,
            output: output.failure_output().to_string(),
        });
    }
    Ok(())
}
