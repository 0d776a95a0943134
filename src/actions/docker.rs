//! Docker action executor.
//!
//! Only `extract` is implemented: pull the image, create a throwaway
//! container, copy the source path out of it into `extracted/`, and
//! remove the container in every exit path. The remaining commands are
//! reserved.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{Error, Result};
use crate::models::{DockerAction, DockerCommand, WorkflowContext};
use crate::process::run_command;
use crate::template;

const PULL_TIMEOUT_SECS: u64 = 3600;
const PROBE_TIMEOUT_SECS: u64 = 60;

static CONTAINER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub async fn execute(context: &WorkflowContext, action: &DockerAction) -> Result<()> {
    match action.command {
        DockerCommand::Extract => extract(context, action).await,
        DockerCommand::Build => Err(Error::NotImplemented("docker build")),
        DockerCommand::Pull => Err(Error::NotImplemented("docker pull")),
        DockerCommand::Push => Err(Error::NotImplemented("docker push")),
    }
}

async fn extract(context: &WorkflowContext, action: &DockerAction) -> Result<()> {
    let image = if template::has_template_syntax(&action.image) {
        template::render(context, &action.image, &[])?
    } else {
        action.image.clone()
    };
    let image = if image.contains(':') {
        image
    } else {
        format!("{image}:{}", action.tag)
    };

    let source = action.source.as_ref().expect("validated at parse time");
    let destination = context
        .extracted_dir()
        .join(action.destination.as_ref().expect("validated at parse time"));
    log::debug!(
        "Extracting {} from {image} to {}",
        source.display(),
        destination.display()
    );
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let container = format!(
        "imbi-extract-{}-{}",
        std::process::id(),
        CONTAINER_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    );

    let result = run_extract(&image, &container, &source.display().to_string(), &destination).await;

    // Container removal runs in every exit path.
    let removal = run_command("docker", &["rm", &container], None, None, PROBE_TIMEOUT_SECS).await;
    match removal {
        Ok(output) if !output.success() => {
            log::debug!(
                "Failed to cleanup container {container}: {}",
                output.failure_output()
            );
        }
        Err(err) => log::debug!("Failed to cleanup container {container}: {err}"),
        Ok(_) => {}
    }

    result
}

async fn run_extract(
    image: &str,
    container: &str,
    source: &str,
    destination: &std::path::Path,
) -> Result<()> {
    docker(&["pull", image], PULL_TIMEOUT_SECS).await?;
    docker(&["create", "--name", container, image], PROBE_TIMEOUT_SECS).await?;
    let copy_source = format!("{container}:{source}");
    docker(
        &["cp", &copy_source, &destination.display().to_string()],
        PROBE_TIMEOUT_SECS,
    )
    .await?;
    log::debug!("Successfully extracted {source} to {}", destination.display());
    Ok(())
}

async fn docker(args: &[&str], timeout_secs: u64) -> Result<()> {
    let output = run_command("docker", args, None, None, timeout_secs)
        .await
        .map_err(|err| match err {
            Error::Config(_) => {
                Error::Docker("docker command not found - is Docker installed and in PATH?".into())
            }
            other => other,
        })?;
    if !output.success() {
        return Err(Error::Docker(format!(
            "docker {} failed (exit code {}): {}",
            args.first().copied().unwrap_or_default(),
            output.code,
            output.failure_output()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionCommon, ConditionType, Workflow, WorkflowConfiguration};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn context(dir: &Path) -> WorkflowContext {
        WorkflowContext {
            workflow: Arc::new(Workflow {
                path: dir.join("workflow-src"),
                slug: "t".to_string(),
                configuration: WorkflowConfiguration::parse("[workflow]\nname = \"t\"\n").unwrap(),
            }),
            imbi_project: serde_json::from_value(serde_json::json!({
                "id": 1,
                "name": "Widget",
                "namespace": "Acme",
                "namespace_slug": "acme",
                "slug": "widget",
                "project_type": "API",
                "project_type_slug": "api",
            }))
            .unwrap(),
            github_repository: None,
            gitlab_project: None,
            working_directory: dir.to_path_buf(),
            starting_commit: None,
        }
    }

    fn docker_action(command: DockerCommand) -> DockerAction {
        DockerAction {
            common: ActionCommon {
                name: "test".to_string(),
                conditions: Vec::new(),
                condition_type: ConditionType::All,
                committable: None,
                filter: None,
                timeout: 3600,
                on_success: None,
                on_failure: None,
            },
            command,
            image: "python".to_string(),
            tag: "latest".to_string(),
            path: None,
            source: Some(PathBuf::from("/etc/os-release")),
            destination: Some(PathBuf::from("os-release.txt")),
        }
    }

    #[tokio::test]
    async fn test_reserved_commands_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        for command in [DockerCommand::Build, DockerCommand::Pull, DockerCommand::Push] {
            let error = execute(&context, &docker_action(command)).await.unwrap_err();
            assert!(matches!(error, Error::NotImplemented(_)));
        }
    }

    #[test]
    fn test_container_names_are_unique() {
        let first = CONTAINER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let second = CONTAINER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        assert_ne!(first, second);
    }
}
