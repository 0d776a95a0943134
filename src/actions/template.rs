//! Template action executor: render a file or a whole directory tree
//! into the workspace.

use crate::errors::{Error, Result};
use crate::models::{TemplateAction, WorkflowContext};
use crate::template;

pub async fn execute(context: &WorkflowContext, action: &TemplateAction) -> Result<()> {
    let source = context.resolve_path(&action.source_path);
    let destination = context.resolve_path(&action.destination_path);

    if source.is_file() {
        template::render_path(context, &source, &destination, &[])?;
        log::info!("Rendered template to {}", destination.display());
    } else if source.is_dir() {
        let count = template::render_tree(context, &source, &destination, &[])?;
        log::info!(
            "Rendered {count} templates from {} to {}",
            source.display(),
            destination.display()
        );
    } else {
        return Err(Error::MissingPath(source));
    }
    Ok(())
}
