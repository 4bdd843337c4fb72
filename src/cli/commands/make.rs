//! `make`: build and persist a workflow from a declaration file.

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::models::{GroupOverrides, WorkflowSpec};
use crate::services::Controller;

pub async fn handle_make(controller: &Controller, spec_path: &Path, json: bool) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let workflow_id = controller
        .make_workflow(&spec, &GroupOverrides::default())
        .await?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "workflow_id": workflow_id })
        );
    } else {
        println!("Workflow created with id {}", workflow_id);
    }
    Ok(())
}

/// Parse a declaration document; `.json` files parse as JSON, everything
/// else as YAML.
pub fn load_spec(path: &Path) -> Result<WorkflowSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading declaration {}", path.display()))?;
    let spec = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing declaration {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing declaration {}", path.display()))?
    };
    Ok(spec)
}
