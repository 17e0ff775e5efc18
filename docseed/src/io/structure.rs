//! Structure generation: ask the model for the project skeleton.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::fences::strip_code_fences;
use crate::core::types::ProjectFiles;
use crate::io::generator::Generator;
use crate::io::prompt::PromptEngine;

const PROJECT_FILES_SCHEMA: &str = include_str!("../../schemas/project_files.schema.json");

/// Request the skeleton and parse it into [`ProjectFiles`].
#[instrument(skip_all)]
pub fn generate_structure<G: Generator>(
    generator: &G,
    prompts: &PromptEngine,
) -> Result<ProjectFiles> {
    let prompt = prompts.structure()?;
    let reply = generator
        .generate(&prompt)
        .context("request project structure")?;
    let files = parse_project_files(&reply)?;
    debug!(files = files.len(), "parsed project structure");
    Ok(files)
}

/// Strip fences from a model reply, then check and parse the JSON object.
pub fn parse_project_files(reply: &str) -> Result<ProjectFiles> {
    let body = strip_code_fences(reply);
    let value: Value = serde_json::from_str(body).context("parse project structure json")?;
    validate_shape(&value)?;
    let files: ProjectFiles =
        serde_json::from_value(value).context("convert project structure")?;
    Ok(files)
}

fn validate_shape(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(PROJECT_FILES_SCHEMA).context("parse project files schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile project files schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!(
            "project structure does not match schema:\n- {}",
            messages.join("\n- ")
        );
    }
    Ok(())
}
