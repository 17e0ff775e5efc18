//! Prompt rendering for the three model calls.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::ProjectFiles;

const STRUCTURE_TEMPLATE: &str = include_str!("prompts/structure.md");
const SCRIPT_TEMPLATE: &str = include_str!("prompts/script.md");
const DIAGNOSE_TEMPLATE: &str = include_str!("prompts/diagnose.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("structure", STRUCTURE_TEMPLATE)
            .expect("structure template should be valid");
        env.add_template("script", SCRIPT_TEMPLATE)
            .expect("script template should be valid");
        env.add_template("diagnose", DIAGNOSE_TEMPLATE)
            .expect("diagnose template should be valid");
        Self { env }
    }

    pub fn structure(&self) -> Result<String> {
        let template = self.env.get_template("structure")?;
        Ok(template.render(context! {})?)
    }

    /// Script prompt embedding the target directory and every file.
    pub fn script(&self, directory: &str, files: &ProjectFiles) -> Result<String> {
        let files = serde_json::to_string_pretty(files).context("serialize project files")?;
        let template = self.env.get_template("script")?;
        let rendered = template.render(context! {
            directory => directory,
            files => files,
        })?;
        Ok(rendered)
    }

    pub fn diagnose(&self, directory: &str, error: &str) -> Result<String> {
        let template = self.env.get_template("diagnose")?;
        let rendered = template.render(context! {
            directory => directory,
            error => error.trim(),
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_asks_for_both_files_as_raw_json() {
        let prompt = PromptEngine::new().structure().expect("render");
        assert!(prompt.contains("index.md"));
        assert!(prompt.contains("openapi.yaml"));
        assert!(prompt.contains("raw JSON object"));
    }

    #[test]
    fn script_embeds_directory_and_files() {
        let mut files = ProjectFiles::new();
        files.insert("index.md".to_string(), "# Welcome".to_string());
        let prompt = PromptEngine::new()
            .script("my-docs", &files)
            .expect("render");
        assert!(prompt.contains("\"my-docs\""));
        assert!(prompt.contains("\"index.md\": \"# Welcome\""));
        assert!(prompt.contains("template literals"));
    }

    #[test]
    fn script_with_empty_mapping_renders_empty_object() {
        let prompt = PromptEngine::new()
            .script("docs", &ProjectFiles::new())
            .expect("render");
        assert!(prompt.contains("{}"));
    }

    #[test]
    fn diagnose_includes_error_output() {
        let prompt = PromptEngine::new()
            .diagnose("docs", "  Error: missing openapi.yaml\n")
            .expect("render");
        assert!(prompt.contains("Error: missing openapi.yaml"));
        assert!(prompt.contains("`docs`"));
    }
}
