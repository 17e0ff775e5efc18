//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between the driver and its steps. They
//! must not depend on external state or I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Relative file path -> file content, as produced by structure generation.
pub type ProjectFiles = BTreeMap<String, String>;

/// Named pipeline step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    GenerateStructure,
    GenerateScript,
    ExecuteScript,
    RunPreview,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 4] = [
        PipelineStep::GenerateStructure,
        PipelineStep::GenerateScript,
        PipelineStep::ExecuteScript,
        PipelineStep::RunPreview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::GenerateStructure => "generate-structure",
            PipelineStep::GenerateScript => "generate-script",
            PipelineStep::ExecuteScript => "execute-script",
            PipelineStep::RunPreview => "run-preview",
        }
    }

    /// Step that follows this one, or `None` after the preview.
    pub fn next(self) -> Option<PipelineStep> {
        match self {
            PipelineStep::GenerateStructure => Some(PipelineStep::GenerateScript),
            PipelineStep::GenerateScript => Some(PipelineStep::ExecuteScript),
            PipelineStep::ExecuteScript => Some(PipelineStep::RunPreview),
            PipelineStep::RunPreview => None,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the preview server is attached to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewMode {
    /// Blocking run with the parent's stdin/stdout/stderr.
    Inherited,
    /// Piped run whose stderr is inspected for success/failure markers.
    Streaming,
}

/// Decision reached while inspecting preview output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewVerdict {
    /// The success marker appeared first.
    Healthy,
    /// The failure marker appeared first; carries everything captured so far.
    Failed { output: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_advance_in_order_and_end_after_preview() {
        let mut walked = vec![PipelineStep::GenerateStructure];
        while let Some(next) = walked.last().and_then(|step| step.next()) {
            walked.push(next);
        }
        assert_eq!(walked, PipelineStep::ALL.to_vec());
    }

    #[test]
    fn step_names_are_kebab_case() {
        let json = serde_json::to_string(&PipelineStep::ExecuteScript).expect("serialize");
        assert_eq!(json, "\"execute-script\"");
        assert_eq!(PipelineStep::RunPreview.to_string(), "run-preview");
    }
}
