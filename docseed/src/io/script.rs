//! Script synthesis, persistence and execution.
//!
//! The generated script runs with the full privileges of this process. It is
//! neither sandboxed nor inspected beyond the backtick cleanup in
//! [`sanitize_script`].

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::fences::sanitize_script;
use crate::core::types::ProjectFiles;
use crate::io::generator::Generator;
use crate::io::process::run_inherited;
use crate::io::prompt::PromptEngine;

/// Ask the model for a script that writes `files` under `directory`.
#[instrument(skip_all, fields(directory = %directory, files = files.len()))]
pub fn synthesize_script<G: Generator>(
    generator: &G,
    prompts: &PromptEngine,
    directory: &str,
    files: &ProjectFiles,
) -> Result<String> {
    let prompt = prompts.script(directory, files)?;
    let script = generator
        .generate(&prompt)
        .context("request file-creation script")?;
    debug!(script_bytes = script.len(), "script received");
    Ok(script)
}

/// Sanitize `script` and write it to `path`, replacing any previous file.
///
/// Returns the sanitized text that was written.
pub fn persist_script(path: &Path, script: &str) -> Result<String> {
    let clean = sanitize_script(script);
    if clean.is_empty() {
        return Err(anyhow!("generated script is empty after sanitizing"));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create script dir {}", parent.display()))?;
    }
    let mut contents = clean.clone();
    contents.push('\n');
    fs::write(path, contents).with_context(|| format!("write script {}", path.display()))?;
    mark_executable(path)?;
    debug!(path = %path.display(), "script persisted");
    Ok(clean)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Parameters for a script run.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    /// Working directory for the interpreter; relative paths in the script
    /// resolve against it.
    pub workdir: PathBuf,
    pub script_path: PathBuf,
    pub timeout: Duration,
}

/// Abstraction over script execution.
pub trait ScriptRunner {
    /// Run the persisted script. Errors when it does not exit successfully.
    fn run(&self, request: &ScriptRequest) -> Result<()>;
}

/// Runs the script through an interpreter command such as `node`.
pub struct InterpreterScriptRunner {
    interpreter: Vec<String>,
}

impl InterpreterScriptRunner {
    pub fn new(interpreter: Vec<String>) -> Self {
        Self { interpreter }
    }
}

impl ScriptRunner for InterpreterScriptRunner {
    #[instrument(skip_all, fields(script = %request.script_path.display(), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &ScriptRequest) -> Result<()> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| anyhow!("script interpreter is empty"))?;
        info!(interpreter = %program, "executing generated script");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&request.script_path)
            .current_dir(&request.workdir);

        let outcome = run_inherited(cmd, Some(request.timeout)).context("run generated script")?;
        if outcome.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "generated script timed out"
            );
            return Err(anyhow!(
                "generated script timed out after {:?}",
                request.timeout
            ));
        }
        if !outcome.success() {
            let code = outcome.status.and_then(|status| status.code());
            warn!(exit_code = ?code, "generated script failed");
            return Err(anyhow!("generated script failed with status {code:?}"));
        }
        debug!("generated script completed successfully");
        Ok(())
    }
}
