//! Preview server launcher.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::markers::MarkerScanner;
use crate::core::types::{PreviewMode, PreviewVerdict};
use crate::io::config::PreviewConfig;
use crate::io::process::{StreamOutcome, run_inherited, stream_stderr};

/// Parameters for a preview launch.
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub workdir: PathBuf,
    /// Project directory passed to the preview command.
    pub directory: String,
    /// Deadline for streaming mode; `None` waits for a marker indefinitely.
    pub probe_timeout: Option<Duration>,
}

/// Abstraction over the preview server.
pub trait Previewer {
    fn launch(&self, request: &PreviewRequest, mode: PreviewMode) -> Result<()>;
}

/// Previewer that spawns an external CLI (e.g. `npx @redocly/cli preview -d <dir>`).
pub struct CliPreviewer {
    command: Vec<String>,
    directory_flag: String,
    success_marker: String,
    failure_marker: String,
}

impl CliPreviewer {
    pub fn from_config(cfg: &PreviewConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            directory_flag: cfg.directory_flag.clone(),
            success_marker: cfg.success_marker.clone(),
            failure_marker: cfg.failure_marker.clone(),
        }
    }

    fn command(&self, request: &PreviewRequest) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("preview command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if !self.directory_flag.is_empty() {
            cmd.arg(&self.directory_flag);
        }
        cmd.arg(&request.directory).current_dir(&request.workdir);
        Ok(cmd)
    }

    fn run_foreground(&self, request: &PreviewRequest) -> Result<()> {
        let outcome =
            run_inherited(self.command(request)?, None).context("run preview server")?;
        if !outcome.success() {
            let code = outcome.status.and_then(|status| status.code());
            warn!(exit_code = ?code, "preview server exited with failure");
            bail!("preview server exited with status {code:?}");
        }
        Ok(())
    }

    fn run_probe(&self, request: &PreviewRequest) -> Result<()> {
        let mut scanner = MarkerScanner::new(&self.success_marker, &self.failure_marker);
        let outcome = stream_stderr(self.command(request)?, request.probe_timeout, |chunk| {
            scanner.feed(chunk)
        })
        .context("probe preview server")?;

        match outcome {
            StreamOutcome::Settled(PreviewVerdict::Healthy) => {
                debug!("preview reported no errors");
                Ok(())
            }
            StreamOutcome::Settled(PreviewVerdict::Failed { output }) => {
                warn!("preview reported a failure");
                Err(anyhow!("preview reported a failure:\n{}", output.trim()))
            }
            StreamOutcome::Exited(status) => Err(anyhow!(
                "preview exited with status {:?} before reporting a result:\n{}",
                status.code(),
                scanner.captured().trim()
            )),
            StreamOutcome::TimedOut => Err(anyhow!(
                "preview did not report a result within {:?}",
                request.probe_timeout.unwrap_or_default()
            )),
        }
    }
}

impl Previewer for CliPreviewer {
    #[instrument(skip_all, fields(directory = %request.directory, mode = ?mode))]
    fn launch(&self, request: &PreviewRequest, mode: PreviewMode) -> Result<()> {
        info!("launching preview server");
        match mode {
            PreviewMode::Inherited => self.run_foreground(request),
            PreviewMode::Streaming => self.run_probe(request),
        }
    }
}

/// Probe the preview in streaming mode, then hand it to the foreground when
/// `handoff` is set.
pub fn launch_preview<P: Previewer>(
    previewer: &P,
    request: &PreviewRequest,
    handoff: bool,
) -> Result<()> {
    previewer.launch(request, PreviewMode::Streaming)?;
    if handoff {
        previewer.launch(request, PreviewMode::Inherited)?;
    }
    Ok(())
}
