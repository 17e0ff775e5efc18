//! Four-step pipeline driver for `docseed`.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::tracker::StepTracker;
use crate::core::types::{PipelineStep, ProjectFiles};
use crate::io::config::DocseedConfig;
use crate::io::generator::Generator;
use crate::io::preview::{PreviewRequest, Previewer, launch_preview};
use crate::io::prompt::PromptEngine;
use crate::io::script::{ScriptRequest, ScriptRunner, persist_script, synthesize_script};
use crate::io::structure::generate_structure;

/// Inputs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions<'a> {
    /// Directory the script file is written to and subprocesses run in.
    pub workdir: &'a Path,
    pub config: &'a DocseedConfig,
    /// Existing project directory from `-d`; skips structure generation.
    pub directory: Option<String>,
}

/// Progress notifications emitted while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StepStarted {
        step: PipelineStep,
        attempt: u32,
    },
    /// Structure generation was skipped because the directory was given.
    StepSkipped { step: PipelineStep },
    StepSucceeded { step: PipelineStep },
    /// A retryable step failed; `attempts` already includes this failure.
    StepFailed {
        step: PipelineStep,
        attempts: u32,
        max_attempts: u32,
        error: String,
    },
    PreviewFailed { error: String },
    Diagnosis { text: String },
    Restarted { restarts: u32, max_restarts: u32 },
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub directory: String,
    pub script_path: PathBuf,
    pub restarts: u32,
}

/// A step failed as many times as the retry policy allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptsExhaustedError {
    pub step: PipelineStep,
    pub attempts: u32,
    pub last_error: String,
}

impl fmt::Display for AttemptsExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} failed after {} attempts: {}",
            self.step, self.attempts, self.last_error
        )
    }
}

impl std::error::Error for AttemptsExhaustedError {}

/// The preview kept failing after the allowed number of restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartLimitError {
    pub restarts: u32,
    pub last_error: String,
}

impl fmt::Display for RestartLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "preview still failing after {} pipeline restarts: {}",
            self.restarts, self.last_error
        )
    }
}

impl std::error::Error for RestartLimitError {}

/// Walk generate-structure -> generate-script -> execute-script -> run-preview.
///
/// A failed step is retried in place until the retry policy is exhausted. A
/// failed preview asks the model for a diagnosis and restarts from structure
/// generation, up to `retry.max_restarts` times. Returns once the preview
/// succeeds.
pub fn run_pipeline<G, S, P, F>(
    options: &PipelineOptions<'_>,
    generator: &G,
    script_runner: &S,
    previewer: &P,
    mut on_event: F,
) -> Result<PipelineOutcome>
where
    G: Generator,
    S: ScriptRunner,
    P: Previewer,
    F: FnMut(&PipelineEvent),
{
    let cfg = options.config;
    let prompts = PromptEngine::new();
    let script_path = options.workdir.join(&cfg.script.path);
    let directory = options
        .directory
        .clone()
        .unwrap_or_else(|| cfg.default_directory.clone());
    let mut directory_given = options.directory.is_some();

    let mut tracker = StepTracker::new(cfg.retry_policy());
    let mut files = ProjectFiles::new();
    let mut script = String::new();
    let mut restarts = 0u32;

    loop {
        let step = tracker.step();

        if step == PipelineStep::GenerateStructure && directory_given {
            debug!(%directory, "directory given, skipping structure generation");
            files.clear();
            on_event(&PipelineEvent::StepSkipped { step });
            tracker.advance(PipelineStep::GenerateScript);
            continue;
        }

        let attempt = tracker.attempts() + 1;
        info!(%step, attempt, "starting step");
        on_event(&PipelineEvent::StepStarted { step, attempt });

        let result = match step {
            PipelineStep::GenerateStructure => {
                generate_structure(generator, &prompts).map(|generated| files = generated)
            }
            PipelineStep::GenerateScript => {
                synthesize_script(generator, &prompts, &directory, &files)
                    .map(|generated| script = generated)
            }
            PipelineStep::ExecuteScript => {
                persist_script(&script_path, &script).and_then(|_| {
                    script_runner.run(&ScriptRequest {
                        workdir: options.workdir.to_path_buf(),
                        script_path: script_path.clone(),
                        timeout: cfg.script.timeout(),
                    })
                })
            }
            PipelineStep::RunPreview => launch_preview(
                previewer,
                &PreviewRequest {
                    workdir: options.workdir.to_path_buf(),
                    directory: directory.clone(),
                    probe_timeout: cfg.preview.probe_timeout(),
                },
                cfg.preview.handoff,
            ),
        };

        let err = match result {
            Ok(()) => {
                on_event(&PipelineEvent::StepSucceeded { step });
                match step.next() {
                    Some(next) => {
                        tracker.advance(next);
                        continue;
                    }
                    None => {
                        info!(%directory, restarts, "pipeline complete");
                        return Ok(PipelineOutcome {
                            directory,
                            script_path,
                            restarts,
                        });
                    }
                }
            }
            Err(err) => format!("{err:#}"),
        };

        if step == PipelineStep::RunPreview {
            warn!(restarts, "preview failed");
            on_event(&PipelineEvent::PreviewFailed { error: err.clone() });
            request_diagnosis(generator, &prompts, &directory, &err, &mut on_event);

            if restarts >= cfg.retry.max_restarts {
                return Err(RestartLimitError {
                    restarts,
                    last_error: err,
                }
                .into());
            }
            restarts += 1;
            on_event(&PipelineEvent::Restarted {
                restarts,
                max_restarts: cfg.retry.max_restarts,
            });
            directory_given = false;
            files.clear();
            script.clear();
            tracker.restart();
            continue;
        }

        tracker.record_attempt();
        warn!(%step, attempts = tracker.attempts(), error = %err, "step failed");
        on_event(&PipelineEvent::StepFailed {
            step,
            attempts: tracker.attempts(),
            max_attempts: tracker.max_attempts(),
            error: err.clone(),
        });
        if !tracker.attempts_remain() {
            return Err(AttemptsExhaustedError {
                step,
                attempts: tracker.attempts(),
                last_error: err,
            }
            .into());
        }
    }
}

/// Ask the model why the preview failed. The answer is only shown, and a
/// failing request is logged and otherwise ignored.
fn request_diagnosis<G: Generator, F: FnMut(&PipelineEvent)>(
    generator: &G,
    prompts: &PromptEngine,
    directory: &str,
    error: &str,
    on_event: &mut F,
) {
    let diagnosis = prompts
        .diagnose(directory, error)
        .and_then(|prompt| generator.generate(&prompt));
    match diagnosis {
        Ok(text) => on_event(&PipelineEvent::Diagnosis {
            text: text.trim().to_string(),
        }),
        Err(err) => warn!(err = %format!("{err:#}"), "diagnosis request failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracker::RetryScope;
    use crate::core::types::PreviewMode;
    use crate::test_support::{
        ScriptedGenerator, ScriptedPreviewer, ScriptedReply, ScriptedScriptRunner, TestWorkspace,
    };

    const STRUCTURE: &str =
        "```json\n{\"index.md\": \"# Docs\", \"openapi.yaml\": \"openapi: 3.0.0\"}\n```";

    fn collect<'a>(events: &'a mut Vec<PipelineEvent>) -> impl FnMut(&PipelineEvent) + 'a {
        move |event| events.push(event.clone())
    }

    #[test]
    fn retries_failed_step_then_advances() {
        let ws = TestWorkspace::new().expect("workspace");
        let generator = ScriptedGenerator::new(vec![
            ScriptedReply::text("not json"),
            ScriptedReply::text(STRUCTURE),
            ScriptedReply::text("echo ok"),
        ]);
        let runner = ScriptedScriptRunner::new(vec![true]);
        let previewer = ScriptedPreviewer::new(vec![Ok(()), Ok(())]);
        let mut events = Vec::new();

        let outcome = run_pipeline(
            &PipelineOptions {
                workdir: ws.path(),
                config: &ws.config,
                directory: None,
            },
            &generator,
            &runner,
            &previewer,
            collect(&mut events),
        )
        .expect("pipeline");

        assert_eq!(outcome.restarts, 0);
        assert_eq!(outcome.directory, "docs");
        assert!(events.contains(&PipelineEvent::StepStarted {
            step: PipelineStep::GenerateStructure,
            attempt: 2,
        }));
        assert!(events.iter().any(|event| matches!(
            event,
            PipelineEvent::StepFailed {
                step: PipelineStep::GenerateStructure,
                attempts: 1,
                max_attempts: 3,
                ..
            }
        )));
        assert!(events.contains(&PipelineEvent::StepStarted {
            step: PipelineStep::GenerateScript,
            attempt: 1,
        }));
    }

    #[test]
    fn exhausted_step_stops_at_ceiling() {
        let mut ws = TestWorkspace::new().expect("workspace");
        ws.config.retry.max_attempts = 2;
        let generator = ScriptedGenerator::new(vec![
            ScriptedReply::fail("timeout"),
            ScriptedReply::fail("timeout again"),
            ScriptedReply::text(STRUCTURE),
        ]);
        let runner = ScriptedScriptRunner::new(Vec::new());
        let previewer = ScriptedPreviewer::new(Vec::new());
        let mut events = Vec::new();

        let err = run_pipeline(
            &PipelineOptions {
                workdir: ws.path(),
                config: &ws.config,
                directory: None,
            },
            &generator,
            &runner,
            &previewer,
            collect(&mut events),
        )
        .unwrap_err();

        let exhausted = err
            .downcast_ref::<AttemptsExhaustedError>()
            .expect("exhausted error");
        assert_eq!(exhausted.step, PipelineStep::GenerateStructure);
        assert_eq!(exhausted.attempts, 2);
        assert!(exhausted.last_error.contains("timeout again"));
        assert_eq!(generator.prompts().len(), 2);
        assert_eq!(generator.remaining(), 1);
        for event in &events {
            if let PipelineEvent::StepFailed {
                attempts,
                max_attempts,
                ..
            } = event
            {
                assert!(attempts <= max_attempts);
            }
        }
    }

    #[test]
    fn run_scope_counts_failures_across_steps() {
        let mut ws = TestWorkspace::new().expect("workspace");
        ws.config.retry.max_attempts = 2;
        ws.config.retry.scope = RetryScope::Run;
        let generator = ScriptedGenerator::new(vec![
            ScriptedReply::fail("flaky"),
            ScriptedReply::text(STRUCTURE),
            ScriptedReply::fail("flaky again"),
        ]);
        let runner = ScriptedScriptRunner::new(Vec::new());
        let previewer = ScriptedPreviewer::new(Vec::new());

        let err = run_pipeline(
            &PipelineOptions {
                workdir: ws.path(),
                config: &ws.config,
                directory: None,
            },
            &generator,
            &runner,
            &previewer,
            |_| {},
        )
        .unwrap_err();

        let exhausted = err
            .downcast_ref::<AttemptsExhaustedError>()
            .expect("exhausted error");
        assert_eq!(exhausted.step, PipelineStep::GenerateScript);
        assert_eq!(exhausted.attempts, 2);
    }

    #[test]
    fn failed_script_is_rerun_without_new_synthesis() {
        let ws = TestWorkspace::new().expect("workspace");
        let generator = ScriptedGenerator::new(vec![
            ScriptedReply::text(STRUCTURE),
            ScriptedReply::text("echo `hi`"),
        ]);
        let runner = ScriptedScriptRunner::new(vec![false, true]);
        let previewer = ScriptedPreviewer::new(vec![Ok(()), Ok(())]);

        run_pipeline(
            &PipelineOptions {
                workdir: ws.path(),
                config: &ws.config,
                directory: None,
            },
            &generator,
            &runner,
            &previewer,
            |_| {},
        )
        .expect("pipeline");

        assert_eq!(generator.prompts().len(), 2);
        assert_eq!(runner.scripts(), vec!["echo \"hi\"\n", "echo \"hi\"\n"]);
    }

    #[test]
    fn preview_failure_diagnoses_and_restarts_from_structure() {
        let ws = TestWorkspace::new().expect("workspace");
        let generator = ScriptedGenerator::new(vec![
            ScriptedReply::text("echo first"),
            ScriptedReply::text("The openapi.yaml file is missing a paths section."),
            ScriptedReply::text(STRUCTURE),
            ScriptedReply::text("echo second"),
        ]);
        let runner = ScriptedScriptRunner::new(vec![true, true]);
        let previewer = ScriptedPreviewer::new(vec![
            Err("Error: invalid openapi.yaml".to_string()),
            Ok(()),
            Ok(()),
        ]);
        let mut events = Vec::new();

        let outcome = run_pipeline(
            &PipelineOptions {
                workdir: ws.path(),
                config: &ws.config,
                directory: Some("existing".to_string()),
            },
            &generator,
            &runner,
            &previewer,
            collect(&mut events),
        )
        .expect("pipeline");

        assert_eq!(outcome.restarts, 1);
        assert_eq!(outcome.directory, "existing");
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[1].contains("Error: invalid openapi.yaml"));
        assert!(prompts[2].contains("raw JSON object"));
        assert!(events.contains(&PipelineEvent::Diagnosis {
            text: "The openapi.yaml file is missing a paths section.".to_string(),
        }));
        assert!(events.contains(&PipelineEvent::Restarted {
            restarts: 1,
            max_restarts: 3,
        }));
        assert_eq!(
            previewer.modes(),
            vec![
                PreviewMode::Streaming,
                PreviewMode::Streaming,
                PreviewMode::Inherited
            ]
        );
    }

    #[test]
    fn restart_limit_stops_the_run() {
        let mut ws = TestWorkspace::new().expect("workspace");
        ws.config.retry.max_restarts = 0;
        let generator = ScriptedGenerator::new(vec![
            ScriptedReply::text(STRUCTURE),
            ScriptedReply::text("echo ok"),
            ScriptedReply::fail("diagnosis unavailable"),
        ]);
        let runner = ScriptedScriptRunner::new(vec![true]);
        let previewer = ScriptedPreviewer::new(vec![Err("Error: boom".to_string())]);

        let err = run_pipeline(
            &PipelineOptions {
                workdir: ws.path(),
                config: &ws.config,
                directory: None,
            },
            &generator,
            &runner,
            &previewer,
            |_| {},
        )
        .unwrap_err();

        let limit = err
            .downcast_ref::<RestartLimitError>()
            .expect("restart limit error");
        assert_eq!(limit.restarts, 0);
        assert!(limit.last_error.contains("boom"));
        assert_eq!(generator.prompts().len(), 3);
    }
}
