//! `docseed` command-line entry point.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use docseed::exit_codes;
use docseed::io::config::{CONFIG_FILE, api_key_from_env, load_config};
use docseed::io::generator::OpenAiGenerator;
use docseed::io::preview::CliPreviewer;
use docseed::io::script::InterpreterScriptRunner;
use docseed::logging;
use docseed::pipeline::{
    AttemptsExhaustedError, PipelineEvent, PipelineOptions, RestartLimitError, run_pipeline,
};

#[derive(Parser)]
#[command(
    name = "docseed",
    version,
    about = "Generate a documentation project with an AI model and preview it"
)]
struct Cli {
    /// Use an existing project directory and skip structure generation.
    #[arg(short, long, value_name = "PATH")]
    directory: Option<String>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let cfg = load_config(&workdir.join(CONFIG_FILE))?;
    let api_key = api_key_from_env(&cfg.api)?;

    let generator = OpenAiGenerator::new(&cfg.api, api_key)?;
    let script_runner = InterpreterScriptRunner::new(cfg.script.interpreter.clone());
    let previewer = CliPreviewer::from_config(&cfg.preview);

    let outcome = run_pipeline(
        &PipelineOptions {
            workdir: &workdir,
            config: &cfg,
            directory: cli.directory,
        },
        &generator,
        &script_runner,
        &previewer,
        print_event,
    )?;

    println!(
        "done: directory={} script={} restarts={}",
        outcome.directory,
        display_relative(&workdir, &outcome.script_path),
        outcome.restarts
    );
    Ok(())
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::StepStarted { step, attempt } => {
            println!("step: {} attempt={}", step, attempt);
        }
        PipelineEvent::StepSkipped { step } => {
            println!("step: {} skipped (directory given)", step);
        }
        PipelineEvent::StepSucceeded { step } => println!("step: {} ok", step),
        PipelineEvent::StepFailed {
            step,
            attempts,
            max_attempts,
            error,
        } => {
            eprintln!(
                "retry: {} failed ({}/{}): {}",
                step, attempts, max_attempts, error
            );
        }
        PipelineEvent::PreviewFailed { error } => eprintln!("preview: failed: {}", error),
        PipelineEvent::Diagnosis { text } => eprintln!("diagnosis: {}", text),
        PipelineEvent::Restarted {
            restarts,
            max_restarts,
        } => {
            eprintln!(
                "restart: regenerating project ({}/{})",
                restarts, max_restarts
            );
        }
    }
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<AttemptsExhaustedError>().is_some()
        || err.downcast_ref::<RestartLimitError>().is_some()
    {
        return exit_codes::EXHAUSTED;
    }
    exit_codes::INVALID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_without_directory() {
        let cli = Cli::parse_from(["docseed"]);
        assert_eq!(cli.directory, None);
    }

    #[test]
    fn parse_short_and_long_directory() {
        let cli = Cli::parse_from(["docseed", "-d", "api-docs"]);
        assert_eq!(cli.directory.as_deref(), Some("api-docs"));

        let cli = Cli::parse_from(["docseed", "--directory", "site"]);
        assert_eq!(cli.directory.as_deref(), Some("site"));
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["docseed", "--force"]).is_err());
    }

    #[test]
    fn exhaustion_maps_to_exhausted_code() {
        let err: anyhow::Error = AttemptsExhaustedError {
            step: docseed::core::types::PipelineStep::ExecuteScript,
            attempts: 3,
            last_error: "exit 1".to_string(),
        }
        .into();
        assert_eq!(exit_code_for(&err), exit_codes::EXHAUSTED);
        assert_eq!(
            exit_code_for(&anyhow::anyhow!("bad config")),
            exit_codes::INVALID
        );
    }
}
