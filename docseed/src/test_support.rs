//! Test-only helpers: scripted trait implementations and a temp workspace.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::PreviewMode;
use crate::io::config::DocseedConfig;
use crate::io::generator::Generator;
use crate::io::preview::{PreviewRequest, Previewer};
use crate::io::script::{ScriptRequest, ScriptRunner};

/// One queued generator reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        ScriptedReply::Fail(message.into())
    }
}

/// Generator that pops queued replies and records every prompt it receives.
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<ScriptedReply>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.replies.borrow_mut().pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted generator has no replies left")),
        }
    }
}

/// Script runner that returns queued outcomes and records the script text it
/// found on disk at each call.
pub struct ScriptedScriptRunner {
    outcomes: RefCell<VecDeque<bool>>,
    scripts: RefCell<Vec<String>>,
}

impl ScriptedScriptRunner {
    pub fn new(outcomes: Vec<bool>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            scripts: RefCell::new(Vec::new()),
        }
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.borrow().clone()
    }
}

impl ScriptRunner for ScriptedScriptRunner {
    fn run(&self, request: &ScriptRequest) -> Result<()> {
        let script = fs::read_to_string(&request.script_path)?;
        self.scripts.borrow_mut().push(script);
        match self.outcomes.borrow_mut().pop_front() {
            Some(true) => Ok(()),
            Some(false) => Err(anyhow!("scripted script failure")),
            None => Err(anyhow!("scripted script runner has no outcomes left")),
        }
    }
}

/// Previewer that returns queued outcomes and records each launch.
pub struct ScriptedPreviewer {
    outcomes: RefCell<VecDeque<Result<(), String>>>,
    launches: RefCell<Vec<(PreviewMode, String)>>,
}

impl ScriptedPreviewer {
    pub fn new(outcomes: Vec<Result<(), String>>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            launches: RefCell::new(Vec::new()),
        }
    }

    pub fn modes(&self) -> Vec<PreviewMode> {
        self.launches.borrow().iter().map(|(mode, _)| *mode).collect()
    }

    pub fn directories(&self) -> Vec<String> {
        self.launches
            .borrow()
            .iter()
            .map(|(_, dir)| dir.clone())
            .collect()
    }
}

impl Previewer for ScriptedPreviewer {
    fn launch(&self, request: &PreviewRequest, mode: PreviewMode) -> Result<()> {
        self.launches
            .borrow_mut()
            .push((mode, request.directory.clone()));
        match self.outcomes.borrow_mut().pop_front() {
            Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted previewer has no outcomes left")),
        }
    }
}

/// Temporary working directory plus a config tuned for tests.
pub struct TestWorkspace {
    temp: tempfile::TempDir,
    pub config: DocseedConfig,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let mut config = DocseedConfig::default();
        config.script.path = "create_docs.sh".to_string();
        config.script.interpreter = vec!["sh".to_string()];
        config.script.timeout_secs = 30;
        config.preview.probe_timeout_secs = 10;
        Ok(Self { temp, config })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn script_path(&self) -> PathBuf {
        self.temp.path().join(&self.config.script.path)
    }
}
