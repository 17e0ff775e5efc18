//! Bounded attempt counter for the current pipeline step.

use serde::{Deserialize, Serialize};

use crate::core::types::PipelineStep;

/// When the attempt counter is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryScope {
    /// Cleared after every successful step: the ceiling bounds consecutive failures.
    Consecutive,
    /// Only cleared on pipeline restart: the ceiling bounds failures across the run.
    Run,
}

/// Ceiling and scope for step retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub scope: RetryScope,
}

/// Current step plus the failed-attempt counter.
///
/// The counter never exceeds `policy.max_attempts`.
#[derive(Debug, Clone)]
pub struct StepTracker {
    policy: RetryPolicy,
    step: PipelineStep,
    attempts: u32,
}

impl StepTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            step: PipelineStep::GenerateStructure,
            attempts: 0,
        }
    }

    pub fn step(&self) -> PipelineStep {
        self.step
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn attempts_remain(&self) -> bool {
        self.policy.max_attempts.saturating_sub(self.attempts) > 0
    }

    pub fn record_attempt(&mut self) {
        self.attempts = (self.attempts + 1).min(self.policy.max_attempts);
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Advance to `next` after the current step succeeded.
    pub fn advance(&mut self, next: PipelineStep) {
        self.step = next;
        if self.policy.scope == RetryScope::Consecutive {
            self.reset();
        }
    }

    /// Go back to the first step with a cleared counter.
    pub fn restart(&mut self) {
        self.step = PipelineStep::GenerateStructure;
        self.reset();
    }
}
