//! Step error types

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Output fragments that indicate a failure worth retrying
static TRANSIENT_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)timed out|timeout|connection (reset|refused|closed)|broken pipe|tls handshake|\b(429|500|502|503|504)\b|too many requests|temporarily unavailable|service unavailable|\bunavailable\b|deadline exceeded|try again",
    )
    .expect("transient pattern is valid")
});

/// A single provider step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Build,
    Tag,
    Push,
    Deploy,
    Rollback,
}

impl Step {
    /// The forward pipeline run for every service
    pub const PIPELINE: [Step; 4] = [Step::Build, Step::Tag, Step::Push, Step::Deploy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Build => "build",
            Step::Tag => "tag",
            Step::Push => "push",
            Step::Deploy => "deploy",
            Step::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a failure is likely to succeed on retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Failure of one provider step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{step} failed: {message}")]
pub struct StepError {
    pub step: Step,
    pub kind: FailureKind,
    pub message: String,
    /// Captured diagnostic output (stderr, then stdout)
    pub output: String,
}

impl StepError {
    pub fn transient(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            kind: FailureKind::Transient,
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn permanent(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            kind: FailureKind::Permanent,
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// Classify a failed command by its diagnostic output
pub fn classify_failure(output: &str) -> FailureKind {
    if TRANSIENT_PATTERNS.is_match(output) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

pub type Result<T> = std::result::Result<T, StepError>;
