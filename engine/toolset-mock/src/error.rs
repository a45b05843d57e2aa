use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::CompletionReport;
use crate::matcher::MatchFailure;

/// Result alias used across the crate.
pub type MockResult<T> = Result<T, MockError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorCode {
    Parse,
    UndeclaredInput,
    UndeclaredScript,
    InvalidProperty,
    EmptyGroup,
    EmptyProgram,
    InvalidExitCode,
}

impl LoadErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadErrorCode::Parse => "E_PARSE",
            LoadErrorCode::UndeclaredInput => "E_UNDECLARED_INPUT",
            LoadErrorCode::UndeclaredScript => "E_UNDECLARED_SCRIPT",
            LoadErrorCode::InvalidProperty => "E_INVALID_PROPERTY",
            LoadErrorCode::EmptyGroup => "E_EMPTY_GROUP",
            LoadErrorCode::EmptyProgram => "E_EMPTY_PROGRAM",
            LoadErrorCode::InvalidExitCode => "E_INVALID_EXIT_CODE",
        }
    }
}

/// A malformed fixture. Raised before any invocation is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub code: LoadErrorCode,
    pub message: String,
    pub line: Option<usize>,
}

impl LoadError {
    pub fn new(code: LoadErrorCode, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            code,
            message: message.into(),
            line,
        }
    }

    /// Attach a line number unless one is already known.
    pub fn at_line(mut self, line: Option<usize>) -> Self {
        if self.line.is_none() {
            self.line = line;
        }
        self
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "{}: {} at line {}",
                self.code.as_str(),
                self.message,
                line
            ),
            None => write!(f, "{}: {}", self.code.as_str(), self.message),
        }
    }
}

impl std::error::Error for LoadError {}

/// Error variants surfaced by the engine.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("fixture load failed: {0}")]
    Load(#[from] LoadError),
    #[error("{0}")]
    Match(Box<MatchFailure>),
    #[error(
        "unexpected invocation `{}`: {}",
        crate::expectation::render_command(.program, .args),
        unexpected_reason(.consumed_candidates)
    )]
    UnexpectedInvocation {
        program: String,
        args: Vec<String>,
        consumed_candidates: usize,
    },
    #[error("{0}")]
    Incomplete(CompletionReport),
    #[error("stub {} could not be run: {source}", .script.display())]
    Stub {
        script: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger inconsistent: {0}")]
    Ledger(String),
    #[error("state file {}: {message}", .path.display())]
    State { path: PathBuf, message: String },
    #[error("fixture {} changed since init (expected sha256 {expected}, found {actual})", .fixture.display())]
    FixtureDrift {
        fixture: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MatchFailure> for MockError {
    fn from(failure: MatchFailure) -> Self {
        MockError::Match(Box::new(failure))
    }
}

fn unexpected_reason(consumed_candidates: &usize) -> String {
    match *consumed_candidates {
        0 => "no active expectation for this program".to_string(),
        1 => "the only matching expectation was already consumed".to_string(),
        n => format!("all {n} expectations for this program were already consumed"),
    }
}
