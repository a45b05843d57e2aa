use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fixture::Declaration;
use crate::property::Gate;
use crate::token::{quote_if_needed, ArgumentToken, ScriptRef};

/// Registration index of an expectation; stable for a given fixture and property set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectationId(pub usize);

impl fmt::Display for ExpectationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A declaration registered against a concrete property set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub id: ExpectationId,
    pub gate: Gate,
    pub program: String,
    pub pattern: Vec<ArgumentToken>,
    pub stdout: Option<ScriptRef>,
    pub exit_code: i32,
    pub consumed: bool,
    /// Fixture line, when loaded from text.
    pub line: Option<usize>,
}

impl Expectation {
    pub(crate) fn register(id: ExpectationId, declaration: &Declaration) -> Self {
        Self {
            id,
            gate: declaration.gate.clone(),
            program: declaration.program.clone(),
            pattern: declaration.pattern.clone(),
            stdout: declaration.stdout.clone(),
            exit_code: declaration.exit_code,
            consumed: false,
            line: declaration.line,
        }
    }

    /// Expected argv slots, one entry per token, in fixture syntax.
    pub fn rendered_pattern(&self) -> Vec<String> {
        self.pattern.iter().map(ToString::to_string).collect()
    }

    pub fn arity(&self) -> usize {
        self.pattern.iter().map(ArgumentToken::width).sum()
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.program)?;
        for token in &self.pattern {
            write!(f, " {token}")?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// Shell-like rendering of an observed command line for diagnostics.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut out = quote_if_needed(program);
    for arg in args {
        out.push(' ');
        out.push_str(&quote_if_needed(arg));
    }
    out
}
