use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MockError, MockResult};
use crate::expectation::{render_command, Expectation, ExpectationId};
use crate::layout::Layout;

/// One observed invocation and the expectation it consumed, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub sequence: u64,
    pub program: String,
    pub args: Vec<String>,
    pub matched: Option<ExpectationId>,
    /// Set when the matched expectation's simulation did not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// The persistable part of a ledger; consumption is replayed from the records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub records: Vec<InvocationRecord>,
}

/// Registered expectations plus the append-only invocation log of one run.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    expectations: Vec<Expectation>,
    records: Vec<InvocationRecord>,
}

impl Ledger {
    pub fn new(expectations: Vec<Expectation>) -> Self {
        Self {
            expectations,
            records: Vec::new(),
        }
    }

    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    pub fn records(&self) -> &[InvocationRecord] {
        &self.records
    }

    pub fn get(&self, id: ExpectationId) -> Option<&Expectation> {
        self.expectations.get(id.0)
    }

    /// Unconsumed expectations for `program`, in registration order.
    pub fn candidates(&self, program: &str, layout: &Layout) -> Vec<&Expectation> {
        let key = layout.program_key(program);
        self.expectations
            .iter()
            .filter(|expectation| !expectation.consumed)
            .filter(|expectation| layout.program_key(&expectation.program) == key)
            .collect()
    }

    /// Expectations for `program` that were already consumed.
    pub fn consumed_for(&self, program: &str, layout: &Layout) -> usize {
        let key = layout.program_key(program);
        self.expectations
            .iter()
            .filter(|expectation| expectation.consumed)
            .filter(|expectation| layout.program_key(&expectation.program) == key)
            .count()
    }

    /// Mark `id` consumed. Returns `false` if it already was, leaving the ledger unchanged.
    pub fn consume(&mut self, id: ExpectationId) -> bool {
        match self.expectations.get_mut(id.0) {
            Some(expectation) if !expectation.consumed => {
                expectation.consumed = true;
                true
            }
            _ => false,
        }
    }

    pub fn record(
        &mut self,
        program: &str,
        args: &[String],
        matched: Option<ExpectationId>,
    ) -> &InvocationRecord {
        let sequence = self.records.len() as u64;
        self.records.push(InvocationRecord {
            sequence,
            program: program.to_string(),
            args: args.to_vec(),
            matched,
            failure: None,
        });
        &self.records[self.records.len() - 1]
    }

    /// Note that the invocation at `sequence` matched but could not be simulated.
    pub fn mark_failed(&mut self, sequence: u64, error: impl Into<String>) -> MockResult<()> {
        let record = self
            .records
            .get_mut(sequence as usize)
            .ok_or_else(|| MockError::Ledger(format!("no invocation record {sequence}")))?;
        record.failure = Some(error.into());
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            records: self.records.clone(),
        }
    }

    /// Replace the records with `snapshot` and replay consumption from them.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) -> MockResult<()> {
        for expectation in &mut self.expectations {
            expectation.consumed = false;
        }
        for record in &snapshot.records {
            if let Some(id) = record.matched {
                if !self.consume(id) {
                    return Err(MockError::Ledger(format!(
                        "record {} consumes expectation {id}, which is unknown or already consumed",
                        record.sequence
                    )));
                }
            }
        }
        self.records = snapshot.records;
        Ok(())
    }

    pub fn completion_report(&self) -> CompletionReport {
        let mut issues: Vec<CompletionIssue> = self
            .expectations
            .iter()
            .filter(|expectation| !expectation.consumed)
            .map(|expectation| CompletionIssue::UnconsumedExpectation {
                id: expectation.id,
                command: format!(
                    "{} {}",
                    expectation.program,
                    expectation.rendered_pattern().join(" ")
                ),
                line: expectation.line,
            })
            .collect();
        issues.extend(
            self.records
                .iter()
                .filter(|record| record.matched.is_none())
                .map(|record| CompletionIssue::UnexpectedInvocation {
                    sequence: record.sequence,
                    command: render_command(&record.program, &record.args),
                }),
        );
        issues.extend(self.records.iter().filter_map(|record| {
            record
                .failure
                .as_ref()
                .map(|error| CompletionIssue::FailedSimulation {
                    sequence: record.sequence,
                    command: render_command(&record.program, &record.args),
                    error: error.clone(),
                })
        }));
        CompletionReport { issues }
    }

    /// Pass iff every registered expectation was consumed and every invocation matched.
    pub fn check_complete(&self) -> MockResult<()> {
        let report = self.completion_report();
        if report.is_complete() {
            Ok(())
        } else {
            Err(MockError::Incomplete(report))
        }
    }

    /// JSON view of expectations and records for inspection.
    pub fn to_json(&self) -> MockResult<String> {
        let view = LedgerView {
            expectations: self
                .expectations
                .iter()
                .map(|expectation| ExpectationView {
                    id: expectation.id,
                    gate: expectation.gate.to_string(),
                    program: &expectation.program,
                    pattern: expectation.rendered_pattern(),
                    consumed: expectation.consumed,
                    line: expectation.line,
                })
                .collect(),
            records: &self.records,
        };
        Ok(serde_json::to_string_pretty(&view)?)
    }
}

#[derive(Serialize)]
struct LedgerView<'a> {
    expectations: Vec<ExpectationView<'a>>,
    records: &'a [InvocationRecord],
}

#[derive(Serialize)]
struct ExpectationView<'a> {
    id: ExpectationId,
    gate: String,
    program: &'a str,
    pattern: Vec<String>,
    consumed: bool,
    line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionIssue {
    /// Declared and gate-active, but never invoked.
    UnconsumedExpectation {
        id: ExpectationId,
        command: String,
        line: Option<usize>,
    },
    /// Invoked, but no active expectation matched.
    UnexpectedInvocation { sequence: u64, command: String },
    /// Matched, but its outputs, stub or stdout could not be produced.
    FailedSimulation {
        sequence: u64,
        command: String,
        error: String,
    },
}

impl fmt::Display for CompletionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionIssue::UnconsumedExpectation { id, command, line } => {
                write!(f, "expectation {id} was never invoked: {command}")?;
                if let Some(line) = line {
                    write!(f, " (line {line})")?;
                }
                Ok(())
            }
            CompletionIssue::UnexpectedInvocation { sequence, command } => {
                write!(f, "invocation {sequence} matched no expectation: {command}")
            }
            CompletionIssue::FailedSimulation {
                sequence,
                command,
                error,
            } => {
                write!(f, "invocation {sequence} was not simulated: {command}: {error}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub issues: Vec<CompletionIssue>,
}

impl CompletionReport {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn unconsumed(&self) -> impl Iterator<Item = &CompletionIssue> {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, CompletionIssue::UnconsumedExpectation { .. }))
    }

    pub fn unexpected(&self) -> impl Iterator<Item = &CompletionIssue> {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, CompletionIssue::UnexpectedInvocation { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &CompletionIssue> {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, CompletionIssue::FailedSimulation { .. }))
    }
}

impl fmt::Display for CompletionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return f.write_str("all expectations consumed");
        }
        write!(f, "run incomplete: {} issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {issue}")?;
        }
        Ok(())
    }
}
