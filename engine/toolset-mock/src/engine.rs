use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{MockError, MockResult};
use crate::expectation::{Expectation, ExpectationId};
use crate::fixture::Fixture;
use crate::layout::Layout;
use crate::ledger::{CompletionReport, Ledger, LedgerSnapshot};
use crate::matcher::{self, Invocation};
use crate::property::PropertySet;
use crate::simulator::{self, Verdict};
use crate::stub::{ProcessStubRunner, StubRunner};

/// Matches intercepted invocations against a fixture loaded for one configuration.
///
/// `invoke` may be called from many threads; matching and consumption happen
/// under one lock so no expectation is consumed twice.
pub struct Engine {
    layout: Layout,
    properties: PropertySet,
    runner: Arc<dyn StubRunner + Send + Sync>,
    ledger: Mutex<Ledger>,
}

impl Engine {
    /// Register every declaration whose gate `properties` satisfies, in fixture order.
    pub fn load(fixture: &Fixture, properties: &PropertySet, layout: Layout) -> Self {
        let expectations: Vec<Expectation> = fixture
            .active(properties)
            .enumerate()
            .map(|(idx, declaration)| Expectation::register(ExpectationId(idx), declaration))
            .collect();
        debug!(
            registered = expectations.len(),
            declared = fixture.declarations().len(),
            properties = %properties,
            "fixture loaded"
        );
        Self {
            layout,
            properties: properties.clone(),
            runner: Arc::new(ProcessStubRunner),
            ledger: Mutex::new(Ledger::new(expectations)),
        }
    }

    pub fn with_stub_runner(mut self, runner: Arc<dyn StubRunner + Send + Sync>) -> Self {
        self.runner = runner;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Match, consume, record, then simulate.
    ///
    /// A simulation error is noted on the invocation record so the run cannot pass.
    pub fn invoke(&self, invocation: &Invocation) -> MockResult<Verdict> {
        let (expectation, resolved, sequence) = {
            let mut ledger = self.lock();
            let selection = {
                let candidates = ledger.candidates(&invocation.program, &self.layout);
                if candidates.is_empty() {
                    None
                } else {
                    Some(matcher::select(&candidates, invocation, &self.layout))
                }
            };
            match selection {
                None => {
                    let consumed_candidates =
                        ledger.consumed_for(&invocation.program, &self.layout);
                    ledger.record(&invocation.program, &invocation.args, None);
                    warn!(
                        command = %invocation.command_line(),
                        consumed_candidates,
                        "unexpected invocation"
                    );
                    return Err(MockError::UnexpectedInvocation {
                        program: invocation.program.clone(),
                        args: invocation.args.clone(),
                        consumed_candidates,
                    });
                }
                Some(Err(failure)) => {
                    ledger.record(&invocation.program, &invocation.args, None);
                    warn!(
                        command = %invocation.command_line(),
                        position = failure.position,
                        "invocation mismatch"
                    );
                    return Err(failure.into());
                }
                Some(Ok(resolved)) => {
                    ledger.consume(resolved.id);
                    let sequence = ledger
                        .record(&invocation.program, &invocation.args, Some(resolved.id))
                        .sequence;
                    let expectation = ledger.get(resolved.id).cloned().ok_or_else(|| {
                        MockError::Ledger(format!("matched unknown expectation {}", resolved.id))
                    })?;
                    (expectation, resolved, sequence)
                }
            }
        };
        debug!(
            expectation = %expectation.id,
            command = %invocation.command_line(),
            "invocation matched"
        );
        let outcome = simulator::simulate(
            &expectation,
            &resolved,
            invocation,
            &self.layout,
            self.runner.as_ref(),
        );
        if let Err(err) = &outcome {
            warn!(
                expectation = %expectation.id,
                command = %invocation.command_line(),
                error = %err,
                "simulation failed"
            );
            self.lock().mark_failed(sequence, err.to_string())?;
        }
        outcome
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.lock().snapshot()
    }

    pub fn restore(&self, snapshot: LedgerSnapshot) -> MockResult<()> {
        self.lock().restore(snapshot)
    }

    pub fn completion_report(&self) -> CompletionReport {
        self.lock().completion_report()
    }

    /// End-of-run check: every expectation consumed, no unmatched invocation.
    pub fn finish(&self) -> MockResult<()> {
        self.lock().check_complete()
    }

    /// Read access to the ledger under the engine lock.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.lock())
    }

    // A panic while holding the lock cannot leave a half-consumed entry; keep going.
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
