use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::thread;

use toolset_mock::{Engine, ExpectationId, Fixture, Invocation, Layout, MockError, PropertySet};

const COPIES: usize = 16;

#[test]
fn concurrent_invocations_never_share_an_expectation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut text = String::new();
    for _ in 0..COPIES {
        writeln!(text, "command cc --version").expect("write fixture");
    }
    let fixture = Fixture::parse(&text).expect("fixture");
    let engine = Engine::load(&fixture, &PropertySet::new(), Layout::new(dir.path()));

    let results: Vec<Result<ExpectationId, MockError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..COPIES * 2)
            .map(|_| {
                scope.spawn(|| {
                    engine
                        .invoke(&Invocation::new("cc", ["--version"], dir.path()))
                        .map(|verdict| verdict.id)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect()
    });

    let consumed: Vec<ExpectationId> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    let distinct: BTreeSet<ExpectationId> = consumed.iter().copied().collect();
    assert_eq!(consumed.len(), COPIES);
    assert_eq!(distinct.len(), COPIES);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|err| matches!(err, MockError::UnexpectedInvocation { .. })));

    let report = engine.completion_report();
    assert_eq!(report.unconsumed().count(), 0);
    assert_eq!(report.unexpected().count(), COPIES);
}

#[test]
fn disjoint_outputs_are_created_concurrently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut text = String::new();
    for idx in 0..COPIES {
        writeln!(text, "command cc -c -o output(obj/nested/{idx}.o)").expect("write fixture");
    }
    let fixture = Fixture::parse(&text).expect("fixture");
    let engine = Engine::load(&fixture, &PropertySet::new(), Layout::new(dir.path()));

    thread::scope(|scope| {
        for idx in 0..COPIES {
            let engine = &engine;
            let root = dir.path();
            scope.spawn(move || {
                let target = format!("obj/nested/{idx}.o");
                engine
                    .invoke(&Invocation::new("cc", ["-c", "-o", target.as_str()], root))
                    .expect("match");
            });
        }
    });

    for idx in 0..COPIES {
        assert!(dir.path().join(format!("obj/nested/{idx}.o")).exists());
    }
    engine.finish().expect("complete");
}
