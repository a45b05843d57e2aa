use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MockResult;
use crate::expectation::{render_command, Expectation, ExpectationId};
use crate::layout::Layout;
use crate::matcher::{Invocation, ResolvedMatch};
use crate::stub::StubRunner;

/// What the simulated tool reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub id: ExpectationId,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    /// Output files that exist on return.
    pub outputs: Vec<PathBuf>,
}

impl Verdict {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Perform the side effects of a matched expectation.
///
/// A delegating expectation takes its stdout and exit code from the stub.
/// Declared outputs are created only when the final exit code is zero;
/// files the stub already wrote are left alone.
pub fn simulate(
    expectation: &Expectation,
    resolved: &ResolvedMatch,
    invocation: &Invocation,
    layout: &Layout,
    runner: &dyn StubRunner,
) -> MockResult<Verdict> {
    let (exit_code, stdout) = match &expectation.stdout {
        Some(script) => {
            let script_path = layout.resolve_script(script);
            debug!(
                expectation = %expectation.id,
                script = %script_path.display(),
                "delegating to stub"
            );
            let output = runner.run(&script_path, &resolved.args, &invocation.cwd)?;
            let exit_code = if output.exit_code != 0 {
                output.exit_code
            } else {
                expectation.exit_code
            };
            (exit_code, output.stdout)
        }
        None => (expectation.exit_code, Vec::new()),
    };

    let mut outputs = Vec::new();
    if exit_code == 0 {
        let marker = output_marker(invocation);
        for path in &resolved.outputs {
            if expectation.stdout.is_none() || !path.exists() {
                write_output(path, &marker)?;
            }
            outputs.push(path.clone());
        }
    }

    Ok(Verdict {
        id: expectation.id,
        exit_code,
        stdout,
        outputs,
    })
}

fn output_marker(invocation: &Invocation) -> String {
    format!(
        "toolset-mock: {}\n",
        render_command(&invocation.program, &invocation.args)
    )
}

/// Parent creation is idempotent so concurrent writers of disjoint paths need no lock.
fn write_output(path: &Path, contents: &str) -> MockResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    debug!(path = %path.display(), "created output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Gate;
    use crate::stub::{runner_from_callback, ProcessStubRunner, StubOutput};
    use crate::token::{output_file, script};

    fn expectation(stdout: Option<&str>, exit_code: i32) -> Expectation {
        Expectation {
            id: ExpectationId(0),
            gate: Gate::always(),
            program: "cc".to_string(),
            pattern: vec![output_file("out/deep/lib.o")],
            stdout: stdout.map(script),
            exit_code,
            consumed: false,
            line: None,
        }
    }

    fn resolved(root: &Path) -> ResolvedMatch {
        ResolvedMatch {
            id: ExpectationId(0),
            args: vec![root.join("out/deep/lib.o").display().to_string()],
            outputs: vec![root.join("out/deep/lib.o")],
        }
    }

    #[test]
    fn creates_outputs_with_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(dir.path());
        let invocation = Invocation::new("cc", ["out/deep/lib.o"], dir.path());
        let verdict = simulate(
            &expectation(None, 0),
            &resolved(dir.path()),
            &invocation,
            &layout,
            &ProcessStubRunner,
        )
        .expect("simulate");
        assert!(verdict.success());
        let contents = fs::read_to_string(dir.path().join("out/deep/lib.o")).expect("output");
        assert_eq!(contents, "toolset-mock: cc out/deep/lib.o\n");
    }

    #[test]
    fn failing_expectation_creates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(dir.path());
        let invocation = Invocation::new("cc", ["out/deep/lib.o"], dir.path());
        let verdict = simulate(
            &expectation(None, 2),
            &resolved(dir.path()),
            &invocation,
            &layout,
            &ProcessStubRunner,
        )
        .expect("simulate");
        assert_eq!(verdict.exit_code, 2);
        assert!(verdict.outputs.is_empty());
        assert!(!dir.path().join("out/deep/lib.o").exists());
    }

    #[test]
    fn stub_output_and_exit_code_are_forwarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(dir.path()).with_script_dir("stubs");
        let invocation = Invocation::new("cc", ["out/deep/lib.o"], dir.path());
        let expected_script = dir.path().join("stubs").join("ar.py");
        let runner = runner_from_callback(move |script, args, _cwd| {
            assert_eq!(script, expected_script.as_path());
            Ok(StubOutput {
                exit_code: if args.is_empty() { 1 } else { 0 },
                stdout: b"/usr/bin/ar\n".to_vec(),
            })
        });
        let verdict = simulate(
            &expectation(Some("ar.py"), 0),
            &resolved(dir.path()),
            &invocation,
            &layout,
            runner.as_ref(),
        )
        .expect("simulate");
        assert_eq!(verdict.exit_code, 0);
        assert_eq!(verdict.stdout, b"/usr/bin/ar\n");
        assert!(dir.path().join("out/deep/lib.o").exists());

        let failing = runner_from_callback(|_, _, _| {
            Ok(StubOutput {
                exit_code: 9,
                stdout: Vec::new(),
            })
        });
        let verdict = simulate(
            &expectation(Some("ar.py"), 0),
            &resolved(dir.path()),
            &invocation,
            &layout,
            failing.as_ref(),
        )
        .expect("simulate");
        assert_eq!(verdict.exit_code, 9);
        assert!(verdict.outputs.is_empty());
    }
}
