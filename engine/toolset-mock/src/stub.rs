use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::error::{MockError, MockResult};

/// Captured result of running a stub script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StubOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
}

/// Runs the stub an expectation delegates to.
pub trait StubRunner {
    fn run(&self, script: &Path, args: &[String], cwd: &Path) -> MockResult<StubOutput>;
}

/// Spawns the script as a child process. Its stderr is inherited.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessStubRunner;

impl StubRunner for ProcessStubRunner {
    fn run(&self, script: &Path, args: &[String], cwd: &Path) -> MockResult<StubOutput> {
        let output = Command::new(script)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| MockError::Stub {
                script: script.to_path_buf(),
                source,
            })?;
        Ok(StubOutput {
            // Killed by a signal: report a generic failure.
            exit_code: output.status.code().unwrap_or(1),
            stdout: output.stdout,
        })
    }
}

pub type StubCallback = dyn Fn(&Path, &[String], &Path) -> MockResult<StubOutput> + Send + Sync + 'static;

#[derive(Clone)]
pub struct CallbackStubRunner {
    callback: Arc<StubCallback>,
}

impl CallbackStubRunner {
    pub fn new(callback: Arc<StubCallback>) -> Self {
        Self { callback }
    }
}

impl StubRunner for CallbackStubRunner {
    fn run(&self, script: &Path, args: &[String], cwd: &Path) -> MockResult<StubOutput> {
        (self.callback)(script, args, cwd)
    }
}

pub fn runner_from_callback<F>(callback: F) -> Arc<dyn StubRunner + Send + Sync>
where
    F: Fn(&Path, &[String], &Path) -> MockResult<StubOutput> + Send + Sync + 'static,
{
    Arc::new(CallbackStubRunner::new(Arc::new(callback)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn process_runner_forwards_stdout_and_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("stub.sh");
        fs::write(&script, "#!/bin/sh\necho \"stub:$1\"\nexit 4\n").expect("write stub");
        let mut perms = fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).expect("chmod");

        let output = ProcessStubRunner
            .run(&script, &["hello".to_string()], dir.path())
            .expect("run stub");
        assert_eq!(output.exit_code, 4);
        assert_eq!(output.stdout, b"stub:hello\n");
    }

    #[test]
    fn missing_script_is_a_stub_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ProcessStubRunner
            .run(&dir.path().join("absent.sh"), &[], dir.path())
            .expect_err("missing");
        assert!(matches!(err, MockError::Stub { .. }));
    }
}
