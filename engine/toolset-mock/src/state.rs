//! On-disk run state shared by every shim process of one test run.
//!
//! `state.json` holds the run configuration and the invocation log;
//! `state.lock` is held exclusively from load to write-back so that
//! match-then-consume stays atomic across processes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::engine::Engine;
use crate::error::{MockError, MockResult};
use crate::fixture::Fixture;
use crate::layout::Layout;
use crate::ledger::LedgerSnapshot;
use crate::property::PropertySet;

pub const STATE_ENV: &str = "TOOLSET_MOCK_STATE";
pub const STATE_FILE: &str = "state.json";
pub const LOCK_FILE: &str = "state.lock";
const STATE_VERSION: u32 = 1;

/// Everything needed to rebuild the engine in a fresh process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub fixture: PathBuf,
    /// Hex sha256 of the fixture text at init time.
    pub fixture_digest: String,
    pub properties: PropertySet,
    pub layout: Layout,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    config: RunConfig,
    ledger: LedgerSnapshot,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store named by `TOOLSET_MOCK_STATE`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(STATE_ENV)
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Validate the fixture and start a new run with an empty ledger.
    pub fn init(
        &self,
        fixture: impl AsRef<Path>,
        properties: PropertySet,
        layout: Layout,
    ) -> MockResult<RunConfig> {
        fs::create_dir_all(&self.dir)?;
        let fixture = fs::canonicalize(fixture.as_ref())?;
        let contents = fs::read_to_string(&fixture)?;
        let parsed = Fixture::parse(&contents)?;
        let config = RunConfig {
            fixture_digest: digest(&contents),
            fixture,
            properties,
            layout,
        };
        let engine = Engine::load(&parsed, &config.properties, config.layout.clone());

        let _lock = self.lock()?;
        self.write(&StateFile {
            version: STATE_VERSION,
            config: config.clone(),
            ledger: engine.snapshot(),
        })?;
        debug!(
            state = %self.state_path().display(),
            registered = engine.with_ledger(|ledger| ledger.expectations().len()),
            "run initialised"
        );
        Ok(config)
    }

    /// Lock the store and rebuild the engine from the saved state.
    ///
    /// The lock is held until the returned session is dropped.
    pub fn open(&self) -> MockResult<Session> {
        let lock = self.lock()?;
        let state = self.read()?;
        let contents = fs::read_to_string(&state.config.fixture)?;
        let actual = digest(&contents);
        if actual != state.config.fixture_digest {
            return Err(MockError::FixtureDrift {
                fixture: state.config.fixture.clone(),
                expected: state.config.fixture_digest.clone(),
                actual,
            });
        }
        let fixture = Fixture::parse(&contents)?;
        let engine = Engine::load(
            &fixture,
            &state.config.properties,
            state.config.layout.clone(),
        );
        engine.restore(state.ledger)?;
        Ok(Session {
            store: self.clone(),
            config: state.config,
            fixture,
            engine,
            _lock: lock,
        })
    }

    fn lock(&self) -> MockResult<LockedFile> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&file)?;
        Ok(LockedFile { file })
    }

    fn read(&self) -> MockResult<StateFile> {
        let path = self.state_path();
        let bytes = fs::read(&path).map_err(|err| MockError::State {
            path: path.clone(),
            message: format!("{err}; run `toolset-mock init` first"),
        })?;
        let state: StateFile =
            serde_json::from_slice(&bytes).map_err(|err| MockError::State {
                path: path.clone(),
                message: err.to_string(),
            })?;
        if state.version != STATE_VERSION {
            return Err(MockError::State {
                path,
                message: format!(
                    "unsupported version {} (expected {STATE_VERSION})",
                    state.version
                ),
            });
        }
        Ok(state)
    }

    // Readers never observe a half-written file.
    fn write(&self, state: &StateFile) -> MockResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.state_path()).map_err(|err| err.error)?;
        Ok(())
    }
}

/// A locked, loaded run. Changes reach disk only through [`Session::commit`].
pub struct Session {
    store: StateStore,
    config: RunConfig,
    fixture: Fixture,
    engine: Engine,
    _lock: LockedFile,
}

impl Session {
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn with_stub_runner(
        mut self,
        runner: std::sync::Arc<dyn crate::stub::StubRunner + Send + Sync>,
    ) -> Self {
        self.engine = self.engine.with_stub_runner(runner);
        self
    }

    /// Write the ledger back and release the lock.
    pub fn commit(self) -> MockResult<()> {
        self.store.write(&StateFile {
            version: STATE_VERSION,
            config: self.config.clone(),
            ledger: self.engine.snapshot(),
        })
    }
}

/// Exclusive lock on `state.lock`. Unlocks on drop.
struct LockedFile {
    file: File,
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn digest(contents: &str) -> String {
    hex::encode(Sha256::digest(contents.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_hex() {
        assert_eq!(
            digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn open_without_init_names_the_state_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = StateStore::new(dir.path()).open().err().expect("missing state");
        let text = err.to_string();
        assert!(text.contains(STATE_FILE), "{text}");
        assert!(text.contains("toolset-mock init"), "{text}");
    }
}
