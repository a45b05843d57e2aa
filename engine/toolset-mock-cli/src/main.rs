use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use thiserror::Error;
use toolset_mock::layout::resolve;
use toolset_mock::{
    program_name, Invocation, Layout, LoadError, MockError, PropertySet, StateStore,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod shim_install;

const SELF_NAME: &str = "toolset-mock";
const LOG_ENV: &str = "TOOLSET_MOCK_LOG";

#[derive(Parser, Debug)]
#[command(name = "toolset-mock", version, about = "Toolchain invocation mock")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a fixture and start a new run
    Init {
        /// Fixture file
        #[arg(long)]
        fixture: PathBuf,
        /// Directory holding the run state
        #[arg(long, env = "TOOLSET_MOCK_STATE")]
        state_dir: PathBuf,
        /// Build property of this configuration, e.g. variant=debug
        #[arg(long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
        /// Build tree that output and input paths resolve against
        #[arg(long)]
        root: Option<PathBuf>,
        /// Directory for input(source=...) files; defaults to the root
        #[arg(long)]
        source_dir: Option<PathBuf>,
        /// Directory for stub scripts; defaults to the root
        #[arg(long)]
        script_dir: Option<PathBuf>,
        /// Compare paths without regard to case; defaults to the host convention
        #[arg(long, value_name = "BOOL")]
        case_insensitive: Option<bool>,
    },
    /// Create one shim per declared program
    Install {
        #[arg(long, env = "TOOLSET_MOCK_STATE")]
        state_dir: PathBuf,
        /// Directory to place the shims in
        #[arg(long)]
        bin_dir: PathBuf,
    },
    /// Process one invocation
    Exec {
        #[arg(long, env = "TOOLSET_MOCK_STATE")]
        state_dir: PathBuf,
        /// Program followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Check that every expectation was consumed and nothing unexpected ran
    Verify {
        #[arg(long, env = "TOOLSET_MOCK_STATE")]
        state_dir: PathBuf,
    },
    /// Print the ledger as JSON
    Ledger {
        #[arg(long, env = "TOOLSET_MOCK_STATE")]
        state_dir: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Mock(#[from] MockError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Shim(#[from] shim_install::ShimError),
    #[error("TOOLSET_MOCK_STATE is not set; cannot run as `{0}`")]
    MissingState(String),
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            if let CliError::Mock(MockError::Match(failure)) = &err {
                eprint!("{}", failure.diff());
            }
            std::process::exit(1);
        }
    }
}

// Logs go to stderr; stdout belongs to the simulated tool.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32, CliError> {
    let mut args = std::env::args_os();
    let argv0 = args.next().unwrap_or_else(|| OsString::from(SELF_NAME));
    let invoked_as = program_name(&argv0.to_string_lossy());
    if !invoked_as.eq_ignore_ascii_case(SELF_NAME) {
        let store =
            StateStore::from_env().ok_or_else(|| CliError::MissingState(invoked_as.clone()))?;
        let args = args.map(|arg| arg.to_string_lossy().into_owned()).collect();
        debug!(program = %invoked_as, state = %store.dir().display(), "running as shim");
        return cmd_exec(&store, invoked_as, args);
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Init {
            fixture,
            state_dir,
            properties,
            root,
            source_dir,
            script_dir,
            case_insensitive,
        } => {
            let cwd = std::env::current_dir()?;
            let root = physical(resolve(&cwd, root.as_deref().unwrap_or(cwd.as_path())));
            let mut layout = Layout::new(root);
            if let Some(dir) = source_dir {
                layout = layout.with_source_dir(physical(resolve(&cwd, &dir)));
            }
            if let Some(dir) = script_dir {
                layout = layout.with_script_dir(physical(resolve(&cwd, &dir)));
            }
            if let Some(flag) = case_insensitive {
                layout = layout.with_case_insensitive(flag);
            }
            cmd_init(&StateStore::new(state_dir), &fixture, &properties, layout)
        }
        Commands::Install { state_dir, bin_dir } => {
            cmd_install(&StateStore::new(state_dir), &bin_dir)
        }
        Commands::Exec { state_dir, command } => {
            let mut command = command.into_iter();
            let program = command.next().unwrap_or_default();
            cmd_exec(&StateStore::new(state_dir), program, command.collect())
        }
        Commands::Verify { state_dir } => cmd_verify(&StateStore::new(state_dir)),
        Commands::Ledger { state_dir } => cmd_ledger(&StateStore::new(state_dir)),
    }
}

/// Shims see the working directory with symlinks resolved, so the layout must too.
fn physical(path: PathBuf) -> PathBuf {
    if cfg!(windows) {
        return path;
    }
    std::fs::canonicalize(&path).unwrap_or(path)
}

fn cmd_init(
    store: &StateStore,
    fixture: &Path,
    properties: &[String],
    layout: Layout,
) -> Result<i32, CliError> {
    let properties = PropertySet::parse(properties)?;
    let config = store.init(fixture, properties, layout)?;
    let session = store.open()?;
    let registered = session
        .engine()
        .with_ledger(|ledger| ledger.expectations().len());
    println!(
        "registered {registered} of {} expectations for {}",
        session.fixture().declarations().len(),
        config.properties
    );
    Ok(0)
}

fn cmd_install(store: &StateStore, bin_dir: &Path) -> Result<i32, CliError> {
    let exe = std::env::current_exe()?;
    let session = store.open()?;
    let programs: Vec<String> = session
        .fixture()
        .programs()
        .into_iter()
        .map(str::to_string)
        .collect();
    drop(session);
    for path in shim_install::install_shims(&exe, bin_dir, &programs)? {
        println!("{}", path.display());
    }
    Ok(0)
}

/// One intercepted launch. The outcome is committed even when matching fails.
fn cmd_exec(store: &StateStore, program: String, args: Vec<String>) -> Result<i32, CliError> {
    let cwd = std::env::current_dir()?;
    let session = store.open()?;
    let result = session.engine().invoke(&Invocation::new(program, args, cwd));
    session.commit()?;
    let verdict = result?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&verdict.stdout)?;
    stdout.flush()?;
    Ok(verdict.exit_code)
}

fn cmd_verify(store: &StateStore) -> Result<i32, CliError> {
    let session = store.open()?;
    session.engine().finish()?;
    let consumed = session
        .engine()
        .with_ledger(|ledger| ledger.expectations().len());
    println!("ok: {consumed} expectations consumed");
    Ok(0)
}

fn cmd_ledger(store: &StateStore) -> Result<i32, CliError> {
    let session = store.open()?;
    let json = session.engine().with_ledger(|ledger| ledger.to_json())?;
    println!("{json}");
    Ok(0)
}
