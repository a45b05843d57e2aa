use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShimError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("program name cannot be used as a file name: {0:?}")]
    InvalidProgram(String),
    #[error("bin directory is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Create `bin_dir/<program>` for every program, each running `exe`.
///
/// Existing shims are replaced. Returns the created paths in input order.
pub fn install_shims(
    exe: &Path,
    bin_dir: &Path,
    programs: &[String],
) -> Result<Vec<PathBuf>, ShimError> {
    if bin_dir.exists() && !bin_dir.is_dir() {
        return Err(ShimError::NotADirectory(bin_dir.to_path_buf()));
    }
    fs::create_dir_all(bin_dir)?;

    let mut installed = Vec::with_capacity(programs.len());
    for program in programs {
        check_program_name(program)?;
        let path = bin_dir.join(executable_name(program));
        if fs::symlink_metadata(&path).is_ok() {
            fs::remove_file(&path)?;
        }
        link_or_copy(exe, &path)?;
        ensure_executable(&path)?;
        installed.push(path);
    }
    Ok(installed)
}

fn check_program_name(program: &str) -> Result<(), ShimError> {
    let mut components = Path::new(program).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !program.contains(['/', '\\']) => Ok(()),
        _ => Err(ShimError::InvalidProgram(program.to_string())),
    }
}

#[cfg(unix)]
fn link_or_copy(exe: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(exe, path)
}

#[cfg(not(unix))]
fn link_or_copy(exe: &Path, path: &Path) -> io::Result<()> {
    fs::copy(exe, path).map(|_| ())
}

fn ensure_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        // Follows the link; the binary itself must be runnable.
        let mut perms = fs::metadata(path)?.permissions();
        if perms.mode() & 0o111 == 0 {
            perms.set_mode(0o755);
            fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}
