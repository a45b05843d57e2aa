use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::token::{InputFileRef, InputOrigin, OutputFileRef, ScriptRef};

/// Directories that fixture logical paths resolve against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Build tree: outputs and build-tree inputs.
    pub root: PathBuf,
    /// Project sources: `input(source=...)`.
    pub source_dir: PathBuf,
    /// Stub scripts: `script(...)`.
    pub script_dir: PathBuf,
    /// Compare paths and program names without regard to case.
    pub case_insensitive: bool,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = normalize_lexically(&root.into());
        Self {
            source_dir: root.clone(),
            script_dir: root.clone(),
            root,
            case_insensitive: default_case_insensitive(),
        }
    }

    pub fn with_source_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.source_dir = resolve(&self.root, dir.as_ref());
        self
    }

    pub fn with_script_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.script_dir = resolve(&self.root, dir.as_ref());
        self
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn resolve_output(&self, output: &OutputFileRef) -> PathBuf {
        resolve(&self.root, Path::new(&output.path))
    }

    pub fn resolve_input(&self, input: &InputFileRef) -> PathBuf {
        match input.origin {
            InputOrigin::Build => resolve(&self.root, Path::new(&input.path)),
            InputOrigin::Source => resolve(&self.source_dir, Path::new(&input.path)),
        }
    }

    pub fn resolve_script(&self, script: &ScriptRef) -> PathBuf {
        resolve(&self.script_dir, Path::new(&script.path))
    }

    /// Both paths must already be absolute and normalized.
    pub fn same_path(&self, left: &Path, right: &Path) -> bool {
        if self.case_insensitive {
            left.to_string_lossy().to_lowercase() == right.to_string_lossy().to_lowercase()
        } else {
            left == right
        }
    }

    /// Key used to compare an observed program against a declared one.
    pub fn program_key(&self, program: &str) -> String {
        let name = program_name(program);
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name
        }
    }
}

pub fn default_case_insensitive() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

/// File name of `argv[0]` with any `.exe` suffix removed.
pub fn program_name(argv0: &str) -> String {
    let name = argv0
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(argv0);
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        name[..len - 4].to_string()
    } else {
        name.to_string()
    }
}

/// Join `path` onto `base` unless it is already absolute, then normalize.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        normalize_lexically(&base.join(path))
    }
}

/// Fold `.` and `..` without touching the filesystem; outputs may not exist yet.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Comparison key for a fixture logical path (`./a/../b.o` and `b.o` agree).
pub fn logical_key(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
