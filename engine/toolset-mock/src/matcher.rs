use std::fmt;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::expectation::{render_command, Expectation, ExpectationId};
use crate::layout::{resolve, Layout};
use crate::token::ArgumentToken;

/// One observed tool launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory relative arguments resolve against.
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new<P, I, S>(program: P, args: I, cwd: impl Into<PathBuf>) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
        }
    }

    pub fn command_line(&self) -> String {
        render_command(&self.program, &self.args)
    }
}

/// A full match with file references bound to real paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMatch {
    pub id: ExpectationId,
    /// The observed argv with file references replaced by resolved paths.
    pub args: Vec<String>,
    pub outputs: Vec<PathBuf>,
}

/// What went wrong at the first diverging position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    Token { expected: String, found: String },
    /// The observed argv ended early.
    MissingArgument { expected: String },
    /// The observed argv continues past the pattern.
    ExtraArgument { found: String },
    /// A slot covered by an unordered group held something outside the group.
    Group {
        found: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    MissingInput { path: PathBuf },
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Token { expected, found } => {
                write!(f, "expected `{expected}`, found `{found}`")
            }
            Divergence::MissingArgument { expected } => {
                write!(f, "expected `{expected}`, found end of arguments")
            }
            Divergence::ExtraArgument { found } => {
                write!(f, "expected end of arguments, found `{found}`")
            }
            Divergence::Group {
                found,
                missing,
                unexpected,
            } => {
                write!(f, "`{found}` is not in the unordered group")?;
                if !missing.is_empty() {
                    write!(f, "; missing {}", missing.join(" "))?;
                }
                if !unexpected.is_empty() {
                    write!(f, "; unexpected {}", unexpected.join(" "))?;
                }
                Ok(())
            }
            Divergence::MissingInput { path } => {
                write!(f, "input file {} does not exist", path.display())
            }
        }
    }
}

/// Observed argv diverged from every candidate; reports the closest one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFailure {
    pub program: String,
    pub args: Vec<String>,
    /// `None` only when there were no candidates at all.
    pub closest: Option<ExpectationId>,
    /// Closest candidate laid out one argv slot per entry; slots before the
    /// divergence echo what was observed there.
    pub expected: Vec<String>,
    pub line: Option<usize>,
    /// Index into `args` of the first divergence.
    pub position: usize,
    pub divergence: Divergence,
    pub candidates: usize,
}

impl MatchFailure {
    /// Unified diff of the closest candidate against the observed argv, one token per line.
    pub fn diff(&self) -> String {
        let mut expected = String::new();
        expected.push_str(&self.program);
        expected.push('\n');
        for token in &self.expected {
            expected.push_str(token);
            expected.push('\n');
        }
        let mut actual = String::new();
        actual.push_str(&self.program);
        actual.push('\n');
        for arg in &self.args {
            actual.push_str(arg);
            actual.push('\n');
        }
        TextDiff::from_lines(&expected, &actual)
            .unified_diff()
            .header("expected", "actual")
            .to_string()
    }
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no expectation matched `{}` ({} candidate{})",
            render_command(&self.program, &self.args),
            self.candidates,
            if self.candidates == 1 { "" } else { "s" },
        )?;
        let Some(closest) = self.closest else {
            return Ok(());
        };
        write!(f, "; closest is {closest}")?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        write!(f, ": at argument {}: {}", self.position, self.divergence)
    }
}

/// Try `candidates` in order; the first full match wins.
///
/// On failure the closest candidate is the one that diverged furthest into
/// the argv, ties going to the earliest registered.
pub fn select(
    candidates: &[&Expectation],
    invocation: &Invocation,
    layout: &Layout,
) -> Result<ResolvedMatch, MatchFailure> {
    let mut closest: Option<(&Expectation, usize, Divergence)> = None;
    for candidate in candidates {
        match match_expectation(candidate, invocation, layout) {
            Ok(resolved) => return Ok(resolved),
            Err((position, divergence)) => {
                let further = closest
                    .as_ref()
                    .is_none_or(|(_, best, _)| position > *best);
                if further {
                    closest = Some((candidate, position, divergence));
                }
            }
        }
    }
    let (expectation, position, divergence) = match closest {
        Some(found) => found,
        None => {
            return Err(MatchFailure {
                program: invocation.program.clone(),
                args: invocation.args.clone(),
                closest: None,
                expected: Vec::new(),
                line: None,
                position: 0,
                divergence: Divergence::ExtraArgument {
                    found: invocation.args.first().cloned().unwrap_or_default(),
                },
                candidates: 0,
            });
        }
    };
    Err(MatchFailure {
        program: invocation.program.clone(),
        args: invocation.args.clone(),
        closest: Some(expectation.id),
        expected: expected_slots(expectation, &invocation.args, position),
        line: expectation.line,
        position,
        divergence,
        candidates: candidates.len(),
    })
}

fn expected_slots(expectation: &Expectation, args: &[String], position: usize) -> Vec<String> {
    let mut slots = Vec::with_capacity(args.len());
    let mut pos = 0usize;
    for token in &expectation.pattern {
        match token {
            ArgumentToken::Unordered(members) => {
                let end = pos + members.len();
                match args.get(pos..end) {
                    Some(span) if end <= position => slots.extend(span.iter().cloned()),
                    _ => slots.extend(members.iter().cloned()),
                }
                pos = end;
            }
            _ => {
                match args.get(pos) {
                    Some(actual) if pos < position => slots.push(actual.clone()),
                    _ => slots.push(token.to_string()),
                }
                pos += 1;
            }
        }
    }
    slots
}

/// Lock-step walk of one pattern against the observed argv.
pub fn match_expectation(
    expectation: &Expectation,
    invocation: &Invocation,
    layout: &Layout,
) -> Result<ResolvedMatch, (usize, Divergence)> {
    let args = &invocation.args;
    let mut resolved_args = Vec::with_capacity(args.len());
    let mut outputs = Vec::new();
    let mut pos = 0usize;

    for token in &expectation.pattern {
        let missing = || {
            (
                pos,
                Divergence::MissingArgument {
                    expected: token.to_string(),
                },
            )
        };
        let mismatch = |actual: &String| Divergence::Token {
            expected: token.to_string(),
            found: actual.clone(),
        };
        match token {
            ArgumentToken::Unordered(members) => {
                let end = (pos + members.len()).min(args.len());
                let span = &args[pos..end];
                match_group(members, span)
                    .map_err(|(offset, divergence)| (pos + offset, divergence))?;
                resolved_args.extend(span.iter().cloned());
                pos = end;
                continue;
            }
            ArgumentToken::Literal(expected) => {
                let actual = args.get(pos).ok_or_else(missing)?;
                if expected != actual {
                    return Err((pos, mismatch(actual)));
                }
                resolved_args.push(actual.clone());
            }
            ArgumentToken::Output(output) => {
                let actual = args.get(pos).ok_or_else(missing)?;
                let path = layout.resolve_output(output);
                if !same_file_arg(layout, &path, actual, &invocation.cwd) {
                    return Err((pos, mismatch(actual)));
                }
                resolved_args.push(path.display().to_string());
                outputs.push(path);
            }
            ArgumentToken::Input(input) => {
                let actual = args.get(pos).ok_or_else(missing)?;
                let path = layout.resolve_input(input);
                if !same_file_arg(layout, &path, actual, &invocation.cwd) {
                    return Err((pos, mismatch(actual)));
                }
                if !path.exists() {
                    return Err((pos, Divergence::MissingInput { path }));
                }
                resolved_args.push(path.display().to_string());
            }
            ArgumentToken::Script(script) => {
                let actual = args.get(pos).ok_or_else(missing)?;
                let path = layout.resolve_script(script);
                if !same_file_arg(layout, &path, actual, &invocation.cwd) {
                    return Err((pos, mismatch(actual)));
                }
                resolved_args.push(path.display().to_string());
            }
        }
        pos += 1;
    }

    if let Some(extra) = args.get(pos) {
        return Err((
            pos,
            Divergence::ExtraArgument {
                found: extra.clone(),
            },
        ));
    }

    Ok(ResolvedMatch {
        id: expectation.id,
        args: resolved_args,
        outputs,
    })
}

/// Multiset comparison of a group against the argv slice it spans.
fn match_group(members: &[String], span: &[String]) -> Result<(), (usize, Divergence)> {
    let mut remaining: Vec<&str> = members.iter().map(String::as_str).collect();
    let mut unexpected = Vec::new();
    let mut first_bad = None;
    for (offset, actual) in span.iter().enumerate() {
        match remaining.iter().position(|member| *member == actual.as_str()) {
            Some(idx) => {
                remaining.remove(idx);
            }
            None => {
                first_bad.get_or_insert(offset);
                unexpected.push(actual.clone());
            }
        }
    }
    let missing: Vec<String> = remaining.into_iter().map(str::to_string).collect();
    match first_bad {
        Some(offset) => Err((
            offset,
            Divergence::Group {
                found: span[offset].clone(),
                missing,
                unexpected,
            },
        )),
        None if !missing.is_empty() => Err((
            span.len(),
            Divergence::MissingArgument {
                expected: missing.join(" "),
            },
        )),
        None => Ok(()),
    }
}

fn same_file_arg(layout: &Layout, expected: &Path, actual: &str, cwd: &Path) -> bool {
    let actual = resolve(cwd, Path::new(actual));
    layout.same_path(expected, &actual)
}
