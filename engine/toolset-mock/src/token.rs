use std::fmt;

/// Where an input file reference resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputOrigin {
    /// Produced inside the build tree, by an earlier command or externally.
    Build,
    /// A source file of the project under test.
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputFileRef {
    pub path: String,
    pub origin: InputOrigin,
}

impl InputFileRef {
    pub fn build(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: InputOrigin::Build,
        }
    }

    pub fn source(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: InputOrigin::Source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputFileRef {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptRef {
    pub path: String,
}

/// One element of an expected argument pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgumentToken {
    Literal(String),
    /// Flags that must all appear, once each, in any order.
    Unordered(Vec<String>),
    Input(InputFileRef),
    Output(OutputFileRef),
    Script(ScriptRef),
}

impl ArgumentToken {
    /// Number of argv slots this token spans.
    pub fn width(&self) -> usize {
        match self {
            ArgumentToken::Unordered(members) => members.len(),
            _ => 1,
        }
    }
}

impl From<&str> for ArgumentToken {
    fn from(value: &str) -> Self {
        ArgumentToken::Literal(value.to_string())
    }
}

impl From<String> for ArgumentToken {
    fn from(value: String) -> Self {
        ArgumentToken::Literal(value)
    }
}

impl From<OutputFileRef> for ArgumentToken {
    fn from(value: OutputFileRef) -> Self {
        ArgumentToken::Output(value)
    }
}

impl From<InputFileRef> for ArgumentToken {
    fn from(value: InputFileRef) -> Self {
        ArgumentToken::Input(value)
    }
}

impl From<ScriptRef> for ArgumentToken {
    fn from(value: ScriptRef) -> Self {
        ArgumentToken::Script(value)
    }
}

pub fn lit(value: impl Into<String>) -> ArgumentToken {
    ArgumentToken::Literal(value.into())
}

pub fn unordered<I, S>(members: I) -> ArgumentToken
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ArgumentToken::Unordered(members.into_iter().map(Into::into).collect())
}

pub fn output_file(path: impl Into<String>) -> ArgumentToken {
    ArgumentToken::Output(OutputFileRef { path: path.into() })
}

pub fn input_file(path: impl Into<String>) -> ArgumentToken {
    ArgumentToken::Input(InputFileRef::build(path))
}

pub fn source_file(path: impl Into<String>) -> ArgumentToken {
    ArgumentToken::Input(InputFileRef::source(path))
}

pub fn script(path: impl Into<String>) -> ScriptRef {
    ScriptRef { path: path.into() }
}

/// Renders in fixture text syntax, quoting where the bare form would re-parse differently.
impl fmt::Display for ArgumentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentToken::Literal(value) => f.write_str(&quote_if_needed(value)),
            ArgumentToken::Unordered(members) => {
                f.write_str("unordered(")?;
                for (idx, member) in members.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str(&quote_if_needed(member))?;
                }
                f.write_str(")")
            }
            ArgumentToken::Input(input) => match input.origin {
                InputOrigin::Build => write!(f, "input({})", input.path),
                InputOrigin::Source => write!(f, "input(source={})", input.path),
            },
            ArgumentToken::Output(output) => write!(f, "output({})", output.path),
            ArgumentToken::Script(script) => write!(f, "script({})", script.path),
        }
    }
}

pub(crate) fn quote_if_needed(value: &str) -> String {
    let special = value.is_empty()
        || value
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '"' | '\\' | '(' | ')' | '#'))
        || value.starts_with("exit=")
        || value.starts_with("stdout=");
    if !special {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_fixture_syntax() {
        assert_eq!(lit("-c").to_string(), "-c");
        assert_eq!(lit("a b").to_string(), "\"a b\"");
        assert_eq!(lit("output(x)").to_string(), "\"output(x)\"");
        assert_eq!(unordered(["-O0", "-g"]).to_string(), "unordered(-O0 -g)");
        assert_eq!(source_file("lib.cpp").to_string(), "input(source=lib.cpp)");
        assert_eq!(input_file("bin/lib.o").to_string(), "input(bin/lib.o)");
        assert_eq!(output_file("bin/lib.o").to_string(), "output(bin/lib.o)");
    }

    #[test]
    fn width_counts_group_members() {
        assert_eq!(unordered(["-a", "-b", "-c"]).width(), 3);
        assert_eq!(lit("-c").width(), 1);
    }
}
