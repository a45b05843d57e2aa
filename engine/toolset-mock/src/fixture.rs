use std::collections::BTreeSet;

use crate::error::{LoadError, LoadErrorCode};
use crate::layout::logical_key;
use crate::property::{Gate, PropertySet};
use crate::text;
use crate::token::{ArgumentToken, InputOrigin, ScriptRef};

/// One declared command, before gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub gate: Gate,
    pub program: String,
    pub pattern: Vec<ArgumentToken>,
    /// Stub the invocation delegates to for its stdout and exit code.
    pub stdout: Option<ScriptRef>,
    pub exit_code: i32,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    pub stdout: Option<ScriptRef>,
    /// Non-zero simulates a toolchain failure.
    pub exit_code: i32,
}

/// A validated, ordered list of declarations. Order is matching priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    declarations: Vec<Declaration>,
    externals: BTreeSet<String>,
    stubs: BTreeSet<String>,
}

impl Fixture {
    /// Parse the line-oriented fixture format.
    pub fn parse(source: &str) -> Result<Self, LoadError> {
        text::parse_fixture(source)
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Declarations whose gate is satisfied by `properties`, in fixture order.
    pub fn active<'a>(
        &'a self,
        properties: &'a PropertySet,
    ) -> impl Iterator<Item = &'a Declaration> + 'a {
        self.declarations
            .iter()
            .filter(move |declaration| declaration.gate.is_active(properties))
    }

    /// Distinct program names across all declarations.
    pub fn programs(&self) -> BTreeSet<&str> {
        self.declarations
            .iter()
            .map(|declaration| declaration.program.as_str())
            .collect()
    }

    pub fn stubs(&self) -> impl Iterator<Item = &str> {
        self.stubs.iter().map(String::as_str)
    }

    pub fn externals(&self) -> impl Iterator<Item = &str> {
        self.externals.iter().map(String::as_str)
    }
}

/// Accumulates declarations; replaces process-wide registration calls.
///
/// ```
/// use toolset_mock::{output_file, source_file, unordered, FixtureBuilder};
///
/// let mut builder = FixtureBuilder::new();
/// builder
///     .allow_properties(["variant=debug", "link=shared"], |block| {
///         block.command(
///             "clang++",
///             [
///                 unordered(["-fPIC", "-g"]),
///                 "-c".into(),
///                 "-o".into(),
///                 output_file("lib.o"),
///                 source_file("lib.cpp"),
///             ],
///         );
///     })
///     .expect("gate");
/// let fixture = builder.build().expect("fixture");
/// assert_eq!(fixture.declarations().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FixtureBuilder {
    declarations: Vec<Declaration>,
    externals: BTreeSet<String>,
    stubs: BTreeSet<String>,
    gate: Gate,
    line: Option<usize>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a build-tree file produced outside this fixture.
    pub fn external_file(&mut self, path: impl AsRef<str>) -> &mut Self {
        self.externals.insert(logical_key(path.as_ref()));
        self
    }

    /// Declare a stub script that `script(...)` references may name.
    pub fn stub_script(&mut self, path: impl AsRef<str>) -> &mut Self {
        self.stubs.insert(logical_key(path.as_ref()));
        self
    }

    pub fn command<P, I, T>(&mut self, program: P, tokens: I) -> &mut Self
    where
        P: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<ArgumentToken>,
    {
        self.command_with(program, tokens, CommandOptions::default())
    }

    pub fn command_with<P, I, T>(
        &mut self,
        program: P,
        tokens: I,
        options: CommandOptions,
    ) -> &mut Self
    where
        P: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<ArgumentToken>,
    {
        self.declarations.push(Declaration {
            gate: self.gate.clone(),
            program: program.into(),
            pattern: tokens.into_iter().map(Into::into).collect(),
            stdout: options.stdout,
            exit_code: options.exit_code,
            line: self.line,
        });
        self
    }

    /// Gate every declaration made inside `block` on `properties`.
    ///
    /// Nested blocks require the union of both gates. Whether the gate is
    /// active for a configuration is answered by [`Gate::is_active`].
    pub fn allow_properties<I, S, F>(
        &mut self,
        properties: I,
        block: F,
    ) -> Result<&mut Self, LoadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(&mut FixtureBuilder),
    {
        let gate = Gate::parse(properties)?.and(&self.gate);
        let outer = std::mem::replace(&mut self.gate, gate);
        block(self);
        self.gate = outer;
        Ok(self)
    }

    pub(crate) fn set_gate(&mut self, gate: Gate) {
        self.gate = gate;
    }

    pub(crate) fn set_line(&mut self, line: Option<usize>) {
        self.line = line;
    }

    /// Validate file references and freeze declaration order.
    pub fn build(self) -> Result<Fixture, LoadError> {
        let mut produced: BTreeSet<String> = BTreeSet::new();
        for declaration in &self.declarations {
            validate_declaration(declaration, &produced, &self.externals, &self.stubs)
                .map_err(|err| err.at_line(declaration.line))?;
            for token in &declaration.pattern {
                if let ArgumentToken::Output(output) = token {
                    produced.insert(logical_key(&output.path));
                }
            }
        }
        Ok(Fixture {
            declarations: self.declarations,
            externals: self.externals,
            stubs: self.stubs,
        })
    }
}

fn validate_declaration(
    declaration: &Declaration,
    produced: &BTreeSet<String>,
    externals: &BTreeSet<String>,
    stubs: &BTreeSet<String>,
) -> Result<(), LoadError> {
    if declaration.program.trim().is_empty() {
        return Err(LoadError::new(
            LoadErrorCode::EmptyProgram,
            "command has an empty program name",
            None,
        ));
    }
    let check_script = |script: &ScriptRef| {
        if stubs.contains(&logical_key(&script.path)) {
            Ok(())
        } else {
            Err(LoadError::new(
                LoadErrorCode::UndeclaredScript,
                format!("script '{}' is not declared as a stub", script.path),
                None,
            ))
        }
    };
    for token in &declaration.pattern {
        match token {
            ArgumentToken::Unordered(members) if members.is_empty() => {
                return Err(LoadError::new(
                    LoadErrorCode::EmptyGroup,
                    "unordered group has no members",
                    None,
                ));
            }
            ArgumentToken::Input(input) if input.origin == InputOrigin::Build => {
                let key = logical_key(&input.path);
                if !produced.contains(&key) && !externals.contains(&key) {
                    return Err(LoadError::new(
                        LoadErrorCode::UndeclaredInput,
                        format!(
                            "input '{}' is neither an earlier output nor an external file",
                            input.path
                        ),
                        None,
                    ));
                }
            }
            ArgumentToken::Script(script) => check_script(script)?,
            _ => {}
        }
    }
    if let Some(stdout) = &declaration.stdout {
        check_script(stdout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{input_file, output_file, script, source_file, unordered};

    #[test]
    fn inputs_must_follow_their_outputs() {
        let mut builder = FixtureBuilder::new();
        builder.command("ld", ["-o".into(), output_file("app"), input_file("main.o")]);
        let err = builder.build().expect_err("undeclared input");
        assert_eq!(err.code, LoadErrorCode::UndeclaredInput);

        let mut builder = FixtureBuilder::new();
        builder
            .command("cc", ["-c".into(), output_file("./main.o"), source_file("main.c")])
            .command("ld", ["-o".into(), output_file("app"), input_file("main.o")]);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn external_files_satisfy_inputs() {
        let mut builder = FixtureBuilder::new();
        builder
            .external_file("lib/libl1.a")
            .command("ld", [output_file("app"), input_file("lib/libl1.a")]);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn scripts_must_be_declared_stubs() {
        let mut builder = FixtureBuilder::new();
        builder.command_with(
            "clang++",
            ["-print-prog-name=ar"],
            CommandOptions {
                stdout: Some(script("ar.py")),
                exit_code: 0,
            },
        );
        let err = builder.clone().build().expect_err("undeclared stub");
        assert_eq!(err.code, LoadErrorCode::UndeclaredScript);

        builder.stub_script("ar.py");
        assert!(builder.build().is_ok());
    }

    #[test]
    fn empty_groups_and_programs_are_rejected() {
        let mut builder = FixtureBuilder::new();
        builder.command("cc", [unordered(Vec::<String>::new())]);
        assert_eq!(
            builder.build().expect_err("empty group").code,
            LoadErrorCode::EmptyGroup
        );

        let mut builder = FixtureBuilder::new();
        builder.command(" ", ["-c"]);
        assert_eq!(
            builder.build().expect_err("empty program").code,
            LoadErrorCode::EmptyProgram
        );
    }

    #[test]
    fn nested_gates_conjoin_and_restore() {
        let mut builder = FixtureBuilder::new();
        builder
            .allow_properties(["variant=debug"], |block| {
                block.command("cc", ["-g"]);
                block
                    .allow_properties(["link=shared"], |inner| {
                        inner.command("cc", ["-fPIC"]);
                    })
                    .expect("inner gate");
            })
            .expect("outer gate");
        builder.command("cc", ["--version"]);
        let fixture = builder.build().expect("fixture");
        let gates: Vec<String> = fixture
            .declarations()
            .iter()
            .map(|declaration| declaration.gate.to_string())
            .collect();
        assert_eq!(
            gates,
            vec![
                "{variant=debug}".to_string(),
                "{link=shared, variant=debug}".to_string(),
                "always".to_string(),
            ]
        );
    }

    #[test]
    fn active_filters_by_gate_in_order() {
        let mut builder = FixtureBuilder::new();
        builder
            .allow_properties(["variant=debug"], |block| {
                block.command("cc", ["-g"]);
            })
            .expect("gate");
        builder
            .allow_properties(["variant=release"], |block| {
                block.command("cc", ["-O3"]);
            })
            .expect("gate");
        builder.command("cc", ["-v"]);
        let fixture = builder.build().expect("fixture");
        let properties = PropertySet::parse(["variant=release"]).expect("properties");
        let active: Vec<&str> = fixture
            .active(&properties)
            .map(|declaration| match &declaration.pattern[0] {
                ArgumentToken::Literal(value) => value.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(active, vec!["-O3", "-v"]);
    }
}
