//! Line-oriented fixture format.
//!
//! ```text
//! stub ar.py
//! command clang++ -print-prog-name=ar stdout=script(ar.py)
//!
//! when variant=debug link=shared
//! command clang++ unordered(-O0 -g) -c -o output(bin/lib.o) input(source=lib.cpp)
//! ```
//!
//! A `when` line gates every following command until the next `when` or
//! `always`. Double quotes produce plain literals and suppress special forms.

use crate::error::{LoadError, LoadErrorCode};
use crate::fixture::{CommandOptions, Fixture, FixtureBuilder};
use crate::property::Gate;
use crate::token::{self, ArgumentToken, ScriptRef};

const FORMS: [&str; 5] = ["unordered", "output", "input", "script", "stdout=script"];

pub(crate) fn parse_fixture(source: &str) -> Result<Fixture, LoadError> {
    let mut builder = FixtureBuilder::new();
    for (line, text) in logical_lines(source) {
        let tokens = Lexer::new(&text, line).tokenize()?;
        let Some((head, rest)) = tokens.split_first() else {
            continue;
        };
        let RawToken::Word(directive) = head else {
            return Err(parse_error("expected a directive", line));
        };
        builder.set_line(Some(line));
        match directive.as_str() {
            "command" => parse_command(&mut builder, rest, line)?,
            "when" => {
                if rest.is_empty() {
                    return Err(parse_error("'when' needs at least one property", line));
                }
                let gate = Gate::parse(plain_words(rest, line)?)
                    .map_err(|err| err.at_line(Some(line)))?;
                builder.set_gate(gate);
            }
            "always" => {
                if !rest.is_empty() {
                    return Err(parse_error("'always' takes no arguments", line));
                }
                builder.set_gate(Gate::always());
            }
            "stub" => {
                for path in plain_words(rest, line)? {
                    builder.stub_script(path);
                }
            }
            "external" => {
                for path in plain_words(rest, line)? {
                    builder.external_file(path);
                }
            }
            other => {
                return Err(parse_error(format!("unknown directive '{other}'"), line));
            }
        }
    }
    builder.build()
}

fn parse_command(
    builder: &mut FixtureBuilder,
    tokens: &[RawToken],
    line: usize,
) -> Result<(), LoadError> {
    let Some((program, rest)) = tokens.split_first() else {
        return Err(LoadError::new(
            LoadErrorCode::EmptyProgram,
            "'command' needs a program",
            Some(line),
        ));
    };
    let program = match program {
        RawToken::Word(value) | RawToken::Quoted(value) => value.clone(),
        RawToken::Form { .. } => return Err(parse_error("program must be a plain word", line)),
    };

    let mut pattern = Vec::with_capacity(rest.len());
    let mut options = CommandOptions::default();
    for raw in rest {
        match raw {
            RawToken::Quoted(value) => pattern.push(ArgumentToken::Literal(value.clone())),
            RawToken::Word(value) => {
                if let Some(code) = value.strip_prefix("exit=") {
                    options.exit_code = code.parse().map_err(|_| {
                        LoadError::new(
                            LoadErrorCode::InvalidExitCode,
                            format!("exit code '{code}' is not an integer"),
                            Some(line),
                        )
                    })?;
                } else if value.starts_with("stdout=") {
                    return Err(parse_error("stdout expects script(...)", line));
                } else {
                    pattern.push(ArgumentToken::Literal(value.clone()));
                }
            }
            RawToken::Form { name, body } if name == "stdout=script" => {
                options.stdout = Some(token::script(form_path(body, line)?));
            }
            RawToken::Form { name, body } => pattern.push(form_token(name, body, line)?),
        }
    }
    builder.command_with(program, pattern, options);
    Ok(())
}

fn form_token(name: &str, body: &str, line: usize) -> Result<ArgumentToken, LoadError> {
    match name {
        "unordered" => {
            let members = Lexer::new(body, line).tokenize()?;
            let members = members
                .into_iter()
                .map(|member| match member {
                    RawToken::Word(value) | RawToken::Quoted(value) => Ok(value),
                    RawToken::Form { .. } => {
                        Err(parse_error("unordered groups hold plain flags only", line))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            if members.is_empty() {
                return Err(LoadError::new(
                    LoadErrorCode::EmptyGroup,
                    "unordered group has no members",
                    Some(line),
                ));
            }
            Ok(ArgumentToken::Unordered(members))
        }
        "output" => Ok(token::output_file(form_path(body, line)?)),
        "input" => {
            let path = form_path(body, line)?;
            match path.strip_prefix("source=") {
                Some(source) if !source.is_empty() => Ok(token::source_file(source)),
                Some(_) => Err(parse_error("input(source=) needs a path", line)),
                None => Ok(token::input_file(path)),
            }
        }
        "script" => Ok(ArgumentToken::Script(ScriptRef {
            path: form_path(body, line)?,
        })),
        other => Err(parse_error(format!("unknown form '{other}(...)'"), line)),
    }
}

fn form_path(body: &str, line: usize) -> Result<String, LoadError> {
    let path = body.trim();
    if path.is_empty() {
        return Err(parse_error("file reference needs a path", line));
    }
    Ok(path.to_string())
}

fn plain_words(tokens: &[RawToken], line: usize) -> Result<Vec<String>, LoadError> {
    tokens
        .iter()
        .map(|raw| match raw {
            RawToken::Word(value) | RawToken::Quoted(value) => Ok(value.clone()),
            RawToken::Form { .. } => Err(parse_error("expected a plain word", line)),
        })
        .collect()
}

fn parse_error(message: impl Into<String>, line: usize) -> LoadError {
    LoadError::new(LoadErrorCode::Parse, message, Some(line))
}

/// Joins `\`-continued lines and drops blanks and comments. Line numbers are 1-based.
fn logical_lines(source: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if pending.is_none() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }
        let (continued, body) = match trimmed.strip_suffix('\\') {
            Some(body) => (true, body),
            None => (false, trimmed),
        };
        let entry = pending.get_or_insert_with(|| (line_no, String::new()));
        if !entry.1.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(body);
        if !continued {
            if let Some(done) = pending.take() {
                out.push(done);
            }
        }
    }
    if let Some(done) = pending {
        out.push(done);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawToken {
    Word(String),
    /// Contained a quoted segment; always a plain literal.
    Quoted(String),
    Form { name: String, body: String },
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Lexer {
    fn new(input: &str, line: usize) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line,
        }
    }

    fn tokenize(mut self) -> Result<Vec<RawToken>, LoadError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Option<RawToken>, LoadError> {
        self.skip_ws();
        if self.peek().is_none() {
            return Ok(None);
        }
        let mut text = String::new();
        let mut quoted = false;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                break;
            }
            match ch {
                '"' => {
                    self.bump();
                    self.read_quoted(&mut text)?;
                    quoted = true;
                }
                '(' if !quoted && FORMS.contains(&text.as_str()) => {
                    self.bump();
                    let body = self.read_form_body()?;
                    if self.peek().is_some_and(|next| !next.is_whitespace()) {
                        return Err(parse_error(
                            format!("unexpected text after '{text}(...)'"),
                            self.line,
                        ));
                    }
                    return Ok(Some(RawToken::Form { name: text, body }));
                }
                _ => {
                    text.push(ch);
                    self.bump();
                }
            }
        }
        Ok(Some(if quoted {
            RawToken::Quoted(text)
        } else {
            RawToken::Word(text)
        }))
    }

    fn read_quoted(&mut self, out: &mut String) -> Result<(), LoadError> {
        loop {
            match self.bump() {
                None => return Err(parse_error("unterminated quote", self.line)),
                Some('"') => return Ok(()),
                Some('\\') => match self.bump() {
                    Some(escaped @ ('"' | '\\')) => out.push(escaped),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(parse_error("unterminated quote", self.line)),
                },
                Some(ch) => out.push(ch),
            }
        }
    }

    /// Raw text up to the closing paren; quotes are kept for the inner lexer.
    fn read_form_body(&mut self) -> Result<String, LoadError> {
        let mut body = String::new();
        let mut in_quote = false;
        loop {
            match self.bump() {
                None => return Err(parse_error("unterminated '('", self.line)),
                Some(')') if !in_quote => return Ok(body),
                Some('"') => {
                    in_quote = !in_quote;
                    body.push('"');
                }
                Some('\\') if in_quote => {
                    body.push('\\');
                    if let Some(escaped) = self.bump() {
                        body.push(escaped);
                    }
                }
                Some(ch) => body.push(ch),
            }
        }
    }
}
