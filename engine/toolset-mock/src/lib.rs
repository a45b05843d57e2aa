/* Copyright (c) 2026 Olle Mårtensson. This Source Code Form is subject to the terms of the Eclipse Public License, v. 2.0. */
//! Toolset mock: verifies and simulates toolchain invocations against a fixture.
//!
//! A fixture declares, per build configuration, the exact commands a build
//! driver is expected to launch. The engine registers the declarations whose
//! gate the configuration satisfies, matches each intercepted invocation
//! against them, consumes the match once, and creates its declared outputs.
//!
//! # Examples
//! ```
//! use toolset_mock::{Engine, Fixture, Invocation, Layout, PropertySet};
//!
//! let dir = tempfile::tempdir().expect("tempdir");
//! std::fs::write(dir.path().join("lib.cpp"), "int f();\n").expect("source");
//!
//! let fixture = Fixture::parse(
//!     "when variant=debug\n\
//!      command clang++ unordered(-g -O0) -c -o output(lib.o) input(source=lib.cpp)\n",
//! )
//! .expect("fixture");
//! let properties = PropertySet::parse(["variant=debug"]).expect("properties");
//! let engine = Engine::load(&fixture, &properties, Layout::new(dir.path()));
//!
//! let verdict = engine
//!     .invoke(&Invocation::new(
//!         "clang++",
//!         ["-O0", "-g", "-c", "-o", "lib.o", "lib.cpp"],
//!         dir.path(),
//!     ))
//!     .expect("match");
//! assert!(verdict.success());
//! assert!(dir.path().join("lib.o").exists());
//! engine.finish().expect("complete");
//! ```

mod error;
mod expectation;
mod text;

pub mod engine;
pub mod fixture;
pub mod layout;
pub mod ledger;
pub mod matcher;
pub mod property;
pub mod simulator;
pub mod state;
pub mod stub;
pub mod token;

pub use engine::Engine;
pub use error::{LoadError, LoadErrorCode, MockError, MockResult};
pub use expectation::{render_command, Expectation, ExpectationId};
pub use fixture::{CommandOptions, Declaration, Fixture, FixtureBuilder};
pub use layout::{program_name, Layout};
pub use ledger::{CompletionIssue, CompletionReport, InvocationRecord, Ledger, LedgerSnapshot};
pub use matcher::{Divergence, Invocation, MatchFailure, ResolvedMatch};
pub use property::{Gate, Property, PropertySet};
pub use simulator::Verdict;
pub use state::{RunConfig, Session, StateStore, STATE_ENV};
pub use stub::{runner_from_callback, ProcessStubRunner, StubOutput, StubRunner};
pub use token::{
    input_file, lit, output_file, script, source_file, unordered, ArgumentToken, InputFileRef,
    InputOrigin, OutputFileRef, ScriptRef,
};
