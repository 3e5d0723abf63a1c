//! Rerouter Filter Compiler
//!
//! This crate compiles stored URL rules into declarative redirect rules for the
//! browser's request-filtering engine.

pub mod compiler;
pub mod ruleset;

pub use compiler::{compile, compile_snapshot, compile_with, CompileOptions, CompileStats};
pub use ruleset::{build_ruleset, parse_ruleset, validate_ruleset};
