//! # svcs
//!
//! Repository-local semantic version-control analyzer.
//!
//! At every commit a layered differ turns the textual change into typed
//! semantic events (`signature_changed`, `function_made_async`,
//! `dependency_added`, ...), persists them in a per-repository SQLite store,
//! and attaches them to the commit as a git note so the semantic history
//! travels with the code.
//!
//! The pieces compose bottom-up:
//!
//! - [`ir`]: language parsers (Python, JavaScript/TypeScript, PHP, Go) that
//!   produce a uniform intermediate representation per file version
//! - [`diff`]: the five-layer differ emitting the event stream
//! - [`store`]: the SQLite-backed event store and its query surface
//! - [`notes`]: git-notes serialization and transport
//! - [`hooks`]: post-commit / post-merge / post-checkout / pre-push
//!   orchestration that never blocks git

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod diff;
pub mod git;
pub mod hooks;
pub mod ir;
pub mod notes;
pub mod store;

pub use crate::cli::Cli;

/// The current version of svcs
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
