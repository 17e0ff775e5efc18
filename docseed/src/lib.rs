//! AI-driven documentation project bootstrapper.
//!
//! `docseed` asks a text-generation API for a documentation skeleton, has it
//! write a script that materializes the files, runs that script, and launches
//! a documentation preview server. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (step tracking, fence cleanup,
//!   preview marker detection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (HTTP, filesystem, subprocesses),
//!   each behind a trait so tests can script them.
//!
//! [`pipeline`] coordinates the two to implement the CLI.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
