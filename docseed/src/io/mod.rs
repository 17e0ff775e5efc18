//! I/O adapters for the pipeline steps.

pub mod config;
pub mod generator;
pub mod preview;
pub mod process;
pub mod prompt;
pub mod script;
pub mod structure;
