//! Core of a verification-condition driver: an SMT solver session coupled to
//! a Houdini candidate-invariant inference loop.
//!
//! All diagnostic and lifecycle text flows through `tracing`; nothing in
//! this crate writes to stdout/stderr directly.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod classifier;
pub mod config;
pub mod driver;
pub mod error;
pub mod houdini;
pub mod model;
pub mod observer;
pub mod process_session;
pub mod program;
pub mod sexpr;
pub mod vcgen;

pub use error::{HoudiniError, Result};
