//! Dockerized - run command-line tools inside disposable containers
//!
//! Commands are defined as compose services. An invocation layers the
//! `dockerized.env` override files onto the process environment, loads the
//! compose catalog, optionally pins a tool version and runs the command as a
//! one-off container bound to the current directory.

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod env;
pub mod error;
pub mod host;
pub mod run;
pub mod session;
pub mod version;

pub use error::{DockerizedError, Result};
