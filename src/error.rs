use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerizedError {
    #[error("Invalid env file {}:{line}: {message}", .path.display())]
    EnvFile {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid compose file {}: {message}", .path.display())]
    ComposeFile { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Circular variable reference: {0}")]
    CircularReference(String),

    #[error("Command not found in compose file(s): {0}")]
    ServiceNotFound(String),

    #[error("Version selection for {0} is currently not supported.")]
    VersionSelectionUnsupported(String),

    #[error("To specify the version of {command}, please set {variable}.")]
    VersionVariableMismatch { command: String, variable: String },

    #[error(
        "To specify the version of {command}, please set one of:\n  {}",
        .candidates.join("\n  ")
    )]
    AmbiguousVersionVariable {
        command: String,
        candidates: Vec<String>,
    },

    #[error("Cannot determine versions for command {command} because {reason}.")]
    VersionListingUnsupported { command: String, reason: String },

    #[error("No parseable versions found for command {command}.{}", found_suffix(.found))]
    NoParseableVersions { command: String, found: Vec<String> },

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("{0} and {1} are mutually exclusive")]
    MutuallyExclusiveOptions(&'static str, &'static str),

    #[error("Invalid port mapping: {0}")]
    InvalidPort(String),

    #[error("Engine error: {0}")]
    EngineError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("{command} exited with code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("Interrupted")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

fn found_suffix(found: &[String]) -> String {
    if found.is_empty() {
        String::new()
    } else {
        format!("\nFound: {}", found.join(", "))
    }
}

impl DockerizedError {
    /// Process exit code for this error. A failing command keeps its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            DockerizedError::CommandFailed { code, .. } => *code,
            DockerizedError::Cancelled => 130,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, DockerizedError>;
