use std::collections::BTreeSet;

use tracing::info;

use crate::catalog::{CommandTarget, ComposeProject, ServiceConfig};
use crate::env::template::referenced_variables;
use crate::env::Environment;
use crate::error::{DockerizedError, Result};

const VERSION_SUFFIX: &str = "_VERSION";

/// What the user asked for after the `:` in `<command>:<version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRequest {
    /// `:?` or a bare `:`. List the available versions.
    List,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub version: Option<VersionRequest>,
}

/// Splits `go:1.18` into the command name and its version request.
pub fn parse_command_spec(arg: &str) -> CommandSpec {
    match arg.split_once(':') {
        None => CommandSpec {
            name: arg.to_string(),
            version: None,
        },
        Some((name, version)) => CommandSpec {
            name: name.to_string(),
            version: Some(match version {
                "" | "?" => VersionRequest::List,
                other => VersionRequest::Exact(other.to_string()),
            }),
        },
    }
}

/// `my-tool` -> `MY_TOOL_VERSION`
pub fn expected_version_variable(command: &str) -> String {
    format!("{}{}", command.to_uppercase().replace('-', "_"), VERSION_SUFFIX)
}

/// Variable names a service definition references directly: environment
/// keys, build argument values, the image reference and entrypoint tokens.
pub fn service_variables(service: &ServiceConfig) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = service.environment.keys().cloned().collect();

    if let Some(args) = service.build_args() {
        for value in args.values().flatten() {
            names.extend(referenced_variables(value));
        }
    }
    if let Some(image) = &service.image {
        names.extend(referenced_variables(image));
    }
    for token in service.entrypoint_tokens() {
        names.extend(referenced_variables(&token));
    }

    names
}

/// Binds the version variable of `command` to `version`.
///
/// Works on the raw catalog so references are still visible. On success the
/// returned environment carries the variable, overriding any existing value.
pub fn resolve_version(
    raw_project: &ComposeProject,
    command: &str,
    version: &str,
    env: Environment,
) -> Result<Environment> {
    let service = match raw_project.resolve_command(command) {
        CommandTarget::Managed(service) => service,
        CommandTarget::Unmanaged { .. } => {
            return Err(DockerizedError::VersionSelectionUnsupported(command.to_string()))
        }
    };

    let expected = expected_version_variable(command);
    let referenced = service_variables(&service);
    let candidates: Vec<String> = referenced
        .iter()
        .filter(|name| name.ends_with(VERSION_SUFFIX))
        .cloned()
        .collect();
    info!("Version variables referenced by {}: {:?}", command, candidates);

    if !referenced.contains(&expected) {
        return Err(match candidates.len() {
            0 => DockerizedError::VersionSelectionUnsupported(command.to_string()),
            1 => DockerizedError::VersionVariableMismatch {
                command: command.to_string(),
                variable: candidates[0].clone(),
            },
            _ => DockerizedError::AmbiguousVersionVariable {
                command: command.to_string(),
                candidates,
            },
        });
    }

    info!("Setting {} to {}...", expected, version);
    Ok(env.with_var(expected, version))
}
