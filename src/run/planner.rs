use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{PortMapping, RunRequest, VolumeMount};
use crate::catalog::{CommandTarget, ComposeProject, SHELL_LABEL};
use crate::error::{DockerizedError, Result};

/// Mount point of the host working directory inside the container.
pub const CONTAINER_HOST_DIR: &str = "/host";
pub const HOST_HOSTNAME_VAR: &str = "HOST_HOSTNAME";
pub const COMMAND_LABEL: &str = "com.dockerized.command";
const DEFAULT_SHELL: &str = "sh";

/// Invocation flags that change how the container is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub shell: bool,
    pub entrypoint: Option<String>,
    pub port: Option<String>,
}

pub struct RunPlanner {
    host_cwd: PathBuf,
    hostname: String,
    tty: bool,
}

impl RunPlanner {
    pub fn new(host_cwd: impl Into<PathBuf>, hostname: impl Into<String>) -> Self {
        Self {
            host_cwd: host_cwd.into(),
            hostname: hostname.into(),
            tty: false,
        }
    }

    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn plan(
        &self,
        project: &ComposeProject,
        command: &str,
        args: Vec<String>,
        options: &PlanOptions,
    ) -> Result<RunRequest> {
        if options.shell && options.entrypoint.is_some() {
            return Err(DockerizedError::MutuallyExclusiveOptions("--shell", "--entrypoint"));
        }

        let target = project.resolve_command(command);
        if let CommandTarget::Unmanaged { image } = &target {
            info!(
                "Service {} not found in compose file(s). Fallback to: {}.",
                command, image
            );
            info!("  This command, if it exists, will not support version switching.");
        }

        let working_dir = container_working_dir(&self.host_cwd);
        let mut request = RunRequest {
            service: command.to_string(),
            target,
            args,
            entrypoint: None,
            environment: BTreeMap::from([(HOST_HOSTNAME_VAR.to_string(), self.hostname.clone())]),
            working_dir: working_dir.clone(),
            volumes: vec![VolumeMount::bind(
                self.host_cwd.to_string_lossy().into_owned(),
                working_dir,
            )],
            ports: Vec::new(),
            labels: BTreeMap::from([(COMMAND_LABEL.to_string(), command.to_string())]),
            tty: self.tty,
            stdin_open: true,
            auto_remove: true,
        };

        if let Some(port) = &options.port {
            let mapping = PortMapping::parse(port)?;
            info!("Mapping port: {}", mapping);
            request.ports.push(mapping);
        }

        if options.shell {
            let shell = match &request.target {
                CommandTarget::Managed(service) => service.label(SHELL_LABEL).unwrap_or(DEFAULT_SHELL),
                CommandTarget::Unmanaged { .. } => DEFAULT_SHELL,
            };
            info!("Setting up shell in container for {}...", command);
            request.entrypoint = Some(vec![shell.to_string()]);
            for mount in mounted_volumes(&request) {
                info!("  Mounted: {}", mount);
            }
        }

        if let Some(entrypoint) = &options.entrypoint {
            info!("Setting entrypoint to {}", entrypoint);
            request.entrypoint = Some(
                entrypoint
                    .split(' ')
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }

        info!("Entrypoint: {:?}", request.entrypoint);
        info!("Command:    {:?}", request.args);
        Ok(request)
    }
}

/// `/host/<name of the host directory>`, or `/host` at the filesystem root.
pub fn container_working_dir(host_cwd: &Path) -> String {
    match host_cwd.file_name() {
        Some(name) => format!("{}/{}", CONTAINER_HOST_DIR, name.to_string_lossy()),
        None => CONTAINER_HOST_DIR.to_string(),
    }
}

/// `source:target` for every volume the run container will see: the
/// catalog entry's own volumes, then the host directory bind.
pub fn mounted_volumes(request: &RunRequest) -> Vec<String> {
    let mut mounts = Vec::new();
    if let CommandTarget::Managed(service) = &request.target {
        for volume in &service.volumes {
            match (volume.source(), volume.target()) {
                (Some(source), Some(target)) => mounts.push(format!("{}:{}", source, target)),
                (Some(anonymous), None) | (None, Some(anonymous)) => mounts.push(anonymous),
                (None, None) => {}
            }
        }
    }
    for volume in &request.volumes {
        mounts.push(format!("{}:{}", volume.host_path, volume.container_path));
    }
    mounts
}
