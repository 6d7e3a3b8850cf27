use tracing::{debug, info};

use super::engine::{Engine, OneOffOptions, UpOptions, UpOutcome};
use super::signal::CancellationToken;
use super::RunRequest;
use crate::catalog::compose::{CommandLine, ServiceVolume, VolumeSpec};
use crate::catalog::{CommandTarget, ComposeProject, ServiceConfig};
use crate::error::{DockerizedError, Result};

const STOP_GRACE_PERIOD: &str = "1s";

/// Runs a [`RunRequest`] as one disposable container.
///
/// The project network is provisioned first with a service-less `up`, then
/// the project is reduced to the single target service and run once.
pub struct RunExecutor<E: Engine> {
    engine: E,
}

impl<E: Engine> RunExecutor<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub async fn run(
        &self,
        project: &ComposeProject,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let base = match &request.target {
            CommandTarget::Managed(_) => project.clone(),
            CommandTarget::Unmanaged { image } => ComposeProject::ad_hoc(
                project.name.clone(),
                project.working_dir.clone(),
                request.service.clone(),
                image.clone(),
            ),
        };

        self.up_network(&base, cancel).await?;

        if cancel.is_cancelled() {
            return Err(DockerizedError::Cancelled);
        }

        let service = base
            .service(&request.service)
            .ok_or_else(|| DockerizedError::ServiceNotFound(request.service.clone()))?;
        let run_project = base.with_only_service(&request.service, run_service(service, request));

        let options = OneOffOptions {
            service: request.service.clone(),
            args: request.args.clone(),
            environment: request.environment.clone(),
            working_dir: request.working_dir.clone(),
            ports: request.ports.clone(),
            tty: request.tty,
            auto_remove: request.auto_remove,
        };

        let code = self.engine.run_one_off(&run_project, &options, cancel).await?;
        if cancel.is_cancelled() {
            return Err(DockerizedError::Cancelled);
        }
        if code != 0 {
            info!("{} exited with code {}", request.service, code);
            return Err(DockerizedError::CommandFailed {
                command: request.service.clone(),
                code,
            });
        }
        Ok(())
    }

    /// Network-only phase. Safe to repeat.
    pub async fn up_network(&self, project: &ComposeProject, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DockerizedError::Cancelled);
        }
        let network_only = project.without_services();
        match self.engine.up(&network_only, &UpOptions::network_only(), cancel).await? {
            UpOutcome::Started => debug!("Network for {} is up", project.name),
            UpOutcome::NoContainers => debug!("Network for {} is up, no containers", project.name),
        }
        Ok(())
    }
}

/// The service as it should run for `request`.
fn run_service(service: &ServiceConfig, request: &RunRequest) -> ServiceConfig {
    let mut service = service.clone();
    service.volumes.extend(request.volumes.iter().map(|mount| {
        ServiceVolume::Long(VolumeSpec::bind(
            mount.host_path.clone(),
            mount.container_path.clone(),
            mount.read_only,
        ))
    }));
    service
        .labels
        .extend(request.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    service.stdin_open = Some(request.stdin_open);
    service.tty = Some(request.tty);
    service.stop_grace_period = Some(STOP_GRACE_PERIOD.to_string());
    if let Some(entrypoint) = &request.entrypoint {
        service.entrypoint = Some(CommandLine::Exec(entrypoint.clone()));
    }
    service
}
