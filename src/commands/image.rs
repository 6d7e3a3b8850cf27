//! `--build`, `--pull` and `--digest`.

use tracing::info;

use crate::catalog::{CommandTarget, ComposeProject};
use crate::error::{DockerizedError, Result};
use crate::run::engine::{BuildOptions, Engine};

/// Project holding only the service that backs `command`.
fn image_project(project: &ComposeProject, command: &str) -> ComposeProject {
    match project.resolve_command(command) {
        CommandTarget::Managed(service) => project.with_only_service(command, *service),
        CommandTarget::Unmanaged { image } => {
            ComposeProject::ad_hoc(project.name.clone(), project.working_dir.clone(), command, image)
        }
    }
}

pub async fn build<E: Engine>(
    engine: &E,
    project: &ComposeProject,
    command: &str,
    pull: bool,
    no_cache: bool,
) -> Result<()> {
    let service = project
        .service(command)
        .ok_or_else(|| DockerizedError::ServiceNotFound(command.to_string()))?;
    if !service.has_build() {
        info!("{} has no build step, building is a no-op", command);
    }

    info!("Building container image for {}...", command);
    let options = BuildOptions {
        services: vec![command.to_string()],
        pull,
        no_cache,
    };
    engine.build(&image_project(project, command), &options).await
}

pub async fn pull<E: Engine>(engine: &E, project: &ComposeProject, command: &str) -> Result<()> {
    info!("Pulling container image for {}...", command);
    engine.pull(&image_project(project, command), command).await
}

pub async fn digest<E: Engine>(engine: &E, project: &ComposeProject, command: &str) -> Result<String> {
    engine.image_digest(&image_project(project, command), command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceConfig;
    use crate::run::engine::MockEngine;

    fn project() -> ComposeProject {
        let mut project = ComposeProject::new("dockerized", "/opt/dockerized");
        project.services.insert(
            "go".to_string(),
            ServiceConfig {
                image: Some("golang:1.18".into()),
                ..Default::default()
            },
        );
        project.services.insert(
            "node".to_string(),
            ServiceConfig {
                image: Some("node:18".into()),
                ..Default::default()
            },
        );
        project
    }

    #[tokio::test]
    async fn test_build_reduces_project() {
        let mut engine = MockEngine::new();
        engine
            .expect_build()
            .times(1)
            .withf(|project, options| {
                project.service_names() == vec!["go"]
                    && options.services == vec!["go"]
                    && options.pull
                    && !options.no_cache
            })
            .returning(|_, _| Ok(()));

        build(&engine, &project(), "go", true, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_build_unmanaged_is_error() {
        let mut engine = MockEngine::new();
        engine.expect_build().never();
        let err = build(&engine, &project(), "htop", false, false).await.unwrap_err();
        assert!(matches!(err, DockerizedError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_pull_unmanaged_uses_fallback_image() {
        let mut engine = MockEngine::new();
        engine
            .expect_pull()
            .times(1)
            .withf(|project, service| {
                service == "htop"
                    && project.services["htop"].image.as_deref() == Some("r.j3ss.co/htop")
            })
            .returning(|_, _| Ok(()));

        pull(&engine, &project(), "htop").await.unwrap();
    }

    #[tokio::test]
    async fn test_digest() {
        let mut engine = MockEngine::new();
        engine
            .expect_image_digest()
            .returning(|_, _| Ok("golang@sha256:abc".to_string()));

        assert_eq!(digest(&engine, &project(), "go").await.unwrap(), "golang@sha256:abc");
    }
}
