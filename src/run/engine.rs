//! The container engine contract and its `docker compose` implementation.

use std::collections::BTreeMap;
use std::io::{IsTerminal, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::signal::CancellationToken;
use super::PortMapping;
use crate::catalog::ComposeProject;
use crate::env::Environment;
use crate::error::{DockerizedError, Result};

pub const DOCKER_BINARY_VAR: &str = "DOCKERIZED_DOCKER";
const DEFAULT_DOCKER_BINARY: &str = "docker";
/// How long the compose client gets to exit after SIGINT before the
/// container is removed from under it.
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Options for the network-only `up`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpOptions {
    pub services: Vec<String>,
    pub remove_orphans: bool,
    pub force_recreate: bool,
}

impl UpOptions {
    pub fn network_only() -> Self {
        Self {
            services: Vec::new(),
            remove_orphans: true,
            force_recreate: true,
        }
    }
}

/// Result of an `up` that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpOutcome {
    Started,
    /// The project had no container to start; its network is in place.
    NoContainers,
}

/// Options for a one-off container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneOffOptions {
    pub service: String,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_dir: String,
    pub ports: Vec<PortMapping>,
    pub tty: bool,
    pub auto_remove: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub services: Vec<String>,
    pub pull: bool,
    pub no_cache: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Engine: Send + Sync {
    async fn up(
        &self,
        project: &ComposeProject,
        options: &UpOptions,
        cancel: &CancellationToken,
    ) -> Result<UpOutcome>;

    /// Runs the container to completion and returns its exit code.
    async fn run_one_off(
        &self,
        project: &ComposeProject,
        options: &OneOffOptions,
        cancel: &CancellationToken,
    ) -> Result<i32>;

    async fn build(&self, project: &ComposeProject, options: &BuildOptions) -> Result<()>;

    async fn pull(&self, project: &ComposeProject, service: &str) -> Result<()>;

    /// Repository digest of the image the service runs.
    async fn image_digest(&self, project: &ComposeProject, service: &str) -> Result<String>;
}

/// [`Engine`] backed by the `docker compose` command line client.
pub struct DockerComposeEngine {
    docker: String,
    env: Environment,
    grace_period: Duration,
}

impl DockerComposeEngine {
    pub fn new(env: &Environment) -> Self {
        let docker = env
            .get(DOCKER_BINARY_VAR)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_DOCKER_BINARY)
            .to_string();
        Self {
            docker,
            env: env.clone(),
            grace_period: CANCEL_GRACE_PERIOD,
        }
    }

    /// Writes `project` to a temporary compose file. The file is removed when
    /// the returned handle is dropped.
    fn write_project(&self, project: &ComposeProject) -> Result<NamedTempFile> {
        let yaml = serde_yaml::to_string(&project.to_document()).map_err(|e| {
            DockerizedError::EngineError(format!("Failed to serialize compose project: {}", e))
        })?;

        let mut file = tempfile::Builder::new()
            .prefix("dockerized-")
            .suffix(".yml")
            .tempfile()?;
        // Values are already interpolated; keep compose from doing it again.
        file.write_all(yaml.replace('$', "$$").as_bytes())?;
        file.flush()?;
        debug!("Wrote compose project to {}", file.path().display());
        Ok(file)
    }

    fn compose(&self, project: &ComposeProject, file: &NamedTempFile) -> Command {
        let mut command = Command::new(&self.docker);
        command
            .env_clear()
            .envs(self.env.iter())
            .arg("compose")
            .arg("-f")
            .arg(file.path())
            .arg("--project-name")
            .arg(&project.name)
            .arg("--project-directory")
            .arg(&project.working_dir);
        command
    }

    async fn run_to_completion(&self, mut command: Command, what: &str) -> Result<()> {
        let status = command
            .status()
            .await
            .map_err(|e| DockerizedError::EngineError(format!("Failed to run {}: {}", self.docker, e)))?;
        if !status.success() {
            return Err(DockerizedError::EngineError(format!(
                "{} failed with exit code {}",
                what,
                exit_code(status)
            )));
        }
        Ok(())
    }

    fn image_name(project: &ComposeProject, service: &str) -> Result<String> {
        let config = project
            .service(service)
            .ok_or_else(|| DockerizedError::ServiceNotFound(service.to_string()))?;
        Ok(match &config.image {
            Some(image) if !image.is_empty() => image.clone(),
            _ => format!("{}-{}", project.name, service),
        })
    }

    async fn remove_container(&self, name: &str) {
        let result = Command::new(&self.docker)
            .env_clear()
            .envs(self.env.iter())
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => info!("Removed container {}", name),
            Ok(_) => debug!("Container {} was already gone", name),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

#[async_trait]
impl Engine for DockerComposeEngine {
    async fn up(
        &self,
        project: &ComposeProject,
        options: &UpOptions,
        cancel: &CancellationToken,
    ) -> Result<UpOutcome> {
        let file = self.write_project(project)?;
        let mut command = self.compose(project, &file);
        command.args(["up", "--no-start"]);
        if options.remove_orphans {
            command.arg("--remove-orphans");
        }
        if options.force_recreate {
            command.arg("--force-recreate");
        }
        command.args(&options.services);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| DockerizedError::EngineError(format!("Failed to run {}: {}", self.docker, e)))?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => return Err(DockerizedError::Cancelled),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("compose up: {}", stderr.trim());
        if output.status.success() {
            return Ok(UpOutcome::Started);
        }
        if is_no_container_error(&stderr) {
            return Ok(UpOutcome::NoContainers);
        }
        Err(DockerizedError::EngineError(format!(
            "Failed to set up network for project {}: {}",
            project.name,
            stderr.trim()
        )))
    }

    async fn run_one_off(
        &self,
        project: &ComposeProject,
        options: &OneOffOptions,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let file = self.write_project(project)?;
        let container_name = format!("{}-{}-run-{}", project.name, options.service, Uuid::new_v4().simple());

        let mut command = self.compose(project, &file);
        command.arg("run").arg("--name").arg(&container_name);
        if options.auto_remove {
            command.arg("--rm");
        }
        if !options.tty {
            command.arg("-T");
        }
        command.arg("-w").arg(&options.working_dir);
        for (key, value) in &options.environment {
            command.arg("-e").arg(format!("{}={}", key, value));
        }
        for port in &options.ports {
            command.arg("--publish").arg(port.to_string());
        }
        command.arg(&options.service).args(&options.args);
        command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

        info!("Running container {}", container_name);
        let mut child = command
            .spawn()
            .map_err(|e| DockerizedError::EngineError(format!("Failed to run {}: {}", self.docker, e)))?;

        tokio::select! {
            status = child.wait() => Ok(exit_code(status?)),
            _ = cancel.cancelled() => {
                if let Some(pid) = child.id() {
                    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                        debug!("Failed to forward SIGINT to compose: {}", e);
                    }
                }
                match tokio::time::timeout(self.grace_period, child.wait()).await {
                    Ok(_) => self.remove_container(&container_name).await,
                    Err(_) => {
                        warn!(
                            "{} did not stop within {:?}, removing it",
                            container_name, self.grace_period
                        );
                        self.remove_container(&container_name).await;
                        if let Err(e) = child.kill().await {
                            debug!("Failed to kill compose client: {}", e);
                        }
                    }
                }
                Err(DockerizedError::Cancelled)
            }
        }
    }

    async fn build(&self, project: &ComposeProject, options: &BuildOptions) -> Result<()> {
        let file = self.write_project(project)?;
        let mut command = self.compose(project, &file);
        command.arg("build");
        if options.pull {
            command.arg("--pull");
        }
        if options.no_cache {
            command.arg("--no-cache");
        }
        command.args(&options.services);
        self.run_to_completion(command, "compose build").await
    }

    async fn pull(&self, project: &ComposeProject, service: &str) -> Result<()> {
        let file = self.write_project(project)?;
        let mut command = self.compose(project, &file);
        command.args(["pull", service]);
        self.run_to_completion(command, "compose pull").await
    }

    async fn image_digest(&self, project: &ComposeProject, service: &str) -> Result<String> {
        let image = Self::image_name(project, service)?;
        let output = Command::new(&self.docker)
            .env_clear()
            .envs(self.env.iter())
            .args(["image", "inspect", "--format", "{{json .RepoDigests}}", &image])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DockerizedError::EngineError(format!("Failed to run {}: {}", self.docker, e)))?;

        if !output.status.success() {
            return Err(DockerizedError::EngineError(format!(
                "Failed to inspect image {}: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_repo_digest(&image, &output.stdout)
    }
}

fn is_no_container_error(stderr: &str) -> bool {
    stderr.contains("no container found for project") || stderr.contains("no service selected")
}

fn parse_repo_digest(image: &str, stdout: &[u8]) -> Result<String> {
    let digests: Vec<String> = serde_json::from_slice(stdout).map_err(|e| {
        DockerizedError::EngineError(format!("Unexpected inspect output for {}: {}", image, e))
    })?;
    digests
        .into_iter()
        .next()
        .ok_or_else(|| DockerizedError::EngineError(format!("Image {} has no repository digest", image)))
}

/// Exit status as a shell would report it.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Whether both stdin and stdout are attached to a terminal.
pub fn stdio_is_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceConfig;

    fn project() -> ComposeProject {
        let mut project = ComposeProject::new("dockerized", "/opt/dockerized");
        project.services.insert(
            "go".to_string(),
            ServiceConfig {
                image: Some("golang:1.18".into()),
                ..Default::default()
            },
        );
        project.services.insert("tool".to_string(), ServiceConfig::default());
        project
    }

    #[test]
    fn test_exit_code_from_status() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        // Killed by SIGKILL.
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn test_no_container_error_detection() {
        assert!(is_no_container_error(
            "no container found for project \"dockerized\": not found"
        ));
        assert!(is_no_container_error("no service selected"));
        assert!(!is_no_container_error("Cannot connect to the Docker daemon"));
    }

    #[test]
    fn test_parse_repo_digest() {
        let digest = parse_repo_digest("golang", br#"["golang@sha256:abc"]"#).unwrap();
        assert_eq!(digest, "golang@sha256:abc");
        assert!(parse_repo_digest("golang", b"[]").is_err());
        assert!(parse_repo_digest("golang", b"not json").is_err());
    }

    #[test]
    fn test_image_name() {
        let project = project();
        assert_eq!(DockerComposeEngine::image_name(&project, "go").unwrap(), "golang:1.18");
        assert_eq!(DockerComposeEngine::image_name(&project, "tool").unwrap(), "dockerized-tool");
        assert!(matches!(
            DockerComposeEngine::image_name(&project, "missing"),
            Err(DockerizedError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_written_project_escapes_dollars() {
        let mut project = project();
        project.services.get_mut("go").unwrap().entrypoint =
            Some(crate::catalog::compose::CommandLine::Exec(vec!["echo".into(), "$HOME".into()]));

        let engine = DockerComposeEngine::new(&Environment::new());
        let file = engine.write_project(&project).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("$$HOME"));
        assert!(content.contains("name: dockerized"));
    }

    /// Writes an executable stand-in for the docker CLI that appends its
    /// arguments to `docker.log` and then runs `body`.
    fn fake_docker(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("docker");
        let log = dir.join("docker.log");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$*\" >> {}\n{}\n", log.display(), body),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn one_off(service: &str) -> OneOffOptions {
        OneOffOptions {
            service: service.to_string(),
            args: Vec::new(),
            environment: BTreeMap::new(),
            working_dir: "/host/x".to_string(),
            ports: Vec::new(),
            tty: false,
            auto_remove: true,
        }
    }

    #[tokio::test]
    async fn test_cancel_removes_container_that_ignores_sigint() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = fake_docker(
            dir.path(),
            r#"case "$*" in *" run "*) trap '' INT; sleep 20;; esac"#,
        );
        let env = Environment::new()
            .with_var(DOCKER_BINARY_VAR, script.to_string_lossy())
            .with_var("PATH", std::env::var("PATH").unwrap_or_default());
        let mut engine = DockerComposeEngine::new(&env);
        engine.grace_period = Duration::from_millis(300);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            engine.run_one_off(&project(), &one_off("go"), &cancel),
        )
        .await
        .expect("run did not unwind after cancellation");

        assert!(matches!(result, Err(DockerizedError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));

        let log = std::fs::read_to_string(dir.path().join("docker.log")).unwrap();
        let run_line = log.lines().find(|l| l.contains(" run --name ")).unwrap();
        let name = run_line.split_whitespace().skip_while(|a| *a != "--name").nth(1).unwrap();
        assert!(name.starts_with("dockerized-go-run-"));
        assert!(log.lines().any(|l| l == format!("rm -f {}", name)));
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = fake_docker(dir.path(), "exit 4");
        let env = Environment::new().with_var(DOCKER_BINARY_VAR, script.to_string_lossy());
        let engine = DockerComposeEngine::new(&env);

        let code = engine
            .run_one_off(&project(), &one_off("go"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, 4);
    }

    #[test]
    fn test_docker_binary_override() {
        let env = Environment::new().with_var(DOCKER_BINARY_VAR, "/usr/local/bin/podman");
        assert_eq!(DockerComposeEngine::new(&env).docker, "/usr/local/bin/podman");
        assert_eq!(DockerComposeEngine::new(&Environment::new()).docker, "docker");
    }
}
