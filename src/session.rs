//! Per-invocation state: the host, the layered environment and the compose
//! files it selects.

use std::path::PathBuf;

use tracing::info;

use crate::catalog::{compose_file_paths, CatalogLoader, ComposeProject};
use crate::env::layers::LayerResolver;
use crate::env::Environment;
use crate::error::Result;
use crate::host::HostContext;
use crate::version::resolve_version;

#[derive(Debug, Clone)]
pub struct Session {
    pub host: HostContext,
    pub env: Environment,
    pub compose_files: Vec<PathBuf>,
}

impl Session {
    /// Layers the override files on top of `process_env` and resolves the
    /// compose files from the result.
    pub fn open(host: HostContext, process_env: Environment) -> Result<Self> {
        let base = host.normalize(process_env);
        let env = LayerResolver::new(&host.root, host.home.clone()).resolve(&host.cwd, base)?;
        let compose_files = compose_file_paths(&env, &host.root);
        info!(
            "Compose files: {}",
            compose_files
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            host,
            env,
            compose_files,
        })
    }

    /// Pins the version variable of `command` before the catalog is loaded.
    pub fn with_version(self, command: &str, version: &str) -> Result<Self> {
        let raw = CatalogLoader::new(self.compose_files.clone(), &self.env).load_raw()?;
        let env = resolve_version(&raw, command, version, self.env)?;
        Ok(Self { env, ..self })
    }

    /// The interpolated catalog used for execution.
    pub fn load_catalog(&self) -> Result<ComposeProject> {
        CatalogLoader::new(self.compose_files.clone(), &self.env).load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DockerizedError;
    use std::fs;
    use tempfile::TempDir;

    fn host(root: &TempDir, cwd: &TempDir) -> HostContext {
        HostContext {
            root: root.path().to_path_buf(),
            cwd: cwd.path().to_path_buf(),
            home: None,
            hostname: "box".to_string(),
        }
    }

    fn bundled_root() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join(".env"), "PROTOC_VERSION=3.6.0\nGO_VERSION=1.18\n").unwrap();
        fs::write(
            root.path().join("docker-compose.yml"),
            r#"
services:
  protoc:
    image: "rvolosatovs/protoc:${PROTOC_VERSION}"
    entrypoint: [ "protoc" ]
  go:
    image: "golang:${GO_VERSION}"
"#,
        )
        .unwrap();
        root
    }

    #[test]
    fn test_bundled_defaults() {
        let root = bundled_root();
        let cwd = TempDir::new().unwrap();
        let session = Session::open(host(&root, &cwd), Environment::new()).unwrap();

        assert_eq!(session.compose_files, vec![root.path().join("docker-compose.yml")]);
        let project = session.load_catalog().unwrap();
        assert_eq!(
            project.service("protoc").unwrap().image.as_deref(),
            Some("rvolosatovs/protoc:3.6.0")
        );
    }

    #[test]
    fn test_version_pin_reaches_catalog() {
        let root = bundled_root();
        let cwd = TempDir::new().unwrap();
        let session = Session::open(host(&root, &cwd), Environment::new())
            .unwrap()
            .with_version("go", "1.20")
            .unwrap();

        let project = session.load_catalog().unwrap();
        assert_eq!(project.service("go").unwrap().image.as_deref(), Some("golang:1.20"));
        assert_eq!(
            project.service("protoc").unwrap().image.as_deref(),
            Some("rvolosatovs/protoc:3.6.0")
        );
    }

    #[test]
    fn test_process_env_beats_files() {
        let root = bundled_root();
        let cwd = TempDir::new().unwrap();
        let process = Environment::new().with_var("PROTOC_VERSION", "3.8.0");
        let session = Session::open(host(&root, &cwd), process).unwrap();
        let project = session.load_catalog().unwrap();
        assert_eq!(
            project.service("protoc").unwrap().image.as_deref(),
            Some("rvolosatovs/protoc:3.8.0")
        );
    }

    #[test]
    fn test_local_file_adds_compose_file() {
        let root = bundled_root();
        let cwd = TempDir::new().unwrap();
        fs::write(
            cwd.path().join("dockerized.env"),
            "COMPOSE_FILE=\"${COMPOSE_FILE};${DOCKERIZED_PROJECT_ROOT}/docker-compose.local.yml\"\n",
        )
        .unwrap();
        fs::write(
            cwd.path().join("docker-compose.local.yml"),
            "services:\n  project_cmd:\n    image: alpine\n",
        )
        .unwrap();
        fs::write(
            root.path().join(".env"),
            format!(
                "COMPOSE_FILE={}\nPROTOC_VERSION=3.6.0\nGO_VERSION=1.18\n",
                root.path().join("docker-compose.yml").display()
            ),
        )
        .unwrap();

        let session = Session::open(host(&root, &cwd), Environment::new()).unwrap();
        assert_eq!(session.compose_files.len(), 2);
        let project = session.load_catalog().unwrap();
        assert_eq!(project.service_names(), vec!["go", "project_cmd", "protoc"]);
    }

    #[test]
    fn test_ambiguous_version_leaves_env_untouched() {
        let root = TempDir::new().unwrap();
        fs::write(
            root.path().join("docker-compose.yml"),
            "services:\n  aws:\n    image: \"aws:${AWS_CLI_VERSION}-py${PYTHON_VERSION}\"\n",
        )
        .unwrap();
        let cwd = TempDir::new().unwrap();
        let session = Session::open(host(&root, &cwd), Environment::new()).unwrap();
        let before = session.env.clone();

        let err = session.clone().with_version("aws", "2").unwrap_err();
        assert!(matches!(err, DockerizedError::AmbiguousVersionVariable { .. }));
        assert_eq!(session.env, before);
    }
}
