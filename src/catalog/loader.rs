use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::compose::{BuildConfig, ComposeDocument, ServiceConfig, ServiceVolume};
use super::interpolate::interpolate;
use super::project::ComposeProject;
use crate::env::Environment;
use crate::error::{DockerizedError, Result};

pub const COMPOSE_FILE_VAR: &str = "COMPOSE_FILE";
pub const COMPOSE_PATH_SEPARATOR_VAR: &str = "COMPOSE_PATH_SEPARATOR";
pub const COMPOSE_PROJECT_NAME_VAR: &str = "COMPOSE_PROJECT_NAME";
pub const DEFAULT_PATH_SEPARATOR: &str = ";";
pub const BUNDLED_COMPOSE_FILE: &str = "docker-compose.yml";
pub const DEFAULT_PROJECT_NAME: &str = "dockerized";

/// Compose documents to load, in order. Falls back to the bundled document
/// when `COMPOSE_FILE` is unset or empty.
pub fn compose_file_paths(env: &Environment, root: &Path) -> Vec<PathBuf> {
    let separator = env
        .get(COMPOSE_PATH_SEPARATOR_VAR)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PATH_SEPARATOR);

    let paths: Vec<PathBuf> = env
        .get(COMPOSE_FILE_VAR)
        .map(|value| {
            value
                .split(separator)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();

    if paths.is_empty() {
        vec![root.join(BUNDLED_COMPOSE_FILE)]
    } else {
        paths
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    /// Variables substituted, services validated and paths normalised.
    Interpolated,
    /// Documents exactly as written.
    Raw,
}

pub struct CatalogLoader<'a> {
    paths: Vec<PathBuf>,
    env: &'a Environment,
}

impl<'a> CatalogLoader<'a> {
    pub fn new(paths: Vec<PathBuf>, env: &'a Environment) -> Self {
        Self { paths, env }
    }

    /// Catalog used for execution.
    pub fn load(&self) -> Result<ComposeProject> {
        self.load_with(LoadMode::Interpolated)
    }

    /// Catalog with every `${VAR}` reference left in place.
    pub fn load_raw(&self) -> Result<ComposeProject> {
        self.load_with(LoadMode::Raw)
    }

    fn load_with(&self, mode: LoadMode) -> Result<ComposeProject> {
        let first = self.paths.first().ok_or_else(|| {
            DockerizedError::InvalidConfiguration("no compose file configured".to_string())
        })?;

        let working_dir = first
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = self
            .env
            .get(COMPOSE_PROJECT_NAME_VAR)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_PROJECT_NAME);
        let mut project = ComposeProject::new(name, working_dir);

        for path in &self.paths {
            info!("Compose file: {}", path.display());
            let document = self.read_document(path, mode)?;
            for (service_name, service) in document.services {
                match project.services.get_mut(&service_name) {
                    Some(existing) => {
                        debug!("Merging service {} from {}", service_name, path.display());
                        existing.merge(service);
                    }
                    None => {
                        project.services.insert(service_name, service);
                    }
                }
            }
            project.networks.extend(document.networks);
            project.volumes.extend(document.volumes);
        }

        if mode == LoadMode::Interpolated {
            self.validate(&project)?;
            self.normalize(&mut project);
        }

        Ok(project)
    }

    fn read_document(&self, path: &Path, mode: LoadMode) -> Result<ComposeDocument> {
        let compose_error = |message: String| DockerizedError::ComposeFile {
            path: path.to_path_buf(),
            message,
        };

        let content = fs::read_to_string(path).map_err(|e| compose_error(e.to_string()))?;
        let value: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| compose_error(e.to_string()))?;

        let value = match mode {
            LoadMode::Interpolated => interpolate(value, self.env).map_err(|e| compose_error(e.to_string()))?,
            LoadMode::Raw => value,
        };

        if value.is_null() {
            return Ok(ComposeDocument::default());
        }

        serde_yaml::from_value(value).map_err(|e| compose_error(e.to_string()))
    }

    fn validate(&self, project: &ComposeProject) -> Result<()> {
        for (name, service) in &project.services {
            if service.image.is_none() && service.build.is_none() {
                return Err(DockerizedError::InvalidConfiguration(format!(
                    "service {} has neither an image nor a build configuration",
                    name
                )));
            }
        }
        Ok(())
    }

    fn normalize(&self, project: &mut ComposeProject) {
        let base = project.working_dir.clone();
        let home = self.env.get("HOME").map(PathBuf::from);

        for service in project.services.values_mut() {
            normalize_build(service, &base);
            for volume in &mut service.volumes {
                normalize_volume(volume, &base, home.as_deref());
            }
        }
    }
}

fn normalize_build(service: &mut ServiceConfig, base: &Path) {
    match &mut service.build {
        Some(BuildConfig::Context(context)) => *context = absolutize(context, base, None),
        Some(BuildConfig::Detailed(spec)) => {
            let context = spec.context.get_or_insert_with(|| ".".to_string());
            *context = absolutize(context, base, None);
        }
        None => {}
    }
}

fn normalize_volume(volume: &mut ServiceVolume, base: &Path, home: Option<&Path>) {
    match volume {
        ServiceVolume::Short(spec) => {
            if let Some((source, rest)) = spec.split_once(':') {
                if is_relative_host_path(source) {
                    *spec = format!("{}:{}", absolutize(source, base, home), rest);
                }
            }
        }
        ServiceVolume::Long(spec) if spec.kind == "bind" => {
            if let Some(source) = &mut spec.source {
                *source = absolutize(source, base, home);
            }
        }
        ServiceVolume::Long(_) => {}
    }
}

fn is_relative_host_path(source: &str) -> bool {
    source == "." || source.starts_with("./") || source.starts_with("../") || source.starts_with('~')
}

fn absolutize(path: &str, base: &Path, home: Option<&Path>) -> String {
    if let (Some(rest), Some(home)) = (path.strip_prefix('~'), home) {
        return home.join(rest.trim_start_matches('/')).to_string_lossy().into_owned();
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() || path.contains("://") {
        return path.to_string();
    }
    let joined = base.join(candidate);
    let mut clean = PathBuf::new();
    for component in joined.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other),
        }
    }
    clean.to_string_lossy().into_owned()
}
