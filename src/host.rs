//! Facts about the invoking host that the pipeline depends on.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::Environment;
use crate::error::{DockerizedError, Result};

pub const ROOT_VAR: &str = "DOCKERIZED_ROOT";
pub const HOME_VAR: &str = "HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Installation directory holding the bundled compose and env files.
    pub root: PathBuf,
    pub cwd: PathBuf,
    pub home: Option<PathBuf>,
    pub hostname: String,
}

impl HostContext {
    /// Gathers the context of the running process. `root` takes precedence
    /// over `DOCKERIZED_ROOT`, which takes precedence over the directory two
    /// levels above the executable.
    pub fn from_process(root: Option<PathBuf>, env: &Environment) -> Result<Self> {
        let root = match root.or_else(|| non_empty(env.get(ROOT_VAR)).map(PathBuf::from)) {
            Some(root) => root,
            None => root_from_executable()?,
        };
        let cwd = std::env::current_dir()?;
        let home = non_empty(env.get(HOME_VAR))
            .map(PathBuf::from)
            .or_else(dirs::home_dir);
        let hostname = nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|e| {
                debug!("Cannot read hostname: {}", e);
                String::new()
            });

        info!("Dockerized root: {}", root.display());
        Ok(Self {
            root,
            cwd,
            home,
            hostname,
        })
    }

    /// Makes `DOCKERIZED_ROOT` and `HOME` visible to compose interpolation.
    pub fn normalize(&self, env: Environment) -> Environment {
        let env = env.with_var(ROOT_VAR, self.root.to_string_lossy());
        match &self.home {
            Some(home) if env.get(HOME_VAR).map_or(true, str::is_empty) => {
                env.with_var(HOME_VAR, home.to_string_lossy())
            }
            _ => env,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn root_from_executable() -> Result<PathBuf> {
    let executable = std::env::current_exe()?;
    executable
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            DockerizedError::InvalidConfiguration(format!(
                "Cannot detect dockerized root directory from {}",
                executable.display()
            ))
        })
}
