//! Discovery and merging of the `dockerized.env` override layers.
//!
//! Precedence, highest first: the live process environment, the nearest
//! project-local `dockerized.env`, `~/dockerized.env`, and the bundled `.env`
//! shipped next to the installation. A lower layer never overrides a key that
//! a higher one defines.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::dotenv::{Assignment, EnvFile};
use super::template::Template;
use super::Environment;
use crate::error::{DockerizedError, Result};

pub const ENV_FILE_NAME: &str = "dockerized.env";
pub const BUNDLED_ENV_FILE_NAME: &str = ".env";
/// Number of directories (starting with the working directory) searched for
/// a project-local override file.
pub const LOCAL_SEARCH_DEPTH: usize = 10;
pub const PROJECT_ROOT_VAR: &str = "DOCKERIZED_PROJECT_ROOT";

/// Ordered from lowest to highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerScope {
    Bundled,
    Global,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvLayer {
    pub scope: LayerScope,
    pub path: PathBuf,
}

pub struct LayerResolver {
    root: PathBuf,
    home: Option<PathBuf>,
}

impl LayerResolver {
    pub fn new(root: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home,
        }
    }

    /// Existing override files, highest precedence first. A file reachable
    /// through more than one scope is kept once, at its highest scope.
    pub fn discover(&self, cwd: &Path) -> Vec<EnvLayer> {
        let mut layers = Vec::new();

        if let Some(local) = find_local_env_file(cwd) {
            layers.push(EnvLayer { scope: LayerScope::Local, path: local });
        }

        if let Some(home) = &self.home {
            let global = home.join(ENV_FILE_NAME);
            if global.is_file() {
                layers.push(EnvLayer { scope: LayerScope::Global, path: global });
            }
        }

        let bundled = self.root.join(BUNDLED_ENV_FILE_NAME);
        if bundled.is_file() {
            layers.push(EnvLayer { scope: LayerScope::Bundled, path: bundled });
        }

        let mut seen = BTreeSet::new();
        layers.retain(|layer| seen.insert(layer.path.clone()));
        layers
    }

    /// Discovers the layers for `cwd` and folds them onto `base`.
    pub fn resolve(&self, cwd: &Path, base: Environment) -> Result<Environment> {
        let layers = self.discover(cwd);
        apply_layers(&layers, base)
    }
}

/// Walks upward from `start` looking for a project-local override file.
pub fn find_local_env_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    for _ in 0..LOCAL_SEARCH_DEPTH {
        let current = dir?;
        let candidate = current.join(ENV_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

/// Folds `layers` (any order) onto `base`. Keys already in `base` are never
/// touched.
pub fn apply_layers(layers: &[EnvLayer], base: Environment) -> Result<Environment> {
    let mut ordered: Vec<&EnvLayer> = layers.iter().collect();
    ordered.sort_by_key(|layer| layer.scope);

    let mut files = Vec::with_capacity(ordered.len());
    for layer in ordered {
        info!("Loading: '{}'", layer.path.display());
        let mut file = EnvFile::from_file(&layer.path)?;
        if layer.scope == LayerScope::Local {
            inject_project_root(&mut file, &layer.path);
        }
        files.push(file);
    }

    let keys: BTreeSet<String> = files
        .iter()
        .flat_map(|f| f.keys().map(str::to_string))
        .collect();

    let mut stack = LayerStack {
        base: &base,
        files: &files,
        cache: HashMap::new(),
        in_progress: Vec::new(),
    };

    let mut resolved = BTreeMap::new();
    for key in keys {
        if base.contains(&key) {
            debug!("{} already set in environment, skipping override files", key);
            continue;
        }
        if let Some(value) = stack.lookup(&key, files.len())? {
            resolved.insert(key, value);
        }
    }

    Ok(base.extended_with(resolved))
}

fn inject_project_root(file: &mut EnvFile, path: &Path) {
    if file.get(PROJECT_ROOT_VAR).is_some() {
        return;
    }
    let Some(dir) = path.parent() else { return };
    let escaped = dir.to_string_lossy().replace('$', "$$");
    if let Ok(value) = Template::parse(&escaped) {
        file.assignments.insert(
            0,
            Assignment {
                key: PROJECT_ROOT_VAR.to_string(),
                value,
            },
        );
    }
}

/// Lazily resolves variables across the layer files. `files` is ordered from
/// lowest to highest precedence; a `ceiling` of `n` only considers `files[..n]`.
struct LayerStack<'a> {
    base: &'a Environment,
    files: &'a [EnvFile],
    cache: HashMap<(String, usize), String>,
    in_progress: Vec<(String, usize)>,
}

impl LayerStack<'_> {
    fn lookup(&mut self, key: &str, ceiling: usize) -> Result<Option<String>> {
        if let Some(value) = self.base.get(key) {
            return Ok(Some(value.to_string()));
        }

        let files = self.files;
        let Some((layer, template)) = files[..ceiling]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, file)| file.get(key).map(|t| (idx, t)))
        else {
            return Ok(None);
        };

        let cache_key = (key.to_string(), layer);
        if let Some(value) = self.cache.get(&cache_key) {
            return Ok(Some(value.clone()));
        }
        if self.in_progress.contains(&cache_key) {
            return Err(DockerizedError::CircularReference(format!(
                "{} in {}",
                key,
                files[layer].path.display()
            )));
        }

        self.in_progress.push(cache_key.clone());
        // A self-reference extends the value of the layers below; anything
        // else sees the whole chain.
        let rendered = template.render(&mut |name: &str| {
            if name == key {
                self.lookup(name, layer)
            } else {
                self.lookup(name, files.len())
            }
        });
        self.in_progress.pop();

        let value = rendered?;
        self.cache.insert(cache_key, value.clone());
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        home: PathBuf,
        project: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("dockerized");
        let home = tmp.path().join("home");
        let project = home.join("projects").join("app");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&project).unwrap();
        Fixture { root, home, project, _tmp: tmp }
    }

    fn resolve(fx: &Fixture, cwd: &Path, base: Environment) -> Result<Environment> {
        LayerResolver::new(&fx.root, Some(fx.home.clone())).resolve(cwd, base)
    }

    #[test]
    fn test_local_overrides_global_overrides_bundled() {
        let fx = fixture();
        fs::write(fx.root.join(".env"), "PROTOC_VERSION=3.0.0\nGO_VERSION=1.17\nNODE_VERSION=16\n").unwrap();
        fs::write(fx.home.join(ENV_FILE_NAME), "PROTOC_VERSION=3.6.0\nGO_VERSION=1.18\n").unwrap();
        fs::write(fx.project.join(ENV_FILE_NAME), "PROTOC_VERSION=3.8.0\n").unwrap();

        let env = resolve(&fx, &fx.project, Environment::new()).unwrap();
        assert_eq!(env.get("PROTOC_VERSION"), Some("3.8.0"));
        assert_eq!(env.get("GO_VERSION"), Some("1.18"));
        assert_eq!(env.get("NODE_VERSION"), Some("16"));
    }

    #[test]
    fn test_process_environment_is_never_overwritten() {
        let fx = fixture();
        fs::write(fx.root.join(".env"), "PROTOC_VERSION=3.0.0\n").unwrap();
        fs::write(fx.home.join(ENV_FILE_NAME), "PROTOC_VERSION=3.6.0\n").unwrap();
        fs::write(fx.project.join(ENV_FILE_NAME), "PROTOC_VERSION=3.8.0\n").unwrap();

        let base = Environment::new().with_var("PROTOC_VERSION", "3.16.1");
        let env = resolve(&fx, &fx.project, base).unwrap();
        assert_eq!(env.get("PROTOC_VERSION"), Some("3.16.1"));
    }

    #[test]
    fn test_empty_process_value_still_wins() {
        let fx = fixture();
        fs::write(fx.home.join(ENV_FILE_NAME), "GO_VERSION=1.18\n").unwrap();

        let base = Environment::new().with_var("GO_VERSION", "");
        let env = resolve(&fx, &fx.project, base).unwrap();
        assert_eq!(env.get("GO_VERSION"), Some(""));
    }

    #[test]
    fn test_self_reference_extends_lower_layers() {
        let fx = fixture();
        fs::write(fx.root.join(".env"), "COMPOSE_FILE=${DOCKERIZED_ROOT}/docker-compose.yml\n").unwrap();
        fs::write(
            fx.home.join(ENV_FILE_NAME),
            "COMPOSE_FILE=\"${COMPOSE_FILE};${HOME}/docker-compose.yml\"\n",
        )
        .unwrap();
        fs::write(
            fx.project.join(ENV_FILE_NAME),
            "COMPOSE_FILE=\"${COMPOSE_FILE};${DOCKERIZED_PROJECT_ROOT}/docker-compose.yml\"\n",
        )
        .unwrap();

        let base = Environment::new()
            .with_var("DOCKERIZED_ROOT", "/opt/dockerized")
            .with_var("HOME", fx.home.to_string_lossy());
        let env = resolve(&fx, &fx.project, base).unwrap();

        let expected = format!(
            "/opt/dockerized/docker-compose.yml;{}/docker-compose.yml;{}/docker-compose.yml",
            fx.home.display(),
            fx.project.display()
        );
        assert_eq!(env.get("COMPOSE_FILE"), Some(expected.as_str()));
    }

    #[test]
    fn test_lower_layer_sees_higher_layer_values() {
        let fx = fixture();
        fs::write(fx.root.join(".env"), "GO_IMAGE=golang:${GO_VERSION}\nGO_VERSION=1.17\n").unwrap();
        fs::write(fx.project.join(ENV_FILE_NAME), "GO_VERSION=1.19\n").unwrap();

        let env = resolve(&fx, &fx.project, Environment::new()).unwrap();
        assert_eq!(env.get("GO_IMAGE"), Some("golang:1.19"));
    }

    #[test]
    fn test_substitution_sees_process_environment() {
        let fx = fixture();
        fs::write(fx.home.join(ENV_FILE_NAME), "CACHE_DIR=${HOME}/.cache\n").unwrap();

        let base = Environment::new().with_var("HOME", "/home/me");
        let env = resolve(&fx, &fx.project, base).unwrap();
        assert_eq!(env.get("CACHE_DIR"), Some("/home/me/.cache"));
    }

    #[test]
    fn test_circular_reference_is_error() {
        let fx = fixture();
        fs::write(fx.project.join(ENV_FILE_NAME), "A=${B}\nB=${A}\n").unwrap();

        let err = resolve(&fx, &fx.project, Environment::new()).unwrap_err();
        assert!(matches!(err, DockerizedError::CircularReference(_)));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let fx = fixture();
        fs::write(fx.home.join(ENV_FILE_NAME), "this is not valid\n").unwrap();

        let err = resolve(&fx, &fx.project, Environment::new()).unwrap_err();
        assert!(matches!(err, DockerizedError::EnvFile { line: 1, .. }));
    }

    #[test]
    fn test_project_root_is_provided() {
        let fx = fixture();
        let nested = fx.project.join("src").join("pkg");
        fs::create_dir_all(&nested).unwrap();
        fs::write(fx.project.join(ENV_FILE_NAME), "FOO=bar\n").unwrap();

        let env = resolve(&fx, &nested, Environment::new()).unwrap();
        assert_eq!(env.get(PROJECT_ROOT_VAR), Some(fx.project.to_string_lossy().as_ref()));
        assert_eq!(env.get("FOO"), Some("bar"));
    }

    #[test]
    fn test_find_local_env_file_walks_up() {
        let fx = fixture();
        let nested = fx.project.join("a").join("b").join("c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(fx.project.join(ENV_FILE_NAME), "").unwrap();

        assert_eq!(find_local_env_file(&nested), Some(fx.project.join(ENV_FILE_NAME)));
    }

    #[test]
    fn test_find_local_env_file_is_bounded() {
        let fx = fixture();
        let mut deep = fx.project.clone();
        for i in 0..LOCAL_SEARCH_DEPTH {
            deep = deep.join(format!("d{}", i));
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(fx.project.join(ENV_FILE_NAME), "").unwrap();

        assert_eq!(find_local_env_file(&deep), None);
    }

    #[test]
    fn test_discover_orders_and_deduplicates() {
        let fx = fixture();
        fs::write(fx.root.join(".env"), "").unwrap();
        fs::write(fx.home.join(ENV_FILE_NAME), "").unwrap();

        let resolver = LayerResolver::new(&fx.root, Some(fx.home.clone()));

        // From inside home the local search finds the global file itself.
        let layers = resolver.discover(&fx.home);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].scope, LayerScope::Local);
        assert_eq!(layers[0].path, fx.home.join(ENV_FILE_NAME));
        assert_eq!(layers[1].scope, LayerScope::Bundled);

        fs::write(fx.project.join(ENV_FILE_NAME), "").unwrap();
        let scopes: Vec<_> = resolver.discover(&fx.project).into_iter().map(|l| l.scope).collect();
        assert_eq!(scopes, vec![LayerScope::Local, LayerScope::Global, LayerScope::Bundled]);
    }

    #[test]
    fn test_no_layers_returns_base() {
        let fx = fixture();
        let base = Environment::new().with_var("A", "1");
        let env = resolve(&fx, &fx.project, base.clone()).unwrap();
        assert_eq!(env, base);
    }
}
