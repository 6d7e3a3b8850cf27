use std::collections::BTreeMap;
use std::path::PathBuf;

use super::compose::{ComposeDocument, ServiceConfig};
use super::CommandTarget;

/// A loaded set of compose documents merged into one project.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeProject {
    pub name: String,
    /// Directory relative paths are resolved against.
    pub working_dir: PathBuf,
    pub services: BTreeMap<String, ServiceConfig>,
    pub networks: BTreeMap<String, serde_yaml::Value>,
    pub volumes: BTreeMap<String, serde_yaml::Value>,
}

impl ComposeProject {
    pub fn new(name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            working_dir: working_dir.into(),
            services: BTreeMap::new(),
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
        }
    }

    /// Single-service project built around an image that is not in the catalog.
    pub fn ad_hoc(
        name: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        service_name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        let service = ServiceConfig {
            image: Some(image.into()),
            ..Default::default()
        };
        let mut project = Self::new(name, working_dir);
        project.services.insert(service_name.into(), service);
        project
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Classifies `name` as a catalog entry or an unmanaged fallback.
    pub fn resolve_command(&self, name: &str) -> CommandTarget {
        match self.services.get(name) {
            Some(service) => CommandTarget::Managed(Box::new(service.clone())),
            None => CommandTarget::unmanaged(name),
        }
    }

    /// Same project without any service; used to provision its network.
    pub fn without_services(&self) -> Self {
        Self {
            services: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Same project reduced to `service`, registered as `name`.
    pub fn with_only_service(&self, name: &str, service: ServiceConfig) -> Self {
        let mut services = BTreeMap::new();
        services.insert(name.to_string(), service);
        Self {
            services,
            ..self.clone()
        }
    }

    pub fn to_document(&self) -> ComposeDocument {
        ComposeDocument {
            name: Some(self.name.clone()),
            services: self.services.clone(),
            networks: self.networks.clone(),
            volumes: self.volumes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ComposeProject {
        let mut project = ComposeProject::new("dockerized", "/opt/dockerized");
        project.services.insert(
            "go".to_string(),
            ServiceConfig { image: Some("golang:1.18".into()), ..Default::default() },
        );
        project.services.insert(
            "node".to_string(),
            ServiceConfig { image: Some("node:18".into()), ..Default::default() },
        );
        project
    }

    #[test]
    fn test_derived_views_leave_original_untouched() {
        let project = project();

        let network_only = project.without_services();
        assert!(network_only.services.is_empty());
        assert_eq!(network_only.name, "dockerized");

        let go = project.service("go").unwrap().clone();
        let single = project.with_only_service("go", go);
        assert_eq!(single.service_names(), vec!["go"]);

        assert_eq!(project.service_names(), vec!["go", "node"]);
    }

    #[test]
    fn test_resolve_command() {
        let project = project();
        assert!(matches!(project.resolve_command("go"), CommandTarget::Managed(_)));
        match project.resolve_command("htop") {
            CommandTarget::Unmanaged { image } => assert_eq!(image, "r.j3ss.co/htop"),
            other => panic!("unexpected target: {other:?}"),
        }
    }

    #[test]
    fn test_ad_hoc_project() {
        let project = ComposeProject::ad_hoc("dockerized", "/opt", "htop", "r.j3ss.co/htop");
        assert_eq!(project.service("htop").unwrap().image.as_deref(), Some("r.j3ss.co/htop"));
        assert_eq!(project.to_document().services.len(), 1);
    }
}
