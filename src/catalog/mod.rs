//! The command catalog: compose documents resolved into runnable commands.

pub mod compose;
pub mod interpolate;
pub mod loader;
pub mod project;

pub use compose::{ComposeDocument, ServiceConfig};
pub use loader::{compose_file_paths, CatalogLoader};
pub use project::ComposeProject;

/// Registry serving images for commands that are not in the catalog.
pub const FALLBACK_REGISTRY: &str = "r.j3ss.co";

/// Label naming the shell `--shell` should start.
pub const SHELL_LABEL: &str = "com.dockerized.shell";

/// How a requested command name is backed.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandTarget {
    /// Defined in the catalog.
    Managed(Box<ServiceConfig>),
    /// Not in the catalog; runs a conventionally named image.
    Unmanaged { image: String },
}

impl CommandTarget {
    pub fn unmanaged(command: &str) -> Self {
        CommandTarget::Unmanaged {
            image: fallback_image(command),
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, CommandTarget::Managed(_))
    }
}

pub fn fallback_image(command: &str) -> String {
    format!("{}/{}", FALLBACK_REGISTRY, command)
}
