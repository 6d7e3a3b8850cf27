//! Tool version handling for `<command>:<version>` invocations.

pub mod listing;
pub mod resolver;

pub use listing::{group_versions, version_source, ToolVersion, VersionLister, VersionSource};
pub use resolver::{expected_version_variable, parse_command_spec, resolve_version, CommandSpec, VersionRequest};
