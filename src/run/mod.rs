//! Planning and executing a single disposable container run.

pub mod engine;
pub mod executor;
pub mod planner;
pub mod signal;

use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::CommandTarget;
use crate::error::{DockerizedError, Result};

pub use engine::{DockerComposeEngine, Engine, UpOutcome};
pub use executor::RunExecutor;
pub use planner::{PlanOptions, RunPlanner};
pub use signal::CancellationToken;

/// Everything needed to run one command in a one-off container.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Service name the container runs as.
    pub service: String,
    pub target: CommandTarget,
    pub args: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub environment: BTreeMap<String, String>,
    /// Working directory inside the container.
    pub working_dir: String,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub labels: BTreeMap<String, String>,
    pub tty: bool,
    pub stdin_open: bool,
    /// Containers never outlive the invocation.
    pub auto_remove: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn bind(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Parses `PORT`, `HOST:CONTAINER`, optionally followed by `/tcp` or
    /// `/udp`. A bare port maps to the same port on both sides.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || DockerizedError::InvalidPort(spec.to_string());

        let (ports, protocol) = match spec.split_once('/') {
            Some((ports, proto)) => {
                let protocol = match proto.to_lowercase().as_str() {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    _ => return Err(invalid()),
                };
                (ports, protocol)
            }
            None => (spec, Protocol::Tcp),
        };

        let (host, container) = ports.split_once(':').unwrap_or((ports, ports));
        let host_port = host.trim().parse::<u16>().map_err(|_| invalid())?;
        let container_port = container.trim().parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            host_port,
            container_port,
            protocol,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)?;
        if self.protocol == Protocol::Udp {
            write!(f, "/udp")?;
        }
        Ok(())
    }
}
