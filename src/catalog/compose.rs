//! Typed view of the parts of a compose document dockerized reads or edits.
//!
//! Keys that are not modelled explicitly are kept in `extra` so they survive a
//! round trip to the engine untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable_map")]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandLine>,
    #[serde(default, deserialize_with = "key_values", skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, Option<String>>,
    #[serde(default, deserialize_with = "labels", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<ServiceVolume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ServicePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_grace_period: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildConfig {
    Context(String),
    Detailed(BuildSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, deserialize_with = "key_values", skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Option<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// `entrypoint` / `command`: either a shell string or an exec-form list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceVolume {
    Short(String),
    Long(VolumeSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServicePort {
    Number(u16),
    Short(String),
    Long(BTreeMap<String, serde_yaml::Value>),
}

impl ComposeDocument {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

impl ServiceConfig {
    /// Arguments of the build step, if any.
    pub fn build_args(&self) -> Option<&BTreeMap<String, Option<String>>> {
        match &self.build {
            Some(BuildConfig::Detailed(spec)) => Some(&spec.args),
            _ => None,
        }
    }

    pub fn has_build(&self) -> bool {
        self.build.is_some()
    }

    /// Entrypoint as a token list.
    pub fn entrypoint_tokens(&self) -> Vec<String> {
        self.entrypoint.as_ref().map(CommandLine::tokens).unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Merges `other` on top of `self`: scalars from `other` win, maps merge
    /// key by key and lists are appended.
    pub fn merge(&mut self, other: ServiceConfig) {
        if other.image.is_some() {
            self.image = other.image;
        }
        match (&mut self.build, other.build) {
            (Some(BuildConfig::Detailed(base)), Some(BuildConfig::Detailed(over))) => {
                if over.context.is_some() {
                    base.context = over.context;
                }
                if over.dockerfile.is_some() {
                    base.dockerfile = over.dockerfile;
                }
                base.args.extend(over.args);
                base.extra.extend(over.extra);
            }
            (_, Some(build)) => self.build = Some(build),
            (_, None) => {}
        }
        if other.entrypoint.is_some() {
            self.entrypoint = other.entrypoint;
        }
        if other.command.is_some() {
            self.command = other.command;
        }
        self.environment.extend(other.environment);
        self.labels.extend(other.labels);
        self.volumes.extend(other.volumes);
        self.ports.extend(other.ports);
        if other.working_dir.is_some() {
            self.working_dir = other.working_dir;
        }
        if other.stdin_open.is_some() {
            self.stdin_open = other.stdin_open;
        }
        if other.tty.is_some() {
            self.tty = other.tty;
        }
        if other.stop_grace_period.is_some() {
            self.stop_grace_period = other.stop_grace_period;
        }
        self.extra.extend(other.extra);
    }
}

impl CommandLine {
    /// Splits the shell form on whitespace; the exec form is returned as is.
    pub fn tokens(&self) -> Vec<String> {
        match self {
            CommandLine::Shell(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandLine::Exec(items) => items.clone(),
        }
    }
}

impl VolumeSpec {
    pub fn bind(source: impl Into<String>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            kind: "bind".to_string(),
            source: Some(source.into()),
            target: target.into(),
            read_only,
            extra: BTreeMap::new(),
        }
    }
}

impl ServiceVolume {
    pub fn source(&self) -> Option<String> {
        match self {
            ServiceVolume::Short(spec) => spec.split(':').next().map(str::to_string),
            ServiceVolume::Long(spec) => spec.source.clone(),
        }
    }

    pub fn target(&self) -> Option<String> {
        match self {
            ServiceVolume::Short(spec) => spec.split(':').nth(1).map(str::to_string),
            ServiceVolume::Long(spec) => Some(spec.target.clone()),
        }
    }
}

fn nullable_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let raw: Option<BTreeMap<String, Option<T>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyValues {
    Map(BTreeMap<String, Option<ScalarValue>>),
    List(Vec<String>),
}

/// Compose accepts numbers and booleans as environment values.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarValue {
    Text(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

impl ScalarValue {
    fn into_string(self) -> String {
        match self {
            ScalarValue::Text(s) => s,
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
        }
    }
}

fn key_values<'de, D>(deserializer: D) -> Result<BTreeMap<String, Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<KeyValues> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None => BTreeMap::new(),
        Some(KeyValues::Map(map)) => map
            .into_iter()
            .map(|(k, v)| (k, v.map(ScalarValue::into_string)))
            .collect(),
        Some(KeyValues::List(items)) => items
            .into_iter()
            .map(|item| match item.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (item, None),
            })
            .collect(),
    })
}

fn labels<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(key_values(deserializer)?
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect())
}
