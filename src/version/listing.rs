use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::catalog::{CommandTarget, ServiceConfig};
use crate::env::Environment;
use crate::error::{DockerizedError, Result};

pub const NPM_REGISTRY_VAR: &str = "NPM_CONFIG_REGISTRY";
pub const DEFAULT_NPM_REGISTRY: &str = "https://registry.npmjs.org";
const NPM_ACCEPT: &str = "application/vnd.npm.install-v1+json";

const TAG_PAGE_SIZE: usize = 1000;
const MAX_TAG_PAGES: usize = 50;

lazy_static! {
    static ref NPX_PACKAGE_PATTERN: Option<Regex> = Regex::new(r"--package=(@?[^@]+)@(\S+)").ok();
    static ref VERSION_PATTERN: Option<Regex> = Regex::new(r"^v?(\d+(?:\.\d+)*)$").ok();
}

/// Where the available versions of a command come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    /// `npx --package=<package>@<version>` entrypoints.
    Npm { package: String },
    /// Tags of the image repository.
    Registry { image: String },
}

/// Picks the version source for `command`. Fails before any network access
/// when the versions cannot be determined.
pub fn version_source(command: &str, target: &CommandTarget) -> Result<VersionSource> {
    match target {
        CommandTarget::Managed(service) => service_version_source(command, service),
        CommandTarget::Unmanaged { .. } => Err(DockerizedError::VersionListingUnsupported {
            command: command.to_string(),
            reason: "it is not defined in any compose file".to_string(),
        }),
    }
}

fn service_version_source(command: &str, service: &ServiceConfig) -> Result<VersionSource> {
    let unsupported = |reason: &str| DockerizedError::VersionListingUnsupported {
        command: command.to_string(),
        reason: reason.to_string(),
    };

    let entrypoint = service.entrypoint_tokens();
    if entrypoint.first().map(String::as_str) == Some("npx") {
        let pattern = (*NPX_PACKAGE_PATTERN)
            .as_ref()
            .ok_or_else(|| DockerizedError::InvalidConfiguration("invalid npx package pattern".into()))?;
        return entrypoint[1..]
            .iter()
            .find_map(|token| pattern.captures(token))
            .map(|captures| VersionSource::Npm {
                package: captures[1].to_string(),
            })
            .ok_or_else(|| unsupported("its npx entrypoint does not name a package version"));
    }

    if service.has_build() {
        return Err(unsupported("it has a build step"));
    }

    match &service.image {
        Some(image) if !image.is_empty() => Ok(VersionSource::Registry {
            image: image.clone(),
        }),
        _ => Err(unsupported("it has no image")),
    }
}

#[derive(Debug, Deserialize)]
struct NpmPackument {
    #[serde(default)]
    versions: BTreeMap<String, serde_json::Value>,
}

/// Fetches raw version strings from npm or an OCI registry.
pub struct VersionLister {
    http: reqwest::Client,
    npm_registry: String,
}

impl VersionLister {
    pub fn new(env: &Environment) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("dockerized/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DockerizedError::RegistryError(format!("Failed to create http client: {}", e)))?;

        let npm_registry = env
            .get(NPM_REGISTRY_VAR)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_NPM_REGISTRY)
            .trim_end_matches('/')
            .to_string();

        Ok(Self { http, npm_registry })
    }

    pub async fn list(&self, source: &VersionSource) -> Result<Vec<String>> {
        match source {
            VersionSource::Npm { package } => self.npm_versions(package).await,
            VersionSource::Registry { image } => self.image_tags(image).await,
        }
    }

    async fn npm_versions(&self, package: &str) -> Result<Vec<String>> {
        let url = format!("{}/{}", self.npm_registry, package);
        info!("Fetching versions of {} from {}", package, url);

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, NPM_ACCEPT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DockerizedError::RegistryError(format!(
                "Failed to fetch package {}: HTTP {}",
                package,
                response.status()
            )));
        }

        let packument: NpmPackument = response.json().await?;
        Ok(packument.versions.into_keys().collect())
    }

    async fn image_tags(&self, image: &str) -> Result<Vec<String>> {
        let reference = parse_reference(image)?;
        info!(
            "Fetching tags of {}/{}",
            reference.registry(),
            reference.repository()
        );

        let client = Client::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        });

        let mut tags: Vec<String> = Vec::new();
        let mut last: Option<String> = None;
        for _ in 0..MAX_TAG_PAGES {
            let page = client
                .list_tags(
                    &reference,
                    &RegistryAuth::Anonymous,
                    Some(TAG_PAGE_SIZE),
                    last.as_deref(),
                )
                .await
                .map_err(|e| DockerizedError::RegistryError(format!("Failed to list tags of {}: {}", image, e)))?;

            debug!("Received {} tags", page.tags.len());
            let next = page.tags.last().cloned();
            if next.is_none() || next == last {
                break;
            }
            tags.extend(page.tags);
            last = next;
        }

        Ok(tags)
    }
}

fn parse_reference(image: &str) -> Result<Reference> {
    let without_tag = strip_tag(image);
    let first = without_tag.split('/').next().unwrap_or_default();
    let full_ref = if !without_tag.contains('/') {
        format!("docker.io/library/{}", without_tag)
    } else if !(first.contains('.') || first.contains(':') || first == "localhost") {
        format!("docker.io/{}", without_tag)
    } else {
        without_tag.to_string()
    };

    Reference::try_from(full_ref.as_str()).map_err(|e| {
        DockerizedError::InvalidConfiguration(format!("Invalid image reference '{}': {}", image, e))
    })
}

/// Drops `:tag` and `@digest` so only the repository remains.
fn strip_tag(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    match image.rfind(':') {
        Some(idx) if !image[idx..].contains('/') => &image[..idx],
        _ => image,
    }
}

/// A version string of dot-separated numbers, like `1.18.3`.
#[derive(Debug, Clone, Eq)]
pub struct ToolVersion {
    text: String,
    segments: Vec<u64>,
}

impl ToolVersion {
    /// Accepts `1`, `1.2.3` and `v1.2.3`; anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let pattern = (*VERSION_PATTERN).as_ref()?;
        let text = pattern.captures(raw)?.get(1)?.as_str().to_string();
        let segments = text
            .split('.')
            .map(str::parse)
            .collect::<std::result::Result<Vec<u64>, _>>()
            .ok()?;
        Some(Self { text, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// `major.minor`, with `.0` added for single-segment versions.
    pub fn group(&self) -> (u64, u64) {
        (self.segment(0), self.segment(1))
    }

    fn segment(&self, idx: usize) -> u64 {
        self.segments.get(idx).copied().unwrap_or(0)
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.segments.len().cmp(&other.segments.len()))
    }
}

/// Turns raw version strings into output lines: one line per major.minor
/// group, ascending, versions comma-separated.
pub fn group_versions(command: &str, raw_versions: &[String]) -> Result<Vec<String>> {
    let versions: BTreeSet<ToolVersion> = raw_versions
        .iter()
        .filter_map(|raw| ToolVersion::parse(raw))
        .collect();

    if versions.is_empty() {
        let found: BTreeSet<&String> = raw_versions.iter().collect();
        return Err(DockerizedError::NoParseableVersions {
            command: command.to_string(),
            found: found.into_iter().cloned().collect(),
        });
    }

    let mut groups: BTreeMap<(u64, u64), Vec<&str>> = BTreeMap::new();
    for version in &versions {
        groups.entry(version.group()).or_default().push(version.as_str());
    }

    Ok(groups.values().map(|group| group.join(", ")).collect())
}
