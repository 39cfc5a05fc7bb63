//! Per-worker settings.
//!
//! Each entry under `workers` (historically `slaves`) describes one CI
//! worker. The `worker_type` tag selects a [`WorkerKind`]; kind-specific
//! fields are validated when the raw map is converted, so a resolved
//! [`WorkerConfig`] only carries the fields its kind needs.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Settings for one CI worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawWorker")]
pub struct WorkerConfig {
    /// Host the worker lives on. Defaults to the worker name.
    pub host: Option<String>,

    /// Password the worker uses to connect to the master.
    pub password: Option<String>,

    /// Base image the worker's Docker image is built from.
    pub base_image: String,

    /// Tcl version installed in the image.
    pub tcl_ver: String,

    /// Build flavors this worker supports.
    pub flavors: Vec<String>,

    /// Parallel make jobs.
    pub parallel_jobs: u32,

    /// Where and how the worker runs.
    pub kind: WorkerKind,
}

/// How a worker is hosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "worker_type")]
pub enum WorkerKind {
    /// A long-lived container on a fixed host.
    #[serde(rename = "vanilla")]
    Vanilla,

    /// A latent worker substantiated on demand as a DigitalOcean droplet.
    DigitalOcean(DropletSettings),
}

/// Droplet parameters for a [`WorkerKind::DigitalOcean`] worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropletSettings {
    /// Name of the account-owned image (snapshot) to boot.
    pub image: String,
    /// Droplet size slug, e.g. `s-2vcpu-4gb`.
    pub size_slug: String,
    /// Region slug, e.g. `nyc3`.
    pub region: String,
    /// Enable provider backups.
    pub backups: bool,
}

impl WorkerConfig {
    /// The worker's host, falling back to `name` when unset.
    #[must_use]
    pub fn host_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.host.as_deref().unwrap_or(name)
    }

    /// The worker password.
    pub fn password(&self) -> ConfigResult<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| ConfigError::missing("password"))
    }

    /// Whether the worker is built with the given flavor.
    #[must_use]
    pub fn has_flavor(&self, flavor: &str) -> bool {
        self.flavors.iter().any(|f| f == flavor)
    }

    /// Droplet settings, if this is a DigitalOcean worker.
    #[must_use]
    pub fn droplet(&self) -> Option<&DropletSettings> {
        match &self.kind {
            WorkerKind::DigitalOcean(settings) => Some(settings),
            WorkerKind::Vanilla => None,
        }
    }
}

/// Worker kind tag as it appears in the configuration file.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
enum WorkerType {
    #[default]
    #[serde(rename = "vanilla")]
    Vanilla,
    #[serde(rename = "DigitalOcean", alias = "digitalocean")]
    DigitalOcean,
}

/// Worker map as written in the configuration file.
#[derive(Debug, Deserialize)]
struct RawWorker {
    host: Option<String>,
    password: Option<String>,
    #[serde(default = "default_base_image")]
    base_image: String,
    #[serde(default = "default_tcl_ver")]
    tcl_ver: String,
    #[serde(default = "default_flavors")]
    flavors: Vec<String>,
    #[serde(default = "default_parallel_jobs")]
    parallel_jobs: u32,
    #[serde(default, alias = "slave_type")]
    worker_type: WorkerType,
    image: Option<String>,
    size_slug: Option<String>,
    region: Option<String>,
    #[serde(default)]
    backups: bool,
}

fn default_base_image() -> String {
    "debian:jessie".to_owned()
}

fn default_tcl_ver() -> String {
    "8.6".to_owned()
}

fn default_flavors() -> Vec<String> {
    vec!["posix".to_owned()]
}

const fn default_parallel_jobs() -> u32 {
    1
}

impl TryFrom<RawWorker> for WorkerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawWorker) -> Result<Self, Self::Error> {
        let kind = match raw.worker_type {
            WorkerType::Vanilla => WorkerKind::Vanilla,
            WorkerType::DigitalOcean => WorkerKind::DigitalOcean(DropletSettings {
                image: raw.image.ok_or_else(|| ConfigError::missing("image"))?,
                size_slug: raw
                    .size_slug
                    .ok_or_else(|| ConfigError::missing("size_slug"))?,
                region: raw.region.ok_or_else(|| ConfigError::missing("region"))?,
                backups: raw.backups,
            }),
        };

        Ok(Self {
            host: raw.host,
            password: raw.password,
            base_image: raw.base_image,
            tcl_ver: raw.tcl_ver,
            flavors: raw.flavors,
            parallel_jobs: raw.parallel_jobs,
            kind,
        })
    }
}
