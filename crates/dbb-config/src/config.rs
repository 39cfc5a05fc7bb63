//! Configuration provider for dbb.
//!
//! Configuration is loaded in the following order (later sources override earlier):
//! 1. Default values
//! 2. The YAML configuration file (usually `config.yaml` at the top of the tree)
//! 3. Environment variables with `DBB_` prefix (nested keys split on `__`)
//!
//! A loaded [`DbbConfig`] is resolved for exactly one worker, chosen either
//! explicitly or by matching this machine's hostname against each worker's
//! `host`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::worker::WorkerConfig;

/// Contents of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Mount point of the project tree inside the container.
    #[serde(default = "default_container_dir")]
    pub container_dir: PathBuf,

    /// User id for the container process and build context files.
    pub uid: Option<u32>,

    /// Group id for build context files.
    pub gid: Option<u32>,

    /// Maintainer name for the image and worker info.
    #[serde(default = "default_maintainer_name")]
    pub maintainer_name: String,

    /// Maintainer email for the image and worker info.
    #[serde(default = "default_maintainer_email")]
    pub maintainer_email: String,

    /// SSH public keys installed in the container.
    #[serde(default)]
    pub maintainer_keys: Vec<String>,

    /// Debian mirror used by the image build.
    #[serde(default = "default_debian_mirror")]
    pub debian_mirror: String,

    /// HTTP proxy used by the image build.
    #[serde(default)]
    pub http_proxy: String,

    /// Buildbot master name.
    pub master_name: Option<String>,

    /// Host running the Buildbot master.
    pub master_host: Option<String>,

    /// Path of the `dbb` executable as seen from inside the container.
    pub dbb_executable: Option<PathBuf>,

    /// SSH authorized keys file inside the container.
    #[serde(default = "default_authorized_keys")]
    pub authorized_keys: PathBuf,

    /// Docker daemon connection.
    #[serde(default)]
    pub docker: DockerSettings,

    /// Published host ports.
    #[serde(default)]
    pub ports: PortSettings,

    /// DigitalOcean account settings.
    #[serde(default)]
    pub digitalocean: DigitalOceanSettings,

    /// Worker definitions keyed by worker name.
    #[serde(default, alias = "slaves")]
    pub workers: BTreeMap<String, WorkerConfig>,
}

fn default_container_dir() -> PathBuf {
    PathBuf::from("/home/docker/bb")
}

fn default_maintainer_name() -> String {
    "John Doe".to_owned()
}

fn default_maintainer_email() -> String {
    "jdoe@example.com".to_owned()
}

fn default_debian_mirror() -> String {
    "httpredir.debian.org".to_owned()
}

fn default_authorized_keys() -> PathBuf {
    PathBuf::from("/home/docker/.ssh/authorized_keys")
}

/// Docker daemon connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSettings {
    /// Path to the daemon's control socket.
    #[serde(default = "default_docker_socket")]
    pub socket: PathBuf,

    /// API version, or `auto` to negotiate with the daemon.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_api_version() -> String {
    "auto".to_owned()
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            api_version: default_api_version(),
        }
    }
}

/// Host ports published for the container's web, worker and SSH ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Host port for the Buildbot web UI (container port 8010).
    #[serde(default = "default_web_port")]
    pub web: u16,

    /// Host port for worker connections (container port 9989).
    #[serde(default = "default_worker_port")]
    pub worker: u16,

    /// Host port for SSH (container port 22).
    #[serde(default = "default_ssh_port")]
    pub ssh: u16,
}

const fn default_web_port() -> u16 {
    80
}

const fn default_worker_port() -> u16 {
    9989
}

const fn default_ssh_port() -> u16 {
    2222
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            web: default_web_port(),
            worker: default_worker_port(),
            ssh: default_ssh_port(),
        }
    }
}

/// DigitalOcean account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalOceanSettings {
    /// API token.
    pub token: Option<String>,

    /// API base URL.
    #[serde(default = "default_digitalocean_url")]
    pub api_url: String,

    /// Seconds between droplet status polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_digitalocean_url() -> String {
    "https://api.digitalocean.com/v2".to_owned()
}

const fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for DigitalOceanSettings {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_digitalocean_url(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl DigitalOceanSettings {
    /// The API token.
    pub fn token(&self) -> ConfigResult<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| ConfigError::missing("digitalocean.token"))
    }
}

/// Configuration resolved for a single worker.
#[derive(Debug, Clone)]
pub struct DbbConfig {
    file: ConfigFile,
    config_path: PathBuf,
    base_dir: PathBuf,
    worker_name: String,
    worker: WorkerConfig,
}

impl DbbConfig {
    /// Load configuration from a YAML file and resolve a worker.
    ///
    /// `worker` selects the worker by name; when `None` the worker whose
    /// `host` matches this machine's hostname is used.
    pub fn load(path: impl AsRef<Path>, worker: Option<&str>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let file: ConfigFile = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("DBB_").split("__"))
            .extract()?;

        let config_path = path.canonicalize()?;
        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        debug!(path = %config_path.display(), "configuration loaded");
        Self::resolve(file, config_path, base_dir, worker)
    }

    /// Build configuration from YAML text, treating `base_dir` as the tree root.
    pub fn from_yaml_str(
        yaml: &str,
        base_dir: impl Into<PathBuf>,
        worker: Option<&str>,
    ) -> ConfigResult<Self> {
        let file: ConfigFile = Figment::new().merge(Yaml::string(yaml)).extract()?;
        let base_dir = base_dir.into();
        let config_path = base_dir.join("config.yaml");
        Self::resolve(file, config_path, base_dir, worker)
    }

    fn resolve(
        file: ConfigFile,
        config_path: PathBuf,
        base_dir: PathBuf,
        worker: Option<&str>,
    ) -> ConfigResult<Self> {
        let worker_name = match worker {
            Some(name) => name.to_owned(),
            None => worker_for_host(&file.workers, &system_hostname()?)?,
        };

        let worker = file
            .workers
            .get(&worker_name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownWorker(worker_name.clone()))?;

        Ok(Self {
            file,
            config_path,
            base_dir,
            worker_name,
            worker,
        })
    }

    /// Name of the selected worker. Used as container name, hostname and image tag.
    #[must_use]
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Settings of the selected worker.
    #[must_use]
    pub const fn worker(&self) -> &WorkerConfig {
        &self.worker
    }

    /// Host of the selected worker.
    #[must_use]
    pub fn worker_host(&self) -> &str {
        self.worker.host_or(&self.worker_name)
    }

    /// Absolute path of the configuration file.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Top of the project tree (directory holding the configuration file).
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Template directory.
    #[must_use]
    pub fn lib_dir(&self) -> PathBuf {
        self.base_dir.join("lib")
    }

    /// Buildbot master directory.
    #[must_use]
    pub fn master_dir(&self) -> PathBuf {
        self.base_dir.join("master")
    }

    /// Buildbot worker directory.
    #[must_use]
    pub fn worker_dir(&self) -> PathBuf {
        self.base_dir.join("slave")
    }

    /// Mount point of the tree inside the container.
    #[must_use]
    pub fn container_dir(&self) -> &Path {
        &self.file.container_dir
    }

    /// Path of the configuration file as seen from inside the container.
    #[must_use]
    pub fn container_config_path(&self) -> PathBuf {
        match self.config_path.file_name() {
            Some(name) => self.file.container_dir.join(name),
            None => self.file.container_dir.join("config.yaml"),
        }
    }

    /// Path of the `dbb` executable inside the container.
    #[must_use]
    pub fn dbb_executable(&self) -> PathBuf {
        self.file
            .dbb_executable
            .clone()
            .unwrap_or_else(|| self.file.container_dir.join("bin/dbb"))
    }

    /// Supervisord configuration directory inside the container.
    #[must_use]
    pub fn supervisord_conf(&self) -> PathBuf {
        self.file.container_dir.join("lib/supervisord.conf.d")
    }

    /// Configured uid, defaulting to the current process uid.
    #[must_use]
    pub fn uid(&self) -> u32 {
        self.file
            .uid
            .unwrap_or_else(|| nix::unistd::getuid().as_raw())
    }

    /// Configured gid, defaulting to the current process gid.
    #[must_use]
    pub fn gid(&self) -> u32 {
        self.file
            .gid
            .unwrap_or_else(|| nix::unistd::getgid().as_raw())
    }

    /// Maintainer name.
    #[must_use]
    pub fn maintainer_name(&self) -> &str {
        &self.file.maintainer_name
    }

    /// Maintainer email.
    #[must_use]
    pub fn maintainer_email(&self) -> &str {
        &self.file.maintainer_email
    }

    /// Maintainer SSH public keys.
    #[must_use]
    pub fn maintainer_keys(&self) -> &[String] {
        &self.file.maintainer_keys
    }

    /// SSH authorized keys file inside the container.
    #[must_use]
    pub fn authorized_keys(&self) -> &Path {
        &self.file.authorized_keys
    }

    /// Host running the Buildbot master.
    pub fn master_host(&self) -> ConfigResult<&str> {
        self.file
            .master_host
            .as_deref()
            .ok_or_else(|| ConfigError::missing("master_host"))
    }

    /// Docker daemon connection settings.
    #[must_use]
    pub const fn docker(&self) -> &DockerSettings {
        &self.file.docker
    }

    /// Published host ports.
    #[must_use]
    pub const fn ports(&self) -> PortSettings {
        self.file.ports
    }

    /// DigitalOcean account settings.
    #[must_use]
    pub const fn digitalocean(&self) -> &DigitalOceanSettings {
        &self.file.digitalocean
    }

    /// Name of the Docker host: `$HOSTNAME`, or the system hostname.
    pub fn host(&self) -> ConfigResult<String> {
        match std::env::var("HOSTNAME") {
            Ok(name) if !name.is_empty() => Ok(name),
            _ => system_hostname(),
        }
    }

    /// Substitutions available to the build templates.
    #[must_use]
    pub fn subs(&self) -> BTreeMap<String, String> {
        let entries = [
            ("hostname", self.worker_name.clone()),
            ("base_dir", self.base_dir.display().to_string()),
            ("container_dir", self.file.container_dir.display().to_string()),
            ("lib_dir", self.lib_dir().display().to_string()),
            ("debian_mirror", self.file.debian_mirror.clone()),
            ("http_proxy", self.file.http_proxy.clone()),
            ("uid", self.uid().to_string()),
            ("gid", self.gid().to_string()),
            ("base_image", self.worker.base_image.clone()),
            ("tcl_ver", self.worker.tcl_ver.clone()),
            ("parallel_jobs", self.worker.parallel_jobs.to_string()),
            ("maintainer_name", self.file.maintainer_name.clone()),
            ("maintainer_email", self.file.maintainer_email.clone()),
            ("supervisord_conf", self.supervisord_conf().display().to_string()),
            ("master_name", self.file.master_name.clone().unwrap_or_default()),
            ("master_host", self.file.master_host.clone().unwrap_or_default()),
            ("master_dir", self.master_dir().display().to_string()),
            ("slave_dir", self.worker_dir().display().to_string()),
        ];

        entries
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect()
    }

    /// Pretty-printed dump of the file contents and the selected worker.
    pub fn dump(&self) -> ConfigResult<String> {
        let dump = serde_json::json!({
            "config_path": self.config_path,
            "base_dir": self.base_dir,
            "worker_name": self.worker_name,
            "worker": self.worker,
            "config": self.file,
        });
        serde_json::to_string_pretty(&dump).map_err(|e| ConfigError::invalid(e.to_string()))
    }
}

/// The machine's hostname.
pub fn system_hostname() -> ConfigResult<String> {
    nix::unistd::gethostname()
        .map_err(|e| ConfigError::Io(e.into()))?
        .into_string()
        .map_err(|_| ConfigError::invalid("hostname is not valid UTF-8"))
}

fn worker_for_host(workers: &BTreeMap<String, WorkerConfig>, hostname: &str) -> ConfigResult<String> {
    let mut matches = workers
        .iter()
        .filter(|(name, worker)| worker.host_or(name) == hostname)
        .map(|(name, _)| name.clone());

    match (matches.next(), matches.next()) {
        (Some(name), None) => Ok(name),
        (Some(_), Some(_)) => Err(ConfigError::invalid(format!(
            "several workers are configured for host '{hostname}'; select one explicitly"
        ))),
        (None, _) => Err(ConfigError::NoWorkerForHost(hostname.to_owned())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::worker::WorkerKind;

    const CONFIG: &str = r#"
master_name: dbb
master_host: master.example
uid: 1000
gid: 1000
maintainer_name: Jane Doe
maintainer_email: jane@example.com
maintainer_keys:
  - ssh-rsa AAA
slaves:
  ci1:
    host: ci1.example
    password: secret
  cloud1:
    slave_type: DigitalOcean
    password: secret
    image: dbb-snapshot
    size_slug: s-1vcpu-1gb
    region: nyc3
"#;

    #[test]
    fn defaults_are_applied() {
        let config = DbbConfig::from_yaml_str(CONFIG, "/srv/bb", Some("ci1")).unwrap();
        assert_eq!(config.container_dir(), Path::new("/home/docker/bb"));
        assert_eq!(config.ports(), PortSettings::default());
        assert_eq!(config.docker().socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(config.docker().api_version, "auto");
        assert_eq!(config.digitalocean().poll_interval_secs, 5);
        assert_eq!(
            config.authorized_keys(),
            Path::new("/home/docker/.ssh/authorized_keys")
        );
        assert_eq!(config.dbb_executable(), PathBuf::from("/home/docker/bb/bin/dbb"));
    }

    #[test]
    fn derived_paths_follow_base_dir() {
        let config = DbbConfig::from_yaml_str(CONFIG, "/srv/bb", Some("ci1")).unwrap();
        assert_eq!(config.lib_dir(), PathBuf::from("/srv/bb/lib"));
        assert_eq!(config.master_dir(), PathBuf::from("/srv/bb/master"));
        assert_eq!(config.worker_dir(), PathBuf::from("/srv/bb/slave"));
        assert_eq!(
            config.container_config_path(),
            PathBuf::from("/home/docker/bb/config.yaml")
        );
    }

    #[test]
    fn selects_named_worker() {
        let config = DbbConfig::from_yaml_str(CONFIG, "/srv/bb", Some("cloud1")).unwrap();
        assert_eq!(config.worker_name(), "cloud1");
        assert_eq!(config.worker_host(), "cloud1");
        assert!(matches!(config.worker().kind, WorkerKind::DigitalOcean(_)));
    }

    #[test]
    fn unknown_worker_is_rejected() {
        let err = DbbConfig::from_yaml_str(CONFIG, "/srv/bb", Some("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownWorker(name) if name == "nope"));
    }

    #[test]
    fn missing_master_host_is_reported() {
        let yaml = "workers:\n  ci1:\n    password: pw\n";
        let config = DbbConfig::from_yaml_str(yaml, "/srv/bb", Some("ci1")).unwrap();
        assert!(matches!(config.master_host(), Err(ConfigError::Missing(_))));
        assert!(matches!(config.digitalocean().token(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn worker_for_host_requires_unique_match() {
        let file: ConfigFile = Figment::new().merge(Yaml::string(CONFIG)).extract().unwrap();
        assert_eq!(worker_for_host(&file.workers, "ci1.example").unwrap(), "ci1");
        assert_eq!(worker_for_host(&file.workers, "cloud1").unwrap(), "cloud1");
        assert!(matches!(
            worker_for_host(&file.workers, "elsewhere"),
            Err(ConfigError::NoWorkerForHost(_))
        ));
    }

    #[test]
    fn subs_cover_template_keys() {
        let config = DbbConfig::from_yaml_str(CONFIG, "/srv/bb", Some("ci1")).unwrap();
        let subs = config.subs();
        assert_eq!(subs["hostname"], "ci1");
        assert_eq!(subs["uid"], "1000");
        assert_eq!(subs["base_image"], "debian:jessie");
        assert_eq!(subs["master_host"], "master.example");
        assert_eq!(subs["slave_dir"], "/srv/bb/slave");
        assert_eq!(subs["supervisord_conf"], "/home/docker/bb/lib/supervisord.conf.d");
    }

    #[test]
    fn load_reads_file_and_resolves_base_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = DbbConfig::load(&path, Some("ci1")).unwrap();
        assert_eq!(config.base_dir(), dir.path().canonicalize().unwrap());
        assert_eq!(config.maintainer_name(), "Jane Doe");
        assert_eq!(config.maintainer_keys(), ["ssh-rsa AAA".to_owned()]);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = DbbConfig::load("/nonexistent/config.yaml", Some("ci1")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
