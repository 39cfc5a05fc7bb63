//! Container runtime API surface.
//!
//! [`DockerApi`] is the set of daemon calls the lifecycle manager needs.
//! [`crate::DockerClient`] implements it over the daemon's Unix socket and
//! [`crate::mock::MockDocker`] in memory.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Stream of raw output chunks (build progress, container logs).
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Bidirectional byte stream of an attached container TTY.
pub trait AttachIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AttachIo for T {}

/// Boxed attach stream.
pub type AttachStream = Box<dyn AttachIo>;

/// Image entry from the daemon's image list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
}

impl ImageSummary {
    /// Repository tags (the daemon reports `null` for untagged images).
    #[must_use]
    pub fn tags(&self) -> &[String] {
        self.repo_tags.as_deref().unwrap_or_default()
    }
}

/// Container entry from the daemon's container list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
}

impl ContainerSummary {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// First 12 characters of the container id.
    #[must_use]
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Abbreviated object id, as the Docker CLI prints it.
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// `State` section of a container inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub status: String,
}

/// A container port published on a host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
}

/// A host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

impl Bind {
    /// Read-write bind of `host_path` at `container_path`.
    pub fn rw(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// `host:container:mode` form used by the daemon.
    #[must_use]
    pub fn to_spec(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{mode}",
            self.host_path.display(),
            self.container_path.display()
        )
    }
}

/// Parameters for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: String,
    pub user: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub ports: Vec<PortBinding>,
    pub binds: Vec<Bind>,
    pub privileged: bool,
    pub open_stdin: bool,
    pub tty: bool,
}

impl ContainerSpec {
    /// Body of the daemon's create-container request.
    #[must_use]
    pub fn to_create_body(&self) -> Value {
        let mut exposed = serde_json::Map::new();
        let mut port_bindings = serde_json::Map::new();
        for port in &self.ports {
            let key = format!("{}/tcp", port.container_port);
            exposed.insert(key.clone(), serde_json::json!({}));
            port_bindings.insert(
                key,
                serde_json::json!([{ "HostIp": "", "HostPort": port.host_port.to_string() }]),
            );
        }

        let volumes: serde_json::Map<String, Value> = self
            .binds
            .iter()
            .map(|b| (b.container_path.display().to_string(), serde_json::json!({})))
            .collect();
        let binds: Vec<String> = self.binds.iter().map(Bind::to_spec).collect();

        serde_json::json!({
            "Image": self.image,
            "Hostname": self.hostname,
            "User": self.user,
            "Cmd": self.cmd,
            "Env": self.env,
            "AttachStdin": false,
            "AttachStdout": false,
            "AttachStderr": false,
            "OpenStdin": self.open_stdin,
            "StdinOnce": false,
            "Tty": self.tty,
            "ExposedPorts": exposed,
            "Volumes": volumes,
            "HostConfig": {
                "Binds": binds,
                "PortBindings": port_bindings,
                "Privileged": self.privileged,
            },
        })
    }
}

/// Calls the lifecycle manager makes against the container runtime.
#[async_trait]
pub trait DockerApi: Send + Sync {
    /// Daemon-wide information.
    async fn info(&self) -> Result<Value>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// List containers; `all` includes stopped ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    /// Build an image from a tar context, tagged `tag`, streaming progress.
    async fn build_image(&self, context: Bytes, tag: &str) -> Result<ByteStream>;

    /// Create a container named `name`; returns its id.
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    async fn inspect_container(&self, name: &str) -> Result<Value>;

    async fn inspect_image(&self, name: &str) -> Result<Value>;

    /// Follow the container's output until it exits.
    async fn logs(&self, name: &str) -> Result<ByteStream>;

    /// Attach to the container's TTY (stdin, stdout and stderr).
    async fn attach(&self, name: &str) -> Result<AttachStream>;

    /// Resize the container's TTY.
    async fn resize_tty(&self, name: &str, width: u16, height: u16) -> Result<()>;

    /// Typed `State` section of [`DockerApi::inspect_container`].
    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        let mut inspect = self.inspect_container(name).await?;
        let state = inspect
            .get_mut("State")
            .map(Value::take)
            .unwrap_or(Value::Null);
        if state.is_null() {
            return Ok(ContainerState::default());
        }
        Ok(serde_json::from_value(state)?)
    }
}
