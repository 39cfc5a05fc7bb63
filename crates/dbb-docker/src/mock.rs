//! In-memory runtime and command runner for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::DuplexStream;

use crate::api::{
    AttachStream, ByteStream, ContainerSpec, ContainerSummary, DockerApi, ImageSummary,
};
use crate::error::{DockerError, Result};
use crate::init::{CommandLine, CommandRunner};

/// A call made against [`MockDocker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerCall {
    Info,
    ListImages,
    ListContainers,
    Build(String),
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    InspectContainer(String),
    InspectImage(String),
    Logs(String),
    Attach(String),
    Resize(String, u16, u16),
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    image: String,
    spec: Option<ContainerSpec>,
    running: bool,
    exit_code: i64,
}

#[derive(Debug, Default)]
struct MockState {
    images: Vec<ImageSummary>,
    containers: BTreeMap<String, MockContainer>,
    calls: Vec<DockerCall>,
    build_output: Vec<Bytes>,
    log_output: Vec<Bytes>,
    exit_code: i64,
    fail_start: bool,
    fail_logs: bool,
    attach_peer: Option<DuplexStream>,
    next_id: u64,
}

/// In-memory container runtime recording every call.
#[derive(Debug, Default)]
pub struct MockDocker {
    state: Mutex<MockState>,
}

fn poisoned() -> DockerError {
    DockerError::Transport("lock poisoned".to_owned())
}

fn not_found(kind: &str, name: &str) -> DockerError {
    DockerError::ApiError {
        status: 404,
        message: format!("No such {kind}: {name}"),
    }
}

impl MockDocker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
        self
    }

    /// Add an image with a single tag.
    #[must_use]
    pub fn with_image(self, tag: &str) -> Self {
        self.with_state(|state| {
            state.next_id += 1;
            state.images.push(ImageSummary {
                id: format!("sha256:{:064x}", state.next_id),
                repo_tags: Some(vec![tag.to_owned()]),
            });
        })
    }

    /// Add a container, running or stopped.
    #[must_use]
    pub fn with_container(self, name: &str, running: bool) -> Self {
        self.with_state(|state| {
            state.next_id += 1;
            state.containers.insert(
                name.to_owned(),
                MockContainer {
                    id: format!("{:064x}", state.next_id),
                    image: name.to_owned(),
                    spec: None,
                    running,
                    exit_code: 0,
                },
            );
        })
    }

    /// Chunks returned by the next image builds.
    #[must_use]
    pub fn with_build_output(self, chunks: &[&str]) -> Self {
        self.with_state(|state| {
            state.build_output = chunks
                .iter()
                .map(|c| Bytes::copy_from_slice(c.as_bytes()))
                .collect();
        })
    }

    /// Chunks returned when following container logs.
    #[must_use]
    pub fn with_logs(self, chunks: &[&str]) -> Self {
        self.with_state(|state| {
            state.log_output = chunks
                .iter()
                .map(|c| Bytes::copy_from_slice(c.as_bytes()))
                .collect();
        })
    }

    /// Exit code containers report once their logs have been followed.
    #[must_use]
    pub fn with_exit_code(self, code: i64) -> Self {
        self.with_state(|state| state.exit_code = code)
    }

    /// Make every start request fail.
    #[must_use]
    pub fn failing_start(self) -> Self {
        self.with_state(|state| state.fail_start = true)
    }

    /// Make every log request fail.
    #[must_use]
    pub fn failing_logs(self) -> Self {
        self.with_state(|state| state.fail_logs = true)
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<DockerCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DockerCall) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    /// Creation parameters of a container made through the API.
    #[must_use]
    pub fn created_spec(&self, name: &str) -> Option<ContainerSpec> {
        let state = self.state.lock().ok()?;
        state.containers.get(name)?.spec.clone()
    }

    /// Whether the named container exists and is running.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.containers.get(name).map(|c| c.running))
            .unwrap_or(false)
    }

    /// Container side of the last attach session.
    #[must_use]
    pub fn take_attach_peer(&self) -> Option<DuplexStream> {
        self.state.lock().ok()?.attach_peer.take()
    }

    fn record(&self, call: DockerCall) -> Result<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.calls.push(call);
        Ok(state)
    }
}

fn chunk_stream(chunks: Vec<Bytes>) -> ByteStream {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl DockerApi for MockDocker {
    async fn info(&self) -> Result<Value> {
        let state = self.record(DockerCall::Info)?;
        Ok(json!({
            "ServerVersion": "mock",
            "Containers": state.containers.len(),
            "Images": state.images.len(),
        }))
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let state = self.record(DockerCall::ListImages)?;
        Ok(state.images.clone())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let state = self.record(DockerCall::ListContainers)?;
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| all || c.running)
            .map(|(name, c)| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{name}")],
                image: c.image.clone(),
                state: if c.running { "running" } else { "exited" }.to_owned(),
                status: String::new(),
            })
            .collect())
    }

    async fn build_image(&self, _context: Bytes, tag: &str) -> Result<ByteStream> {
        let mut state = self.record(DockerCall::Build(tag.to_owned()))?;
        let tag = format!("{tag}:latest");
        if !state.images.iter().any(|i| i.tags().contains(&tag)) {
            state.next_id += 1;
            let id = format!("sha256:{:064x}", state.next_id);
            state.images.push(ImageSummary {
                id,
                repo_tags: Some(vec![tag]),
            });
        }
        Ok(chunk_stream(state.build_output.clone()))
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.record(DockerCall::Create(name.to_owned()))?;
        if state.containers.contains_key(name) {
            return Err(DockerError::ApiError {
                status: 409,
                message: format!("Conflict. The container name \"/{name}\" is already in use"),
            });
        }
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.insert(
            name.to_owned(),
            MockContainer {
                id: id.clone(),
                image: spec.image.clone(),
                spec: Some(spec.clone()),
                running: false,
                exit_code: 0,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut state = self.record(DockerCall::Start(name.to_owned()))?;
        let fail = state.fail_start;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        if fail {
            return Err(DockerError::ApiError {
                status: 500,
                message: "cannot start container".to_owned(),
            });
        }
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let mut state = self.record(DockerCall::Stop(name.to_owned()))?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.record(DockerCall::Remove(name.to_owned()))?;
        match state.containers.get(name) {
            None => Err(not_found("container", name)),
            Some(c) if c.running => Err(DockerError::ApiError {
                status: 409,
                message: format!("You cannot remove a running container {}", c.id),
            }),
            Some(_) => {
                state.containers.remove(name);
                Ok(())
            }
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<Value> {
        let state = self.record(DockerCall::InspectContainer(name.to_owned()))?;
        let c = state
            .containers
            .get(name)
            .ok_or_else(|| not_found("container", name))?;
        Ok(json!({
            "Id": c.id,
            "Name": format!("/{name}"),
            "Image": c.image,
            "State": {
                "Running": c.running,
                "ExitCode": c.exit_code,
                "Status": if c.running { "running" } else { "exited" },
            },
        }))
    }

    async fn inspect_image(&self, name: &str) -> Result<Value> {
        let state = self.record(DockerCall::InspectImage(name.to_owned()))?;
        let tag = format!("{name}:latest");
        let image = state
            .images
            .iter()
            .find(|i| i.tags().contains(&tag))
            .ok_or_else(|| not_found("image", name))?;
        Ok(json!({ "Id": image.id, "RepoTags": image.tags() }))
    }

    async fn logs(&self, name: &str) -> Result<ByteStream> {
        let mut state = self.record(DockerCall::Logs(name.to_owned()))?;
        if state.fail_logs {
            return Err(DockerError::Transport("connection reset".to_owned()));
        }
        let exit_code = state.exit_code;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        container.running = false;
        container.exit_code = exit_code;
        Ok(chunk_stream(state.log_output.clone()))
    }

    async fn attach(&self, name: &str) -> Result<AttachStream> {
        let mut state = self.record(DockerCall::Attach(name.to_owned()))?;
        if !state.containers.contains_key(name) {
            return Err(not_found("container", name));
        }
        let (local, peer) = tokio::io::duplex(1024);
        state.attach_peer = Some(peer);
        Ok(Box::new(local))
    }

    async fn resize_tty(&self, name: &str, width: u16, height: u16) -> Result<()> {
        self.record(DockerCall::Resize(name.to_owned(), width, height))?;
        Ok(())
    }
}

/// Command runner that records commands instead of running them.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<CommandLine>>,
    fail_program: Option<String>,
}

impl RecordingRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every invocation of `program`.
    #[must_use]
    pub fn failing(program: &str) -> Self {
        Self {
            commands: Mutex::default(),
            fail_program: Some(program.to_owned()),
        }
    }

    /// Commands run so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandLine> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandLine) -> Result<()> {
        self.commands
            .lock()
            .map_err(|_| poisoned())?
            .push(command.clone());

        if self.fail_program.as_deref() == Some(command.program.as_str()) {
            return Err(DockerError::CommandFailed {
                command: command.to_string(),
                reason: "exit status: 1".to_owned(),
            });
        }
        Ok(())
    }
}
