//! Container lifecycle for one worker.
//!
//! Every operation checks its precondition against a freshly fetched view of
//! the runtime before issuing any mutating call. Nothing about existence or
//! running state is kept between calls: the container may have crashed or
//! been removed by someone else since the last look.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use dbb_config::{DbbConfig, DockerContext};

use crate::api::{
    short_id, AttachStream, Bind, ContainerSpec, ContainerSummary, DockerApi, ImageSummary,
    PortBinding,
};
use crate::error::{DockerError, Result};
use crate::init::{CommandRunner, Initializer, SystemRunner};
use crate::normalise::{build_error, normalise_line, LineSplitter};

/// Environment variable marking the target container; its value is the
/// worker name.
pub const CONTAINER_MARKER: &str = "DBB_CONTAINER";

const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

const WEB_PORT: u16 = 8010;
const WORKER_PORT: u16 = 9989;
const SSH_PORT: u16 = 22;

/// Command run in the container when none is given: supervisord in the
/// foreground under passwordless sudo.
#[must_use]
pub fn default_command() -> Vec<String> {
    [
        "/usr/bin/sudo",
        "-n",
        "/usr/bin/supervisord",
        "-n",
        "-c",
        "/etc/supervisor/supervisord.conf",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// What [`ContainerManager::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new container was created and started.
    Created { id: String },
    /// An existing stopped container was started again.
    Restarted,
}

/// Diagnostic snapshot of the runtime, the container and the image.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpReport {
    pub info: Value,
    pub container: Option<Value>,
    pub image: Option<Value>,
}

impl fmt::Display for DumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_section(f, "Docker", Some(&self.info))?;
        write_section(f, "Container", self.container.as_ref())?;
        write_section(f, "Image", self.image.as_ref())
    }
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str, value: Option<&Value>) -> fmt::Result {
    writeln!(f, "{title}:")?;
    match value {
        Some(value) => {
            let pretty = serde_json::to_string_pretty(value).map_err(|_| fmt::Error)?;
            writeln!(f, "{pretty}")
        }
        None => writeln!(f, "    (none)"),
    }
}

/// Drives the worker's container through build, run, stop and remove.
pub struct ContainerManager<D> {
    docker: D,
    config: DbbConfig,
    in_container: bool,
    runner: Arc<dyn CommandRunner>,
}

impl<D> fmt::Debug for ContainerManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerManager")
            .field("worker", &self.config.worker_name())
            .field("in_container", &self.in_container)
            .finish_non_exhaustive()
    }
}

impl<D: DockerApi> ContainerManager<D> {
    /// Create a manager for the configured worker.
    ///
    /// Whether this process runs inside the target container is read from
    /// [`CONTAINER_MARKER`].
    pub fn new(docker: D, config: DbbConfig) -> Self {
        let in_container = std::env::var(CONTAINER_MARKER)
            .is_ok_and(|value| value == config.worker_name());
        Self {
            docker,
            config,
            in_container,
            runner: Arc::new(SystemRunner),
        }
    }

    /// Override detection of the target container.
    #[must_use]
    pub fn with_in_container(mut self, in_container: bool) -> Self {
        self.in_container = in_container;
        self
    }

    /// Use `runner` for the initialization commands.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn docker(&self) -> &D {
        &self.docker
    }

    pub fn config(&self) -> &DbbConfig {
        &self.config
    }

    /// Worker name: container name, hostname and image tag.
    pub fn name(&self) -> &str {
        self.config.worker_name()
    }

    pub fn is_in_container(&self) -> bool {
        self.in_container
    }

    /// The worker's image, if built.
    pub async fn image(&self) -> Result<Option<ImageSummary>> {
        let tag = format!("{}:latest", self.name());
        let images = self.docker.list_images().await?;
        Ok(images.into_iter().find(|i| i.tags().contains(&tag)))
    }

    /// The worker's container, running or not.
    pub async fn container(&self) -> Result<Option<ContainerSummary>> {
        let name = format!("/{}", self.name());
        let containers = self.docker.list_containers(true).await?;
        Ok(containers.into_iter().find(|c| c.names.contains(&name)))
    }

    /// Whether the container exists and is running.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.container().await?.is_some_and(|c| c.is_running()))
    }

    /// Build the worker's image, streaming normalised progress to `out`.
    ///
    /// Returns the image's tags.
    pub async fn build<W>(&self, out: &mut W) -> Result<Vec<String>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let archive = DockerContext::new(self.config.clone()).archive()?;
        info!(worker = %self.name(), context_bytes = archive.len(), "Building image");

        let mut stream = self
            .docker
            .build_image(Bytes::from(archive), self.name())
            .await?;

        let mut splitter = LineSplitter::new();
        let mut failure = None;
        while let Some(chunk) = stream.next().await {
            for line in splitter.push(&chunk?) {
                write_build_line(&line, out, &mut failure).await?;
            }
        }
        if let Some(rest) = splitter.finish() {
            write_build_line(&rest, out, &mut failure).await?;
        }
        out.flush().await?;

        if let Some(message) = failure {
            return Err(DockerError::BuildFailed(message));
        }

        let tags = match self.image().await? {
            Some(image) => image.tags().to_vec(),
            None => {
                return Err(DockerError::BuildFailed(format!(
                    "no image tagged '{}:latest' after build",
                    self.name()
                )))
            }
        };
        info!(tags = %tags.join(", "), "Built image");
        Ok(tags)
    }

    /// Creation parameters for the worker's container.
    pub fn container_spec(&self, cmd: Option<Vec<String>>) -> Result<ContainerSpec> {
        let name = self.name().to_owned();
        let ports = self.config.ports();

        Ok(ContainerSpec {
            image: name.clone(),
            hostname: name.clone(),
            user: self.config.uid().to_string(),
            cmd: cmd.unwrap_or_else(default_command),
            env: vec![
                format!("DISPLAY={}", std::env::var("DISPLAY").unwrap_or_default()),
                format!("HOSTNAME={}", self.config.host()?),
                format!("{CONTAINER_MARKER}={name}"),
            ],
            ports: vec![
                PortBinding {
                    container_port: WEB_PORT,
                    host_port: ports.web,
                },
                PortBinding {
                    container_port: WORKER_PORT,
                    host_port: ports.worker,
                },
                PortBinding {
                    container_port: SSH_PORT,
                    host_port: ports.ssh,
                },
            ],
            binds: vec![
                Bind::rw(self.config.base_dir(), self.config.container_dir()),
                Bind::rw(X11_SOCKET_DIR, X11_SOCKET_DIR),
            ],
            privileged: true,
            open_stdin: true,
            tty: true,
        })
    }

    /// Start the container, creating it first if it does not exist.
    pub async fn run(&self, cmd: Option<Vec<String>>) -> Result<RunOutcome> {
        let outcome = match self.container().await? {
            Some(container) => {
                if container.is_running() {
                    warn!(worker = %self.name(), "Container already running");
                    return Err(DockerError::AlreadyRunning(self.name().to_owned()));
                }
                warn!(worker = %self.name(), "Container already created; starting it");
                RunOutcome::Restarted
            }
            None => {
                let spec = self.container_spec(cmd)?;
                let id = self.docker.create_container(self.name(), &spec).await?;
                info!(id = %short_id(&id), "Created container");
                RunOutcome::Created { id }
            }
        };

        self.docker.start_container(self.name()).await?;
        info!(worker = %self.name(), "Container started");
        Ok(outcome)
    }

    /// Open the container's TTY for an interactive session.
    pub async fn attach(&self) -> Result<AttachStream> {
        if self.container().await?.is_none() {
            return Err(DockerError::NotFound(self.name().to_owned()));
        }
        self.docker.attach(self.name()).await
    }

    /// Resize the container's TTY.
    pub async fn resize(&self, width: u16, height: u16) -> Result<()> {
        self.docker.resize_tty(self.name(), width, height).await
    }

    /// Stop the running container.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running().await? {
            return Err(DockerError::NotRunning(self.name().to_owned()));
        }
        self.docker.stop_container(self.name()).await?;
        info!(worker = %self.name(), "Container stopped");
        Ok(())
    }

    /// Remove the stopped container.
    pub async fn remove(&self) -> Result<()> {
        let Some(container) = self.container().await? else {
            return Err(DockerError::NotFound(self.name().to_owned()));
        };
        if container.is_running() {
            return Err(DockerError::StillRunning(self.name().to_owned()));
        }
        self.docker.remove_container(self.name()).await?;
        info!(worker = %self.name(), id = %container.short_id(), "Container removed");
        Ok(())
    }

    /// Initialize the worker.
    ///
    /// Inside the target container this runs the [`Initializer`]. Outside, a
    /// fresh container is started with the init command, its output is
    /// streamed to `out`, and the container is removed afterwards whether or
    /// not initialization succeeded.
    pub async fn init<W>(&self, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if self.in_container {
            return Initializer::new(self.config.clone(), Arc::clone(&self.runner))
                .run()
                .await;
        }

        if self.container().await?.is_some() {
            return Err(DockerError::AlreadyExists(self.name().to_owned()));
        }

        info!(worker = %self.name(), "Re-running in Docker container");
        let result = self.run_init_container(out).await;
        if let Err(e) = &result {
            error!(worker = %self.name(), error = %e, "Initialization in container failed");
        }

        let cleanup = self.cleanup().await;
        match (result, cleanup) {
            (Err(e), Err(cleanup_err)) => {
                warn!(error = %cleanup_err, "Failed to remove init container");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), cleanup) => cleanup,
        }
    }

    /// Command that re-runs initialization inside the container.
    pub fn init_command(&self) -> Vec<String> {
        vec![
            path_string(self.config.dbb_executable()),
            "-c".to_owned(),
            path_string(self.config.container_config_path()),
            "-H".to_owned(),
            self.name().to_owned(),
            "init".to_owned(),
        ]
    }

    async fn run_init_container<W>(&self, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.run(Some(self.init_command())).await?;

        let mut logs = self.docker.logs(self.name()).await?;
        while let Some(chunk) = logs.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;

        let state = self.docker.container_state(self.name()).await?;
        if state.exit_code != 0 {
            return Err(DockerError::InitFailed(format!(
                "init container exited with status {}",
                state.exit_code
            )));
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let Some(container) = self.container().await? else {
            debug!("no init container to clean up");
            return Ok(());
        };
        if container.is_running() {
            self.docker.stop_container(self.name()).await?;
        }
        self.docker.remove_container(self.name()).await?;
        info!(worker = %self.name(), "Removed init container");
        Ok(())
    }

    /// Runtime info plus container and image inspections.
    pub async fn dump(&self) -> Result<DumpReport> {
        let info = self.docker.info().await?;
        let container = match self.container().await? {
            Some(_) => Some(self.docker.inspect_container(self.name()).await?),
            None => None,
        };
        let image = match self.image().await? {
            Some(_) => Some(self.docker.inspect_image(self.name()).await?),
            None => None,
        };
        Ok(DumpReport {
            info,
            container,
            image,
        })
    }
}

async fn write_build_line<W>(line: &str, out: &mut W, failure: &mut Option<String>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    if let Some(message) = build_error(line) {
        *failure = Some(message);
    }
    out.write_all(normalise_line(line).as_bytes()).await?;
    Ok(())
}

fn path_string(path: PathBuf) -> String {
    path.display().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mock::{DockerCall, MockDocker};

    fn manager(docker: MockDocker) -> ContainerManager<MockDocker> {
        let config = DbbConfig::from_yaml_str(
            "uid: 1000\nports:\n  web: 8080\nworkers:\n  ci1:\n    password: pw\n",
            "/srv/bb",
            Some("ci1"),
        )
        .unwrap();
        ContainerManager::new(docker, config).with_in_container(false)
    }

    #[test]
    fn default_command_runs_supervisord() {
        let cmd = default_command();
        assert_eq!(cmd[0], "/usr/bin/sudo");
        assert_eq!(cmd.last().map(String::as_str), Some("/etc/supervisor/supervisord.conf"));
    }

    #[test]
    fn spec_carries_identity_ports_and_binds() {
        let spec = manager(MockDocker::new()).container_spec(None).unwrap();
        assert_eq!(spec.image, "ci1");
        assert_eq!(spec.hostname, "ci1");
        assert_eq!(spec.user, "1000");
        assert_eq!(spec.cmd, default_command());
        assert!(spec.env.contains(&"DBB_CONTAINER=ci1".to_owned()));
        assert!(spec.env.iter().any(|e| e.starts_with("HOSTNAME=")));
        assert_eq!(
            spec.ports
                .iter()
                .map(|p| (p.container_port, p.host_port))
                .collect::<Vec<_>>(),
            vec![(8010, 8080), (9989, 9989), (22, 2222)]
        );
        assert_eq!(spec.binds[0], Bind::rw("/srv/bb", "/home/docker/bb"));
        assert_eq!(spec.binds[1], Bind::rw("/tmp/.X11-unix", "/tmp/.X11-unix"));
        assert!(spec.privileged && spec.open_stdin && spec.tty);
    }

    #[test]
    fn init_command_reexecutes_dbb() {
        let cmd = manager(MockDocker::new()).init_command();
        assert_eq!(
            cmd,
            [
                "/home/docker/bb/bin/dbb",
                "-c",
                "/home/docker/bb/config.yaml",
                "-H",
                "ci1",
                "init"
            ]
        );
    }

    #[tokio::test]
    async fn build_streams_normalised_output() {
        let docker = MockDocker::new().with_build_output(&[
            "{\"stream\":\"Step 1 : FROM debian:jessie\\n\"}\r\n{\"str",
            "eam\":\"Successfully built 0123\\n\"}\r\n",
        ]);
        let manager = manager(docker);

        let mut out = Vec::new();
        let tags = manager.build(&mut out).await.unwrap();

        assert_eq!(tags, vec!["ci1:latest"]);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Step 1 : FROM debian:jessie\nSuccessfully built 0123\n"
        );
    }

    #[tokio::test]
    async fn build_error_line_fails_after_output() {
        let docker = MockDocker::new().with_build_output(&[
            "{\"stream\":\"Step 1 : RUN false\\n\"}\r\n",
            "{\"errorDetail\":{\"message\":\"returned 1\"},\"error\":\"returned 1\"}\r\n",
        ]);
        let manager = manager(docker);

        let mut out = Vec::new();
        let err = manager.build(&mut out).await.unwrap_err();
        assert!(matches!(err, DockerError::BuildFailed(msg) if msg == "returned 1"));
        assert!(String::from_utf8(out).unwrap().starts_with("Step 1 : RUN false\n"));
    }

    #[tokio::test]
    async fn run_restarts_stopped_container_without_create() {
        let manager = manager(MockDocker::new().with_container("ci1", false));
        assert_eq!(manager.run(None).await.unwrap(), RunOutcome::Restarted);
        assert_eq!(manager.docker().count(|c| matches!(c, DockerCall::Create(_))), 0);
        assert!(manager.docker().is_running("ci1"));
    }

    #[tokio::test]
    async fn attach_requires_container() {
        let manager = manager(MockDocker::new());
        assert!(matches!(manager.attach().await, Err(DockerError::NotFound(_))));
        assert_eq!(manager.docker().count(|c| matches!(c, DockerCall::Attach(_))), 0);
    }

    #[tokio::test]
    async fn dump_reports_missing_objects() {
        let manager = manager(MockDocker::new());
        let report = manager.dump().await.unwrap();
        assert!(report.container.is_none());
        assert!(report.image.is_none());

        let text = report.to_string();
        assert!(text.starts_with("Docker:\n"));
        assert!(text.contains("Container:\n    (none)\nImage:\n    (none)\n"));
    }

    #[tokio::test]
    async fn dump_inspects_existing_objects() {
        let docker = MockDocker::new()
            .with_image("ci1:latest")
            .with_container("ci1", true);
        let manager = manager(docker);
        let report = manager.dump().await.unwrap();
        assert_eq!(report.container.unwrap()["State"]["Running"], true);
        assert_eq!(report.image.unwrap()["RepoTags"][0], "ci1:latest");
    }
}
