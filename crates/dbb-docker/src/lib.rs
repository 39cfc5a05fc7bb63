//! Docker container lifecycle for dbb workers.
//!
//! This crate talks to the Docker daemon over its Unix socket and drives one
//! worker's container through its lifecycle:
//!
//! - [`DockerClient`]: Docker Engine API client (implements [`DockerApi`])
//! - [`ContainerManager`]: build, run, attach, stop, remove, init and dump
//! - [`Initializer`]: first-boot setup run inside the container
//! - [`normalise`]: log stream clean-up for build output
//!
//! # Example
//!
//! ```no_run
//! use dbb_config::DbbConfig;
//! use dbb_docker::{ContainerManager, DockerClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DbbConfig::load("config.yaml", Some("ci1"))?;
//! let docker = DockerClient::from_settings(config.docker());
//! let manager = ContainerManager::new(docker, config);
//!
//! manager.build(&mut tokio::io::stdout()).await?;
//! manager.run(None).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod attach;
pub mod client;
pub mod error;
pub mod init;
pub mod lifecycle;
pub mod mock;
pub mod normalise;

pub use api::{
    AttachStream, Bind, ByteStream, ContainerSpec, ContainerState, ContainerSummary, DockerApi,
    ImageSummary, PortBinding,
};
pub use api::short_id;
pub use attach::run_session;
pub use client::DockerClient;
pub use error::{DockerError, Result};
pub use init::{CommandLine, CommandRunner, Initializer, SystemRunner};
pub use lifecycle::{default_command, ContainerManager, DumpReport, RunOutcome, CONTAINER_MARKER};
pub use mock::{DockerCall, MockDocker, RecordingRunner};
