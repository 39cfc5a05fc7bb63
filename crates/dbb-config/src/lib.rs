//! Configuration provider and build context for dbb.
//!
//! `dbb` manages a Docker-hosted Buildbot node. This crate covers everything
//! that is derived from the YAML configuration file:
//!
//! - [`DbbConfig`]: settings resolved for one worker
//! - [`WorkerKind`]: how that worker is hosted (plain container or latent
//!   DigitalOcean droplet)
//! - [`Template`]: the generated Dockerfile and Debian control file
//! - [`DockerContext`]: the tar archive the image is built from

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod template;
pub mod worker;

pub use config::{
    system_hostname, ConfigFile, DbbConfig, DigitalOceanSettings, DockerSettings, PortSettings,
};
pub use context::DockerContext;
pub use error::{ConfigError, ConfigResult};
pub use template::Template;
pub use worker::{DropletSettings, WorkerConfig, WorkerKind};
