//! On-demand cloud hosts for latent Buildbot workers.
//!
//! - [`LatentWorker`]: start and stop a worker's droplet, polling until the
//!   provider reports the change
//! - [`DigitalOceanClient`]: DigitalOcean v2 API client (implements [`CloudApi`])
//! - [`MockCloud`]: in-memory provider for tests

#![forbid(unsafe_code)]

pub mod api;
pub mod digitalocean;
pub mod error;
pub mod mock;
pub mod provisioner;

pub use api::{CloudApi, CreateDroplet, Droplet, Image, STATUS_ACTIVE};
pub use digitalocean::DigitalOceanClient;
pub use error::{CloudError, CloudResult};
pub use mock::{CloudCall, MockCloud};
pub use provisioner::{Completion, LatentWorker, Substantiated};
