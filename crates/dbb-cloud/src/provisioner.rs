//! Latent worker provisioning.
//!
//! A latent worker is a Buildbot worker whose host only exists while the
//! build farm wants it. [`LatentWorker::start_instance`] creates a droplet
//! named after the worker and waits for it to become active;
//! [`LatentWorker::stop_instance`] destroys it and waits for it to disappear.
//! Both waits run on a spawned task and are handed back as a [`Completion`].
//!
//! The droplet is looked up by name on every poll. Its existence and status
//! are never cached between calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use dbb_config::{ConfigError, DbbConfig, DropletSettings};

use crate::api::{CloudApi, CreateDroplet, Droplet};
use crate::error::{CloudError, CloudResult};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MISSING_POLL_LIMIT: u32 = 3;
const NON_EXISTENT: &str = "non-existent";

/// Handle to a provisioning operation running in the background.
#[derive(Debug)]
pub struct Completion<T> {
    inner: CompletionInner<T>,
}

#[derive(Debug)]
enum CompletionInner<T> {
    Ready(CloudResult<T>),
    Task(JoinHandle<CloudResult<T>>),
}

impl<T: Send + 'static> Completion<T> {
    /// An operation that has already finished.
    pub fn ready(result: CloudResult<T>) -> Self {
        Self {
            inner: CompletionInner::Ready(result),
        }
    }

    /// Run `future` on the runtime's worker pool.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = CloudResult<T>> + Send + 'static,
    {
        Self {
            inner: CompletionInner::Task(tokio::spawn(future)),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            CompletionInner::Ready(_) => true,
            CompletionInner::Task(handle) => handle.is_finished(),
        }
    }

    /// Wait for the operation's result.
    pub async fn wait(self) -> CloudResult<T> {
        match self.inner {
            CompletionInner::Ready(result) => result,
            CompletionInner::Task(handle) => handle
                .await
                .map_err(|e| CloudError::Task(e.to_string()))?,
        }
    }
}

/// Result of a successful substantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substantiated {
    pub name: String,
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
}

/// A Buildbot worker hosted on an on-demand droplet.
pub struct LatentWorker<C> {
    api: Arc<C>,
    name: String,
    droplet: DropletSettings,
    poll_interval: Duration,
    missing_poll_limit: u32,
}

impl<C> Clone for LatentWorker<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            name: self.name.clone(),
            droplet: self.droplet.clone(),
            poll_interval: self.poll_interval,
            missing_poll_limit: self.missing_poll_limit,
        }
    }
}

impl<C> std::fmt::Debug for LatentWorker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatentWorker")
            .field("name", &self.name)
            .field("droplet", &self.droplet)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<C: CloudApi + 'static> LatentWorker<C> {
    pub fn new(name: impl Into<String>, droplet: DropletSettings, api: Arc<C>) -> Self {
        Self {
            api,
            name: name.into(),
            droplet,
            poll_interval: DEFAULT_POLL_INTERVAL,
            missing_poll_limit: DEFAULT_MISSING_POLL_LIMIT,
        }
    }

    /// Build the configured worker. It must be a DigitalOcean worker.
    pub fn from_config(config: &DbbConfig, api: Arc<C>) -> CloudResult<Self> {
        let Some(droplet) = config.worker().droplet() else {
            return Err(ConfigError::invalid(format!(
                "worker '{}' is not a DigitalOcean worker",
                config.worker_name()
            ))
            .into());
        };

        Ok(Self::new(config.worker_name(), droplet.clone(), api).with_poll_interval(
            Duration::from_secs(config.digitalocean().poll_interval_secs),
        ))
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Consecutive polls without a droplet after which creation is
    /// considered to have failed silently.
    #[must_use]
    pub fn with_missing_poll_limit(mut self, limit: u32) -> Self {
        self.missing_poll_limit = limit.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    /// The worker's droplet, fetched fresh.
    pub async fn droplet(&self) -> CloudResult<Option<Droplet>> {
        let droplets = self.api.list_droplets().await?;
        Ok(droplets.into_iter().find(|d| d.name == self.name))
    }

    /// Id of the configured base image.
    pub async fn image_id(&self) -> CloudResult<u64> {
        let images = self.api.list_images().await?;
        images
            .into_iter()
            .find(|i| i.name == self.droplet.image)
            .map(|i| i.id)
            .ok_or_else(|| CloudError::ImageNotFound(self.droplet.image.clone()))
    }

    /// Create the worker's droplet in the background.
    ///
    /// Fails immediately with [`CloudError::AlreadyActive`] if the droplet
    /// already exists.
    pub async fn start_instance(&self) -> CloudResult<Completion<Substantiated>> {
        if self.droplet().await?.is_some() {
            return Err(CloudError::AlreadyActive(self.name.clone()));
        }

        let worker = self.clone();
        Ok(Completion::spawn(async move { worker.create().await }))
    }

    /// Destroy the worker's droplet in the background.
    ///
    /// A droplet that does not exist is already stopped.
    pub async fn stop_instance(&self) -> CloudResult<Completion<()>> {
        if self.droplet().await?.is_none() {
            info!(worker = %self.name, "Droplet already stopped? Doing nothing");
            return Ok(Completion::ready(Ok(())));
        }

        let worker = self.clone();
        Ok(Completion::spawn(async move { worker.destroy().await }))
    }

    async fn create(&self) -> CloudResult<Substantiated> {
        let image = self.image_id().await?;
        info!(
            worker = %self.name,
            region = %self.droplet.region,
            image,
            size = %self.droplet.size_slug,
            "Creating droplet"
        );

        let request = CreateDroplet {
            name: self.name.clone(),
            region: self.droplet.region.clone(),
            size: self.droplet.size_slug.clone(),
            image,
            backups: self.droplet.backups,
        };
        self.api.create_droplet(&request).await?;

        let (droplet, waited) = self.wait_for_active().await?;
        let ip_address = droplet.ip_address().map(str::to_owned);
        info!(
            worker = %self.name,
            ip_address = ip_address.as_deref().unwrap_or("unknown"),
            seconds = waited.as_secs(),
            "Droplet started"
        );

        Ok(Substantiated {
            name: self.name.clone(),
            id: droplet.id,
            created_at: droplet.created_at,
            ip_address,
        })
    }

    async fn wait_for_active(&self) -> CloudResult<(Droplet, Duration)> {
        info!(worker = %self.name, "Waiting for droplet to start");
        let mut waited = Duration::ZERO;
        let mut missing = 0;

        loop {
            let state = match self.droplet().await? {
                Some(droplet) if droplet.is_active() => return Ok((droplet, waited)),
                Some(droplet) => {
                    missing = 0;
                    droplet.status
                }
                None => {
                    missing += 1;
                    if missing >= self.missing_poll_limit {
                        error!(worker = %self.name, "Failed to start droplet");
                        return Err(CloudError::SubstantiationFailed {
                            name: self.name.clone(),
                            reason: NON_EXISTENT.to_owned(),
                        });
                    }
                    NON_EXISTENT.to_owned()
                }
            };

            tokio::time::sleep(self.poll_interval).await;
            waited += self.poll_interval;
            info!(
                worker = %self.name,
                elapsed_mins = waited.as_secs() / 60,
                current = %state,
                "Waiting for droplet"
            );
        }
    }

    async fn destroy(&self) -> CloudResult<()> {
        // The droplet may have been terminated externally since the check.
        let Some(droplet) = self.droplet().await? else {
            info!(worker = %self.name, "Droplet already gone");
            return Ok(());
        };

        info!(worker = %self.name, id = droplet.id, "Deleting droplet");
        match self.api.destroy_droplet(droplet.id).await {
            Err(CloudError::Api { status: 404, .. }) => {
                info!(worker = %self.name, id = droplet.id, "Droplet already gone");
                return Ok(());
            }
            result => result?,
        }

        let mut waited = Duration::ZERO;
        while self.droplet().await?.is_some() {
            tokio::time::sleep(self.poll_interval).await;
            let before = waited.as_secs() / 60;
            waited += self.poll_interval;
            let minutes = waited.as_secs() / 60;
            if minutes > before {
                info!(worker = %self.name, elapsed_mins = minutes, "Waiting for droplet to end");
            }
        }

        info!(
            worker = %self.name,
            minutes = waited.as_secs() / 60,
            seconds = waited.as_secs() % 60,
            "Droplet deleted"
        );
        Ok(())
    }
}
