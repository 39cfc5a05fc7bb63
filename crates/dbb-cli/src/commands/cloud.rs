//! Implementation of the `droplet` commands.

use std::sync::Arc;

use dbb_cloud::{DigitalOceanClient, LatentWorker};
use dbb_config::DbbConfig;
use tracing::info;

fn worker(config: &DbbConfig) -> anyhow::Result<LatentWorker<DigitalOceanClient>> {
    let api = DigitalOceanClient::new(config.digitalocean())?;
    Ok(LatentWorker::from_config(config, Arc::new(api))?)
}

pub async fn start(config: &DbbConfig) -> anyhow::Result<()> {
    let substantiated = worker(config)?.start_instance().await?.wait().await?;
    println!(
        "{} {} {}",
        substantiated.name,
        substantiated.id,
        substantiated.created_at.to_rfc3339()
    );
    Ok(())
}

pub async fn stop(config: &DbbConfig) -> anyhow::Result<()> {
    worker(config)?.stop_instance().await?.wait().await?;
    info!(worker = %config.worker_name(), "Droplet stopped");
    Ok(())
}

pub async fn status(config: &DbbConfig) -> anyhow::Result<()> {
    match worker(config)?.droplet().await? {
        Some(droplet) => println!(
            "{}: {} (id {}, address {}, created {})",
            droplet.name,
            droplet.status,
            droplet.id,
            droplet.ip_address().unwrap_or("none"),
            droplet.created_at.to_rfc3339()
        ),
        None => println!("{}: non-existent", config.worker_name()),
    }
    Ok(())
}
