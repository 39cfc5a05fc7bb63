//! Implementation of the container lifecycle commands.

use crossterm::terminal;
use dbb_config::DbbConfig;
use dbb_docker::{run_session, ContainerManager, DockerClient, RunOutcome};
use tracing::warn;

fn manager(config: DbbConfig) -> ContainerManager<DockerClient> {
    let docker = DockerClient::from_settings(config.docker());
    ContainerManager::new(docker, config)
}

pub async fn build(config: DbbConfig) -> anyhow::Result<()> {
    manager(config).build(&mut tokio::io::stdout()).await?;
    Ok(())
}

pub async fn init(config: DbbConfig) -> anyhow::Result<()> {
    manager(config).init(&mut tokio::io::stdout()).await?;
    Ok(())
}

pub async fn run(config: DbbConfig, cmd: Vec<String>) -> anyhow::Result<()> {
    let cmd = if cmd.is_empty() { None } else { Some(cmd) };
    if let RunOutcome::Created { id } = manager(config).run(cmd).await? {
        println!("{id}");
    }
    Ok(())
}

pub async fn attach(config: DbbConfig) -> anyhow::Result<()> {
    let manager = manager(config);
    let stream = manager.attach().await?;

    match terminal::size() {
        Ok((width, height)) => {
            if let Err(e) = manager.resize(width, height).await {
                warn!(error = %e, "failed to resize container terminal");
            }
        }
        Err(e) => warn!(error = %e, "unable to read terminal size"),
    }

    let _raw = RawMode::enable()?;
    run_session(stream, tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

pub async fn stop(config: DbbConfig) -> anyhow::Result<()> {
    manager(config).stop().await?;
    Ok(())
}

pub async fn remove(config: DbbConfig) -> anyhow::Result<()> {
    manager(config).remove().await?;
    Ok(())
}

pub async fn dump(config: DbbConfig) -> anyhow::Result<()> {
    let report = manager(config).dump().await?;
    print!("{report}");
    Ok(())
}

/// Puts the local terminal in raw mode until dropped.
struct RawMode;

impl RawMode {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal mode");
        }
    }
}
