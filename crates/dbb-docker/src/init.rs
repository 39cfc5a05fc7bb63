//! First-boot initialization inside the worker container.
//!
//! Three steps, each safe to re-run:
//! 1. install the maintainers' SSH keys
//! 2. create the Buildbot master, when this worker is the master host
//! 3. create the Buildbot worker and write its info files

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use dbb_config::DbbConfig;

use crate::error::{DockerError, Result};

const REDACTED: &str = "********";

/// An external command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    secret: Option<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an argument that is masked when the command is displayed.
    #[must_use]
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        self.secret = Some(arg.clone());
        self.args.push(arg);
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if self.secret.as_ref() == Some(arg) {
                write!(f, " {REDACTED}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`; a spawn failure or unsuccessful exit is an error.
    async fn run(&self, command: &CommandLine) -> Result<()>;
}

/// Runs commands as child processes sharing this process's stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine) -> Result<()> {
        let status = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .status()
            .await
            .map_err(|e| DockerError::CommandFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(DockerError::CommandFailed {
                command: command.to_string(),
                reason: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Initializes a freshly started worker container.
#[derive(Clone)]
pub struct Initializer {
    config: DbbConfig,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializer")
            .field("worker", &self.config.worker_name())
            .finish_non_exhaustive()
    }
}

impl Initializer {
    pub fn new(config: DbbConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Run all initialization steps in order.
    pub async fn run(&self) -> Result<()> {
        self.install_authorized_keys().await?;
        self.create_master().await?;
        self.create_worker().await
    }

    /// Overwrite the authorized keys file with one line per maintainer key.
    pub async fn install_authorized_keys(&self) -> Result<()> {
        let path = self.config.authorized_keys();
        info!(path = %path.display(), "Installing ssh keys");

        let contents: String = self
            .config
            .maintainer_keys()
            .iter()
            .map(|key| format!("{}\n", key.replace('\n', "")))
            .collect();

        create_parent(path).await?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    /// Create the Buildbot master if this worker runs on the master host.
    ///
    /// Returns whether the master was created.
    pub async fn create_master(&self) -> Result<bool> {
        let master_host = self.config.master_host()?;
        let host = self.config.worker_host();
        if host != master_host {
            info!(host, master_host, "Not a master; skipping master setup");
            return Ok(false);
        }

        let master_dir = self.config.master_dir();
        info!(dir = %master_dir.display(), "Creating buildbot master");
        let command = CommandLine::new("buildbot")
            .arg("create-master")
            .arg(master_dir.display().to_string());
        self.runner.run(&command).await?;
        Ok(true)
    }

    /// Create the Buildbot worker and write its `info/admin` and `info/host`.
    pub async fn create_worker(&self) -> Result<()> {
        let worker_dir = self.config.worker_dir();
        let name = self.config.worker_name();

        let command = CommandLine::new("buildslave")
            .arg("create-slave")
            .arg(worker_dir.display().to_string())
            .arg(self.config.master_host()?)
            .arg(name)
            .secret_arg(self.config.worker().password()?);
        info!(command = %command, "Creating buildbot worker");
        self.runner.run(&command).await?;

        let info_dir = worker_dir.join("info");
        tokio::fs::create_dir_all(&info_dir).await?;

        let admin = format!(
            "{} <{}>\n",
            self.config.maintainer_name(),
            self.config.maintainer_email()
        );
        tokio::fs::write(info_dir.join("admin"), admin).await?;

        let host = format!("{name}, from: {}\n", self.config.worker().base_image);
        tokio::fs::write(info_dir.join("host"), host).await?;

        debug!(dir = %info_dir.display(), "wrote worker info files");
        Ok(())
    }
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_masks_secret() {
        let command = CommandLine::new("buildslave")
            .arg("create-slave")
            .arg("/srv/bb/slave")
            .secret_arg("hunter2");
        assert_eq!(
            command.to_string(),
            "buildslave create-slave /srv/bb/slave ********"
        );
        assert_eq!(command.args.last().map(String::as_str), Some("hunter2"));
    }

    #[tokio::test]
    async fn system_runner_reports_exit_status() {
        assert!(SystemRunner.run(&CommandLine::new("true")).await.is_ok());

        let err = SystemRunner.run(&CommandLine::new("false")).await;
        assert!(matches!(err, Err(DockerError::CommandFailed { .. })));

        let err = SystemRunner
            .run(&CommandLine::new("/nonexistent/dbb-test-binary"))
            .await;
        assert!(matches!(err, Err(DockerError::CommandFailed { .. })));
    }
}
