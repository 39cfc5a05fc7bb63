//! Common test utilities for dbb-docker integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dbb_config::DbbConfig;
use dbb_docker::{ContainerManager, MockDocker, RecordingRunner};
use tempfile::TempDir;

/// A worker tree in a temporary directory.
pub struct TestTree {
    pub dir: TempDir,
}

impl TestTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn authorized_keys(&self) -> PathBuf {
        self.path().join("home/.ssh/authorized_keys")
    }

    /// Configuration for worker `ci1` on host `worker_host`.
    pub fn config(&self, worker_host: &str, keys: &[&str]) -> DbbConfig {
        let keys = serde_json::to_string(keys).unwrap();
        let yaml = format!(
            r#"
master_name: dbb
master_host: master.example
uid: 1000
gid: 1000
maintainer_name: Jane Doe
maintainer_email: jane@example.com
maintainer_keys: {keys}
authorized_keys: {authorized_keys}
workers:
  ci1:
    host: {worker_host}
    password: secret
    base_image: debian:jessie
"#,
            authorized_keys = self.authorized_keys().display(),
        );
        DbbConfig::from_yaml_str(&yaml, self.path(), Some("ci1")).unwrap()
    }
}

/// Manager for `ci1` running outside the container.
pub fn host_manager(docker: MockDocker) -> ContainerManager<MockDocker> {
    let tree = TestTree::new();
    ContainerManager::new(docker, tree.config("ci1.example", &[])).with_in_container(false)
}

/// Manager for `ci1` running inside its container with a recording runner.
pub fn container_manager(
    tree: &TestTree,
    worker_host: &str,
    keys: &[&str],
) -> (ContainerManager<MockDocker>, Arc<RecordingRunner>) {
    let runner = Arc::new(RecordingRunner::new());
    let manager = ContainerManager::new(MockDocker::new(), tree.config(worker_host, keys))
        .with_in_container(true)
        .with_runner(runner.clone());
    (manager, runner)
}
