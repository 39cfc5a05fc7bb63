//! In-container initialization tests.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{container_manager, TestTree};
use dbb_docker::{DockerError, Initializer, RecordingRunner};

#[tokio::test]
async fn worker_on_other_host_skips_master_setup() {
    let tree = TestTree::new();
    let (manager, runner) = container_manager(&tree, "ci1.example", &[]);

    manager.init(&mut Vec::new()).await.unwrap();

    let commands = runner.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].program, "buildslave");
    let slave_dir = tree.path().join("slave").display().to_string();
    assert_eq!(
        commands[0].args,
        ["create-slave", slave_dir.as_str(), "master.example", "ci1", "secret"]
    );
    assert!(!commands[0].to_string().contains("secret"));

    let info = tree.path().join("slave/info");
    assert_eq!(
        std::fs::read_to_string(info.join("admin")).unwrap(),
        "Jane Doe <jane@example.com>\n"
    );
    assert_eq!(
        std::fs::read_to_string(info.join("host")).unwrap(),
        "ci1, from: debian:jessie\n"
    );
}

#[tokio::test]
async fn worker_on_master_host_creates_master_first() {
    let tree = TestTree::new();
    let (manager, runner) = container_manager(&tree, "master.example", &[]);

    manager.init(&mut Vec::new()).await.unwrap();

    let programs: Vec<_> = runner
        .commands()
        .iter()
        .map(|c| format!("{} {}", c.program, c.args[0]))
        .collect();
    assert_eq!(programs, ["buildbot create-master", "buildslave create-slave"]);
    assert_eq!(
        runner.commands()[0].args[1],
        tree.path().join("master").display().to_string()
    );
}

#[tokio::test]
async fn authorized_keys_have_one_line_per_key() {
    let tree = TestTree::new();
    let (manager, _runner) =
        container_manager(&tree, "ci1.example", &["ssh-rsa AAA...\n", "ssh-ed25519 BBB..."]);

    manager.init(&mut Vec::new()).await.unwrap();

    let keys = std::fs::read_to_string(tree.authorized_keys()).unwrap();
    assert_eq!(keys, "ssh-rsa AAA...\nssh-ed25519 BBB...\n");
    assert_eq!(keys.lines().count(), 2);
}

#[tokio::test]
async fn steps_are_safe_to_rerun() {
    let tree = TestTree::new();
    let runner = Arc::new(RecordingRunner::new());
    let config = tree.config("ci1.example", &["ssh-rsa AAA"]);
    let initializer = Initializer::new(config, runner.clone());

    initializer.run().await.unwrap();
    initializer.run().await.unwrap();

    let keys = std::fs::read_to_string(tree.authorized_keys()).unwrap();
    assert_eq!(keys, "ssh-rsa AAA\n");
    assert_eq!(runner.commands().len(), 2);
}

#[tokio::test]
async fn command_failure_aborts_remaining_steps() {
    let tree = TestTree::new();
    let runner = Arc::new(RecordingRunner::failing("buildbot"));
    let initializer = Initializer::new(tree.config("master.example", &[]), runner.clone());

    let err = initializer.run().await.unwrap_err();
    assert!(matches!(err, DockerError::CommandFailed { .. }));
    assert_eq!(runner.commands().len(), 1);
    assert!(!tree.path().join("slave/info/admin").exists());
}

#[tokio::test]
async fn missing_password_is_a_configuration_error() {
    let tree = TestTree::new();
    let yaml = "master_host: master.example\nworkers:\n  ci1:\n    host: ci1.example\n";
    let config = dbb_config::DbbConfig::from_yaml_str(yaml, tree.path(), Some("ci1")).unwrap();
    let initializer = Initializer::new(config, Arc::new(RecordingRunner::new()));

    let err = initializer.create_worker().await.unwrap_err();
    assert!(matches!(err, DockerError::Config(_)));
}
