//! Lifecycle precondition and cleanup tests against the in-memory runtime.

#![allow(clippy::unwrap_used)]

mod common;

use common::host_manager;
use dbb_docker::{DockerCall, DockerError, MockDocker, RunOutcome};

fn creates(call: &DockerCall) -> bool {
    matches!(call, DockerCall::Create(_))
}

fn removes(call: &DockerCall) -> bool {
    matches!(call, DockerCall::Remove(_))
}

#[tokio::test]
async fn missing_container_cannot_be_removed_or_stopped() {
    let manager = host_manager(MockDocker::new());

    let err = manager.remove().await.unwrap_err();
    assert!(matches!(err, DockerError::NotFound(ref name) if name == "ci1"));
    assert!(err.is_precondition());

    let err = manager.stop().await.unwrap_err();
    assert!(matches!(err, DockerError::NotRunning(ref name) if name == "ci1"));

    let docker = manager.docker();
    assert_eq!(docker.count(removes), 0);
    assert_eq!(docker.count(|c| matches!(c, DockerCall::Stop(_))), 0);
}

#[tokio::test]
async fn run_on_running_container_issues_no_create() {
    let manager = host_manager(MockDocker::new().with_container("ci1", true));

    let err = manager.run(None).await.unwrap_err();
    assert!(matches!(err, DockerError::AlreadyRunning(_)));
    assert_eq!(manager.docker().count(creates), 0);
    assert_eq!(manager.docker().count(|c| matches!(c, DockerCall::Start(_))), 0);
}

#[tokio::test]
async fn run_creates_and_starts_missing_container() {
    let manager = host_manager(MockDocker::new().with_image("ci1:latest"));

    let outcome = manager.run(None).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Created { ref id } if !id.is_empty()));
    assert!(manager.docker().is_running("ci1"));

    let spec = manager.docker().created_spec("ci1").unwrap();
    assert_eq!(spec.image, "ci1");
    assert_eq!(spec.cmd, dbb_docker::default_command());
}

#[tokio::test]
async fn remove_running_container_is_refused_until_stopped() {
    let manager = host_manager(MockDocker::new().with_container("ci1", true));

    let err = manager.remove().await.unwrap_err();
    assert!(matches!(err, DockerError::StillRunning(_)));
    assert_eq!(manager.docker().count(removes), 0);

    manager.stop().await.unwrap();
    manager.remove().await.unwrap();

    assert_eq!(manager.docker().count(removes), 1);
    assert!(manager.container().await.unwrap().is_none());
}

#[tokio::test]
async fn lookups_match_exact_identity() {
    let docker = MockDocker::new()
        .with_image("ci10:latest")
        .with_image("ci1:testing")
        .with_container("ci10", false)
        .with_container("other", true);
    let manager = host_manager(docker);

    assert!(manager.image().await.unwrap().is_none());
    assert!(manager.container().await.unwrap().is_none());

    let docker = MockDocker::new()
        .with_image("ci10:latest")
        .with_image("ci1:latest")
        .with_container("ci10", false)
        .with_container("ci1", false);
    let manager = host_manager(docker);

    let image = manager.image().await.unwrap().unwrap();
    assert_eq!(image.tags(), ["ci1:latest".to_owned()]);
    let container = manager.container().await.unwrap().unwrap();
    assert_eq!(container.names, ["/ci1".to_owned()]);
}

#[tokio::test]
async fn init_refuses_existing_container() {
    let manager = host_manager(MockDocker::new().with_container("ci1", false));

    let err = manager.init(&mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, DockerError::AlreadyExists(_)));
    assert_eq!(manager.docker().count(creates), 0);
    assert_eq!(manager.docker().count(removes), 0);
}

#[tokio::test]
async fn init_streams_logs_and_removes_container() {
    let docker = MockDocker::new()
        .with_image("ci1:latest")
        .with_logs(&["Installing ssh keys\r\n", "Creating buildbot worker\r\n"]);
    let manager = host_manager(docker);

    let mut out = Vec::new();
    manager.init(&mut out).await.unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Installing ssh keys\r\nCreating buildbot worker\r\n"
    );
    assert_eq!(manager.docker().count(removes), 1);
    assert!(manager.container().await.unwrap().is_none());
}

#[tokio::test]
async fn init_passes_reexec_command() {
    let manager = host_manager(MockDocker::new().with_image("ci1:latest"));
    manager.init(&mut Vec::new()).await.unwrap();

    let calls = manager.docker().calls();
    assert!(calls.contains(&DockerCall::Create("ci1".to_owned())));
    assert!(calls.contains(&DockerCall::Logs("ci1".to_owned())));
}

#[tokio::test]
async fn init_failure_still_removes_container_once() {
    let docker = MockDocker::new().with_image("ci1:latest").failing_logs();
    let manager = host_manager(docker);

    let err = manager.init(&mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, DockerError::Transport(_)));

    let docker = manager.docker();
    assert_eq!(docker.count(removes), 1);
    assert_eq!(docker.count(|c| matches!(c, DockerCall::Stop(_))), 1);
    assert!(manager.container().await.unwrap().is_none());
}

#[tokio::test]
async fn init_start_failure_removes_created_container() {
    let docker = MockDocker::new().with_image("ci1:latest").failing_start();
    let manager = host_manager(docker);

    let err = manager.init(&mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, DockerError::ApiError { status: 500, .. }));
    assert_eq!(manager.docker().count(removes), 1);
    assert_eq!(manager.docker().count(|c| matches!(c, DockerCall::Stop(_))), 0);
}

#[tokio::test]
async fn init_nonzero_exit_is_reported_after_cleanup() {
    let docker = MockDocker::new().with_image("ci1:latest").with_exit_code(1);
    let manager = host_manager(docker);

    let err = manager.init(&mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, DockerError::InitFailed(_)));
    assert_eq!(manager.docker().count(removes), 1);
}

#[tokio::test]
async fn attach_session_reaches_container() {
    use tokio::io::AsyncWriteExt;

    let manager = host_manager(MockDocker::new().with_container("ci1", true));
    let stream = manager.attach().await.unwrap();
    manager.resize(80, 24).await.unwrap();

    let mut peer = manager.docker().take_attach_peer().unwrap();
    peer.write_all(b"$ ").await.unwrap();
    drop(peer);

    let (_keep_open, input) = tokio::io::duplex(16);
    let mut output = Vec::new();
    dbb_docker::run_session(stream, input, &mut output).await.unwrap();

    assert_eq!(output, b"$ ");
    assert!(manager
        .docker()
        .calls()
        .contains(&DockerCall::Resize("ci1".to_owned(), 80, 24)));
}

#[tokio::test]
async fn preconditions_read_state_from_a_single_listing() {
    fn inspects(call: &DockerCall) -> bool {
        matches!(call, DockerCall::InspectContainer(_))
    }
    fn lists(call: &DockerCall) -> bool {
        matches!(call, DockerCall::ListContainers)
    }

    let manager = host_manager(MockDocker::new().with_container("ci1", true));
    assert!(manager.is_running().await.unwrap());
    assert!(matches!(
        manager.remove().await.unwrap_err(),
        DockerError::StillRunning(_)
    ));
    assert!(matches!(
        manager.run(None).await.unwrap_err(),
        DockerError::AlreadyRunning(_)
    ));
    manager.stop().await.unwrap();
    manager.remove().await.unwrap();

    let docker = manager.docker();
    assert_eq!(docker.count(inspects), 0);
    assert_eq!(docker.count(lists), 5);
}
