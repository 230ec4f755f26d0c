//! Integration tests for the SDK entry points.
//!
//! Each test:
//! 1. Writes a manifest into a temporary project directory
//! 2. Loads it through `ProjectBuilder` against an in-memory engine
//! 3. Drives lifecycle operations through `Project`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use berth_common::config::BerthConfig;
use berth_common::error::BerthError;
use berth_common::types::LifecycleState;
use berth_compose::manifest::SchemaVersion;
use berth_runtime::engine::ContainerEngine;
use berth_runtime::engine::memory::{EngineCall, MemoryEngine};
use berth_runtime::lifecycle::CancelToken;
use berth_sdk::builder::ProjectBuilder;
use berth_sdk::event::ContainerEvent;

const MANIFEST: &str = r"
version: '3.8'
services:
  db:
    image: postgres:16
  web:
    image: nginx
    links: ['db:database']
    ports: ['8080:80']
    volumes: ['./static:/srv/static']
  worker:
    image: busybox
    command: sleep 3600
volumes:
  data: {}
";

fn project_dir(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let root = tempfile::tempdir().expect("tempdir");
    let dir = root.path().join(name);
    std::fs::create_dir(&dir).expect("project dir");
    std::fs::write(dir.join("docker-compose.yml"), MANIFEST).expect("manifest");
    (root, dir)
}

#[test]
fn loads_manifest_from_disk() {
    let (_root, dir) = project_dir("myproject");
    let engine = Arc::new(MemoryEngine::new());
    let project = ProjectBuilder::new(engine)
        .load(dir.join("docker-compose.yml"))
        .expect("load");

    assert_eq!(project.name(), "myproject");
    assert_eq!(project.version(), SchemaVersion::V3Minor(3.8));
    assert!(project.volumes().is_some());
    assert!(project.networks().is_none());
    assert_eq!(project.registry().len(), 3);
    assert_eq!(project.project_dir(), dir.as_path());
}

#[test]
fn load_dir_finds_the_manifest() {
    let (_root, dir) = project_dir("myproject");
    let project = ProjectBuilder::new(Arc::new(MemoryEngine::new()))
        .load_dir(&dir)
        .expect("load");
    assert_eq!(project.registry().labels()[0], "myproject_db_1");
}

#[test]
fn start_then_stop_everything() {
    let (_root, dir) = project_dir("myproject");
    let engine = Arc::new(MemoryEngine::new());
    let mut builder =
        ProjectBuilder::new(engine.clone()).config(BerthConfig::default().with_working_dir(&dir));
    let events = builder.event_listener();
    let project = builder.load_dir(&dir).expect("load");

    let report = project.start::<&str>(&[]);
    assert!(report.is_success(), "{report:?}");
    assert!(engine.is_running("myproject_web_1"));
    assert_eq!(project.state("myproject_db_1"), Some(LifecycleState::Running));

    let web = engine.request_for("myproject_web_1").expect("web");
    let binds = web.host_config.binds.expect("binds");
    assert_eq!(binds, vec![format!("{}/static:/srv/static:rw", dir.display())]);

    let report = project.stop::<&str>(&[]);
    assert_eq!(report.completed.len(), 3);
    assert!(!engine.is_running("myproject_db_1"));

    let started = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ContainerEvent::StateChanged { to: LifecycleState::Running, .. }))
        .count();
    assert_eq!(started, 3);
}

#[test]
fn up_and_down_by_service_name() {
    let (_root, dir) = project_dir("myproject");
    let engine = Arc::new(MemoryEngine::new());
    let project = ProjectBuilder::new(engine.clone()).load_dir(&dir).expect("load");

    project.up(&["web"]).expect("up");
    assert!(engine.is_running("myproject_db_1"));
    assert!(engine.is_running("myproject_web_1"));
    assert!(!engine.is_running("myproject_worker_1"));

    project.down(&["web"]).expect("down");
    assert!(!engine.is_running("myproject_web_1"));
    assert!(engine.is_running("myproject_db_1"));

    let err = project.up(&["nothing"]).unwrap_err();
    assert!(matches!(err, BerthError::NotFound { .. }));
}

#[test]
fn container_queries() {
    let (_root, dir) = project_dir("myproject");
    let project = ProjectBuilder::new(Arc::new(MemoryEngine::new()))
        .load_dir(&dir)
        .expect("load");

    let web = project.get_containers_by_name("web");
    assert_eq!(web.len(), 1);
    assert_eq!(web[0].label, "myproject_web_1");

    let commanded = project.get_containers_by(|s| s.command.is_some());
    assert_eq!(commanded.len(), 1);
    assert_eq!(commanded[0].service, "worker");
}

#[test]
fn cancelled_start_issues_no_engine_calls() {
    let (_root, dir) = project_dir("myproject");
    let engine = Arc::new(MemoryEngine::new());
    let project = ProjectBuilder::new(engine.clone()).load_dir(&dir).expect("load");
    engine.clear_calls();

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = project.start_with_cancel::<&str>(&[], cancel);
    assert!(report.completed.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert!(engine.calls().is_empty());
}

#[test]
fn refresh_observes_engine_state() {
    let (_root, dir) = project_dir("myproject");
    let engine = Arc::new(MemoryEngine::new());
    let project = ProjectBuilder::new(engine.clone()).load_dir(&dir).expect("load");

    project.start_container("myproject_worker_1").expect("start");
    let id = project.registry().handle("myproject_worker_1").expect("handle");
    engine.stop_container(&id).expect("stop behind the registry's back");
    assert_eq!(
        project.refresh("myproject_worker_1").expect("refresh"),
        LifecycleState::Stopped
    );
}

#[test]
fn delete_removes_containers() {
    let (_root, dir) = project_dir("myproject");
    let engine = Arc::new(MemoryEngine::new());
    let project = ProjectBuilder::new(engine.clone()).load_dir(&dir).expect("load");
    assert!(project.start(&["myproject_worker_1"]).is_success());

    let report = project.delete(&["myproject_worker_1"]);
    assert!(report.is_success());
    assert!(!project.registry().contains("myproject_worker_1"));
    assert!(engine
        .calls()
        .iter()
        .any(|c| matches!(c, EngineCall::Delete { force: true, .. })));
}
