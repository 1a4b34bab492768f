use std::fs;

use chrono::{Local, TimeZone};
use tempfile::TempDir;

use tether_core::{ServiceInstance, ServiceName};
use tether_sync::{read_snapshot, snapshot_path, write_snapshot, SNAPSHOT_TIME_FORMAT};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn persists_exactly_the_healthy_subset() {
    init_logging();
    let dir = TempDir::new().expect("tempdir");
    let service = ServiceName::from("python-service");
    let instances = vec![
        ServiceInstance::new("10.0.0.1", 8080),
        ServiceInstance::new("10.0.0.2", 8080).unhealthy(),
        ServiceInstance::new("10.0.0.3", 9090),
    ];
    let polled_at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

    let (path, count) =
        write_snapshot(dir.path(), &service, &instances, polled_at).expect("write snapshot");

    assert_eq!(count, 2);
    assert_eq!(path, snapshot_path(dir.path(), &service));
    let records = read_snapshot(&path).expect("read snapshot");
    let ips: Vec<_> = records.iter().map(|r| r.ip.as_str()).collect();
    assert_eq!(ips, vec!["10.0.0.1", "10.0.0.3"]);
    assert!(records
        .iter()
        .all(|r| r.last_update == polled_at.format(SNAPSHOT_TIME_FORMAT).to_string()));
    assert_eq!(records[0].last_update, "2024-05-01 12:30:00");
}

#[test]
fn registry_defaults_are_carried_into_records() {
    init_logging();
    let dir = TempDir::new().expect("tempdir");
    let service = ServiceName::from("svc");
    // Registry JSON that omits weight and metadata.
    let instance: ServiceInstance =
        serde_json::from_str(r#"{"ip":"10.1.1.1","port":80,"healthy":true}"#).expect("json");

    let (path, _) = write_snapshot(dir.path(), &service, &[instance], Local::now()).expect("write");
    let records = read_snapshot(&path).expect("read");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].weight, 1.0);
    assert!(records[0].metadata.is_empty());
}

#[test]
fn snapshot_is_pretty_printed_with_two_space_indent() {
    let dir = TempDir::new().expect("tempdir");
    let service = ServiceName::from("svc");
    let (path, _) = write_snapshot(
        dir.path(),
        &service,
        &[ServiceInstance::new("10.0.0.1", 1)],
        Local::now(),
    )
    .expect("write");
    let raw = fs::read_to_string(&path).expect("read");
    assert!(raw.starts_with("[\n  {\n    \"ip\": \"10.0.0.1\""), "got: {raw}");
}

#[test]
fn no_healthy_instances_writes_empty_array() {
    let dir = TempDir::new().expect("tempdir");
    let service = ServiceName::from("svc");
    let (path, count) = write_snapshot(
        dir.path(),
        &service,
        &[ServiceInstance::new("10.0.0.1", 1).unhealthy()],
        Local::now(),
    )
    .expect("write");
    assert_eq!(count, 0);
    assert_eq!(fs::read_to_string(path).expect("read"), "[]");
}

#[test]
fn creates_missing_snapshot_directory() {
    let root = TempDir::new().expect("tempdir");
    let dir = root.path().join("service_ips");
    write_snapshot(
        &dir,
        &ServiceName::from("svc"),
        &[ServiceInstance::new("10.0.0.1", 1)],
        Local::now(),
    )
    .expect("write");
    assert!(dir.join("svc_ips.json").exists());
}

#[test]
fn each_poll_replaces_the_previous_snapshot() {
    let dir = TempDir::new().expect("tempdir");
    let service = ServiceName::from("svc");
    write_snapshot(
        dir.path(),
        &service,
        &[
            ServiceInstance::new("10.0.0.1", 1),
            ServiceInstance::new("10.0.0.2", 1),
        ],
        Local::now(),
    )
    .expect("first");
    let (path, _) = write_snapshot(
        dir.path(),
        &service,
        &[ServiceInstance::new("10.0.0.9", 1)],
        Local::now(),
    )
    .expect("second");

    let records = read_snapshot(&path).expect("read");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ip, "10.0.0.9");
}
