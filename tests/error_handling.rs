// tests/error_handling.rs

use std::io::Write;
use std::time::Duration;

use clap::Parser;
use tempfile::NamedTempFile;

use clusterq::cli::{CliArgs, LogLevel};
use clusterq::config::{load_and_validate, load_from_str};
use clusterq::errors::ClusterqError;
use clusterq::lock::{SingletonLock, PID_FILE};
use clusterq::logging::resolve_level;

fn config_error(text: &str) -> String {
    match load_from_str(text) {
        Err(ClusterqError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_full_config_loads() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[scheduler]
queue_dir = "/srv/q"
drop_dir = "/srv/drop"
queue_delay_secs = 5
superusers = ["root"]

[jobtype.spm]
requires = {{ matlab = 1 }}

[host.n1]
hostname = "node1.example.org"
cpus = 4
rank = 2
avail = ["1-5 9-17 4 2", "6-0 0-23 1 4"]
resources = [{{ name = "gpu", count = 2 }}, {{ name = "matlab", global = true }}]
"#
    )
    .unwrap();

    let config = load_and_validate(file.path()).unwrap();
    assert_eq!(config.scheduler.queue_delay, Duration::from_secs(5));
    assert!(config.scheduler.is_superuser("root"));
    assert_eq!(config.jobtypes["spm"].requires["matlab"], 1);

    let host = &config.hosts[0];
    assert_eq!(host.address, "node1.example.org:6004");
    assert_eq!(host.avail.len(), 2);
    assert_eq!(host.avail[1].to_string(), "6-0 0-23 1 4");
    assert!(host.resources.iter().any(|r| r.name == "matlab" && r.global && r.count == 1));

    let registered = host.to_host();
    assert_eq!(registered.schedule.slot(2, 10), (4, 2));
    assert_eq!(registered.schedule.slot(2, 20), (1, 4));
    assert_eq!(registered.schedule.slot(0, 3), (1, 4));
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = load_from_str("").unwrap();
    assert_eq!(config.scheduler.queue_delay, Duration::from_secs(15));
    assert_eq!(config.scheduler.control_addr, "0.0.0.0:6005");
    assert!(config.hosts.is_empty());
}

#[test]
fn test_zero_queue_delay_is_rejected() {
    let msg = config_error("[scheduler]\nqueue_delay_secs = 0\n");
    assert!(msg.contains("queue_delay_secs"));
}

#[test]
fn test_bad_avail_line_names_the_host() {
    let msg = config_error("[host.n1]\nhostname = \"n1\"\navail = [\"1-9 0-23 3 1\"]\n");
    assert!(msg.contains("n1"));
    assert!(msg.contains("days"));

    let msg = config_error("[host.n1]\nhostname = \"n1\"\navail = [\"weekdays\"]\n");
    assert!(msg.contains("malformed avail line"));
}

#[test]
fn test_empty_hostname_is_rejected() {
    let msg = config_error("[host.n1]\nhostname = \" \"\n");
    assert!(msg.contains("empty hostname"));
}

#[test]
fn test_unnamed_requirement_is_rejected() {
    let msg = config_error("[jobtype.x]\nrequires = { \"\" = 1 }\n");
    assert!(msg.contains("jobtype 'x'"));
}

#[test]
fn test_toml_syntax_error_is_structured() {
    match load_from_str("[scheduler\n") {
        Err(ClusterqError::TomlError(_)) => {}
        other => panic!("Expected TomlError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_config_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    match load_and_validate(dir.path().join("absent.toml")) {
        Err(ClusterqError::IoError(_)) => {}
        other => panic!("Expected IoError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_second_scheduler_on_same_queue_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let first = SingletonLock::acquire(dir.path()).unwrap();
    assert!(dir.path().join(PID_FILE).exists());

    match SingletonLock::acquire(dir.path()) {
        Err(ClusterqError::LockHeld(msg)) => assert!(msg.contains("locked by another scheduler")),
        other => panic!("Expected LockHeld, got: {:?}", other.map(|_| ())),
    }

    drop(first);
    assert!(!dir.path().join(PID_FILE).exists());
    SingletonLock::acquire(dir.path()).unwrap();
}

#[test]
fn test_log_level_precedence() {
    assert_eq!(resolve_level(Some(LogLevel::Debug), Some("error")), tracing::Level::DEBUG);
    assert_eq!(resolve_level(None, Some(" Warning ")), tracing::Level::WARN);
    assert_eq!(resolve_level(None, Some("loud")), tracing::Level::INFO);
    assert_eq!(resolve_level(None, None), tracing::Level::INFO);
}

#[test]
fn test_cli_flags() {
    let args = CliArgs::try_parse_from([
        "clusterq",
        "--config",
        "/etc/clusterq.toml",
        "--queue-dir",
        "/tmp/q",
        "--log-level",
        "trace",
        "--dry-run",
    ])
    .unwrap();
    assert_eq!(args.config, "/etc/clusterq.toml");
    assert_eq!(args.queue_dir.as_deref(), Some(std::path::Path::new("/tmp/q")));
    assert!(matches!(args.log_level, Some(LogLevel::Trace)));
    assert!(args.dry_run);

    let defaults = CliArgs::try_parse_from(["clusterq"]).unwrap();
    assert_eq!(defaults.config, "clusterq.toml");
    assert!(defaults.log_file.is_none());
}
