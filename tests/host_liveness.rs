// tests/host_liveness.rs

mod common;

use clusterq::engine::{CoreStep, RuntimeEvent};
use clusterq::exec::HostWork;
use clusterq::hosts::{Host, HostRegistry, PingOutcome};
use clusterq::model::JobId;
use clusterq::protocol::DispatchOutcome;
use clusterq::types::{HostStatus, JobStatus};
use clusterq_test_utils::builders::{HostBuilder, SequenceBuilder};

use crate::common::{at, bring_up, init_tracing, TestQueue};

fn registry_with(name: &str) -> HostRegistry {
    let mut registry = HostRegistry::new(9000);
    let mut host = Host::new(name, name, format!("{name}:9000"));
    host.total_cpus = 2;
    registry.insert(host);
    registry
}

fn pings(step: &CoreStep) -> Vec<(String, String)> {
    step.work()
        .into_iter()
        .filter_map(|w| match w {
            HostWork::Ping { host, message, .. } => Some((host.clone(), message.clone())),
            _ => None,
        })
        .collect()
}

fn dispatch_count(step: &CoreStep) -> usize {
    step.work()
        .into_iter()
        .filter(|w| matches!(w, HostWork::Dispatch { .. }))
        .count()
}

#[test]
fn only_one_ping_in_flight_per_host() {
    let mut registry = registry_with("n1");

    assert_eq!(registry.claim_pings(100), vec!["n1".to_string()]);
    assert!(registry.claim_pings(101).is_empty());
    assert!(registry.claim_pings(500).is_empty());

    registry.ping_finished("n1", &PingOutcome::Ack { report: None }, 501);
    let host = registry.find("n1").unwrap();
    assert_eq!(host.status, HostStatus::Up);
    assert_eq!(host.last_response, 501);
    assert!(!host.ping_outstanding);

    assert!(registry.claim_pings(510).is_empty());
    assert_eq!(registry.claim_pings(521), vec!["n1".to_string()]);
}

#[test]
fn silent_host_dies_and_is_reprobed_on_a_slow_cadence() {
    let mut registry = registry_with("n1");
    {
        let host = registry.find_mut("n1").unwrap();
        host.status = HostStatus::Up;
        host.last_response = 1000;
        host.take_slot(JobId::new(3, 1));
    }

    assert!(registry.detect_dead(1180).is_empty());
    assert_eq!(registry.detect_dead(1181), vec![JobId::new(3, 1)]);
    let host = registry.find("n1").unwrap();
    assert_eq!(host.status, HostStatus::Dead);
    assert_eq!(host.taken_cpus, 0);
    assert!(registry.detect_dead(1400).is_empty());

    assert!(registry.claim_pings(1200).is_empty());
    assert_eq!(registry.claim_pings(1301), vec!["n1".to_string()]);
    registry.ping_finished("n1", &PingOutcome::Unreachable("refused".into()), 1302);
    assert_eq!(registry.find("n1").unwrap().status, HostStatus::Dead);
    assert!(registry.claim_pings(1350).is_empty());
    assert_eq!(registry.claim_pings(1421), vec!["n1".to_string()]);

    registry.ping_finished("n1", &PingOutcome::Ack { report: None }, 1422);
    assert_eq!(registry.find("n1").unwrap().status, HostStatus::Up);
}

#[test]
fn bad_ack_leaves_status_alone() {
    let mut registry = registry_with("n1");
    registry.claim_pings(10);
    registry.ping_finished("n1", &PingOutcome::BadAck("HUH".into()), 11);
    let host = registry.find("n1").unwrap();
    assert_eq!(host.status, HostStatus::Unknown);
    assert!(!host.ping_outstanding);
}

#[test]
fn dead_host_jobs_are_requeued_exactly_once() {
    init_tracing();
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(2).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(2)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(dispatch_count(&core.step(RuntimeEvent::Tick, at(0))), 2);
    assert_eq!(core.running().len(), 2);

    let step = core.step(RuntimeEvent::Tick, at(181));
    assert_eq!(dispatch_count(&step), 0);
    assert_eq!(core.hosts().find("n1").unwrap().status, HostStatus::Dead);
    assert!(core.running().is_empty());
    for job in core.sequence(1).unwrap().jobs.values() {
        assert_eq!(job.status, JobStatus::Waiting);
    }

    let requeues = q.job_file(1, 0).matches("status W\n").count();
    core.step(RuntimeEvent::Tick, at(250));
    assert_eq!(q.job_file(1, 0).matches("status W\n").count(), requeues);
}

#[test]
fn revived_host_takes_work_again() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(1).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));
    core.step(RuntimeEvent::Tick, at(0));
    core.step(RuntimeEvent::Tick, at(181));
    assert_eq!(core.hosts().find("n1").unwrap().status, HostStatus::Dead);

    let step = core.step(RuntimeEvent::Tick, at(301));
    assert_eq!(pings(&step).len(), 1);
    assert_eq!(dispatch_count(&step), 0);

    core.step(
        RuntimeEvent::PingFinished {
            host: "n1".into(),
            outcome: PingOutcome::Ack { report: None },
        },
        at(302),
    );
    assert_eq!(core.hosts().find("n1").unwrap().status, HostStatus::Up);
    assert_eq!(dispatch_count(&core.step(RuntimeEvent::Tick, at(303))), 1);
}

#[test]
fn unreported_job_is_requeued_after_the_missing_window() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(1).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));
    core.step(RuntimeEvent::Tick, at(0));
    let id = JobId::new(1, 0);

    bring_up(&mut core, &["n1"], at(150));
    core.step(RuntimeEvent::Tick, at(150));
    assert!(core.running().contains_key(&id));

    bring_up(&mut core, &["n1"], at(181));
    let step = core.step(RuntimeEvent::Tick, at(181));
    // Requeued, past the resend window, and placed again in the same cycle.
    assert_eq!(dispatch_count(&step), 1);
    assert_eq!(core.running()[&id].started, at(181).unix);
    assert_eq!(q.job_file(1, 0).matches("status W\n").count(), 2);
}

#[test]
fn ping_lists_stale_jobs_and_report_confirms_them() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(1).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));
    core.step(RuntimeEvent::Tick, at(0));
    core.step(
        RuntimeEvent::DispatchFinished {
            job: JobId::new(1, 0),
            host: "n1".into(),
            outcome: DispatchOutcome::Accepted { pid: Some(77) },
        },
        at(0),
    );

    bring_up(&mut core, &["n1"], at(40));
    let step = core.step(RuntimeEvent::Tick, at(61));
    assert_eq!(pings(&step), vec![("n1".to_string(), "PHONEHOME 1 0 77".to_string())]);

    core.step(
        RuntimeEvent::PingFinished {
            host: "n1".into(),
            outcome: PingOutcome::Ack {
                report: Some("[hostname n1][load 0.0][job 1 0]".into()),
            },
        },
        at(62),
    );
    assert_eq!(core.running()[&JobId::new(1, 0)].last_report, at(62).unix);
}

#[test]
fn host_update_event_adjusts_capacity() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(3).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(4)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    std::fs::write(
        q.drop_dir.join("h.vbx"),
        "hostupdate [hostname n1][load 1.2][total_cpus 3][resource scratch 0 5]\n",
    )
    .unwrap();
    let step = core.step(RuntimeEvent::Tick, at(1));

    let host = core.hosts().find("n1").unwrap();
    assert_eq!(host.total_cpus, 3);
    assert_eq!(host.resources["scratch"].count, 5);
    assert_eq!(dispatch_count(&step), 1);
}

#[test]
fn jobrunning_and_jobdone_events_track_the_host() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(2).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));
    core.step(RuntimeEvent::Tick, at(0));

    std::fs::write(q.drop_dir.join("r.vbx"), format!("jobrunning n1 1 0 900 901 {}\n", at(1).unix)).unwrap();
    core.step(RuntimeEvent::Tick, at(2));
    let job = &core.running()[&JobId::new(1, 0)];
    assert_eq!((job.status, job.pid, job.childpid), (JobStatus::Running, 900, 901));

    std::fs::write(q.drop_dir.join("s.vbx"), "jobdone 1 0 0\n").unwrap();
    let step = core.step(RuntimeEvent::Tick, at(5));
    assert!(!core.running().contains_key(&JobId::new(1, 0)));
    assert_eq!(dispatch_count(&step), 1);
}
