// tests/admission_scenarios.rs

mod common;

use clusterq::control::ControlCommand;
use clusterq::engine::{CoreRuntime, CoreStep, RuntimeEvent, Timestamp};
use clusterq::exec::HostWork;
use clusterq::model::{JobId, PriorityPolicy};
use clusterq::protocol::DispatchOutcome;
use clusterq::types::JobStatus;
use clusterq_test_utils::builders::{HostBuilder, JobBuilder, SequenceBuilder};

use crate::common::{at, bring_up, init_tracing, TestQueue};

/// (job, host) for every dispatch in a step.
fn dispatched(step: &CoreStep) -> Vec<(JobId, String)> {
    step.work()
        .into_iter()
        .filter_map(|w| match w {
            HostWork::Dispatch { host, ticket, .. } => Some((ticket.id(), host.clone())),
            _ => None,
        })
        .collect()
}

fn tick(core: &mut CoreRuntime, now: Timestamp) -> Vec<(JobId, String)> {
    dispatched(&core.step(RuntimeEvent::Tick, now))
}

#[test]
fn chain_runs_one_link_at_a_time() {
    init_tracing();
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").chain(3).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(4)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)), vec![(JobId::new(1, 0), "n1".to_string())]);
    assert!(tick(&mut core, at(5)).is_empty());

    std::fs::write(q.drop_dir.join("a.vbx"), format!("jobdone 1 0 {}\n", at(8).unix)).unwrap();
    assert_eq!(tick(&mut core, at(10)), vec![(JobId::new(1, 1), "n1".to_string())]);
    assert_eq!(core.sequence(1).unwrap().jobs[&0].status, JobStatus::Done);
    assert!(q.job_file(1, 0).contains("status D\n"));
}

#[test]
fn higher_priority_sequence_is_served_first() {
    let q = TestQueue::new();
    q.seed(vec![
        SequenceBuilder::new(1, "low").priority(3).jobs(2).build(),
        SequenceBuilder::new(2, "high").priority(5).jobs(2).build(),
    ]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)), vec![(JobId::new(2, 0), "n1".to_string())]);
}

#[test]
fn equal_priority_goes_to_lowest_sequence_number() {
    let q = TestQueue::new();
    q.seed(vec![
        SequenceBuilder::new(4, "a").jobs(1).build(),
        SequenceBuilder::new(2, "b").jobs(1).build(),
    ]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)), vec![(JobId::new(2, 0), "n1".to_string())]);
}

#[test]
fn maxperhost_spreads_jobs_across_hosts() {
    let q = TestQueue::new();
    let policy = PriorityPolicy::from_args(&["0", "3", "0", "0", "1"]).unwrap();
    q.seed(vec![SequenceBuilder::new(1, "alice").policy(policy).jobs(3).build()]);
    let config = q
        .config()
        .with_host("n1", HostBuilder::new("n1").cpus(4))
        .with_host("n2", HostBuilder::new("n2").cpus(4))
        .build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1", "n2"], at(0));

    let placed = tick(&mut core, at(0));
    assert_eq!(placed.len(), 2);
    assert_ne!(placed[0].1, placed[1].1);
}

#[test]
fn maxjobs_caps_running_jobs_of_a_sequence() {
    let q = TestQueue::new();
    let policy = PriorityPolicy::from_args(&["2", "3"]).unwrap();
    q.seed(vec![SequenceBuilder::new(1, "alice").policy(policy).jobs(5).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(8)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)).len(), 2);
    assert!(tick(&mut core, at(5)).is_empty());
}

#[test]
fn global_resource_limits_concurrency() {
    let q = TestQueue::new();
    let seq = SequenceBuilder::new(1, "alice")
        .job(JobBuilder::new(0).jobtype("spm"))
        .job(JobBuilder::new(1).jobtype("spm"))
        .job(JobBuilder::new(2).jobtype("spm"))
        .build();
    q.seed(vec![seq]);
    let config = q
        .config()
        .with_jobtype("spm", &[("matlab", 1)])
        .with_host("n1", HostBuilder::new("n1").cpus(4).resource("matlab", 1, true))
        .with_host("n2", HostBuilder::new("n2").cpus(4).resource("matlab", 1, true))
        .build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1", "n2"], at(0));

    assert_eq!(tick(&mut core, at(0)).len(), 1);
}

#[test]
fn exhausted_local_pool_falls_back_to_global() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").require("matlab", 1).jobs(1).build()]);
    let config = q
        .config()
        .with_host("n1", HostBuilder::new("n1").cpus(4).resource("matlab", 0, false))
        .with_host("n2", HostBuilder::new("n2").cpus(4).resource("matlab", 5, true))
        .build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)), vec![(JobId::new(1, 0), "n1".to_string())]);
}

#[test]
fn local_and_global_pools_are_debited_separately() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").require("matlab", 1).jobs(3).build()]);
    let config = q
        .config()
        .with_host("n1", HostBuilder::new("n1").cpus(4).resource("matlab", 1, false))
        .with_host("n2", HostBuilder::new("n2").cpus(4).resource("matlab", 1, true))
        .build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(
        tick(&mut core, at(0)),
        vec![
            (JobId::new(1, 0), "n1".to_string()),
            (JobId::new(1, 1), "n1".to_string()),
        ]
    );
    assert!(tick(&mut core, at(5)).is_empty());
}

#[test]
fn local_resource_is_per_host() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").require("gpu", 1).jobs(3).build()]);
    let config = q
        .config()
        .with_host("n1", HostBuilder::new("n1").cpus(4).resource("gpu", 1, false))
        .with_host("n2", HostBuilder::new("n2").cpus(4).resource("gpu", 1, false))
        .with_host("n3", HostBuilder::new("n3").cpus(4))
        .build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1", "n2", "n3"], at(0));

    let mut hosts: Vec<String> = tick(&mut core, at(0)).into_iter().map(|(_, h)| h).collect();
    hosts.sort();
    assert_eq!(hosts, vec!["n1".to_string(), "n2".to_string()]);
}

#[test]
fn forced_host_restricts_placement() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").forced_host("n2").jobs(1).build()]);
    let config = q
        .config()
        .with_host("n1", HostBuilder::new("n1").cpus(4).rank(0))
        .with_host("n2", HostBuilder::new("n2.example.org").cpus(4).rank(5))
        .build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1", "n2"], at(0));

    assert_eq!(tick(&mut core, at(0)), vec![(JobId::new(1, 0), "n2".to_string())]);
}

#[test]
fn host_cpu_count_caps_dispatches() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(5).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(2)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)).len(), 2);
    let host = core.hosts().find("n1").unwrap();
    assert_eq!((host.taken_cpus, host.avail_cpus), (2, 0));
}

#[test]
fn host_threshold_blocks_low_priority() {
    let q = TestQueue::new();
    q.seed(vec![
        SequenceBuilder::new(1, "alice").priority(3).jobs(1).build(),
        SequenceBuilder::new(2, "bob").priority(4).jobs(1).build(),
    ]);
    let config = q
        .config()
        .with_host("n1", HostBuilder::new("n1").cpus(4).avail("0-6 0-23 4 4"))
        .build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)), vec![(JobId::new(2, 0), "n1".to_string())]);
}

#[test]
fn reservation_blocks_other_users_until_given_back() {
    init_tracing();
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "bob").jobs(1).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(2)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    let reply = core.handle_control("alice", ControlCommand::parse("GIMME n1 2").unwrap(), at(0));
    assert!(!reply.reply.is_error(), "{:?}", reply.reply);
    assert!(q.drop_dir.join("n1.alice.gim").exists());

    assert!(tick(&mut core, at(1)).is_empty());

    let reply = core.handle_control("bob", ControlCommand::parse("GIVEBACK n1").unwrap(), at(2));
    assert!(reply.reply.is_error());

    core.handle_control("alice", ControlCommand::parse("GIVEBACK n1").unwrap(), at(3));
    assert!(!q.drop_dir.join("n1.alice.gim").exists());
    assert_eq!(tick(&mut core, at(4)).len(), 1);
}

#[test]
fn reservation_admits_its_owner() {
    let q = TestQueue::new();
    q.seed(vec![
        SequenceBuilder::new(1, "bob").priority(5).jobs(1).build(),
        SequenceBuilder::new(2, "alice").priority(1).jobs(1).build(),
    ]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(2)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));
    core.handle_control("alice", ControlCommand::parse("GIMME n1").unwrap(), at(0));

    assert_eq!(tick(&mut core, at(1)), vec![(JobId::new(2, 0), "n1".to_string())]);
}

#[test]
fn sequence_waits_for_another_sequence_to_leave_the_queue() {
    let q = TestQueue::new();
    q.seed(vec![
        SequenceBuilder::new(1, "alice").jobs(1).build(),
        SequenceBuilder::new(2, "alice").waitfor_sequence(1).jobs(1).build(),
    ]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(4)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)), vec![(JobId::new(1, 0), "n1".to_string())]);

    std::fs::write(q.drop_dir.join("d.vbx"), "jobdone 1 0 0\n").unwrap();
    // Sequence 1 finishes and is cleaned up in the same cycle, unblocking 2.
    assert_eq!(tick(&mut core, at(10)), vec![(JobId::new(2, 0), "n1".to_string())]);
    assert!(core.sequence(1).is_none());
}

#[test]
fn retry_event_resets_the_job_and_requested_generations() {
    init_tracing();
    let q = TestQueue::new();
    let chain = |seqnum: u32| {
        SequenceBuilder::new(seqnum, "alice")
            .job(JobBuilder::new(0).status(JobStatus::Done))
            .job(JobBuilder::new(1).waitfor(&[0]).status(JobStatus::Done))
            .job(JobBuilder::new(2).waitfor(&[1]).status(JobStatus::Bad))
            .build()
    };
    q.seed(vec![chain(1), chain(2)]);
    let config = q.config().build();
    let mut core = q.core(&config, at(0));

    std::fs::write(q.drop_dir.join("r1.vbx"), "retry 1 2 0\n").unwrap();
    std::fs::write(q.drop_dir.join("r2.vbx"), "retry 2 2 1\n").unwrap();
    tick(&mut core, at(1));

    let statuses = |seqnum: u32| -> Vec<JobStatus> {
        core.sequence(seqnum).unwrap().jobs.values().map(|j| j.status).collect()
    };
    assert_eq!(statuses(1), vec![JobStatus::Done, JobStatus::Done, JobStatus::Waiting]);
    assert_eq!(statuses(2), vec![JobStatus::Done, JobStatus::Waiting, JobStatus::Waiting]);
    assert_eq!(core.sequence(2).unwrap().counts.waiting, 2);

    assert!(q.job_file(1, 2).ends_with("startedtime 0\nstatus W\n"));
    assert!(!q.job_file(1, 1).contains("startedtime 0"));
    assert!(q.job_file(2, 1).ends_with("status W\n"));
    assert!(!q.job_file(2, 0).contains("startedtime 0"));
}

#[test]
fn paused_queue_dispatches_nothing() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(1).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    core.handle_control("admin", ControlCommand::QueueOff, at(0));
    assert!(tick(&mut core, at(0)).is_empty());
    core.handle_control("admin", ControlCommand::QueueOn, at(1));
    assert_eq!(tick(&mut core, at(1)).len(), 1);
}

#[test]
fn refused_dispatch_requeues_and_frees_the_cpu() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(1).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));

    assert_eq!(tick(&mut core, at(0)).len(), 1);
    assert_eq!(core.sequence(1).unwrap().jobs[&0].status, JobStatus::Shipped);

    core.step(
        RuntimeEvent::DispatchFinished {
            job: JobId::new(1, 0),
            host: "n1".into(),
            outcome: DispatchOutcome::Refused("NAK".into()),
        },
        at(1),
    );
    assert_eq!(core.sequence(1).unwrap().jobs[&0].status, JobStatus::Waiting);
    assert!(core.running().is_empty());
    assert_eq!(core.hosts().find("n1").unwrap().taken_cpus, 0);
    assert!(q.job_file(1, 0).ends_with("status W\n"));

    // Recently started: held back until the resend window passes.
    assert!(tick(&mut core, at(60)).is_empty());
    bring_up(&mut core, &["n1"], at(121));
    assert_eq!(tick(&mut core, at(121)).len(), 1);
}

#[test]
fn accepted_dispatch_records_the_pid() {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "alice").jobs(1).build()]);
    let config = q.config().with_host("n1", HostBuilder::new("n1").cpus(1)).build();
    let mut core = q.core(&config, at(0));
    bring_up(&mut core, &["n1"], at(0));
    tick(&mut core, at(0));

    core.step(
        RuntimeEvent::DispatchFinished {
            job: JobId::new(1, 0),
            host: "n1".into(),
            outcome: DispatchOutcome::Accepted { pid: Some(4242) },
        },
        at(1),
    );
    assert_eq!(core.running()[&JobId::new(1, 0)].pid, 4242);
    assert!(q.job_file(1, 0).contains("pid 4242\n"));
}
