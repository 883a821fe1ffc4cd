// tests/queue_store.rs

mod common;

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clusterq::fs::mock::MockFileSystem;
use clusterq::hosts::Reservation;
use clusterq::store::records::parse_job_file_name;
use clusterq::store::{QueueEvent, QueueStore};
use clusterq::types::JobStatus;
use clusterq_test_utils::builders::{write_bundle, JobBuilder, SequenceBuilder};

use crate::common::{init_tracing, TestQueue};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn written_sequence_reloads_with_jobs_and_policy() -> TestResult {
    init_tracing();
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(3, "alice").priority(4).chain(3).build()]);

    let loaded = q.store().load_all()?;
    let seq = &loaded[&3];
    assert_eq!(seq.owner, "alice");
    assert_eq!(seq.priority.priority, 4);
    assert_eq!(seq.jobs.len(), 3);
    assert!(seq.jobs[&2].waitfor.contains(&1));
    assert_eq!(seq.jobs[&1].owner, "alice");
    assert_eq!(seq.counts.waiting, 3);
    Ok(())
}

#[test]
fn only_five_digit_job_files_are_loaded() -> TestResult {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(2, "alice").jobs(2).build()]);
    let dir = q.store().sequence_dir(2);
    std::fs::write(dir.join("4000000000.job"), "status W\nname stray\n")?;
    std::fs::write(dir.join("7.job"), "status W\nname short\n")?;

    let loaded = q.store().load_all()?;
    let seq = &loaded[&2];
    assert_eq!(seq.jobs.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(seq.done_table().len(), 2);

    assert_eq!(parse_job_file_name("00042.job"), Some(42));
    assert_eq!(parse_job_file_name("042.job"), None);
    assert_eq!(parse_job_file_name("123456.job"), None);
    Ok(())
}

#[test]
fn appended_lines_override_and_torn_append_is_ignored() -> TestResult {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "bob").jobs(1).build()]);
    let store = q.store();

    store.append_job_line(1, 0, "status R")?;
    store.append_job_line(1, 0, "host node1")?;
    // A crash mid-append leaves a final line without its newline.
    let path = store.job_path(1, 0);
    let mut text = std::fs::read_to_string(&path)?;
    text.push_str("status D");
    std::fs::write(&path, text)?;

    let loaded = store.load_all()?;
    let job = &loaded[&1].jobs[&0];
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.host, "node1");
    Ok(())
}

#[test]
fn sequence_directory_without_info_is_purged_at_load() -> TestResult {
    let q = TestQueue::new();
    q.seed(vec![SequenceBuilder::new(1, "bob").jobs(1).build()]);
    let orphan = q.queue_dir.join("00000009");
    std::fs::create_dir_all(&orphan)?;
    std::fs::write(orphan.join("00000.job"), "status W\n")?;

    let peeked = q.store().peek_all()?;
    assert_eq!(peeked.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert!(orphan.exists(), "read-only scan must not purge");

    let loaded = q.store().load_all()?;
    assert_eq!(loaded.len(), 1);
    assert!(!orphan.exists());
    Ok(())
}

#[test]
fn intake_assigns_consecutive_free_numbers_and_rewrites_counter() -> TestResult {
    init_tracing();
    let q = TestQueue::new();
    let store = q.store();
    store.write_counter(5)?;
    std::fs::create_dir_all(q.queue_dir.join("00000006"))?;

    let first = SequenceBuilder::new(0, "alice").name("first").jobs(2).build();
    let second = SequenceBuilder::new(0, "carol").name("second").jobs(1).build();
    let b1 = write_bundle(&q.drop_dir, "a", &first);
    let b2 = write_bundle(&q.drop_dir, "b", &second);

    let admitted = store.intake_drop_dir(&BTreeMap::new(), 1_000)?;
    let mut numbers: Vec<(u32, String)> =
        admitted.iter().map(|s| (s.seqnum, s.name.clone())).collect();
    numbers.sort();
    assert_eq!(numbers.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![5, 7]);
    assert_eq!(store.read_counter(), 8);
    assert!(!b1.exists() && !b2.exists());
    assert!(store.info_path(5).exists() && store.info_path(7).exists());

    let reloaded = store.load_all()?;
    assert_eq!(reloaded[&5].queued_time, 1_000);
    Ok(())
}

#[test]
fn bundle_with_dependency_cycle_is_rejected() -> TestResult {
    let q = TestQueue::new();
    let seq = SequenceBuilder::new(0, "alice")
        .job(JobBuilder::new(0).waitfor(&[1]))
        .job(JobBuilder::new(1).waitfor(&[0]))
        .build();
    let bundle = write_bundle(&q.drop_dir, "loop", &seq);

    let admitted = q.store().intake_drop_dir(&BTreeMap::new(), 1_000)?;
    assert!(admitted.is_empty());
    assert!(!bundle.exists());
    assert!(q.drop_dir.join("rejected_submit_loop").exists());
    assert!(q.store().load_all()?.is_empty());
    Ok(())
}

#[test]
fn defunct_sequences_are_renamed_then_purged() -> TestResult {
    let q = TestQueue::new();
    q.seed(vec![
        SequenceBuilder::new(1, "a").jobs(1).build(),
        SequenceBuilder::new(2, "b").jobs(1).build(),
    ]);
    let store = q.store();

    store.mark_defunct(1)?;
    assert!(q.queue_dir.join("00000001_defunct").exists());
    assert_eq!(store.load_all()?.keys().copied().collect::<Vec<_>>(), vec![2]);

    assert_eq!(store.purge_defunct()?, 1);
    assert!(!q.queue_dir.join("00000001_defunct").exists());
    Ok(())
}

fn mock_store() -> (MockFileSystem, QueueStore) {
    let fs = MockFileSystem::new();
    fs.add_dir("/q");
    fs.add_dir("/drop");
    let store = QueueStore::new(Arc::new(fs.clone()), "/q", "/drop").expect("store");
    (fs, store)
}

#[test]
fn event_files_are_parsed_and_deleted() {
    let (fs, store) = mock_store();
    fs.add_file("/drop/001.vbx", "jobdone 3 1 1700000000\nignored second line\n");
    fs.add_file("/drop/002.vbx", "setjobinfo 3 2 percentdone 50\n");
    fs.add_file("/drop/003.vbx", "frobnicate 1 2\n");
    fs.add_file("/drop/notes.txt", "jobdone 9 9 9\n");

    let events = store.drain_events();
    assert_eq!(
        events,
        vec![
            QueueEvent::JobDone {
                seq: 3,
                job: 1,
                finished: 1_700_000_000
            },
            QueueEvent::SetJobInfo {
                seq: 3,
                job: 2,
                line: "percentdone 50".into()
            },
            QueueEvent::Unknown {
                line: "frobnicate 1 2".into()
            },
        ]
    );
    assert!(fs.contents("/drop/001.vbx").is_none());
    assert!(fs.contents("/drop/notes.txt").is_some());
}

#[test]
fn event_lines_cover_every_kind() {
    assert_eq!(
        QueueEvent::parse("jobrunning node1 4 0 321 322 1700000000"),
        QueueEvent::JobRunning {
            host: "node1".into(),
            seq: 4,
            job: 0,
            pid: 321,
            childpid: 322,
            started: 1_700_000_000
        }
    );
    assert_eq!(
        QueueEvent::parse("retry 4 2 1"),
        QueueEvent::Retry {
            seq: 4,
            job: 2,
            generations: 1
        }
    );
    assert_eq!(
        QueueEvent::parse("killsequence 4 K"),
        QueueEvent::KillSequence {
            seq: 4,
            status: "K".into()
        }
    );
    assert_eq!(
        QueueEvent::parse("setseqinfo 4 priority 2"),
        QueueEvent::SetSeqInfo {
            seq: 4,
            line: "priority 2".into()
        }
    );
    assert_eq!(QueueEvent::parse("adminemail"), QueueEvent::AdminEmail);
    assert!(matches!(QueueEvent::parse("setjobinfo 4"), QueueEvent::Unknown { .. }));
}

#[test]
fn reservations_persist_and_expired_files_are_dropped() -> TestResult {
    let (fs, store) = mock_store();
    let live = Reservation {
        owner: "alice".into(),
        start: 100,
        end: 10_000,
        reason: String::new(),
    };
    let stale = Reservation {
        owner: "bob".into(),
        start: 0,
        end: 50,
        reason: String::new(),
    };
    store.save_reservation("node1", &live)?;
    store.save_reservation("node2", &stale)?;

    let loaded = store.load_reservations(500);
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].host, "node1");
    assert_eq!(loaded[0].reservation.owner, "alice");
    assert!(fs.contents("/drop/node2.bob.gim").is_none());

    store.remove_reservation("node1", "alice")?;
    assert!(store.load_reservations(500).is_empty());
    Ok(())
}

#[test]
fn counter_defaults_to_one() {
    let (_fs, store) = mock_store();
    assert_eq!(store.read_counter(), 1);
    assert_eq!(store.queue_dir(), Path::new("/q"));
}
