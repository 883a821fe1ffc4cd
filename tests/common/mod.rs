// tests/common/mod.rs

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use clusterq::config::ConfigFile;
use clusterq::engine::{CoreRuntime, Timestamp};
use clusterq::fs::RealFileSystem;
use clusterq::model::Sequence;
use clusterq::store::QueueStore;
use clusterq::types::HostStatus;
use clusterq_test_utils::builders::ConfigFileBuilder;

pub use clusterq_test_utils::init_tracing;

/// Tuesday, noon. Fixed so schedules and reservations are reproducible.
pub const T0: i64 = 1_700_000_000;

pub fn at(offset_secs: i64) -> Timestamp {
    Timestamp::at(T0 + offset_secs, 2, 12)
}

/// A queue rooted in a temporary directory.
pub struct TestQueue {
    pub dir: TempDir,
    pub queue_dir: PathBuf,
    pub drop_dir: PathBuf,
}

impl TestQueue {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue_dir = dir.path().join("queue");
        let drop_dir = dir.path().join("drop");
        std::fs::create_dir_all(&queue_dir).expect("queue dir");
        std::fs::create_dir_all(&drop_dir).expect("drop dir");
        Self {
            dir,
            queue_dir,
            drop_dir,
        }
    }

    pub fn store(&self) -> QueueStore {
        QueueStore::new(Arc::new(RealFileSystem), &self.queue_dir, &self.drop_dir).expect("store")
    }

    /// Config builder already pointing at this queue.
    pub fn config(&self) -> ConfigFileBuilder {
        ConfigFileBuilder::new().queue_dirs(&self.queue_dir, &self.drop_dir)
    }

    /// Persist sequences directly into the queue directory.
    pub fn seed(&self, sequences: Vec<Sequence>) {
        let store = self.store();
        for mut seq in sequences {
            store.write_sequence(&mut seq).expect("write sequence");
        }
    }

    /// Build and load a deterministic core over this queue.
    pub fn core(&self, config: &ConfigFile, now: Timestamp) -> CoreRuntime {
        let mut core = CoreRuntime::new(config, self.store()).with_seed(7);
        core.load(now).expect("load queue");
        core
    }

    pub fn job_file(&self, seq: u32, job: u32) -> String {
        std::fs::read_to_string(self.store().job_path(seq, job)).unwrap_or_default()
    }

    pub fn info_file(&self, seq: u32) -> String {
        std::fs::read_to_string(self.store().info_path(seq)).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Mark hosts as answering, as if a ping had just been acknowledged.
pub fn bring_up(core: &mut CoreRuntime, hosts: &[&str], now: Timestamp) {
    for name in hosts {
        let host = core.hosts_mut().find_mut(name).expect("known host");
        host.status = HostStatus::Up;
        host.last_response = now.unix;
    }
}
