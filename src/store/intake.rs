// src/store/intake.rs

//! Submission intake from the drop directory.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use crate::model::Sequence;
use crate::store::queue::QueueStore;
use crate::store::records::{file_name, INFO_FILE};

impl QueueStore {
    /// Ingest every `submit_*` bundle in the drop directory.
    ///
    /// Each bundle gets the next free sequence number, starting at the
    /// counter value and skipping numbers in use. The counter is rewritten
    /// afterwards.
    pub fn intake_drop_dir(
        &self,
        existing: &BTreeMap<u32, Sequence>,
        now: i64,
    ) -> Result<Vec<Sequence>> {
        let mut admitted = Vec::new();
        if !self.fs.is_dir(self.drop_dir()) {
            return Ok(admitted);
        }

        let bundles: Vec<_> = self
            .fs
            .read_dir(self.drop_dir())?
            .into_iter()
            .filter(|p| {
                file_name(p).is_some_and(|n| self.patterns.submit.is_match(n)) && self.fs.is_dir(p)
            })
            .collect();

        if bundles.is_empty() {
            return Ok(admitted);
        }

        let mut next = self.read_counter();
        for bundle in bundles {
            next = self.next_free_number(next, existing, &admitted);
            match self.intake_bundle(&bundle, next, now) {
                Ok(seq) => {
                    next += 1;
                    admitted.push(seq);
                }
                Err(err) => warn!(bundle = ?bundle, error = %err, "could not ingest submission"),
            }
        }
        self.write_counter(next)?;

        Ok(admitted)
    }

    /// Ingest a single submission bundle under sequence number `seqnum`.
    pub fn intake_bundle(&self, bundle: &Path, seqnum: u32, now: i64) -> Result<Sequence> {
        if !self.fs.is_file(&bundle.join(INFO_FILE)) {
            return Err(anyhow!("bundle {:?} has no {INFO_FILE}", bundle));
        }
        let mut seq = self.load_sequence_from(bundle)?;

        if let Some(job) = seq.dependency_cycle() {
            error!(bundle = ?bundle, job, "submission has a dependency cycle; rejecting");
            let name = file_name(bundle).unwrap_or("bundle");
            let rejected = bundle.with_file_name(format!("rejected_{name}"));
            self.fs.rename(bundle, &rejected)?;
            return Err(anyhow!("dependency cycle involving job {job}"));
        }

        seq.seqnum = seqnum;
        seq.queued_time = now;
        seq.modtime = now;
        self.write_sequence(&mut seq)?;
        self.fs.remove_dir_all(bundle)?;

        info!(
            seq = seqnum,
            name = %seq.name,
            owner = %seq.owner,
            jobs = seq.jobs.len(),
            "sequence received"
        );
        Ok(seq)
    }

    /// Allocate one sequence number outside of the drop-directory scan.
    pub fn allocate_number(&self, existing: &BTreeMap<u32, Sequence>) -> Result<u32> {
        let n = self.next_free_number(self.read_counter(), existing, &[]);
        self.write_counter(n + 1)?;
        Ok(n)
    }

    fn next_free_number(
        &self,
        mut candidate: u32,
        existing: &BTreeMap<u32, Sequence>,
        admitted: &[Sequence],
    ) -> u32 {
        while existing.contains_key(&candidate)
            || admitted.iter().any(|s| s.seqnum == candidate)
            || self.fs.exists(&self.sequence_dir(candidate))
        {
            candidate += 1;
        }
        candidate
    }
}
