// src/store/queue.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::fs::FileSystem;
use crate::model::{Job, Sequence};
use crate::store::records::{
    complete_lines, file_name, job_file_name, parse_job_file_name, parse_sequence_dir_name,
    sequence_dir_name, DropPatterns, COUNTER_FILE, DEFUNCT_SUFFIX, INFO_FILE,
};

/// Durable storage for the whole queue.
///
/// Layout under `queue_dir`:
///
/// ```text
/// vb.num                 next sequence number
/// 00000042/info.seq      sequence metadata
/// 00000042/00000.job     one file per job
/// ```
///
/// Whole files are written atomically; field updates are appended.
#[derive(Debug, Clone)]
pub struct QueueStore {
    pub(crate) fs: Arc<dyn FileSystem>,
    queue_dir: PathBuf,
    drop_dir: PathBuf,
    pub(crate) patterns: DropPatterns,
}

impl QueueStore {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        queue_dir: impl Into<PathBuf>,
        drop_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            fs,
            queue_dir: queue_dir.into(),
            drop_dir: drop_dir.into(),
            patterns: DropPatterns::new()?,
        })
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    pub fn drop_dir(&self) -> &Path {
        &self.drop_dir
    }

    pub fn sequence_dir(&self, seqnum: u32) -> PathBuf {
        self.queue_dir.join(sequence_dir_name(seqnum))
    }

    pub fn job_path(&self, seqnum: u32, jnum: u32) -> PathBuf {
        self.sequence_dir(seqnum).join(job_file_name(jnum))
    }

    pub fn info_path(&self, seqnum: u32) -> PathBuf {
        self.sequence_dir(seqnum).join(INFO_FILE)
    }

    /// Create the queue and drop directories if missing.
    pub fn ensure_layout(&self) -> Result<()> {
        self.fs.create_dir_all(&self.queue_dir)?;
        self.fs.create_dir_all(&self.drop_dir)?;
        Ok(())
    }

    /// Load every sequence in the queue directory.
    ///
    /// A sequence directory without `info.seq` is an orphan and is removed.
    pub fn load_all(&self) -> Result<BTreeMap<u32, Sequence>> {
        self.scan(true)
    }

    /// Like [`QueueStore::load_all`] but never touches the disk.
    pub fn peek_all(&self) -> Result<BTreeMap<u32, Sequence>> {
        self.scan(false)
    }

    fn scan(&self, purge_orphans: bool) -> Result<BTreeMap<u32, Sequence>> {
        let mut sequences = BTreeMap::new();
        if !self.fs.is_dir(&self.queue_dir) {
            return Ok(sequences);
        }

        for dir in self.fs.read_dir(&self.queue_dir)? {
            let Some(seqnum) = file_name(&dir).and_then(parse_sequence_dir_name) else {
                continue;
            };
            if !self.fs.is_dir(&dir) {
                continue;
            }
            if !self.fs.is_file(&dir.join(INFO_FILE)) {
                if !purge_orphans {
                    continue;
                }
                warn!(seq = seqnum, dir = ?dir, "sequence directory has no info file; purging orphan");
                if let Err(err) = self.fs.remove_dir_all(&dir) {
                    warn!(seq = seqnum, error = %err, "failed to purge orphaned sequence directory");
                }
                continue;
            }

            match self.load_sequence_from(&dir) {
                Ok(mut seq) => {
                    if seq.seqnum != seqnum {
                        debug!(
                            dir_seq = seqnum,
                            file_seq = seq.seqnum,
                            "sequence number in info file differs from directory; using directory"
                        );
                        seq.seqnum = seqnum;
                        seq.propagate_to_jobs();
                    }
                    sequences.insert(seqnum, seq);
                }
                Err(err) => warn!(seq = seqnum, error = %err, "failed to load sequence"),
            }
        }

        info!(count = sequences.len(), "loaded queue");
        Ok(sequences)
    }

    /// Load a sequence from any directory holding `info.seq` and `.job`
    /// files (a queue entry or a drop-directory bundle).
    pub fn load_sequence_from(&self, dir: &Path) -> Result<Sequence> {
        let info_path = dir.join(INFO_FILE);
        let info = self
            .fs
            .read_to_string(&info_path)
            .with_context(|| format!("reading sequence info {:?}", info_path))?;
        let mut seq = Sequence::from_info_record(complete_lines(&info));

        for path in self.fs.read_dir(dir)? {
            let Some(jnum) = file_name(&path).and_then(parse_job_file_name) else {
                continue;
            };
            let text = match self.fs.read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    warn!(path = ?path, error = %err, "skipping unreadable job file");
                    continue;
                }
            };
            let mut job = Job::from_record(complete_lines(&text));
            job.jnum = jnum;
            seq.jobs.insert(jnum, job);
        }

        seq.modtime = seq.queued_time;
        seq.propagate_to_jobs();
        seq.update_counts();
        Ok(seq)
    }

    /// Write a sequence into its queue directory.
    ///
    /// Jobs are renumbered densely from zero first. Job files are written
    /// before `info.seq`, so an interrupted write leaves an orphan that the
    /// next load purges.
    pub fn write_sequence(&self, seq: &mut Sequence) -> Result<()> {
        let dir = self.sequence_dir(seq.seqnum);
        self.fs.create_dir_all(&dir)?;

        seq.renumber(0);
        seq.propagate_to_jobs();

        for (jnum, job) in &seq.jobs {
            let path = dir.join(job_file_name(*jnum));
            self.fs.write_atomic(&path, job.to_record().as_bytes())?;
        }
        self.fs
            .write_atomic(&dir.join(INFO_FILE), seq.info_record().as_bytes())?;

        seq.update_counts();
        Ok(())
    }

    /// Append a field update to a job file.
    pub fn append_job_line(&self, seqnum: u32, jnum: u32, line: &str) -> Result<()> {
        self.fs.append_line(&self.job_path(seqnum, jnum), line)
    }

    /// Append a field update to a sequence's `info.seq`.
    pub fn append_seq_line(&self, seqnum: u32, line: &str) -> Result<()> {
        self.fs.append_line(&self.info_path(seqnum), line)
    }

    fn counter_path(&self) -> PathBuf {
        self.queue_dir.join(COUNTER_FILE)
    }

    /// Read the next sequence number. A missing or unreadable counter
    /// starts at 1.
    pub fn read_counter(&self) -> u32 {
        self.fs
            .read_to_string(&self.counter_path())
            .ok()
            .and_then(|text| text.split_whitespace().next()?.parse().ok())
            .unwrap_or(1)
    }

    pub fn write_counter(&self, next: u32) -> Result<()> {
        self.fs
            .write_atomic(&self.counter_path(), format!("{next}\n").as_bytes())
    }

    /// First phase of deletion: rename the directory with a `_defunct`
    /// suffix.
    pub fn mark_defunct(&self, seqnum: u32) -> Result<()> {
        let dir = self.sequence_dir(seqnum);
        if !self.fs.exists(&dir) {
            return Ok(());
        }
        let mut target = dir.clone().into_os_string();
        target.push(DEFUNCT_SUFFIX);
        self.fs.rename(&dir, Path::new(&target))
    }

    /// Second phase: remove every `*_defunct` directory.
    pub fn purge_defunct(&self) -> Result<usize> {
        let mut purged = 0;
        if !self.fs.is_dir(&self.queue_dir) {
            return Ok(0);
        }
        for path in self.fs.read_dir(&self.queue_dir)? {
            let is_defunct = file_name(&path).is_some_and(|n| n.ends_with(DEFUNCT_SUFFIX));
            if is_defunct && self.fs.is_dir(&path) {
                self.fs.remove_dir_all(&path)?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
