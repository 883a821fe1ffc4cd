#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clusterq::config::model::{RawHost, RawJobType, RawResource};
use clusterq::config::{ConfigFile, RawConfigFile};
use clusterq::model::{Job, PriorityPolicy, Sequence};
use clusterq::types::{JobStatus, SequenceStatus};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn queue_dirs(mut self, queue_dir: impl AsRef<Path>, drop_dir: impl AsRef<Path>) -> Self {
        self.config.scheduler.queue_dir = queue_dir.as_ref().to_path_buf();
        self.config.scheduler.drop_dir = drop_dir.as_ref().to_path_buf();
        self
    }

    pub fn superuser(mut self, user: &str) -> Self {
        self.config.scheduler.superusers.push(user.to_string());
        self
    }

    pub fn with_host(mut self, nickname: &str, host: HostBuilder) -> Self {
        self.config.host.insert(nickname.to_string(), host.raw);
        self
    }

    pub fn with_jobtype(mut self, name: &str, requires: &[(&str, u32)]) -> Self {
        let requires: BTreeMap<String, u32> =
            requires.iter().map(|(n, c)| (n.to_string(), *c)).collect();
        self.config.jobtype.insert(name.to_string(), RawJobType { requires });
        self
    }

    pub fn raw(&self) -> &RawConfigFile {
        &self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `[host.<nick>]` section.
pub struct HostBuilder {
    raw: RawHost,
}

impl HostBuilder {
    pub fn new(hostname: &str) -> Self {
        Self {
            raw: RawHost {
                hostname: hostname.to_string(),
                address: None,
                rank: 0,
                cpus: 1,
                avail: Vec::new(),
                resources: Vec::new(),
            },
        }
    }

    pub fn cpus(mut self, cpus: u32) -> Self {
        self.raw.cpus = cpus;
        self
    }

    pub fn rank(mut self, rank: i32) -> Self {
        self.raw.rank = rank;
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.raw.address = Some(address.to_string());
        self
    }

    pub fn avail(mut self, line: &str) -> Self {
        self.raw.avail.push(line.to_string());
        self
    }

    pub fn resource(mut self, name: &str, count: i64, global: bool) -> Self {
        self.raw.resources.push(RawResource {
            name: name.to_string(),
            count,
            global,
        });
        self
    }
}

/// Builder for a `Job`.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(jnum: u32) -> Self {
        Self {
            job: Job {
                jnum,
                name: format!("job{jnum}"),
                jobtype: "generic".to_string(),
                dirname: "/data/study".to_string(),
                ..Job::default()
            },
        }
    }

    pub fn jobtype(mut self, jobtype: &str) -> Self {
        self.job.jobtype = jobtype.to_string();
        self
    }

    pub fn waitfor(mut self, jobs: &[u32]) -> Self {
        self.job.waitfor.extend(jobs.iter().copied());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.job.host = host.to_string();
        self
    }

    pub fn argument(mut self, key: &str, value: &str) -> Self {
        self.job.arguments.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

/// Builder for a `Sequence` with its jobs.
pub struct SequenceBuilder {
    seq: Sequence,
}

impl SequenceBuilder {
    pub fn new(seqnum: u32, owner: &str) -> Self {
        Self {
            seq: Sequence {
                seqnum,
                name: format!("seq{seqnum}"),
                owner: owner.to_string(),
                email: owner.to_string(),
                source: "test".to_string(),
                ..Sequence::default()
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.seq.name = name.to_string();
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.seq.priority.priority = priority;
        self
    }

    pub fn policy(mut self, policy: PriorityPolicy) -> Self {
        self.seq.priority = policy;
        self
    }

    pub fn status(mut self, status: SequenceStatus) -> Self {
        self.seq.status = status;
        self
    }

    pub fn waitfor_sequence(mut self, seqnum: u32) -> Self {
        self.seq.waitfor.insert(seqnum);
        self
    }

    pub fn forced_host(mut self, host: &str) -> Self {
        self.seq.forced_hosts.insert(host.to_string());
        self
    }

    pub fn require(mut self, resource: &str, count: u32) -> Self {
        self.seq.requires.insert(resource.to_string(), count);
        self
    }

    pub fn job(mut self, job: JobBuilder) -> Self {
        let job = job.build();
        self.seq.jobs.insert(job.jnum, job);
        self
    }

    /// `count` independent jobs numbered from zero.
    pub fn jobs(mut self, count: u32) -> Self {
        for jnum in 0..count {
            self = self.job(JobBuilder::new(jnum));
        }
        self
    }

    /// Jobs `0..count`, each waiting on the one before it.
    pub fn chain(mut self, count: u32) -> Self {
        for jnum in 0..count {
            let job = if jnum == 0 {
                JobBuilder::new(jnum)
            } else {
                JobBuilder::new(jnum).waitfor(&[jnum - 1])
            };
            self = self.job(job);
        }
        self
    }

    pub fn build(mut self) -> Sequence {
        self.seq.propagate_to_jobs();
        self.seq.update_counts();
        self.seq
    }
}

/// Write a sequence as a `submit_<name>` bundle in `drop_dir`, the way a
/// client tool submits work. Returns the bundle path.
pub fn write_bundle(drop_dir: &Path, name: &str, seq: &Sequence) -> PathBuf {
    let bundle = drop_dir.join(format!("submit_{name}"));
    fs::create_dir_all(&bundle).expect("create bundle dir");
    for (jnum, job) in &seq.jobs {
        fs::write(bundle.join(format!("{jnum:05}.job")), job.to_record()).expect("write job");
    }
    fs::write(bundle.join("info.seq"), seq.info_record()).expect("write info.seq");
    bundle
}
