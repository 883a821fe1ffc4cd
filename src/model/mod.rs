// src/model/mod.rs

//! Job/Sequence model: in-memory records and their line-oriented on-disk
//! format.

pub mod job;
pub mod jobtype;
pub mod numbers;
pub mod priority;
pub mod sequence;

pub use job::{Job, JobId, RESEND_WAIT_SECS};
pub use jobtype::{combined_requirements, JobType};
pub use numbers::{format_number_set, parse_number_set};
pub use priority::{PriorityPolicy, MAX_PRIORITY};
pub use sequence::{JobCounts, Sequence};
