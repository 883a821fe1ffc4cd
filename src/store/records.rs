// src/store/records.rs

//! Naming conventions of the on-disk queue.

use std::path::Path;

use anyhow::Result;
use globset::{Glob, GlobMatcher};

pub const INFO_FILE: &str = "info.seq";
pub const COUNTER_FILE: &str = "vb.num";
pub const DEFUNCT_SUFFIX: &str = "_defunct";
pub const JOB_EXTENSION: &str = "job";

pub fn sequence_dir_name(seqnum: u32) -> String {
    format!("{seqnum:08}")
}

pub fn job_file_name(jnum: u32) -> String {
    format!("{jnum:05}.{JOB_EXTENSION}")
}

/// Parse an eight-digit sequence directory name.
pub fn parse_sequence_dir_name(name: &str) -> Option<u32> {
    if name.len() == 8 && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// Parse a five-digit `NNNNN.job` file name into its job number.
pub fn parse_job_file_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".job")?;
    if stem.len() == 5 && stem.bytes().all(|b| b.is_ascii_digit()) {
        stem.parse().ok()
    } else {
        None
    }
}

/// Keep only newline-terminated lines. A torn final append has no newline
/// and is dropped.
pub fn complete_lines(text: &str) -> &str {
    match text.rfind('\n') {
        Some(idx) => &text[..=idx],
        None => "",
    }
}

pub fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Compiled patterns for the drop directory.
#[derive(Debug, Clone)]
pub struct DropPatterns {
    pub submit: GlobMatcher,
    pub event: GlobMatcher,
    pub reservation: GlobMatcher,
}

impl DropPatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            submit: Glob::new("submit_*")?.compile_matcher(),
            event: Glob::new("*.vbx")?.compile_matcher(),
            reservation: Glob::new("*.gim")?.compile_matcher(),
        })
    }
}
