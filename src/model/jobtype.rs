// src/model/jobtype.rs

use std::collections::BTreeMap;

/// A job template. Only the resource requirements matter to scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobType {
    pub name: String,
    pub requires: BTreeMap<String, u32>,
}

/// Merge the job type's requirements with a sequence's overrides, keeping
/// the larger count for each resource.
pub fn combined_requirements(
    jobtype: Option<&JobType>,
    sequence_requires: &BTreeMap<String, u32>,
) -> BTreeMap<String, u32> {
    let mut reqs = jobtype.map(|jt| jt.requires.clone()).unwrap_or_default();
    for (name, &count) in sequence_requires {
        let slot = reqs.entry(name.clone()).or_insert(0);
        *slot = (*slot).max(count);
    }
    reqs
}
