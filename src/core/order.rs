use std::cmp::Ordering;

use crate::core::job::Job;

/// Most advanced stage first. Jobs on the same stage are ordered by start
/// time, earliest first, with jobs that never started at the end.
pub fn by_stage_desc(a: &Job, b: &Job) -> Ordering {
    b.stage()
        .cmp(&a.stage())
        .then_with(|| match (a.started_at(), b.started_at()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

pub fn sort_by_stage(jobs: &mut [Job]) {
    jobs.sort_by(by_stage_desc);
}
