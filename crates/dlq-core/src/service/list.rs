//! Listing order: queued jobs by position, then finished jobs newest first.

use std::cmp::Ordering;

use crate::store::QueueJob;

pub(crate) fn listing_order(a: &QueueJob, b: &QueueJob) -> Ordering {
    match (a.position, b.position) {
        (Some(pa), Some(pb)) => pa.cmp(&pb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b
            .completed_at
            .cmp(&a.completed_at)
            .then(b.id.cmp(&a.id)),
    }
}
