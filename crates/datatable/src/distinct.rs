#![forbid(unsafe_code)]

use crate::element::DistinctKey;
use std::collections::HashSet;

/// Default ceiling on tracked distinct values per buffer.
pub const DEFAULT_MAX_DISTINCT_COUNT: usize = 131_072;

/// Exact distinct-value tracking with a one-way cut-off.
///
/// Once more than `max` distinct keys have been seen the set is dropped and the
/// tracker stays disabled for good, even if later values repeat earlier ones.
#[derive(Clone, Debug)]
pub(crate) enum DistinctTracker {
    Tracking { seen: HashSet<DistinctKey>, max: usize },
    Disabled,
}

impl DistinctTracker {
    pub fn new(max: Option<usize>) -> Self {
        match max {
            Some(max) => Self::Tracking {
                seen: HashSet::new(),
                max,
            },
            None => Self::Disabled,
        }
    }

    pub fn insert(&mut self, key: DistinctKey) {
        let Self::Tracking { seen, max } = self else {
            return;
        };
        if seen.insert(key) && seen.len() > *max {
            log::debug!("distinct tracking disabled after exceeding {max} values");
            *self = Self::Disabled;
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Tracking { seen, .. } => Some(seen.len() as u64),
            Self::Disabled => None,
        }
    }
}
