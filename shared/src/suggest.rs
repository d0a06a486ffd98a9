//! This module provides the tag and people suggestion ranker.
//!
//! Suggestions are drawn from up to three sources, in order of precedence: names used most often during the
//! current session, names used most often across the whole catalog, and (for tags only) labels proposed by the
//! label detection service for the item at hand.  The functions here are pure, so identical inputs always yield
//! identical output.

use {
    crate::ScanState,
    serde_derive::{Deserialize, Serialize},
    std::{cmp::Ordering, sync::Arc},
};

/// Number of session-ranked tags which lead the suggestion list
pub const SESSION_TAG_COUNT: usize = 3;

/// Length at which catalog-ranked tags stop being added
pub const RANKED_TAG_LIMIT: usize = 6;

/// Maximum number of tag suggestions, including those from label detection
pub const TAG_LIMIT: usize = 10;

/// Number of session-ranked people which lead the suggestion list
pub const SESSION_PEOPLE_COUNT: usize = 5;

/// Maximum number of people suggestions
pub const PEOPLE_LIMIT: usize = 20;

/// Usage counts keyed by name, remembering the order in which names were first seen
///
/// Serialized as a sequence of `[name, count]` pairs so that order survives the trip to the client.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Default, Clone)]
pub struct Frequency(Vec<(Arc<str>, u32)>);

impl Frequency {
    /// Build a `Frequency` from `(name, count)` pairs, e.g. the rows of a popularity query.
    ///
    /// Duplicate names are merged into the first occurrence.
    pub fn from_counts(counts: impl IntoIterator<Item = (Arc<str>, u32)>) -> Self {
        let mut frequency = Self::default();

        for (name, count) in counts {
            frequency.add(&name, count);
        }

        frequency
    }

    pub fn increment(&mut self, name: &str) {
        self.add(name, 1)
    }

    fn add(&mut self, name: &str, count: u32) {
        if let Some((_, existing)) = self.0.iter_mut().find(|(n, _)| n.as_ref() == name) {
            *existing = existing.saturating_add(count);
        } else {
            self.0.push((Arc::from(name), count));
        }
    }

    pub fn count(&self, name: &str) -> u32 {
        self.0
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names ordered by descending count, ties broken by insertion order
    pub fn ranked(&self) -> Vec<Arc<str>> {
        let mut entries = self.0.iter().collect::<Vec<_>>();

        // `sort_by` is stable, which is what keeps ties in insertion order.
        entries.sort_by(|(_, a), (_, b)| b.cmp(a));

        entries.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Append names from `candidates` which are not already in `list` until `list` reaches `limit` entries.
fn fill(list: &mut Vec<Arc<str>>, candidates: impl IntoIterator<Item = Arc<str>>, limit: usize) {
    for candidate in candidates {
        if list.len() >= limit {
            break;
        }

        if !list.contains(&candidate) {
            list.push(candidate);
        }
    }
}

/// Rank tag suggestions for an item.
///
/// Returns `None` if label detection has not yet completed for the item, in which case the caller should show a
/// pending state rather than an empty list.
pub fn suggest_tags(
    global: &Frequency,
    session: &Frequency,
    scan: ScanState<'_>,
) -> Option<Vec<Arc<str>>> {
    let scanned = match scan {
        ScanState::Scanned(scanned) => scanned,
        ScanState::NotScanned | ScanState::Scanning => return None,
    };

    let mut list = Vec::with_capacity(TAG_LIMIT);

    fill(&mut list, session.ranked(), SESSION_TAG_COUNT);
    fill(&mut list, global.ranked(), RANKED_TAG_LIMIT);

    let mut labels = scanned.iter().collect::<Vec<_>>();

    labels.sort_by(|(a_name, a_score), (b_name, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_name.cmp(b_name))
    });

    fill(
        &mut list,
        labels.into_iter().map(|(name, _)| Arc::from(name.as_str())),
        TAG_LIMIT,
    );

    Some(list)
}

/// Rank people suggestions for an item.
pub fn suggest_people(global: &Frequency, session: &Frequency) -> Vec<Arc<str>> {
    let mut list = Vec::with_capacity(PEOPLE_LIMIT);

    fill(&mut list, session.ranked(), SESSION_PEOPLE_COUNT);
    fill(&mut list, global.ranked(), PEOPLE_LIMIT);

    list
}
