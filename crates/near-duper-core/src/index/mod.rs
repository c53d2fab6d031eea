//! Signature index contract and its two implementations.
//!
//! An index is split into namespaces, one per algorithm id. Image namespaces
//! store one [`Signature`] per content id and answer similarity queries under
//! the namespace's [`Metric`]; audio namespaces store fingerprints and answer
//! LSH bucket lookups. Both persist the match links found by the linker.

mod memory;
mod persistent;

pub use memory::MemoryIndex;
pub use persistent::SqliteIndex;

use crate::codecs::audio::Fingerprint;
use crate::error::Error;
use crate::model::{ContentId, SearchType, Similarity};
use crate::signature::{Metric, Signature};
use ahash::AHashSet;
use std::sync::Arc;

/// Inclusive window of fingerprint start times, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f32,
    pub end: f32,
}

impl TimeRange {
    pub const ALL: TimeRange = TimeRange {
        start: f32::NEG_INFINITY,
        end: f32::INFINITY,
    };

    pub fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: f32) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Durable record of matches discovered between content ids.
pub trait MatchLinks: Send + Sync {
    /// Persist `matches`; each link is visible from both of its ends.
    fn link_matches(&self, id: ContentId, matches: &[Similarity]) -> Result<(), Error>;

    fn existing_matches(&self, id: &ContentId) -> Result<Vec<(ContentId, f64)>, Error>;
}

pub trait SignatureIndex: MatchLinks {
    fn metric(&self) -> Metric;

    fn exists(&self, id: &ContentId) -> Result<bool, Error>;

    fn get(&self, id: &ContentId) -> Result<Option<Signature>, Error>;

    fn put(&self, id: ContentId, signature: &Signature) -> Result<(), Error>;

    /// Every stored signature scoring at least `min_similarity` against
    /// `signature`, skipping ids in `exclude`. Best matches first.
    fn query_near(
        &self,
        signature: &Signature,
        min_similarity: f64,
        exclude: &AHashSet<ContentId>,
    ) -> Result<Vec<(ContentId, f64)>, Error>;
}

pub trait FingerprintIndex: MatchLinks {
    /// Replace the fingerprints stored for `file_id`.
    fn insert_fingerprints(&self, file_id: ContentId, fingerprints: &[Fingerprint]) -> Result<(), Error>;

    /// `(file id, start time)` of every stored fingerprint carrying `bucket`.
    fn query_by_bucket(
        &self,
        bucket: u64,
        range: TimeRange,
        exclude: &AHashSet<ContentId>,
    ) -> Result<Vec<(ContentId, f32)>, Error>;

    /// True when roughly `expected` fingerprints are already stored for the file.
    fn estimate_already_inserted(&self, file_id: &ContentId, expected: usize) -> Result<bool, Error>;
}

/// Hands out index namespaces.
pub trait IndexProvider: Send + Sync {
    fn signatures(&self, namespace: &str, metric: Metric) -> Result<Arc<dyn SignatureIndex>, Error>;

    fn fingerprints(&self, namespace: &str, rows_per_band: usize) -> Result<Arc<dyn FingerprintIndex>, Error>;

    /// Record the start of a search. Volatile indexes keep no history.
    fn begin_session(&self, _search: SearchType, _namespace: &str) -> Result<Option<i64>, Error> {
        Ok(None)
    }

    fn finish_session(&self, _session: i64, _status: &str, _files: usize, _clusters: usize) -> Result<(), Error> {
        Ok(())
    }
}

/// Stored count is close enough to the estimate: within 10%, never zero.
pub(crate) fn close_to_expected(stored: usize, expected: usize) -> bool {
    stored > 0 && stored * 10 >= expected * 9
}

pub(crate) fn sort_best_first(hits: &mut [(ContentId, f64)]) {
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}
