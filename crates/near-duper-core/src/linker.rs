use crate::cancel::CancelToken;
use crate::codecs::audio::{AudioFingerprinter, Fingerprint, Stride};
use crate::error::Error;
use crate::index::{sort_best_first, FingerprintIndex, MatchLinks, SignatureIndex, TimeRange};
use crate::model::{ContentId, Similarity};
use crate::store::GroupStore;
use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use tracing::trace;

/// Finds the matches of one group and records them in the index and the store.
pub trait Linker: Sync {
    /// Returns how many matches the group now carries.
    fn link(&self, store: &GroupStore, id: &ContentId) -> Result<usize, Error>;
}

/// Ids already linked to `id`, plus `id` itself.
fn exclusion_set(id: &ContentId, existing: &[(ContentId, f64)]) -> AHashSet<ContentId> {
    let mut exclude: AHashSet<ContentId> = existing.iter().map(|(m, _)| *m).collect();
    exclude.insert(*id);
    exclude
}

fn record_matches<L: MatchLinks + ?Sized>(
    links: &L,
    store: &GroupStore,
    id: &ContentId,
    existing: Vec<(ContentId, f64)>,
    found: Vec<(ContentId, f64)>,
    degree: f64,
) -> Result<usize, Error> {
    if !found.is_empty() {
        let similarities: Vec<Similarity> = found
            .iter()
            .map(|&(duplicate, score)| Similarity {
                original: *id,
                duplicate,
                score,
            })
            .collect();
        links.link_matches(*id, &similarities)?;
    }
    let mut all = existing;
    // links left by earlier runs only count when they clear this run's degree
    all.retain(|(_, score)| *score >= degree);
    all.extend(found);
    store.add_matches(id, &all);
    Ok(all.len())
}

pub struct ImageLinker {
    index: Arc<dyn SignatureIndex>,
    degree: f64,
}

impl ImageLinker {
    pub fn new(index: Arc<dyn SignatureIndex>, degree: f64) -> Self {
        Self { index, degree }
    }
}

impl Linker for ImageLinker {
    fn link(&self, store: &GroupStore, id: &ContentId) -> Result<usize, Error> {
        let signature = store
            .with_group(id, |g| g.signature.clone())
            .flatten()
            .ok_or_else(|| Error::Index(format!("group {} has no signature", id)))?;

        let existing = self.index.existing_matches(id)?;
        let exclude = exclusion_set(id, &existing);
        let found = self.index.query_near(&signature, self.degree, &exclude)?;
        trace!("{} new image matches for {}", found.len(), id);
        record_matches(self.index.as_ref(), store, id, existing, found, self.degree)
    }
}

/// Vote thresholds of the audio linker.
#[derive(Debug, Clone, Copy)]
pub struct VotePolicy {
    pub threshold_votes: u32,
    pub degree: f64,
    pub max_time_gap_secs: f32,
    pub min_band_matches: u32,
    pub max_offset_secs: Option<f32>,
    pub rows_per_band: usize,
}

impl VotePolicy {
    /// Stored start times a query frame starting at `at` may pair with.
    fn window(&self, at: f32) -> TimeRange {
        match self.max_offset_secs {
            Some(max) => TimeRange::new(at - max, at + max),
            None => TimeRange::ALL,
        }
    }
}

pub struct AudioLinker<'a> {
    index: Arc<dyn FingerprintIndex>,
    fingerprinter: &'a AudioFingerprinter,
    policy: VotePolicy,
    cancel: &'a CancelToken,
}

impl<'a> AudioLinker<'a> {
    pub fn new(
        index: Arc<dyn FingerprintIndex>,
        fingerprinter: &'a AudioFingerprinter,
        policy: VotePolicy,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            index,
            fingerprinter,
            policy,
            cancel,
        }
    }

    /// Candidates whose aligned votes pass both the absolute and the relative
    /// threshold, scored by their vote ratio.
    pub fn confirm(
        &self,
        queries: &[Fingerprint],
        own_count: usize,
        exclude: &AHashSet<ContentId>,
    ) -> Result<Vec<(ContentId, f64)>, Error> {
        let own_count = own_count.max(1) as f64;
        let hits = collect_hits(self.index.as_ref(), queries, &self.policy, exclude, self.cancel)?;
        let mut confirmed = Vec::new();
        for (candidate, mut offsets) in hits {
            let votes = aligned_votes(&mut offsets, self.policy.max_time_gap_secs);
            let ratio = votes as f64 / own_count;
            trace!("{} votes ({:.2}) for {}", votes, ratio, candidate);
            if votes >= self.policy.threshold_votes && ratio >= self.policy.degree {
                confirmed.push((candidate, ratio.min(1.0)));
            }
        }
        sort_best_first(&mut confirmed);
        Ok(confirmed)
    }
}

impl Linker for AudioLinker<'_> {
    fn link(&self, store: &GroupStore, id: &ContentId) -> Result<usize, Error> {
        let (path, own_count) = store
            .with_group(id, |g| (g.duplicates.first().cloned(), g.fingerprint_count))
            .ok_or_else(|| Error::Index(format!("group {} missing", id)))?;
        let path = path.ok_or_else(|| Error::Index(format!("group {} has no path", id)))?;

        let existing = self.index.existing_matches(id)?;
        let exclude = exclusion_set(id, &existing);

        let stride = Stride::randomized(self.fingerprinter.profile().stride, seed_of(id));
        let queries = self.fingerprinter.fingerprint_file(&path, *id, stride, self.cancel)?;
        let own_count = if own_count == 0 { queries.len() } else { own_count };

        let found = self.confirm(&queries, own_count, &exclude)?;
        record_matches(self.index.as_ref(), store, id, existing, found, self.policy.degree)
    }
}

fn seed_of(id: &ContentId) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&id.0[..8]);
    u64::from_le_bytes(bytes)
}

/// Per candidate file: `(query frame, candidate start - query start)` of every
/// stored frame sharing at least `min_band_matches` LSH bands with a query.
fn collect_hits(
    index: &dyn FingerprintIndex,
    queries: &[Fingerprint],
    policy: &VotePolicy,
    exclude: &AHashSet<ContentId>,
    cancel: &CancelToken,
) -> Result<AHashMap<ContentId, Vec<(usize, f32)>>, Error> {
    let mut hits: AHashMap<ContentId, Vec<(usize, f32)>> = AHashMap::new();
    let mut shared: AHashMap<(ContentId, u32), u32> = AHashMap::new();
    for (frame, query) in queries.iter().enumerate() {
        cancel.check()?;
        shared.clear();
        let window = policy.window(query.start_at);
        for bucket in query.buckets(policy.rows_per_band) {
            for (candidate, start_at) in index.query_by_bucket(bucket, window, exclude)? {
                *shared.entry((candidate, start_at.to_bits())).or_default() += 1;
            }
        }
        for (&(candidate, start_bits), &bands) in &shared {
            if bands >= policy.min_band_matches {
                let offset = f32::from_bits(start_bits) - query.start_at;
                hits.entry(candidate).or_default().push((frame, offset));
            }
        }
    }
    Ok(hits)
}

/// Largest number of distinct query frames whose offsets fit in one window of
/// `max_gap` seconds.
fn aligned_votes(offsets: &mut [(usize, f32)], max_gap: f32) -> u32 {
    offsets.sort_by(|a, b| a.1.total_cmp(&b.1));
    let mut in_window: AHashMap<usize, u32> = AHashMap::new();
    let mut best = 0;
    let mut lo = 0;
    for hi in 0..offsets.len() {
        *in_window.entry(offsets[hi].0).or_default() += 1;
        while offsets[hi].1 - offsets[lo].1 > max_gap {
            let frame = offsets[lo].0;
            if let Some(n) = in_window.get_mut(&frame) {
                *n -= 1;
                if *n == 0 {
                    in_window.remove(&frame);
                }
            }
            lo += 1;
        }
        best = best.max(in_window.len());
    }
    best as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::audio::AudioProfile;
    use crate::index::{IndexProvider, MemoryIndex};
    use crate::model::{FileRecord, FileType};
    use crate::signature::{BitVector, Metric, Signature};
    use std::path::PathBuf;

    fn id(n: u8) -> ContentId {
        ContentId([n; 32])
    }

    fn fp(file: u8, at: f32, bins: &[u8]) -> Fingerprint {
        Fingerprint {
            file_id: id(file),
            start_at: at,
            hash_bins: bins.to_vec(),
        }
    }

    #[test]
    fn test_aligned_votes_counts_distinct_frames_in_window() {
        let mut offsets = vec![(0, 10.0), (1, 10.1), (1, 10.2), (2, 9.9), (3, -40.0), (4, 25.0)];
        assert_eq!(aligned_votes(&mut offsets, 2.0), 3);
        assert_eq!(aligned_votes(&mut [], 2.0), 0);
        let mut spread = vec![(0, 0.0), (1, 5.0), (2, 10.0)];
        assert_eq!(aligned_votes(&mut spread, 2.0), 1);
    }

    #[test]
    fn test_confirm_requires_votes_and_ratio() {
        let index = MemoryIndex::new();
        let fps = index.fingerprints("audio", 4).unwrap();
        // candidate 2 carries the query frames shifted by 10 s, candidate 3
        // shares a single frame only
        let bins = |n: u8| vec![n, n, n, n, n.wrapping_add(1), n, n, n];
        let stored: Vec<Fingerprint> = (0..6).map(|i| fp(2, 10.0 + i as f32, &bins(i))).collect();
        fps.insert_fingerprints(id(2), &stored).unwrap();
        fps.insert_fingerprints(id(3), &[fp(3, 0.0, &bins(0))]).unwrap();

        let queries: Vec<Fingerprint> = (0..6).map(|i| fp(1, i as f32, &bins(i))).collect();
        let fingerprinter = AudioFingerprinter::new(AudioProfile::default());
        let cancel = CancelToken::new();
        let policy = VotePolicy {
            threshold_votes: 4,
            degree: 0.5,
            max_time_gap_secs: 2.0,
            min_band_matches: 1,
            max_offset_secs: None,
            rows_per_band: 4,
        };
        let linker = AudioLinker::new(fps.clone(), &fingerprinter, policy, &cancel);
        let mut exclude = AHashSet::new();
        exclude.insert(id(1));

        let confirmed = linker.confirm(&queries, 6, &exclude).unwrap();
        assert_eq!(confirmed, vec![(id(2), 1.0)]);

        // same votes but a much longer own track fails the ratio
        assert!(linker.confirm(&queries, 100, &exclude).unwrap().is_empty());

        // candidate 2 sits 10 s later than every query frame
        let bounded = VotePolicy {
            max_offset_secs: Some(2.0),
            ..policy
        };
        let strict = AudioLinker::new(fps.clone(), &fingerprinter, bounded, &cancel);
        assert!(strict.confirm(&queries, 6, &exclude).unwrap().is_empty());
        let wide = VotePolicy {
            max_offset_secs: Some(10.0),
            ..policy
        };
        let wide = AudioLinker::new(fps.clone(), &fingerprinter, wide, &cancel);
        assert_eq!(wide.confirm(&queries, 6, &exclude).unwrap(), vec![(id(2), 1.0)]);

        exclude.insert(id(2));
        assert!(linker.confirm(&queries, 6, &exclude).unwrap().is_empty());
    }

    #[test]
    fn test_image_linker_records_and_excludes() {
        let index = MemoryIndex::new();
        let sigs = index.signatures("dhash", Metric::Hamming).unwrap();
        let store = GroupStore::new();
        let bits = |ones: usize| {
            let v: Vec<bool> = (0..64).map(|i| i < ones).collect();
            Signature::Bits(BitVector::from_bools(&v))
        };
        for (n, ones) in [(1u8, 32usize), (2, 31), (3, 0)] {
            store.insert_or_append(
                FileRecord {
                    path: PathBuf::from(format!("/{}", n)),
                    size: 1,
                    modified: 0,
                    content_id: id(n),
                },
                FileType::Image,
            );
            store.set_signature(&id(n), bits(ones));
            sigs.put(id(n), &bits(ones)).unwrap();
        }

        let linker = ImageLinker::new(sigs.clone(), 0.9);
        assert_eq!(linker.link(&store, &id(1)).unwrap(), 1);
        assert_eq!(sigs.existing_matches(&id(2)).unwrap().len(), 1);

        // group 2 sees the link from the index instead of re-querying it
        assert_eq!(linker.link(&store, &id(2)).unwrap(), 1);
        assert_eq!(linker.link(&store, &id(3)).unwrap(), 0);
        assert!(store.take_matches(&id(1)).unwrap().contains_key(&id(2)));
    }
}
