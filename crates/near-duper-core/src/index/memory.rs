use super::{
    close_to_expected, sort_best_first, FingerprintIndex, IndexProvider, MatchLinks, SignatureIndex,
    TimeRange,
};
use crate::codecs::audio::Fingerprint;
use crate::error::Error;
use crate::model::{ContentId, Similarity};
use crate::signature::{Metric, Signature};
use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use rayon::prelude::*;
use std::sync::Arc;

/// Process-local index. Lives as long as the value does.
#[derive(Default)]
pub struct MemoryIndex {
    signature_spaces: DashMap<String, Arc<MemorySignatures>>,
    fingerprint_spaces: DashMap<String, Arc<MemoryFingerprints>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexProvider for MemoryIndex {
    fn signatures(&self, namespace: &str, metric: Metric) -> Result<Arc<dyn SignatureIndex>, Error> {
        let space = self
            .signature_spaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(MemorySignatures::new(metric)))
            .clone();
        Ok(space)
    }

    fn fingerprints(&self, namespace: &str, rows_per_band: usize) -> Result<Arc<dyn FingerprintIndex>, Error> {
        let space = self
            .fingerprint_spaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(MemoryFingerprints::new(rows_per_band)))
            .clone();
        Ok(space)
    }
}

#[derive(Default)]
struct Links(DashMap<ContentId, AHashMap<ContentId, f64>>);

impl Links {
    fn link(&self, id: ContentId, matches: &[Similarity]) {
        for m in matches {
            let other = if m.original == id { m.duplicate } else { m.original };
            if other == id {
                continue;
            }
            self.0.entry(id).or_default().insert(other, m.score);
            self.0.entry(other).or_default().insert(id, m.score);
        }
    }

    fn get(&self, id: &ContentId) -> Vec<(ContentId, f64)> {
        let mut out: Vec<(ContentId, f64)> = self
            .0
            .get(id)
            .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        sort_best_first(&mut out);
        out
    }
}

pub struct MemorySignatures {
    metric: Metric,
    signatures: DashMap<ContentId, Signature>,
    links: Links,
}

impl MemorySignatures {
    fn new(metric: Metric) -> Self {
        Self {
            metric,
            signatures: DashMap::new(),
            links: Links::default(),
        }
    }
}

impl MatchLinks for MemorySignatures {
    fn link_matches(&self, id: ContentId, matches: &[Similarity]) -> Result<(), Error> {
        self.links.link(id, matches);
        Ok(())
    }

    fn existing_matches(&self, id: &ContentId) -> Result<Vec<(ContentId, f64)>, Error> {
        Ok(self.links.get(id))
    }
}

impl SignatureIndex for MemorySignatures {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn exists(&self, id: &ContentId) -> Result<bool, Error> {
        Ok(self.signatures.contains_key(id))
    }

    fn get(&self, id: &ContentId) -> Result<Option<Signature>, Error> {
        Ok(self.signatures.get(id).map(|s| s.value().clone()))
    }

    fn put(&self, id: ContentId, signature: &Signature) -> Result<(), Error> {
        self.signatures.insert(id, signature.clone());
        Ok(())
    }

    fn query_near(
        &self,
        signature: &Signature,
        min_similarity: f64,
        exclude: &AHashSet<ContentId>,
    ) -> Result<Vec<(ContentId, f64)>, Error> {
        let mut hits: Vec<(ContentId, f64)> = self
            .signatures
            .par_iter()
            .filter(|e| !exclude.contains(e.key()))
            .filter_map(|e| {
                let score = signature.similarity(e.value(), self.metric);
                (score >= min_similarity).then_some((*e.key(), score))
            })
            .collect();
        sort_best_first(&mut hits);
        Ok(hits)
    }
}

struct StoredFrame {
    file_id: ContentId,
    start_at: f32,
}

pub struct MemoryFingerprints {
    rows_per_band: usize,
    buckets: DashMap<u64, Vec<Arc<StoredFrame>>>,
    per_file: DashMap<ContentId, Vec<(Arc<StoredFrame>, Vec<u64>)>>,
    links: Links,
}

impl MemoryFingerprints {
    fn new(rows_per_band: usize) -> Self {
        Self {
            rows_per_band,
            buckets: DashMap::new(),
            per_file: DashMap::new(),
            links: Links::default(),
        }
    }

    fn remove_file(&self, file_id: &ContentId) {
        if let Some((_, frames)) = self.per_file.remove(file_id) {
            for (frame, buckets) in frames {
                for bucket in buckets {
                    if let Some(mut entries) = self.buckets.get_mut(&bucket) {
                        entries.retain(|f| !Arc::ptr_eq(f, &frame));
                    }
                }
            }
        }
    }
}

impl MatchLinks for MemoryFingerprints {
    fn link_matches(&self, id: ContentId, matches: &[Similarity]) -> Result<(), Error> {
        self.links.link(id, matches);
        Ok(())
    }

    fn existing_matches(&self, id: &ContentId) -> Result<Vec<(ContentId, f64)>, Error> {
        Ok(self.links.get(id))
    }
}

impl FingerprintIndex for MemoryFingerprints {
    fn insert_fingerprints(&self, file_id: ContentId, fingerprints: &[Fingerprint]) -> Result<(), Error> {
        self.remove_file(&file_id);
        let mut stored = Vec::with_capacity(fingerprints.len());
        for fp in fingerprints {
            let frame = Arc::new(StoredFrame {
                file_id,
                start_at: fp.start_at,
            });
            let buckets = fp.buckets(self.rows_per_band);
            for &bucket in &buckets {
                self.buckets.entry(bucket).or_default().push(frame.clone());
            }
            stored.push((frame, buckets));
        }
        self.per_file.insert(file_id, stored);
        Ok(())
    }

    fn query_by_bucket(
        &self,
        bucket: u64,
        range: TimeRange,
        exclude: &AHashSet<ContentId>,
    ) -> Result<Vec<(ContentId, f32)>, Error> {
        Ok(self
            .buckets
            .get(&bucket)
            .map(|frames| {
                frames
                    .iter()
                    .filter(|f| !exclude.contains(&f.file_id) && range.contains(f.start_at))
                    .map(|f| (f.file_id, f.start_at))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn estimate_already_inserted(&self, file_id: &ContentId, expected: usize) -> Result<bool, Error> {
        let stored = self.per_file.get(file_id).map_or(0, |f| f.len());
        Ok(close_to_expected(stored, expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::BitVector;

    fn id(n: u8) -> ContentId {
        ContentId([n; 32])
    }

    fn bits(ones: usize) -> Signature {
        let v: Vec<bool> = (0..64).map(|i| i < ones).collect();
        Signature::Bits(BitVector::from_bools(&v))
    }

    #[test]
    fn test_signature_roundtrip_and_query() {
        let index = MemoryIndex::new();
        let sigs = index.signatures("dhash", Metric::Hamming).unwrap();
        sigs.put(id(1), &bits(32)).unwrap();
        sigs.put(id(2), &bits(30)).unwrap();
        sigs.put(id(3), &bits(0)).unwrap();

        assert!(sigs.exists(&id(1)).unwrap());
        assert_eq!(sigs.get(&id(2)).unwrap(), Some(bits(30)));
        assert_eq!(sigs.get(&id(9)).unwrap(), None);

        let mut exclude = AHashSet::new();
        exclude.insert(id(1));
        let hits = sigs.query_near(&bits(32), 0.9, &exclude).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id(2));

        // same namespace returns the same store
        let again = index.signatures("dhash", Metric::Hamming).unwrap();
        assert!(again.exists(&id(3)).unwrap());
        assert!(!index.signatures("phash", Metric::Cosine).unwrap().exists(&id(3)).unwrap());
    }

    #[test]
    fn test_links_visible_from_both_sides() {
        let index = MemoryIndex::new();
        let sigs = index.signatures("dhash", Metric::Hamming).unwrap();
        sigs.link_matches(
            id(1),
            &[
                Similarity {
                    original: id(1),
                    duplicate: id(2),
                    score: 0.95,
                },
                Similarity {
                    original: id(1),
                    duplicate: id(1),
                    score: 1.0,
                },
            ],
        )
        .unwrap();
        assert_eq!(sigs.existing_matches(&id(1)).unwrap(), vec![(id(2), 0.95)]);
        assert_eq!(sigs.existing_matches(&id(2)).unwrap(), vec![(id(1), 0.95)]);
    }

    #[test]
    fn test_fingerprint_buckets_and_reinsert() {
        let index = MemoryIndex::new();
        let fps = index.fingerprints("audio", 4).unwrap();
        let fp = |file: u8, at: f32, bins: u8| Fingerprint {
            file_id: id(file),
            start_at: at,
            hash_bins: vec![bins; 8],
        };
        fps.insert_fingerprints(id(1), &[fp(1, 0.0, 5), fp(1, 1.0, 6)]).unwrap();
        fps.insert_fingerprints(id(2), &[fp(2, 3.0, 5)]).unwrap();

        let bucket = fp(0, 0.0, 5).buckets(4)[0];
        let none = AHashSet::new();
        let mut hits = fps.query_by_bucket(bucket, TimeRange::ALL, &none).unwrap();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        assert_eq!(hits, vec![(id(1), 0.0), (id(2), 3.0)]);

        let only_early = fps.query_by_bucket(bucket, TimeRange::new(0.0, 1.0), &none).unwrap();
        assert_eq!(only_early, vec![(id(1), 0.0)]);

        let mut exclude = AHashSet::new();
        exclude.insert(id(1));
        assert_eq!(fps.query_by_bucket(bucket, TimeRange::ALL, &exclude).unwrap().len(), 1);

        assert!(fps.estimate_already_inserted(&id(1), 2).unwrap());
        assert!(!fps.estimate_already_inserted(&id(3), 2).unwrap());

        // re-inserting replaces instead of duplicating
        fps.insert_fingerprints(id(1), &[fp(1, 0.0, 7)]).unwrap();
        assert_eq!(fps.query_by_bucket(bucket, TimeRange::ALL, &none).unwrap(), vec![(id(2), 3.0)]);
    }
}
