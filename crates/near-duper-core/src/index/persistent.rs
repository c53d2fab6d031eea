use super::{
    close_to_expected, sort_best_first, FingerprintIndex, IndexProvider, MatchLinks, SignatureIndex,
    TimeRange,
};
use crate::codecs::audio::Fingerprint;
use crate::error::Error;
use crate::model::{ContentId, SearchType, Similarity};
use crate::signature::{Metric, Signature};
use crate::storage::models::{IndexStats, ScanSession};
use crate::storage::{Database, FingerprintRow};
use ahash::AHashSet;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// SQLite-backed durable index shared by every namespace of one database file.
#[derive(Clone)]
pub struct SqliteIndex {
    db: Arc<Mutex<Database>>,
}

impl SqliteIndex {
    pub fn open(path: &str) -> Result<Self, Error> {
        Ok(Self {
            db: Arc::new(Mutex::new(Database::open(path)?)),
        })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self {
            db: Arc::new(Mutex::new(Database::open_in_memory()?)),
        })
    }

    pub fn stats(&self) -> Result<IndexStats, Error> {
        with_db(&self.db, |db| db.index_stats())
    }

    pub fn clear(&self) -> Result<(), Error> {
        with_db(&self.db, |db| db.truncate_all())
    }

    pub fn sessions(&self, limit: i64) -> Result<Vec<ScanSession>, Error> {
        with_db(&self.db, |db| db.list_sessions(limit))
    }

    fn namespace(&self, namespace: &str, metric: Metric, rows_per_band: usize) -> Arc<SqliteNamespace> {
        Arc::new(SqliteNamespace {
            db: self.db.clone(),
            namespace: namespace.to_string(),
            metric,
            rows_per_band,
        })
    }
}

impl IndexProvider for SqliteIndex {
    fn signatures(&self, namespace: &str, metric: Metric) -> Result<Arc<dyn SignatureIndex>, Error> {
        Ok(self.namespace(namespace, metric, 0))
    }

    fn fingerprints(&self, namespace: &str, rows_per_band: usize) -> Result<Arc<dyn FingerprintIndex>, Error> {
        Ok(self.namespace(namespace, Metric::Hamming, rows_per_band))
    }

    fn begin_session(&self, search: SearchType, namespace: &str) -> Result<Option<i64>, Error> {
        let id = with_db(&self.db, |db| db.create_scan_session(&search.to_string(), namespace))?;
        Ok(Some(id))
    }

    fn finish_session(&self, session: i64, status: &str, files: usize, clusters: usize) -> Result<(), Error> {
        with_db(&self.db, |db| {
            db.complete_scan_session(session, status, files as i64, clusters as i64)
        })
    }
}

fn with_db<T>(
    db: &Mutex<Database>,
    f: impl FnOnce(&Database) -> rusqlite::Result<T>,
) -> Result<T, Error> {
    let guard = db
        .lock()
        .map_err(|_| Error::Index("index connection lock poisoned".to_string()))?;
    Ok(f(&guard)?)
}

struct SqliteNamespace {
    db: Arc<Mutex<Database>>,
    namespace: String,
    metric: Metric,
    rows_per_band: usize,
}

impl SqliteNamespace {
    fn with_db<T>(&self, f: impl FnOnce(&Database, &str) -> rusqlite::Result<T>) -> Result<T, Error> {
        with_db(&self.db, |db| f(db, &self.namespace))
    }
}

fn decode_id(bytes: &[u8]) -> Result<ContentId, Error> {
    ContentId::from_slice(bytes)
        .ok_or_else(|| Error::Index(format!("malformed content id of {} bytes", bytes.len())))
}

impl MatchLinks for SqliteNamespace {
    fn link_matches(&self, id: ContentId, matches: &[Similarity]) -> Result<(), Error> {
        let rows: Vec<(Vec<u8>, Vec<u8>, f64)> = matches
            .iter()
            .filter(|m| m.original != m.duplicate)
            .map(|m| (m.original.0.to_vec(), m.duplicate.0.to_vec(), m.score))
            .collect();
        if rows.is_empty() {
            return Ok(());
        }
        self.with_db(|db, ns| db.insert_links(ns, &rows))?;
        tracing::trace!("Linked {} matches for {}", rows.len(), id);
        Ok(())
    }

    fn existing_matches(&self, id: &ContentId) -> Result<Vec<(ContentId, f64)>, Error> {
        let rows = self.with_db(|db, ns| db.links_for(ns, id.as_bytes()))?;
        let mut out = Vec::with_capacity(rows.len());
        for (other, score) in rows {
            let other = decode_id(&other)?;
            if other != *id {
                out.push((other, score));
            }
        }
        sort_best_first(&mut out);
        out.dedup_by_key(|(other, _)| *other);
        Ok(out)
    }
}

impl SignatureIndex for SqliteNamespace {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn exists(&self, id: &ContentId) -> Result<bool, Error> {
        self.with_db(|db, ns| db.signature_exists(ns, id.as_bytes()))
    }

    fn get(&self, id: &ContentId) -> Result<Option<Signature>, Error> {
        match self.with_db(|db, ns| db.get_signature(ns, id.as_bytes()))? {
            Some(blob) => Ok(Some(bincode::deserialize(&blob)?)),
            None => Ok(None),
        }
    }

    fn put(&self, id: ContentId, signature: &Signature) -> Result<(), Error> {
        let blob = bincode::serialize(signature)?;
        self.with_db(|db, ns| db.put_signature(ns, id.as_bytes(), &blob))
    }

    fn query_near(
        &self,
        signature: &Signature,
        min_similarity: f64,
        exclude: &AHashSet<ContentId>,
    ) -> Result<Vec<(ContentId, f64)>, Error> {
        let rows = self.with_db(|db, ns| db.all_signatures(ns))?;
        let mut hits = Vec::new();
        for (id_bytes, blob) in rows {
            let id = decode_id(&id_bytes)?;
            if exclude.contains(&id) {
                continue;
            }
            let stored: Signature = match bincode::deserialize(&blob) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping undecodable signature {} in {}: {}", id, self.namespace, e);
                    continue;
                }
            };
            let score = signature.similarity(&stored, self.metric);
            if score >= min_similarity {
                hits.push((id, score));
            }
        }
        sort_best_first(&mut hits);
        Ok(hits)
    }
}

impl FingerprintIndex for SqliteNamespace {
    fn insert_fingerprints(&self, file_id: ContentId, fingerprints: &[Fingerprint]) -> Result<(), Error> {
        let rows = fingerprints
            .iter()
            .map(|fp| {
                Ok(FingerprintRow {
                    start_at: fp.start_at as f64,
                    hash_bins: bincode::serialize(&fp.hash_bins)?,
                    buckets: fp
                        .buckets(self.rows_per_band)
                        .into_iter()
                        .map(|b| b as i64)
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        self.with_db(|db, ns| db.replace_fingerprints(ns, file_id.as_bytes(), &rows))?;
        Ok(())
    }

    fn query_by_bucket(
        &self,
        bucket: u64,
        range: TimeRange,
        exclude: &AHashSet<ContentId>,
    ) -> Result<Vec<(ContentId, f32)>, Error> {
        let bound = |t: f32| t.clamp(f32::MIN, f32::MAX) as f64;
        let (start, end) = (bound(range.start), bound(range.end));
        let rows = self.with_db(|db, ns| db.fingerprints_in_bucket(ns, bucket as i64, start, end))?;
        let mut out = Vec::with_capacity(rows.len());
        for (id_bytes, start_at) in rows {
            let id = decode_id(&id_bytes)?;
            if !exclude.contains(&id) {
                out.push((id, start_at as f32));
            }
        }
        Ok(out)
    }

    fn estimate_already_inserted(&self, file_id: &ContentId, expected: usize) -> Result<bool, Error> {
        let stored = self.with_db(|db, ns| db.fingerprint_count(ns, file_id.as_bytes()))?;
        Ok(close_to_expected(stored.max(0) as usize, expected))
    }
}
