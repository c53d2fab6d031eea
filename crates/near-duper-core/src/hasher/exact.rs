use super::content::{content_id, hash_range, partial_len};
use crate::cancel::CancelToken;
use crate::error::{Error, FileError};
use crate::model::{ContentId, DuplicateCluster};
use crate::progress::{ProgressTicker, Tick};
use crossbeam_channel::{unbounded, Sender};
use dashmap::DashMap;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use twox_hash::XxHash64;

/// Key of the partial pass: file size plus the hash of its leading bytes.
pub type PartialKey = (u64, u64);

#[derive(Debug, Default)]
pub struct ExactOutcome {
    /// Groups that survived the partial pass (two or more members).
    pub partial_groups: Vec<Vec<PathBuf>>,
    /// Byte-identical clusters, paths sorted, singletons dropped.
    pub clusters: Vec<DuplicateCluster>,
    pub errors: Vec<FileError>,
}

/// Two-tier exact matcher:
/// 1. Partial hash (leading fraction via XxHash64) to quickly eliminate non-matches
/// 2. Full BLAKE3 content hash only on partial-hash collisions
pub struct ExactMatcher<'a> {
    fraction: f64,
    buffer_size: usize,
    cancel: &'a CancelToken,
}

impl<'a> ExactMatcher<'a> {
    pub fn new(fraction: f64, buffer_size: usize, cancel: &'a CancelToken) -> Self {
        Self {
            fraction,
            buffer_size,
            cancel,
        }
    }

    pub(crate) fn run(&self, paths: &[PathBuf], ticker: &ProgressTicker) -> Result<ExactOutcome, Error> {
        let (err_tx, err_rx) = unbounded();
        let total = paths.len();
        let processed = AtomicUsize::new(0);

        // First pass: partial hash to eliminate non-dupes quickly
        let partial_map: DashMap<PartialKey, Vec<PathBuf>> = DashMap::new();
        paths.par_iter().try_for_each(|path| {
            self.cancel.check()?;
            match self.partial_key(path) {
                Ok(key) => partial_map.entry(key).or_default().push(path.clone()),
                Err(e) => record_failure(path, e, &err_tx)?,
            }
            let n = processed.fetch_add(1, Ordering::Relaxed) + 1;
            ticker.publish(Tick::Signature {
                processed: n,
                total,
            });
            Ok::<_, Error>(())
        })?;

        let partial_groups: Vec<Vec<PathBuf>> = partial_map
            .into_iter()
            .map(|(_, files)| files)
            .filter(|files| files.len() > 1)
            .collect();
        debug!(
            "Partial pass kept {} candidate groups out of {} files",
            partial_groups.len(),
            total
        );

        // Second pass: full hash only on partial-hash collisions
        let full_map: DashMap<ContentId, Vec<PathBuf>> = DashMap::new();
        partial_groups.par_iter().try_for_each(|files| {
            files.par_iter().try_for_each(|path| {
                self.cancel.check()?;
                match content_id(path, self.buffer_size, self.cancel) {
                    Ok(id) => full_map.entry(id).or_default().push(path.clone()),
                    Err(e) => record_failure(path, e, &err_tx)?,
                }
                Ok::<_, Error>(())
            })
        })?;

        let mut clusters: Vec<DuplicateCluster> = full_map
            .into_iter()
            .filter(|(_, files)| files.len() > 1)
            .map(|(key, mut paths)| {
                paths.sort();
                DuplicateCluster { key, paths }
            })
            .collect();
        clusters.sort_by(|a, b| a.paths.cmp(&b.paths));

        drop(err_tx);
        Ok(ExactOutcome {
            partial_groups,
            clusters,
            errors: err_rx.iter().collect(),
        })
    }

    fn partial_key(&self, path: &Path) -> Result<PartialKey, Error> {
        let size = fs::metadata(path)?.len();
        if size == 0 {
            return Err(Error::EmptyFile(path.to_path_buf()));
        }
        let limit = partial_len(size, self.fraction, self.buffer_size);
        let hash = hash_range::<XxHash64>(path, Some(limit), self.buffer_size, self.cancel)?;
        Ok((size, hash))
    }
}

/// Per-file failures are reported and skipped; cancellation unwinds.
fn record_failure(path: &Path, err: Error, errors: &Sender<FileError>) -> Result<(), Error> {
    if matches!(err, Error::Cancelled) {
        return Err(err);
    }
    warn!("Error hashing file '{}': {}", path.display(), err);
    let _ = errors.send(FileError::new(path, &err));
    Ok(())
}
