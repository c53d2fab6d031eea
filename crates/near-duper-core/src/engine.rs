use crate::cancel::CancelToken;
use crate::classify::Classifier;
use crate::codecs::audio::{AudioFingerprinter, Stride};
use crate::codecs::ImageCodec;
use crate::config::EngineConfig;
use crate::consolidate::Consolidator;
use crate::decode::decode_raster;
use crate::error::{Error, FileError};
use crate::hasher::{content_id, ExactMatcher};
use crate::index::{FingerprintIndex, IndexProvider, MemoryIndex, SignatureIndex};
use crate::linker::{AudioLinker, ImageLinker, Linker, VotePolicy};
use crate::model::{ContentId, DuplicateCluster, FileRecord, FileType, ImageAlgorithm, SearchType};
use crate::progress::{with_ticker, ProgressReporter, ProgressTicker, Tick};
use crate::store::GroupStore;
use crossbeam_channel::{unbounded, Sender};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

/// Outcome of one `find_duplicates` call.
#[derive(Debug, Default)]
pub struct SearchReport {
    pub search: Option<SearchType>,
    pub clusters: Vec<DuplicateCluster>,
    pub errors: Vec<FileError>,
    pub files_processed: usize,
    /// Distinct contents that reached linking (exact search: partial-pass groups).
    pub groups: usize,
    pub signature_duration: Duration,
    pub link_duration: Duration,
    /// Set when the run was cancelled; clusters and errors are then empty.
    pub cancelled: bool,
}

impl SearchReport {
    fn cancelled(search: SearchType, files: usize) -> Self {
        Self {
            search: Some(search),
            files_processed: files,
            cancelled: true,
            ..Default::default()
        }
    }

    pub fn duplicate_files(&self) -> usize {
        self.clusters.iter().map(|c| c.paths.len()).sum()
    }
}

/// Per-run settings resolved from the engine config and the caller's overrides.
struct RunSettings {
    algorithm: ImageAlgorithm,
    degree: f64,
}

pub struct DuplicateEngine {
    config: EngineConfig,
    index: Arc<dyn IndexProvider>,
    cancel: CancelToken,
}

impl DuplicateEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            index: Arc::new(MemoryIndex::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn IndexProvider>) -> Self {
        self.index = index;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle that cancels the running search from another thread.
    ///
    /// The flag stays set after a cancelled run: every later search on this
    /// engine returns a cancelled report until the token is `reset()`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Find duplicate clusters among `paths`.
    ///
    /// `algorithm` and `degree` override the configured image codec and
    /// similarity threshold; `degree` also overrides the audio vote ratio.
    /// A cancelled run yields an empty report with `cancelled` set.
    pub fn find_duplicates(
        &self,
        search: SearchType,
        paths: &[PathBuf],
        algorithm: Option<ImageAlgorithm>,
        degree: Option<f64>,
        reporter: &dyn ProgressReporter,
    ) -> Result<SearchReport, Error> {
        let mut paths = paths.to_vec();
        paths.sort();
        paths.dedup();

        let settings = RunSettings {
            algorithm: algorithm.unwrap_or(self.config.image_algorithm),
            degree: degree
                .unwrap_or(match search {
                    SearchType::Audio => self.config.audio_degree,
                    _ => self.config.image_degree,
                })
                .clamp(0.0, 1.0),
        };
        let namespace = match search {
            SearchType::ExactHash => "exact",
            SearchType::Image => settings.algorithm.id(),
            SearchType::Audio => "audio",
        };

        info!("Starting {} search over {} files", search, paths.len());
        reporter.on_search_start(search, paths.len());
        let session = self.index.begin_session(search, namespace)?;

        let outcome = match search {
            SearchType::ExactHash => self.run_exact(&paths, reporter),
            SearchType::Image => self.run_image(&paths, &settings, reporter),
            SearchType::Audio => self.run_audio(&paths, &settings, reporter),
        };

        match outcome {
            Ok(mut report) => {
                report.search = Some(search);
                for e in &report.errors {
                    reporter.on_file_error(&e.path, &e.reason);
                }
                if let Some(id) = session {
                    self.index
                        .finish_session(id, "completed", report.files_processed, report.clusters.len())?;
                }
                info!(
                    "{} search found {} clusters ({} files, {} errors)",
                    search,
                    report.clusters.len(),
                    report.duplicate_files(),
                    report.errors.len()
                );
                Ok(report)
            }
            Err(Error::Cancelled) => {
                info!("{} search cancelled", search);
                self.close_session(session, "cancelled");
                Ok(SearchReport::cancelled(search, paths.len()))
            }
            Err(e) => {
                self.close_session(session, "failed");
                Err(e)
            }
        }
    }

    fn close_session(&self, session: Option<i64>, status: &str) {
        if let Some(id) = session {
            if let Err(e) = self.index.finish_session(id, status, 0, 0) {
                warn!("Could not close search session {}: {}", id, e);
            }
        }
    }

    fn run_exact(&self, paths: &[PathBuf], reporter: &dyn ProgressReporter) -> Result<SearchReport, Error> {
        let start = Instant::now();
        let matcher = ExactMatcher::new(
            self.config.partial_hash_fraction,
            self.config.read_buffer_size,
            &self.cancel,
        );
        let outcome = with_ticker(reporter, |ticker| matcher.run(paths, ticker))?;
        let elapsed = start.elapsed();
        reporter.on_signature_complete(outcome.partial_groups.len(), elapsed.as_secs_f64());
        debug!(
            "Exact hashing completed in {:.2}s: {} partial groups, {} clusters",
            elapsed.as_secs_f64(),
            outcome.partial_groups.len(),
            outcome.clusters.len()
        );

        Ok(SearchReport {
            clusters: outcome.clusters,
            errors: outcome.errors,
            files_processed: paths.len(),
            groups: outcome.partial_groups.len(),
            signature_duration: elapsed,
            ..Default::default()
        })
    }

    fn run_image(
        &self,
        paths: &[PathBuf],
        settings: &RunSettings,
        reporter: &dyn ProgressReporter,
    ) -> Result<SearchReport, Error> {
        let algorithm = settings.algorithm;
        let index = self.index.signatures(algorithm.id(), algorithm.metric())?;
        let codec = ImageCodec::new(algorithm);
        info!("Image search with {} at degree {:.2}", algorithm, settings.degree);

        let prepare = |id: &ContentId, path: &Path, store: &GroupStore| -> Result<(), Error> {
            let signature = image_signature(index.as_ref(), &codec, id, path)?;
            store.set_signature(id, signature);
            Ok(())
        };
        let linker = ImageLinker::new(index.clone(), settings.degree);
        self.run_similarity(SearchType::Image, paths, prepare, &linker, reporter)
    }

    fn run_audio(
        &self,
        paths: &[PathBuf],
        settings: &RunSettings,
        reporter: &dyn ProgressReporter,
    ) -> Result<SearchReport, Error> {
        let profile = self.config.audio.clone();
        profile.validate()?;
        let index = self.index.fingerprints("audio", profile.rows_per_band)?;
        let fingerprinter = AudioFingerprinter::new(profile);
        info!(
            "Audio search at degree {:.2}, {} votes within {:.1}s",
            settings.degree, self.config.threshold_votes, self.config.max_time_gap_secs
        );

        let prepare = |id: &ContentId, path: &Path, store: &GroupStore| -> Result<(), Error> {
            let count = audio_fingerprints(index.as_ref(), &fingerprinter, id, path, &self.cancel)?;
            store.set_fingerprint_count(id, count);
            Ok(())
        };
        let policy = VotePolicy {
            threshold_votes: self.config.threshold_votes,
            degree: settings.degree,
            max_time_gap_secs: self.config.max_time_gap_secs,
            min_band_matches: self.config.min_band_matches,
            max_offset_secs: self.config.max_offset_secs,
            rows_per_band: fingerprinter.profile().rows_per_band,
        };
        let linker = AudioLinker::new(index.clone(), &fingerprinter, policy, &self.cancel);
        self.run_similarity(SearchType::Audio, paths, prepare, &linker, reporter)
    }

    /// Phase A builds the group store and signatures in parallel, Phase B
    /// links every group and feeds the consolidator through an ordered queue.
    fn run_similarity<P>(
        &self,
        search: SearchType,
        paths: &[PathBuf],
        prepare: P,
        linker: &dyn Linker,
        reporter: &dyn ProgressReporter,
    ) -> Result<SearchReport, Error>
    where
        P: Fn(&ContentId, &Path, &GroupStore) -> Result<(), Error> + Sync,
    {
        let store = GroupStore::new();
        let classifier = Classifier::for_search(search);
        let wanted = match search {
            SearchType::Audio => FileType::Audio,
            _ => FileType::Image,
        };
        let (err_tx, err_rx) = unbounded();

        // Phase A: signatures
        let sig_start = Instant::now();
        with_ticker(reporter, |ticker| {
            self.signature_phase(paths, &classifier, wanted, &prepare, &store, &err_tx, ticker)
        })?;
        let purged = store.purge_corrupt();
        let signature_duration = sig_start.elapsed();
        reporter.on_signature_complete(store.len(), signature_duration.as_secs_f64());
        debug!(
            "Signature phase completed in {:.2}s: {} groups, {} dropped as corrupt",
            signature_duration.as_secs_f64(),
            store.len(),
            purged
        );

        // Phase B: linking and consolidation
        let link_start = Instant::now();
        let ids = store.ids();
        let groups = ids.len();
        reporter.on_link_start(groups);
        let clusters = with_ticker(reporter, |ticker| {
            self.link_phase(&ids, linker, &store, &err_tx, ticker)
        })?;
        let link_duration = link_start.elapsed();
        reporter.on_consolidate_complete(clusters.len(), link_duration.as_secs_f64());
        debug!(
            "Link phase completed in {:.2}s: {} clusters",
            link_duration.as_secs_f64(),
            clusters.len()
        );

        drop(err_tx);
        let mut errors: Vec<FileError> = err_rx.iter().collect();
        errors.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(SearchReport {
            search: Some(search),
            clusters,
            errors,
            files_processed: paths.len(),
            groups,
            signature_duration,
            link_duration,
            cancelled: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn signature_phase<P>(
        &self,
        paths: &[PathBuf],
        classifier: &Classifier,
        wanted: FileType,
        prepare: &P,
        store: &GroupStore,
        errors: &Sender<FileError>,
        ticker: &ProgressTicker,
    ) -> Result<(), Error>
    where
        P: Fn(&ContentId, &Path, &GroupStore) -> Result<(), Error> + Sync,
    {
        let total = paths.len();
        let processed = AtomicUsize::new(0);
        paths.par_iter().try_for_each(|path| {
            self.cancel.check()?;
            let result = self.admit(path, classifier, wanted, store).and_then(|created| match created {
                Some(id) => prepare(&id, path, store).inspect_err(|_| store.mark_corrupt(&id)),
                None => Ok(()),
            });
            if let Err(e) = result {
                report_failure(path, e, errors)?;
            }
            let n = processed.fetch_add(1, Ordering::Relaxed) + 1;
            ticker.publish(Tick::Signature { processed: n, total });
            Ok(())
        })
    }

    /// Classifies and hashes `path` into the store. Returns the content id
    /// when this call created the group.
    fn admit(
        &self,
        path: &Path,
        classifier: &Classifier,
        wanted: FileType,
        store: &GroupStore,
    ) -> Result<Option<ContentId>, Error> {
        let metadata = fs::metadata(path)?;
        if metadata.len() == 0 {
            return Err(Error::EmptyFile(path.to_path_buf()));
        }
        let file_type = classifier.classify(path);
        if file_type != wanted {
            return Err(Error::Unsupported(path.to_path_buf()));
        }
        let id = content_id(path, self.config.read_buffer_size, &self.cancel)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let record = FileRecord {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified,
            content_id: id,
        };
        if store.insert_or_append(record, file_type) {
            Ok(Some(id))
        } else {
            trace!("{} shares content {} with an earlier file", path.display(), id);
            Ok(None)
        }
    }

    fn link_phase(
        &self,
        ids: &[ContentId],
        linker: &dyn Linker,
        store: &GroupStore,
        errors: &Sender<FileError>,
        ticker: &ProgressTicker,
    ) -> Result<Vec<DuplicateCluster>, Error> {
        let total = ids.len();
        let linked = AtomicUsize::new(0);
        let (done_tx, done_rx) = unbounded::<ContentId>();

        thread::scope(|s| {
            let consolidator = s.spawn(move || {
                let mut consolidator = Consolidator::new(store);
                for id in done_rx.iter() {
                    consolidator.consume(id);
                }
                consolidator.finish()
            });

            let linking = ids.par_iter().try_for_each(|id| {
                self.cancel.check()?;
                if let Err(e) = linker.link(store, id) {
                    if matches!(e, Error::Cancelled) {
                        return Err(e);
                    }
                    // matches stay as they were; the group is still consolidated
                    warn!("Linking group {} failed: {}", id, e);
                    if let Some(path) = store.with_group(id, |g| g.duplicates.first().cloned()).flatten() {
                        let _ = errors.send(FileError::new(path, &e));
                    }
                }
                let n = linked.fetch_add(1, Ordering::Relaxed) + 1;
                ticker.publish(Tick::Link { linked: n, total });
                let _ = done_tx.send(*id);
                Ok::<_, Error>(())
            });
            drop(done_tx);

            let clusters = consolidator
                .join()
                .map_err(|_| Error::Other("consolidator thread panicked".to_string()))?;
            linking?;
            Ok(clusters)
        })
    }
}

/// Per-file failures are reported and skipped; cancellation unwinds.
fn report_failure(path: &Path, err: Error, errors: &Sender<FileError>) -> Result<(), Error> {
    if matches!(err, Error::Cancelled) {
        return Err(err);
    }
    warn!("Skipping '{}': {}", path.display(), err);
    let _ = errors.send(FileError::new(path, &err));
    Ok(())
}

fn image_signature(
    index: &dyn SignatureIndex,
    codec: &ImageCodec,
    id: &ContentId,
    path: &Path,
) -> Result<crate::signature::Signature, Error> {
    if index.exists(id)? {
        if let Some(signature) = index.get(id)? {
            trace!("Signature cache hit for {}", path.display());
            return Ok(signature);
        }
    }
    let raster = decode_raster(path, codec.algorithm().raster_spec())?;
    let signature = codec.encode(&raster)?;
    index.put(*id, &signature)?;
    Ok(signature)
}

/// Stores the fixed-stride fingerprints of `path` unless the index already
/// holds them. Returns the fingerprint count used to normalise votes.
fn audio_fingerprints(
    index: &dyn FingerprintIndex,
    fingerprinter: &AudioFingerprinter,
    id: &ContentId,
    path: &Path,
    cancel: &CancelToken,
) -> Result<usize, Error> {
    let expected = fingerprinter.expected_count(path).ok();
    if let Some(expected) = expected {
        if index.estimate_already_inserted(id, expected)? {
            trace!("Fingerprint cache hit for {}", path.display());
            return Ok(expected);
        }
    }
    let stride = Stride::Fixed(fingerprinter.profile().stride);
    let fingerprints = fingerprinter.fingerprint_file(path, *id, stride, cancel)?;
    if fingerprints.is_empty() {
        return Err(Error::Audio(format!("{} is too short to fingerprint", path.display())));
    }
    index.insert_fingerprints(*id, &fingerprints)?;
    Ok(expected.filter(|n| *n > 0).unwrap_or(fingerprints.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_exact_search_reports_clusters() {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for (name, body) in [("a", "same"), ("b", "same"), ("c", "other")] {
            let p = dir.path().join(name);
            fs::write(&p, body).unwrap();
            paths.push(p);
        }
        let engine = DuplicateEngine::new(EngineConfig::default());
        let report = engine
            .find_duplicates(SearchType::ExactHash, &paths, None, None, &SilentReporter)
            .unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].paths, vec![paths[0].clone(), paths[1].clone()]);
        assert_eq!(report.search, Some(SearchType::ExactHash));
        assert!(!report.cancelled);
    }

    #[test]
    fn test_audio_search_rejects_unusable_profile() {
        let mut config = EngineConfig::default();
        config.audio.frequency_bands = 30;
        let engine = DuplicateEngine::new(config);
        let err = engine
            .find_duplicates(SearchType::Audio, &[], None, None, &SilentReporter)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{}", err);
    }

    #[test]
    fn test_cancelled_before_start_is_empty() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("a");
        fs::write(&p, "x").unwrap();
        let engine = DuplicateEngine::new(EngineConfig::default());
        engine.cancel_token().cancel();
        let report = engine
            .find_duplicates(SearchType::ExactHash, &[p.clone(), p], None, None, &SilentReporter)
            .unwrap();
        assert!(report.cancelled);
        assert!(report.clusters.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_non_images_are_reported() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("notes.txt");
        fs::write(&p, "not an image").unwrap();
        let engine = DuplicateEngine::new(EngineConfig::default());
        let report = engine
            .find_duplicates(SearchType::Image, &[p.clone()], None, None, &SilentReporter)
            .unwrap();
        assert!(report.clusters.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, p);
        assert_eq!(report.groups, 0);
    }
}
