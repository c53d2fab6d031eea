use super::fingerprint::{FingerprintBuilder, Stride};
use super::minhash::MinHasher;
use super::spectrum::SpectralMapper;
use super::{AudioProfile, Fingerprint};
use crate::cancel::CancelToken;
use crate::decode::AudioSource;
use crate::error::Error;
use crate::model::ContentId;
use crossbeam_channel::bounded;
use std::path::Path;
use std::thread;
use tracing::trace;

const SAMPLE_QUEUE: usize = 8;
const FRAME_QUEUE: usize = 256;

/// Fingerprints audio through three concurrent stages: decode/resample,
/// spectral mapping and block encoding, joined by bounded queues.
#[derive(Debug, Clone)]
pub struct AudioFingerprinter {
    profile: AudioProfile,
    minhash: MinHasher,
}

impl AudioFingerprinter {
    pub fn new(profile: AudioProfile) -> Self {
        let minhash = profile.min_hasher();
        Self { profile, minhash }
    }

    pub fn profile(&self) -> &AudioProfile {
        &self.profile
    }

    /// Fingerprint count a fixed-stride pass over `path` will produce,
    /// estimated from stream metadata only.
    pub fn expected_count(&self, path: &Path) -> Result<usize, Error> {
        let source = AudioSource::open(path)?;
        let secs = source
            .duration_secs()
            .ok_or_else(|| Error::Audio(format!("unknown duration for {}", path.display())))?;
        let samples = (secs * self.profile.sample_rate as f64).round() as u64;
        Ok(self.profile.expected_fingerprints(samples))
    }

    pub fn fingerprint_file(
        &self,
        path: &Path,
        file_id: ContentId,
        stride: Stride,
        cancel: &CancelToken,
    ) -> Result<Vec<Fingerprint>, Error> {
        let source = AudioSource::open(path)?;
        let rate = self.profile.sample_rate;
        let fps = self.run(
            |sink| source.stream_mono(rate, cancel, sink),
            file_id,
            stride,
            cancel,
        )?;
        trace!("{} fingerprints for {}", fps.len(), path.display());
        Ok(fps)
    }

    /// Fingerprint mono samples already at the profile rate.
    pub fn fingerprint_samples(
        &self,
        samples: &[f32],
        file_id: ContentId,
        stride: Stride,
        cancel: &CancelToken,
    ) -> Result<Vec<Fingerprint>, Error> {
        self.run(
            |sink| {
                for chunk in samples.chunks(4096) {
                    cancel.check()?;
                    if !sink(chunk.to_vec()) {
                        break;
                    }
                }
                Ok(())
            },
            file_id,
            stride,
            cancel,
        )
    }

    fn run<P>(
        &self,
        produce: P,
        file_id: ContentId,
        stride: Stride,
        cancel: &CancelToken,
    ) -> Result<Vec<Fingerprint>, Error>
    where
        P: FnOnce(&mut dyn FnMut(Vec<f32>) -> bool) -> Result<(), Error> + Send,
    {
        let (sample_tx, sample_rx) = bounded::<Vec<f32>>(SAMPLE_QUEUE);
        let (frame_tx, frame_rx) = bounded::<Vec<f32>>(FRAME_QUEUE);
        let profile = &self.profile;

        thread::scope(|s| {
            let decoder = s.spawn(move || produce(&mut |chunk: Vec<f32>| sample_tx.send(chunk).is_ok()));

            let mapper = s.spawn(move || -> Result<(), Error> {
                let mut mapper = SpectralMapper::new(profile);
                for chunk in sample_rx.iter() {
                    let mut open = true;
                    mapper.push(&chunk, |frame| {
                        if open && (cancel.is_cancelled() || frame_tx.send(frame).is_err()) {
                            open = false;
                        }
                    });
                    cancel.check()?;
                    if !open {
                        break;
                    }
                }
                Ok(())
            });

            let mut builder = FingerprintBuilder::new(profile, &self.minhash, file_id, stride);
            let mut fingerprints = Vec::new();
            for frame in frame_rx.iter() {
                if let Some(fp) = builder.push(frame) {
                    fingerprints.push(fp);
                }
            }

            let decoded = decoder
                .join()
                .map_err(|_| Error::Audio("decoder stage panicked".to_string()))?;
            let mapped = mapper
                .join()
                .map_err(|_| Error::Audio("spectral stage panicked".to_string()))?;
            decoded?;
            mapped?;
            cancel.check()?;
            Ok(fingerprints)
        })
    }
}
