mod fingerprint;
mod minhash;
mod pipeline;
mod quickselect;
mod spectrum;
mod wavelet;

pub use fingerprint::{encode_block, log_compress, wavelet_schema, FingerprintBuilder, Stride};
pub use minhash::{lsh_buckets, MinHasher, NO_HIT};
pub use pipeline::AudioFingerprinter;
pub use quickselect::{select_by_magnitude, top_magnitudes};
pub use spectrum::{band_edges, SpectralMapper};
pub use wavelet::haar_2d;

use crate::model::ContentId;
use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Constants of the audio fingerprinting pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProfile {
    pub sample_rate: u32,
    pub dft_size: usize,
    /// Samples between consecutive spectral frames.
    pub overlap: usize,
    pub frequency_bands: usize,
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// Spectral frames per fingerprint block.
    pub fingerprint_size: usize,
    pub top_wavelets: usize,
    /// Samples between consecutive fingerprint blocks.
    pub stride: usize,
    pub permutations: usize,
    /// Schema positions per permutation. Capped at 255 so that a hit row
    /// always fits a `u8` next to [`NO_HIT`].
    pub permutation_rows: usize,
    pub rows_per_band: usize,
    pub permutation_seed: u64,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            sample_rate: 5512,
            dft_size: 2048,
            overlap: 64,
            frequency_bands: 32,
            min_frequency: 318.0,
            max_frequency: 2000.0,
            fingerprint_size: 128,
            top_wavelets: 200,
            stride: 512,
            permutations: 100,
            permutation_rows: 256,
            rows_per_band: 4,
            permutation_seed: 0x5eed_f1a6_2024,
        }
    }
}

impl AudioProfile {
    /// Rejects profiles the pipeline cannot run: the Haar transform needs
    /// power-of-two block dimensions and bucket keys pack at most 4 rows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Message(format!("audio profile: {}", msg)));
        if !self.fingerprint_size.is_power_of_two() {
            return fail(format!("fingerprint_size {} is not a power of two", self.fingerprint_size));
        }
        if !self.frequency_bands.is_power_of_two() {
            return fail(format!("frequency_bands {} is not a power of two", self.frequency_bands));
        }
        if self.sample_rate == 0 || self.dft_size < 2 || self.overlap == 0 || self.stride == 0 {
            return fail("sample_rate, dft_size, overlap and stride must be positive".to_string());
        }
        if !(0.0..self.max_frequency).contains(&self.min_frequency)
            || self.max_frequency > self.sample_rate as f32 / 2.0
        {
            return fail(format!(
                "band range {}..{} Hz does not fit a {} Hz signal",
                self.min_frequency, self.max_frequency, self.sample_rate
            ));
        }
        if self.top_wavelets == 0 || self.top_wavelets > self.fingerprint_size * self.frequency_bands {
            return fail(format!("top_wavelets {} out of range", self.top_wavelets));
        }
        if !(1..=4).contains(&self.rows_per_band) || self.permutations == 0 || self.permutation_rows == 0 {
            return fail("rows_per_band must be 1..=4 with at least one permutation row".to_string());
        }
        Ok(())
    }

    pub fn schema_len(&self) -> usize {
        2 * self.fingerprint_size * self.frequency_bands
    }

    pub fn min_hasher(&self) -> MinHasher {
        MinHasher::new(
            self.permutations,
            self.permutation_rows,
            self.schema_len(),
            self.permutation_seed,
        )
    }

    /// Start time of a spectral frame, in seconds.
    pub fn frame_seconds(&self, frame: usize) -> f32 {
        (frame * self.overlap) as f32 / self.sample_rate as f32
    }

    /// Fingerprints a fixed-stride pass produces for `samples` samples at the
    /// profile rate.
    pub fn expected_fingerprints(&self, samples: u64) -> usize {
        let samples = samples as usize;
        if samples < self.dft_size {
            return 0;
        }
        let frames = (samples - self.dft_size) / self.overlap.max(1) + 1;
        if frames < self.fingerprint_size {
            return 0;
        }
        let stride_frames = (self.stride / self.overlap.max(1)).max(1);
        (frames - self.fingerprint_size) / stride_frames + 1
    }
}

/// One sub-fingerprint of an audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub file_id: ContentId,
    /// Offset of the block from the start of the track, in seconds.
    pub start_at: f32,
    pub hash_bins: Vec<u8>,
}

impl Fingerprint {
    pub fn buckets(&self, rows_per_band: usize) -> Vec<u64> {
        lsh_buckets(&self.hash_bins, rows_per_band)
    }
}
