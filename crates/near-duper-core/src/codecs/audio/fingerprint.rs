use super::minhash::MinHasher;
use super::quickselect::top_magnitudes;
use super::wavelet::haar_2d;
use super::{AudioProfile, Fingerprint};
use crate::model::ContentId;
use crate::signature::BitVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// How far the spectrogram window advances between fingerprints.
#[derive(Debug, Clone)]
pub enum Stride {
    /// Constant advance in samples.
    Fixed(usize),
    /// Uniform advance in `[max / 2, max]` samples, reproducible from the seed.
    Randomized { max: usize, rng: StdRng },
}

impl Stride {
    pub fn randomized(max: usize, seed: u64) -> Self {
        Stride::Randomized {
            max,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn next_samples(&mut self) -> usize {
        match self {
            Stride::Fixed(s) => *s,
            Stride::Randomized { max, rng } => {
                let max = (*max).max(2);
                rng.random_range(max / 2..=max)
            }
        }
    }
}

/// Log-compresses a spectrogram block against its own peak, keeping the sign:
/// `sign(v) * ln(1 + |v| / peak * 255) / ln(256)`.
pub fn log_compress(block: &mut [f32]) {
    let peak = block.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if peak == 0.0 {
        return;
    }
    let c = 1.0 / 256.0f32.ln();
    for v in block.iter_mut() {
        let scaled = (v.abs() / peak).min(1.0);
        *v = v.signum() * c * (1.0 + scaled * 255.0).ln();
    }
}

/// Sign schema of the strongest wavelets: coefficient `i` sets bit `2i` when
/// positive and `2i + 1` when negative.
pub fn wavelet_schema(coefficients: &[f32], top: usize) -> BitVector {
    let mut schema = BitVector::new(coefficients.len() * 2);
    for i in top_magnitudes(coefficients, top) {
        let v = coefficients[i];
        if v > 0.0 {
            schema.set(2 * i);
        } else if v < 0.0 {
            schema.set(2 * i + 1);
        }
    }
    schema
}

/// Hash bins of one `fingerprint_size x frequency_bands` spectrogram block,
/// or `None` when the block carries no signal.
pub fn encode_block(mut block: Vec<f32>, profile: &AudioProfile, minhash: &MinHasher) -> Option<Vec<u8>> {
    log_compress(&mut block);
    haar_2d(&mut block, profile.fingerprint_size, profile.frequency_bands);
    let schema = wavelet_schema(&block, profile.top_wavelets);
    if schema.count_ones() == 0 {
        return None;
    }
    Some(minhash.hash(&schema))
}

/// Accumulates spectral frames into blocks and emits a fingerprint for each.
pub struct FingerprintBuilder<'a> {
    profile: &'a AudioProfile,
    minhash: &'a MinHasher,
    file_id: ContentId,
    stride: Stride,
    frames: VecDeque<Vec<f32>>,
    /// Spectral frame index of `frames[0]`.
    first_frame: usize,
    /// Frames still to discard before the next block starts.
    skip: usize,
}

impl<'a> FingerprintBuilder<'a> {
    pub fn new(profile: &'a AudioProfile, minhash: &'a MinHasher, file_id: ContentId, stride: Stride) -> Self {
        Self {
            profile,
            minhash,
            file_id,
            stride,
            frames: VecDeque::with_capacity(profile.fingerprint_size),
            first_frame: 0,
            skip: 0,
        }
    }

    pub fn push(&mut self, frame: Vec<f32>) -> Option<Fingerprint> {
        if self.skip > 0 {
            self.skip -= 1;
            self.first_frame += 1;
            return None;
        }
        self.frames.push_back(frame);
        if self.frames.len() < self.profile.fingerprint_size {
            return None;
        }

        let start_frame = self.first_frame;
        let block: Vec<f32> = self.frames.iter().flatten().copied().collect();
        let advance = (self.stride.next_samples() / self.profile.overlap.max(1)).max(1);
        let dropped = advance.min(self.frames.len());
        self.frames.drain(..dropped);
        self.first_frame += dropped;
        self.skip = advance - dropped;

        let hash_bins = encode_block(block, self.profile, self.minhash)?;
        Some(Fingerprint {
            file_id: self.file_id,
            start_at: self.profile.frame_seconds(start_frame),
            hash_bins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> AudioProfile {
        AudioProfile::default()
    }

    fn tone_frame(bands: usize, loud: usize) -> Vec<f32> {
        (0..bands)
            .map(|b| if b == loud { 100.0 } else { 0.5 })
            .collect()
    }

    #[test]
    fn test_log_compress_bounds() {
        let mut block = vec![0.0, 1.0, -4.0, 2.0];
        log_compress(&mut block);
        assert_eq!(block[0], 0.0);
        assert!((block[2] + 1.0).abs() < 1e-6);
        assert!(block[1] > 0.0 && block[1] < block[3]);
        let mut silent = vec![0.0; 4];
        log_compress(&mut silent);
        assert!(silent.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_schema_has_top_bits() {
        let coeffs: Vec<f32> = (0..64).map(|i| if i % 2 == 0 { i as f32 } else { -(i as f32) }).collect();
        let schema = wavelet_schema(&coeffs, 10);
        assert_eq!(schema.count_ones(), 10);
        assert!(schema.get(2 * 63 + 1));
        assert!(schema.get(2 * 62));
        assert!(!schema.get(0));
    }

    #[test]
    fn test_silent_block_is_skipped() {
        let p = profile();
        let minhash = p.min_hasher();
        let block = vec![0.0; p.fingerprint_size * p.frequency_bands];
        assert!(encode_block(block, &p, &minhash).is_none());
    }

    #[test]
    fn test_builder_fixed_stride_positions() {
        let p = profile();
        let minhash = p.min_hasher();
        let id = ContentId([1; 32]);
        let mut builder = FingerprintBuilder::new(&p, &minhash, id, Stride::Fixed(p.stride));
        let mut fps = Vec::new();
        for i in 0..p.fingerprint_size + 3 * 8 {
            if let Some(fp) = builder.push(tone_frame(p.frequency_bands, (i / 20) % p.frequency_bands)) {
                fps.push(fp);
            }
        }
        assert_eq!(fps.len(), 4);
        assert_eq!(fps[0].start_at, 0.0);
        assert!((fps[1].start_at - p.frame_seconds(8)).abs() < 1e-6);
        assert!(fps.iter().all(|f| f.hash_bins.len() == p.permutations));
        assert!(fps.iter().all(|f| f.file_id == id));
    }

    #[test]
    fn test_randomized_stride_range() {
        let mut s = Stride::randomized(512, 9);
        for _ in 0..100 {
            let n = s.next_samples();
            assert!((256..=512).contains(&n));
        }
        let mut a = Stride::randomized(512, 9);
        let mut b = Stride::randomized(512, 9);
        assert_eq!(a.next_samples(), b.next_samples());
    }
}
