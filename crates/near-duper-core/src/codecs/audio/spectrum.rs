use super::AudioProfile;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

#[inline]
fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = (PI * (i as f32)) / (n as f32);
            t.sin() * t.sin()
        })
        .collect()
}

/// FFT bin boundaries of `bands` log-spaced bands between `min_freq` and `max_freq`.
/// Every band covers at least one bin.
pub fn band_edges(profile: &AudioProfile) -> Vec<usize> {
    let bands = profile.frequency_bands;
    let bin_hz = profile.sample_rate as f32 / profile.dft_size as f32;
    let ratio = (profile.max_frequency / profile.min_frequency).ln() / bands as f32;
    let base = ratio.exp();
    let max_bin = profile.dft_size / 2;

    let mut edges = Vec::with_capacity(bands + 1);
    let mut freq = profile.min_frequency;
    for _ in 0..=bands {
        let bin = ((freq / bin_hz).round() as usize).min(max_bin);
        let bin = match edges.last() {
            Some(&prev) if bin <= prev => prev + 1,
            _ => bin,
        };
        edges.push(bin.min(max_bin));
        freq *= base;
    }
    edges
}

/// Sliding-window spectral mapper: push mono samples at the profile rate and
/// receive one `frequency_bands`-long vector every `overlap` samples once the
/// window is full.
pub struct SpectralMapper {
    dft_size: usize,
    overlap: usize,
    window: Vec<f32>,
    edges: Vec<usize>,
    fft: Arc<dyn RealToComplex<f32>>,
    samples: VecDeque<f32>,
    inbuf: Vec<f32>,
    outbuf: Vec<Complex<f32>>,
}

impl SpectralMapper {
    pub fn new(profile: &AudioProfile) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(profile.dft_size);
        let outbuf = fft.make_output_vec();
        Self {
            dft_size: profile.dft_size,
            overlap: profile.overlap.max(1),
            window: hann(profile.dft_size),
            edges: band_edges(profile),
            fft,
            samples: VecDeque::with_capacity(profile.dft_size * 2),
            inbuf: vec![0.0; profile.dft_size],
            outbuf,
        }
    }

    /// Feeds samples, calling `emit` for every completed window.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        for &s in samples {
            self.samples.push_back(s);
            if self.samples.len() == self.dft_size {
                emit(self.frame());
                self.samples.drain(..self.overlap.min(self.dft_size));
            }
        }
    }

    fn frame(&mut self) -> Vec<f32> {
        for (dst, (s, w)) in self
            .inbuf
            .iter_mut()
            .zip(self.samples.iter().zip(self.window.iter()))
        {
            *dst = s * w;
        }
        // Buffer sizes come from the plan, so this cannot fail.
        let _ = self.fft.process(&mut self.inbuf, &mut self.outbuf);

        self.edges
            .windows(2)
            .map(|w| {
                let (lo, hi) = (w[0], w[1].max(w[0] + 1));
                let bins = &self.outbuf[lo.min(self.outbuf.len())..hi.min(self.outbuf.len())];
                if bins.is_empty() {
                    return 0.0;
                }
                bins.iter().map(|c| c.norm_sqr()).sum::<f32>() / bins.len() as f32
            })
            .collect()
    }
}
