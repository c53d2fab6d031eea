use super::dct::DctKernel;
use crate::error::Error;
use crate::model::{ImageAlgorithm, Raster};
use crate::signature::{BitVector, Signature};

const BLOCK_SIZE: usize = 16;
const BLOCK_STRIDE: usize = BLOCK_SIZE / 2;
const LOW_FREQ: usize = 8;

// Rows of the color mixing matrix are unit vectors.
const XI: f32 = 0.4472;
const ETA: f32 = 0.8780;
const GAMMA: f32 = 0.1705;
const COLOR_MIX: [[f32; 3]; 3] = [[XI, ETA, GAMMA], [GAMMA, XI, ETA], [ETA, GAMMA, XI]];

/// One perceptual image codec, owning whatever DCT table it needs.
///
/// Build once per search and share between workers.
#[derive(Debug, Clone)]
pub struct ImageCodec {
    algorithm: ImageAlgorithm,
    kernel: Option<DctKernel>,
}

impl ImageCodec {
    pub fn new(algorithm: ImageAlgorithm) -> Self {
        let kernel = match algorithm {
            ImageAlgorithm::PerceptualHash | ImageAlgorithm::ColorDctHash => {
                Some(DctKernel::new(algorithm.raster_spec().width as usize))
            }
            _ => None,
        };
        Self { algorithm, kernel }
    }

    pub fn algorithm(&self) -> ImageAlgorithm {
        self.algorithm
    }

    pub fn encode(&self, raster: &Raster) -> Result<Signature, Error> {
        let expected = self.algorithm.raster_spec();
        if raster.spec != expected || raster.pixels.len() != expected.byte_len() {
            return Err(Error::Other(format!(
                "{} expects a {}x{} {:?} raster, got {}x{} {:?}",
                self.algorithm,
                expected.width,
                expected.height,
                expected.color,
                raster.spec.width,
                raster.spec.height,
                raster.spec.color
            )));
        }

        let sig = match (self.algorithm, &self.kernel) {
            (ImageAlgorithm::DifferenceHash, _) => difference_hash(raster),
            (ImageAlgorithm::BlockMeanHash, _) => block_mean_hash(raster),
            (ImageAlgorithm::PerceptualHash, Some(k)) => perceptual_hash(raster, k),
            (ImageAlgorithm::ColorDctHash, Some(k)) => color_dct_hash(raster, k),
            _ => return Err(Error::Other(format!("{} has no DCT kernel", self.algorithm))),
        };
        Ok(sig)
    }
}

/// Bit `y * 8 + x` is set when pixel `(x, y)` is strictly darker than `(x + 1, y)`.
fn difference_hash(raster: &Raster) -> Signature {
    let (w, h) = (raster.width(), raster.height());
    let mut bits = BitVector::new((w - 1) * h);
    for y in 0..h {
        let row = &raster.pixels[y * w..(y + 1) * w];
        for x in 0..w - 1 {
            if row[x] < row[x + 1] {
                bits.set(y * (w - 1) + x);
            }
        }
    }
    Signature::Bits(bits)
}

/// Overlapping 16px blocks at an 8px stride; each block median is compared
/// against the median of all block medians.
fn block_mean_hash(raster: &Raster) -> Signature {
    let (w, h) = (raster.width(), raster.height());
    let cols = (w - BLOCK_SIZE) / BLOCK_STRIDE + 1;
    let rows = (h - BLOCK_SIZE) / BLOCK_STRIDE + 1;

    let mut block = Vec::with_capacity(BLOCK_SIZE * BLOCK_SIZE);
    let mut medians = Vec::with_capacity(cols * rows);
    for by in 0..rows {
        for bx in 0..cols {
            block.clear();
            let (x0, y0) = (bx * BLOCK_STRIDE, by * BLOCK_STRIDE);
            for y in y0..y0 + BLOCK_SIZE {
                let start = y * w + x0;
                block.extend(raster.pixels[start..start + BLOCK_SIZE].iter().map(|&p| p as f32));
            }
            medians.push(median(&mut block));
        }
    }

    let global = median(&mut medians.clone());
    let bits: Vec<bool> = medians.iter().map(|&m| m > global).collect();
    Signature::Bits(BitVector::from_bools(&bits))
}

/// 64 values of +1/-1: low-frequency DCT coefficients against their median,
/// DC term zeroed.
fn perceptual_hash(raster: &Raster, kernel: &DctKernel) -> Signature {
    let input: Vec<f32> = raster.pixels.iter().map(|&p| p as f32).collect();
    let mut coeffs = kernel.low_frequency(&input, LOW_FREQ);
    coeffs[0] = 0.0;

    let med = median(&mut coeffs.clone());
    Signature::Floats(
        coeffs
            .iter()
            .map(|&c| if c > med { 1.0 } else { -1.0 })
            .collect(),
    )
}

/// Four 64-value channels derived from per-channel RGB DCTs mixed through
/// `COLOR_MIX`: `m0`, `m1 - m0`, `m2 - m0`, `m1 - m2`. The brightness (DC of `m0`)
/// is dropped.
fn color_dct_hash(raster: &Raster, kernel: &DctKernel) -> Signature {
    let plane_len = raster.width() * raster.height();
    let per_channel: Vec<Vec<f32>> = (0..3)
        .map(|c| {
            let plane: Vec<f32> = raster
                .pixels
                .iter()
                .skip(c)
                .step_by(3)
                .take(plane_len)
                .map(|&p| p as f32)
                .collect();
            kernel.low_frequency(&plane, LOW_FREQ)
        })
        .collect();

    let n = LOW_FREQ * LOW_FREQ;
    let mut mixed = [vec![0.0f32; n], vec![0.0f32; n], vec![0.0f32; n]];
    for (m, weights) in mixed.iter_mut().zip(COLOR_MIX.iter()) {
        for (i, out) in m.iter_mut().enumerate() {
            *out = weights
                .iter()
                .zip(per_channel.iter())
                .map(|(w, ch)| w * ch[i])
                .sum();
        }
    }
    mixed[0][0] = 0.0;

    let [m0, m1, m2] = &mixed;
    let mut out = Vec::with_capacity(4 * n);
    out.extend_from_slice(m0);
    out.extend(m1.iter().zip(m0).map(|(a, b)| a - b));
    out.extend(m2.iter().zip(m0).map(|(a, b)| a - b));
    out.extend(m1.iter().zip(m2).map(|(a, b)| a - b));
    Signature::Floats(out)
}

/// Median of `values`, reordering them. Mean of the two middle values for even lengths.
fn median(values: &mut [f32]) -> f32 {
    let len = values.len();
    if len == 0 {
        return 0.0;
    }
    let mid = len / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if len % 2 == 1 {
        return upper;
    }
    let lower_max = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (lower_max + upper) / 2.0
}
