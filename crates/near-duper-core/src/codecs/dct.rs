use rayon::prelude::*;
use std::f32::consts::PI;

/// Precomputed type-II DCT coefficient table for square `n x n` inputs.
///
/// `coeff[k][j] = scale(k) * cos((2j + 1) k pi / 2n)` with
/// `scale(0) = sqrt(1/n)` and `scale(k) = sqrt(2/n)` otherwise.
#[derive(Debug, Clone)]
pub struct DctKernel {
    n: usize,
    coeff: Vec<f32>,
}

impl DctKernel {
    pub fn new(n: usize) -> Self {
        let inv_sqrt_n = 1.0 / (n as f32).sqrt();
        let sqrt_2 = 2.0_f32.sqrt();
        let mut coeff = vec![0.0; n * n];

        for k in 0..n {
            let normalization = if k == 0 { inv_sqrt_n } else { inv_sqrt_n * sqrt_2 };
            for j in 0..n {
                let angle = (PI * k as f32 * (2.0 * j as f32 + 1.0)) / (2.0 * n as f32);
                coeff[k * n + j] = normalization * angle.cos();
            }
        }

        Self { n, coeff }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    fn row(&self, k: usize) -> &[f32] {
        &self.coeff[k * self.n..(k + 1) * self.n]
    }

    /// Top-left `keep x keep` block of the 2D DCT of a row-major `n x n` input.
    ///
    /// Rows are transformed first (in parallel), then columns.
    pub fn low_frequency(&self, input: &[f32], keep: usize) -> Vec<f32> {
        let n = self.n;
        debug_assert_eq!(input.len(), n * n);
        let keep = keep.min(n);

        // Pass 1: rows. rows_out[i][v] = sum_j input[i][j] * coeff[v][j]
        let rows_out: Vec<f32> = input
            .par_chunks(n)
            .flat_map_iter(|row| {
                (0..keep).map(move |v| dot(row, self.row(v)))
            })
            .collect();

        // Pass 2: columns. out[u][v] = sum_i coeff[u][i] * rows_out[i][v]
        let mut out = vec![0.0; keep * keep];
        for u in 0..keep {
            let cu = self.row(u);
            for v in 0..keep {
                let mut sum = 0.0;
                for (i, c) in cu.iter().enumerate() {
                    sum += c * rows_out[i * keep + v];
                }
                out[u * keep + v] = sum;
            }
        }
        out
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_orthonormal() {
        let k = DctKernel::new(16);
        for a in 0..16 {
            for b in 0..16 {
                let d = dot(k.row(a), k.row(b));
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((d - expected).abs() < 1e-4, "rows {} {} -> {}", a, b, d);
            }
        }
    }

    #[test]
    fn test_constant_input_has_only_dc() {
        let k = DctKernel::new(8);
        let out = k.low_frequency(&vec![2.0; 64], 8);
        assert!((out[0] - 16.0).abs() < 1e-3);
        assert!(out[1..].iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn test_low_frequency_matches_naive() {
        let n = 8;
        let k = DctKernel::new(n);
        let input: Vec<f32> = (0..n * n).map(|i| ((i * 37) % 11) as f32).collect();
        let out = k.low_frequency(&input, 4);
        for u in 0..4 {
            for v in 0..4 {
                let mut naive = 0.0;
                for i in 0..n {
                    for j in 0..n {
                        naive += k.row(u)[i] * input[i * n + j] * k.row(v)[j];
                    }
                }
                assert!((out[u * 4 + v] - naive).abs() < 1e-3);
            }
        }
    }
}
