use std::f32::consts::SQRT_2;

/// In-place standard 2D Haar decomposition of a row-major `rows x cols`
/// image: every row is fully decomposed, then every column.
/// Both dimensions must be powers of two.
pub fn haar_2d(image: &mut [f32], rows: usize, cols: usize) {
    debug_assert_eq!(image.len(), rows * cols);
    debug_assert!(rows.is_power_of_two() && cols.is_power_of_two());
    let mut scratch = vec![0.0f32; rows.max(cols)];

    for row in image.chunks_mut(cols) {
        haar_1d(row, &mut scratch);
    }

    let mut column = vec![0.0f32; rows];
    for c in 0..cols {
        for r in 0..rows {
            column[r] = image[r * cols + c];
        }
        haar_1d(&mut column, &mut scratch);
        for r in 0..rows {
            image[r * cols + c] = column[r];
        }
    }
}

/// Recursive halving: averages land in the first half, details in the second,
/// both scaled by `1/sqrt(2)`.
fn haar_1d(data: &mut [f32], scratch: &mut [f32]) {
    let mut len = data.len();
    while len > 1 {
        let half = len / 2;
        for i in 0..half {
            let (a, b) = (data[2 * i], data[2 * i + 1]);
            scratch[i] = (a + b) / SQRT_2;
            scratch[half + i] = (a - b) / SQRT_2;
        }
        data[..len].copy_from_slice(&scratch[..len]);
        len = half;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haar_1d_known_values() {
        let mut data = [4.0, 2.0, 5.0, 5.0];
        let mut scratch = [0.0; 4];
        haar_1d(&mut data, &mut scratch);
        // level 1: [6/r2, 10/r2 | 2/r2, 0]; level 2: [16/2, -4/2 | ...]
        assert!((data[0] - 8.0).abs() < 1e-5);
        assert!((data[1] + 2.0).abs() < 1e-5);
        assert!((data[2] - 2.0 / SQRT_2).abs() < 1e-5);
        assert!(data[3].abs() < 1e-5);
    }

    #[test]
    fn test_haar_preserves_energy() {
        let (rows, cols) = (8, 4);
        let mut image: Vec<f32> = (0..rows * cols).map(|i| ((i * 7) % 5) as f32 - 2.0).collect();
        let before: f32 = image.iter().map(|v| v * v).sum();
        haar_2d(&mut image, rows, cols);
        let after: f32 = image.iter().map(|v| v * v).sum();
        assert!((before - after).abs() < 1e-3);
    }

    #[test]
    fn test_constant_image_concentrates_in_first_coefficient() {
        let mut image = vec![1.0f32; 16 * 8];
        haar_2d(&mut image, 16, 8);
        assert!((image[0] - (128.0f32).sqrt()).abs() < 1e-4);
        assert!(image[1..].iter().all(|v| v.abs() < 1e-5));
    }
}
