use crate::signature::BitVector;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Value emitted for a permutation that never hits a set bit.
pub const NO_HIT: u8 = u8::MAX;

/// MinHash over a sparse bit schema using a fixed, seeded set of partial
/// permutations. Each permutation lists `rows` distinct schema positions;
/// its hash is the first row whose position is set. `rows` is capped at 255
/// so no hit row collides with [`NO_HIT`].
#[derive(Debug, Clone)]
pub struct MinHasher {
    permutations: Vec<Vec<u32>>,
}

impl MinHasher {
    pub fn new(count: usize, rows: usize, schema_len: usize, seed: u64) -> Self {
        let rows = rows.min(schema_len).min(NO_HIT as usize);
        let mut rng = StdRng::seed_from_u64(seed);
        let permutations = (0..count)
            .map(|_| {
                rand::seq::index::sample(&mut rng, schema_len, rows)
                    .into_iter()
                    .map(|i| i as u32)
                    .collect()
            })
            .collect();
        Self { permutations }
    }

    pub fn len(&self) -> usize {
        self.permutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutations.is_empty()
    }

    pub fn hash(&self, schema: &BitVector) -> Vec<u8> {
        self.permutations
            .iter()
            .map(|perm| {
                perm.iter()
                    .position(|&bit| schema.get(bit as usize))
                    .map_or(NO_HIT, |row| row as u8)
            })
            .collect()
    }
}

/// Groups `hash_bins` into bands of `rows_per_band` values and packs each band
/// with its band number into one bucket key: `band << 32 | le_bytes(values)`.
pub fn lsh_buckets(hash_bins: &[u8], rows_per_band: usize) -> Vec<u64> {
    let rows_per_band = rows_per_band.clamp(1, 4);
    hash_bins
        .chunks(rows_per_band)
        .enumerate()
        .map(|(band, values)| {
            let mut packed = [0u8; 4];
            packed[..values.len()].copy_from_slice(values);
            ((band as u64) << 32) | u32::from_le_bytes(packed) as u64
        })
        .collect()
}
