use serde::{Deserialize, Serialize};

/// Fixed-length packed bit vector, least significant bit first within each word.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitVector {
    len: usize,
    words: Vec<u64>,
}

impl BitVector {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        let mut v = Self::new(bits.len());
        for (i, &b) in bits.iter().enumerate() {
            if b {
                v.set(i);
            }
        }
        v
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        idx < self.len && (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Number of differing bits. Vectors of different length compare the
    /// missing tail as all-different.
    pub fn hamming(&self, other: &BitVector) -> u32 {
        let common: u32 = self
            .words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        common + self.len.abs_diff(other.len) as u32
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }
}

/// Distance used to compare two signatures of the same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Hamming,
    Cosine,
}

/// Fixed-shape feature vector produced by an image codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signature {
    Bits(BitVector),
    Floats(Vec<f32>),
}

impl Signature {
    pub fn len(&self) -> usize {
        match self {
            Signature::Bits(b) => b.len(),
            Signature::Floats(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Similarity in `[0, 1]`, 1 meaning identical.
    ///
    /// Hamming: `1 - distance / bits`. Cosine: `(1 + cos) / 2`.
    /// Mismatched shapes score 0.
    pub fn similarity(&self, other: &Signature, metric: Metric) -> f64 {
        match (self, other, metric) {
            (Signature::Bits(a), Signature::Bits(b), _) => {
                if a.len() != b.len() || a.is_empty() {
                    return 0.0;
                }
                1.0 - a.hamming(b) as f64 / a.len() as f64
            }
            (Signature::Floats(a), Signature::Floats(b), Metric::Cosine) => {
                if a.len() != b.len() || a.is_empty() {
                    return 0.0;
                }
                (1.0 + cosine(a, b)) / 2.0
            }
            (Signature::Floats(a), Signature::Floats(b), Metric::Hamming) => {
                if a.len() != b.len() || a.is_empty() {
                    return 0.0;
                }
                let differing = a
                    .iter()
                    .zip(b.iter())
                    .filter(|(x, y)| (**x > 0.0) != (**y > 0.0))
                    .count();
                1.0 - differing as f64 / a.len() as f64
            }
            _ => 0.0,
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 && nb == 0.0 {
        return 1.0;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}
