use crate::signature::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Stable identifier of a file's bytes: the BLAKE3 digest of its full content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(pub [u8; 32]);

impl ContentId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(ContentId(arr))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<blake3::Hash> for ContentId {
    fn from(hash: blake3::Hash) -> Self {
        ContentId(*hash.as_bytes())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", &self.to_hex()[..12])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Image,
    Audio,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchType {
    ExactHash,
    Image,
    Audio,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchType::ExactHash => "exact",
            SearchType::Image => "image",
            SearchType::Audio => "audio",
        };
        f.write_str(s)
    }
}

/// Perceptual image codec selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageAlgorithm {
    DifferenceHash,
    BlockMeanHash,
    PerceptualHash,
    ColorDctHash,
}

impl ImageAlgorithm {
    pub const ALL: [ImageAlgorithm; 4] = [
        ImageAlgorithm::DifferenceHash,
        ImageAlgorithm::BlockMeanHash,
        ImageAlgorithm::PerceptualHash,
        ImageAlgorithm::ColorDctHash,
    ];

    /// Namespace of this codec's signatures inside a signature index.
    pub fn id(&self) -> &'static str {
        match self {
            ImageAlgorithm::DifferenceHash => "dhash",
            ImageAlgorithm::BlockMeanHash => "block-mean",
            ImageAlgorithm::PerceptualHash => "phash",
            ImageAlgorithm::ColorDctHash => "color-dct",
        }
    }

    pub fn metric(&self) -> Metric {
        match self {
            ImageAlgorithm::DifferenceHash | ImageAlgorithm::BlockMeanHash => Metric::Hamming,
            ImageAlgorithm::PerceptualHash | ImageAlgorithm::ColorDctHash => Metric::Cosine,
        }
    }

    /// Raster the decoder must produce for this codec.
    pub fn raster_spec(&self) -> RasterSpec {
        match self {
            ImageAlgorithm::DifferenceHash => RasterSpec::new(9, 8, ColorSpace::Gray),
            ImageAlgorithm::BlockMeanHash => RasterSpec::new(256, 256, ColorSpace::Gray),
            ImageAlgorithm::PerceptualHash => RasterSpec::new(64, 64, ColorSpace::Gray),
            ImageAlgorithm::ColorDctHash => RasterSpec::new(128, 128, ColorSpace::Rgb),
        }
    }
}

impl fmt::Display for ImageAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ImageAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageAlgorithm::ALL
            .into_iter()
            .find(|a| a.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown image algorithm '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
}

impl ColorSpace {
    pub fn channels(&self) -> usize {
        match self {
            ColorSpace::Gray => 1,
            ColorSpace::Rgb => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSpec {
    pub width: u32,
    pub height: u32,
    pub color: ColorSpace,
}

impl RasterSpec {
    pub const fn new(width: u32, height: u32, color: ColorSpace) -> Self {
        Self {
            width,
            height,
            color,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.color.channels()
    }
}

/// Owned pixel buffer of exactly `width * height * channels` bytes, row-major.
#[derive(Debug, Clone)]
pub struct Raster {
    pub spec: RasterSpec,
    pub pixels: Vec<u8>,
}

impl Raster {
    /// Returns `None` when the buffer length does not match `spec`.
    pub fn new(spec: RasterSpec, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != spec.byte_len() || pixels.is_empty() {
            return None;
        }
        Some(Self { spec, pixels })
    }

    pub fn width(&self) -> usize {
        self.spec.width as usize
    }

    pub fn height(&self) -> usize {
        self.spec.height as usize
    }
}

/// Immutable description of one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    /// Seconds since the Unix epoch, 0 when unavailable.
    pub modified: i64,
    pub content_id: ContentId,
}

/// A directed similarity discovered while linking `original` against the index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    pub original: ContentId,
    pub duplicate: ContentId,
    pub score: f64,
}

/// A final set of paths believed to be duplicates of one another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCluster {
    pub key: ContentId,
    pub paths: Vec<PathBuf>,
}
