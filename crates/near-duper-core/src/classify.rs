use crate::decode::{image_dimensions, AudioSource};
use crate::model::{FileType, SearchType};
use std::path::Path;
use tracing::trace;

/// One step of the classifier chain.
pub trait FileProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some` when the file is recognised and readable as this type.
    fn probe(&self, path: &Path) -> Option<FileType>;
}

/// Accepts files whose image header decodes to non-zero dimensions.
pub struct ImageProbe;

impl FileProbe for ImageProbe {
    fn name(&self) -> &'static str {
        "image"
    }

    fn probe(&self, path: &Path) -> Option<FileType> {
        match image_dimensions(path) {
            Ok((w, h)) if w > 0 && h > 0 => Some(FileType::Image),
            _ => None,
        }
    }
}

/// Accepts containers with a decodable default audio track.
pub struct AudioProbe;

impl FileProbe for AudioProbe {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn probe(&self, path: &Path) -> Option<FileType> {
        AudioSource::open(path).ok().map(|_| FileType::Audio)
    }
}

/// Ordered chain of probes; the first success wins.
pub struct Classifier {
    probes: Vec<Box<dyn FileProbe>>,
}

impl Classifier {
    pub fn new(probes: Vec<Box<dyn FileProbe>>) -> Self {
        Self { probes }
    }

    /// Chain suited to a search: only the probe of the type being searched.
    pub fn for_search(search: SearchType) -> Self {
        match search {
            SearchType::Image => Self::new(vec![Box::new(ImageProbe)]),
            SearchType::Audio => Self::new(vec![Box::new(AudioProbe)]),
            SearchType::ExactHash => Self::new(Vec::new()),
        }
    }

    pub fn classify(&self, path: &Path) -> FileType {
        for probe in &self.probes {
            if let Some(kind) = probe.probe(path) {
                trace!("{} classified as {:?} by {} probe", path.display(), kind, probe.name());
                return kind;
            }
        }
        FileType::Unsupported
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(vec![Box::new(ImageProbe), Box::new(AudioProbe)])
    }
}
