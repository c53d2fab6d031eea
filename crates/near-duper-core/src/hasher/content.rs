use crate::cancel::CancelToken;
use crate::error::Error;
use crate::model::ContentId;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use twox_hash::XxHash64;

/// Streaming hash over a byte range. Full read buffers go through the wide
/// (possibly multi-threaded) path; the trailing partial buffer does not.
pub trait RangeHasher: Default {
    type Output;

    fn update_wide(&mut self, buf: &[u8]);
    fn update_tail(&mut self, buf: &[u8]);
    fn finish_range(self) -> Self::Output;
}

impl RangeHasher for blake3::Hasher {
    type Output = ContentId;

    fn update_wide(&mut self, buf: &[u8]) {
        self.update_rayon(buf);
    }

    fn update_tail(&mut self, buf: &[u8]) {
        self.update(buf);
    }

    fn finish_range(self) -> ContentId {
        ContentId::from(self.finalize())
    }
}

impl RangeHasher for XxHash64 {
    type Output = u64;

    fn update_wide(&mut self, buf: &[u8]) {
        self.write(buf);
    }

    fn update_tail(&mut self, buf: &[u8]) {
        self.write(buf);
    }

    fn finish_range(self) -> u64 {
        self.finish()
    }
}

/// Hash the first `limit` bytes of `path` (the whole file when `None`).
///
/// Zero-length files are an error, never a hash.
pub fn hash_range<H: RangeHasher>(
    path: &Path,
    limit: Option<u64>,
    buffer_size: usize,
    cancel: &CancelToken,
) -> Result<H::Output, Error> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Err(Error::EmptyFile(path.to_path_buf()));
    }

    let target = limit.map_or(len, |l| l.min(len));
    let buffer_size = buffer_size.max(1);
    let mut buffer = vec![0u8; buffer_size];
    let mut hasher = H::default();
    let mut remaining = target;

    while remaining > 0 {
        cancel.check()?;
        let want = (remaining as usize).min(buffer_size);
        let filled = fill(&mut file, &mut buffer[..want])?;
        if filled == 0 {
            break;
        }
        if filled == buffer_size {
            hasher.update_wide(&buffer[..filled]);
        } else {
            hasher.update_tail(&buffer[..filled]);
        }
        remaining -= filled as u64;
    }

    Ok(hasher.finish_range())
}

/// Content id over the full byte length of `path`.
pub fn content_id(path: &Path, buffer_size: usize, cancel: &CancelToken) -> Result<ContentId, Error> {
    hash_range::<blake3::Hasher>(path, None, buffer_size, cancel)
}

/// Bytes covered by the partial pass: `fraction` of `size`, rounded up to a
/// whole read buffer and capped at `size`.
pub fn partial_len(size: u64, fraction: f64, buffer_size: usize) -> u64 {
    let buffer = buffer_size.max(1) as u64;
    let wanted = (size as f64 * fraction.clamp(0.0, 1.0)).ceil() as u64;
    let rounded = wanted.div_ceil(buffer).max(1) * buffer;
    rounded.min(size)
}

fn fill(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
