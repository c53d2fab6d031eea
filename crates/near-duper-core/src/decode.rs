use crate::cancel::CancelToken;
use crate::error::Error;
use crate::model::{ColorSpace, Raster, RasterSpec};
use image::imageops::FilterType;
use image::ImageReader;
use std::fs::File;
use std::io;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::trace;

/// Decode an image and resample it to exactly the raster `spec` requires.
pub fn decode_raster(path: &Path, spec: RasterSpec) -> Result<Raster, Error> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let resized = img.resize_exact(spec.width, spec.height, FilterType::Triangle);
    let pixels = match spec.color {
        ColorSpace::Gray => resized.to_luma8().into_raw(),
        ColorSpace::Rgb => resized.to_rgb8().into_raw(),
    };
    Raster::new(spec, pixels).ok_or_else(|| Error::Unsupported(path.to_path_buf()))
}

/// Read only the image header.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32), Error> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.into_dimensions()?)
}

/// An opened audio container with a decoder ready for its default track.
pub struct AudioSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    n_frames: Option<u64>,
}

impl AudioSource {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| Error::Audio(format!("no audio track in {}", path.display())))?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::Audio(format!("unknown sample rate in {}", path.display())))?;
        let n_frames = track.codec_params.n_frames;
        let track_id = track.id;
        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            n_frames,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Track duration from stream metadata, without decoding.
    pub fn duration_secs(&self) -> Option<f64> {
        self.n_frames
            .map(|n| n as f64 / self.sample_rate.max(1) as f64)
    }

    /// Decode the whole track, mix to mono, resample to `target_rate` and hand
    /// chunks to `sink`. Stops early when `sink` returns `false`.
    pub fn stream_mono(
        mut self,
        target_rate: u32,
        cancel: &CancelToken,
        mut sink: impl FnMut(Vec<f32>) -> bool,
    ) -> Result<(), Error> {
        let mut decimator = Decimator::new(self.sample_rate, target_rate);
        loop {
            cancel.check()?;
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    trace!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);

            let mut out = Vec::with_capacity(buf.samples().len() / channels + 1);
            for frame in buf.samples().chunks(channels) {
                let mono = frame.iter().sum::<f32>() / channels as f32;
                decimator.push(mono, &mut out);
            }
            if !out.is_empty() && !sink(out) {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Streaming box-filter resampler: averages every source sample that falls
/// into one target period.
#[derive(Debug, Clone)]
pub struct Decimator {
    step: f64,
    pos: f64,
    sum: f32,
    count: u32,
}

impl Decimator {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            step: target_rate as f64 / source_rate.max(1) as f64,
            pos: 0.0,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn push(&mut self, sample: f32, out: &mut Vec<f32>) {
        self.sum += sample;
        self.count += 1;
        self.pos += self.step;
        if self.pos < 1.0 {
            return;
        }
        let avg = self.sum / self.count as f32;
        while self.pos >= 1.0 {
            out.push(avg);
            self.pos -= 1.0;
        }
        self.sum = 0.0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_decimator_halves_rate() {
        let mut d = Decimator::new(11024, 5512);
        let mut out = Vec::new();
        for i in 0..100 {
            d.push(i as f32, &mut out);
        }
        assert_eq!(out.len(), 50);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], 2.5);
    }

    #[test]
    fn test_decimator_upsamples_by_holding() {
        let mut d = Decimator::new(2756, 5512);
        let mut out = Vec::new();
        d.push(1.0, &mut out);
        d.push(2.0, &mut out);
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_decode_raster_exact_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.png");
        image::RgbImage::from_fn(40, 30, |x, y| image::Rgb([x as u8 * 5, y as u8 * 7, 90]))
            .save(&path)
            .unwrap();
        let spec = RasterSpec::new(9, 8, ColorSpace::Gray);
        let raster = decode_raster(&path, spec).unwrap();
        assert_eq!(raster.pixels.len(), 72);
        assert_eq!(image_dimensions(&path).unwrap(), (40, 30));
        let rgb = decode_raster(&path, RasterSpec::new(128, 128, ColorSpace::Rgb)).unwrap();
        assert_eq!(rgb.pixels.len(), 128 * 128 * 3);
    }

    #[test]
    fn test_decode_raster_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really").unwrap();
        assert!(decode_raster(&path, RasterSpec::new(9, 8, ColorSpace::Gray)).is_err());
    }
}
