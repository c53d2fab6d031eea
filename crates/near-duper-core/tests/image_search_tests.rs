use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use near_duper_core::codecs::ImageCodec;
use near_duper_core::decode::decode_raster;
use near_duper_core::signature::Signature;
use near_duper_core::{
    CancelToken, DuplicateEngine, EngineConfig, ImageAlgorithm, ProgressReporter, SearchType,
    SilentReporter,
};

/// Smooth landscape-like picture: overlapping low-frequency waves.
fn waves(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        let base = 128.0 + 60.0 * (fx / 23.0).sin() * (fy / 31.0).cos() + 40.0 * ((fx + 2.0 * fy) / 57.0).sin();
        let r = base.clamp(0.0, 255.0) as u8;
        let g = (base * 0.8 + 30.0).clamp(0.0, 255.0) as u8;
        let b = (255.0 - base).clamp(0.0, 255.0) as u8;
        Rgb([r, g, b])
    })
}

/// Unrelated picture: concentric rings off-centre.
fn rings(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - width as f32 * 0.3;
        let dy = y as f32 - height as f32 * 0.7;
        let v = 128.0 + 120.0 * ((dx * dx + dy * dy).sqrt() / 9.0).cos();
        let v = v.clamp(0.0, 255.0) as u8;
        Rgb([v, 255 - v, v / 2])
    })
}

fn save_jpeg(img: &RgbImage, path: &Path, quality: u8) {
    let mut file = fs::File::create(path).unwrap();
    JpegEncoder::new_with_quality(&mut file, quality)
        .encode_image(img)
        .unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    original: PathBuf,
    reencoded: PathBuf,
    copy: PathBuf,
    unrelated: PathBuf,
    corrupt: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let original = dir.path().join("original.png");
    let copy = dir.path().join("copy-of-original.png");
    let reencoded = dir.path().join("reencoded.jpg");
    let unrelated = dir.path().join("unrelated.png");
    let corrupt = dir.path().join("corrupt.png");

    let img = waves(320, 240);
    img.save(&original).unwrap();
    fs::copy(&original, &copy).unwrap();
    save_jpeg(&img, &reencoded, 90);
    rings(320, 240).save(&unrelated).unwrap();

    let bytes = fs::read(&original).unwrap();
    fs::write(&corrupt, &bytes[..16]).unwrap();

    Fixture {
        _dir: dir,
        original,
        reencoded,
        copy,
        unrelated,
        corrupt,
    }
}

fn phash_score(a: &Path, b: &Path) -> f64 {
    let alg = ImageAlgorithm::PerceptualHash;
    let codec = ImageCodec::new(alg);
    let sig = |p: &Path| -> Signature {
        codec
            .encode(&decode_raster(p, alg.raster_spec()).unwrap())
            .unwrap()
    };
    sig(a).similarity(&sig(b), alg.metric())
}

#[test]
fn test_jpeg_reencode_clusters_with_phash() {
    let f = fixture();
    let paths = vec![f.original.clone(), f.reencoded.clone(), f.unrelated.clone()];

    let engine = DuplicateEngine::new(EngineConfig::default());
    let report = engine
        .find_duplicates(
            SearchType::Image,
            &paths,
            Some(ImageAlgorithm::PerceptualHash),
            Some(0.9),
            &SilentReporter,
        )
        .unwrap();

    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert_eq!(report.clusters.len(), 1);
    let mut expected = vec![f.original.clone(), f.reencoded.clone()];
    expected.sort();
    assert_eq!(report.clusters[0].paths, expected);
}

/// Busy picture: the smooth waves under a deterministic speckle.
fn textured(width: u32, height: u32, seed: u32) -> RgbImage {
    let mut state = seed;
    let mut img = waves(width, height);
    for px in img.pixels_mut() {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        let noise = ((state >> 24) as i32 - 128) / 3;
        for c in px.0.iter_mut() {
            *c = (*c as i32 + noise).clamp(0, 255) as u8;
        }
    }
    img
}

/// First lossy variant of a textured picture whose pHash lands in
/// `[0.9, 0.99)` against the original: the JPEG quality drops and the left
/// half brightens until one to three bits flip.
fn near_but_not_identical(dir: &Path) -> (PathBuf, PathBuf) {
    let original = dir.join("textured.png");
    let base = textured(320, 240, 17);
    base.save(&original).unwrap();

    for gain in [0i32, 3, 6, 9, 12, 16, 20, 25, 30, 40] {
        for quality in [90u8, 75, 60, 45, 30] {
            let mut variant = base.clone();
            for (x, _, px) in variant.enumerate_pixels_mut() {
                if x < 160 {
                    for c in px.0.iter_mut() {
                        *c = (*c as i32 + gain).clamp(0, 255) as u8;
                    }
                }
            }
            let candidate = dir.join(format!("variant-{}-{}.jpg", gain, quality));
            save_jpeg(&variant, &candidate, quality);
            let score = phash_score(&original, &candidate);
            if (0.9..0.99).contains(&score) {
                return (original, candidate);
            }
            fs::remove_file(&candidate).unwrap();
        }
    }
    panic!("no variant scored between 0.9 and 0.99");
}

#[test]
fn test_strict_degree_separates_near_duplicates() {
    let dir = tempdir().unwrap();
    let (original, variant) = near_but_not_identical(dir.path());
    let paths = vec![original.clone(), variant.clone()];

    let engine = DuplicateEngine::new(EngineConfig::default());
    let search = |degree: f64| {
        engine
            .find_duplicates(
                SearchType::Image,
                &paths,
                Some(ImageAlgorithm::PerceptualHash),
                Some(degree),
                &SilentReporter,
            )
            .unwrap()
    };

    let loose = search(0.9);
    assert_eq!(loose.clusters.len(), 1);
    let mut expected = vec![original, variant];
    expected.sort();
    assert_eq!(loose.clusters[0].paths, expected);

    assert!(search(0.99).clusters.is_empty());
    assert!(search(1.0).clusters.is_empty());
}

#[test]
fn test_every_codec_groups_reencode_and_skips_unrelated() {
    let f = fixture();
    let paths = vec![f.original.clone(), f.reencoded.clone(), f.unrelated.clone()];
    for alg in ImageAlgorithm::ALL {
        let engine = DuplicateEngine::new(EngineConfig::default());
        let report = engine
            .find_duplicates(SearchType::Image, &paths, Some(alg), Some(0.85), &SilentReporter)
            .unwrap();
        assert_eq!(report.clusters.len(), 1, "{}: {:?}", alg, report.clusters);
        assert!(
            !report.clusters[0].paths.contains(&f.unrelated),
            "{} grouped the unrelated image",
            alg
        );
    }
}

#[test]
fn test_truncated_image_is_reported_not_clustered() {
    let f = fixture();
    let paths = vec![f.original.clone(), f.copy.clone(), f.corrupt.clone()];

    let engine = DuplicateEngine::new(EngineConfig::default());
    let report = engine
        .find_duplicates(SearchType::Image, &paths, None, None, &SilentReporter)
        .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, f.corrupt);
    assert_eq!(report.clusters.len(), 1);
    assert!(!report.clusters[0].paths.contains(&f.corrupt));
    // byte-identical copies share one group and need no similarity match
    assert_eq!(report.groups, 1);
    assert_eq!(report.clusters[0].paths.len(), 2);
}

/// Cancels the search as soon as linking starts.
struct CancelOnLink(CancelToken);

impl ProgressReporter for CancelOnLink {
    fn on_link_start(&self, _groups: usize) {
        self.0.cancel();
    }
}

#[test]
fn test_cancel_during_linking_returns_empty_report() {
    let f = fixture();
    // the truncated file would otherwise show up in `errors`
    let paths = vec![f.original.clone(), f.reencoded.clone(), f.copy.clone(), f.corrupt.clone()];

    let engine = DuplicateEngine::new(EngineConfig::default());
    let report = engine
        .find_duplicates(
            SearchType::Image,
            &paths,
            Some(ImageAlgorithm::PerceptualHash),
            Some(0.9),
            &CancelOnLink(engine.cancel_token()),
        )
        .unwrap();
    assert!(report.cancelled);
    assert!(report.clusters.is_empty());
    assert!(report.errors.is_empty());

    engine.cancel_token().reset();
    let report = engine
        .find_duplicates(SearchType::Image, &paths, None, Some(0.9), &SilentReporter)
        .unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.clusters.len(), 1);
    assert_eq!(report.errors.len(), 1);
}
