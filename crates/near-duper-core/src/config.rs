use crate::codecs::audio::AudioProfile;
use crate::model::ImageAlgorithm;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

/// Tuning knobs of the detection engine. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Leading fraction of each file hashed by the exact matcher's first pass.
    pub partial_hash_fraction: f64,
    pub read_buffer_size: usize,
    pub image_algorithm: ImageAlgorithm,
    pub image_degree: f64,
    pub audio_degree: f64,
    /// Minimum number of aligned frame hits before an audio match is considered.
    pub threshold_votes: u32,
    /// Largest offset drift, in seconds, tolerated between aligned audio hits.
    pub max_time_gap_secs: f32,
    /// LSH bands two frames must share before they count as a hit.
    pub min_band_matches: u32,
    /// Largest shift, in seconds, between a track and a copy of it. Unset
    /// lets a copy start anywhere in the other file.
    pub max_offset_secs: Option<f32>,
    pub audio: AudioProfile,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partial_hash_fraction: 0.1,
            read_buffer_size: 64 * 1024,
            image_algorithm: ImageAlgorithm::PerceptualHash,
            image_degree: 0.9,
            audio_degree: 0.5,
            threshold_votes: 4,
            max_time_gap_secs: 2.0,
            min_band_matches: 2,
            max_offset_secs: None,
            audio: AudioProfile::default(),
        }
    }
}

/// Directory enumeration filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanFilters {
    pub min_size: u64,
    pub max_size: Option<u64>,
    /// Lower-case extensions without the dot. Empty means "any".
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub recurse: bool,
}

impl Default for ScanFilters {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: None,
            include_extensions: Vec::new(),
            exclude_extensions: Vec::new(),
            recurse: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub filters: ScanFilters,
    /// SQLite signature index. `None` keeps the index in memory for one run.
    pub index_path: Option<String>,
    pub engine: EngineConfig,
}

/// Reads the optional `Config` file then `NEAR_DUPER__*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("NEAR_DUPER").separator("__"))
        .build()?;
    let config = builder.try_deserialize::<AppConfig>()?;
    config.engine.audio.validate()?;
    Ok(config)
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|r| dir_path.starts_with(Path::new(r))) {
            continue;
        }
        result.retain(|r| !Path::new(r).starts_with(dir_path));
        result.push(dir);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/home/user/photos".to_string(),
            "/home/user/docs".to_string(),
            "/var/data".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/home/user/docs".to_string(),
            "/home/user/music".to_string(),
            "/home/user".to_string(),
            "/var/data".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&"/home/user".to_string()));
        assert!(result.contains(&"/var/data".to_string()));
    }

    #[test]
    fn test_engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.partial_hash_fraction, 0.1);
        assert_eq!(cfg.threshold_votes, 4);
        assert_eq!(cfg.audio.sample_rate, 5512);
        assert_eq!(cfg.image_algorithm, ImageAlgorithm::PerceptualHash);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let cfg: AppConfig = Config::builder()
            .set_override("engine.image_degree", 0.75)
            .and_then(|b| b.set_override("root_paths", vec!["/tmp/a"]))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .unwrap();
        assert_eq!(cfg.engine.image_degree, 0.75);
        assert_eq!(cfg.engine.audio_degree, 0.5);
        assert_eq!(cfg.root_paths, vec!["/tmp/a".to_string()]);
        assert!(cfg.filters.recurse);
        assert!(cfg.index_path.is_none());
    }
}
