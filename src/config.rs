//! Engine tuning knobs.
//!
//! Everything here is loaded from an optional TOML file; missing keys fall
//! back to the defaults below, which are the values the engine was tuned with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{InputSource, NUM_BANDS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub preprocess: PreprocessConfig,
    pub spectrogram: SpectrogramConfig,
    pub tolerance: ToleranceConfig,
    pub capture: CaptureConfig,
    pub bands: Vec<BandConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            spectrogram: SpectrogramConfig::default(),
            tolerance: ToleranceConfig::default(),
            capture: CaptureConfig::default(),
            bands: default_bands(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    pub cutoff_hz: f64,
    pub filter_order: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            cutoff_hz: 4_000.0,
            filter_order: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub window_size: usize,
    pub sample_rate: u32,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            window_size: 1024,
            sample_rate: 11_025,
        }
    }
}

/// How many corroborating hashes a candidate needs before it is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToleranceConfig {
    pub file_factor: f64,
    pub mic_factor: f64,
    pub file_floor: usize,
    pub mic_floor: usize,
    pub ceiling: usize,
    pub mic_ceiling: usize,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            file_factor: 2.0,
            mic_factor: 4.0,
            file_floor: 5,
            mic_floor: 3,
            ceiling: 20,
            mic_ceiling: 10,
        }
    }
}

impl ToleranceConfig {
    pub fn factor(&self, source: InputSource) -> f64 {
        match source {
            InputSource::File => self.file_factor,
            InputSource::Microphone => self.mic_factor,
        }
    }

    /// Inclusive `(floor, ceiling)` for the given source.
    pub fn bounds(&self, source: InputSource) -> (usize, usize) {
        match source {
            InputSource::File => (self.file_floor, self.ceiling),
            InputSource::Microphone => (self.mic_floor, self.mic_ceiling.min(self.ceiling)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Length of one microphone extract.
    pub extract_ms: u64,
    /// Maximum number of extracts per session, also the worker pool size.
    pub listening_duration: usize,
    /// Length of the extracts a long query file is split into.
    pub file_extract_secs: u32,
    /// A trailing remainder shorter than this is folded into the previous extract.
    pub file_tail_merge_secs: u32,
    /// Time allowed after the last extract for outstanding matches to report.
    pub match_grace_ms: u64,
}

impl CaptureConfig {
    /// Wall-clock ceiling of one listening session.
    pub fn session_timeout(&self) -> std::time::Duration {
        let listening = self.extract_ms.saturating_mul(self.listening_duration as u64);
        std::time::Duration::from_millis(listening.saturating_add(self.match_grace_ms))
    }

    /// Samples in one extract at the capture rate.
    pub fn extract_samples(&self, sample_rate: u32) -> usize {
        (self.extract_ms * sample_rate as u64 / 1_000) as usize
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            extract_ms: 5_000,
            listening_duration: 5,
            file_extract_secs: 20,
            file_tail_merge_secs: 2,
            match_grace_ms: 10_000,
        }
    }
}

/// Peak-extraction parameters for one frequency band `[low_bin, high_bin)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BandConfig {
    pub low_bin: usize,
    pub high_bin: usize,
    pub block_size: usize,
    pub deviation_factor: f32,
    pub floor: f32,
}

impl BandConfig {
    pub const fn new(
        low_bin: usize,
        high_bin: usize,
        block_size: usize,
        deviation_factor: f32,
        floor: f32,
    ) -> Self {
        Self {
            low_bin,
            high_bin,
            block_size,
            deviation_factor,
            floor,
        }
    }
}

// Low bands are sparse and noisy: short blocks and a loose deviation.
// High bands are dense: longer blocks, a stricter deviation, a lower floor.
pub fn default_bands() -> Vec<BandConfig> {
    vec![
        BandConfig::new(0, 10, 3, 1.10, 0.55),
        BandConfig::new(10, 20, 4, 1.15, 0.55),
        BandConfig::new(20, 40, 5, 1.20, 0.50),
        BandConfig::new(40, 80, 6, 1.25, 0.50),
        BandConfig::new(80, 160, 8, 1.30, 0.50),
        BandConfig::new(160, 320, 10, 1.35, 0.45),
        BandConfig::new(320, 512, 12, 1.40, 0.45),
    ]
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let window = self.spectrogram.window_size;
        if window < 2 || !window.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "window_size must be a power of two, got {window}"
            )));
        }
        if self.spectrogram.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.preprocess.filter_order == 0 || self.preprocess.filter_order % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "filter_order must be even and positive, got {}",
                self.preprocess.filter_order
            )));
        }
        if self.preprocess.cutoff_hz <= 0.0 {
            return Err(ConfigError::Invalid("cutoff_hz must be positive".into()));
        }
        if self.bands.len() != NUM_BANDS {
            return Err(ConfigError::Invalid(format!(
                "expected {NUM_BANDS} bands, got {}",
                self.bands.len()
            )));
        }
        let bins = window / 2;
        let mut previous_high = 0;
        for (index, band) in self.bands.iter().enumerate() {
            if band.low_bin >= band.high_bin {
                return Err(ConfigError::Invalid(format!("band {index} is empty")));
            }
            if band.low_bin < previous_high {
                return Err(ConfigError::Invalid(format!(
                    "band {index} overlaps the previous band"
                )));
            }
            if band.high_bin > bins {
                return Err(ConfigError::Invalid(format!(
                    "band {index} ends at bin {} but the window only has {bins} bins",
                    band.high_bin
                )));
            }
            if band.block_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "band {index} has a zero block size"
                )));
            }
            previous_high = band.high_bin;
        }
        let tolerance = &self.tolerance;
        if tolerance.file_factor <= 0.0 || tolerance.mic_factor <= 0.0 {
            return Err(ConfigError::Invalid(
                "tolerance factors must be positive".into(),
            ));
        }
        if tolerance.file_floor > tolerance.ceiling || tolerance.mic_floor > tolerance.mic_ceiling
        {
            return Err(ConfigError::Invalid(
                "tolerance floors must not exceed their ceilings".into(),
            ));
        }
        if self.capture.listening_duration == 0 || self.capture.extract_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture needs at least one non-empty extract".into(),
            ));
        }
        if self.capture.file_extract_secs == 0 {
            return Err(ConfigError::Invalid(
                "file_extract_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
