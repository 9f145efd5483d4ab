use std::time::Instant;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{KeyPoint, KeyPointBands, PcmAudio};
use crate::peaks::PeakExtractor;
use crate::preprocess::SamplePreprocessor;
use crate::spectrogram::SpectrogramTransformer;

/// Points following the anchor in one target zone.
pub const ZONE_SIZE: usize = 15;
/// Stride between the three members hashed together.
pub const GROUP: usize = 5;
/// Members per hash.
pub const NUM_POINTS: usize = 3;
/// Hashes produced from one target zone.
pub const HASHES_PER_ZONE: usize = ZONE_SIZE / NUM_POINTS;

const FIELD_BITS: u32 = 9;
const FIELD_MASK: u64 = (1 << FIELD_BITS) - 1;

/// How densely target zones are sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashMode {
    /// Disjoint zones, for reference tracks going into the index.
    Store,
    /// A zone on every keypoint, for clips being identified.
    Query,
}

impl HashMode {
    fn step(self) -> usize {
        match self {
            HashMode::Store => ZONE_SIZE + 1,
            HashMode::Query => 1,
        }
    }
}

/// Turns keypoints into 64-bit hashes.
///
/// # Hash Structure (63 bits used, top bit clear)
/// - Anchor frequency bin (9 bits, bits 62..54)
/// - Three member frequency bins (9 bits each, bits 53..27)
/// - Three member time offsets from the anchor (9 bits each, bits 26..0)
///
/// Bins are below 512 for a 1024-sample window so frequencies are exact.
/// Time offsets saturate at 511 frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct FingerprintHasher;

impl FingerprintHasher {
    pub fn pack(anchor: KeyPoint, members: [KeyPoint; NUM_POINTS]) -> u64 {
        let field = |value: u32| (value as u64).min(FIELD_MASK);
        let mut hash = field(anchor.frequency);
        for member in &members {
            hash = (hash << FIELD_BITS) | field(member.frequency);
        }
        for member in &members {
            let delta = member.time.saturating_sub(anchor.time);
            hash = (hash << FIELD_BITS) | field(delta);
        }
        hash
    }

    /// Hashes one band's keypoints.
    ///
    /// A zone anchored at `i` needs the `ZONE_SIZE` points after it; shorter
    /// tails produce nothing.
    pub fn hash_band(points: &[KeyPoint], mode: HashMode) -> Vec<u64> {
        if points.len() <= ZONE_SIZE {
            return Vec::new();
        }
        let last_anchor = points.len() - ZONE_SIZE - 1;
        let mut hashes = Vec::new();
        for anchor_index in (0..=last_anchor).step_by(mode.step()) {
            let anchor = points[anchor_index];
            let zone = &points[anchor_index + 1..anchor_index + 1 + ZONE_SIZE];
            for j in 0..GROUP {
                let members = [zone[j], zone[j + GROUP], zone[j + 2 * GROUP]];
                hashes.push(Self::pack(anchor, members));
            }
        }
        hashes
    }

    pub fn hash_bands(keypoints: &KeyPointBands, mode: HashMode) -> Vec<u64> {
        let started = Instant::now();
        let hashes: Vec<u64> = keypoints
            .bands
            .iter()
            .flat_map(|band| Self::hash_band(band, mode))
            .collect();
        debug!(
            keypoints = keypoints.total(),
            hashes = hashes.len(),
            mode = ?mode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "hashed keypoints"
        );
        hashes
    }
}

/// Unpacks a hash into `(anchor_frequency, [frequencies], [time_offsets])`.
pub fn unpack(hash: u64) -> (u32, [u32; NUM_POINTS], [u32; NUM_POINTS]) {
    let field = |index: u32| ((hash >> (FIELD_BITS * (6 - index))) & FIELD_MASK) as u32;
    (
        field(0),
        [field(1), field(2), field(3)],
        [field(4), field(5), field(6)],
    )
}

/// Main fingerprinting engine.
///
/// Runs decoded audio through every stage from preprocessing to hashing.
/// Reference tracks and queries share the stages and only differ in [`HashMode`].
pub struct AudioFingerprinter {
    preprocessor: SamplePreprocessor,
    transformer: SpectrogramTransformer,
    extractor: PeakExtractor,
}

impl AudioFingerprinter {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|err| EngineError::invalid_config(err.to_string()))?;
        Ok(AudioFingerprinter {
            preprocessor: SamplePreprocessor::new(
                config.preprocess.clone(),
                config.spectrogram.sample_rate,
            ),
            transformer: SpectrogramTransformer::new(&config.spectrogram)?,
            extractor: PeakExtractor::new(&config.bands)?,
        })
    }

    /// Rate of the mono samples the spectrogram consumes.
    pub fn pipeline_rate(&self) -> u32 {
        self.preprocessor.target_rate()
    }

    /// Decoded audio to pipeline-rate mono samples.
    pub fn preprocess(&self, audio: PcmAudio) -> Result<Vec<i16>, EngineError> {
        Ok(self.preprocessor.process(audio)?)
    }

    /// Keypoints of mono samples already at pipeline rate.
    pub fn keypoints(&self, samples: &[i16]) -> KeyPointBands {
        let spectrogram = self.transformer.transform(samples);
        self.extractor.extract(&spectrogram)
    }

    /// Hashes of mono samples already at pipeline rate.
    pub fn fingerprint_samples(&self, samples: &[i16], mode: HashMode) -> Vec<u64> {
        let keypoints = self.keypoints(samples);
        FingerprintHasher::hash_bands(&keypoints, mode)
    }

    /// Generates the fingerprint of decoded audio.
    pub fn generate_fingerprint(
        &self,
        audio: PcmAudio,
        mode: HashMode,
    ) -> Result<Vec<u64>, EngineError> {
        let started = Instant::now();
        let seconds = audio.duration_secs();
        let samples = self.preprocess(audio)?;
        let hashes = self.fingerprint_samples(&samples, mode);
        info!(
            seconds,
            hashes = hashes.len(),
            mode = ?mode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated fingerprint"
        );
        Ok(hashes)
    }
}
