use std::time::Instant;

use tracing::debug;

use crate::config::BandConfig;
use crate::error::EngineError;
use crate::models::{KeyPoint, KeyPointBands, NUM_BANDS};
use crate::spectrogram::Spectrogram;

/// Picks locally dominant cells out of a spectrogram, band by band.
///
/// Each band is cut into blocks of `block_size` frames. Inside a block the
/// threshold is the mean of the strictly positive cells times the band's
/// deviation factor; a cell becomes a keypoint when it clears both that
/// threshold and the band's absolute floor.
#[derive(Clone, Debug)]
pub struct PeakExtractor {
    bands: [BandConfig; NUM_BANDS],
}

impl PeakExtractor {
    pub fn new(bands: &[BandConfig]) -> Result<Self, EngineError> {
        let bands: [BandConfig; NUM_BANDS] = bands.try_into().map_err(|_| {
            EngineError::invalid_config(format!(
                "expected {NUM_BANDS} bands, got {}",
                bands.len()
            ))
        })?;
        if let Some(band) = bands.iter().find(|b| b.block_size == 0) {
            return Err(EngineError::invalid_config(format!(
                "band [{}, {}) has a zero block size",
                band.low_bin, band.high_bin
            )));
        }
        Ok(PeakExtractor { bands })
    }

    pub fn bands(&self) -> &[BandConfig; NUM_BANDS] {
        &self.bands
    }

    pub fn extract(&self, spectrogram: &Spectrogram) -> KeyPointBands {
        let started = Instant::now();
        let mut keypoints = KeyPointBands::default();
        for (band, out) in self.bands.iter().zip(keypoints.bands.iter_mut()) {
            *out = extract_band(spectrogram, band);
        }
        debug!(
            frames = spectrogram.frames(),
            keypoints = keypoints.total(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted keypoints"
        );
        keypoints
    }
}

fn extract_band(spectrogram: &Spectrogram, band: &BandConfig) -> Vec<KeyPoint> {
    let high = band.high_bin.min(spectrogram.bins());
    let low = band.low_bin.min(high);
    let mut points = Vec::new();

    let mut block_start = 0;
    while block_start < spectrogram.frames() {
        let block_end = (block_start + band.block_size).min(spectrogram.frames());

        let (sum, count) = (block_start..block_end)
            .flat_map(move |frame| spectrogram.frame(frame)[low..high].iter())
            .filter(|&&value| value > 0.0)
            .fold((0.0f32, 0usize), |(sum, count), &value| (sum + value, count + 1));
        if count > 0 {
            let threshold = sum / count as f32 * band.deviation_factor;
            for frame in block_start..block_end {
                let row = spectrogram.frame(frame);
                for (bin, &value) in row.iter().enumerate().take(high).skip(low) {
                    if value > threshold && value > band.floor {
                        points.push(KeyPoint::new(frame as u32, bin as u32));
                    }
                }
            }
        }
        block_start = block_end;
    }
    points
}
