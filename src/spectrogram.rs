use std::sync::Arc;
use std::time::Instant;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::debug;

use crate::config::SpectrogramConfig;
use crate::error::EngineError;

/// Normalized magnitude grid, stored row-major as `[frame][bin]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrogram {
    frames: usize,
    bins: usize,
    cells: Vec<f32>,
}

impl Spectrogram {
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn get(&self, frame: usize, bin: usize) -> f32 {
        self.cells[frame * self.bins + bin]
    }

    /// All bins of one frame.
    pub fn frame(&self, frame: usize) -> &[f32] {
        let start = frame * self.bins;
        &self.cells[start..start + self.bins]
    }

    pub fn cells(&self) -> &[f32] {
        &self.cells
    }
}

/// Computes the log-power spectrogram of a mono buffer.
///
/// Windows do not overlap and no tapering is applied. Each cell holds
/// `10 * log10(max(|X|^2, 1))`, scaled so the grid spans `[0, 1]`.
pub struct SpectrogramTransformer {
    window_size: usize,
    fft: Arc<dyn Fft<f32>>,
}

impl SpectrogramTransformer {
    pub fn new(config: &SpectrogramConfig) -> Result<Self, EngineError> {
        let window_size = config.window_size;
        if window_size < 2 || !window_size.is_power_of_two() {
            return Err(EngineError::invalid_config(format!(
                "spectrogram window must be a power of two, got {window_size}"
            )));
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);
        Ok(SpectrogramTransformer { window_size, fft })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of frames produced for `sample_count` samples.
    pub fn frame_count(&self, sample_count: usize) -> usize {
        sample_count.saturating_sub(self.window_size) / self.window_size
    }

    pub fn transform(&self, samples: &[i16]) -> Spectrogram {
        let started = Instant::now();
        let window = self.window_size;
        let bins = window / 2;
        let frames = self.frame_count(samples.len());

        let mut cells = Vec::with_capacity(frames * bins);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); window];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;

        for chunk in samples.chunks_exact(window).take(frames) {
            for (slot, &sample) in buffer.iter_mut().zip(chunk) {
                *slot = Complex::new(sample as f32, 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            for value in &buffer[..bins] {
                let level = 10.0 * value.norm_sqr().max(1.0).log10();
                min = min.min(level);
                max = max.max(level);
                cells.push(level);
            }
        }

        let range = max - min;
        if range > 0.0 {
            for cell in &mut cells {
                *cell = (*cell - min) / range;
            }
        } else {
            cells.iter_mut().for_each(|cell| *cell = 0.0);
        }

        debug!(
            samples = samples.len(),
            frames,
            bins,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "computed spectrogram"
        );
        Spectrogram {
            frames,
            bins,
            cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> SpectrogramTransformer {
        SpectrogramTransformer::new(&SpectrogramConfig::default()).unwrap()
    }

    fn tone(bin: usize, len: usize) -> Vec<i16> {
        (0..len)
            .map(|n| {
                let phase = 2.0 * std::f64::consts::PI * bin as f64 * n as f64 / 1024.0;
                (8_000.0 * phase.sin()).round() as i16
            })
            .collect()
    }

    #[test]
    fn frame_count_follows_hop() {
        let transformer = transformer();
        assert_eq!(transformer.frame_count(0), 0);
        assert_eq!(transformer.frame_count(1023), 0);
        assert_eq!(transformer.frame_count(2048), 1);
        assert_eq!(transformer.frame_count(22_050), 20);
        let spectrogram = transformer.transform(&vec![0; 22_050]);
        assert_eq!(spectrogram.frames(), 20);
        assert_eq!(spectrogram.bins(), 512);
        assert_eq!(spectrogram.cells().len(), 20 * 512);
    }

    #[test]
    fn normalized_range_is_unit() {
        let spectrogram = transformer().transform(&tone(37, 1024 * 6));
        let min = spectrogram.cells().iter().cloned().fold(f32::INFINITY, f32::min);
        let max = spectrogram
            .cells()
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(min, 0.0);
        assert_eq!(max, 1.0);
        assert!(spectrogram.get(0, 37) > 0.99);
    }

    #[test]
    fn silence_is_all_zero_without_nan() {
        let spectrogram = transformer().transform(&vec![0; 1024 * 5]);
        assert!(!spectrogram.is_empty());
        assert!(spectrogram.cells().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn short_input_yields_empty_grid() {
        let spectrogram = transformer().transform(&[1, 2, 3]);
        assert!(spectrogram.is_empty());
        assert!(spectrogram.cells().is_empty());
    }

    #[test]
    fn rejects_non_power_of_two_window() {
        let config = SpectrogramConfig {
            window_size: 1000,
            ..SpectrogramConfig::default()
        };
        assert!(matches!(
            SpectrogramTransformer::new(&config),
            Err(EngineError::InvalidConfig { .. })
        ));
    }
}
