//! Synthetic reference tracks.
//!
//! A track is a score: for every 1024-sample frame, two tones per band at
//! exact bin frequencies. Exact bins do not leak into neighbouring bins, so
//! the keypoints of a rendered track are exactly its tone cells.

#![allow(dead_code)]

use std::f64::consts::PI;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const WINDOW: usize = 1024;
pub const RATE: usize = 11_025;
const AMPLITUDE: f64 = 2_000.0;

// band 0 skips the DC bin
const BAND_BINS: [(usize, usize); 7] = [
    (1, 10),
    (10, 20),
    (20, 40),
    (40, 80),
    (80, 160),
    (160, 320),
    (320, 512),
];

pub type Frame = [[usize; 2]; 7];

pub fn score(seed: u64, frames: usize) -> Vec<Frame> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..frames).map(|_| random_frame(&mut rng)).collect()
}

pub fn random_frame(rng: &mut StdRng) -> Frame {
    let mut frame = [[0; 2]; 7];
    for (band, &(low, high)) in frame.iter_mut().zip(BAND_BINS.iter()) {
        let first = rng.random_range(low..high);
        let mut second = rng.random_range(low..high);
        while second == first {
            second = rng.random_range(low..high);
        }
        *band = [first, second];
    }
    frame
}

/// Replaces the tones of `bands` in every frame with fresh random ones.
pub fn reroll_bands(score: &mut [Frame], bands: std::ops::Range<usize>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for frame in score.iter_mut() {
        let fresh = random_frame(&mut rng);
        for band in bands.clone() {
            frame[band] = fresh[band];
        }
    }
}

/// Renders a score at 11,025 Hz, followed by one silent frame so every
/// scored frame becomes a spectrogram frame.
pub fn render(score: &[Frame]) -> Vec<i16> {
    let mut samples = vec![0i16; (score.len() + 1) * WINDOW];
    for (index, frame) in score.iter().enumerate() {
        for n in 0..WINDOW {
            let value: f64 = frame
                .iter()
                .flatten()
                .map(|&bin| AMPLITUDE * (2.0 * PI * bin as f64 * n as f64 / WINDOW as f64).cos())
                .sum();
            samples[index * WINDOW + n] = value.round() as i16;
        }
    }
    samples
}

pub fn add_noise(samples: &mut [i16], amplitude: i16, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for sample in samples.iter_mut() {
        *sample = sample.saturating_add(rng.random_range(-amplitude..=amplitude));
    }
}

fn standard_frames(samples: &[i16]) -> impl Iterator<Item = i16> + '_ {
    samples
        .iter()
        .flat_map(|&sample| std::iter::repeat(sample).take(8))
}

/// Writes the same samples as [`write_standard_wav`] as headerless little-endian PCM.
pub fn write_standard_raw(path: &Path, samples: &[i16]) {
    let bytes: Vec<u8> = standard_frames(samples)
        .flat_map(|sample| sample.to_le_bytes())
        .collect();
    std::fs::write(path, bytes).unwrap();
}

/// Writes mono 11,025 Hz samples as a 44,100 Hz stereo WAV by repeating
/// every sample four times on both channels.
pub fn write_standard_wav(path: &Path, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for sample in standard_frames(samples) {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}
