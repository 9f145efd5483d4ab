use std::time::Instant;

use tracing::debug;

use crate::config::PreprocessConfig;
use crate::error::{DecodeError, UnsupportedFormat};
use crate::filter::ButterworthLowPass;
use crate::models::{PcmAudio, PcmFormat};

/// Default rate the rest of the pipeline runs at.
pub const TARGET_SAMPLE_RATE: u32 = 11_025;

/// Ratio between file input and pipeline rate.
const DECIMATION: u32 = 4;

/// Turns decoded PCM into the mono 11,025 Hz buffer the spectrogram expects.
///
/// Order matters: the low-pass filter runs on the full-rate signal, then the
/// channels are collapsed and the result is decimated by four.
#[derive(Clone, Debug)]
pub struct SamplePreprocessor {
    config: PreprocessConfig,
    target_rate: u32,
}

impl SamplePreprocessor {
    /// `target_rate` is the rate the spectrogram runs at. Input is accepted
    /// either at that rate (mono) or at four times it.
    pub fn new(config: PreprocessConfig, target_rate: u32) -> Self {
        SamplePreprocessor {
            config,
            target_rate,
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn process(&self, audio: PcmAudio) -> Result<Vec<i16>, UnsupportedFormat> {
        let started = Instant::now();
        let format = audio.format;
        if is_pipeline_ready(&format, self.target_rate) {
            debug!(samples = audio.samples.len(), "input already at pipeline rate");
            return Ok(audio.samples);
        }
        let input_rate = self.target_rate * DECIMATION;
        if format.sample_rate != input_rate
            || format.bits_per_sample != 16
            || !format.signed
            || !(1..=2).contains(&format.channels)
        {
            return Err(UnsupportedFormat {
                found: format,
                expected: format!("16-bit signed PCM, mono or stereo, {input_rate} Hz"),
            });
        }

        let channels = format.channels as usize;
        let mut samples = audio.samples;
        self.low_pass(&mut samples, channels, format.sample_rate);
        let mono = if channels == 2 {
            to_mono(&samples)
        } else {
            samples
        };
        let out = down_sample(&mono);
        debug!(
            input_rate = format.sample_rate,
            channels,
            samples = out.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "preprocessed audio"
        );
        Ok(out)
    }

    fn low_pass(&self, interleaved: &mut [i16], channels: usize, sample_rate: u32) {
        let mut filter =
            ButterworthLowPass::new(self.config.filter_order, self.config.cutoff_hz, sample_rate);
        for channel in 0..channels {
            filter.reset();
            let mut lane: Vec<i16> = interleaved
                .iter()
                .skip(channel)
                .step_by(channels)
                .copied()
                .collect();
            filter.process_i16(&mut lane);
            for (slot, value) in interleaved
                .iter_mut()
                .skip(channel)
                .step_by(channels)
                .zip(lane)
            {
                *slot = value;
            }
        }
    }
}

fn is_pipeline_ready(format: &PcmFormat, target_rate: u32) -> bool {
    format.sample_rate == target_rate
        && format.channels == 1
        && format.bits_per_sample == 16
        && format.signed
}

/// Averages left/right pairs with integer arithmetic.
pub fn to_mono(stereo: &[i16]) -> Vec<i16> {
    stereo
        .chunks_exact(2)
        .map(|pair| average(pair[0], pair[1]))
        .collect()
}

/// Halves the rate twice by averaging adjacent pairs. Output length is `ceil(len / 4)`.
pub fn down_sample(samples: &[i16]) -> Vec<i16> {
    halve(&halve(samples))
}

/// Averages adjacent pairs; an odd trailing sample is kept as is.
pub fn halve(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks(2)
        .map(|chunk| match chunk {
            [a, b] => average(*a, *b),
            [a] => *a,
            _ => 0,
        })
        .collect()
}

fn average(a: i16, b: i16) -> i16 {
    ((a as i32 + b as i32) / 2) as i16
}

/// Unpacks a raw 16-bit PCM byte buffer honoring the declared byte order.
pub fn pcm_bytes_to_samples(bytes: &[u8], format: &PcmFormat) -> Result<Vec<i16>, DecodeError> {
    let width = format.bytes_per_sample();
    if width != 2 {
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            bytes_per_sample: width,
        });
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            bytes_per_sample: 2,
        });
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| {
            let raw = [pair[0], pair[1]];
            if format.big_endian {
                i16::from_be_bytes(raw)
            } else {
                i16::from_le_bytes(raw)
            }
        })
        .collect();
    Ok(samples)
}
