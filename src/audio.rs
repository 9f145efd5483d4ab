use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{DecodeError, EngineError, UnsupportedFormat};
use crate::models::{PcmAudio, PcmFormat};
use crate::preprocess::pcm_bytes_to_samples;

/// Handles loading of WAV files into interleaved 16-bit PCM.
pub struct AudioLoader;

impl AudioLoader {
    /// Reads a WAV file as interleaved 16-bit samples.
    ///
    /// Only integer 16-bit PCM is decoded; anything else is reported as an
    /// [`UnsupportedFormat`] carrying what was found.
    pub fn load_from_wav(path: &Path) -> Result<PcmAudio, EngineError> {
        let mut reader = hound::WavReader::open(path).map_err(|source| DecodeError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let spec = reader.spec();
        let format = format_of(&spec);
        debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "opened wav"
        );

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(UnsupportedFormat {
                found: format,
                expected: "16-bit integer PCM".into(),
            }
            .into());
        }

        let samples = reader
            .samples::<i16>()
            .collect::<Result<Vec<i16>, _>>()
            .map_err(|source| DecodeError::Sample { source })?;

        let audio = PcmAudio { format, samples };
        info!(
            path = %path.display(),
            samples = audio.samples.len(),
            seconds = audio.duration_secs(),
            "loaded audio"
        );
        Ok(audio)
    }

    /// Loads a file for querying, rejecting anything but the standard query format.
    pub fn load_query_file(path: &Path) -> Result<PcmAudio, EngineError> {
        let audio = Self::load_from_wav(path)?;
        check_query_format(&audio.format)?;
        Ok(audio)
    }

    /// Reads headerless PCM bytes laid out as `format` says.
    pub fn read_raw_pcm<R: Read>(mut reader: R, format: PcmFormat) -> Result<PcmAudio, DecodeError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let samples = pcm_bytes_to_samples(&bytes, &format)?;
        Ok(PcmAudio { format, samples })
    }

    /// Loads a headerless PCM file, e.g. one dumped straight from a capture device.
    pub fn load_raw_pcm(path: &Path, format: PcmFormat) -> Result<PcmAudio, EngineError> {
        let file = File::open(path).map_err(DecodeError::from)?;
        let audio = Self::read_raw_pcm(BufReader::new(file), format)?;
        info!(
            path = %path.display(),
            %format,
            samples = audio.samples.len(),
            seconds = audio.duration_secs(),
            "loaded raw pcm"
        );
        Ok(audio)
    }
}

fn format_of(spec: &hound::WavSpec) -> PcmFormat {
    PcmFormat {
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        channels: spec.channels,
        // 8-bit WAV is unsigned, float is reported as signed
        signed: spec.bits_per_sample > 8,
        big_endian: false,
    }
}

/// Query files must be exactly [`PcmFormat::FILE_STANDARD`].
pub fn check_query_format(format: &PcmFormat) -> Result<(), UnsupportedFormat> {
    if *format == PcmFormat::FILE_STANDARD {
        Ok(())
    } else {
        Err(UnsupportedFormat {
            found: *format,
            expected: PcmFormat::FILE_STANDARD.to_string(),
        })
    }
}

/// Splits a long recording into consecutive extracts of `extract_secs`.
///
/// A remainder shorter than `tail_merge_secs` is appended to the previous
/// extract instead of becoming an extract of its own.
pub fn split_extracts(audio: &PcmAudio, extract_secs: u32, tail_merge_secs: u32) -> Vec<PcmAudio> {
    let frame_width = audio.format.channels.max(1) as usize;
    let frames_per_sec = audio.format.sample_rate as usize;
    let extract_len = frames_per_sec * extract_secs.max(1) as usize * frame_width;
    let merge_len = frames_per_sec * tail_merge_secs as usize * frame_width;
    let total = audio.samples.len();

    let mut extracts = Vec::new();
    let mut start = 0;
    while start < total {
        let mut end = (start + extract_len).min(total);
        if total - end < merge_len {
            end = total;
        }
        extracts.push(PcmAudio {
            format: audio.format,
            samples: audio.samples[start..end].to_vec(),
        });
        start = end;
    }
    extracts
}
