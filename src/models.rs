use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of logarithmic frequency bands keypoints are extracted from.
pub const NUM_BANDS: usize = 7;

/// Identifier handed out by a [`crate::storage::HashIndex`] when a song is registered.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SongId(pub u32);

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference track known to the index
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    /// Flips to true once every hash of the song has been indexed
    pub fingerprinted: bool,
}

/// A spectrogram cell selected as significant.
///
/// `time` is the frame index and `frequency` the bin index of the cell.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyPoint {
    pub time: u32,
    pub frequency: u32,
}

impl KeyPoint {
    pub fn new(time: u32, frequency: u32) -> Self {
        KeyPoint { time, frequency }
    }
}

/// Keypoints grouped by frequency band, each band in non-decreasing time order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyPointBands {
    pub bands: [Vec<KeyPoint>; NUM_BANDS],
}

impl KeyPointBands {
    pub fn total(&self) -> usize {
        self.bands.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Describes raw PCM: rate, resolution, channel layout and byte order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub signed: bool,
    pub big_endian: bool,
}

impl PcmFormat {
    /// The only format accepted for file queries.
    pub const FILE_STANDARD: PcmFormat = PcmFormat {
        sample_rate: 44_100,
        bits_per_sample: 16,
        channels: 2,
        signed: true,
        big_endian: false,
    };

    /// The format requested from capture devices; already at pipeline rate.
    pub const CAPTURE: PcmFormat = PcmFormat {
        sample_rate: 11_025,
        bits_per_sample: 16,
        channels: 1,
        signed: true,
        big_endian: false,
    };

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PCM_{} {} Hz, {} bit, {} channel(s), {}",
            if self.signed { "SIGNED" } else { "UNSIGNED" },
            self.sample_rate,
            self.bits_per_sample,
            self.channels,
            if self.big_endian {
                "big-endian"
            } else {
                "little-endian"
            }
        )
    }
}

/// Interleaved 16-bit samples together with their format.
#[derive(Clone, Debug)]
pub struct PcmAudio {
    pub format: PcmFormat,
    pub samples: Vec<i16>,
}

impl PcmAudio {
    pub fn duration_secs(&self) -> f32 {
        let frames = self.samples.len() / self.format.channels.max(1) as usize;
        frames as f32 / self.format.sample_rate.max(1) as f32
    }
}

/// Where a query came from; microphone input is scored more leniently.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSource {
    File,
    Microphone,
}

/// Result of scoring a query against the index.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { song: SongId, votes: usize },
    NoMatch,
}

impl MatchOutcome {
    pub fn song(&self) -> Option<SongId> {
        match self {
            MatchOutcome::Matched { song, .. } => Some(*song),
            MatchOutcome::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Store-mode hashes of a reference track, as exported by `songmatch fingerprint`.
#[derive(Serialize, Deserialize, Debug)]
pub struct SongFingerprint {
    pub hashes: Vec<u64>,
    pub metadata: SongMetadata,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct QueryFingerprint {
    pub hashes: Vec<u64>,
    pub duration: f32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SongMetadata {
    pub duration: f32,
    pub sample_rate: u32,
    pub hash_count: usize,
}
