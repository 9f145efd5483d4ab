pub mod audio;
pub mod capture;
pub mod config;
pub mod core;
pub mod error;
mod filter;
pub mod fingerprint;
pub mod library;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod peaks;
pub mod preprocess;
pub mod spectrogram;
pub mod storage;

pub use audio::AudioLoader;
pub use capture::{CaptureOrchestrator, CaptureSource, CaptureStream, CpalCaptureSource};
pub use config::EngineConfig;
pub use error::{EngineError, IndexError};
pub use fingerprint::{AudioFingerprinter, HashMode};
pub use library::{Library, StoreOutcome};
pub use matcher::{CancellationToken, MatchScorer};
pub use models::{InputSource, MatchOutcome, PcmAudio, PcmFormat, SongId};
pub use storage::{HashIndex, MemoryIndex, SqliteIndex};
