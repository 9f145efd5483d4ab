//! The reference library: fingerprinting tracks into an index and
//! identifying queries against it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::audio::{check_query_format, split_extracts, AudioLoader};
use crate::config::{CaptureConfig, EngineConfig};
use crate::error::{EngineError, IndexError};
use crate::fingerprint::{AudioFingerprinter, HashMode};
use crate::matcher::{CancellationToken, MatchScorer};
use crate::models::{InputSource, MatchOutcome, PcmAudio, PcmFormat, SongId};
use crate::storage::HashIndex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored { song: SongId, hashes: usize },
    /// The title was already fingerprinted; nothing was written.
    Skipped { song: SongId },
}

pub struct Library {
    fingerprinter: AudioFingerprinter,
    scorer: MatchScorer,
    index: Arc<dyn HashIndex>,
    capture: CaptureConfig,
    // registration, hash batch and completion flag of one song go in together
    write_lock: Mutex<()>,
}

impl Library {
    pub fn new(config: &EngineConfig, index: Arc<dyn HashIndex>) -> Result<Self, EngineError> {
        Ok(Library {
            fingerprinter: AudioFingerprinter::new(config)?,
            scorer: MatchScorer::new(config.tolerance.clone()),
            index,
            capture: config.capture.clone(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn fingerprinter(&self) -> &AudioFingerprinter {
        &self.fingerprinter
    }

    pub fn index(&self) -> &dyn HashIndex {
        self.index.as_ref()
    }

    pub fn capture_config(&self) -> &CaptureConfig {
        &self.capture
    }

    /// Microphone format: mono 16-bit at the pipeline rate.
    pub fn capture_format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.fingerprinter.pipeline_rate(),
            ..PcmFormat::CAPTURE
        }
    }

    pub fn store_song(&self, title: &str, path: &Path) -> Result<StoreOutcome, EngineError> {
        if let Some(song) = self.already_stored(title)? {
            return Ok(StoreOutcome::Skipped { song });
        }
        let audio = AudioLoader::load_from_wav(path)?;
        self.store_samples(title, audio)
    }

    pub fn store_samples(&self, title: &str, audio: PcmAudio) -> Result<StoreOutcome, EngineError> {
        if let Some(song) = self.already_stored(title)? {
            return Ok(StoreOutcome::Skipped { song });
        }
        let hashes = self.fingerprinter.generate_fingerprint(audio, HashMode::Store)?;

        let _guard = self.write_lock.lock().map_err(|_| IndexError::Poisoned)?;
        // another writer may have finished the same title meanwhile
        if let Some(song) = self.already_stored(title)? {
            return Ok(StoreOutcome::Skipped { song });
        }
        let song = self.index.register_song(title)?;
        self.index.put_all(song, &hashes)?;
        self.index.mark_fingerprinted(song)?;
        info!(song_id = %song, title, hashes = hashes.len(), "stored song");
        Ok(StoreOutcome::Stored {
            song,
            hashes: hashes.len(),
        })
    }

    fn already_stored(&self, title: &str) -> Result<Option<SongId>, IndexError> {
        let song = self.index.song_by_title(title)?;
        Ok(song.filter(|s| s.fingerprinted).map(|s| {
            debug!(song_id = %s.id, title, "already fingerprinted, skipping");
            s.id
        }))
    }

    pub fn search_samples(
        &self,
        audio: PcmAudio,
        source: InputSource,
        token: &CancellationToken,
    ) -> Result<MatchOutcome, EngineError> {
        let hashes = self.fingerprinter.generate_fingerprint(audio, HashMode::Query)?;
        Ok(self
            .scorer
            .score(&hashes, source, self.index.as_ref(), token)?)
    }

    /// Identifies a query WAV file.
    pub fn search_file(&self, path: &Path) -> Result<MatchOutcome, EngineError> {
        let audio = AudioLoader::load_query_file(path)?;
        self.search_recording(audio)
    }

    /// Identifies a headerless query file holding [`PcmFormat::FILE_STANDARD`] bytes.
    pub fn search_raw_file(&self, path: &Path) -> Result<MatchOutcome, EngineError> {
        let audio = AudioLoader::load_raw_pcm(path, PcmFormat::FILE_STANDARD)?;
        self.search_recording(audio)
    }

    /// Identifies a whole recording, trying its extracts in order until one matches.
    pub fn search_recording(&self, audio: PcmAudio) -> Result<MatchOutcome, EngineError> {
        check_query_format(&audio.format)?;
        let extracts = split_extracts(
            &audio,
            self.capture.file_extract_secs,
            self.capture.file_tail_merge_secs,
        );
        let token = CancellationToken::new();
        let count = extracts.len();
        for (number, extract) in extracts.into_iter().enumerate() {
            let outcome = self.search_samples(extract, InputSource::File, &token)?;
            debug!(extract = number + 1, count, matched = outcome.is_match(), "searched extract");
            if outcome.is_match() {
                return Ok(outcome);
            }
        }
        if count == 0 {
            warn!("query recording holds no audio");
        }
        Ok(MatchOutcome::NoMatch)
    }

    pub fn song_title(&self, id: SongId) -> Result<Option<String>, EngineError> {
        Ok(self.index.song(id)?.map(|song| song.title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryIndex;

    fn library() -> Library {
        Library::new(&EngineConfig::default(), Arc::new(MemoryIndex::new())).unwrap()
    }

    #[test]
    fn silence_stores_no_hashes_and_matches_nothing() {
        let library = library();
        let silence = PcmAudio {
            format: PcmFormat::FILE_STANDARD,
            samples: vec![0; 44_100 * 2 * 5],
        };
        let outcome = library.store_samples("quiet", silence.clone()).unwrap();
        assert!(matches!(outcome, StoreOutcome::Stored { hashes: 0, .. }));
        let found = library
            .search_samples(silence, InputSource::File, &CancellationToken::new())
            .unwrap();
        assert_eq!(found, MatchOutcome::NoMatch);
    }

    #[test]
    fn storing_twice_is_skipped() {
        let library = library();
        let audio = PcmAudio {
            format: PcmFormat::CAPTURE,
            samples: vec![0; 11_025],
        };
        let first = library.store_samples("again", audio.clone()).unwrap();
        let StoreOutcome::Stored { song, .. } = first else {
            panic!("expected a fresh store, got {first:?}");
        };
        assert_eq!(
            library.store_samples("again", audio).unwrap(),
            StoreOutcome::Skipped { song }
        );
        assert_eq!(library.song_title(song).unwrap().as_deref(), Some("again"));
    }

    #[test]
    fn unsupported_store_format_is_surfaced() {
        let library = library();
        let audio = PcmAudio {
            format: PcmFormat {
                sample_rate: 22_050,
                ..PcmFormat::FILE_STANDARD
            },
            samples: vec![0; 100],
        };
        let err = library.store_samples("odd", audio).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
        assert!(!library.index().is_registered("odd").unwrap());
    }
}
