use crate::error::EngineError;
use crate::fingerprint::{AudioFingerprinter, HashMode};
use crate::models::{PcmAudio, QueryFingerprint, SongFingerprint, SongMetadata};

/// Store-mode fingerprint of a reference track, with its metadata.
pub fn generate_song_fingerprint(
    fingerprinter: &AudioFingerprinter,
    audio: PcmAudio,
) -> Result<SongFingerprint, EngineError> {
    let duration = audio.duration_secs();
    let sample_rate = audio.format.sample_rate;
    let hashes = fingerprinter.generate_fingerprint(audio, HashMode::Store)?;
    let hash_count = hashes.len();

    Ok(SongFingerprint {
        hashes,
        metadata: SongMetadata {
            duration,
            sample_rate,
            hash_count,
        },
    })
}

/// Query-mode fingerprint of a clip.
pub fn generate_query_fingerprint(
    fingerprinter: &AudioFingerprinter,
    audio: PcmAudio,
) -> Result<QueryFingerprint, EngineError> {
    let duration = audio.duration_secs();
    let hashes = fingerprinter.generate_fingerprint(audio, HashMode::Query)?;

    Ok(QueryFingerprint { hashes, duration })
}

/// Serializes the store-mode fingerprint of `audio` as pretty JSON.
pub fn fingerprint_json(
    fingerprinter: &AudioFingerprinter,
    audio: PcmAudio,
) -> Result<String, EngineError> {
    let fingerprint = generate_song_fingerprint(fingerprinter, audio)?;
    Ok(serde_json::to_string_pretty(&fingerprint)?)
}
