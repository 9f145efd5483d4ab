mod common;

use std::sync::Arc;

use songmatch::config::EngineConfig;
use songmatch::error::EngineError;
use songmatch::fingerprint::HashMode;
use songmatch::library::{Library, StoreOutcome};
use songmatch::matcher::CancellationToken;
use songmatch::models::{InputSource, MatchOutcome, PcmAudio, PcmFormat, SongId};
use songmatch::storage::{HashIndex, MemoryIndex, SqliteIndex};

use common::{
    add_noise, render, reroll_bands, score, write_standard_raw, write_standard_wav, WINDOW,
};

// frame offset whose keypoints span exactly one store-mode anchor per band
const EXCERPT_FRAME: usize = 57;

fn mono(samples: Vec<i16>) -> PcmAudio {
    PcmAudio {
        format: PcmFormat::CAPTURE,
        samples,
    }
}

fn library_with(index: Arc<dyn HashIndex>) -> Library {
    Library::new(&EngineConfig::default(), index).unwrap()
}

fn store(library: &Library, title: &str, samples: Vec<i16>) -> SongId {
    match library.store_samples(title, mono(samples)).unwrap() {
        StoreOutcome::Stored { song, hashes } => {
            assert!(hashes > 0, "{title} produced no hashes");
            song
        }
        other => panic!("expected {title} to be stored, got {other:?}"),
    }
}

fn search(library: &Library, samples: Vec<i16>, source: InputSource) -> MatchOutcome {
    library
        .search_samples(mono(samples), source, &CancellationToken::new())
        .unwrap()
}

#[test]
fn stored_file_matches_itself() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track-A.wav");
    write_standard_wav(&path, &render(&score(1, 80)));

    let library = library_with(Arc::new(MemoryIndex::new()));
    let outcome = library.store_song("track-A", &path).unwrap();
    let StoreOutcome::Stored { song, hashes } = outcome else {
        panic!("expected a fresh store, got {outcome:?}");
    };
    assert!(hashes > 0);

    let found = library.search_file(&path).unwrap();
    assert_eq!(found.song(), Some(song));
    let MatchOutcome::Matched { votes, .. } = found else {
        unreachable!()
    };
    assert!(votes >= 5);
    assert_eq!(library.song_title(song).unwrap().as_deref(), Some("track-A"));
}

#[test]
fn headerless_recording_matches_like_its_wav() {
    let dir = tempfile::tempdir().unwrap();
    let track = render(&score(3, 80));
    let wav = dir.path().join("track-C.wav");
    let raw = dir.path().join("track-C.pcm");
    write_standard_wav(&wav, &track);
    write_standard_raw(&raw, &track);

    let library = library_with(Arc::new(MemoryIndex::new()));
    let StoreOutcome::Stored { song, .. } = library.store_song("track-C", &wav).unwrap() else {
        panic!("expected a fresh store");
    };
    let from_raw = library.search_raw_file(&raw).unwrap();
    assert_eq!(from_raw.song(), Some(song));
    assert_eq!(from_raw, library.search_file(&wav).unwrap());

    // a stray trailing byte is not a whole sample
    let mut bytes = std::fs::read(&raw).unwrap();
    bytes.push(0);
    std::fs::write(&raw, bytes).unwrap();
    let err = library.search_raw_file(&raw).unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
}

#[test]
fn silence_is_no_match() {
    let library = library_with(Arc::new(MemoryIndex::new()));
    store(&library, "track-A", render(&score(1, 60)));
    let silence = PcmAudio {
        format: PcmFormat::FILE_STANDARD,
        samples: vec![0; 44_100 * 2 * 5],
    };
    let outcome = library
        .search_samples(silence, InputSource::File, &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome, MatchOutcome::NoMatch);
}

#[test]
fn short_excerpt_finds_its_track() {
    let library = library_with(Arc::new(MemoryIndex::new()));
    store(&library, "track-A", render(&score(1, 120)));
    let track_b = render(&score(2, 120));
    let b = store(&library, "track-B", track_b.clone());

    let start = EXCERPT_FRAME * WINDOW;
    let excerpt = track_b[start..start + 2 * common::RATE].to_vec();
    let outcome = search(&library, excerpt, InputSource::File);
    assert_eq!(outcome.song(), Some(b));
}

#[test]
fn microphone_tolerates_more_damage() {
    let library = library_with(Arc::new(MemoryIndex::new()));
    store(&library, "track-A", render(&score(1, 120)));
    let track_b = score(2, 120);
    let b = store(&library, "track-B", render(&track_b));

    // only the two lowest bands still carry track B
    let mut damaged = track_b[EXCERPT_FRAME..EXCERPT_FRAME + 20].to_vec();
    reroll_bands(&mut damaged, 2..7, 99);
    let mut excerpt = render(&damaged);
    add_noise(&mut excerpt, 3, 7);

    let fingerprinter = library.fingerprinter();
    let hashes = fingerprinter.fingerprint_samples(&excerpt, HashMode::Query);
    let scorer = songmatch::matcher::MatchScorer::new(EngineConfig::default().tolerance);
    let mic_minimum = scorer.minimum_matches(hashes.len(), InputSource::Microphone);
    let file_minimum = scorer.minimum_matches(hashes.len(), InputSource::File);
    assert!(mic_minimum < file_minimum);

    let mic = search(&library, excerpt.clone(), InputSource::Microphone);
    assert_eq!(
        mic,
        MatchOutcome::Matched {
            song: b,
            votes: mic_minimum
        }
    );
    assert_eq!(search(&library, excerpt, InputSource::File), MatchOutcome::NoMatch);
}

#[test]
fn store_mode_is_sparser_than_query_mode() {
    let library = library_with(Arc::new(MemoryIndex::new()));
    let samples = render(&score(3, 50));
    let fingerprinter = library.fingerprinter();
    let store = fingerprinter.fingerprint_samples(&samples, HashMode::Store);
    let query = fingerprinter.fingerprint_samples(&samples, HashMode::Query);
    assert!(!store.is_empty());
    assert!(store.len() < query.len());
    assert_eq!(store, fingerprinter.fingerprint_samples(&samples, HashMode::Store));
}

#[test]
fn keypoints_are_the_rendered_tones() {
    let library = library_with(Arc::new(MemoryIndex::new()));
    let track = score(4, 12);
    let keypoints = library.fingerprinter().keypoints(&render(&track));
    for (band, points) in keypoints.bands.iter().enumerate() {
        let mut expected: Vec<(u32, u32)> = track
            .iter()
            .enumerate()
            .flat_map(|(frame, bins)| bins[band].iter().map(move |&bin| (frame as u32, bin as u32)))
            .collect();
        expected.sort();
        let found: Vec<(u32, u32)> = points.iter().map(|p| (p.time, p.frequency)).collect();
        assert_eq!(found, expected, "band {band}");
    }
}

#[test]
fn sqlite_library_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("songs.sqlite");
    let track = render(&score(5, 100));
    let song = {
        let library = library_with(Arc::new(SqliteIndex::open(&db).unwrap()));
        store(&library, "persisted", track.clone())
    };

    let library = library_with(Arc::new(SqliteIndex::open(&db).unwrap()));
    assert!(matches!(
        library.store_samples("persisted", mono(track.clone())).unwrap(),
        StoreOutcome::Skipped { .. }
    ));
    let start = EXCERPT_FRAME * WINDOW;
    let excerpt = track[start..start + 2 * common::RATE].to_vec();
    assert_eq!(search(&library, excerpt, InputSource::File).song(), Some(song));
}

#[test]
fn query_files_must_be_standard_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mono.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..44_100 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();

    let library = library_with(Arc::new(MemoryIndex::new()));
    let err = library.search_file(&path).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedFormat(_)));
}
