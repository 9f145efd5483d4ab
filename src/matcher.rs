use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::ToleranceConfig;
use crate::error::IndexError;
use crate::fingerprint::{HASHES_PER_ZONE, NUM_POINTS};
use crate::models::{InputSource, MatchOutcome, SongId};
use crate::storage::HashIndex;

/// Shared flag telling in-flight matches that their session is over.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Votes for candidate songs and accepts one once enough hashes agree.
#[derive(Clone, Debug)]
pub struct MatchScorer {
    tolerance: ToleranceConfig,
}

impl MatchScorer {
    pub fn new(tolerance: ToleranceConfig) -> Self {
        MatchScorer { tolerance }
    }

    /// Votes a song needs before it is accepted for a query of `hash_count` hashes.
    pub fn minimum_matches(&self, hash_count: usize, source: InputSource) -> usize {
        let key_points = hash_count / HASHES_PER_ZONE;
        let raw = key_points as f64 / (NUM_POINTS as f64 * self.tolerance.factor(source));
        let (floor, ceiling) = self.tolerance.bounds(source);
        (raw as usize).clamp(floor, ceiling.max(floor))
    }

    /// Scores query hashes against the index.
    ///
    /// Lookups stop early once a song reaches the threshold or `token` is
    /// cancelled. A cancelled query reports the best candidate seen so far
    /// only if it already met the threshold.
    pub fn score(
        &self,
        hashes: &[u64],
        source: InputSource,
        index: &dyn HashIndex,
        token: &CancellationToken,
    ) -> Result<MatchOutcome, IndexError> {
        if hashes.is_empty() {
            debug!("empty query");
            return Ok(MatchOutcome::NoMatch);
        }
        let started = Instant::now();
        let minimum = self.minimum_matches(hashes.len(), source);
        let mut votes: HashMap<SongId, usize> = HashMap::new();
        // first-seen order, used to break ties
        let mut order: Vec<SongId> = Vec::new();

        for &hash in hashes {
            if token.is_cancelled() {
                debug!("scoring cancelled");
                break;
            }
            for song in index.lookup(hash)? {
                let count = votes.entry(song).or_insert_with(|| {
                    order.push(song);
                    0
                });
                *count += 1;
                if *count >= minimum {
                    info!(
                        song_id = %song,
                        votes = *count,
                        minimum,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "match found"
                    );
                    return Ok(MatchOutcome::Matched {
                        song,
                        votes: *count,
                    });
                }
            }
        }

        let best = order
            .iter()
            .map(|song| (*song, votes[song]))
            .fold(None, |best: Option<(SongId, usize)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            });
        debug!(
            hashes = hashes.len(),
            candidates = order.len(),
            minimum,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scored query"
        );
        Ok(match best {
            Some((song, count)) if count >= minimum => MatchOutcome::Matched { song, votes: count },
            _ => MatchOutcome::NoMatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryIndex;

    fn scorer() -> MatchScorer {
        MatchScorer::new(ToleranceConfig::default())
    }

    #[test]
    fn minimum_matches_is_clamped() {
        let scorer = scorer();
        assert_eq!(scorer.minimum_matches(0, InputSource::File), 5);
        assert_eq!(scorer.minimum_matches(0, InputSource::Microphone), 3);
        // 1000 keypoints / (3 * 2.0) = 166
        assert_eq!(scorer.minimum_matches(5_000, InputSource::File), 20);
        assert_eq!(scorer.minimum_matches(5_000, InputSource::Microphone), 10);
        // 60 keypoints / (3 * 2.0) = 10, 60 / (3 * 4.0) = 5
        assert_eq!(scorer.minimum_matches(300, InputSource::File), 10);
        assert_eq!(scorer.minimum_matches(300, InputSource::Microphone), 5);
    }

    #[test]
    fn microphone_needs_fewer_votes() {
        let scorer = scorer();
        for hashes in [0, 50, 300, 1_000, 100_000] {
            assert!(
                scorer.minimum_matches(hashes, InputSource::Microphone)
                    <= scorer.minimum_matches(hashes, InputSource::File)
            );
        }
    }

    #[test]
    fn empty_query_is_no_match() {
        let index = MemoryIndex::new();
        let outcome = scorer()
            .score(&[], InputSource::File, &index, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn stops_at_threshold() {
        let index = MemoryIndex::new();
        let a = index.register_song("a").unwrap();
        let b = index.register_song("b").unwrap();
        let hashes: Vec<u64> = (0..40).collect();
        index.put_all(a, &hashes).unwrap();
        index.put_all(b, &hashes[..3]).unwrap();
        let outcome = scorer()
            .score(&hashes, InputSource::File, &index, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Matched { song: a, votes: 5 });
    }

    #[test]
    fn below_threshold_is_no_match() {
        let index = MemoryIndex::new();
        let a = index.register_song("a").unwrap();
        index.put_all(a, &[1, 2, 3, 4]).unwrap();
        let outcome = scorer()
            .score(&[1, 2, 3, 4, 5, 6], InputSource::File, &index, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn cancelled_token_stops_lookups() {
        let index = MemoryIndex::new();
        let a = index.register_song("a").unwrap();
        let hashes: Vec<u64> = (0..40).collect();
        index.put_all(a, &hashes).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = scorer()
            .score(&hashes, InputSource::File, &index, &token)
            .unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn index_failure_is_an_error() {
        struct Broken;
        impl HashIndex for Broken {
            fn register_song(&self, _: &str) -> Result<SongId, IndexError> {
                Err(IndexError::Poisoned)
            }
            fn put(&self, _: u64, _: SongId) -> Result<(), IndexError> {
                Err(IndexError::Poisoned)
            }
            fn lookup(&self, _: u64) -> Result<Vec<SongId>, IndexError> {
                Err(IndexError::Unavailable {
                    detail: "offline".into(),
                })
            }
            fn song(&self, _: SongId) -> Result<Option<crate::models::Song>, IndexError> {
                Ok(None)
            }
            fn song_by_title(&self, _: &str) -> Result<Option<crate::models::Song>, IndexError> {
                Ok(None)
            }
            fn songs(&self) -> Result<Vec<crate::models::Song>, IndexError> {
                Ok(Vec::new())
            }
            fn mark_fingerprinted(&self, _: SongId) -> Result<(), IndexError> {
                Ok(())
            }
        }
        let result = scorer().score(&[1], InputSource::File, &Broken, &CancellationToken::new());
        assert!(matches!(result, Err(IndexError::Unavailable { .. })));
    }
}
