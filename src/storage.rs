use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::IndexError;
use crate::models::{Song, SongId};

/// Multimap from fingerprint hash to the songs containing it, plus the song catalogue.
///
/// Implementations must tolerate concurrent readers. Writers are serialized
/// by the caller when a song's registration and hash batch need to be atomic.
pub trait HashIndex: Send + Sync {
    /// Registers a title, returning the existing id if it is already known.
    fn register_song(&self, title: &str) -> Result<SongId, IndexError>;

    fn is_registered(&self, title: &str) -> Result<bool, IndexError> {
        Ok(self.song_by_title(title)?.is_some())
    }

    fn put(&self, hash: u64, song: SongId) -> Result<(), IndexError>;

    fn put_all(&self, song: SongId, hashes: &[u64]) -> Result<(), IndexError> {
        for &hash in hashes {
            self.put(hash, song)?;
        }
        Ok(())
    }

    /// Distinct songs containing `hash`, in insertion order.
    fn lookup(&self, hash: u64) -> Result<Vec<SongId>, IndexError>;

    fn song(&self, id: SongId) -> Result<Option<Song>, IndexError>;

    fn song_by_title(&self, title: &str) -> Result<Option<Song>, IndexError>;

    fn songs(&self) -> Result<Vec<Song>, IndexError>;

    fn mark_fingerprinted(&self, id: SongId) -> Result<(), IndexError>;
}

#[derive(Default)]
struct MemoryState {
    songs: Vec<Song>,
    by_title: HashMap<String, SongId>,
    hashes: HashMap<u64, Vec<SongId>>,
}

impl MemoryState {
    fn song_mut(&mut self, id: SongId) -> Option<&mut Song> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.songs.get_mut(index)
    }
}

/// In-process index. Ids are assigned from 1 in registration order.
#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<MemoryState>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, IndexError> {
        self.state.read().map_err(|_| IndexError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, IndexError> {
        self.state.write().map_err(|_| IndexError::Poisoned)
    }
}

impl HashIndex for MemoryIndex {
    fn register_song(&self, title: &str) -> Result<SongId, IndexError> {
        let mut state = self.write()?;
        if let Some(&id) = state.by_title.get(title) {
            return Ok(id);
        }
        let id = SongId(state.songs.len() as u32 + 1);
        state.songs.push(Song {
            id,
            title: title.to_string(),
            fingerprinted: false,
        });
        state.by_title.insert(title.to_string(), id);
        debug!(song_id = %id, title, "registered song");
        Ok(id)
    }

    fn put(&self, hash: u64, song: SongId) -> Result<(), IndexError> {
        let mut state = self.write()?;
        let songs = state.hashes.entry(hash).or_default();
        if !songs.contains(&song) {
            songs.push(song);
        }
        Ok(())
    }

    fn put_all(&self, song: SongId, hashes: &[u64]) -> Result<(), IndexError> {
        let mut state = self.write()?;
        for &hash in hashes {
            let songs = state.hashes.entry(hash).or_default();
            if !songs.contains(&song) {
                songs.push(song);
            }
        }
        Ok(())
    }

    fn lookup(&self, hash: u64) -> Result<Vec<SongId>, IndexError> {
        Ok(self.read()?.hashes.get(&hash).cloned().unwrap_or_default())
    }

    fn song(&self, id: SongId) -> Result<Option<Song>, IndexError> {
        let state = self.read()?;
        let index = (id.0 as usize).checked_sub(1);
        Ok(index.and_then(|i| state.songs.get(i)).cloned())
    }

    fn song_by_title(&self, title: &str) -> Result<Option<Song>, IndexError> {
        let state = self.read()?;
        Ok(state
            .by_title
            .get(title)
            .and_then(|id| state.songs.get(id.0 as usize - 1))
            .cloned())
    }

    fn songs(&self) -> Result<Vec<Song>, IndexError> {
        Ok(self.read()?.songs.clone())
    }

    fn mark_fingerprinted(&self, id: SongId) -> Result<(), IndexError> {
        let mut state = self.write()?;
        let song = state.song_mut(id).ok_or(IndexError::UnknownSong(id.0))?;
        song.fingerprinted = true;
        Ok(())
    }
}

struct Table {
    schema: &'static str,
    indices: &'static [&'static str],
}

const SONGS_TABLE: Table = Table {
    schema: "CREATE TABLE IF NOT EXISTS songs (id INTEGER PRIMARY KEY, title TEXT NOT NULL UNIQUE, fingerprinted INTEGER NOT NULL DEFAULT 0)",
    indices: &[],
};
const HASHES_TABLE: Table = Table {
    schema: "CREATE TABLE IF NOT EXISTS hashes (hash INTEGER NOT NULL, song_id INTEGER NOT NULL, CONSTRAINT song_id FOREIGN KEY (song_id) REFERENCES songs (id) ON DELETE CASCADE)",
    indices: &["CREATE INDEX IF NOT EXISTS hash_index ON hashes (hash)"],
};

const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed index. Hashes are stored as the bit-identical `i64`.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened hash index");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(IndexError::Unavailable {
                detail: format!("database schema version {version} is newer than {SCHEMA_VERSION}"),
            });
        }
        for table in [SONGS_TABLE, HASHES_TABLE] {
            conn.execute(table.schema, [])?;
            for index in table.indices {
                conn.execute(index, [])?;
            }
        }
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        Ok(SqliteIndex {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, IndexError> {
        self.conn.lock().map_err(|_| IndexError::Poisoned)
    }

    fn song_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Song> {
        Ok(Song {
            id: SongId(row.get(0)?),
            title: row.get(1)?,
            fingerprinted: row.get(2)?,
        })
    }
}

impl HashIndex for SqliteIndex {
    fn register_song(&self, title: &str) -> Result<SongId, IndexError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO songs (title) VALUES (?1) ON CONFLICT (title) DO NOTHING",
            params![title],
        )?;
        let id: u32 = conn.query_row(
            "SELECT id FROM songs WHERE title = ?1",
            params![title],
            |row| row.get(0),
        )?;
        debug!(song_id = id, title, "registered song");
        Ok(SongId(id))
    }

    fn put(&self, hash: u64, song: SongId) -> Result<(), IndexError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hashes (hash, song_id) VALUES (?1, ?2)",
            params![hash as i64, song.0],
        )?;
        Ok(())
    }

    fn put_all(&self, song: SongId, hashes: &[u64]) -> Result<(), IndexError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("INSERT INTO hashes (hash, song_id) VALUES (?1, ?2)")?;
            for &hash in hashes {
                stmt.execute(params![hash as i64, song.0])?;
            }
        }
        tx.commit()?;
        debug!(song_id = %song, hashes = hashes.len(), "inserted hash batch");
        Ok(())
    }

    fn lookup(&self, hash: u64) -> Result<Vec<SongId>, IndexError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT song_id FROM hashes WHERE hash = ?1 GROUP BY song_id ORDER BY MIN(rowid)",
        )?;
        let ids = stmt
            .query_map(params![hash as i64], |row| row.get::<_, u32>(0))?
            .map(|id| id.map(SongId))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn song(&self, id: SongId) -> Result<Option<Song>, IndexError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, title, fingerprinted FROM songs WHERE id = ?1",
                params![id.0],
                Self::song_row,
            )
            .optional()?)
    }

    fn song_by_title(&self, title: &str) -> Result<Option<Song>, IndexError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, title, fingerprinted FROM songs WHERE title = ?1",
                params![title],
                Self::song_row,
            )
            .optional()?)
    }

    fn songs(&self) -> Result<Vec<Song>, IndexError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, title, fingerprinted FROM songs ORDER BY id")?;
        let songs = stmt
            .query_map([], Self::song_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(songs)
    }

    fn mark_fingerprinted(&self, id: SongId) -> Result<(), IndexError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE songs SET fingerprinted = 1 WHERE id = ?1",
            params![id.0],
        )?;
        if updated == 0 {
            return Err(IndexError::UnknownSong(id.0));
        }
        Ok(())
    }
}
