use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use songmatch::capture::{CaptureOrchestrator, CpalCaptureSource, SessionState};
use songmatch::config::EngineConfig;
use songmatch::core::fingerprint_json;
use songmatch::library::{Library, StoreOutcome};
use songmatch::models::{MatchOutcome, SongId};
use songmatch::storage::SqliteIndex;
use songmatch::{logging, AudioLoader};

const DEFAULT_DB: &str = "songmatch.sqlite";

#[derive(Parser, Debug)]
#[clap(name = "songmatch", about = "Identify recordings against a fingerprinted library")]
struct CliArgs {
    /// Path to the SQLite hash index.
    #[clap(long, default_value = DEFAULT_DB)]
    db: PathBuf,

    /// Engine configuration file (TOML). Built-in defaults when omitted.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "songmatch=trace". Falls back to RUST_LOG.
    #[clap(long)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fingerprint WAV files into the index, titled by file stem.
    Store {
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
    /// Identify a 44.1 kHz 16-bit stereo WAV file.
    Match {
        file: PathBuf,
        /// Read the file as headerless little-endian PCM in the same layout.
        #[clap(long)]
        raw: bool,
    },
    /// Identify what the default microphone hears.
    Listen,
    /// List the songs in the index.
    Songs,
    /// Print the store-mode fingerprint of a WAV file as JSON.
    Fingerprint { file: PathBuf },
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    if let Err(err) = logging::init(cli_args.log_level.as_deref()) {
        eprintln!("Logging disabled: {err}");
    }

    let config = match &cli_args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli_args.command {
        Command::Store { files } => store(&open_library(&cli_args.db, &config)?, &files),
        Command::Match { file, raw } => {
            let library = open_library(&cli_args.db, &config)?;
            let outcome = if raw {
                library.search_raw_file(&file)
            } else {
                library.search_file(&file)
            };
            let outcome = outcome.with_context(|| format!("Failed to match {}", file.display()))?;
            report(&library, outcome)
        }
        Command::Listen => listen(Arc::new(open_library(&cli_args.db, &config)?)),
        Command::Songs => {
            let library = open_library(&cli_args.db, &config)?;
            for song in library.index().songs()? {
                let status = if song.fingerprinted { "" } else { " (incomplete)" };
                println!("{:>5}  {}{}", song.id, song.title, status);
            }
            Ok(())
        }
        Command::Fingerprint { file } => {
            let library = Library::new(&config, Arc::new(SqliteIndex::open_in_memory()?))?;
            let audio = AudioLoader::load_from_wav(&file)?;
            println!("{}", fingerprint_json(library.fingerprinter(), audio)?);
            Ok(())
        }
    }
}

fn open_library(db: &Path, config: &EngineConfig) -> Result<Library> {
    let index = SqliteIndex::open(db)
        .with_context(|| format!("Failed to open hash index {}", db.display()))?;
    Ok(Library::new(config, Arc::new(index))?)
}

fn store(library: &Library, files: &[PathBuf]) -> Result<()> {
    for file in files {
        let title = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .with_context(|| format!("No file name in {}", file.display()))?;
        match library
            .store_song(&title, file)
            .with_context(|| format!("Failed to store {}", file.display()))?
        {
            StoreOutcome::Stored { song, hashes } => {
                println!("stored   {title} (id {song}, {hashes} hashes)")
            }
            StoreOutcome::Skipped { song } => println!("skipped  {title} (id {song})"),
        }
    }
    Ok(())
}

fn listen(library: Arc<Library>) -> Result<()> {
    let orchestrator = CaptureOrchestrator::new(Arc::clone(&library), Arc::new(CpalCaptureSource))?;
    info!("listening");
    let session = orchestrator.listen().context("Listening session failed")?;
    if session.state == SessionState::TimedOut {
        warn!(scored = session.extracts_scored, "session timed out");
    }
    report(&library, session.outcome)
}

fn report(library: &Library, outcome: MatchOutcome) -> Result<()> {
    match outcome {
        MatchOutcome::Matched { song, votes } => {
            println!("{} ({votes} matching hashes)", title_of(library, song)?);
        }
        MatchOutcome::NoMatch => println!("no match"),
    }
    Ok(())
}

fn title_of(library: &Library, song: SongId) -> Result<String> {
    Ok(library
        .song_title(song)?
        .unwrap_or_else(|| format!("song #{song}")))
}
