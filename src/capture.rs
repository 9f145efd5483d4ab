//! Microphone identification sessions.
//!
//! A session pulls fixed-length extracts from a capture device on its own
//! thread and hands each one to a worker pool for matching. The first
//! extract that matches ends the session; otherwise it ends when every
//! extract has been scored or the session ceiling elapses. Once the session
//! ends the capture thread is cancelled and `listen` returns without waiting
//! on a device read that is still blocked.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::library::Library;
use crate::matcher::CancellationToken;
use crate::models::{InputSource, MatchOutcome, PcmAudio, PcmFormat};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No audio input device found")]
    NoInputDevice,
    #[error("Failed to read supported input configs: {source}")]
    SupportedConfigs {
        source: cpal::SupportedStreamConfigsError,
    },
    #[error("Input device does not support {format}")]
    UnsupportedFormat { format: PcmFormat },
    #[error("Failed to open input stream: {source}")]
    OpenStream { source: cpal::BuildStreamError },
    #[error("Failed to start input stream: {source}")]
    StartStream { source: cpal::PlayStreamError },
    #[error("Input stream closed before the extract was complete")]
    Disconnected,
    #[error("Capture cancelled")]
    Cancelled,
    #[error("A listening session is already running")]
    SessionActive,
    #[error("Failed to start capture thread: {source}")]
    CaptureThread { source: std::io::Error },
    #[error("Failed to build matching pool: {source}")]
    WorkerPool { source: rayon::ThreadPoolBuildError },
    #[error("Capture thread panicked")]
    ThreadPanicked,
}

/// An open capture stream delivering mono 16-bit samples.
pub trait CaptureStream {
    /// Blocks until `samples` samples have been captured.
    ///
    /// Implementations should give up with [`CaptureError::Cancelled`] soon
    /// after `token` is cancelled; the stream is dropped once they return.
    fn read_extract(
        &mut self,
        samples: usize,
        token: &CancellationToken,
    ) -> Result<Vec<i16>, CaptureError>;
}

/// Opens capture streams. The stream itself lives on the capture thread.
pub trait CaptureSource: Send + Sync {
    /// Opens a stream in exactly `format`, or fails without capturing anything.
    fn open(&self, format: &PcmFormat) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// Captures from the default input device of the default cpal host.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpalCaptureSource;

// how often a blocked read looks at the cancellation token
const READ_POLL: Duration = Duration::from_millis(50);

struct CpalStream {
    // dropping the stream stops capture
    _stream: cpal::Stream,
    receiver: mpsc::Receiver<Vec<i16>>,
    pending: Vec<i16>,
}

impl CaptureSource for CpalCaptureSource {
    fn open(&self, format: &PcmFormat) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;
        let supported = device
            .supported_input_configs()
            .map_err(|source| CaptureError::SupportedConfigs { source })?
            .any(|range| {
                range.channels() == format.channels
                    && range.sample_format() == cpal::SampleFormat::I16
                    && range.min_sample_rate().0 <= format.sample_rate
                    && range.max_sample_rate().0 >= format.sample_rate
            });
        if !supported || format.bits_per_sample != 16 || !format.signed {
            return Err(CaptureError::UnsupportedFormat { format: *format });
        }

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let (sender, receiver) = mpsc::channel();
        let err_fn = move |err| {
            warn!("Audio input stream error: {err}");
        };
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let _ = sender.send(data.to_vec());
                },
                err_fn,
                None,
            )
            .map_err(|source| CaptureError::OpenStream { source })?;
        stream
            .play()
            .map_err(|source| CaptureError::StartStream { source })?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());
        info!(
            device = %name,
            sample_rate = format.sample_rate,
            "microphone open"
        );
        Ok(Box::new(CpalStream {
            _stream: stream,
            receiver,
            pending: Vec::new(),
        }))
    }
}

impl CaptureStream for CpalStream {
    fn read_extract(
        &mut self,
        samples: usize,
        token: &CancellationToken,
    ) -> Result<Vec<i16>, CaptureError> {
        while self.pending.len() < samples {
            if token.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }
            match self.receiver.recv_timeout(READ_POLL) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Disconnected),
            }
        }
        let rest = self.pending.split_off(samples);
        Ok(std::mem::replace(&mut self.pending, rest))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Dispatching,
    Completed,
    TimedOut,
}

impl SessionState {
    /// A session in this state still owns the device or the worker pool.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Capturing | SessionState::Dispatching)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Dispatching => "dispatching",
            SessionState::Completed => "completed",
            SessionState::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: MatchOutcome,
    pub state: SessionState,
    /// Extracts handed to the worker pool.
    pub extracts_captured: usize,
    /// Extracts whose match finished before the session ended.
    pub extracts_scored: usize,
}

enum SessionEvent {
    DeviceFailed(CaptureError),
    Extract { number: usize, samples: Vec<i16> },
    CaptureDone,
    Scored { number: usize, outcome: MatchOutcome },
}

/// Runs listening sessions against a [`Library`], one at a time.
///
/// [`listen`](Self::listen) fails with [`CaptureError::SessionActive`] while
/// another session on the same orchestrator is still running.
pub struct CaptureOrchestrator {
    library: Arc<Library>,
    source: Arc<dyn CaptureSource>,
    pool: rayon::ThreadPool,
    state: Mutex<SessionState>,
}

impl CaptureOrchestrator {
    pub fn new(library: Arc<Library>, source: Arc<dyn CaptureSource>) -> Result<Self, CaptureError> {
        let workers = library.capture_config().listening_duration.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("songmatch-match-{index}"))
            .build()
            .map_err(|source| CaptureError::WorkerPool { source })?;
        Ok(CaptureOrchestrator {
            library,
            source,
            pool,
            state: Mutex::new(SessionState::Idle),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Result<(), CaptureError> {
        let mut state = self.lock_state();
        if state.is_active() {
            return Err(CaptureError::SessionActive);
        }
        set_state(&mut state, SessionState::Capturing);
        Ok(())
    }

    fn transition(&self, next: SessionState) {
        set_state(&mut self.lock_state(), next);
    }

    /// Listens until a match is found, every extract is scored, or time runs out.
    ///
    /// Only a device that cannot be opened fails the session; an extract
    /// that fails to match counts as no match for that extract.
    pub fn listen(&self) -> Result<SessionReport, CaptureError> {
        self.begin()?;
        let result = self.run_session();
        match &result {
            Ok(report) => self.transition(report.state),
            Err(_) => self.transition(SessionState::Completed),
        }
        result
    }

    fn run_session(&self) -> Result<SessionReport, CaptureError> {
        let capture = self.library.capture_config();
        let format = self.library.capture_format();
        let extract_len = capture.extract_samples(format.sample_rate);
        let deadline = Instant::now() + capture.session_timeout();
        let token = CancellationToken::new();
        let (sender, events) = mpsc::channel();

        let capture_thread = self.spawn_capture(
            format,
            extract_len,
            capture.listening_duration,
            &token,
            &sender,
        )?;
        let result = self.collect(&events, &sender, &token, deadline);
        token.cancel();
        if capture_thread.is_finished() {
            if capture_thread.join().is_err() {
                return Err(CaptureError::ThreadPanicked);
            }
        } else {
            // a blocked read ends on its own once it sees the cancelled token
            debug!("capture thread still reading, not waiting for it");
        }
        result
    }

    fn spawn_capture(
        &self,
        format: PcmFormat,
        extract_len: usize,
        count: usize,
        token: &CancellationToken,
        sender: &Sender<SessionEvent>,
    ) -> Result<JoinHandle<()>, CaptureError> {
        let source = Arc::clone(&self.source);
        let token = token.clone();
        let sender = sender.clone();
        std::thread::Builder::new()
            .name("songmatch-capture".into())
            .spawn(move || {
                capture_extracts(source.as_ref(), &format, extract_len, count, &token, &sender)
            })
            .map_err(|source| CaptureError::CaptureThread { source })
    }

    fn collect(
        &self,
        events: &mpsc::Receiver<SessionEvent>,
        sender: &Sender<SessionEvent>,
        token: &CancellationToken,
        deadline: Instant,
    ) -> Result<SessionReport, CaptureError> {
        let mut report = SessionReport {
            outcome: MatchOutcome::NoMatch,
            state: SessionState::Completed,
            extracts_captured: 0,
            extracts_scored: 0,
        };
        let mut capture_done = false;

        loop {
            if capture_done && report.extracts_scored == report.extracts_captured {
                return Ok(report);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match events.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    warn!(
                        captured = report.extracts_captured,
                        scored = report.extracts_scored,
                        "session ceiling reached"
                    );
                    report.state = SessionState::TimedOut;
                    return Ok(report);
                }
            };
            match event {
                SessionEvent::DeviceFailed(err) => return Err(err),
                SessionEvent::Extract { number, samples } => {
                    report.extracts_captured += 1;
                    self.transition(SessionState::Dispatching);
                    self.dispatch(number, samples, sender.clone(), token.clone());
                }
                SessionEvent::CaptureDone => capture_done = true,
                SessionEvent::Scored { number, outcome } => {
                    report.extracts_scored += 1;
                    debug!(extract = number, matched = outcome.is_match(), "extract scored");
                    if outcome.is_match() {
                        report.outcome = outcome;
                        return Ok(report);
                    }
                }
            }
        }
    }

    fn dispatch(
        &self,
        number: usize,
        samples: Vec<i16>,
        sender: Sender<SessionEvent>,
        token: CancellationToken,
    ) {
        let library = Arc::clone(&self.library);
        self.pool.spawn(move || {
            if token.is_cancelled() {
                return;
            }
            let audio = PcmAudio {
                format: library.capture_format(),
                samples,
            };
            let outcome = library
                .search_samples(audio, InputSource::Microphone, &token)
                .unwrap_or_else(|err| {
                    warn!(extract = number, "extract failed to match: {err}");
                    MatchOutcome::NoMatch
                });
            let _ = sender.send(SessionEvent::Scored { number, outcome });
        });
    }
}

fn set_state(state: &mut SessionState, next: SessionState) {
    let from = *state;
    if from != next {
        info!(%from, to = %next, "session state");
        *state = next;
    }
}

fn capture_extracts(
    source: &dyn CaptureSource,
    format: &PcmFormat,
    extract_len: usize,
    count: usize,
    token: &CancellationToken,
    sender: &Sender<SessionEvent>,
) {
    let mut stream = match source.open(format) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = sender.send(SessionEvent::DeviceFailed(err));
            return;
        }
    };
    for number in 0..count {
        if token.is_cancelled() {
            break;
        }
        match stream.read_extract(extract_len, token) {
            Ok(samples) => {
                debug!(extract = number, samples = samples.len(), "captured extract");
                if sender.send(SessionEvent::Extract { number, samples }).is_err() {
                    break;
                }
            }
            Err(CaptureError::Cancelled) => {
                debug!(extract = number, "capture cancelled");
                break;
            }
            Err(err) => {
                warn!(extract = number, "capture stopped: {err}");
                break;
            }
        }
    }
    let _ = sender.send(SessionEvent::CaptureDone);
}
