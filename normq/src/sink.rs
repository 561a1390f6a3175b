//! Reply handling and rendering.
//!
//! [`ResultSink::on_reply`] is the single entry point for every reply the
//! broker delivers. It settles the in-flight count first, so a reply is
//! always accounted for even when its body turns out to be garbage, then
//! decodes and renders it while holding the display lock.
//!
//! The sink is `Send + Sync`: counters and the stop flag are atomics and all
//! writer state sits behind a mutex, so replies may be delivered from a
//! thread other than the one submitting requests.
use colored::Colorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::DisplayMode;
use crate::dispatcher::InFlight;
use crate::errors::ClientResult;
use crate::protocol::ResultMessage;
use crate::scanner::INVALID_FILE_WARNING;

/// Replies containing this marker continue the current line
const UNVALID_SENTINEL: &str = "Unvalid";

/// Prefix of the "currently reporting" line
const REPORT_LABEL: &str = "Norme: ";

struct DisplayState {
    out: Box<dyn Write + Send>,
    mode: DisplayMode,
    cwd: PathBuf,
}

/// Receives replies, renders them and tracks the run-level stop signal
pub struct ResultSink {
    state: Mutex<DisplayState>,
    in_flight: InFlight,
    replies: AtomicUsize,
    stop: AtomicBool,
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("in_flight", &self.in_flight.get())
            .field("replies", &self.replies_handled())
            .field("stop", &self.stop_requested())
            .finish()
    }
}

impl ResultSink {
    pub fn new(out: Box<dyn Write + Send>, mode: DisplayMode, cwd: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(DisplayState {
                out,
                mode,
                cwd: cwd.into(),
            }),
            in_flight: InFlight::default(),
            replies: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        }
    }

    /// Sink writing to standard output, relative to the process working directory
    pub fn stdout(mode: DisplayMode) -> ClientResult<Self> {
        Ok(Self::new(
            Box::new(io::stdout()),
            mode,
            std::env::current_dir()?,
        ))
    }

    /// Counter shared with the dispatcher
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn replies_handled(&self) -> usize {
        self.replies.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Handles one delivered reply body
    pub fn on_reply(&self, raw: &[u8]) -> ClientResult<()> {
        if !self.in_flight.decrement() {
            warn!("Reply received while no request was in flight");
        }
        self.replies.fetch_add(1, Ordering::SeqCst);

        let message = {
            let mut state = self.lock_state();
            let message = ResultMessage::decode(raw)?;
            state.render(&message)?;
            message
        };

        if message.is_stop() {
            info!("Server requested stop; remaining replies will be drained");
            self.stop.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Reports an input path that cannot be checked
    pub fn emit_warning(&self, path: &Path) -> ClientResult<()> {
        debug!("Reporting invalid file: {}", path.display());
        let message = ResultMessage::for_file(path.to_string_lossy(), INVALID_FILE_WARNING);
        self.lock_state().render(&message)?;
        Ok(())
    }

    /// Writes a complete local line
    pub fn line(&self, text: &str) -> ClientResult<()> {
        let mut state = self.lock_state();
        writeln!(state.out, "{text}")?;
        state.out.flush()?;
        Ok(())
    }

    /// Writes a label the next reply completes; in plain mode it is a full line
    pub fn label(&self, text: &str) -> ClientResult<()> {
        let mut state = self.lock_state();
        match state.mode {
            DisplayMode::Color => write!(state.out, "{text}")?,
            DisplayMode::Plain => writeln!(state.out, "{text}")?,
        }
        state.out.flush()?;
        Ok(())
    }

    /// Closes the reporting line at the end of a run
    pub fn finish(&self) -> ClientResult<()> {
        let mut state = self.lock_state();
        if state.mode == DisplayMode::Color {
            writeln!(state.out)?;
        }
        state.out.flush()?;
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplayState {
    fn render(&mut self, message: &ResultMessage) -> io::Result<()> {
        if let Some(filename) = &message.filename {
            let shown = relative_to(&self.cwd, filename);
            match self.mode {
                DisplayMode::Color => {
                    write!(self.out, "\r\x1b[K{}", format!("{REPORT_LABEL}{shown}").bold())?
                }
                DisplayMode::Plain => writeln!(self.out, "{REPORT_LABEL}{shown}")?,
            }
        }

        if let Some(display) = message.display.as_deref().filter(|d| !d.is_empty()) {
            match self.mode {
                DisplayMode::Color => {
                    if !display.contains(UNVALID_SENTINEL) && message.stop.is_none() {
                        writeln!(self.out)?;
                    }
                    match labeled_list(message, display) {
                        Some((header, tokens)) => {
                            writeln!(self.out, "{}", header.bold())?;
                            for token in tokens {
                                writeln!(self.out, "  - {token}")?;
                            }
                        }
                        None => writeln!(self.out, "{display}")?,
                    }
                }
                DisplayMode::Plain => writeln!(self.out, "{display}")?,
            }
        }

        self.out.flush()
    }
}

/// Strips a leading `cwd/` from `filename`; other paths are shown as given
pub fn relative_to<'a>(cwd: &Path, filename: &'a str) -> &'a str {
    let prefix = format!("{}{}", cwd.display(), MAIN_SEPARATOR);
    filename.strip_prefix(prefix.as_str()).unwrap_or(filename)
}

/// Splits `header\ntok tok ...` control payloads into a header and tokens
fn labeled_list<'a>(message: &ResultMessage, display: &'a str) -> Option<(&'a str, Vec<&'a str>)> {
    if message.filename.is_some() {
        return None;
    }
    let (header, rest) = display.trim_end().split_once('\n')?;
    if rest.contains('\n') {
        return None;
    }
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    Some((header, tokens))
}
