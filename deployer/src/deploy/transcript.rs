//! Append-only deployment transcript

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};

/// Ordered, timestamped log of one deployment run.
///
/// Cloning yields another handle onto the same entries, so output streamed
/// from a blocking SSH thread lands in the same sequence as the orchestrator's
/// own entries. Entries are never edited or removed.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a progress entry
    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(target: "deployer::transcript", "{}", message);
        self.push(message);
    }

    /// Record a warning that does not change the outcome
    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(target: "deployer::transcript", "{}", message);
        self.push(&format!("WARNING: {}", message));
    }

    /// Record a failure
    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(target: "deployer::transcript", "{}", message);
        self.push(&format!("ERROR: {}", message));
    }

    /// Record remote command output, one entry per non-empty line
    pub fn output(&self, stream: &str, chunk: &str) {
        for line in chunk.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            self.push(&format!("[{}] {}", stream, line));
        }
    }

    /// Snapshot of every entry recorded so far
    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, message: &str) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.lock().push(format!("[{}] {}", timestamp, message));
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Longest run without a newline held back before it is recorded anyway
const MAX_PENDING_LINE: usize = 64 * 1024;

/// Reassembles one output stream into whole lines across read boundaries.
///
/// Reads can end mid-line or inside a multi-byte character; the incomplete
/// tail is kept until a later chunk completes it or the stream ends.
#[derive(Debug)]
pub struct OutputLines {
    stream: &'static str,
    pending: Vec<u8>,
}

impl OutputLines {
    pub fn new(stream: &'static str) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    /// Append a chunk, recording every line it completes
    pub fn feed(&mut self, chunk: &[u8], transcript: &Transcript) {
        self.pending.extend_from_slice(chunk);

        let cut = match self.pending.iter().rposition(|b| *b == b'\n') {
            Some(newline) => newline + 1,
            None if self.pending.len() > MAX_PENDING_LINE => utf8_boundary(&self.pending),
            None => return,
        };
        let rest = self.pending.split_off(cut);
        let complete = std::mem::replace(&mut self.pending, rest);
        transcript.output(self.stream, &String::from_utf8_lossy(&complete));
    }

    /// Record whatever is left once the stream has ended
    pub fn finish(&mut self, transcript: &Transcript) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            transcript.output(self.stream, &String::from_utf8_lossy(&rest));
        }
    }
}

/// Length of `bytes` without a trailing, incomplete UTF-8 sequence
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}
