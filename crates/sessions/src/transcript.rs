//! Append-only JSONL transcripts.
//!
//! Each session gets a `{safeKey}.jsonl` file under the sessions
//! directory. Every message is appended as a single JSON line; appends
//! happen only under the session write lock. Readers tolerate partial
//! trailing lines (a crashed writer leaves at most one).

use std::path::{Path, PathBuf};

use ag_domain::error::{Error, Result};
use ag_domain::message::Message;
use ag_domain::trace::TraceEvent;

use crate::session_key::safe_file_key;

/// Writes and reads JSONL transcript files.
#[derive(Debug)]
pub struct TranscriptWriter {
    base_dir: PathBuf,
}

impl TranscriptWriter {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Transcript path for a session key.
    pub fn path_for(&self, session_key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", safe_file_key(session_key)))
    }

    /// Sibling lock path for a session key.
    pub fn lock_path_for(&self, session_key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl.lock", safe_file_key(session_key)))
    }

    /// Append messages to a session's transcript. The caller must hold
    /// the session write lock. I/O failures are fatal to the turn and
    /// leave the file as it was (single buffered write).
    pub fn append(&self, session_key: &str, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| Error::TranscriptWrite(e.to_string()))?;

        let mut buf = String::new();
        for msg in messages {
            let line = serde_json::to_string(msg)
                .map_err(|e| Error::TranscriptWrite(format!("serializing message: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        use std::io::Write;
        let path = self.path_for(session_key);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::TranscriptWrite(format!("{}: {e}", path.display())))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| Error::TranscriptWrite(format!("{}: {e}", path.display())))?;

        TraceEvent::TranscriptAppend {
            session_key: session_key.to_owned(),
            lines: messages.len(),
        }
        .emit();

        Ok(())
    }

    /// Read a transcript back. Malformed lines (including a partial
    /// trailing line from an interrupted write) are skipped.
    pub fn read(&self, session_key: &str) -> Result<Vec<Message>> {
        let path = self.path_for(session_key);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut messages = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(
                        session_key = session_key,
                        error = %e,
                        "skipping malformed transcript line"
                    );
                }
            }
        }
        Ok(messages)
    }

    /// Remove a session's transcript and any stale lock file.
    pub fn remove(&self, session_key: &str) -> Result<()> {
        let path = self.path_for(session_key);
        if path.exists() {
            std::fs::remove_file(&path).map_err(Error::Io)?;
        }
        let lock = self.lock_path_for(session_key);
        let _ = std::fs::remove_file(lock);
        Ok(())
    }
}
