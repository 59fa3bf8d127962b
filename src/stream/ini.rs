//! Settings document stream handler.
//!
//! Recognizes a configuration document by a fixed two-byte marker at the
//! start of the file and incrementally parses `[section]` / `key=value`
//! lines as sectors arrive, feeding each triple to a [`SettingsSink`].
//!
//! The format has no end marker, so `write` always answers
//! [`StreamResult::MaybeDone`] and leaves the completion decision to the
//! transfer tracker's idle heuristic. Parsing is deliberately lenient:
//! malformed lines are dropped, sector padding bytes are skipped, and the
//! document that was readable is what gets committed.

use super::{StreamHandler, StreamResult};
use crate::config::DriveConfig;
use crate::status::StreamError;
use std::sync::mpsc::Sender;
use tracing::{debug, error, trace, warn};

/// Longest line the parser will buffer. Longer lines are dropped whole so
/// a runaway document cannot grow parser state without bound.
const MAX_LINE_LEN: usize = 512;

/// Receiver of parsed settings. `commit` is where side effects land;
/// implementations that need heavy work (e.g. flash writes) should hand
/// the document off to a worker there rather than doing it inline.
pub trait SettingsSink: Send {
    /// A new document is starting; discard any uncommitted state.
    fn begin(&mut self);

    /// One parsed `section/key/value` triple, in document order.
    fn put(&mut self, section: &str, key: &str, value: &str);

    /// The document is complete; apply it.
    fn commit(&mut self) -> Result<(), StreamError>;
}

/// Parsed-settings message for queue-based sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    Begin,
    Entry {
        section: String,
        key: String,
        value: String,
    },
    Commit,
}

/// A channel sender is a sink: the receiving worker applies the document.
impl SettingsSink for Sender<SettingsEvent> {
    fn begin(&mut self) {
        let _ = self.send(SettingsEvent::Begin);
    }

    fn put(&mut self, section: &str, key: &str, value: &str) {
        let _ = self.send(SettingsEvent::Entry {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn commit(&mut self) -> Result<(), StreamError> {
        self.send(SettingsEvent::Commit)
            .map_err(|_| StreamError::Commit("settings worker is gone".into()))
    }
}

enum LineState {
    LineStart,
    Comment,
    Section,
    Key,
    Value,
}

struct Parser {
    state: LineState,
    section: String,
    scratch: String,
    key: String,
    value: String,
    overflowed: bool,
}

impl Parser {
    fn new() -> Self {
        Self {
            state: LineState::LineStart,
            section: String::new(),
            scratch: String::new(),
            key: String::new(),
            value: String::new(),
            overflowed: false,
        }
    }

    fn feed(&mut self, byte: u8, sink: &mut dyn SettingsSink) {
        // Sector tail padding; never meaningful in any line state.
        if byte == 0x00 || byte == 0xFF {
            return;
        }

        match self.state {
            LineState::LineStart => match byte {
                b'\r' | b'\n' | b' ' | b'\t' => {}
                b'[' => {
                    self.scratch.clear();
                    self.state = LineState::Section;
                }
                b'#' | b';' => self.state = LineState::Comment,
                _ => {
                    self.key.clear();
                    self.overflowed = false;
                    self.push(byte, |p| &mut p.key);
                    self.state = LineState::Key;
                }
            },
            LineState::Comment => {
                if byte == b'\n' {
                    self.state = LineState::LineStart;
                }
            }
            LineState::Section => match byte {
                b']' => {
                    std::mem::swap(&mut self.section, &mut self.scratch);
                    trace!(section = %self.section, "section header");
                    self.state = LineState::Comment;
                }
                b'\n' => {
                    warn!("unterminated section header, line dropped");
                    self.state = LineState::LineStart;
                }
                _ => self.push(byte, |p| &mut p.scratch),
            },
            LineState::Key => match byte {
                b'=' => {
                    self.value.clear();
                    self.state = LineState::Value;
                }
                b'\r' | b'\n' => {
                    // a line without '=' carries nothing
                    self.state = LineState::LineStart;
                }
                _ => self.push(byte, |p| &mut p.key),
            },
            LineState::Value => match byte {
                b'\r' | b'\n' => {
                    self.emit(sink);
                    self.state = LineState::LineStart;
                }
                _ => self.push(byte, |p| &mut p.value),
            },
        }
    }

    fn push(&mut self, byte: u8, buf: fn(&mut Self) -> &mut String) {
        if self.overflowed {
            return;
        }
        let buf = buf(self);
        if buf.len() >= MAX_LINE_LEN {
            warn!("line exceeds {MAX_LINE_LEN} bytes, dropping the rest");
            self.overflowed = true;
            return;
        }
        buf.push(byte as char);
    }

    fn emit(&mut self, sink: &mut dyn SettingsSink) {
        if self.overflowed {
            self.overflowed = false;
            return;
        }
        let key = self.key.trim();
        if key.is_empty() {
            return;
        }
        trace!(section = %self.section, key, "settings entry");
        sink.put(self.section.trim(), key, self.value.trim());
    }

    /// A document can end mid-line; whatever is pending still counts.
    fn finish(&mut self, sink: &mut dyn SettingsSink) {
        if let LineState::Value = self.state {
            self.emit(sink);
        }
        self.state = LineState::LineStart;
    }
}

/// The settings-document handler.
pub struct IniStreamHandler<S: SettingsSink> {
    marker: [u8; 2],
    extensions: Vec<String>,
    sink: S,
    parser: Option<Parser>,
}

impl<S: SettingsSink> IniStreamHandler<S> {
    pub fn new(marker: [u8; 2], extensions: Vec<String>, sink: S) -> Self {
        Self {
            marker,
            extensions,
            sink,
            parser: None,
        }
    }

    /// Build from [`DriveConfig`] marker/extension settings.
    pub fn from_config(config: &DriveConfig, sink: S) -> Self {
        Self::new(
            config.settings_marker,
            config.settings_extensions.clone(),
            sink,
        )
    }
}

impl<S: SettingsSink> StreamHandler for IniStreamHandler<S> {
    fn name(&self) -> &'static str {
        "settings-ini"
    }

    fn matches_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    fn detect(&self, first_bytes: &[u8]) -> bool {
        first_bytes.starts_with(&self.marker)
    }

    fn open(&mut self) -> Result<(), StreamError> {
        if self.parser.is_some() {
            debug_assert!(false, "settings stream opened twice");
            error!("settings stream opened twice, discarding previous state");
        }
        debug!("settings stream opened");
        self.parser = Some(Parser::new());
        self.sink.begin();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> StreamResult {
        let Some(parser) = self.parser.as_mut() else {
            debug_assert!(false, "write on a closed settings stream");
            error!("write on a closed settings stream");
            return StreamResult::Error;
        };
        for &byte in chunk {
            parser.feed(byte, &mut self.sink);
        }
        // No end marker exists in this format; the tracker decides.
        StreamResult::MaybeDone
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let Some(mut parser) = self.parser.take() else {
            debug_assert!(false, "close on a stream that was never opened");
            error!("close on a stream that was never opened");
            return Ok(());
        };
        parser.finish(&mut self.sink);
        debug!("settings stream closed, committing");
        self.sink.commit()
    }
}
