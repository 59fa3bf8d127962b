//! Content stream abstraction.
//!
//! A stream handler turns the raw bytes of a recognized file upload into
//! side effects (for the settings handler: applied configuration). The
//! transfer tracker drives handlers through four operations:
//!
//! - `detect`: pure content sniff on a sector not yet attributed to a file
//! - `open`: allocate parsing state, once per tracked transfer
//! - `write`: consume one contiguous chunk, report progress
//! - `close`: commit side effects and release state, exactly once
//!
//! Handlers must be synchronous and bounded in duration; anything heavier
//! than parsing belongs behind a queue on the far side of `close`.

pub mod ini;

use crate::status::StreamError;
use tracing::trace;

pub use ini::{IniStreamHandler, SettingsEvent, SettingsSink};

/// Outcome of feeding one chunk to a stream handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamResult {
    /// More input is required.
    Continue,

    /// This could be the end, but the handler cannot be sure without more
    /// input or a timeout (the source format has no end marker).
    MaybeDone,

    /// The handler is certain no more input is needed.
    Done,

    /// The content is invalid; the transfer should be aborted.
    Error,
}

/// Identity of a registered stream handler. Opaque; obtained from
/// [`StreamRegistry::detect`] or [`StreamRegistry::kind_for_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamKind(u8);

/// A pluggable content-type parser. One registered instance per content
/// kind; the registry owns the instances and the tracker drives exactly
/// one of them per transfer.
pub trait StreamHandler: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether a directory-entry file extension belongs to this handler.
    fn matches_extension(&self, ext: &str) -> bool;

    /// Content sniff. Must not mutate state.
    fn detect(&self, first_bytes: &[u8]) -> bool;

    /// Allocate parsing state. Called exactly once per tracked transfer.
    fn open(&mut self) -> Result<(), StreamError>;

    /// Consume one contiguous chunk.
    fn write(&mut self, chunk: &[u8]) -> StreamResult;

    /// Commit side effects and release parsing state. Called exactly once
    /// per opened stream, regardless of how the transfer ended.
    fn close(&mut self) -> Result<(), StreamError>;
}

/// The closed set of stream handlers known to the drive.
#[derive(Default)]
pub struct StreamRegistry {
    handlers: Vec<Box<dyn StreamHandler>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; the returned kind identifies it from then on.
    pub fn register(&mut self, handler: Box<dyn StreamHandler>) -> StreamKind {
        debug_assert!(self.handlers.len() < u8::MAX as usize);
        self.handlers.push(handler);
        StreamKind((self.handlers.len() - 1) as u8)
    }

    /// Sniff a chunk against every handler, in registration order.
    pub fn detect(&self, first_bytes: &[u8]) -> Option<StreamKind> {
        for (index, handler) in self.handlers.iter().enumerate() {
            if handler.detect(first_bytes) {
                trace!(handler = handler.name(), "content detected");
                return Some(StreamKind(index as u8));
            }
        }
        None
    }

    /// Map a host-visible file name to a handler via its extension.
    pub fn kind_for_name(&self, name: &str) -> Option<StreamKind> {
        let ext = name.rsplit('.').next()?;
        if ext.len() == name.len() {
            return None; // no dot in the name
        }
        self.handlers
            .iter()
            .position(|h| h.matches_extension(ext))
            .map(|index| StreamKind(index as u8))
    }

    pub fn name_of(&self, kind: StreamKind) -> &'static str {
        self.handlers[kind.0 as usize].name()
    }

    pub(crate) fn handler_mut(&mut self, kind: StreamKind) -> &mut dyn StreamHandler {
        self.handlers[kind.0 as usize].as_mut()
    }
}
