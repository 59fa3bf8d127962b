//! Transfer outcome taxonomy.
//!
//! Recoverable transfer outcomes are plain values, not `Err`: the host's
//! block protocol has no way to acknowledge or reject a write, so the only
//! externally visible signal is the status of the most recently finished
//! transfer, retained until the next one starts.

use serde::Serialize;
use thiserror::Error;

/// Terminal status of a configuration transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransferStatus {
    /// The upload completed and the stream handler committed it.
    #[default]
    Success,

    /// The stream handler rejected the content, or the tracked file was
    /// deleted while its stream was still open.
    StreamError,

    /// The host rewrote a sector inside the already-accepted byte range,
    /// so the committed data may not match what the host last wrote.
    OutOfOrderSector,

    /// The host went idle with an incomplete transfer and the drive gave
    /// up waiting.
    TransferTimeout,

    /// The tracked file's identity (start sector or content kind) changed
    /// mid-transfer. Recovered by switching to the new file.
    ProtocolViolation,
}

impl TransferStatus {
    /// True for every status other than [`TransferStatus::Success`].
    pub fn is_failure(&self) -> bool {
        !matches!(self, TransferStatus::Success)
    }
}

/// Errors surfaced by a stream handler's `open`/`close` operations.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("content rejected: {0}")]
    Rejected(&'static str),

    #[error("settings commit failed: {0}")]
    Commit(String),
}
