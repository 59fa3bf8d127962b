//! Upload tracking.
//!
//! The host filesystem driver never says "a file upload started" or
//! "finished"; it only writes sectors and occasionally rewrites directory
//! entries. The tracker reconstructs a single at-most-one-active transfer
//! from those signals:
//!
//! - content sniffing attributes the first unclaimed recognized sector to
//!   a new stream;
//! - directory diffs contribute identity (handle, size, start sector)
//!   under monotonic/immutability rules; any violation means the host is
//!   actually writing a different file;
//! - completion is inferred from bytes-vs-reported-size, the stream
//!   handler's own `MaybeDone`/`Done` answer, and (driven externally) host
//!   idle time.
//!
//! All state lives in one [`FileTransferContext`] owned here and reset by
//! value; the phase only moves forward, reset excepted.

use crate::drive::volume::{DirChangeKind, DirEvent, FileId, SectorId, SECTOR_SIZE};
use crate::status::TransferStatus;
use crate::stream::{StreamKind, StreamRegistry, StreamResult};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

/// FAT media-descriptor pattern. A write starting with this is the host
/// refreshing a FAT copy, never file content. The second FAT copy lands
/// past the reserved sectors, hence the pattern check on top of the
/// sector-number check.
const FAT_MEDIA_MARKER: [u8; 4] = [0xF8, 0xFF, 0xFF, 0xFF];

/// How many sectors a write covers.
fn sector_span(data: &[u8]) -> u32 {
    data.len().div_ceil(SECTOR_SIZE) as u32
}

/// Coarse lifecycle stage of the tracked transfer.
///
/// Transitions (ratcheting, reset excepted):
/// `NotStarted → InProgress → CanFinish → Finished`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum TransferPhase {
    /// Nothing is being tracked.
    #[default]
    NotStarted,
    /// A file handle or content stream is known; bytes are expected.
    InProgress,
    /// Everything reported so far lines up; waiting out host idle time.
    CanFinish,
    /// Terminal until the context is reset.
    Finished,
}

/// All state for one candidate upload. Reset by value between transfers.
#[derive(Debug, Default)]
pub struct FileTransferContext {
    /// Identity from the directory layer; `None` until an entry is seen.
    pub(crate) file_handle: Option<FileId>,
    pub(crate) start_sector: Option<SectorId>,
    /// Where the next contiguous write must land.
    pub(crate) next_expected_sector: Option<SectorId>,
    /// Earliest sector the host rewrote inside the accepted range.
    pub(crate) lowest_out_of_order_sector: Option<SectorId>,
    /// Last directory-entry size; only ever grows for the same file.
    pub(crate) reported_size: u32,
    /// Bytes handed to the stream handler.
    pub(crate) bytes_processed: u32,
    /// Bytes judged to belong to the file; can exceed `bytes_processed`
    /// when trailing sectors arrive after the stream said `Done`.
    pub(crate) bytes_accepted: u32,
    /// Immutable once set; a change means a different file.
    pub(crate) stream_kind: Option<StreamKind>,
    pub(crate) stream_open: bool,
    pub(crate) stream_started: bool,
    /// The handler answered `Done`.
    pub(crate) stream_finished: bool,
    /// The handler answered `MaybeDone` or `Done` on its last chunk.
    pub(crate) stream_may_be_done: bool,
    /// Directory info says all reported bytes arrived.
    pub(crate) file_info_may_be_done: bool,
    pub(crate) timed_out: bool,
    pub(crate) phase: TransferPhase,
}

/// Turns sector writes and directory diffs into one reliable transfer.
pub struct TransferTracker {
    registry: StreamRegistry,
    ctx: FileTransferContext,
    /// Terminal status of the most recently finished transfer; retained
    /// until the next one finishes.
    last_status: TransferStatus,
    /// Remount the tracker wants after a finish; value is `force_full`.
    pending_remount: Option<bool>,
}

impl TransferTracker {
    pub fn new(registry: StreamRegistry) -> Self {
        Self {
            registry,
            ctx: FileTransferContext::default(),
            last_status: TransferStatus::Success,
            pending_remount: None,
        }
    }

    pub fn phase(&self) -> TransferPhase {
        self.ctx.phase
    }

    pub fn last_status(&self) -> TransferStatus {
        self.last_status
    }

    /// Whether a transfer is underway (started but not finished).
    pub fn is_live(&self) -> bool {
        !matches!(
            self.ctx.phase,
            TransferPhase::NotStarted | TransferPhase::Finished
        )
    }

    pub(crate) fn context(&self) -> &FileTransferContext {
        &self.ctx
    }

    /// Take the remount the tracker queued, if any. `Some(force_full)`.
    pub fn take_remount_request(&mut self) -> Option<bool> {
        self.pending_remount.take()
    }

    /// Drop all transfer state. The last status survives; it describes
    /// the previous transfer by definition.
    pub fn reset(&mut self) {
        debug_assert!(!self.ctx.stream_open, "reset with an open stream");
        if self.ctx.stream_open {
            let status = self.close_stream(TransferStatus::TransferTimeout);
            self.last_status = status;
        }
        self.ctx = FileTransferContext::default();
    }

    /// A host block write landed on the volume.
    pub fn on_sector_write(&mut self, sector: SectorId, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        // Boot sector, first FAT sector, and FAT-copy refreshes are
        // filesystem housekeeping, never file content.
        if sector <= 1 {
            trace!(sector, "housekeeping sector, discarded");
            return;
        }
        if data.len() >= 4 && data[..4] == FAT_MEDIA_MARKER {
            trace!(sector, "FAT copy refresh, discarded");
            return;
        }

        if self.ctx.phase == TransferPhase::Finished {
            self.on_write_after_finish(sector, data);
            return;
        }

        if !self.ctx.stream_started {
            match self.registry.detect(data) {
                Some(kind) => self.open_tracked(sector, kind, Some(data)),
                None => trace!(sector, "unrecognized write before any transfer, discarded"),
            }
            return;
        }

        let Some(next) = self.ctx.next_expected_sector else {
            debug_assert!(false, "stream started without an expected sector");
            return;
        };

        if sector == next {
            self.accept(data);
        } else if self.ctx.start_sector.is_some_and(|s| sector >= s && sector < next) {
            // Rewrite inside the accepted range: remember it, never
            // re-deliver the bytes.
            warn!(sector, "host rewrote an already-accepted sector");
            let lowest = self
                .ctx
                .lowest_out_of_order_sector
                .map_or(sector, |l| l.min(sector));
            self.ctx.lowest_out_of_order_sector = Some(lowest);
        } else if let Some(kind) = self.registry.detect(data) {
            // An unrelated recognized document started elsewhere.
            info!(sector, "new document detected outside the tracked range");
            self.switch_to_new_file();
            self.open_tracked(sector, kind, Some(data));
        } else {
            trace!(sector, "stray write outside the tracked range, discarded");
        }
    }

    /// A directory entry was created, changed or deleted.
    pub fn on_directory_change(&mut self, ev: &DirEvent<'_>) {
        if self.ctx.phase == TransferPhase::Finished {
            // Only an entry for a different, recognized file revives the
            // tracker; everything else concerns the closed transfer.
            let fresh = ev.kind != DirChangeKind::Deleted
                && self.ctx.file_handle != Some(ev.handle)
                && self.registry.kind_for_name(ev.name).is_some();
            if !fresh {
                trace!(name = ev.name, "directory change after finish, ignored");
                return;
            }
            debug!(name = ev.name, "new settings file after a finished transfer");
            self.ctx = FileTransferContext::default();
        }

        if ev.kind == DirChangeKind::Deleted {
            if self.ctx.file_handle == Some(ev.handle) {
                if self.ctx.stream_open {
                    warn!(name = ev.name, "tracked file deleted mid-transfer");
                    self.update_state(TransferStatus::StreamError);
                } else {
                    debug!(name = ev.name, "tracked file deleted, dropping context");
                    self.ctx = FileTransferContext::default();
                }
            }
            return;
        }

        let tracked = self.ctx.file_handle == Some(ev.handle);
        let recognized = self.registry.kind_for_name(ev.name);
        if !tracked && recognized.is_none() {
            trace!(name = ev.name, "unrelated directory entry, ignored");
            return;
        }
        if !tracked && self.ctx.file_handle.is_some() {
            info!(name = ev.name, "directory entry for a different file");
            self.switch_to_new_file();
        }

        // Identity rules: size only grows, start sector and stream kind
        // never change. Any violation means this is really a new file.
        let shrank = ev.size < self.ctx.reported_size;
        let moved = matches!(
            (self.ctx.start_sector, ev.start_sector),
            (Some(cur), Some(new)) if cur != new
        );
        let rekinded = matches!(
            (self.ctx.stream_kind, recognized),
            (Some(cur), Some(new)) if cur != new
        );
        if shrank || moved || rekinded {
            info!(
                name = ev.name,
                shrank, moved, rekinded, "file identity changed, switching"
            );
            self.switch_to_new_file();
        }

        self.ctx.file_handle = Some(ev.handle);
        if self.ctx.start_sector.is_none() {
            self.ctx.start_sector = ev.start_sector;
        }
        self.ctx.reported_size = self.ctx.reported_size.max(ev.size);

        if !self.ctx.stream_started {
            // Directory info can arrive before any content sector; open
            // early so the first content write is already expected.
            if let (Some(kind), Some(start)) = (recognized, self.ctx.start_sector) {
                self.open_tracked(start, kind, None);
                return;
            }
        }
        self.update_state(TransferStatus::Success);
    }

    /// Timeout-forced finish. Called when host idle time ran out or the
    /// drive must leave `Connected` with a live transfer.
    pub fn force_finish_timeout(&mut self) {
        if !self.is_live() {
            return;
        }
        self.ctx.timed_out = true;
        let status = if self.ctx.lowest_out_of_order_sector.is_some() {
            // The host rewrote accepted data we never re-read; what the
            // stream handler committed may be stale.
            TransferStatus::OutOfOrderSector
        } else if self.ctx.phase == TransferPhase::CanFinish {
            TransferStatus::Success
        } else {
            TransferStatus::TransferTimeout
        };
        info!(status = ?status, "transfer force-finished after host idle");
        self.update_state(status);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Writes after a finish. A recognized document starts the next
    /// transfer even when it lands contiguously behind the old file;
    /// marker-less contiguous sectors are absorbed as tail flushes.
    fn on_write_after_finish(&mut self, sector: SectorId, data: &[u8]) {
        if let Some(kind) = self.registry.detect(data) {
            debug!(sector, "new document after a finished transfer");
            self.ctx = FileTransferContext::default();
            self.open_tracked(sector, kind, Some(data));
            return;
        }
        if self.ctx.next_expected_sector == Some(sector) {
            self.ctx.next_expected_sector = Some(sector + sector_span(data));
            self.ctx.bytes_accepted = self.ctx.bytes_accepted.saturating_add(data.len() as u32);
            trace!(sector, "trailing sector of a finished transfer absorbed");
        }
    }

    /// Accept a contiguous chunk: advance the window, feed the handler.
    fn accept(&mut self, data: &[u8]) {
        let Some(next) = self.ctx.next_expected_sector else {
            return;
        };
        self.ctx.next_expected_sector = Some(next + sector_span(data));
        self.ctx.bytes_accepted = self.ctx.bytes_accepted.saturating_add(data.len() as u32);

        let mut status = TransferStatus::Success;
        if !self.ctx.stream_finished {
            self.ctx.bytes_processed = self.ctx.bytes_processed.saturating_add(data.len() as u32);
            if let Some(kind) = self.ctx.stream_kind {
                match self.registry.handler_mut(kind).write(data) {
                    StreamResult::Continue => self.ctx.stream_may_be_done = false,
                    StreamResult::MaybeDone => self.ctx.stream_may_be_done = true,
                    StreamResult::Done => {
                        self.ctx.stream_may_be_done = true;
                        self.ctx.stream_finished = true;
                    }
                    StreamResult::Error => status = TransferStatus::StreamError,
                }
            }
        }
        self.update_state(status);
    }

    /// Start tracking a stream at `sector`, optionally feeding the chunk
    /// that triggered detection.
    fn open_tracked(&mut self, sector: SectorId, kind: StreamKind, first_chunk: Option<&[u8]>) {
        let identity_changed = self.ctx.start_sector.is_some_and(|s| s != sector)
            || self.ctx.stream_kind.is_some_and(|k| k != kind);
        if identity_changed {
            warn!(sector, "identity changed before the stream opened");
            self.switch_to_new_file();
        }

        self.ctx.stream_kind = Some(kind);
        self.ctx.start_sector = Some(sector);
        match self.registry.handler_mut(kind).open() {
            Ok(()) => {
                self.ctx.stream_open = true;
                self.ctx.stream_started = true;
                self.ctx.next_expected_sector = Some(sector);
                debug!(
                    sector,
                    handler = self.registry.name_of(kind),
                    "stream opened"
                );
                match first_chunk {
                    Some(data) => self.accept(data),
                    None => self.update_state(TransferStatus::Success),
                }
            }
            Err(e) => {
                warn!(error = %e, "stream open failed");
                self.update_state(TransferStatus::StreamError);
            }
        }
    }

    /// Abandon the current file: close an open stream (discarding the
    /// transfer) and reset the context so a new identity can be set up.
    fn switch_to_new_file(&mut self) {
        if self.ctx.stream_open {
            // A complete old document was committed by close(); an
            // incomplete one is a protocol violation by the host.
            let status = if self.ctx.file_info_may_be_done {
                TransferStatus::Success
            } else {
                TransferStatus::ProtocolViolation
            };
            let final_status = self.close_stream(status);
            self.last_status = final_status;
            if final_status == TransferStatus::Success {
                self.queue_remount(false);
            }
            info!(status = ?final_status, "tracked file abandoned for a new one");
        }
        self.ctx = FileTransferContext::default();
    }

    /// Close the stream if open. Returns the final status: a failing
    /// `close()` only overrides `Success`.
    fn close_stream(&mut self, status: TransferStatus) -> TransferStatus {
        let mut final_status = status;
        if self.ctx.stream_open {
            self.ctx.stream_open = false;
            if let Some(kind) = self.ctx.stream_kind {
                if let Err(e) = self.registry.handler_mut(kind).close() {
                    warn!(error = %e, "stream close failed");
                    if final_status == TransferStatus::Success {
                        final_status = TransferStatus::StreamError;
                    }
                }
            }
        }
        final_status
    }

    fn queue_remount(&mut self, force_full: bool) {
        let force = self.pending_remount.get_or_insert(false);
        *force |= force_full;
    }

    /// Central phase recomputation, run after every mutation.
    fn update_state(&mut self, status: TransferStatus) {
        self.ctx.file_info_may_be_done = self.ctx.file_handle.is_some()
            && self.ctx.reported_size > 0
            && self.ctx.bytes_accepted >= self.ctx.reported_size;
        let can_finish = self.ctx.file_info_may_be_done && self.ctx.stream_may_be_done;
        let must_finish = self.ctx.stream_finished && self.ctx.file_info_may_be_done;

        if status.is_failure() || self.ctx.timed_out || must_finish {
            let timed_out = self.ctx.timed_out;
            let final_status = self.close_stream(status);
            self.last_status = final_status;
            self.ctx.phase = TransferPhase::Finished;
            info!(
                status = ?final_status,
                bytes = self.ctx.bytes_processed,
                "transfer finished"
            );
            // A timeout finish is surfaced by the connection layer; every
            // other finish asks for a remount so the host re-reads.
            if !timed_out {
                self.queue_remount(false);
            }
            return;
        }

        let computed = if can_finish {
            TransferPhase::CanFinish
        } else if self.ctx.file_handle.is_some() || self.ctx.stream_started {
            TransferPhase::InProgress
        } else {
            TransferPhase::NotStarted
        };
        // The phase only ratchets forward; reset is the only way down.
        self.ctx.phase = self.ctx.phase.max(computed);
    }
}
