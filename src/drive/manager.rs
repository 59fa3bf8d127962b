//! The drive facade.
//!
//! [`DriveManager`] wires the pieces together: sector traffic and
//! directory diffs from the [`VirtualVolume`] feed the
//! [`TransferTracker`], the [`ConnectionMachine`] times visibility
//! transitions, and the manager applies each decision as volume side
//! effects (rebuilds, media-ready toggles, media-changed notices).
//!
//! Threading model: block I/O and the periodic tick run on the device's
//! main loop and take `&mut self`; enable/disable and remount requests can
//! arrive from other contexts (command handlers, a settings worker) and
//! only need `&self`, so the connection machine sits behind a mutex.

use crate::config::{ConfigError, DriveConfig};
use crate::drive::connection::{ConnectionMachine, DriveState, TickAction, Transition};
use crate::drive::transfer::{TransferPhase, TransferTracker};
use crate::drive::volume::{DirEvent, SectorId, VirtualVolume, VolumeError};
use crate::status::TransferStatus;
use crate::stream::StreamRegistry;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, trace, warn};

/// Point-in-time view of the drive, for diagnostics and shell commands.
#[derive(Debug, Serialize)]
pub struct DriveSnapshot {
    pub state: DriveState,
    pub target_state: DriveState,
    pub phase: TransferPhase,
    pub last_status: TransferStatus,
    pub bytes_processed: u32,
    pub bytes_accepted: u32,
    pub reported_size: u32,
    pub lowest_out_of_order_sector: Option<SectorId>,
    pub timed_out: bool,
}

pub struct DriveManager<V: VirtualVolume> {
    volume: V,
    tracker: TransferTracker,
    conn: Mutex<ConnectionMachine>,
}

impl<V: VirtualVolume> DriveManager<V> {
    /// Build the drive core. The volume starts hidden; call
    /// [`set_drive_enabled`](Self::set_drive_enabled) to surface it.
    pub fn new(
        config: DriveConfig,
        mut volume: V,
        registry: StreamRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        volume.set_media_ready(false);
        Ok(Self {
            volume,
            tracker: TransferTracker::new(registry),
            conn: Mutex::new(ConnectionMachine::new(config)),
        })
    }

    /// Startup entry: hide the media and apply the initial enable state
    /// (from stored settings or the lock jumper).
    pub fn init(&mut self, enabled: bool) {
        self.volume.set_media_ready(false);
        self.set_drive_enabled(enabled);
    }

    /// Request the drive to be visible or hidden. Safe from any context;
    /// takes effect on a later tick.
    pub fn set_drive_enabled(&self, enabled: bool) {
        self.lock_conn().request_enabled(enabled);
    }

    /// Request a remount cycle so the host re-reads the volume. Safe from
    /// any context.
    pub fn request_remount(&self, force_full: bool) {
        self.lock_conn().request_remount(force_full);
    }

    pub fn drive_state(&self) -> DriveState {
        self.lock_conn().current()
    }

    pub fn last_transfer_status(&self) -> TransferStatus {
        self.tracker.last_status()
    }

    pub fn snapshot(&self) -> DriveSnapshot {
        let conn = self.lock_conn();
        let ctx = self.tracker.context();
        DriveSnapshot {
            state: conn.current(),
            target_state: conn.target(),
            phase: ctx.phase,
            last_status: self.tracker.last_status(),
            bytes_processed: ctx.bytes_processed,
            bytes_accepted: ctx.bytes_accepted,
            reported_size: ctx.reported_size,
            lowest_out_of_order_sector: ctx.lowest_out_of_order_sector,
            timed_out: ctx.timed_out,
        }
    }

    pub fn volume(&self) -> &V {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut V {
        &mut self.volume
    }

    /// Host sector read. Reads are driven by OS caching, not user intent,
    /// so they do not count as transfer activity.
    pub fn on_read(&mut self, sector: SectorId, buf: &mut [u8]) -> Result<(), VolumeError> {
        self.volume.read_sector(sector, buf)
    }

    /// Host sector write: store it, restart the idle clock, let the
    /// tracker attribute it.
    pub fn on_write(&mut self, sector: SectorId, data: &[u8]) -> Result<(), VolumeError> {
        self.volume.write_sector(sector, data)?;
        {
            let mut conn = self.lock_conn();
            if conn.current() != DriveState::Connected {
                // a stale host flush racing a transition; the pending
                // remount presents a fresh image anyway
                trace!(sector, "write while hidden, not tracked");
                return Ok(());
            }
            conn.note_activity();
        }
        self.tracker.on_sector_write(sector, data);
        self.service_tracker();
        Ok(())
    }

    /// Directory diff from the filesystem layer.
    pub fn on_directory_change(&mut self, ev: &DirEvent<'_>) {
        {
            let mut conn = self.lock_conn();
            if conn.current() != DriveState::Connected {
                trace!(name = ev.name, "directory change while hidden, not tracked");
                return;
            }
            conn.note_activity();
        }
        self.tracker.on_directory_change(ev);
        self.service_tracker();
    }

    /// Advance time. Call from the main loop; `elapsed_ms` since the
    /// previous call.
    pub fn periodic_tick(&mut self, elapsed_ms: u32) {
        let action = self.lock_conn().tick(elapsed_ms, self.tracker.phase());
        match action {
            TickAction::None => {}
            TickAction::FinishTransfer => {
                debug!("host went idle, finishing the tracked transfer");
                self.tracker.force_finish_timeout();
                // a timeout finish queues nothing; the effects are ours
                self.tracker.take_remount_request();
                self.apply_finish_effects();
            }
            TickAction::Transition(t) => self.apply_transition(t),
        }
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, ConnectionMachine> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// React to anything the tracker finished during a write or directory
    /// event.
    fn service_tracker(&mut self) {
        if self.tracker.take_remount_request().is_some() {
            self.apply_finish_effects();
        }
    }

    /// A transfer just finished; reconcile the host's view of the volume.
    fn apply_finish_effects(&mut self) {
        if self.tracker.last_status().is_failure() {
            // The host may hold a stale or half-written view; only a real
            // disappear/reappear cycle reliably clears its caches.
            warn!(status = ?self.tracker.last_status(), "transfer failed, forcing a remount cycle");
            self.lock_conn().request_remount(true);
        } else {
            info!("transfer committed, refreshing the host view");
            self.volume.rebuild();
            self.volume.notify_media_changed();
        }
    }

    fn apply_transition(&mut self, t: Transition) {
        if self.tracker.is_live() {
            // the host is losing the drive mid-upload
            self.tracker.force_finish_timeout();
            self.tracker.take_remount_request();
        }
        if t.from == DriveState::Connected {
            self.volume.set_media_ready(false);
        }
        match t.to {
            DriveState::Connected => {
                self.tracker.reset();
                if t.force_full || t.from == DriveState::Disconnected {
                    self.volume.rebuild();
                } else {
                    self.volume.notify_media_changed();
                }
                self.volume.set_media_ready(true);
                info!("drive surfaced to the host");
            }
            DriveState::Disconnected => {
                self.tracker.reset();
                self.volume.set_media_ready(false);
                info!("drive hidden from the host");
            }
            DriveState::Reconnecting => {
                // media is already down; the machine re-surfaces on its own
            }
        }
    }
}
