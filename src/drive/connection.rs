//! Drive connection lifecycle.
//!
//! The drive's visibility to the host moves between three states through
//! timed transitions. Transitions are requested by setting `target`;
//! `current` catches up when the applicable delay elapses in `tick`. The
//! invariant is that `current != target` implies a timer is running, and
//! `current == target` means the machine is idle (except that a live
//! transfer arms the completion deadline while fully `Connected`).
//!
//! All timing comes from [`DriveConfig`]; the machine itself never reads a
//! clock, it only accumulates the `elapsed_ms` the caller feeds it.

use crate::config::DriveConfig;
use crate::drive::transfer::TransferPhase;
use serde::Serialize;
use tracing::{debug, info};

/// Host-visible lifecycle state of the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveState {
    /// Hidden from the host.
    Disconnected,
    /// Mid remount cycle: hidden now, will re-surface.
    Reconnecting,
    /// Visible and serving sectors.
    Connected,
}

/// Coalesced remount request. Multiple requests OR their flags together
/// until a transition consumes the whole thing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemountRequest {
    pub requested: bool,
    pub force_full: bool,
}

/// A completed state transition, for the caller to apply effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DriveState,
    pub to: DriveState,
    /// Whether the consumed remount request demanded a full rebuild.
    pub force_full: bool,
}

/// What a tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing elapsed.
    None,
    /// `current` advanced to `target`.
    Transition(Transition),
    /// The drive is stable `Connected` but the tracked transfer ran out
    /// of host activity; the caller must force-finish it.
    FinishTransfer,
}

pub struct ConnectionMachine {
    current: DriveState,
    target: DriveState,
    remount: RemountRequest,
    /// Milliseconds since the last host event, saturating at
    /// `max_event_time_ms`.
    idle_ms: u32,
    config: DriveConfig,
}

impl ConnectionMachine {
    pub fn new(config: DriveConfig) -> Self {
        Self {
            current: DriveState::Disconnected,
            target: DriveState::Disconnected,
            remount: RemountRequest::default(),
            idle_ms: 0,
            config,
        }
    }

    pub fn current(&self) -> DriveState {
        self.current
    }

    pub fn target(&self) -> DriveState {
        self.target
    }

    /// Host activity (a sector write or directory event) restarts the
    /// idle clock.
    pub fn note_activity(&mut self) {
        self.idle_ms = 0;
    }

    /// Ask for the drive to be visible or hidden. Takes effect on a later
    /// tick.
    pub fn request_enabled(&mut self, enabled: bool) {
        if enabled {
            if self.target == DriveState::Disconnected {
                info!("drive enable requested");
                self.target = DriveState::Connected;
            }
        } else {
            info!("drive disable requested");
            self.target = DriveState::Disconnected;
        }
    }

    /// Ask for a remount cycle. Coalesces with any pending request.
    pub fn request_remount(&mut self, force_full: bool) {
        if self.current == self.target && self.current == DriveState::Connected {
            debug!(force_full, "remount armed");
            self.target = DriveState::Reconnecting;
        }
        self.remount.requested = true;
        self.remount.force_full |= force_full;
    }

    /// Advance time. Returns the effect the caller must apply, if any.
    pub fn tick(&mut self, elapsed_ms: u32, phase: TransferPhase) -> TickAction {
        if self.current == self.target {
            return self.tick_stable(elapsed_ms, phase);
        }

        self.accumulate(elapsed_ms);
        let delay = self.transition_delay(phase);
        if self.idle_ms <= delay {
            return TickAction::None;
        }

        let from = self.current;
        self.current = self.target;
        self.idle_ms = 0;

        let mut force_full = false;
        if self.current != DriveState::Reconnecting {
            // Arriving at Connected delivers the pending remount request;
            // arriving at Disconnected abandons it.
            force_full = self.remount.requested && self.remount.force_full;
            self.remount = RemountRequest::default();
        }

        if self.current == DriveState::Reconnecting {
            // A remount always comes back up after the reconnect delay.
            self.target = DriveState::Connected;
        }

        info!(from = ?from, to = ?self.current, "drive state transition");
        TickAction::Transition(Transition {
            from,
            to: self.current,
            force_full,
        })
    }

    /// Stable-state tick: only a live transfer keeps a deadline armed.
    fn tick_stable(&mut self, elapsed_ms: u32, phase: TransferPhase) -> TickAction {
        if self.current != DriveState::Connected {
            self.idle_ms = 0;
            return TickAction::None;
        }
        let deadline = match phase {
            TransferPhase::InProgress => self.config.disconnect_delay_transfer_timeout_ms,
            TransferPhase::CanFinish => self.config.disconnect_delay_transfer_idle_ms,
            TransferPhase::NotStarted | TransferPhase::Finished => {
                self.idle_ms = 0;
                return TickAction::None;
            }
        };
        self.accumulate(elapsed_ms);
        if self.idle_ms > deadline {
            self.idle_ms = 0;
            TickAction::FinishTransfer
        } else {
            TickAction::None
        }
    }

    fn accumulate(&mut self, elapsed_ms: u32) {
        self.idle_ms = self
            .idle_ms
            .saturating_add(elapsed_ms)
            .min(self.config.max_event_time_ms);
    }

    /// Delay table for the pending transition.
    fn transition_delay(&self, phase: TransferPhase) -> u32 {
        match (self.current, self.target) {
            (DriveState::Connected, _) => match phase {
                TransferPhase::NotStarted | TransferPhase::Finished => {
                    self.config.disconnect_delay_default_ms
                }
                TransferPhase::InProgress => self.config.disconnect_delay_transfer_timeout_ms,
                TransferPhase::CanFinish => self.config.disconnect_delay_transfer_idle_ms,
            },
            (DriveState::Disconnected, DriveState::Connected) => self.config.connect_delay_ms,
            (DriveState::Reconnecting, DriveState::Connected) => self.config.reconnect_delay_ms,
            (DriveState::Reconnecting, DriveState::Disconnected) => 0,
            // Disconnected -> Reconnecting is never requested; fall
            // through immediately if it somehow appears.
            _ => 0,
        }
    }
}
