//! Virtual mass-storage configuration drive core.
//!
//! GEX-class devices expose their configuration as a small FAT volume
//! over USB mass storage: the host reads `CONFIG.INI`, the user edits and
//! saves it back, and the device applies the new settings. The catch is
//! that the MSC protocol gives the device nothing but raw sector writes
//! and directory-entry diffs; there is no "file saved" event. This crate
//! is the transport-agnostic core that turns those signals into reliable
//! configuration transfers:
//!
//! - [`drive::transfer`] reconstructs at most one active file upload from
//!   sector traffic and directory changes;
//! - [`stream`] holds the pluggable content handlers, including the
//!   incremental INI settings parser;
//! - [`drive::connection`] times the drive's visible/hidden/remount
//!   lifecycle so host OS caches never go stale;
//! - [`drive::manager`] is the facade the device firmware drives from its
//!   main loop.
//!
//! The FAT image synthesis and the USB transport live outside, behind the
//! [`drive::volume::VirtualVolume`] trait.
//!
//! ```no_run
//! use gex_vdrive::{DriveConfig, DriveManager, IniStreamHandler, StreamRegistry};
//! use gex_vdrive::stream::SettingsEvent;
//! use std::sync::mpsc;
//!
//! # struct NoVolume;
//! # impl gex_vdrive::VirtualVolume for NoVolume {
//! #     fn read_sector(&mut self, _: u32, _: &mut [u8]) -> Result<(), gex_vdrive::VolumeError> { Ok(()) }
//! #     fn write_sector(&mut self, _: u32, _: &[u8]) -> Result<(), gex_vdrive::VolumeError> { Ok(()) }
//! #     fn rebuild(&mut self) {}
//! #     fn set_media_ready(&mut self, _: bool) {}
//! #     fn notify_media_changed(&mut self) {}
//! # }
//! let config = DriveConfig::default();
//! let (tx, settings_rx) = mpsc::channel::<SettingsEvent>();
//!
//! let mut registry = StreamRegistry::new();
//! registry.register(Box::new(IniStreamHandler::from_config(&config, tx)));
//!
//! let mut drive = DriveManager::new(config, NoVolume, registry).unwrap();
//! drive.set_drive_enabled(true);
//! loop {
//!     // ...forward MSC reads/writes and directory diffs...
//!     drive.periodic_tick(10);
//! }
//! ```

pub mod config;
pub mod drive;
pub mod status;
pub mod stream;

pub use config::{ConfigError, DriveConfig};
pub use drive::connection::DriveState;
pub use drive::manager::{DriveManager, DriveSnapshot};
pub use drive::transfer::TransferPhase;
pub use drive::volume::{
    DirChangeKind, DirEvent, FileId, SectorId, VirtualVolume, VolumeError, SECTOR_SIZE,
};
pub use status::{StreamError, TransferStatus};
pub use stream::{IniStreamHandler, SettingsSink, StreamHandler, StreamRegistry, StreamResult};
