//! Interface to the emulated block device.
//!
//! The FAT emulation layer owns sector numbering, cluster math and
//! directory encoding; the core only consumes this trait. Sector writes
//! and directory diffs flow the other way, into
//! [`DriveManager`](crate::drive::manager::DriveManager), as calls.

use thiserror::Error;

/// Index of a 512-byte sector on the emulated volume.
pub type SectorId = u32;

/// Sector size shared with the MSC transport.
pub const SECTOR_SIZE: usize = 512;

/// Opaque identity the filesystem layer assigns to a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("sector {0} is outside the volume")]
    OutOfRange(SectorId),

    #[error("volume is not ready")]
    NotReady,
}

/// What happened to a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirChangeKind {
    Created,
    Changed,
    Deleted,
}

/// A directory diff reported by the filesystem emulation layer.
#[derive(Debug, Clone, Copy)]
pub struct DirEvent<'a> {
    /// Host-visible file name, e.g. `CONFIG.INI`.
    pub name: &'a str,
    pub kind: DirChangeKind,
    pub handle: FileId,
    /// Size from the directory entry, in bytes.
    pub size: u32,
    /// First data sector, when the entry has one allocated.
    pub start_sector: Option<SectorId>,
}

/// The emulated volume, as the core sees it.
pub trait VirtualVolume {
    fn read_sector(&mut self, sector: SectorId, buf: &mut [u8]) -> Result<(), VolumeError>;

    fn write_sector(&mut self, sector: SectorId, data: &[u8]) -> Result<(), VolumeError>;

    /// Re-synthesize the filesystem image from current device state.
    fn rebuild(&mut self);

    /// Raise or drop the MSC media-ready flag (drive visible / gone).
    fn set_media_ready(&mut self, ready: bool);

    /// Lightweight "media changed" notice; does not toggle readiness.
    fn notify_media_changed(&mut self);
}
