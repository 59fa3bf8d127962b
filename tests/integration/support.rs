//! Shared fixtures: a mock volume and a fully wired drive.

use gex_vdrive::stream::SettingsEvent;
use gex_vdrive::{
    DirChangeKind, DirEvent, DriveConfig, DriveManager, DriveState, FileId, IniStreamHandler,
    SectorId, StreamRegistry, VirtualVolume, VolumeError, SECTOR_SIZE,
};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};

/// In-memory volume that records the side effects the manager applies.
#[derive(Default)]
pub struct MockVolume {
    pub sectors: HashMap<SectorId, Vec<u8>>,
    pub rebuilds: u32,
    pub media_changes: u32,
    pub ready: bool,
}

impl VirtualVolume for MockVolume {
    fn read_sector(&mut self, sector: SectorId, buf: &mut [u8]) -> Result<(), VolumeError> {
        buf.fill(0);
        if let Some(data) = self.sectors.get(&sector) {
            buf[..data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn write_sector(&mut self, sector: SectorId, data: &[u8]) -> Result<(), VolumeError> {
        self.sectors.insert(sector, data.to_vec());
        Ok(())
    }

    fn rebuild(&mut self) {
        self.rebuilds += 1;
    }

    fn set_media_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    fn notify_media_changed(&mut self) {
        self.media_changes += 1;
    }
}

/// A drive with the real INI handler; parsed settings land on the channel.
pub fn drive() -> (DriveManager<MockVolume>, Receiver<SettingsEvent>) {
    drive_with_config(DriveConfig::default())
}

pub fn drive_with_config(
    config: DriveConfig,
) -> (DriveManager<MockVolume>, Receiver<SettingsEvent>) {
    let (tx, rx) = mpsc::channel();
    let mut registry = StreamRegistry::new();
    registry.register(Box::new(IniStreamHandler::from_config(&config, tx)));
    let manager = DriveManager::new(config, MockVolume::default(), registry)
        .expect("test config is valid");
    (manager, rx)
}

/// Enable the drive and tick it up to `Connected`.
pub fn connect(m: &mut DriveManager<MockVolume>) {
    m.set_drive_enabled(true);
    m.periodic_tick(1);
    assert_eq!(m.drive_state(), DriveState::Connected);
}

/// A full 512-byte sector starting with the given content.
pub fn sector(content: &[u8]) -> Vec<u8> {
    let mut data = content.to_vec();
    data.resize(SECTOR_SIZE, 0);
    data
}

pub fn created(handle: u32, size: u32, start: SectorId) -> DirEvent<'static> {
    DirEvent {
        name: "CONFIG.INI",
        kind: DirChangeKind::Created,
        handle: FileId(handle),
        size,
        start_sector: Some(start),
    }
}

pub fn deleted(handle: u32) -> DirEvent<'static> {
    DirEvent {
        name: "CONFIG.INI",
        kind: DirChangeKind::Deleted,
        handle: FileId(handle),
        size: 0,
        start_sector: None,
    }
}

/// Collect whatever settings events are available right now.
pub fn drain(rx: &Receiver<SettingsEvent>) -> Vec<SettingsEvent> {
    rx.try_iter().collect()
}
