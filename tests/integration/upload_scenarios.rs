//! End-to-end upload scenarios through the public facade.
//!
//! Each test plays the sector writes and directory diffs a host OS would
//! actually generate when saving a file, then checks what the device
//! committed and how it reconciled the host's view.

use crate::support::*;
use gex_vdrive::stream::SettingsEvent;
use gex_vdrive::{DriveState, TransferPhase, TransferStatus, SECTOR_SIZE};

#[test]
fn test_clean_save_commits_the_document() {
    let (mut m, rx) = drive();
    connect(&mut m);

    // the OS writes content first, then the directory entry
    m.on_write(2, &sector(b"## GEX config\n[SYSTEM]\nname=gex\n"))
        .unwrap();
    m.on_write(3, &sector(b"[GPIO]\ndir=0xFF\n")).unwrap();
    m.on_directory_change(&created(7, 2 * SECTOR_SIZE as u32, 2));
    assert_eq!(m.snapshot().phase, TransferPhase::CanFinish);

    // nothing happens until the host idle window passes
    m.periodic_tick(400);
    assert_eq!(m.snapshot().phase, TransferPhase::CanFinish);
    m.periodic_tick(101);

    assert_eq!(m.last_transfer_status(), TransferStatus::Success);
    let events = drain(&rx);
    assert_eq!(events.first(), Some(&SettingsEvent::Begin));
    assert_eq!(events.last(), Some(&SettingsEvent::Commit));
    assert!(events.contains(&SettingsEvent::Entry {
        section: "SYSTEM".into(),
        key: "name".into(),
        value: "gex".into(),
    }));
    assert!(events.contains(&SettingsEvent::Entry {
        section: "GPIO".into(),
        key: "dir".into(),
        value: "0xFF".into(),
    }));

    // a committed save refreshes the host view in place
    assert_eq!(m.drive_state(), DriveState::Connected);
    assert_eq!(m.volume().media_changes, 1);
}

#[test]
fn test_directory_entry_before_content() {
    let (mut m, rx) = drive();
    connect(&mut m);

    // some filesystems flush the directory first; the entry alone is
    // enough to open the stream at the right place
    m.on_directory_change(&created(7, SECTOR_SIZE as u32, 4));
    m.on_write(4, &sector(b"[S]\nk=v\n")).unwrap();
    m.periodic_tick(501);

    assert_eq!(m.last_transfer_status(), TransferStatus::Success);
    assert!(drain(&rx).contains(&SettingsEvent::Entry {
        section: "S".into(),
        key: "k".into(),
        value: "v".into(),
    }));
}

#[test]
fn test_rewritten_sector_flags_out_of_order() {
    let (mut m, rx) = drive();
    connect(&mut m);

    m.on_write(2, &sector(b"## config\n")).unwrap();
    m.on_directory_change(&created(7, 2 * SECTOR_SIZE as u32, 2));
    m.on_write(3, &sector(b"a=1\n")).unwrap();
    // the OS flushes sector 3 again from its page cache
    m.on_write(3, &sector(b"a=2\n")).unwrap();
    m.periodic_tick(501);

    // the commit happened, but the outcome warns the content may be stale
    assert_eq!(m.last_transfer_status(), TransferStatus::OutOfOrderSector);
    assert_eq!(m.snapshot().lowest_out_of_order_sector, Some(3));
    let events = drain(&rx);
    assert_eq!(events.last(), Some(&SettingsEvent::Commit));
    // and a stale outcome forces a full remount cycle
    m.periodic_tick(501);
    assert_eq!(m.drive_state(), DriveState::Reconnecting);
}

#[test]
fn test_stalled_upload_times_out_and_remounts() {
    let (mut m, _rx) = drive();
    connect(&mut m);

    m.on_write(2, &sector(b"## config\n")).unwrap();
    m.on_directory_change(&created(7, 10 * SECTOR_SIZE as u32, 2));
    // the remaining nine sectors never arrive
    m.periodic_tick(501);

    assert_eq!(m.last_transfer_status(), TransferStatus::TransferTimeout);
    m.periodic_tick(501);
    assert_eq!(m.drive_state(), DriveState::Reconnecting);
    m.periodic_tick(2501);
    assert_eq!(m.drive_state(), DriveState::Connected);
    assert_eq!(m.snapshot().phase, TransferPhase::NotStarted);
}

#[test]
fn test_second_save_replaces_the_first_mid_transfer() {
    let (mut m, rx) = drive();
    connect(&mut m);

    // first save, incomplete
    m.on_write(2, &sector(b"## first\n")).unwrap();
    m.on_directory_change(&created(7, 4 * SECTOR_SIZE as u32, 2));

    // the user saves again; the OS allocates a fresh spot
    m.on_write(20, &sector(b"## second\nkey=new\n")).unwrap();
    assert_eq!(m.last_transfer_status(), TransferStatus::ProtocolViolation);

    m.on_directory_change(&created(8, SECTOR_SIZE as u32, 20));
    m.periodic_tick(501);
    assert_eq!(m.last_transfer_status(), TransferStatus::Success);

    let events = drain(&rx);
    // the first document was begun and committed once, the second too,
    // and only the second carries the entry
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SettingsEvent::Commit))
            .count(),
        2
    );
    assert!(events.contains(&SettingsEvent::Entry {
        section: "".into(),
        key: "key".into(),
        value: "new".into(),
    }));
}

#[test]
fn test_deleting_the_file_mid_upload_aborts() {
    let (mut m, _rx) = drive();
    connect(&mut m);

    m.on_write(2, &sector(b"## config\n")).unwrap();
    m.on_directory_change(&created(7, 4 * SECTOR_SIZE as u32, 2));
    m.on_directory_change(&deleted(7));

    assert_eq!(m.last_transfer_status(), TransferStatus::StreamError);
}

#[test]
fn test_housekeeping_writes_never_start_a_transfer() {
    let (mut m, rx) = drive();
    connect(&mut m);

    m.on_write(0, &sector(b"## boot sector bytes")).unwrap();
    m.on_write(1, &sector(b"## fat table")).unwrap();
    let mut fat = vec![0xF8, 0xFF, 0xFF, 0xFF];
    fat.resize(SECTOR_SIZE, 0);
    m.on_write(6, &fat).unwrap();

    assert_eq!(m.snapshot().phase, TransferPhase::NotStarted);
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_back_to_back_saves_each_commit() {
    let (mut m, rx) = drive();
    connect(&mut m);

    m.on_write(2, &sector(b"## one\na=1\n")).unwrap();
    m.on_directory_change(&created(7, SECTOR_SIZE as u32, 2));
    m.periodic_tick(501);
    assert_eq!(m.last_transfer_status(), TransferStatus::Success);

    // second save starts without any reset in between
    m.on_write(30, &sector(b"## two\nb=2\n")).unwrap();
    m.on_directory_change(&created(9, SECTOR_SIZE as u32, 30));
    m.periodic_tick(501);
    assert_eq!(m.last_transfer_status(), TransferStatus::Success);

    let commits = drain(&rx)
        .iter()
        .filter(|e| matches!(e, SettingsEvent::Commit))
        .count();
    assert_eq!(commits, 2);
}

#[test]
fn test_contiguous_second_save_also_commits() {
    let (mut m, rx) = drive();
    connect(&mut m);

    m.on_write(2, &sector(b"## one\na=1\n")).unwrap();
    m.on_directory_change(&created(7, SECTOR_SIZE as u32, 2));
    m.periodic_tick(501);
    assert_eq!(m.last_transfer_status(), TransferStatus::Success);

    // FAT allocates the second save right behind the first file
    m.on_write(3, &sector(b"## two\nb=2\n")).unwrap();
    m.on_directory_change(&created(8, SECTOR_SIZE as u32, 3));
    m.periodic_tick(501);
    assert_eq!(m.last_transfer_status(), TransferStatus::Success);

    let events = drain(&rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SettingsEvent::Commit))
            .count(),
        2
    );
    assert!(events.contains(&SettingsEvent::Entry {
        section: "".into(),
        key: "b".into(),
        value: "2".into(),
    }));
}

#[test]
fn test_stray_writes_during_upload_are_ignored() {
    let (mut m, rx) = drive();
    connect(&mut m);

    m.on_write(2, &sector(b"## config\nk=v\n")).unwrap();
    m.on_directory_change(&created(7, SECTOR_SIZE as u32, 2));
    // desktop indexer junk lands far away, unrecognized
    m.on_write(100, &sector(b"Thumbs.db noise")).unwrap();
    m.periodic_tick(501);

    assert_eq!(m.last_transfer_status(), TransferStatus::Success);
    assert!(drain(&rx).contains(&SettingsEvent::Entry {
        section: "".into(),
        key: "k".into(),
        value: "v".into(),
    }));
}
