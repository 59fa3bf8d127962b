//! The virtual configuration drive.
//!
//! Submodules, bottom up:
//!
//! - [`volume`]: the block-device interface the FAT emulation layer
//!   implements
//! - [`transfer`]: attribution of raw sector writes to one tracked file
//!   upload
//! - [`connection`]: timed visible/hidden/remount lifecycle
//! - [`manager`]: the facade tying them together

pub mod connection;
pub mod manager;
pub mod transfer;
pub mod volume;
