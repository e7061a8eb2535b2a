#![forbid(unsafe_code)]

//! Provider contracts shared by datavault binaries.
//!
//! The system implementation lives in `datavault-luks`; tests substitute
//! in-memory providers so provisioning logic can be exercised without a
//! real block device.

pub mod volume;

pub use volume::VolumeProvider;
