#![forbid(unsafe_code)]

//! System provider for the encrypted data volume.
//!
//! Integrates with the host via subprocess invocation of:
//! - `cryptsetup` (isLuks/luksFormat/open/close/token import)
//! - `mkfs.ext4`, `mount`, `umount`

mod command;
mod system;

pub use system::SystemVolumeProvider;
