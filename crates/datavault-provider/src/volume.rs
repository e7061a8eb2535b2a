//! Provider contract for encrypted volume operations.
//!
//! Every operation corresponds to one external command invocation on the
//! host (`cryptsetup`, `mkfs.ext4`, `mount`, `umount`). Keeping the
//! contract at this level lets the provisioning workflow stay generic and
//! lets tests assert the exact command sequence without touching a device.

use std::error::Error;
use std::path::{Path, PathBuf};

/// Abstraction over the disk-encryption and filesystem tooling.
///
/// Secrets (the passphrase, the token JSON) are always delivered to the
/// underlying tool via its input stream, never on the argument vector.
pub trait VolumeProvider {
    type Error: Error + Send + Sync + 'static;

    /// Probe whether `device` already carries a valid LUKS header.
    ///
    /// The result is a pure function of the probe's exit status: success
    /// means a container exists, failure means the device is blank.
    fn is_luks(&self, device: &Path) -> Result<bool, Self::Error>;

    /// Format `device` as a LUKS2 container keyed by `passphrase`.
    fn format_luks2(&self, device: &Path, passphrase: &[u8]) -> Result<(), Self::Error>;

    /// Open the container on `device` under `/dev/mapper/<mapper>`.
    fn open(&self, device: &Path, mapper: &str, passphrase: &[u8]) -> Result<(), Self::Error>;

    /// Tear down the mapper device. Implementations should treat an
    /// already-closed mapping as success so cleanup stays idempotent.
    fn close(&self, mapper: &str) -> Result<(), Self::Error>;

    /// Create an ext4 filesystem on the opened mapper device.
    fn make_filesystem(&self, mapper_device: &Path) -> Result<(), Self::Error>;

    /// Mount the mapper device at `mount_point`.
    fn mount(&self, mapper_device: &Path, mount_point: &Path) -> Result<(), Self::Error>;

    /// Unmount whatever is mounted at `mount_point`.
    fn unmount(&self, mount_point: &Path) -> Result<(), Self::Error>;

    /// Import a metadata token into the LUKS header at `token_id`.
    ///
    /// `token_json` is passed verbatim on the tool's input stream.
    fn import_token(&self, device: &Path, token_id: u32, token_json: &str)
        -> Result<(), Self::Error>;

    /// Block-device node exposed for an open mapping.
    fn mapper_device(&self, mapper: &str) -> PathBuf {
        Path::new("/dev/mapper").join(mapper)
    }
}
