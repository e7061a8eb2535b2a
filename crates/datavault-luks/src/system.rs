//! System-backed `VolumeProvider` implementation.
//!
//! Wraps the host's `cryptsetup`, `mkfs.ext4`, `mount`, and `umount`
//! binaries, resolved from config overrides, well-known locations, then
//! `PATH`.

use crate::command::{ToolCommand, ToolOutput};
use datavault_core::config::DatavaultConfig;
use datavault_core::error::{DatavaultError, DatavaultResult};
use datavault_provider::VolumeProvider;
use log::{debug, warn};
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
    "/sbin/cryptsetup",
    "/bin/cryptsetup",
    "/usr/local/sbin/cryptsetup",
];
const DEFAULT_MKFS_PATHS: &[&str] = &[
    "/sbin/mkfs.ext4",
    "/usr/sbin/mkfs.ext4",
    "/usr/bin/mkfs.ext4",
];
const DEFAULT_MOUNT_PATHS: &[&str] = &["/bin/mount", "/usr/bin/mount"];
const DEFAULT_UMOUNT_PATHS: &[&str] = &["/bin/umount", "/usr/bin/umount"];

/// Provider that manages the encrypted volume via the host tools.
#[derive(Debug, Clone)]
pub struct SystemVolumeProvider {
    cryptsetup: ToolCommand,
    mkfs: ToolCommand,
    mount: ToolCommand,
    umount: ToolCommand,
}

impl SystemVolumeProvider {
    /// Build a provider from configuration, resolving every tool binary
    /// up front so a missing tool fails before any mutation.
    pub fn from_config(config: &DatavaultConfig) -> DatavaultResult<Self> {
        let timeout = config.command_timeout();
        Ok(Self {
            cryptsetup: ToolCommand::new(
                resolve_binary(
                    "cryptsetup",
                    config.tools.cryptsetup_path.as_deref(),
                    DEFAULT_CRYPTSETUP_PATHS,
                )?,
                timeout,
            ),
            mkfs: ToolCommand::new(
                resolve_binary(
                    "mkfs.ext4",
                    config.tools.mkfs_path.as_deref(),
                    DEFAULT_MKFS_PATHS,
                )?,
                timeout,
            ),
            mount: ToolCommand::new(
                resolve_binary(
                    "mount",
                    config.tools.mount_path.as_deref(),
                    DEFAULT_MOUNT_PATHS,
                )?,
                timeout,
            ),
            umount: ToolCommand::new(
                resolve_binary(
                    "umount",
                    config.tools.umount_path.as_deref(),
                    DEFAULT_UMOUNT_PATHS,
                )?,
                timeout,
            ),
        })
    }
}

impl VolumeProvider for SystemVolumeProvider {
    type Error = DatavaultError;

    fn is_luks(&self, device: &Path) -> DatavaultResult<bool> {
        let device = device.to_string_lossy();
        let out = self.cryptsetup.run(&["isLuks", device.as_ref()], None)?;
        debug!("cryptsetup isLuks {} exited with {}", device, out.status);
        Ok(out.success())
    }

    fn format_luks2(&self, device: &Path, passphrase: &[u8]) -> DatavaultResult<()> {
        let device = device.to_string_lossy();
        let out = self.cryptsetup.run(
            &["luksFormat", "--type", "luks2", "-q", device.as_ref()],
            Some(passphrase),
        )?;
        if out.success() {
            return Ok(());
        }
        Err(DatavaultError::Provider(format!(
            "cryptsetup failed to format {} as LUKS2: {} (exit code {})",
            device,
            out.diagnostic(),
            out.status
        )))
    }

    fn open(&self, device: &Path, mapper: &str, passphrase: &[u8]) -> DatavaultResult<()> {
        let device = device.to_string_lossy();
        let out = self
            .cryptsetup
            .run(&["open", device.as_ref(), mapper], Some(passphrase))?;
        if out.success() {
            return Ok(());
        }
        Err(DatavaultError::Provider(classify_open_failure(
            mapper,
            device.as_ref(),
            &out,
        )))
    }

    fn close(&self, mapper: &str) -> DatavaultResult<()> {
        let out = self.cryptsetup.run(&["close", mapper], None)?;
        if out.success() {
            return Ok(());
        }

        // An already-closed mapping keeps cleanup idempotent.
        let diagnostic = out.diagnostic().to_ascii_lowercase();
        if diagnostic.contains("does not exist")
            || diagnostic.contains("doesn't exist")
            || diagnostic.contains("not active")
        {
            warn!("mapping `{mapper}` was not active; treating close as done");
            return Ok(());
        }

        Err(DatavaultError::Provider(format!(
            "cryptsetup failed to close mapping `{mapper}`: {} (exit code {})",
            out.diagnostic(),
            out.status
        )))
    }

    fn make_filesystem(&self, mapper_device: &Path) -> DatavaultResult<()> {
        let mapper_device = mapper_device.to_string_lossy();
        let out = self.mkfs.run(&[mapper_device.as_ref()], None)?;
        if out.success() {
            return Ok(());
        }
        Err(DatavaultError::Provider(format!(
            "mkfs.ext4 failed on {}: {} (exit code {})",
            mapper_device,
            out.diagnostic(),
            out.status
        )))
    }

    fn mount(&self, mapper_device: &Path, mount_point: &Path) -> DatavaultResult<()> {
        let mapper_device = mapper_device.to_string_lossy();
        let mount_point = mount_point.to_string_lossy();
        let out = self
            .mount
            .run(&[mapper_device.as_ref(), mount_point.as_ref()], None)?;
        if out.success() {
            return Ok(());
        }
        Err(DatavaultError::Provider(format!(
            "mount of {} at {} failed: {} (exit code {})",
            mapper_device,
            mount_point,
            out.diagnostic(),
            out.status
        )))
    }

    fn unmount(&self, mount_point: &Path) -> DatavaultResult<()> {
        let mount_point = mount_point.to_string_lossy();
        let out = self.umount.run(&[mount_point.as_ref()], None)?;
        if out.success() {
            return Ok(());
        }
        Err(DatavaultError::Provider(format!(
            "umount of {} failed: {} (exit code {})",
            mount_point,
            out.diagnostic(),
            out.status
        )))
    }

    fn import_token(
        &self,
        device: &Path,
        token_id: u32,
        token_json: &str,
    ) -> DatavaultResult<()> {
        let device = device.to_string_lossy();
        let token_id = token_id.to_string();
        let out = self.cryptsetup.run(
            &["token", "import", "--token-id", &token_id, device.as_ref()],
            Some(token_json.as_bytes()),
        )?;
        if out.success() {
            return Ok(());
        }
        Err(DatavaultError::Provider(format!(
            "cryptsetup failed to import token {} into {}: {} (exit code {})",
            token_id,
            device,
            out.diagnostic(),
            out.status
        )))
    }
}

fn classify_open_failure(mapper: &str, device: &str, out: &ToolOutput) -> String {
    let diagnostic = out.diagnostic();
    let lower = diagnostic.to_ascii_lowercase();

    let hint = if lower.contains("no key available")
        || lower.contains("wrong key")
        || lower.contains("passphrase is incorrect")
        || lower.contains("invalid passphrase")
    {
        ". Verify the passphrase matches the container's keyslot"
    } else if lower.contains("permission denied") || lower.contains("operation not permitted") {
        ". This usually requires elevated privileges (run as root)"
    } else if lower.contains("no such file")
        || lower.contains("does not exist")
        || lower.contains("cannot open device")
    {
        ". Confirm the device is present and the configured path is correct"
    } else {
        ""
    };

    format!(
        "cryptsetup failed to open `{device}` as mapping `{mapper}`: {diagnostic}{hint} (exit code {})",
        out.status
    )
}

/// Resolve a tool binary: explicit override, well-known locations, then PATH.
fn resolve_binary(
    name: &str,
    configured: Option<&str>,
    candidates: &[&str],
) -> DatavaultResult<PathBuf> {
    if let Some(path) = configured.map(str::trim).filter(|path| !path.is_empty()) {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(DatavaultError::InvalidConfig(format!(
                "{name} binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate.to_path_buf());
    }

    for candidate in candidates {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    find_in_path(name).ok_or_else(|| {
        DatavaultError::InvalidConfig(format!(
            "unable to locate {name} binary; tried {candidates:?} and PATH"
        ))
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    })
}
