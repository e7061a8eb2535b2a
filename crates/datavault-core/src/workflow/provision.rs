//! Setup/mount decision procedure and its cleanup discipline.
//!
//! One probe decides between two linear procedures: *initialize* formats a
//! fresh LUKS2 container, lays down a filesystem, and records the operator
//! key as a header token; *attach* opens an existing container and mounts
//! it. Failures abort the run and undo only what this run already opened.

use super::{event, WorkflowEvent, WorkflowLevel, WorkflowReport};
use crate::config::{DatavaultConfig, LayoutDir};
use crate::error::{DatavaultError, DatavaultResult};
use crate::keyfile;
use crate::mounts;
use crate::token::{Token, OPERATOR_TOKEN_ID};
use datavault_provider::VolumeProvider;
use log::{info, warn};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Provision the encrypted volume described by `config`.
///
/// Preconditions are checked before any mutation; afterwards a single
/// `isLuks` probe selects the branch. The passphrase reaches external
/// tools only through the provider's input streams.
pub fn provision<P>(
    config: &DatavaultConfig,
    provider: &P,
    passphrase: &[u8],
) -> DatavaultResult<WorkflowReport>
where
    P: VolumeProvider<Error = DatavaultError>,
{
    let mount_point = config.mount_point();
    let key_file = config.key_file();

    if mounts::mount_point_active(&mount_point)? {
        return Err(DatavaultError::Precondition(format!(
            "encrypted volume already set up: {} is mounted",
            mount_point.display()
        )));
    }

    if !key_file.exists() {
        return Err(DatavaultError::Precondition(format!(
            "operator key not staged at {}; submit the public key before provisioning",
            key_file.display()
        )));
    }

    if passphrase.is_empty() {
        return Err(DatavaultError::InvalidConfig(
            "passphrase cannot be empty".into(),
        ));
    }

    let mut events = Vec::new();
    let device = config.device_path();

    let container_present = provider.is_luks(&device)?;
    let title = if container_present {
        events.push(event(
            WorkflowLevel::Info,
            format!("Existing LUKS container detected on {}", device.display()),
        ));
        attach(config, provider, passphrase, &mut events)?;
        format!("Attached encrypted volume {}", config.mapper_name())
    } else {
        events.push(event(
            WorkflowLevel::Info,
            format!("No LUKS container on {}; initializing", device.display()),
        ));
        initialize(config, provider, passphrase, &mut events)?;
        format!("Initialized encrypted volume {}", config.mapper_name())
    };

    Ok(WorkflowReport { title, events })
}

/// Format, open, make the filesystem, mount, record the operator token,
/// and lay out the data directories.
fn initialize<P>(
    config: &DatavaultConfig,
    provider: &P,
    passphrase: &[u8],
    events: &mut Vec<WorkflowEvent>,
) -> DatavaultResult<()>
where
    P: VolumeProvider<Error = DatavaultError>,
{
    let device = config.device_path();
    let mapper = config.mapper_name();
    let mount_point = config.mount_point();

    info!("formatting {} with LUKS2", device.display());
    provider.format_luks2(&device, passphrase)?;
    events.push(event(
        WorkflowLevel::Info,
        format!("Formatted {} as LUKS2", device.display()),
    ));

    provider.open(&device, mapper, passphrase)?;
    let mapper_device = provider.mapper_device(mapper);

    info!("creating ext4 filesystem on {}", mapper_device.display());
    if let Err(err) = provider.make_filesystem(&mapper_device) {
        close_quietly(provider, mapper, events);
        return Err(err);
    }
    events.push(event(
        WorkflowLevel::Info,
        format!("Created ext4 filesystem on {}", mapper_device.display()),
    ));

    if let Err(err) = mount_at(provider, &mapper_device, &mount_point) {
        close_quietly(provider, mapper, events);
        return Err(err);
    }
    events.push(event(
        WorkflowLevel::Info,
        format!("Mounted {} at {}", mapper_device.display(), mount_point.display()),
    ));

    // The filesystem is mounted from here on; failures unwind fully.
    if let Err(err) = import_operator_token(config, provider, &device, events) {
        unmount_quietly(provider, &mount_point, events);
        close_quietly(provider, mapper, events);
        return Err(err);
    }

    if let Err(err) = apply_layout(&mount_point, &config.layout, events) {
        unmount_quietly(provider, &mount_point, events);
        close_quietly(provider, mapper, events);
        return Err(err);
    }

    events.push(event(
        WorkflowLevel::Success,
        format!(
            "Encrypted volume initialized and mounted at {}",
            mount_point.display()
        ),
    ));
    Ok(())
}

/// Open the existing container and mount it.
fn attach<P>(
    config: &DatavaultConfig,
    provider: &P,
    passphrase: &[u8],
    events: &mut Vec<WorkflowEvent>,
) -> DatavaultResult<()>
where
    P: VolumeProvider<Error = DatavaultError>,
{
    let device = config.device_path();
    let mapper = config.mapper_name();
    let mount_point = config.mount_point();

    // Nothing to clean up if the open itself fails.
    provider.open(&device, mapper, passphrase)?;
    let mapper_device = provider.mapper_device(mapper);

    if let Err(err) = mount_at(provider, &mapper_device, &mount_point) {
        close_quietly(provider, mapper, events);
        return Err(err);
    }

    events.push(event(
        WorkflowLevel::Success,
        format!("Encrypted volume mounted at {}", mount_point.display()),
    ));
    Ok(())
}

/// Create the mount point (0755) and mount the mapper device there.
fn mount_at<P>(
    provider: &P,
    mapper_device: &Path,
    mount_point: &Path,
) -> DatavaultResult<()>
where
    P: VolumeProvider<Error = DatavaultError>,
{
    fs::create_dir_all(mount_point)?;
    fs::set_permissions(mount_point, fs::Permissions::from_mode(0o755))?;
    provider.mount(mapper_device, mount_point)
}

/// Embed the operator's public key in the LUKS header as a metadata token.
fn import_operator_token<P>(
    config: &DatavaultConfig,
    provider: &P,
    device: &Path,
    events: &mut Vec<WorkflowEvent>,
) -> DatavaultResult<()>
where
    P: VolumeProvider<Error = DatavaultError>,
{
    let key_text = keyfile::read_public_key(&config.key_file())?;
    let token_json = serde_json::to_string(&Token::operator_key(&key_text))?;

    info!("recording operator key in the LUKS header");
    provider.import_token(device, OPERATOR_TOKEN_ID, &token_json)?;
    events.push(event(
        WorkflowLevel::Info,
        format!("Recorded operator key as header token {OPERATOR_TOKEN_ID}"),
    ));
    Ok(())
}

/// Create the configured subdirectories and apply ownership and modes.
fn apply_layout(
    mount_point: &Path,
    layout: &[LayoutDir],
    events: &mut Vec<WorkflowEvent>,
) -> DatavaultResult<()> {
    if layout.is_empty() {
        return Ok(());
    }

    for dir in layout {
        let path = mount_point.join(&dir.name);
        fs::create_dir_all(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

        if let (Some(uid), Some(gid)) = (dir.owner_uid, dir.owner_gid) {
            std::os::unix::fs::chown(&path, Some(uid), Some(gid))?;
        }
        if let Some(mode) = dir.parsed_mode() {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        }
    }

    events.push(event(
        WorkflowLevel::Info,
        format!(
            "Prepared {} data directories under {}",
            layout.len(),
            mount_point.display()
        ),
    ));
    Ok(())
}

/// Best-effort unmount; failures are reported but never override the
/// error that triggered cleanup.
fn unmount_quietly<P>(provider: &P, mount_point: &Path, events: &mut Vec<WorkflowEvent>)
where
    P: VolumeProvider<Error = DatavaultError>,
{
    if let Err(err) = provider.unmount(mount_point) {
        warn!("cleanup: failed to unmount {}: {err}", mount_point.display());
        events.push(event(
            WorkflowLevel::Warn,
            format!("Cleanup could not unmount {}: {err}", mount_point.display()),
        ));
    }
}

/// Best-effort mapper close, same contract as `unmount_quietly`.
fn close_quietly<P>(provider: &P, mapper: &str, events: &mut Vec<WorkflowEvent>)
where
    P: VolumeProvider<Error = DatavaultError>,
{
    if let Err(err) = provider.close(mapper) {
        warn!("cleanup: failed to close mapping {mapper}: {err}");
        events.push(event(
            WorkflowLevel::Warn,
            format!("Cleanup could not close mapping {mapper}: {err}"),
        ));
    }
}
