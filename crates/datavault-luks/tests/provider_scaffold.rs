//! End-to-end provisioning runs against fake tool binaries.
//!
//! Shell stubs stand in for `cryptsetup`/`mkfs.ext4`/`mount`/`umount` and
//! append every invocation to a shared log, so these tests assert the
//! exact command sequence without touching a real block device.

use datavault_core::config::{
    ConfigFormat, CryptoCfg, DatavaultConfig, Tools, Volume,
};
use datavault_core::error::{DatavaultError, DatavaultResult};
use datavault_core::token::Token;
use datavault_core::workflow;
use datavault_luks::SystemVolumeProvider;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn write_executable(path: &Path, contents: &str) -> DatavaultResult<()> {
    fs::write(path, contents)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

struct FakeHost {
    tmp: TempDir,
    config: DatavaultConfig,
    command_log: PathBuf,
    state_dir: PathBuf,
}

impl FakeHost {
    /// Stand up stub binaries plus a config pointing at them.
    ///
    /// `isluks_exit` selects the branch; `mkfs_exit` lets tests inject a
    /// filesystem-creation failure.
    fn new(isluks_exit: i32, mkfs_exit: i32) -> DatavaultResult<Self> {
        let tmp = tempdir()?;
        let bin_dir = tmp.path().join("bin");
        let state_dir = tmp.path().join("state");
        fs::create_dir_all(&bin_dir)?;
        fs::create_dir_all(&state_dir)?;

        let command_log = tmp.path().join("commands.log");

        let cryptsetup_path = bin_dir.join("cryptsetup");
        write_executable(
            &cryptsetup_path,
            &format!(
                r#"#!/bin/sh
LOG="{log}"
STATE="{state}"
echo "cryptsetup $*" >> "$LOG"
case "$1" in
  isLuks)
    exit {isluks_exit}
    ;;
  luksFormat)
    cat > "$STATE/passphrase.format"
    exit 0
    ;;
  open)
    cat > "$STATE/passphrase.open"
    exit 0
    ;;
  close)
    exit 0
    ;;
  token)
    cat > "$STATE/token.json"
    exit 0
    ;;
  *)
    echo "unsupported action $1" 1>&2
    exit 1
    ;;
esac
"#,
                log = command_log.display(),
                state = state_dir.display(),
                isluks_exit = isluks_exit,
            ),
        )?;

        let mkfs_path = bin_dir.join("mkfs.ext4");
        write_executable(
            &mkfs_path,
            &format!(
                "#!/bin/sh\necho \"mkfs.ext4 $*\" >> \"{log}\"\nexit {mkfs_exit}\n",
                log = command_log.display(),
                mkfs_exit = mkfs_exit,
            ),
        )?;

        let mount_path = bin_dir.join("mount");
        write_executable(
            &mount_path,
            &format!(
                "#!/bin/sh\necho \"mount $*\" >> \"{log}\"\nexit 0\n",
                log = command_log.display(),
            ),
        )?;

        let umount_path = bin_dir.join("umount");
        write_executable(
            &umount_path,
            &format!(
                "#!/bin/sh\necho \"umount $*\" >> \"{log}\"\nexit 0\n",
                log = command_log.display(),
            ),
        )?;

        let key_file = tmp.path().join("operator_key.pub");
        fs::write(&key_file, "ssh-ed25519 AAAAC3Nza... operator@host\n")?;

        let config = DatavaultConfig {
            volume: Volume {
                device_path: "/dev/fake-vdb".to_string(),
                mapper_name: "vault".to_string(),
                mount_point: tmp.path().join("mnt").to_string_lossy().into_owned(),
                key_file: key_file.to_string_lossy().into_owned(),
            },
            crypto: CryptoCfg { timeout_secs: 5 },
            tools: Tools {
                cryptsetup_path: Some(cryptsetup_path.to_string_lossy().into_owned()),
                mkfs_path: Some(mkfs_path.to_string_lossy().into_owned()),
                mount_path: Some(mount_path.to_string_lossy().into_owned()),
                umount_path: Some(umount_path.to_string_lossy().into_owned()),
            },
            layout: Vec::new(),
            path: PathBuf::from("/etc/datavault.toml"),
            format: ConfigFormat::Toml,
        };

        Ok(Self {
            tmp,
            config,
            command_log,
            state_dir,
        })
    }

    fn logged_commands(&self) -> Vec<String> {
        fs::read_to_string(&self.command_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[test]
fn construction_fails_when_cryptsetup_is_missing() {
    let host = FakeHost::new(1, 0).unwrap();
    let mut config = host.config.clone();
    config.tools.cryptsetup_path =
        Some(host.tmp.path().join("absent/cryptsetup").to_string_lossy().into_owned());

    let err = SystemVolumeProvider::from_config(&config).unwrap_err();
    match err {
        DatavaultError::InvalidConfig(message) => {
            assert!(message.contains("cryptsetup binary not found"))
        }
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn initialize_run_sequences_the_external_commands() -> DatavaultResult<()> {
    let host = FakeHost::new(1, 0)?;
    let provider = SystemVolumeProvider::from_config(&host.config)?;

    let passphrase = b"correct horse battery staple";
    let report = workflow::provision(&host.config, &provider, passphrase)?;
    assert_eq!(report.title, "Initialized encrypted volume vault");

    let mount_point = host.config.volume.mount_point.clone();
    assert_eq!(
        host.logged_commands(),
        vec![
            "cryptsetup isLuks /dev/fake-vdb".to_string(),
            "cryptsetup luksFormat --type luks2 -q /dev/fake-vdb".to_string(),
            "cryptsetup open /dev/fake-vdb vault".to_string(),
            "mkfs.ext4 /dev/mapper/vault".to_string(),
            format!("mount /dev/mapper/vault {mount_point}"),
            "cryptsetup token import --token-id 1 /dev/fake-vdb".to_string(),
        ]
    );

    // The passphrase reaches cryptsetup intact via stdin, spaces included.
    let formatted_with = fs::read(host.state_dir.join("passphrase.format"))?;
    assert_eq!(formatted_with, passphrase);
    let opened_with = fs::read(host.state_dir.join("passphrase.open"))?;
    assert_eq!(opened_with, passphrase);

    // The header token carries the staged key text verbatim.
    let token: Token =
        serde_json::from_slice(&fs::read(host.state_dir.join("token.json"))?).unwrap();
    assert_eq!(token.kind, "user");
    assert!(token.keyslots.is_empty());
    assert_eq!(
        token.metadata(),
        Some("ssh-ed25519 AAAAC3Nza... operator@host\n")
    );

    Ok(())
}

#[test]
fn attach_run_opens_and_mounts_only() -> DatavaultResult<()> {
    let host = FakeHost::new(0, 0)?;
    let provider = SystemVolumeProvider::from_config(&host.config)?;

    let report = workflow::provision(&host.config, &provider, b"hunter2")?;
    assert_eq!(report.title, "Attached encrypted volume vault");

    let mount_point = host.config.volume.mount_point.clone();
    assert_eq!(
        host.logged_commands(),
        vec![
            "cryptsetup isLuks /dev/fake-vdb".to_string(),
            "cryptsetup open /dev/fake-vdb vault".to_string(),
            format!("mount /dev/mapper/vault {mount_point}"),
        ]
    );

    Ok(())
}

#[test]
fn filesystem_failure_closes_the_mapping() -> DatavaultResult<()> {
    let host = FakeHost::new(1, 1)?;
    let provider = SystemVolumeProvider::from_config(&host.config)?;

    let err = workflow::provision(&host.config, &provider, b"hunter2").unwrap_err();
    match err {
        DatavaultError::Provider(message) => assert!(message.contains("mkfs.ext4")),
        other => panic!("unexpected error variant: {other:?}"),
    }

    let commands = host.logged_commands();
    assert_eq!(
        commands.last().map(String::as_str),
        Some("cryptsetup close vault")
    );
    assert!(
        !commands.iter().any(|line| line.starts_with("mount ")),
        "nothing must be mounted after a failed mkfs: {commands:?}"
    );

    Ok(())
}
