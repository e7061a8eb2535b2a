//! Configuration model and helpers used by datavault binaries.

use crate::error::{DatavaultError, DatavaultResult};
use directories_next::ProjectDirs;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/datavault.toml";
const BOOTSTRAP_FILE_NAME: &str = "datavault.toml";
const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "Datavault";
const APP_NAME: &str = "datavault";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
}

/// Lightweight sanity check that a mapper name is usable under /dev/mapper.
pub fn looks_like_mapper_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return false;
    }
    trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
}

/// The volume identity: which device to encrypt and where it surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Volume {
    /// Raw block device carrying the encrypted container.
    pub device_path: String,

    /// Name the opened container is exposed under in /dev/mapper.
    pub mapper_name: String,

    /// Filesystem path where the decrypted volume is mounted.
    pub mount_point: String,

    /// SSH public key file embedded into the LUKS header token.
    pub key_file: String,
}

/// Timeouts and other knobs for external tool invocations.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CryptoCfg {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for CryptoCfg {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Optional overrides for the external tool binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Tools {
    #[serde(default)]
    pub cryptsetup_path: Option<String>,

    #[serde(default)]
    pub mkfs_path: Option<String>,

    #[serde(default)]
    pub mount_path: Option<String>,

    #[serde(default)]
    pub umount_path: Option<String>,
}

/// One subdirectory created under the mount point after a fresh setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LayoutDir {
    /// Directory name relative to the mount point.
    pub name: String,

    #[serde(default)]
    pub owner_uid: Option<u32>,

    #[serde(default)]
    pub owner_gid: Option<u32>,

    /// Octal permission string, e.g. "0755".
    #[serde(default)]
    pub mode: Option<String>,
}

impl LayoutDir {
    /// Decode the configured octal mode, when present and well-formed.
    pub fn parsed_mode(&self) -> Option<u32> {
        parse_octal_mode(self.mode.as_deref()?)
    }
}

pub(crate) fn parse_octal_mode(mode: &str) -> Option<u32> {
    let digits = mode.trim().trim_start_matches("0o");
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

fn default_layout() -> Vec<LayoutDir> {
    vec![
        LayoutDir {
            name: "data".to_string(),
            owner_uid: Some(1000),
            owner_gid: Some(1000),
            mode: None,
        },
        LayoutDir {
            name: "logs".to_string(),
            owner_uid: Some(1000),
            owner_gid: Some(1000),
            mode: Some("0755".to_string()),
        },
        LayoutDir {
            name: "spool".to_string(),
            owner_uid: None,
            owner_gid: None,
            mode: None,
        },
    ]
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatavaultConfig {
    pub volume: Volume,

    #[serde(default)]
    pub crypto: CryptoCfg,

    #[serde(default)]
    pub tools: Tools,

    #[serde(default = "default_layout")]
    pub layout: Vec<LayoutDir>,

    #[serde(skip)]
    #[schemars(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    #[schemars(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl DatavaultConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the per-user configuration path used for bootstrapping.
    pub fn user_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Load configuration from disk, creating a bootstrap copy when missing.
    ///
    /// If the requested path does not exist, a bootstrap template is
    /// materialised there. When the caller requests the global default and
    /// the process lacks permission to create it, a per-user configuration
    /// is written to the platform config directory instead.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> DatavaultResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        match ensure_bootstrap_file(target) {
            Ok(created) => {
                if created {
                    info!("datavault config bootstrap created at {}", target.display());
                }
                Self::load(target)
            }
            Err(err) => {
                if target != Self::default_path() {
                    return Err(DatavaultError::InvalidConfig(format!(
                        "failed to initialise configuration at {}: {err}",
                        target.display()
                    )));
                }

                let user_path = Self::user_config_path().ok_or_else(|| {
                    DatavaultError::InvalidConfig(
                        "unable to determine user configuration directory; \
                        create /etc/datavault.toml manually"
                            .to_string(),
                    )
                })?;

                let created_user = ensure_bootstrap_file(&user_path).map_err(|io_err| {
                    DatavaultError::InvalidConfig(format!(
                        "failed to prepare bootstrap configuration at {}: {io_err}",
                        user_path.display()
                    ))
                })?;

                if created_user {
                    info!(
                        "datavault config bootstrap created at {}",
                        user_path.display()
                    );
                }

                warn!(
                    "configuration missing at {}; using per-user bootstrap at {}",
                    target.display(),
                    user_path.display()
                );

                Self::load(&user_path)
            }
        }
    }

    /// Read a config file from disk, detect format, and validate basics.
    pub fn load<P: AsRef<Path>>(path: P) -> DatavaultResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_toml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("toml")
        );
        let mut cfg = if is_toml {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.format = if is_toml {
            ConfigFormat::Toml
        } else {
            ConfigFormat::Yaml
        };

        if cfg.volume.device_path.trim().is_empty() {
            return Err(DatavaultError::InvalidConfig(
                "volume.device_path must name a block device".to_string(),
            ));
        }

        Ok(cfg)
    }

    /// Perform a best-effort validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.volume.device_path.trim().is_empty() {
            issues.push("volume.device_path must name a block device".to_string());
        } else if !self.volume.device_path.starts_with('/') {
            issues.push(format!(
                "volume.device_path must be an absolute path: {}",
                self.volume.device_path
            ));
        }

        if !looks_like_mapper_name(&self.volume.mapper_name) {
            issues.push(format!(
                "volume.mapper_name is not a valid mapper name: {}",
                self.volume.mapper_name
            ));
        }

        if !self.volume.mount_point.starts_with('/') {
            issues.push(format!(
                "volume.mount_point must be an absolute path: {}",
                self.volume.mount_point
            ));
        }

        if self.volume.key_file.trim().is_empty() {
            issues.push("volume.key_file must point at the operator public key".to_string());
        }

        if self.crypto.timeout_secs == 0 {
            issues.push("crypto.timeout_secs must be at least 1".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for dir in &self.layout {
            let name = dir.name.trim();
            if name.is_empty() {
                issues.push("layout entry has an empty name".to_string());
                continue;
            }
            if name.starts_with('/') || name.split('/').any(|seg| seg == "..") {
                issues.push(format!(
                    "layout entry must be a relative path inside the mount point: {name}"
                ));
            }
            if !seen.insert(name.to_string()) {
                issues.push(format!("duplicate layout entry detected: {name}"));
            }
            if let Some(mode) = dir.mode.as_deref() {
                if parse_octal_mode(mode).is_none() {
                    issues.push(format!(
                        "layout entry {name} has invalid octal mode: {mode}"
                    ));
                }
            }
            if dir.owner_uid.is_some() != dir.owner_gid.is_some() {
                issues.push(format!(
                    "layout entry {name} must set owner_uid and owner_gid together"
                ));
            }
        }

        issues
    }

    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(&self.volume.device_path)
    }

    pub fn mount_point(&self) -> PathBuf {
        PathBuf::from(&self.volume.mount_point)
    }

    pub fn key_file(&self) -> PathBuf {
        PathBuf::from(&self.volume.key_file)
    }

    pub fn mapper_name(&self) -> &str {
        &self.volume.mapper_name
    }

    /// Translate the stored timeout into a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.crypto.timeout_secs)
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> DatavaultResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

/// Render the commented bootstrap configuration template.
pub fn bootstrap_template() -> String {
    "# Auto-generated datavault configuration bootstrap.\n\
     # Point [volume] at the raw device before running `datavault setup`.\n\
     \n\
     [volume]\n\
     # Raw block device that will carry the encrypted container.\n\
     device_path = \"/dev/sdb\"\n\
     # Name the opened container appears under in /dev/mapper.\n\
     mapper_name = \"datavault\"\n\
     # Where the decrypted filesystem is mounted.\n\
     mount_point = \"/mnt/datavault\"\n\
     # Operator SSH public key, submitted out-of-band before setup.\n\
     key_file = \"/etc/datavault/operator_key.pub\"\n\
     \n\
     [crypto]\n\
     timeout_secs = 10\n\
     \n\
     [tools]\n\
     # Uncomment to pin tool locations instead of probing well-known paths.\n\
     # cryptsetup_path = \"/usr/sbin/cryptsetup\"\n\
     # mkfs_path = \"/usr/sbin/mkfs.ext4\"\n\
     # mount_path = \"/usr/bin/mount\"\n\
     # umount_path = \"/usr/bin/umount\"\n\
     \n\
     # Subdirectories created under the mount point after a fresh setup.\n\
     [[layout]]\n\
     name = \"data\"\n\
     owner_uid = 1000\n\
     owner_gid = 1000\n\
     \n\
     [[layout]]\n\
     name = \"logs\"\n\
     owner_uid = 1000\n\
     owner_gid = 1000\n\
     mode = \"0755\"\n\
     \n\
     [[layout]]\n\
     name = \"spool\"\n"
        .to_string()
}

fn ensure_bootstrap_file(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(mut file) => {
            file.write_all(bootstrap_template().as_bytes())?;
            file.flush()?;
            #[cfg(unix)]
            {
                let mode = if path.starts_with("/etc/") { 0o640 } else { 0o600 };
                fs::set_permissions(path, PermissionsExt::from_mode(mode))?;
            }
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_config() -> DatavaultConfig {
        DatavaultConfig {
            volume: Volume {
                device_path: "/dev/sdb".to_string(),
                mapper_name: "datavault".to_string(),
                mount_point: "/mnt/datavault".to_string(),
                key_file: "/etc/datavault/operator_key.pub".to_string(),
            },
            crypto: CryptoCfg::default(),
            tools: Tools::default(),
            layout: default_layout(),
            path: PathBuf::new(),
            format: ConfigFormat::Toml,
        }
    }

    #[test]
    fn bootstrap_template_parses_and_validates() {
        let cfg: DatavaultConfig = toml::from_str(&bootstrap_template()).unwrap();
        assert_eq!(cfg.volume.mapper_name, "datavault");
        assert_eq!(cfg.layout.len(), 3);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn default_layout_matches_provisioning_contract() {
        let layout = default_layout();
        assert_eq!(layout.len(), 3);
        let owned: Vec<_> = layout
            .iter()
            .filter(|dir| dir.owner_uid == Some(1000) && dir.owner_gid == Some(1000))
            .collect();
        assert_eq!(owned.len(), 2);
        assert_eq!(
            owned.iter().filter(|dir| dir.parsed_mode() == Some(0o755)).count(),
            1
        );
    }

    #[test]
    fn load_detects_toml_and_preserves_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datavault.toml");
        fs::write(&path, bootstrap_template()).unwrap();

        let cfg = DatavaultConfig::load(&path).unwrap();
        assert_eq!(cfg.path, path);
        assert!(matches!(cfg.format, ConfigFormat::Toml));
    }

    #[test]
    fn load_or_bootstrap_materialises_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datavault.toml");

        let cfg = DatavaultConfig::load_or_bootstrap(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.volume.mount_point, "/mnt/datavault");
    }

    #[test]
    fn validate_flags_bad_entries() {
        let mut cfg = sample_config();
        cfg.volume.device_path = "sdb".to_string();
        cfg.volume.mapper_name = "bad name".to_string();
        cfg.crypto.timeout_secs = 0;
        cfg.layout.push(LayoutDir {
            name: "data".to_string(),
            owner_uid: Some(1000),
            owner_gid: None,
            mode: Some("99".to_string()),
        });

        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.contains("device_path")));
        assert!(issues.iter().any(|i| i.contains("mapper_name")));
        assert!(issues.iter().any(|i| i.contains("timeout_secs")));
        assert!(issues.iter().any(|i| i.contains("duplicate layout entry")));
        assert!(issues.iter().any(|i| i.contains("invalid octal mode")));
        assert!(issues.iter().any(|i| i.contains("owner_uid and owner_gid")));
    }

    #[test]
    fn mapper_name_validator_accepts_sane_names() {
        assert!(looks_like_mapper_name("datavault"));
        assert!(looks_like_mapper_name("vault_0.primary"));

        assert!(!looks_like_mapper_name(""));
        assert!(!looks_like_mapper_name("-vault"));
        assert!(!looks_like_mapper_name("vault/0"));
        assert!(!looks_like_mapper_name("vault volume"));
    }

    #[test]
    fn octal_mode_parser_rejects_garbage() {
        assert_eq!(parse_octal_mode("0755"), Some(0o755));
        assert_eq!(parse_octal_mode("0o700"), Some(0o700));
        assert_eq!(parse_octal_mode("99"), None);
        assert_eq!(parse_octal_mode(""), None);
        assert_eq!(parse_octal_mode("77777"), None);
    }
}
