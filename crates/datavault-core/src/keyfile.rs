//! Operator key file handling.
//!
//! The key file is produced out-of-band before provisioning runs; we only
//! ever read it. Its text is embedded verbatim (trailing newline included)
//! in the LUKS header token.

use crate::error::{DatavaultError, DatavaultResult};
use std::fs;
use std::path::Path;

/// Read the SSH public key at `path` as text.
///
/// The file must decode as UTF-8 and contain a non-blank body; anything
/// else is a structured `InvalidKeyFile` error naming the path.
pub fn read_public_key(path: &Path) -> DatavaultResult<String> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| invalid_key(path, "key file is not valid UTF-8"))?;
    if text.trim().is_empty() {
        return Err(invalid_key(path, "key file is empty"));
    }
    Ok(text)
}

fn invalid_key(path: &Path, reason: impl Into<String>) -> DatavaultError {
    DatavaultError::InvalidKeyFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
