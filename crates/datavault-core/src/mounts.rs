//! Mount-table inspection.
//!
//! Provisioning must refuse to run when the target mount point is already
//! active. We read `/proc/mounts` directly; tests point the reader at a
//! snapshot file via the override variable.

use crate::error::DatavaultResult;
use std::env;
use std::fs;
use std::path::Path;

pub const MOUNTS_OVERRIDE_ENV: &str = "DATAVAULT_MOUNTS_PATH";

/// Return whether `mount_point` appears as an active mount.
pub fn mount_point_active(mount_point: &Path) -> DatavaultResult<bool> {
    let table = read_mount_table()?;
    let wanted = mount_point.to_string_lossy();
    Ok(table_contains_mount_point(&table, wanted.as_ref()))
}

fn read_mount_table() -> DatavaultResult<String> {
    if let Ok(path) = env::var(MOUNTS_OVERRIDE_ENV) {
        return Ok(fs::read_to_string(path)?);
    }
    Ok(fs::read_to_string("/proc/mounts")?)
}

fn table_contains_mount_point(table: &str, mount_point: &str) -> bool {
    for line in table.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let Some(raw_mount_point) = fields.next() else {
            continue;
        };
        if unescape_mount_field(raw_mount_point) == mount_point {
            return true;
        }
    }
    false
}

/// Decode the octal escapes (`\040` etc.) the kernel uses in mount fields.
fn unescape_mount_field(input: &str) -> String {
    let mut chars = input.chars().peekable();
    let mut output = String::with_capacity(input.len());

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let mut oct = String::new();
            for _ in 0..3 {
                if let Some(next) = chars.peek() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                }
                if let Some(next) = chars.next() {
                    oct.push(next);
                }
            }
            if oct.len() == 3 {
                if let Ok(value) = u8::from_str_radix(&oct, 8) {
                    output.push(value as char);
                    continue;
                }
            }
            output.push('\\');
            output.push_str(&oct);
        } else {
            output.push(ch);
        }
    }

    output
}
