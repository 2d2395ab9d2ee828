//! Owner-only JSON persistence.
//!
//! Every store writes through here: temp file in the same directory, then an
//! atomic rename, so a crash never leaves a torn document. Files are mode
//! `0o600` and their parent directories `0o700` (Unix; elsewhere the
//! permission bits are skipped).

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Create `path`'s parent (mode `0o700`) if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            set_mode(parent, 0o700)?;
        }
    }
    Ok(())
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    fs::write(tmp, json)?;
    set_mode(tmp, 0o600)?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// Read and parse `path`; `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Append one line to `path`, creating it owner-only if needed.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;

    ensure_parent_dir(path)?;
    let created = !path.exists();
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    if created {
        set_mode(path, 0o600)?;
    }
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}
