use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use shared::types::Device;

/// Read the snapshot file. Ok(None) when the file does not exist.
pub fn read_snapshot(path: &Path) -> Result<Option<Vec<Device>>> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read snapshot: {}", path.display()))
        }
    };

    let devices = serde_json::from_slice(&contents)
        .with_context(|| format!("Malformed snapshot: {}", path.display()))?;

    Ok(Some(devices))
}

/// Rewrite the whole snapshot. The new content is written next to the
/// target and renamed over it, so readers see either the old or new file.
pub fn write_snapshot(path: &Path, devices: &[Device]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let json = serde_json::to_vec_pretty(devices)
        .context("Failed to serialize devices")?;

    let tmp = temp_path(path);
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace snapshot: {}", path.display()))?;

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_snapshot(&dir.path().join("printers.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_write_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("printers.json");
        let device = Device {
            name: "Printer1".to_string(),
            port: 80,
            ..Default::default()
        };

        write_snapshot(&path, &[device.clone()]).unwrap();

        assert!(path.exists());
        assert!(!temp_path(&path).exists());
        assert_eq!(read_snapshot(&path).unwrap(), Some(vec![device]));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printers.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(read_snapshot(&path).is_err());
    }
}
