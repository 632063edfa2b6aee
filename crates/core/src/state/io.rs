//! # IO Utilities
//!
//! File system helpers for the `.homescout` runtime directory and the
//! report output directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Get the runtime directory path (.homescout)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("HOMESCOUT_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".homescout")
}

/// Ensure the runtime directory exists
pub async fn ensure_runtime_dir() -> Result<PathBuf> {
    let path = get_runtime_path();
    fs::create_dir_all(&path)
        .await
        .with_context(|| format!("Failed to create runtime directory: {:?}", path))?;
    Ok(path)
}

/// Write a report file under `dir`, creating parent directories
pub async fn write_output_file(
    dir: impl AsRef<Path>,
    relative_path: impl AsRef<Path>,
    content: &[u8],
) -> Result<PathBuf> {
    let path = dir.as_ref().join(relative_path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))?;
    Ok(path)
}

/// Pretty-print a JSON value into `dir/relative_path`
pub async fn write_json_file(
    dir: impl AsRef<Path>,
    relative_path: impl AsRef<Path>,
    value: &serde_json::Value,
) -> Result<PathBuf> {
    let content = serde_json::to_string_pretty(value)?;
    write_output_file(dir, relative_path, content.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_runtime_path() {
        if std::env::var("HOMESCOUT_RUNTIME_PATH").is_err() {
            assert!(get_runtime_path().ends_with(".homescout"));
        }
    }

    #[tokio::test]
    async fn test_write_json_file() {
        let dir = ".homescout/test_io_output";
        let value = serde_json::json!({"summary": {"properties_found": 2}});

        let path = write_json_file(dir, "nested/report.json", &value)
            .await
            .unwrap();
        let read_back = fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&read_back).unwrap();
        assert_eq!(parsed["summary"]["properties_found"], 2);

        let _ = fs::remove_dir_all(dir).await;
    }
}
