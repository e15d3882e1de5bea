use std::{io::ErrorKind, path::PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use zone_common::decode_tag_response;

#[async_trait]
pub trait TagReader: Send + Sync {
    /// Fails when this host cannot read tags at all.
    async fn check_hardware(&self) -> anyhow::Result<()>;
    async fn read(&self) -> anyhow::Result<String>;
}

/// Reads the raw tag response dumped to a file by an external reader.
pub struct FileTagReader {
    path: PathBuf,
}

impl FileTagReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TagReader for FileTagReader {
    async fn check_hardware(&self) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let metadata = tokio::fs::metadata(&dir)
            .await
            .with_context(|| format!("tag directory {} is not available", dir.display()))?;
        if !metadata.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        Ok(())
    }

    async fn read(&self) -> anyhow::Result<String> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => bail!("no tag in range"),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        Ok(decode_tag_response(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn reads_framed_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tag.bin");
        let mut bytes = b"zoneId=1;ssid=Farm;apiBase=http://10.0.0.1:3090".to_vec();
        bytes.extend([0x90, 0x00]);
        std::fs::write(&path, bytes).unwrap();

        let reader = FileTagReader::new(path);
        reader.check_hardware().await.unwrap();
        assert_eq!(
            reader.read().await.unwrap(),
            "zoneId=1;ssid=Farm;apiBase=http://10.0.0.1:3090"
        );
    }

    #[tokio::test]
    async fn missing_file_means_no_tag() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileTagReader::new(dir.path().join("tag.bin"));

        let err = reader.read().await.unwrap_err();
        assert_eq!(err.to_string(), "no tag in range");
    }

    #[tokio::test]
    async fn missing_directory_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileTagReader::new(dir.path().join("absent").join("tag.bin"));
        assert!(reader.check_hardware().await.is_err());
    }

    #[tokio::test]
    async fn not_found_status_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tag.bin");
        std::fs::write(&path, [0x6A, 0x82]).unwrap();

        let err = FileTagReader::new(path).read().await.unwrap_err();
        assert!(err.to_string().contains("application not found"));
    }
}
