use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub path: PathBuf,
    pub sha256: String,
    pub byte_size: usize,
    /// The file already held identical bytes; nothing was rewritten.
    pub unchanged: bool,
}

/// Writes rendered configuration so readers never observe a partial document.
#[derive(Debug, Clone, Default)]
pub struct DocumentWriter;

impl DocumentWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Write via a sibling temp file and rename over `path`.
    pub async fn write(&self, path: impl AsRef<Path>, bytes: &[u8]) -> anyhow::Result<StoredDocument> {
        let path = path.as_ref();
        let sha256 = Self::digest(bytes);
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating output directory {}", parent.display()))?;

        if fs::try_exists(path)
            .await
            .with_context(|| format!("checking output path {}", path.display()))?
        {
            let existing = fs::read(path)
                .await
                .with_context(|| format!("reading existing document {}", path.display()))?;
            if Self::digest(&existing) == sha256 {
                return Ok(StoredDocument {
                    path: path.to_path_buf(),
                    sha256,
                    byte_size: bytes.len(),
                    unchanged: true,
                });
            }
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp document {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp document {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp document {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp document {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }

        Ok(StoredDocument {
            path: path.to_path_buf(),
            sha256,
            byte_size: bytes.len(),
            unchanged: false,
        })
    }
}
