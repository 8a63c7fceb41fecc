use std::fs;
use std::path::{Path, PathBuf};
use crate::core::error::Result;

/// Directory structure for durable engine state.
///
/// ```text
/// <root>/indices/<name>/metadata.json   index metadata
/// <root>/indices/<name>/terms/          chunked posting files + catalog.bin
/// <root>/indices/<name>/docs.log        document body append log
/// <root>/indices/<name>/stats.bin       committed stats snapshot
/// <root>/payloads/                      out-of-band persistence payloads
/// <root>/pending/                       pending persistence job refs
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub root: PathBuf,
    pub indices_dir: PathBuf,
    pub payloads_dir: PathBuf,
    pub pending_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let indices_dir = root.join("indices");
        let payloads_dir = root.join("payloads");
        let pending_dir = root.join("pending");

        fs::create_dir_all(&indices_dir)?;
        fs::create_dir_all(&payloads_dir)?;
        fs::create_dir_all(&pending_dir)?;

        Ok(StorageLayout {
            root,
            indices_dir,
            payloads_dir,
            pending_dir,
        })
    }

    pub fn index_dir(&self, index: &str) -> PathBuf {
        self.indices_dir.join(index)
    }

    pub fn metadata_path(&self, index: &str) -> PathBuf {
        self.index_dir(index).join("metadata.json")
    }

    pub fn terms_dir(&self, index: &str) -> PathBuf {
        self.index_dir(index).join("terms")
    }

    pub fn catalog_path(&self, index: &str) -> PathBuf {
        self.terms_dir(index).join("catalog.bin")
    }

    pub fn term_chunk_path(&self, index: &str, file_stem: &str) -> PathBuf {
        self.terms_dir(index).join(format!("{}.post", file_stem))
    }

    pub fn docs_log_path(&self, index: &str) -> PathBuf {
        self.index_dir(index).join("docs.log")
    }

    pub fn stats_path(&self, index: &str) -> PathBuf {
        self.index_dir(index).join("stats.bin")
    }

    pub fn payload_path(&self, persistence_id: &str) -> PathBuf {
        self.payloads_dir.join(format!("{}.bin", persistence_id))
    }

    pub fn pending_path(&self, file_name: &str) -> PathBuf {
        self.pending_dir.join(file_name)
    }

    /// Names of index directories currently on disk.
    pub fn list_index_dirs(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.indices_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Atomic file replacement: write to a sibling temp file, then rename.
/// Readers see either the old content or the new, never a partial mix.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
