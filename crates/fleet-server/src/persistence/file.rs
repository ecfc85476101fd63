//! JSON snapshot files with numbered rotation.
//!
//! `fleet_state.json` is always the newest document; older ones are
//! shifted to `fleet_state.json.1`, `.2`, ... up to the configured count.

use anyhow::{Context, Result};
use fleet_core::Snapshot;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    keep: usize,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            path: path.into(),
            keep: keep.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// Write the snapshot through a temp file and rename it into place so a
    /// crash never leaves a half-written document behind.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let body = snapshot.to_json()?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;

        self.rotate().await?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }

    async fn rotate(&self) -> Result<()> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        if self.keep == 1 {
            return Ok(());
        }

        let oldest = self.rotated(self.keep - 1);
        if fs::try_exists(&oldest).await.unwrap_or(false) {
            fs::remove_file(&oldest).await?;
        }
        for index in (1..self.keep - 1).rev() {
            let from = self.rotated(index);
            if fs::try_exists(&from).await.unwrap_or(false) {
                fs::rename(&from, self.rotated(index + 1)).await?;
            }
        }
        fs::rename(&self.path, self.rotated(1)).await?;
        Ok(())
    }

    /// Newest snapshot on disk, if any.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let snapshot = Snapshot::from_json(&raw)
                    .with_context(|| format!("parsing {}", self.path.display()))?;
                Ok(Some(snapshot))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}
