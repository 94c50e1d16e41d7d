//! JobStore 実装
//!
//! - `MemoryJobStore`: プロセス内だけ。テストと非永続運用向け
//! - `FileJobStore`: 1 job = 1 JSON ファイル。temp に書いて fsync してから rename

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::JobId;
use crate::error::JobStoreError;
use crate::ports::JobStore;
use crate::queue::JobRecord;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load_all(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.values().cloned().collect())
    }

    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id, job.clone());
        Ok(())
    }

    async fn remove(&self, id: JobId) -> Result<(), JobStoreError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }
}

/// Directory of `<ulid>.json` files.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// Creates `dir` if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, JobStoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| io_error(&dir, source))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_ulid()))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> JobStoreError {
    JobStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn load_all(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| io_error(&self.dir, source))?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&self.dir, source))?
        {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .map_err(|source| io_error(&path, source))?;
                    let job: JobRecord = serde_json::from_slice(&bytes)
                        .map_err(|source| JobStoreError::Corrupt { path, source })?;
                    jobs.push(job);
                }
                // 書き込み途中で落ちた残骸
                Some("tmp") => {
                    warn!(path = %path.display(), "removing partial job file");
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "failed to remove partial job file");
                    }
                }
                _ => {}
            }
        }
        debug!(dir = %self.dir.display(), jobs = jobs.len(), "job files loaded");
        Ok(jobs)
    }

    async fn save(&self, job: &JobRecord) -> Result<(), JobStoreError> {
        let bytes = serde_json::to_vec_pretty(job).map_err(|source| JobStoreError::Encode {
            job_id: job.id,
            source,
        })?;
        let path = self.path_for(job.id);
        let tmp = path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|source| io_error(&tmp, source))?;
        file.write_all(&bytes)
            .await
            .map_err(|source| io_error(&tmp, source))?;
        file.sync_all()
            .await
            .map_err(|source| io_error(&tmp, source))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| io_error(&path, source))
    }

    async fn remove(&self, id: JobId) -> Result<(), JobStoreError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(&path, source)),
        }
    }
}
