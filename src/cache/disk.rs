//! The disk tier: one file per entry under `storage_path/<bucket>/<key>.cache`,
//! TTL checked via file mtime (§4.3, §6 disk cache layout).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::AppError;
use crate::model::Bucket;

use super::{CacheKey, Payload};

pub struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, bucket: Bucket, key: &CacheKey) -> PathBuf {
        self.root.join(bucket.as_str()).join(format!("{}.cache", key.0))
    }

    /// Best-effort write; errors are logged by the caller, never propagated (§4.3 Set protocol).
    pub fn write(&self, bucket: Bucket, key: &CacheKey, payload: &Payload) -> Result<(), AppError> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::CacheCorrupt {
                key: key.0.clone(),
                reason: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        let bytes = bincode::serialize(payload).map_err(|e| AppError::CacheCorrupt {
            key: key.0.clone(),
            reason: format!("encode failed: {e}"),
        })?;
        std::fs::write(&path, bytes).map_err(|e| AppError::CacheCorrupt {
            key: key.0.clone(),
            reason: format!("write failed: {e}"),
        })
    }

    /// Returns the payload if the file exists and its mtime is within `ttl`. A corrupt
    /// file is deleted and treated as absent rather than propagated (§4.3, §7).
    pub fn read(&self, bucket: Bucket, key: &CacheKey, ttl: Duration) -> Option<Payload> {
        let path = self.path_for(bucket, key);
        let metadata = std::fs::metadata(&path).ok()?;
        let modified = metadata.modified().ok()?;
        if SystemTime::now().duration_since(modified).unwrap_or_default() > ttl {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        let bytes = std::fs::read(&path).ok()?;
        match bincode::deserialize::<Payload>(&bytes) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(key = %key.0, error = %e, "corrupt disk cache entry, dropping");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    pub fn delete(&self, bucket: Bucket, key: &CacheKey) {
        let _ = std::fs::remove_file(self.path_for(bucket, key));
    }

    /// Walks `bucket`'s directory deleting files whose mtime exceeds `ttl`. Returns count removed.
    pub fn sweep_expired(&self, bucket: Bucket, ttl: Duration) -> usize {
        let dir = self.root.join(bucket.as_str());
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if SystemTime::now().duration_since(modified).unwrap_or_default() > ttl {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn clear_all(&self) -> usize {
        let mut removed = 0;
        for bucket in [Bucket::Data, Bucket::Chart, Bucket::Analysis] {
            let dir = self.root.join(bucket.as_str());
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if std::fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// `(total size in MB, file count)` across all buckets, for `stats()` (§4.3).
    pub fn usage(&self) -> (f64, usize) {
        let mut bytes = 0u64;
        let mut count = 0usize;
        for bucket in [Bucket::Data, Bucket::Chart, Bucket::Analysis] {
            let dir = self.root.join(bucket.as_str());
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    bytes += metadata.len();
                    count += 1;
                }
            }
        }
        (bytes as f64 / (1024.0 * 1024.0), count)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
