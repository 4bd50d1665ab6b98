//! In-memory storage backend.
//!
//! [`InMemoryBackend`] provides a thread-safe [`StorageBackend`] implementation
//! using `DashMap<String, (Vec<u8>, u64)>` for concurrent key-value storage.
//! It is a dumb KV store with no domain logic.
//!
//! # Concurrency
//!
//! Reads go straight to the `DashMap` shards. Commits are serialized by a
//! single `parking_lot::Mutex`: a batch is validated against the current
//! state plus its own earlier operations, and only then applied. Readers
//! may observe a batch mid-apply only at shard granularity, never a batch
//! that failed validation.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::backend::{StorageBackend, StorageError, VersionedRecord, WriteBatch, WriteOp};

/// Thread-safe in-memory storage backend using [`DashMap`].
///
/// # Examples
///
/// ```
/// use taskscope::store::{InMemoryBackend, StorageBackend, WriteBatch};
///
/// # tokio_test_block(async {
/// let backend = InMemoryBackend::new();
/// let mut batch = WriteBatch::new();
/// batch.insert("task:t1", b"{}".to_vec());
/// assert_eq!(backend.commit(batch).await.unwrap(), vec![1]);
/// assert_eq!(backend.get("task:t1").await.unwrap().version, 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, (Vec<u8>, u64)>,
    commit_lock: Mutex<()>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the backend contains no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn current_version(&self, staged: &HashMap<String, Option<u64>>, key: &str) -> Option<u64> {
        match staged.get(key) {
            Some(version) => *version,
            None => self.data.get(key).map(|entry| entry.value().1),
        }
    }

    /// Computes the resulting version of every operation without applying any.
    fn validate(&self, ops: &[WriteOp]) -> Result<Vec<u64>, StorageError> {
        let mut staged: HashMap<String, Option<u64>> = HashMap::new();
        let mut versions = Vec::with_capacity(ops.len());

        for op in ops {
            let key = op.key();
            let current = self.current_version(&staged, key);
            let next = match op {
                WriteOp::Insert { .. } | WriteOp::Append { .. } => {
                    if current.is_some() {
                        return Err(StorageError::AlreadyExists {
                            key: key.to_string(),
                        });
                    }
                    Some(1)
                },
                WriteOp::Update {
                    expected_version, ..
                } => match current {
                    Some(v) if v == *expected_version => Some(v + 1),
                    other => {
                        return Err(StorageError::VersionConflict {
                            key: key.to_string(),
                            expected: *expected_version,
                            actual: other.unwrap_or(0),
                        })
                    },
                },
                WriteOp::Put { .. } => Some(current.map_or(1, |v| v + 1)),
                WriteOp::Delete {
                    expected_version, ..
                } => {
                    if let Some(expected) = expected_version {
                        if current != Some(*expected) {
                            return Err(StorageError::VersionConflict {
                                key: key.to_string(),
                                expected: *expected,
                                actual: current.unwrap_or(0),
                            });
                        }
                    }
                    None
                },
            };
            versions.push(next.unwrap_or(0));
            staged.insert(key.to_string(), next);
        }

        Ok(versions)
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let entry = self.data.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let (data, version) = entry.value();
        Ok(VersionedRecord {
            data: data.clone(),
            version: *version,
        })
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let mut results: Vec<(String, VersionedRecord)> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| {
                let (data, version) = entry.value();
                (
                    entry.key().clone(),
                    VersionedRecord {
                        data: data.clone(),
                        version: *version,
                    },
                )
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Vec<u64>, StorageError> {
        let _guard = self.commit_lock.lock();
        let versions = self.validate(batch.ops())?;

        for (op, version) in batch.into_ops().into_iter().zip(versions.iter().copied()) {
            match op {
                WriteOp::Insert { key, data }
                | WriteOp::Update { key, data, .. }
                | WriteOp::Put { key, data }
                | WriteOp::Append { key, data } => {
                    self.data.insert(key, (data, version));
                },
                WriteOp::Delete { key, .. } => {
                    self.data.remove(&key);
                },
            }
        }

        Ok(versions)
    }
}
