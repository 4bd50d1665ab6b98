//! Low-level key-value storage backend trait and supporting types.
//!
//! The [`StorageBackend`] trait defines the contract that all storage engines
//! implement. It exposes three operations: [`get`](StorageBackend::get),
//! [`list_by_prefix`](StorageBackend::list_by_prefix) and
//! [`commit`](StorageBackend::commit). Writes only happen through
//! [`commit`](StorageBackend::commit), which applies a [`WriteBatch`]
//! atomically: every precondition is checked first, then either all
//! operations are applied or none.
//!
//! Domain logic (scope resolution, identity link rules, expression policy,
//! serialization) does **not** belong here. Backends are dumb KV stores;
//! domain logic lives in `TaskEngine`.
//!
//! # Key Structure
//!
//! Keys are composite strings in the format `{kind}:{id}` for top-level
//! entities and `{kind}:{parent}:{child}` for rows owned by a task
//! (variables, identity links, events). Prefix queries use `{kind}:` or
//! `{kind}:{parent}:`. Ids and names are opaque and may contain `:`, so
//! every part is escaped (`%` as `%25`, `:` as `%3A`) before joining. Two
//! different `(parent, child)` pairs never share a key, and a parent's
//! prefix never matches rows of another parent.
//!
//! # Versioning
//!
//! Each stored record carries a monotonic `u64` version number starting at
//! 1, incremented on every successful write. [`WriteOp::Update`] carries
//! the expected version and provides compare-and-swap semantics; for tasks
//! the version is the task revision.

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;

/// A stored record paired with its monotonic version number.
///
/// # Examples
///
/// ```
/// use taskscope::store::VersionedRecord;
///
/// let record = VersionedRecord {
///     data: b"{}".to_vec(),
///     version: 1,
/// };
/// assert_eq!(record.version, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// The serialized entity bytes (JSON).
    pub data: Vec<u8>,

    /// Monotonic version number. Starts at 1, increments on each
    /// successful write.
    pub version: u64,
}

/// Errors that can occur during raw storage operations.
///
/// `TaskEngine` maps them to domain-aware
/// [`TaskError`](crate::error::TaskError) variants before surfacing to callers.
///
/// # Examples
///
/// ```
/// use taskscope::store::StorageError;
///
/// let err = StorageError::VersionConflict {
///     key: "task:t1".to_string(),
///     expected: 2,
///     actual: 3,
/// };
/// assert!(err.to_string().contains("expected 2"));
/// ```
#[derive(Debug)]
pub enum StorageError {
    /// The requested key was not found in storage.
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// An update's expected version did not match. `actual` is 0 when the
    /// row no longer exists.
    VersionConflict {
        /// The key where the conflict occurred.
        key: String,
        /// The version the caller expected.
        expected: u64,
        /// The actual version found in storage.
        actual: u64,
    },

    /// An insert or append targeted a key that already exists.
    AlreadyExists {
        /// The existing key.
        key: String,
    },

    /// An I/O or backend-specific error occurred.
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available.
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "key not found: {key}"),
            Self::VersionConflict {
                key,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on key {key}: expected {expected}, found {actual}"
            ),
            Self::AlreadyExists { key } => write!(f, "key already exists: {key}"),
            Self::Backend { message, .. } => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Create a new record at version 1. Fails if the key exists.
    Insert {
        /// Target key.
        key: String,
        /// Serialized record.
        data: Vec<u8>,
    },
    /// Replace a record whose version equals `expected_version`.
    Update {
        /// Target key.
        key: String,
        /// Serialized record.
        data: Vec<u8>,
        /// Version the writer read.
        expected_version: u64,
    },
    /// Create or overwrite a record unconditionally.
    Put {
        /// Target key.
        key: String,
        /// Serialized record.
        data: Vec<u8>,
    },
    /// Remove a record. Missing keys are ignored unless `expected_version`
    /// is set, in which case the record must exist at that version.
    Delete {
        /// Target key.
        key: String,
        /// Version the writer read, if the delete is conditional.
        expected_version: Option<u64>,
    },
    /// Add an immutable log record. Fails if the key exists.
    Append {
        /// Target key.
        key: String,
        /// Serialized record.
        data: Vec<u8>,
    },
}

impl WriteOp {
    /// The key this operation targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Insert { key, .. }
            | Self::Update { key, .. }
            | Self::Put { key, .. }
            | Self::Delete { key, .. }
            | Self::Append { key, .. } => key,
        }
    }
}

/// An ordered set of writes applied atomically by [`StorageBackend::commit`].
///
/// Operations are validated in order against the state produced by the
/// preceding operations of the same batch.
///
/// # Examples
///
/// ```
/// use taskscope::store::WriteBatch;
///
/// let mut batch = WriteBatch::new();
/// batch.insert("task:t1", b"{}".to_vec());
/// batch.append("event:t1:00000000000000000001", b"{}".to_vec());
/// assert_eq!(batch.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an [`WriteOp::Insert`].
    pub fn insert(&mut self, key: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Insert {
            key: key.into(),
            data,
        });
        self
    }

    /// Queues an [`WriteOp::Update`].
    pub fn update(
        &mut self,
        key: impl Into<String>,
        data: Vec<u8>,
        expected_version: u64,
    ) -> &mut Self {
        self.ops.push(WriteOp::Update {
            key: key.into(),
            data,
            expected_version,
        });
        self
    }

    /// Queues a [`WriteOp::Put`].
    pub fn put(&mut self, key: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            data,
        });
        self
    }

    /// Queues an unconditional [`WriteOp::Delete`].
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            key: key.into(),
            expected_version: None,
        });
        self
    }

    /// Queues a [`WriteOp::Delete`] guarded by `expected_version`.
    pub fn delete_if_version(&mut self, key: impl Into<String>, expected_version: u64) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            key: key.into(),
            expected_version: Some(expected_version),
        });
        self
    }

    /// Queues a [`WriteOp::Append`].
    pub fn append(&mut self, key: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Append {
            key: key.into(),
            data,
        });
        self
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued operations, in order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consumes the batch, returning its operations.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Key-value storage backend for engine persistence.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to support concurrent access
/// from multiple callers. Reads must not block on in-flight commits for
/// longer than the commit's apply phase.
///
/// # Atomicity
///
/// [`commit`](StorageBackend::commit) is all-or-nothing. A failed
/// precondition anywhere in the batch leaves storage untouched.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a record by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the given key.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Lists all records whose key starts with the given prefix, ordered by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError>;

    /// Applies every operation of `batch` atomically.
    ///
    /// Returns, per operation, the resulting version (0 for deletes).
    ///
    /// # Errors
    ///
    /// - [`StorageError::VersionConflict`] if an update or conditional
    ///   delete does not match the stored version.
    /// - [`StorageError::AlreadyExists`] if an insert or append hits an
    ///   existing key.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn commit(&self, batch: WriteBatch) -> Result<Vec<u64>, StorageError>;

    /// Like [`get`](StorageBackend::get) but maps a missing key to `None`.
    async fn try_get(&self, key: &str) -> Result<Option<VersionedRecord>, StorageError> {
        match self.get(key).await {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Escapes one key part so that it contains no `:`.
///
/// # Examples
///
/// ```
/// use taskscope::store::escape_key_part;
///
/// assert_eq!(escape_key_part("a:b%c"), "a%3Ab%25c");
/// assert_eq!(escape_key_part("plain"), "plain");
/// ```
pub fn escape_key_part(part: &str) -> Cow<'_, str> {
    if !part.contains([':', '%']) {
        return Cow::Borrowed(part);
    }
    let mut escaped = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Reverses [`escape_key_part`].
pub fn unescape_key_part(part: &str) -> String {
    part.replace("%3A", ":").replace("%25", "%")
}

/// Constructs a storage key for a top-level entity.
///
/// # Examples
///
/// ```
/// use taskscope::store::make_key;
///
/// assert_eq!(make_key("task", "t1"), "task:t1");
/// assert_eq!(make_key("task", "a:b"), "task:a%3Ab");
/// ```
pub fn make_key(kind: &str, id: &str) -> String {
    format!("{kind}:{}", escape_key_part(id))
}

/// Constructs a storage key for a row owned by `parent`.
///
/// # Examples
///
/// ```
/// use taskscope::store::make_child_key;
///
/// assert_eq!(make_child_key("variable", "t1", "amount"), "variable:t1:amount");
/// assert_ne!(
///     make_child_key("variable", "a:b", "c"),
///     make_child_key("variable", "a", "b:c"),
/// );
/// ```
pub fn make_child_key(kind: &str, parent: &str, child: &str) -> String {
    format!(
        "{kind}:{}:{}",
        escape_key_part(parent),
        escape_key_part(child)
    )
}

/// Constructs a prefix listing every row of `kind` owned by `parent`.
///
/// # Examples
///
/// ```
/// use taskscope::store::make_prefix;
///
/// assert_eq!(make_prefix("link", "t1"), "link:t1:");
/// ```
pub fn make_prefix(kind: &str, parent: &str) -> String {
    format!("{kind}:{}:", escape_key_part(parent))
}

/// Constructs a prefix listing every row of `kind`.
pub fn kind_prefix(kind: &str) -> String {
    format!("{kind}:")
}

/// Parses a storage key into `(kind, rest)` components. `rest` is still
/// escaped.
///
/// # Examples
///
/// ```
/// use taskscope::store::parse_key;
///
/// assert_eq!(parse_key("task:t1"), Some(("task", "t1")));
/// assert_eq!(parse_key("no-colon"), None);
/// ```
pub fn parse_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}
