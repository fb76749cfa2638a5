//! LMDB-backed persistent backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key/value medium that survives process restarts and can be shared by
//! several processes on one host.
//!
//! # Entry Format
//!
//! `[expiry: i64 LE][version: u64 LE][value bytes]`
//!
//! The version counter lives under a reserved key and is bumped inside the
//! same write transaction as the entry it stamps, so `add`, `incr` and the
//! comparison tokens are atomic across processes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::codec::canonical_integer;
use cairn_core::{is_expired, BackendError, BackendResult, CacheFlags, Clock, SystemClock};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use crate::traits::{not_an_integer, BackendAdapter, CasToken, Fetched};

const HEADER_LEN: usize = 16;
const VERSION_KEY: &[u8] = b"\0cairn:version";

/// Error type for opening an LMDB backend.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbBackendError> for BackendError {
    fn from(e: LmdbBackendError) -> Self {
        BackendError::Unreachable {
            operation: "open",
            reason: e.to_string(),
        }
    }
}

#[derive(Debug)]
struct Entry<'a> {
    expiry: i64,
    version: u64,
    value: &'a [u8],
}

impl<'a> Entry<'a> {
    fn decode(key: &str, bytes: &'a [u8]) -> BackendResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(BackendError::UnexpectedValue {
                key: key.to_string(),
                reason: format!("entry of {} bytes is shorter than its header", bytes.len()),
            });
        }
        let (expiry, rest) = bytes.split_at(8);
        let (version, value) = rest.split_at(8);
        Ok(Self {
            expiry: i64::from_le_bytes(expiry.try_into().map_err(|_| truncated(key))?),
            version: u64::from_le_bytes(version.try_into().map_err(|_| truncated(key))?),
            value,
        })
    }
}

fn truncated(key: &str) -> BackendError {
    BackendError::UnexpectedValue {
        key: key.to_string(),
        reason: "truncated entry header".to_string(),
    }
}

fn encode_entry(expiry: i64, version: u64, value: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
    bytes.extend_from_slice(&expiry.to_le_bytes());
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(value);
    bytes
}

fn medium_error(operation: &'static str) -> impl Fn(heed::Error) -> BackendError {
    move |e| BackendError::Unreachable {
        operation,
        reason: e.to_string(),
    }
}

/// LMDB-backed cache medium.
///
/// # Example
///
/// ```ignore
/// use cairn_storage::LmdbBackend;
///
/// let backend = LmdbBackend::new("/tmp/cairn", 100)?;
/// backend.set("local:page:1", b"body", 0, CacheFlags::empty()).await?;
/// ```
pub struct LmdbBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbBackend {
    /// Open (or create) an LMDB backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbBackendError> {
        Self::with_clock(path, max_size_mb, Arc::new(SystemClock))
    }

    /// Open an LMDB backend that evaluates expiry against `clock`.
    pub fn with_clock<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LmdbBackendError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbBackendError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB backend");

        Ok(Self { env, db, clock })
    }

    fn next_version(&self, wtxn: &mut RwTxn<'_>) -> BackendResult<u64> {
        let current = self
            .db
            .get(&*wtxn, VERSION_KEY)
            .map_err(medium_error("version"))?
            .and_then(|bytes| bytes.try_into().ok().map(u64::from_le_bytes))
            .unwrap_or(0);
        let next = current + 1;
        self.db
            .put(wtxn, VERSION_KEY, &next.to_le_bytes())
            .map_err(medium_error("version"))?;
        Ok(next)
    }

    fn live_entry<'t>(
        &self,
        txn: &'t RoTxn<'_>,
        key: &str,
        now: i64,
    ) -> BackendResult<Option<Entry<'t>>> {
        let Some(bytes) = self.db.get(txn, key.as_bytes()).map_err(medium_error("get"))? else {
            return Ok(None);
        };
        let entry = Entry::decode(key, bytes)?;
        Ok((!is_expired(entry.expiry, now)).then_some(entry))
    }

    fn put_entry(
        &self,
        wtxn: &mut RwTxn<'_>,
        key: &str,
        value: &[u8],
        expiry: i64,
    ) -> BackendResult<()> {
        let version = self.next_version(wtxn)?;
        self.db
            .put(wtxn, key.as_bytes(), &encode_entry(expiry, version, value))
            .map_err(medium_error("set"))
    }

    fn write_txn(&self) -> BackendResult<RwTxn<'_>> {
        self.env.write_txn().map_err(medium_error("write_txn"))
    }
}

#[async_trait]
impl BackendAdapter for LmdbBackend {
    async fn get(&self, key: &str, _flags: CacheFlags) -> BackendResult<Option<Fetched>> {
        let rtxn = self.env.read_txn().map_err(medium_error("get"))?;
        Ok(self
            .live_entry(&rtxn, key, self.clock.now())?
            .map(|entry| Fetched {
                value: entry.value.to_vec(),
                token: CasToken::new(entry.version),
            }))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expiry: i64,
        _flags: CacheFlags,
    ) -> BackendResult<()> {
        let mut wtxn = self.write_txn()?;
        self.put_entry(&mut wtxn, key, value, expiry)?;
        wtxn.commit().map_err(medium_error("set"))
    }

    async fn delete(&self, key: &str, _flags: CacheFlags) -> BackendResult<()> {
        let mut wtxn = self.write_txn()?;
        self.db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(medium_error("delete"))?;
        wtxn.commit().map_err(medium_error("delete"))
    }

    async fn add(&self, key: &str, value: &[u8], expiry: i64) -> BackendResult<bool> {
        let mut wtxn = self.write_txn()?;
        if self.live_entry(&wtxn, key, self.clock.now())?.is_some() {
            return Ok(false);
        }
        self.put_entry(&mut wtxn, key, value, expiry)?;
        wtxn.commit().map_err(medium_error("add"))?;
        Ok(true)
    }

    async fn incr(&self, key: &str, delta: i64) -> BackendResult<Option<i64>> {
        let mut wtxn = self.write_txn()?;
        let (value, expiry) = match self.live_entry(&wtxn, key, self.clock.now())? {
            None => return Ok(None),
            Some(entry) => {
                let value = canonical_integer(entry.value)
                    .and_then(|n| n.checked_add(delta))
                    .ok_or_else(|| not_an_integer(key))?;
                (value, entry.expiry)
            }
        };
        self.put_entry(&mut wtxn, key, value.to_string().as_bytes(), expiry)?;
        wtxn.commit().map_err(medium_error("incr"))?;
        Ok(Some(value))
    }

    async fn get_multi(
        &self,
        keys: &[String],
        _flags: CacheFlags,
    ) -> Vec<BackendResult<Option<Fetched>>> {
        let rtxn = match self.env.read_txn() {
            Ok(rtxn) => rtxn,
            Err(e) => {
                let error = medium_error("get_multi")(e);
                return keys.iter().map(|_| Err(error.clone())).collect();
            }
        };
        let now = self.clock.now();
        keys.iter()
            .map(|key| -> BackendResult<Option<Fetched>> {
                Ok(self.live_entry(&rtxn, key, now)?.map(|entry| Fetched {
                    value: entry.value.to_vec(),
                    token: CasToken::new(entry.version),
                }))
            })
            .collect()
    }

    async fn set_multi(
        &self,
        entries: &[(String, Vec<u8>)],
        expiry: i64,
        _flags: CacheFlags,
    ) -> BackendResult<()> {
        let mut wtxn = self.write_txn()?;
        for (key, value) in entries {
            self.put_entry(&mut wtxn, key, value, expiry)?;
        }
        wtxn.commit().map_err(medium_error("set_multi"))
    }

    async fn delete_multi(&self, keys: &[String], _flags: CacheFlags) -> BackendResult<()> {
        let mut wtxn = self.write_txn()?;
        for key in keys {
            self.db
                .delete(&mut wtxn, key.as_bytes())
                .map_err(medium_error("delete_multi"))?;
        }
        wtxn.commit().map_err(medium_error("delete_multi"))
    }
}
