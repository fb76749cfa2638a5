//! CAIRN Storage - Backend Adapters
//!
//! Defines the backend capability trait consumed by the cache facade, plus an
//! in-process backend and a persistent LMDB backend.

pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use lmdb_backend::{LmdbBackend, LmdbBackendError};
pub use memory::InMemoryBackend;
pub use traits::{not_an_integer, BackendAdapter, CasToken, Fetched};
