// Store module: persistence backends

pub mod backend;

pub use backend::{MemoryStorage, SledStorage, StorageBackend, StorageError};
