//! Part backend trait definition.

use crate::address::PartAddress;
use crate::error::StorageResult;

/// A keyed storage backend for catidx storage parts.
///
/// Backends are **opaque part stores**. The core crate decides what a
/// part kind means and how part bytes are laid out; a backend only
/// remembers the latest bytes written under each address.
///
/// # Invariants
///
/// - `read` returns exactly the bytes of the last `write` to that address
/// - `remove` makes a subsequent `read` return `None`
/// - `flush` ensures all writes are handed to durable storage
/// - Backends must be `Send + Sync` for concurrent access
pub trait PartBackend: Send + Sync {
    /// Reads the bytes stored under `address`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored record cannot be read back.
    fn read(&self, address: PartAddress) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `data` under `address`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write(&mut self, address: PartAddress, data: &[u8]) -> StorageResult<()>;

    /// Removes the value stored under `address`.
    ///
    /// Returns `true` if a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn remove(&mut self, address: PartAddress) -> StorageResult<bool>;

    /// Returns all live addresses in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    fn addresses(&self) -> StorageResult<Vec<PartAddress>>;

    /// Flushes all pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the number of bytes occupied by the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}
