//! In-memory part backend for testing.

use crate::address::PartAddress;
use crate::backend::PartBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory part backend.
///
/// Keeps every part in a sorted map. Suitable for unit tests and for
/// stores that never need to survive the process.
///
/// # Example
///
/// ```rust
/// use catidx_storage::{InMemoryPartBackend, PartAddress, PartBackend};
///
/// let mut backend = InMemoryPartBackend::new();
/// backend.write(PartAddress::new(1, 1), b"abc").unwrap();
/// assert_eq!(backend.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPartBackend {
    parts: RwLock<BTreeMap<PartAddress, Vec<u8>>>,
}

impl InMemoryPartBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.read().len()
    }

    /// Returns true if no part is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.read().is_empty()
    }

    /// Overwrites raw bytes under an address.
    ///
    /// Useful for corruption tests.
    pub fn put_raw(&self, address: PartAddress, data: Vec<u8>) {
        self.parts.write().insert(address, data);
    }
}

impl PartBackend for InMemoryPartBackend {
    fn read(&self, address: PartAddress) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.parts.read().get(&address).cloned())
    }

    fn write(&mut self, address: PartAddress, data: &[u8]) -> StorageResult<()> {
        self.parts.write().insert(address, data.to_vec());
        Ok(())
    }

    fn remove(&mut self, address: PartAddress) -> StorageResult<bool> {
        Ok(self.parts.write().remove(&address).is_some())
    }

    fn addresses(&self) -> StorageResult<Vec<PartAddress>> {
        Ok(self.parts.read().keys().copied().collect())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.parts.read().values().map(|v| v.len() as u64).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryPartBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.addresses().unwrap().is_empty());
    }

    #[test]
    fn memory_write_and_read() {
        let mut backend = InMemoryPartBackend::new();
        let address = PartAddress::new(2, 10);
        backend.write(address, b"hello").unwrap();
        assert_eq!(backend.read(address).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(backend.size().unwrap(), 5);
    }

    #[test]
    fn memory_last_write_wins() {
        let mut backend = InMemoryPartBackend::new();
        let address = PartAddress::new(2, 10);
        backend.write(address, b"first").unwrap();
        backend.write(address, b"second").unwrap();
        assert_eq!(backend.read(address).unwrap(), Some(b"second".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn memory_same_id_different_kind() {
        let mut backend = InMemoryPartBackend::new();
        backend.write(PartAddress::new(1, 5), b"a").unwrap();
        backend.write(PartAddress::new(2, 5), b"b").unwrap();
        assert_eq!(backend.read(PartAddress::new(1, 5)).unwrap(), Some(b"a".to_vec()));
        assert_eq!(backend.read(PartAddress::new(2, 5)).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn memory_remove() {
        let mut backend = InMemoryPartBackend::new();
        let address = PartAddress::new(3, 1);
        backend.write(address, b"x").unwrap();
        assert!(backend.remove(address).unwrap());
        assert!(!backend.remove(address).unwrap());
        assert_eq!(backend.read(address).unwrap(), None);
    }

    #[test]
    fn memory_addresses_sorted() {
        let mut backend = InMemoryPartBackend::new();
        backend.write(PartAddress::new(4, 1), b"x").unwrap();
        backend.write(PartAddress::new(1, 9), b"y").unwrap();
        backend.write(PartAddress::new(1, 2), b"z").unwrap();
        assert_eq!(
            backend.addresses().unwrap(),
            vec![
                PartAddress::new(1, 2),
                PartAddress::new(1, 9),
                PartAddress::new(4, 1)
            ]
        );
    }
}
