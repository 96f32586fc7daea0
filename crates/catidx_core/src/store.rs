//! Part store.
//!
//! The [`PartStore`] ties a [`PartBackend`] to the session's
//! [`KeyCompressor`]. It encodes parts into their envelope, derives their
//! addresses and checks identities on the way back.

use crate::codec;
use crate::compressor::{KeyCompressor, KeyCompressorStoragePart, KEY_COMPRESSOR_PART_ID};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::part::{verify_identity, PartKind, StoragePart};
use crate::AnyStoragePart;
use catidx_storage::{FilePartBackend, InMemoryPartBackend, PartAddress, PartBackend};
use parking_lot::RwLock;
use std::path::Path;

/// Stores and loads storage parts.
///
/// `Send + Sync`: backend access goes through a read-write lock, and every
/// read decodes into an owned value.
pub struct PartStore {
    backend: RwLock<Box<dyn PartBackend>>,
    compressor: KeyCompressor,
    config: Config,
}

impl PartStore {
    /// Opens a store over `backend`, restoring the key compressor if stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored compressor cannot be read or decoded.
    pub fn open(backend: Box<dyn PartBackend>, config: Config) -> CoreResult<Self> {
        let address = PartKind::KeyCompressor.address(KEY_COMPRESSOR_PART_ID);
        let compressor = match backend.read(address)? {
            Some(bytes) => {
                let part: KeyCompressorStoragePart = codec::decode_part(&bytes)?;
                KeyCompressor::from_storage_part(part)?
            }
            None => KeyCompressor::new(),
        };
        tracing::debug!(keys = compressor.len(), "opened part store");
        Ok(Self {
            backend: RwLock::new(backend),
            compressor,
            config,
        })
    }

    /// Creates an empty store backed by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: RwLock::new(Box::new(InMemoryPartBackend::new())),
            compressor: KeyCompressor::new(),
            config: Config::default(),
        }
    }

    /// Opens a store backed by a part log file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreNotFound`] if the file is absent and
    /// `create_if_missing` is off, or a storage error if it cannot be opened.
    pub fn open_file(path: &Path, config: Config) -> CoreResult<Self> {
        let backend = if config.create_if_missing {
            FilePartBackend::open_with_create_dirs(path)?
        } else if path.exists() {
            FilePartBackend::open(path)?
        } else {
            return Err(CoreError::StoreNotFound {
                path: path.display().to_string(),
            });
        };
        Self::open(Box::new(backend), config)
    }

    /// Key compressor of this session.
    #[must_use]
    pub fn compressor(&self) -> &KeyCompressor {
        &self.compressor
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Assigns the part its id and writes it. Returns the id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityMismatch`] if the part already carries a
    /// different id, [`CoreError::PartTooLarge`] if the encoded part exceeds
    /// the configured limit, or a codec or storage error.
    pub fn put<P: StoragePart>(&self, part: &mut P) -> CoreResult<u64> {
        let id = part.compute_unique_part_id_and_set(&self.compressor)?;
        let bytes = codec::encode_part(part)?;
        if bytes.len() > self.config.max_part_size {
            return Err(CoreError::PartTooLarge {
                size: bytes.len(),
                max: self.config.max_part_size,
            });
        }
        self.backend.write().write(P::KIND.address(id), &bytes)?;
        tracing::debug!(kind = %P::KIND, id, size = bytes.len(), "wrote storage part");
        Ok(id)
    }

    /// Reads the part of type `P` stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns a decoding error, or [`CoreError::IdentityMismatch`] if
    /// identity verification is on and the part resolves to another id.
    pub fn get<P: StoragePart>(&self, id: u64) -> CoreResult<Option<P>> {
        let Some(bytes) = self.backend.read().read(P::KIND.address(id))? else {
            return Ok(None);
        };
        let mut part: P = codec::decode_part(&bytes)?;
        if self.config.verify_identity_on_read {
            verify_identity(&part, id, &self.compressor)?;
        }
        part.set_storage_part_pk(id);
        tracing::debug!(kind = %P::KIND, id, "loaded storage part");
        Ok(Some(part))
    }

    /// Reads a part that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingStoragePart`] if nothing is stored under
    /// `id`, or any error of [`get`](Self::get).
    pub fn get_required<P: StoragePart>(&self, id: u64, key: &dyn std::fmt::Display) -> CoreResult<P> {
        self.get(id)?
            .ok_or_else(|| CoreError::missing_part(P::KIND, format!("{key} (part {id})")))
    }

    /// Reads any part stored under `address`.
    ///
    /// # Errors
    ///
    /// Returns a decoding error, or [`CoreError::InvalidFormat`] if the
    /// stored envelope names another kind than the address.
    pub fn get_any(&self, address: PartAddress) -> CoreResult<Option<AnyStoragePart>> {
        let Some(bytes) = self.backend.read().read(address)? else {
            return Ok(None);
        };
        let mut part = codec::decode_any(&bytes)?;
        if part.kind().as_byte() != address.kind {
            return Err(CoreError::invalid_format(format!(
                "{address} holds a {} part",
                part.kind()
            )));
        }
        if self.config.verify_identity_on_read {
            part.verify_identity(address.id, &self.compressor)?;
        }
        part.set_storage_part_pk(address.id);
        Ok(Some(part))
    }

    /// Raw envelope bytes stored under `address`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn read_raw(&self, address: PartAddress) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.backend.read().read(address)?)
    }

    /// Removes the part stored under `address`. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn remove(&self, address: PartAddress) -> CoreResult<bool> {
        let removed = self.backend.write().remove(address)?;
        if removed {
            tracing::debug!(%address, "removed storage part");
        }
        Ok(removed)
    }

    /// Returns true if a part is stored under `address`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn contains(&self, address: PartAddress) -> CoreResult<bool> {
        Ok(self.read_raw(address)?.is_some())
    }

    /// All stored addresses in ascending order.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn addresses(&self) -> CoreResult<Vec<PartAddress>> {
        Ok(self.backend.read().addresses()?)
    }

    /// Bytes occupied by the backend.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Writes the compressor if it gained keys, then flushes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the compressor is closed or the backend fails.
    pub fn flush(&self) -> CoreResult<()> {
        if self.compressor.is_dirty() {
            let mut part = self.compressor.create_storage_part()?;
            self.put(&mut part)?;
            self.compressor.mark_persisted(part.sequence);
        }
        let mut backend = self.backend.write();
        backend.flush()?;
        if self.config.sync_on_flush {
            backend.sync()?;
        }
        Ok(())
    }

    /// Flushes and closes the compressor. Later use of the store fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(&self) -> CoreResult<()> {
        if self.compressor.is_closed() {
            return Ok(());
        }
        self.flush()?;
        self.compressor.close();
        tracing::debug!("closed part store");
        Ok(())
    }
}

impl std::fmt::Debug for PartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartStore")
            .field("compressor", &self.compressor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::CompressibleKey;
    use crate::index::UniqueIndex;
    use crate::types::AttributeIndexKey;
    use crate::value::ValueKind;
    use crate::UniqueIndexStoragePart;

    fn unique_part(owner: u32) -> UniqueIndexStoragePart {
        let mut index = UniqueIndex::new(AttributeIndexKey::new("code"), ValueKind::Text);
        index.put("A-1".into(), 4).unwrap();
        index.create_storage_part(owner)
    }

    #[test]
    fn put_and_get() {
        let store = PartStore::in_memory();
        let mut part = unique_part(2);
        let id = store.put(&mut part).unwrap();
        assert_eq!(part.storage_part_pk(), Some(id));

        let loaded: UniqueIndexStoragePart = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.storage_part_pk(), Some(id));
        assert_eq!(loaded.unique_map, part.unique_map);
    }

    #[test]
    fn get_absent_is_none() {
        let store = PartStore::in_memory();
        assert!(store.get::<UniqueIndexStoragePart>(99).unwrap().is_none());
        assert!(matches!(
            store.get_required::<UniqueIndexStoragePart>(99, &"code"),
            Err(CoreError::MissingStoragePart { .. })
        ));
    }

    #[test]
    fn part_read_from_foreign_address_is_mismatch() {
        let store = PartStore::in_memory();
        let mut part = unique_part(2);
        let id = store.put(&mut part).unwrap();
        let bytes = store.backend.read().read(PartKind::Unique.address(id)).unwrap().unwrap();
        let foreign = id + (1 << 32);
        store
            .backend
            .write()
            .write(PartKind::Unique.address(foreign), &bytes)
            .unwrap();

        assert!(matches!(
            store.get::<UniqueIndexStoragePart>(foreign),
            Err(CoreError::IdentityMismatch { .. })
        ));
        assert!(matches!(
            store.get_any(PartKind::Unique.address(foreign)),
            Err(CoreError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn oversized_part_is_rejected() {
        let store = PartStore {
            backend: RwLock::new(Box::new(InMemoryPartBackend::new())),
            compressor: KeyCompressor::new(),
            config: Config::default().max_part_size(8),
        };
        assert!(matches!(
            store.put(&mut unique_part(1)),
            Err(CoreError::PartTooLarge { .. })
        ));
        assert!(store.addresses().unwrap().is_empty());
    }

    #[test]
    fn flush_persists_compressor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parts.cix");
        let id = {
            let store = PartStore::open_file(&path, Config::default()).unwrap();
            let id = store.put(&mut unique_part(3)).unwrap();
            store.close().unwrap();
            id
        };

        let store = PartStore::open_file(&path, Config::default()).unwrap();
        assert_eq!(store.compressor().len(), 1);
        assert!(store.get::<UniqueIndexStoragePart>(id).unwrap().is_some());
    }

    #[test]
    fn failed_flush_keeps_compressor_dirty() {
        let store = PartStore {
            backend: RwLock::new(Box::new(InMemoryPartBackend::new())),
            compressor: KeyCompressor::new(),
            config: Config::default().max_part_size(64),
        };
        for owner in 0..20 {
            let key = CompressibleKey::Reference(format!("reference-{owner}"));
            store.compressor().get_id(&key).unwrap();
        }

        assert!(matches!(store.flush(), Err(CoreError::PartTooLarge { .. })));
        assert!(store.compressor().is_dirty());
        assert!(store.flush().is_err());
        let address = PartKind::KeyCompressor.address(KEY_COMPRESSOR_PART_ID);
        assert!(!store.contains(address).unwrap());
    }

    #[test]
    fn flush_clears_compressor_dirty() {
        let store = PartStore::in_memory();
        store.put(&mut unique_part(1)).unwrap();
        assert!(store.compressor().is_dirty());
        store.flush().unwrap();
        assert!(!store.compressor().is_dirty());
        let address = PartKind::KeyCompressor.address(KEY_COMPRESSOR_PART_ID);
        assert!(store.contains(address).unwrap());
    }

    #[test]
    fn missing_file_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().create_if_missing(false);
        assert!(matches!(
            PartStore::open_file(&dir.path().join("absent.cix"), config),
            Err(CoreError::StoreNotFound { .. })
        ));
    }

    #[test]
    fn closed_store_rejects_writes() {
        let store = PartStore::in_memory();
        store.close().unwrap();
        assert!(matches!(
            store.put(&mut unique_part(1)),
            Err(CoreError::CompressorClosed)
        ));
    }
}
