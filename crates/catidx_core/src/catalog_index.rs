//! Catalog-wide index.
//!
//! Owns the global unique indexes of one catalog scope. The directory part
//! lists the attribute keys of those indexes and lives at a fixed id per
//! scope. Mutations serialize through the catalog write lock, so the
//! index can be shared between writer threads.

use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::index::{GlobalUniqueIndex, GlobalUniqueIndexStoragePart, GlobalUniqueRecord};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::store::PartStore;
use crate::types::{AttributeKey, Locale, Scope};
use crate::value::{AttributeValue, ValueKind};
use crate::AnyStoragePart;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Directory of a catalog scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Bumped once per committing persist.
    pub version: u64,
    /// Scope of the catalog index.
    pub scope: Scope,
    /// Attributes with a global unique index.
    pub shared_unique_attribute_keys: BTreeSet<AttributeKey>,
}

impl CatalogIndexStoragePart {
    /// Creates an empty directory.
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            storage_part_pk: None,
            version: 0,
            scope,
            shared_unique_attribute_keys: BTreeSet::new(),
        }
    }
}

impl StoragePart for CatalogIndexStoragePart {
    const KIND: PartKind = PartKind::CatalogIndex;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Fixed(self.scope.catalog_part_id())
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::CatalogIndex(self)
    }
}

/// Outcome of a catalog persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPersistReport {
    /// Global unique parts written.
    pub written: usize,
    /// Global unique parts removed.
    pub removed: usize,
    /// True if the directory part was rewritten.
    pub directory_rewritten: bool,
    /// Version after the persist.
    pub version: u64,
}

#[derive(Debug, Default)]
struct CatalogState {
    unique_indexes: BTreeMap<AttributeKey, GlobalUniqueIndex>,
    removed: BTreeSet<AttributeKey>,
    version: u64,
    directory_dirty: bool,
}

/// Global unique indexes of one catalog scope.
#[derive(Debug)]
pub struct CatalogIndex {
    scope: Scope,
    state: RwLock<CatalogState>,
}

impl CatalogIndex {
    /// Creates an empty catalog index. Its directory is written on the
    /// first persist.
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            state: RwLock::new(CatalogState {
                directory_dirty: true,
                ..CatalogState::default()
            }),
        }
    }

    /// Catalog scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Version of the last committing persist.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Attributes with a global unique index.
    #[must_use]
    pub fn attribute_keys(&self) -> Vec<AttributeKey> {
        self.state.read().unique_indexes.keys().cloned().collect()
    }

    /// Registers `value` of `attribute_key` as owned by `(entity_type, pk)`.
    ///
    /// The index of the attribute is created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniquenessViolation`] if another entity owns the
    /// value, or [`CoreError::InvalidOperation`] if the value does not match
    /// the kind the index was created with.
    pub fn register_unique(
        &self,
        attribute_key: &AttributeKey,
        value_kind: ValueKind,
        value: AttributeValue,
        entity_type: u32,
        locale: Option<&Locale>,
        pk: u32,
    ) -> CoreResult<()> {
        let mut state = self.state.write();
        if let Some(index) = state.unique_indexes.get_mut(attribute_key) {
            return index.register(value, entity_type, locale, pk);
        }
        let mut index = GlobalUniqueIndex::new(self.scope, attribute_key.clone(), value_kind);
        index.register(value, entity_type, locale, pk)?;
        state.unique_indexes.insert(attribute_key.clone(), index);
        state.removed.remove(attribute_key);
        state.directory_dirty = true;
        Ok(())
    }

    /// Removes the registration of `value` for `(entity_type, pk)`.
    ///
    /// An index left empty is dropped with the next persist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless exactly this
    /// registration exists.
    pub fn unregister_unique(
        &self,
        attribute_key: &AttributeKey,
        value: &AttributeValue,
        entity_type: u32,
        pk: u32,
    ) -> CoreResult<()> {
        let mut state = self.state.write();
        let Some(index) = state.unique_indexes.get_mut(attribute_key) else {
            return Err(CoreError::invalid_operation(format!(
                "no global unique index for {attribute_key}"
            )));
        };
        index.unregister(value, entity_type, pk)?;
        if index.is_empty() {
            state.unique_indexes.remove(attribute_key);
            state.removed.insert(attribute_key.clone());
            state.directory_dirty = true;
        }
        Ok(())
    }

    /// Returns the owner of `value` of `attribute_key`.
    #[must_use]
    pub fn lookup(&self, attribute_key: &AttributeKey, value: &AttributeValue) -> Option<GlobalUniqueRecord> {
        self.state
            .read()
            .unique_indexes
            .get(attribute_key)
            .and_then(|index| index.lookup(value))
    }

    /// Number of values registered for `attribute_key`.
    #[must_use]
    pub fn unique_count(&self, attribute_key: &AttributeKey) -> usize {
        self.state
            .read()
            .unique_indexes
            .get(attribute_key)
            .map_or(0, GlobalUniqueIndex::len)
    }

    /// Writes changed indexes, removes dropped ones and rewrites the
    /// directory if its key set changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a part cannot be written or removed.
    pub fn persist(&self, store: &PartStore) -> CoreResult<CatalogPersistReport> {
        let mut state = self.state.write();
        let mut report = CatalogPersistReport::default();
        let owner = self.scope.catalog_part_id() as u32;

        for index in state.unique_indexes.values_mut().filter(|index| index.is_dirty()) {
            store.put(&mut index.create_storage_part())?;
            index.mark_clean();
            report.written += 1;
        }

        let removed: Vec<AttributeKey> = state.removed.iter().cloned().collect();
        for attribute_key in removed {
            let identity = PartIdentity::Keyed {
                owner,
                key: CompressibleKey::GlobalAttribute(attribute_key.clone()),
            };
            if let Some(id) = identity.resolve_existing(store.compressor())? {
                if store.remove(PartKind::GlobalUnique.address(id))? {
                    report.removed += 1;
                }
            }
            state.removed.remove(&attribute_key);
        }

        let directory_dirty = state.directory_dirty;
        if report.written > 0 || report.removed > 0 || directory_dirty {
            state.version += 1;
        }
        if directory_dirty {
            let mut directory = CatalogIndexStoragePart {
                storage_part_pk: None,
                version: state.version,
                scope: self.scope,
                shared_unique_attribute_keys: state.unique_indexes.keys().cloned().collect(),
            };
            store.put(&mut directory)?;
            state.directory_dirty = false;
            report.directory_rewritten = true;
        }
        report.version = state.version;
        tracing::debug!(
            scope = %self.scope,
            written = report.written,
            removed = report.removed,
            directory_rewritten = report.directory_rewritten,
            "persisted catalog index"
        );
        Ok(report)
    }

    /// Loads the catalog index of `scope`, or an empty one if none is stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingStoragePart`] if the directory names an
    /// index that cannot be resolved, or a decoding error.
    pub fn load(scope: Scope, store: &PartStore) -> CoreResult<Self> {
        let Some(directory) = store.get::<CatalogIndexStoragePart>(scope.catalog_part_id())? else {
            return Ok(Self::new(scope));
        };
        let owner = scope.catalog_part_id() as u32;
        let mut unique_indexes = BTreeMap::new();
        for attribute_key in directory.shared_unique_attribute_keys {
            let key = CompressibleKey::GlobalAttribute(attribute_key.clone());
            let identity = PartIdentity::Keyed { owner, key: key.clone() };
            let id = identity
                .resolve_existing(store.compressor())?
                .ok_or_else(|| CoreError::missing_part(PartKind::GlobalUnique, key.to_string()))?;
            let part: GlobalUniqueIndexStoragePart = store.get_required(id, &key)?;
            unique_indexes.insert(attribute_key, GlobalUniqueIndex::from_storage_part(part)?);
        }
        tracing::debug!(scope = %scope, indexes = unique_indexes.len(), "loaded catalog index");
        Ok(Self {
            scope,
            state: RwLock::new(CatalogState {
                unique_indexes,
                removed: BTreeSet::new(),
                version: directory.version,
                directory_dirty: false,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use catidx_storage::{InMemoryPartBackend, PartAddress, PartBackend, StorageError, StorageResult};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn url() -> AttributeKey {
        AttributeKey::new("url")
    }

    /// Memory backend whose removals fail while `refuse_removals` is set.
    struct RemovalFailingBackend {
        inner: InMemoryPartBackend,
        refuse_removals: Arc<AtomicBool>,
    }

    impl PartBackend for RemovalFailingBackend {
        fn read(&self, address: PartAddress) -> StorageResult<Option<Vec<u8>>> {
            self.inner.read(address)
        }

        fn write(&mut self, address: PartAddress, data: &[u8]) -> StorageResult<()> {
            self.inner.write(address, data)
        }

        fn remove(&mut self, address: PartAddress) -> StorageResult<bool> {
            if self.refuse_removals.load(Ordering::SeqCst) {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "removal refused",
                )));
            }
            self.inner.remove(address)
        }

        fn addresses(&self) -> StorageResult<Vec<PartAddress>> {
            self.inner.addresses()
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
    }

    #[test]
    fn catalog_part_ids_are_fixed() {
        let compressor = crate::KeyCompressor::new();
        let live = CatalogIndexStoragePart::new(Scope::Live);
        let archived = CatalogIndexStoragePart::new(Scope::Archived);
        assert_eq!(live.compute_unique_part_id(&compressor).unwrap(), 1);
        assert_eq!(archived.compute_unique_part_id(&compressor).unwrap(), 2);
    }

    #[test]
    fn register_persist_and_load() {
        let store = PartStore::in_memory();
        let catalog = CatalogIndex::new(Scope::Live);
        catalog
            .register_unique(&url(), ValueKind::Text, "/shoes".into(), 3, None, 10)
            .unwrap();
        let report = catalog.persist(&store).unwrap();
        assert_eq!(report.written, 1);
        assert!(report.directory_rewritten);
        assert_eq!(report.version, 1);

        let loaded = CatalogIndex::load(Scope::Live, &store).unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.lookup(&url(), &"/shoes".into()).unwrap().primary_key, 10);
    }

    #[test]
    fn value_change_does_not_rewrite_directory() {
        let store = PartStore::in_memory();
        let catalog = CatalogIndex::new(Scope::Live);
        catalog
            .register_unique(&url(), ValueKind::Text, "/a".into(), 1, None, 1)
            .unwrap();
        catalog.persist(&store).unwrap();

        catalog
            .register_unique(&url(), ValueKind::Text, "/b".into(), 1, None, 2)
            .unwrap();
        let report = catalog.persist(&store).unwrap();
        assert_eq!(report.written, 1);
        assert!(!report.directory_rewritten);
        assert_eq!(report.version, 2);

        let idle = catalog.persist(&store).unwrap();
        assert_eq!(idle, CatalogPersistReport { version: 2, ..Default::default() });
    }

    #[test]
    fn emptied_index_is_removed() {
        let store = PartStore::in_memory();
        let catalog = CatalogIndex::new(Scope::Archived);
        catalog
            .register_unique(&url(), ValueKind::Text, "/a".into(), 1, None, 1)
            .unwrap();
        catalog.persist(&store).unwrap();
        catalog.unregister_unique(&url(), &"/a".into(), 1, 1).unwrap();
        let report = catalog.persist(&store).unwrap();
        assert_eq!(report.removed, 1);
        assert!(report.directory_rewritten);

        let loaded = CatalogIndex::load(Scope::Archived, &store).unwrap();
        assert!(loaded.attribute_keys().is_empty());
    }

    #[test]
    fn failed_removal_is_retried_on_next_persist() {
        let refuse_removals = Arc::new(AtomicBool::new(false));
        let backend = RemovalFailingBackend {
            inner: InMemoryPartBackend::new(),
            refuse_removals: Arc::clone(&refuse_removals),
        };
        let store = PartStore::open(Box::new(backend), Config::default()).unwrap();
        let catalog = CatalogIndex::new(Scope::Live);
        catalog
            .register_unique(&url(), ValueKind::Text, "/a".into(), 1, None, 1)
            .unwrap();
        catalog.persist(&store).unwrap();
        catalog.unregister_unique(&url(), &"/a".into(), 1, 1).unwrap();

        refuse_removals.store(true, Ordering::SeqCst);
        assert!(matches!(catalog.persist(&store), Err(CoreError::Storage(_))));

        refuse_removals.store(false, Ordering::SeqCst);
        let report = catalog.persist(&store).unwrap();
        assert_eq!(report.removed, 1);
        assert!(report.directory_rewritten);
        let stored = store
            .addresses()
            .unwrap()
            .into_iter()
            .filter(|address| address.kind == PartKind::GlobalUnique.as_byte())
            .count();
        assert_eq!(stored, 0);

        let idle = catalog.persist(&store).unwrap();
        assert_eq!(idle.removed, 0);
    }

    #[test]
    fn wrong_kind_does_not_create_index() {
        let catalog = CatalogIndex::new(Scope::Live);
        assert!(catalog
            .register_unique(&url(), ValueKind::Text, 5.into(), 1, None, 1)
            .is_err());
        assert!(catalog.attribute_keys().is_empty());
    }
}
