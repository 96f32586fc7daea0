//! Entity index composite.
//!
//! An [`EntityIndex`] is the live in-memory form of one collection index:
//! membership bitmaps plus every specialized index belonging to it. Each
//! specialized index is persisted as its own part; the directory part is
//! rewritten only when membership or the set of children changes.
//!
//! Loading reads the directory first and fetches exactly the children it
//! lists.

use crate::bitmap::Bitmap;
use crate::compressor::CompressibleKey;
use crate::directory::{attribute_part_kind, EntityIndexStoragePart};
use crate::error::{CoreError, CoreResult};
use crate::index::{
    AttributeCardinalityIndex, AttributeCardinalityIndexStoragePart, ChainIndex,
    ChainIndexStoragePart, FacetIndex, FacetIndexStoragePart, FilterIndex, FilterIndexStoragePart,
    HierarchyIndex, HierarchyIndexStoragePart, PriceIndexVariant, PriceListAndCurrencyIndex,
    PriceListAndCurrencyIndexStoragePart, ReferenceTypeCardinalityIndex,
    ReferenceTypeCardinalityIndexStoragePart, SortComparator, SortIndex, SortIndexStoragePart,
    UniqueIndex, UniqueIndexStoragePart,
};
use crate::part::{PartIdentity, PartKind};
use crate::store::PartStore;
use crate::types::{
    AttributeIndexKey, AttributeIndexStorageKey, AttributeIndexType, EntityIndexKey,
    EntityIndexKind, Locale, PriceIndexKey,
};
use crate::value::{AttributeValue, ValueKind};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of an entity index persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Specialized parts written.
    pub written: usize,
    /// Specialized parts removed.
    pub removed: usize,
    /// True if the directory part was rewritten.
    pub directory_rewritten: bool,
    /// Version after the persist.
    pub version: u64,
}

/// Live composite of one entity index.
#[derive(Debug, Clone)]
pub struct EntityIndex {
    primary_key: u32,
    entity_index_key: EntityIndexKey,
    version: u64,
    entity_ids: Bitmap,
    entity_ids_by_locale: BTreeMap<Locale, Bitmap>,
    unique_indexes: BTreeMap<AttributeIndexKey, UniqueIndex>,
    filter_indexes: BTreeMap<AttributeIndexKey, FilterIndex>,
    sort_indexes: BTreeMap<AttributeIndexKey, SortIndex>,
    chain_indexes: BTreeMap<AttributeIndexKey, ChainIndex>,
    cardinality_indexes: BTreeMap<AttributeIndexKey, AttributeCardinalityIndex>,
    price_indexes: BTreeMap<PriceIndexKey, PriceListAndCurrencyIndex>,
    hierarchy: Option<HierarchyIndex>,
    facet_indexes: BTreeMap<String, FacetIndex>,
    reference_type_cardinality: Option<ReferenceTypeCardinalityIndex>,
    legacy_internal_price_id_sequence: Option<u32>,
    stored: Option<EntityIndexStoragePart>,
}

impl EntityIndex {
    /// Creates an empty, never persisted entity index.
    #[must_use]
    pub fn new(primary_key: u32, entity_index_key: EntityIndexKey) -> Self {
        Self {
            primary_key,
            entity_index_key,
            version: 0,
            entity_ids: Bitmap::new(),
            entity_ids_by_locale: BTreeMap::new(),
            unique_indexes: BTreeMap::new(),
            filter_indexes: BTreeMap::new(),
            sort_indexes: BTreeMap::new(),
            chain_indexes: BTreeMap::new(),
            cardinality_indexes: BTreeMap::new(),
            price_indexes: BTreeMap::new(),
            hierarchy: None,
            facet_indexes: BTreeMap::new(),
            reference_type_cardinality: None,
            legacy_internal_price_id_sequence: None,
            stored: None,
        }
    }

    /// Primary key of the index; also the id of its directory part.
    #[must_use]
    pub fn primary_key(&self) -> u32 {
        self.primary_key
    }

    /// Key of the index.
    #[must_use]
    pub fn entity_index_key(&self) -> &EntityIndexKey {
        &self.entity_index_key
    }

    /// Version of the last committing persist.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Internal price id sequence inherited from a version 1 directory.
    #[must_use]
    pub fn legacy_internal_price_id_sequence(&self) -> Option<u32> {
        self.legacy_internal_price_id_sequence
    }

    // Membership

    /// All indexed entities.
    #[must_use]
    pub fn entity_ids(&self) -> &Bitmap {
        &self.entity_ids
    }

    /// Entities indexed under `locale`.
    #[must_use]
    pub fn entity_ids_for_locale(&self, locale: &Locale) -> Bitmap {
        self.entity_ids_by_locale.get(locale).cloned().unwrap_or_default()
    }

    /// Locales with at least one entity.
    pub fn locales(&self) -> impl Iterator<Item = &Locale> {
        self.entity_ids_by_locale.keys()
    }

    /// Adds an entity. Returns false if it was already indexed.
    pub fn insert_entity(&mut self, pk: u32) -> bool {
        self.entity_ids.insert(pk)
    }

    /// Removes an entity and its locales. Returns false if it was absent.
    pub fn remove_entity(&mut self, pk: u32) -> bool {
        if !self.entity_ids.remove(pk) {
            return false;
        }
        self.entity_ids_by_locale.retain(|_, entities| {
            entities.remove(pk);
            !entities.is_empty()
        });
        true
    }

    /// Marks an indexed entity as present in `locale`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the entity is not indexed.
    pub fn add_entity_locale(&mut self, pk: u32, locale: Locale) -> CoreResult<()> {
        if !self.entity_ids.contains(pk) {
            return Err(CoreError::invalid_operation(format!(
                "entity {pk} is not indexed in {}",
                self.entity_index_key
            )));
        }
        self.entity_ids_by_locale.entry(locale).or_default().insert(pk);
        Ok(())
    }

    /// Removes `locale` from an entity. Returns false if it was not set.
    pub fn remove_entity_locale(&mut self, pk: u32, locale: &Locale) -> bool {
        let Some(entities) = self.entity_ids_by_locale.get_mut(locale) else {
            return false;
        };
        let removed = entities.remove(pk);
        if entities.is_empty() {
            self.entity_ids_by_locale.remove(locale);
        }
        removed
    }

    // Attribute indexes

    /// Unique index of `key`, if any.
    #[must_use]
    pub fn unique_index(&self, key: &AttributeIndexKey) -> Option<&UniqueIndex> {
        self.unique_indexes.get(key)
    }

    /// Unique index of `key`, created with `value_kind` if absent.
    pub fn unique_index_mut(&mut self, key: &AttributeIndexKey, value_kind: ValueKind) -> &mut UniqueIndex {
        self.unique_indexes
            .entry(key.clone())
            .or_insert_with(|| UniqueIndex::new(key.clone(), value_kind))
    }

    /// Filter index of `key`, if any.
    #[must_use]
    pub fn filter_index(&self, key: &AttributeIndexKey) -> Option<&FilterIndex> {
        self.filter_indexes.get(key)
    }

    /// Attribute cardinality index of `key`, if any.
    #[must_use]
    pub fn attribute_cardinality_index(&self, key: &AttributeIndexKey) -> Option<&AttributeCardinalityIndex> {
        self.cardinality_indexes.get(key)
    }

    fn counts_attribute_cardinality(&self) -> bool {
        self.entity_index_key.kind == EntityIndexKind::ReferencedEntityType
    }

    /// Adds `pk` to the filter bucket of `value`.
    ///
    /// Referenced entity type indexes also count the value in the attribute
    /// cardinality index of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] on a value of the wrong kind
    /// or if the cardinality of `value` would overflow.
    pub fn add_filter_value(
        &mut self,
        key: &AttributeIndexKey,
        value_kind: ValueKind,
        value: AttributeValue,
        pk: u32,
    ) -> CoreResult<()> {
        let counts = self.counts_attribute_cardinality();
        let filter = self
            .filter_indexes
            .entry(key.clone())
            .or_insert_with(|| FilterIndex::new(key.clone(), value_kind));
        let added = !filter.records_equal_to(&value).contains(pk);
        filter.insert(value.clone(), pk)?;
        if counts && added {
            let cardinality = self.cardinality_indexes.entry(key.clone()).or_default();
            if let Err(err) = cardinality.increment(value.clone()) {
                filter.remove(&value, pk)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Removes `pk` from the filter bucket of `value`.
    ///
    /// Returns true if this was the last occurrence of `value` in the index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the pair is not indexed.
    pub fn remove_filter_value(
        &mut self,
        key: &AttributeIndexKey,
        value: &AttributeValue,
        pk: u32,
    ) -> CoreResult<bool> {
        let counts = self.counts_attribute_cardinality();
        let Some(filter) = self.filter_indexes.get_mut(key) else {
            return Err(CoreError::invalid_operation(format!(
                "no filter index for {key} in {}",
                self.entity_index_key
            )));
        };
        filter.remove(value, pk)?;
        if !counts {
            return Ok(filter.records_equal_to(value).is_empty());
        }
        let cardinality = self.cardinality_indexes.get_mut(key).ok_or_else(|| {
            CoreError::invalid_operation(format!("no attribute cardinality for {key}"))
        })?;
        Ok(cardinality.decrement(value)? == 0)
    }

    /// Sort index of `key`, if any.
    #[must_use]
    pub fn sort_index(&self, key: &AttributeIndexKey) -> Option<&SortIndex> {
        self.sort_indexes.get(key)
    }

    /// Sort index of `key`, created with `comparator` if absent.
    pub fn sort_index_mut(&mut self, key: &AttributeIndexKey, comparator: SortComparator) -> &mut SortIndex {
        self.sort_indexes
            .entry(key.clone())
            .or_insert_with(|| SortIndex::new(key.clone(), comparator))
    }

    /// All sort indexes.
    pub fn sort_indexes(&self) -> impl Iterator<Item = &SortIndex> {
        self.sort_indexes.values()
    }

    /// Chain index of `key`, if any.
    #[must_use]
    pub fn chain_index(&self, key: &AttributeIndexKey) -> Option<&ChainIndex> {
        self.chain_indexes.get(key)
    }

    /// Chain index of `key`, created if absent.
    pub fn chain_index_mut(&mut self, key: &AttributeIndexKey) -> &mut ChainIndex {
        self.chain_indexes
            .entry(key.clone())
            .or_insert_with(|| ChainIndex::new(key.clone()))
    }

    /// All chain indexes.
    pub fn chain_indexes(&self) -> impl Iterator<Item = &ChainIndex> {
        self.chain_indexes.values()
    }

    // Prices

    /// Price index of `key`, if any.
    #[must_use]
    pub fn price_index(&self, key: &PriceIndexKey) -> Option<&PriceListAndCurrencyIndex> {
        self.price_indexes.get(key)
    }

    /// Price index of `key`, created as `variant` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if an index of the other
    /// variant exists under `key`.
    pub fn price_index_mut(
        &mut self,
        key: &PriceIndexKey,
        variant: PriceIndexVariant,
    ) -> CoreResult<&mut PriceListAndCurrencyIndex> {
        let index = self.price_indexes.entry(key.clone()).or_insert_with(|| match variant {
            PriceIndexVariant::Super => PriceListAndCurrencyIndex::new_super(key.clone()),
            PriceIndexVariant::Ref => PriceListAndCurrencyIndex::new_ref(key.clone()),
        });
        if index.variant() != variant {
            return Err(CoreError::invalid_operation(format!(
                "price index {key} of entity index {} is a {} index, not {variant}",
                self.primary_key,
                index.variant()
            )));
        }
        Ok(index)
    }

    // Hierarchy, facets and reference cardinality

    /// Hierarchy index, if any.
    #[must_use]
    pub fn hierarchy(&self) -> Option<&HierarchyIndex> {
        self.hierarchy.as_ref()
    }

    /// Hierarchy index, created if absent.
    pub fn hierarchy_mut(&mut self) -> &mut HierarchyIndex {
        self.hierarchy.get_or_insert_with(HierarchyIndex::new)
    }

    /// Facet index of `reference_name`, if any.
    #[must_use]
    pub fn facet_index(&self, reference_name: &str) -> Option<&FacetIndex> {
        self.facet_indexes.get(reference_name)
    }

    /// Facet index of `reference_name`, created if absent.
    pub fn facet_index_mut(&mut self, reference_name: &str) -> &mut FacetIndex {
        self.facet_indexes
            .entry(reference_name.to_string())
            .or_insert_with(|| FacetIndex::new(reference_name))
    }

    /// Reference type cardinality index, if any.
    #[must_use]
    pub fn reference_type_cardinality(&self) -> Option<&ReferenceTypeCardinalityIndex> {
        self.reference_type_cardinality.as_ref()
    }

    /// Reference type cardinality index, created if absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless this is a referenced
    /// entity type index.
    pub fn reference_type_cardinality_mut(&mut self) -> CoreResult<&mut ReferenceTypeCardinalityIndex> {
        if self.entity_index_key.kind != EntityIndexKind::ReferencedEntityType {
            return Err(CoreError::invalid_operation(format!(
                "{} does not count reference types",
                self.entity_index_key
            )));
        }
        Ok(self
            .reference_type_cardinality
            .get_or_insert_with(ReferenceTypeCardinalityIndex::new))
    }

    // Persistence

    fn attribute_storage_key(&self, index_type: AttributeIndexType, key: &AttributeIndexKey) -> AttributeIndexStorageKey {
        AttributeIndexStorageKey {
            entity_index_key: self.entity_index_key.clone(),
            index_type,
            attribute_key: key.clone(),
        }
    }

    /// Snapshots the directory part of this index.
    #[must_use]
    pub fn create_storage_part(&self) -> EntityIndexStoragePart {
        let mut part = EntityIndexStoragePart::new(self.primary_key, self.entity_index_key.clone());
        part.version = self.version;
        part.entity_ids = self.entity_ids.clone();
        part.entity_ids_by_locale = self.entity_ids_by_locale.clone();

        let typed_keys = [
            (AttributeIndexType::Unique, self.unique_indexes.keys().collect::<Vec<_>>()),
            (AttributeIndexType::Filter, self.filter_indexes.keys().collect()),
            (AttributeIndexType::Sort, self.sort_indexes.keys().collect()),
            (AttributeIndexType::Chain, self.chain_indexes.keys().collect()),
            (AttributeIndexType::Cardinality, self.cardinality_indexes.keys().collect()),
        ];
        for (index_type, keys) in typed_keys {
            part.attribute_index_keys
                .extend(keys.into_iter().map(|key| self.attribute_storage_key(index_type, key)));
        }
        part.price_index_keys = self.price_indexes.keys().cloned().collect();
        part.has_hierarchy = self.hierarchy.is_some();
        part.facet_reference_names = self.facet_indexes.keys().cloned().collect();
        part.has_reference_type_cardinality = self.reference_type_cardinality.is_some();
        part.legacy_internal_price_id_sequence = self.legacy_internal_price_id_sequence;
        part
    }

    fn prune_empty(&mut self) {
        self.unique_indexes.retain(|_, index| !index.is_empty());
        self.filter_indexes.retain(|_, index| !index.is_empty());
        self.sort_indexes.retain(|_, index| !index.is_empty());
        self.chain_indexes.retain(|_, index| !index.is_empty());
        self.cardinality_indexes.retain(|_, index| !index.is_empty());
        self.price_indexes.retain(|_, index| !index.is_empty());
        self.facet_indexes.retain(|_, index| !index.is_empty());
        if self.hierarchy.as_ref().is_some_and(HierarchyIndex::is_empty) {
            self.hierarchy = None;
        }
        if self
            .reference_type_cardinality
            .as_ref()
            .is_some_and(ReferenceTypeCardinalityIndex::is_empty)
        {
            self.reference_type_cardinality = None;
        }
    }

    fn write_dirty_children(&mut self, store: &PartStore) -> CoreResult<usize> {
        let pk = self.primary_key;
        let mut written = 0;

        for index in self.unique_indexes.values_mut().filter(|index| index.is_dirty()) {
            store.put(&mut index.create_storage_part(pk))?;
            index.mark_clean();
            written += 1;
        }
        for index in self.filter_indexes.values_mut().filter(|index| index.is_dirty()) {
            store.put(&mut index.create_storage_part(pk))?;
            index.mark_clean();
            written += 1;
        }
        for index in self.sort_indexes.values_mut().filter(|index| index.is_dirty()) {
            store.put(&mut index.create_storage_part(pk))?;
            index.mark_clean();
            written += 1;
        }
        for index in self.chain_indexes.values_mut().filter(|index| index.is_dirty()) {
            store.put(&mut index.create_storage_part(pk))?;
            index.mark_clean();
            written += 1;
        }
        for (key, index) in self.cardinality_indexes.iter_mut().filter(|(_, index)| index.is_dirty()) {
            store.put(&mut index.create_storage_part(pk, key))?;
            index.mark_clean();
            written += 1;
        }
        for index in self.price_indexes.values_mut().filter(|index| index.is_dirty()) {
            store.put(&mut index.create_storage_part(pk))?;
            index.mark_clean();
            written += 1;
        }
        for index in self.facet_indexes.values_mut().filter(|index| index.is_dirty()) {
            store.put(&mut index.create_storage_part(pk))?;
            index.mark_clean();
            written += 1;
        }
        if let Some(hierarchy) = self.hierarchy.as_mut().filter(|index| index.is_dirty()) {
            store.put(&mut hierarchy.create_storage_part(pk))?;
            hierarchy.mark_clean();
            written += 1;
        }
        if let Some(cardinality) = self
            .reference_type_cardinality
            .as_mut()
            .filter(|index| index.is_dirty())
        {
            let reference_name = self
                .entity_index_key
                .discriminator
                .as_ref()
                .map(|discriminator| discriminator.reference_name())
                .ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "{} has no reference name",
                        self.entity_index_key
                    ))
                })?;
            store.put(&mut cardinality.create_storage_part(pk, reference_name))?;
            cardinality.mark_clean();
            written += 1;
        }
        Ok(written)
    }

    /// Persists every changed child, removes dropped children and rewrites
    /// the directory if its content changed.
    ///
    /// Empty child indexes are dropped first. The version is bumped once if
    /// anything was written or removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityMismatch`] if a child recomputes to
    /// another id, or a codec or storage error.
    pub fn persist(&mut self, store: &PartStore) -> CoreResult<PersistReport> {
        self.prune_empty();
        let mut report = PersistReport {
            written: self.write_dirty_children(store)?,
            ..PersistReport::default()
        };

        let mut directory = self.create_storage_part();
        let current: BTreeSet<_> = directory.child_addresses(store.compressor())?.into_iter().collect();
        if let Some(stored) = &self.stored {
            for address in stored.child_addresses(store.compressor())? {
                if !current.contains(&address) && store.remove(address)? {
                    report.removed += 1;
                }
            }
        }

        let rewrite = self
            .stored
            .as_ref()
            .map_or(true, |stored| stored.upgraded_from_legacy || !stored.same_content(&directory));
        if report.written > 0 || report.removed > 0 || rewrite {
            self.version += 1;
        }
        if rewrite {
            directory.version = self.version;
            store.put(&mut directory)?;
            self.stored = Some(directory);
        }
        report.directory_rewritten = rewrite;
        report.version = self.version;
        tracing::debug!(
            entity_index = self.primary_key,
            written = report.written,
            removed = report.removed,
            directory_rewritten = rewrite,
            version = self.version,
            "persisted entity index"
        );
        Ok(report)
    }

    /// Loads the entity index stored under `primary_key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingStoragePart`] if the directory or a
    /// child it names is absent, [`CoreError::PartCorruption`] if a child
    /// is inconsistent, or a decoding error.
    pub fn load(primary_key: u32, store: &PartStore) -> CoreResult<Self> {
        let directory: EntityIndexStoragePart =
            store.get_required(u64::from(primary_key), &format!("entity index {primary_key}"))?;
        let mut index = Self::new(primary_key, directory.entity_index_key.clone());
        index.version = directory.version;
        index.entity_ids = directory.entity_ids.clone();
        index.entity_ids_by_locale = directory.entity_ids_by_locale.clone();
        index.legacy_internal_price_id_sequence = directory.legacy_internal_price_id_sequence;

        for storage_key in &directory.attribute_index_keys {
            if storage_key.entity_index_key != directory.entity_index_key {
                return Err(CoreError::part_corruption(format!(
                    "entity index {primary_key} lists an attribute index of {}",
                    storage_key.entity_index_key
                )));
            }
            let key = &storage_key.attribute_key;
            let kind = attribute_part_kind(storage_key.index_type);
            let id = child_id(primary_key, kind, CompressibleKey::Attribute(key.clone()), store)?;
            match storage_key.index_type {
                AttributeIndexType::Unique => {
                    let part: UniqueIndexStoragePart = store.get_required(id, key)?;
                    index.unique_indexes.insert(key.clone(), UniqueIndex::from_storage_part(part)?);
                }
                AttributeIndexType::Filter => {
                    let part: FilterIndexStoragePart = store.get_required(id, key)?;
                    index.filter_indexes.insert(key.clone(), FilterIndex::from_storage_part(part)?);
                }
                AttributeIndexType::Sort => {
                    let part: SortIndexStoragePart = store.get_required(id, key)?;
                    index.sort_indexes.insert(key.clone(), SortIndex::from_storage_part(part)?);
                }
                AttributeIndexType::Chain => {
                    let part: ChainIndexStoragePart = store.get_required(id, key)?;
                    index.chain_indexes.insert(key.clone(), ChainIndex::from_storage_part(part));
                }
                AttributeIndexType::Cardinality => {
                    let part: AttributeCardinalityIndexStoragePart = store.get_required(id, key)?;
                    index
                        .cardinality_indexes
                        .insert(key.clone(), AttributeCardinalityIndex::from_storage_part(part)?);
                }
            }
        }

        for key in &directory.price_index_keys {
            let id = child_id(primary_key, PartKind::Price, CompressibleKey::Price(key.clone()), store)?;
            let part: PriceListAndCurrencyIndexStoragePart = store.get_required(id, key)?;
            index
                .price_indexes
                .insert(key.clone(), PriceListAndCurrencyIndex::from_storage_part(part)?);
        }

        if directory.has_hierarchy {
            let part: HierarchyIndexStoragePart =
                store.get_required(u64::from(primary_key), &"hierarchy")?;
            index.hierarchy = Some(HierarchyIndex::from_storage_part(part));
        }

        for name in &directory.facet_reference_names {
            let id = child_id(primary_key, PartKind::Facet, CompressibleKey::Reference(name.clone()), store)?;
            let part: FacetIndexStoragePart = store.get_required(id, name)?;
            index.facet_indexes.insert(name.clone(), FacetIndex::from_storage_part(part));
        }

        if directory.has_reference_type_cardinality {
            let name = directory.cardinality_reference_name()?;
            let key = CompressibleKey::Reference(name.to_string());
            let id = child_id(primary_key, PartKind::ReferenceTypeCardinality, key, store)?;
            let part: ReferenceTypeCardinalityIndexStoragePart = store.get_required(id, &name)?;
            index.reference_type_cardinality =
                Some(ReferenceTypeCardinalityIndex::from_storage_part(part)?);
        }

        if directory.upgraded_from_legacy {
            tracing::info!(
                entity_index = primary_key,
                version = directory.version,
                "loaded legacy entity index directory, it is rewritten on next persist"
            );
        }
        tracing::debug!(
            entity_index = primary_key,
            children = directory.attribute_index_keys.len()
                + directory.price_index_keys.len()
                + directory.facet_reference_names.len(),
            "loaded entity index"
        );
        index.stored = Some(directory);
        Ok(index)
    }

    /// Returns true if the next persist would write anything.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let children_dirty = self.unique_indexes.values().any(UniqueIndex::is_dirty)
            || self.filter_indexes.values().any(FilterIndex::is_dirty)
            || self.sort_indexes.values().any(SortIndex::is_dirty)
            || self.chain_indexes.values().any(ChainIndex::is_dirty)
            || self.cardinality_indexes.values().any(AttributeCardinalityIndex::is_dirty)
            || self.price_indexes.values().any(PriceListAndCurrencyIndex::is_dirty)
            || self.facet_indexes.values().any(FacetIndex::is_dirty)
            || self.hierarchy.as_ref().is_some_and(HierarchyIndex::is_dirty)
            || self
                .reference_type_cardinality
                .as_ref()
                .is_some_and(ReferenceTypeCardinalityIndex::is_dirty);
        children_dirty
            || self.stored.as_ref().map_or(true, |stored| {
                stored.upgraded_from_legacy || !stored.same_content(&self.create_storage_part())
            })
    }

    /// Removes the directory and every child it lists. Returns the number
    /// of removed parts.
    ///
    /// # Errors
    ///
    /// Returns an error if a child key cannot be resolved or removal fails.
    pub fn drop_index(self, store: &PartStore) -> CoreResult<usize> {
        let Some(stored) = self.stored else {
            return Ok(0);
        };
        let mut removed = 0;
        for address in stored.child_addresses(store.compressor())? {
            if store.remove(address)? {
                removed += 1;
            }
        }
        if store.remove(PartKind::EntityIndex.address(u64::from(self.primary_key)))? {
            removed += 1;
        }
        tracing::debug!(entity_index = self.primary_key, removed, "dropped entity index");
        Ok(removed)
    }
}

fn child_id(owner: u32, kind: PartKind, key: CompressibleKey, store: &PartStore) -> CoreResult<u64> {
    let rendered = key.to_string();
    PartIdentity::Keyed { owner, key }
        .resolve_existing(store.compressor())?
        .ok_or_else(|| CoreError::missing_part(kind, format!("{rendered} of entity index {owner}")))
}
