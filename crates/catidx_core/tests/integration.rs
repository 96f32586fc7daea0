//! Integration tests for entity and catalog index persistence.

use catidx_core::index::{PriceIndexVariant, PriceRecord, SortComparator, UniqueIndex};
use catidx_core::{
    codec, AttributeIndexKey, AttributeKey, AttributeValue, CatalogIndex, Config, CoreError,
    Currency, EntityIndex, EntityIndexKey, EntityIndexStoragePart, KeyCompressor,
    LegacyEntityIndexStoragePart, Locale, PartKind, PartStore, PriceIndexKey,
    PriceInnerRecordHandling, Scope, StoragePart, UniqueIndexStoragePart, ValueKind, ValueRange,
    KEY_COMPRESSOR_PART_ID,
};
use catidx_storage::InMemoryPartBackend;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;

fn code() -> AttributeIndexKey {
    AttributeIndexKey::new("code")
}

fn validity() -> AttributeIndexKey {
    AttributeIndexKey::new("validity")
}

fn priority() -> AttributeIndexKey {
    AttributeIndexKey::new("priority")
}

fn order() -> AttributeIndexKey {
    AttributeIndexKey::new("order")
}

fn basic_eur() -> PriceIndexKey {
    PriceIndexKey::new("basic", Currency::new("EUR"), PriceInnerRecordHandling::None)
}

fn price(
    internal_price_id: u32,
    entity_pk: u32,
    amount: i64,
    validity: Option<ValueRange>,
) -> PriceRecord {
    PriceRecord {
        internal_price_id,
        price_id: internal_price_id,
        entity_pk,
        price_without_tax: amount,
        price_with_tax: amount + amount / 5,
        inner_record_id: None,
        validity,
    }
}

/// Global index touching every child kind it can hold.
fn populated_index() -> EntityIndex {
    let mut index = EntityIndex::new(1, EntityIndexKey::global(Scope::Live));
    for pk in 1..=4 {
        index.insert_entity(pk);
    }
    index.add_entity_locale(1, Locale::new("en")).unwrap();
    index.add_entity_locale(2, Locale::new("de")).unwrap();

    let unique = index.unique_index_mut(&code(), ValueKind::Text);
    for (value, pk) in [("A-1", 1), ("A-2", 2), ("B-1", 3)] {
        unique.put(value.into(), pk).unwrap();
    }

    index
        .add_filter_value(&validity(), ValueKind::Range, ValueRange::between(10, 20).into(), 1)
        .unwrap();
    index
        .add_filter_value(&validity(), ValueKind::Range, ValueRange::since(30).into(), 2)
        .unwrap();

    let sort = index.sort_index_mut(&priority(), SortComparator::new(ValueKind::Int));
    sort.insert(5.into(), 1).unwrap();
    sort.insert(1.into(), 2).unwrap();
    sort.insert(5.into(), 3).unwrap();

    let chain = index.chain_index_mut(&order());
    chain.upsert_predecessor(1, None).unwrap();
    chain.upsert_predecessor(3, Some(1)).unwrap();
    chain.upsert_predecessor(2, Some(3)).unwrap();

    let prices = index.price_index_mut(&basic_eur(), PriceIndexVariant::Super).unwrap();
    prices.add_price(price(1, 1, 100, None)).unwrap();
    prices.add_price(price(2, 2, 250, Some(ValueRange::until(50)))).unwrap();

    let hierarchy = index.hierarchy_mut();
    hierarchy.set_hierarchy_for(1, None, 0).unwrap();
    hierarchy.set_hierarchy_for(2, Some(1), 1).unwrap();
    hierarchy.set_hierarchy_for(3, Some(1), 0).unwrap();
    hierarchy.set_hierarchy_for(4, Some(77), 0).unwrap();

    let facets = index.facet_index_mut("brand");
    facets.add_facet(100, None, 1);
    facets.add_facet(100, None, 2);
    facets.add_facet(200, Some(7), 3);
    index
}

fn assert_populated(index: &EntityIndex) {
    assert_eq!(index.entity_ids().to_vec(), vec![1, 2, 3, 4]);
    assert_eq!(index.entity_ids_for_locale(&Locale::new("de")).to_vec(), vec![2]);

    let unique = index.unique_index(&code()).unwrap();
    assert_eq!(unique.lookup(&"A-2".into()), Some(2));
    assert_eq!(unique.record_ids().to_vec(), vec![1, 2, 3]);

    let filter = index.filter_index(&validity()).unwrap();
    let ranges = filter.range_index().unwrap();
    assert_eq!(ranges.valid_at(15).to_vec(), vec![1]);
    assert_eq!(ranges.valid_at(40).to_vec(), vec![2]);
    assert_eq!(ranges.valid_before(25).to_vec(), vec![1]);
    assert_eq!(filter.all_records().to_vec(), vec![1, 2]);

    let sort = index.sort_index(&priority()).unwrap();
    assert_eq!(sort.ascending(), &[2, 1, 3]);
    assert!(sort.is_consistent());

    let chain = index.chain_index(&order()).unwrap();
    assert_eq!(chain.ordered_pks(), vec![1, 3, 2]);
    assert!(chain.is_consistent());

    let prices = index.price_index(&basic_eur()).unwrap();
    assert_eq!(prices.variant(), PriceIndexVariant::Super);
    assert_eq!(prices.record(2).unwrap().price_without_tax, 250);
    assert_eq!(prices.valid_at(60).to_vec(), vec![1]);

    let hierarchy = index.hierarchy().unwrap();
    assert_eq!(hierarchy.roots(), &[1]);
    assert_eq!(hierarchy.children(1), &[3, 2]);
    assert_eq!(hierarchy.orphans(), &[4]);
    assert_eq!(hierarchy.list_from_root(), vec![1, 3, 2]);

    let facets = index.facet_index("brand").unwrap();
    assert_eq!(facets.entities_with_facet(100).to_vec(), vec![1, 2]);
    assert_eq!(facets.entities_with_facet_in_group(7, 200).to_vec(), vec![3]);
    assert_eq!(facets.groups(), vec![7]);
}

#[test]
fn entity_index_reloads_from_memory() {
    let store = PartStore::in_memory();
    let mut index = populated_index();
    let report = index.persist(&store).unwrap();
    assert_eq!(report.written, 7);
    assert!(report.directory_rewritten);

    let loaded = EntityIndex::load(1, &store).unwrap();
    assert_populated(&loaded);
    assert_eq!(loaded.version(), 1);
    assert!(!loaded.is_dirty());
}

#[test]
fn entity_index_reloads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog").join("parts.cix");
    {
        let store = PartStore::open_file(&path, Config::default()).unwrap();
        populated_index().persist(&store).unwrap();
        store.close().unwrap();
    }

    let store = PartStore::open_file(&path, Config::default()).unwrap();
    let loaded = EntityIndex::load(1, &store).unwrap();
    assert_populated(&loaded);
}

#[test]
fn referenced_entity_type_index_reloads_cardinalities() {
    let store = PartStore::in_memory();
    let key = EntityIndexKey::referenced_entity_type(Scope::Live, "brand");
    let mut index = EntityIndex::new(5, key);
    for pk in [1, 2, 3] {
        index.insert_entity(pk);
        index.add_filter_value(&code(), ValueKind::Text, "X".into(), pk).unwrap();
    }
    let references = index.reference_type_cardinality_mut().unwrap();
    references.increment(40).unwrap();
    references.increment(40).unwrap();
    references.increment(41).unwrap();
    index.persist(&store).unwrap();

    let mut loaded = EntityIndex::load(5, &store).unwrap();
    let x: AttributeValue = "X".into();
    assert_eq!(loaded.attribute_cardinality_index(&code()).unwrap().count(&x), 3);
    let references = loaded.reference_type_cardinality().unwrap();
    assert_eq!(references.count(&40), 2);
    assert_eq!(references.count(&41), 1);

    assert!(!loaded.remove_filter_value(&code(), &x, 1).unwrap());
    assert!(!loaded.remove_filter_value(&code(), &x, 2).unwrap());
    assert!(loaded.remove_filter_value(&code(), &x, 3).unwrap());
}

#[test]
fn missing_child_fails_load() {
    let store = PartStore::in_memory();
    populated_index().persist(&store).unwrap();

    let directory: EntityIndexStoragePart = store.get(1).unwrap().unwrap();
    let sort_address = directory
        .child_addresses(store.compressor())
        .unwrap()
        .into_iter()
        .find(|address| address.kind == PartKind::Sort.as_byte())
        .unwrap();
    assert!(store.remove(sort_address).unwrap());

    let err = EntityIndex::load(1, &store).unwrap_err();
    assert!(matches!(err, CoreError::MissingStoragePart { kind: PartKind::Sort, .. }));
    assert!(err.is_fatal());
}

#[test]
fn absent_directory_is_missing() {
    let store = PartStore::in_memory();
    assert!(matches!(
        EntityIndex::load(9, &store),
        Err(CoreError::MissingStoragePart { kind: PartKind::EntityIndex, .. })
    ));
}

#[test]
fn child_change_keeps_stored_directory() {
    let store = PartStore::in_memory();
    let mut index = populated_index();
    index.persist(&store).unwrap();

    index
        .sort_index_mut(&priority(), SortComparator::new(ValueKind::Int))
        .insert(3.into(), 4)
        .unwrap();
    let report = index.persist(&store).unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(report.removed, 0);
    assert!(!report.directory_rewritten);
    assert_eq!(report.version, 2);

    let directory: EntityIndexStoragePart = store.get(1).unwrap().unwrap();
    assert_eq!(directory.version, 1);

    let loaded = EntityIndex::load(1, &store).unwrap();
    assert_eq!(loaded.sort_index(&priority()).unwrap().ascending(), &[2, 4, 1, 3]);
}

#[test]
fn new_child_rewrites_directory() {
    let store = PartStore::in_memory();
    let mut index = populated_index();
    index.persist(&store).unwrap();

    index.facet_index_mut("category").add_facet(5, None, 2);
    let report = index.persist(&store).unwrap();
    assert!(report.directory_rewritten);

    let directory: EntityIndexStoragePart = store.get(1).unwrap().unwrap();
    assert_eq!(directory.version, 2);
    assert!(directory.facet_reference_names.contains("category"));
}

#[test]
fn dropped_index_leaves_nothing_behind() {
    let store = PartStore::in_memory();
    populated_index().persist(&store).unwrap();
    store.flush().unwrap();

    let loaded = EntityIndex::load(1, &store).unwrap();
    assert_eq!(loaded.drop_index(&store).unwrap(), 8);

    let remaining: Vec<_> = store.addresses().unwrap();
    assert_eq!(remaining, vec![PartKind::KeyCompressor.address(KEY_COMPRESSOR_PART_ID)]);
}

#[test]
fn legacy_directory_is_rewritten_on_persist() {
    let legacy = LegacyEntityIndexStoragePart {
        primary_key: 3,
        version: 7,
        entity_index_key: EntityIndexKey::global(Scope::Archived),
        entity_ids: [5, 6].into_iter().collect(),
        entity_ids_by_locale: BTreeMap::new(),
        attribute_index_keys: BTreeSet::new(),
        price_index_keys: BTreeSet::new(),
        has_hierarchy: false,
        facet_reference_names: BTreeSet::new(),
        internal_price_id_sequence: 12,
    };
    let backend = InMemoryPartBackend::new();
    backend.put_raw(
        PartKind::EntityIndex.address(3),
        codec::encode_envelope(PartKind::EntityIndex, 1, &codec::to_cbor(&legacy).unwrap()),
    );
    let store = PartStore::open(Box::new(backend), Config::default()).unwrap();

    let mut index = EntityIndex::load(3, &store).unwrap();
    assert_eq!(index.version(), 7);
    assert_eq!(index.legacy_internal_price_id_sequence(), Some(12));
    assert!(index.is_dirty());

    let report = index.persist(&store).unwrap();
    assert!(report.directory_rewritten);
    assert_eq!(report.version, 8);
    assert!(!index.is_dirty());

    let directory: EntityIndexStoragePart = store.get(3).unwrap().unwrap();
    assert!(!directory.upgraded_from_legacy);
    assert_eq!(directory.version, 8);
    assert_eq!(directory.entity_ids.to_vec(), vec![5, 6]);
}

#[test]
fn price_variant_survives_reload() {
    let store = PartStore::in_memory();
    let mut index = EntityIndex::new(2, EntityIndexKey::referenced_entity(Scope::Live, "brand", 8));
    index
        .price_index_mut(&basic_eur(), PriceIndexVariant::Ref)
        .unwrap()
        .add_price_ref(11, Some(ValueRange::between(0, 100)))
        .unwrap();
    index.persist(&store).unwrap();

    let mut loaded = EntityIndex::load(2, &store).unwrap();
    assert_eq!(loaded.price_index(&basic_eur()).unwrap().price_ids(), vec![11]);
    assert!(matches!(
        loaded.price_index_mut(&basic_eur(), PriceIndexVariant::Super),
        Err(CoreError::InvalidOperation { .. })
    ));
    assert!(loaded.price_index_mut(&basic_eur(), PriceIndexVariant::Ref).is_ok());
}

#[test]
fn global_unique_admits_one_concurrent_owner() {
    let catalog = Arc::new(CatalogIndex::new(Scope::Live));
    let sku = AttributeKey::new("sku");

    let handles: Vec<_> = (0..8u32)
        .map(|pk| {
            let catalog = Arc::clone(&catalog);
            let sku = sku.clone();
            thread::spawn(move || {
                catalog.register_unique(&sku, ValueKind::Text, "SKU-1".into(), 1, None, pk)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| matches!(err, CoreError::UniquenessViolation { .. })));
    assert_eq!(catalog.unique_count(&sku), 1);
}

#[test]
fn catalog_index_reloads_per_scope() {
    let store = PartStore::in_memory();
    let sku = AttributeKey::new("sku");
    let live = CatalogIndex::new(Scope::Live);
    live.register_unique(&sku, ValueKind::Text, "SKU-1".into(), 1, None, 10).unwrap();
    live.persist(&store).unwrap();
    let archived = CatalogIndex::new(Scope::Archived);
    archived
        .register_unique(&sku, ValueKind::Text, "SKU-1".into(), 1, None, 20)
        .unwrap();
    archived.persist(&store).unwrap();

    let live = CatalogIndex::load(Scope::Live, &store).unwrap();
    let archived = CatalogIndex::load(Scope::Archived, &store).unwrap();
    assert_eq!(live.lookup(&sku, &"SKU-1".into()).unwrap().primary_key, 10);
    assert_eq!(archived.lookup(&sku, &"SKU-1".into()).unwrap().primary_key, 20);
}

#[test]
fn part_under_foreign_id_is_rejected() {
    let compressor = KeyCompressor::new();
    let mut index = UniqueIndex::new(code(), ValueKind::Text);
    index.put("A-1".into(), 1).unwrap();
    let mut part = index.create_storage_part(2);
    let id = part.compute_unique_part_id_and_set(&compressor).unwrap();

    let backend = InMemoryPartBackend::new();
    backend.put_raw(
        PartKind::KeyCompressor.address(KEY_COMPRESSOR_PART_ID),
        codec::encode_part(&compressor.create_storage_part().unwrap()).unwrap(),
    );
    let foreign = id + 1;
    backend.put_raw(PartKind::Unique.address(foreign), codec::encode_part(&part).unwrap());

    let store = PartStore::open(Box::new(backend), Config::default()).unwrap();
    assert!(store.get::<UniqueIndexStoragePart>(id).unwrap().is_none());
    let err = store.get::<UniqueIndexStoragePart>(foreign).unwrap_err();
    assert!(matches!(
        err,
        CoreError::IdentityMismatch { kind: PartKind::Unique, assigned, computed }
            if assigned == foreign && computed == id
    ));

    let relaxed = Config::default().verify_identity_on_read(false);
    let backend = InMemoryPartBackend::new();
    backend.put_raw(PartKind::Unique.address(foreign), codec::encode_part(&part).unwrap());
    let store = PartStore::open(Box::new(backend), relaxed).unwrap();
    assert!(store.get::<UniqueIndexStoragePart>(foreign).unwrap().is_some());
}
