//! Entity index directory part.
//!
//! The directory of an entity index holds the membership bitmaps and the
//! keys of every specialized part belonging to the index. Loading an index
//! starts here: [`EntityIndexStoragePart::child_addresses`] turns the keys
//! into the backend addresses to fetch.

use crate::bitmap::Bitmap;
use crate::codec;
use crate::compressor::{CompressibleKey, KeyCompressor};
use crate::error::{CoreError, CoreResult};
use crate::part::{compose_part_id, PartIdentity, PartKind, StoragePart};
use crate::types::{
    AttributeIndexStorageKey, AttributeIndexType, EntityIndexKey, Locale, PriceIndexKey,
};
use crate::AnyStoragePart;
use catidx_storage::PartAddress;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Directory of one entity index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Primary key of the entity index; also the part id.
    pub primary_key: u32,
    /// Bumped once per committing persist.
    pub version: u64,
    /// Key of the entity index.
    pub entity_index_key: EntityIndexKey,
    /// All indexed entities.
    pub entity_ids: Bitmap,
    /// Indexed entities per locale.
    pub entity_ids_by_locale: BTreeMap<Locale, Bitmap>,
    /// Attribute indexes of the entity index.
    pub attribute_index_keys: BTreeSet<AttributeIndexStorageKey>,
    /// Price indexes of the entity index.
    pub price_index_keys: BTreeSet<PriceIndexKey>,
    /// True if a hierarchy part exists.
    pub has_hierarchy: bool,
    /// References with a facet part.
    pub facet_reference_names: BTreeSet<String>,
    /// True if a reference type cardinality part exists.
    pub has_reference_type_cardinality: bool,
    /// Internal price id sequence carried by version 1 directories.
    #[serde(skip)]
    pub legacy_internal_price_id_sequence: Option<u32>,
    /// True if decoded from a version 1 body.
    #[serde(skip)]
    pub upgraded_from_legacy: bool,
}

impl EntityIndexStoragePart {
    /// Creates an empty directory.
    #[must_use]
    pub fn new(primary_key: u32, entity_index_key: EntityIndexKey) -> Self {
        Self {
            storage_part_pk: None,
            primary_key,
            version: 0,
            entity_index_key,
            entity_ids: Bitmap::new(),
            entity_ids_by_locale: BTreeMap::new(),
            attribute_index_keys: BTreeSet::new(),
            price_index_keys: BTreeSet::new(),
            has_hierarchy: false,
            facet_reference_names: BTreeSet::new(),
            has_reference_type_cardinality: false,
            legacy_internal_price_id_sequence: None,
            upgraded_from_legacy: false,
        }
    }

    fn keyed_address(
        &self,
        kind: PartKind,
        key: CompressibleKey,
        compressor: &KeyCompressor,
    ) -> CoreResult<PartAddress> {
        match compressor.get_id_if_exists(&key)? {
            Some(key_id) => Ok(kind.address(compose_part_id(self.primary_key, key_id))),
            None => Err(CoreError::missing_part(
                kind,
                format!("{key} of entity index {}", self.primary_key),
            )),
        }
    }

    /// Addresses of every specialized part referenced by this directory.
    ///
    /// Keys are resolved read-only; nothing is assigned in the compressor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingStoragePart`] if a referenced key was
    /// never compressed, or [`CoreError::PartCorruption`] if the directory
    /// claims a reference type cardinality part without a reference name.
    pub fn child_addresses(&self, compressor: &KeyCompressor) -> CoreResult<Vec<PartAddress>> {
        let mut addresses = Vec::new();
        for key in &self.attribute_index_keys {
            let kind = attribute_part_kind(key.index_type);
            addresses.push(self.keyed_address(
                kind,
                CompressibleKey::Attribute(key.attribute_key.clone()),
                compressor,
            )?);
        }
        for key in &self.price_index_keys {
            addresses.push(self.keyed_address(
                PartKind::Price,
                CompressibleKey::Price(key.clone()),
                compressor,
            )?);
        }
        if self.has_hierarchy {
            addresses.push(PartKind::Hierarchy.address(u64::from(self.primary_key)));
        }
        for name in &self.facet_reference_names {
            addresses.push(self.keyed_address(
                PartKind::Facet,
                CompressibleKey::Reference(name.clone()),
                compressor,
            )?);
        }
        if self.has_reference_type_cardinality {
            let name = self.cardinality_reference_name()?;
            addresses.push(self.keyed_address(
                PartKind::ReferenceTypeCardinality,
                CompressibleKey::Reference(name.to_string()),
                compressor,
            )?);
        }
        Ok(addresses)
    }

    /// Returns true if both directories list the same children and
    /// membership. Version and legacy markers are ignored.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.primary_key == other.primary_key
            && self.entity_index_key == other.entity_index_key
            && self.entity_ids == other.entity_ids
            && self.entity_ids_by_locale == other.entity_ids_by_locale
            && self.attribute_index_keys == other.attribute_index_keys
            && self.price_index_keys == other.price_index_keys
            && self.has_hierarchy == other.has_hierarchy
            && self.facet_reference_names == other.facet_reference_names
            && self.has_reference_type_cardinality == other.has_reference_type_cardinality
    }

    /// Reference name owning the reference type cardinality part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] if the index key has no
    /// discriminator.
    pub fn cardinality_reference_name(&self) -> CoreResult<&str> {
        self.entity_index_key
            .discriminator
            .as_ref()
            .map(|discriminator| discriminator.reference_name())
            .ok_or_else(|| {
                CoreError::part_corruption(format!(
                    "entity index {} has reference type cardinality but no reference",
                    self.primary_key
                ))
            })
    }
}

/// Part kind storing an attribute index of the given type.
#[must_use]
pub const fn attribute_part_kind(index_type: AttributeIndexType) -> PartKind {
    match index_type {
        AttributeIndexType::Unique => PartKind::Unique,
        AttributeIndexType::Filter => PartKind::Filter,
        AttributeIndexType::Sort => PartKind::Sort,
        AttributeIndexType::Chain => PartKind::Chain,
        AttributeIndexType::Cardinality => PartKind::AttributeCardinality,
    }
}

impl StoragePart for EntityIndexStoragePart {
    const KIND: PartKind = PartKind::EntityIndex;
    const BODY_VERSION: u8 = 2;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Fixed(u64::from(self.primary_key))
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::EntityIndex(self)
    }

    fn decode_body(version: u8, body: &[u8]) -> CoreResult<Self> {
        match version {
            1 => codec::from_cbor::<LegacyEntityIndexStoragePart>(body).map(Self::from),
            Self::BODY_VERSION => codec::from_cbor(body),
            other => Err(CoreError::invalid_format(format!(
                "unsupported {} body version {other}",
                Self::KIND
            ))),
        }
    }
}

/// Version 1 layout of the entity index directory.
///
/// Carried the internal price id sequence and had no reference type
/// cardinality flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyEntityIndexStoragePart {
    /// Primary key of the entity index.
    pub primary_key: u32,
    /// Directory version.
    pub version: u64,
    /// Key of the entity index.
    pub entity_index_key: EntityIndexKey,
    /// All indexed entities.
    pub entity_ids: Bitmap,
    /// Indexed entities per locale.
    pub entity_ids_by_locale: BTreeMap<Locale, Bitmap>,
    /// Attribute indexes.
    pub attribute_index_keys: BTreeSet<AttributeIndexStorageKey>,
    /// Price indexes.
    pub price_index_keys: BTreeSet<PriceIndexKey>,
    /// True if a hierarchy part exists.
    pub has_hierarchy: bool,
    /// References with a facet part.
    pub facet_reference_names: BTreeSet<String>,
    /// Last assigned internal price id.
    pub internal_price_id_sequence: u32,
}

impl From<LegacyEntityIndexStoragePart> for EntityIndexStoragePart {
    fn from(legacy: LegacyEntityIndexStoragePart) -> Self {
        Self {
            storage_part_pk: None,
            primary_key: legacy.primary_key,
            version: legacy.version,
            entity_index_key: legacy.entity_index_key,
            entity_ids: legacy.entity_ids,
            entity_ids_by_locale: legacy.entity_ids_by_locale,
            attribute_index_keys: legacy.attribute_index_keys,
            price_index_keys: legacy.price_index_keys,
            has_hierarchy: legacy.has_hierarchy,
            facet_reference_names: legacy.facet_reference_names,
            has_reference_type_cardinality: false,
            legacy_internal_price_id_sequence: Some(legacy.internal_price_id_sequence),
            upgraded_from_legacy: true,
        }
    }
}
