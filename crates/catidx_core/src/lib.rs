//! # catidx core
//!
//! Persistence layer for catalog and entity indexes.
//!
//! This crate provides:
//! - Key compression and stable 64-bit part identities
//! - The storage part contract and the part envelope codec
//! - Specialized indexes (unique, global unique, filter, range, sort,
//!   chain, cardinality, hierarchy, facet, price) with their storage parts
//! - Entity index and catalog index directories
//! - A part store over the `catidx_storage` backends
//!
//! ## Example
//!
//! ```rust
//! use catidx_core::{EntityIndex, EntityIndexKey, PartStore, Scope};
//!
//! let store = PartStore::in_memory();
//! let mut index = EntityIndex::new(1, EntityIndexKey::global(Scope::Live));
//! index.insert_entity(42);
//! index.persist(&store).unwrap();
//!
//! let loaded = EntityIndex::load(1, &store).unwrap();
//! assert!(loaded.entity_ids().contains(42));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bitmap;
mod catalog_index;
pub mod codec;
mod compressor;
mod config;
mod directory;
mod entity_index;
mod error;
pub mod index;
mod part;
mod store;
mod types;
mod value;

pub use bitmap::Bitmap;
pub use catalog_index::{CatalogIndex, CatalogIndexStoragePart, CatalogPersistReport};
pub use compressor::{CompressibleKey, KeyCompressor, KeyCompressorStoragePart, KEY_COMPRESSOR_PART_ID};
pub use config::Config;
pub use directory::{attribute_part_kind, EntityIndexStoragePart, LegacyEntityIndexStoragePart};
pub use entity_index::{EntityIndex, PersistReport};
pub use error::{CoreError, CoreResult};
pub use index::{
    AttributeCardinalityIndexStoragePart, ChainIndexStoragePart, FacetIndexStoragePart,
    FilterIndexStoragePart, GlobalUniqueIndexStoragePart, HierarchyIndexStoragePart,
    PriceListAndCurrencyIndexStoragePart, ReferenceTypeCardinalityIndexStoragePart,
    SortIndexStoragePart, UniqueIndexStoragePart,
};
pub use part::{
    compose_part_id, compute_unique_part_id, verify_identity, PartIdentity, PartKind, StoragePart,
};
pub use store::PartStore;
pub use types::{
    nulls_first, AttributeIndexKey, AttributeIndexStorageKey, AttributeIndexType, AttributeKey,
    Currency, EntityIndexKey, EntityIndexKind, IndexDiscriminator, Locale,
    PriceInnerRecordHandling, PriceIndexKey, Scope,
};
pub use value::{AttributeValue, ValueKind, ValueRange};

pub use catidx_storage::PartAddress;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Any storage part, decoded without knowing its kind up front.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyStoragePart {
    /// Key compressor state.
    KeyCompressor(KeyCompressorStoragePart),
    /// Catalog directory.
    CatalogIndex(CatalogIndexStoragePart),
    /// Entity index directory.
    EntityIndex(EntityIndexStoragePart),
    /// Unique index.
    Unique(UniqueIndexStoragePart),
    /// Global unique index.
    GlobalUnique(GlobalUniqueIndexStoragePart),
    /// Filter index.
    Filter(FilterIndexStoragePart),
    /// Sort index.
    Sort(SortIndexStoragePart),
    /// Chain index.
    Chain(ChainIndexStoragePart),
    /// Attribute cardinality index.
    AttributeCardinality(AttributeCardinalityIndexStoragePart),
    /// Reference type cardinality index.
    ReferenceTypeCardinality(ReferenceTypeCardinalityIndexStoragePart),
    /// Hierarchy index.
    Hierarchy(HierarchyIndexStoragePart),
    /// Facet index.
    Facet(FacetIndexStoragePart),
    /// Price list and currency index.
    Price(PriceListAndCurrencyIndexStoragePart),
}

impl AnyStoragePart {
    /// Kind of the wrapped part.
    #[must_use]
    pub fn kind(&self) -> PartKind {
        match self {
            AnyStoragePart::KeyCompressor(_) => PartKind::KeyCompressor,
            AnyStoragePart::CatalogIndex(_) => PartKind::CatalogIndex,
            AnyStoragePart::EntityIndex(_) => PartKind::EntityIndex,
            AnyStoragePart::Unique(_) => PartKind::Unique,
            AnyStoragePart::GlobalUnique(_) => PartKind::GlobalUnique,
            AnyStoragePart::Filter(_) => PartKind::Filter,
            AnyStoragePart::Sort(_) => PartKind::Sort,
            AnyStoragePart::Chain(_) => PartKind::Chain,
            AnyStoragePart::AttributeCardinality(_) => PartKind::AttributeCardinality,
            AnyStoragePart::ReferenceTypeCardinality(_) => PartKind::ReferenceTypeCardinality,
            AnyStoragePart::Hierarchy(_) => PartKind::Hierarchy,
            AnyStoragePart::Facet(_) => PartKind::Facet,
            AnyStoragePart::Price(_) => PartKind::Price,
        }
    }

    /// Identity derivation of the wrapped part.
    #[must_use]
    pub fn identity(&self) -> PartIdentity {
        match self {
            AnyStoragePart::KeyCompressor(part) => part.identity(),
            AnyStoragePart::CatalogIndex(part) => part.identity(),
            AnyStoragePart::EntityIndex(part) => part.identity(),
            AnyStoragePart::Unique(part) => part.identity(),
            AnyStoragePart::GlobalUnique(part) => part.identity(),
            AnyStoragePart::Filter(part) => part.identity(),
            AnyStoragePart::Sort(part) => part.identity(),
            AnyStoragePart::Chain(part) => part.identity(),
            AnyStoragePart::AttributeCardinality(part) => part.identity(),
            AnyStoragePart::ReferenceTypeCardinality(part) => part.identity(),
            AnyStoragePart::Hierarchy(part) => part.identity(),
            AnyStoragePart::Facet(part) => part.identity(),
            AnyStoragePart::Price(part) => part.identity(),
        }
    }

    /// Id assigned to the wrapped part, if any.
    #[must_use]
    pub fn storage_part_pk(&self) -> Option<u64> {
        match self {
            AnyStoragePart::KeyCompressor(part) => part.storage_part_pk(),
            AnyStoragePart::CatalogIndex(part) => part.storage_part_pk(),
            AnyStoragePart::EntityIndex(part) => part.storage_part_pk(),
            AnyStoragePart::Unique(part) => part.storage_part_pk(),
            AnyStoragePart::GlobalUnique(part) => part.storage_part_pk(),
            AnyStoragePart::Filter(part) => part.storage_part_pk(),
            AnyStoragePart::Sort(part) => part.storage_part_pk(),
            AnyStoragePart::Chain(part) => part.storage_part_pk(),
            AnyStoragePart::AttributeCardinality(part) => part.storage_part_pk(),
            AnyStoragePart::ReferenceTypeCardinality(part) => part.storage_part_pk(),
            AnyStoragePart::Hierarchy(part) => part.storage_part_pk(),
            AnyStoragePart::Facet(part) => part.storage_part_pk(),
            AnyStoragePart::Price(part) => part.storage_part_pk(),
        }
    }

    /// Assigns the id of the wrapped part.
    pub fn set_storage_part_pk(&mut self, id: u64) {
        match self {
            AnyStoragePart::KeyCompressor(part) => part.set_storage_part_pk(id),
            AnyStoragePart::CatalogIndex(part) => part.set_storage_part_pk(id),
            AnyStoragePart::EntityIndex(part) => part.set_storage_part_pk(id),
            AnyStoragePart::Unique(part) => part.set_storage_part_pk(id),
            AnyStoragePart::GlobalUnique(part) => part.set_storage_part_pk(id),
            AnyStoragePart::Filter(part) => part.set_storage_part_pk(id),
            AnyStoragePart::Sort(part) => part.set_storage_part_pk(id),
            AnyStoragePart::Chain(part) => part.set_storage_part_pk(id),
            AnyStoragePart::AttributeCardinality(part) => part.set_storage_part_pk(id),
            AnyStoragePart::ReferenceTypeCardinality(part) => part.set_storage_part_pk(id),
            AnyStoragePart::Hierarchy(part) => part.set_storage_part_pk(id),
            AnyStoragePart::Facet(part) => part.set_storage_part_pk(id),
            AnyStoragePart::Price(part) => part.set_storage_part_pk(id),
        }
    }

    /// Uncompressed logical key of the wrapped part, if it has one.
    #[must_use]
    pub fn source_key(&self) -> Option<CompressibleKey> {
        match self.identity() {
            PartIdentity::Fixed(_) => None,
            PartIdentity::Keyed { key, .. } => Some(key),
        }
    }

    /// Checks that the wrapped part, read from `id`, still resolves to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityMismatch`] on a different id, or
    /// [`CoreError::PartCorruption`] if the key was never compressed.
    pub fn verify_identity(&self, id: u64, compressor: &KeyCompressor) -> CoreResult<()> {
        match self.identity().resolve_existing(compressor)? {
            Some(computed) if computed == id => Ok(()),
            Some(computed) => Err(CoreError::IdentityMismatch {
                kind: self.kind(),
                assigned: id,
                computed,
            }),
            None => Err(CoreError::part_corruption(format!(
                "{} part {id} is stored under an unknown key",
                self.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_part_reports_source_key() {
        let compressor = KeyCompressor::new();
        let compressor_part = compressor.create_storage_part().unwrap().into_any();
        assert_eq!(compressor_part.kind(), PartKind::KeyCompressor);
        assert_eq!(compressor_part.source_key(), None);

        let facet = index::FacetIndex::new("brand").create_storage_part(4).into_any();
        assert_eq!(
            facet.source_key(),
            Some(CompressibleKey::Reference("brand".to_string()))
        );
    }

    #[test]
    fn any_part_identity_check() {
        let compressor = KeyCompressor::new();
        let mut part = index::FacetIndex::new("brand").create_storage_part(4);
        let id = part.compute_unique_part_id_and_set(&compressor).unwrap();
        let any = part.into_any();
        assert!(any.verify_identity(id, &compressor).is_ok());
        assert!(matches!(
            any.verify_identity(id + 1, &compressor),
            Err(CoreError::IdentityMismatch { .. })
        ));
    }
}
