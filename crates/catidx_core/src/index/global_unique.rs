//! Catalog-wide unique attribute index.
//!
//! Values are unique across every entity collection of a catalog scope.
//! Each value maps to the owning entity type, primary key and, for
//! localized attributes, the locale. Locales are interned into a small id
//! table persisted with the part.

use super::check_value_kind;
use crate::compressor::CompressibleKey;
use crate::error::{CoreError, CoreResult};
use crate::part::{PartIdentity, PartKind, StoragePart};
use crate::types::{AttributeKey, Locale, Scope};
use crate::value::{AttributeValue, ValueKind};
use crate::AnyStoragePart;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Owner of a globally unique value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalUniqueRecord {
    /// Primary key of the entity type (collection).
    pub entity_type: u32,
    /// Primary key of the entity.
    pub primary_key: u32,
    /// Locale the value was registered under.
    pub locale: Option<Locale>,
}

/// Stored owner tuple with an interned locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityWithTypeTuple {
    /// Primary key of the entity type.
    pub entity_type: u32,
    /// Primary key of the entity.
    pub primary_key: u32,
    /// Interned locale id.
    pub locale_id: Option<u32>,
}

/// Maps values to their catalog-wide owner.
#[derive(Debug, Clone)]
pub struct GlobalUniqueIndex {
    scope: Scope,
    attribute_key: AttributeKey,
    value_kind: ValueKind,
    unique_map: BTreeMap<AttributeValue, EntityWithTypeTuple>,
    locale_ids: BTreeMap<Locale, u32>,
    locales: BTreeMap<u32, Locale>,
    locale_sequence: u32,
    dirty: bool,
}

impl GlobalUniqueIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(scope: Scope, attribute_key: AttributeKey, value_kind: ValueKind) -> Self {
        Self {
            scope,
            attribute_key,
            value_kind,
            unique_map: BTreeMap::new(),
            locale_ids: BTreeMap::new(),
            locales: BTreeMap::new(),
            locale_sequence: 0,
            dirty: false,
        }
    }

    /// Registers `value` as owned by `(entity_type, pk)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniquenessViolation`] if another entity owns
    /// the value, or [`CoreError::InvalidOperation`] on a value of the wrong kind.
    pub fn register(
        &mut self,
        value: AttributeValue,
        entity_type: u32,
        locale: Option<&Locale>,
        pk: u32,
    ) -> CoreResult<()> {
        check_value_kind(self.value_kind, &value)?;
        if let Some(existing) = self.unique_map.get(&value) {
            let same_locale = self.resolve_locale(existing.locale_id).as_ref() == locale;
            if existing.entity_type == entity_type && existing.primary_key == pk && same_locale {
                return Ok(());
            }
            return Err(CoreError::UniquenessViolation {
                value: format!("{}={value}", self.attribute_key),
                existing: existing.primary_key,
                rejected: pk,
            });
        }
        let locale_id = locale.map(|locale| self.intern_locale(locale));
        self.unique_map.insert(
            value,
            EntityWithTypeTuple {
                entity_type,
                primary_key: pk,
                locale_id,
            },
        );
        self.dirty = true;
        Ok(())
    }

    /// Removes the registration of `value` for `(entity_type, pk)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless exactly this
    /// registration exists.
    pub fn unregister(&mut self, value: &AttributeValue, entity_type: u32, pk: u32) -> CoreResult<()> {
        match self.unique_map.get(value) {
            Some(existing) if existing.entity_type == entity_type && existing.primary_key == pk => {
                self.unique_map.remove(value);
                self.dirty = true;
                Ok(())
            }
            Some(existing) => Err(CoreError::invalid_operation(format!(
                "global unique value {value} of {} belongs to {}:{}, not {entity_type}:{pk}",
                self.attribute_key, existing.entity_type, existing.primary_key
            ))),
            None => Err(CoreError::invalid_operation(format!(
                "global unique value {value} of {} is not registered",
                self.attribute_key
            ))),
        }
    }

    /// Returns the owner of `value`.
    #[must_use]
    pub fn lookup(&self, value: &AttributeValue) -> Option<GlobalUniqueRecord> {
        self.unique_map.get(value).map(|tuple| GlobalUniqueRecord {
            entity_type: tuple.entity_type,
            primary_key: tuple.primary_key,
            locale: self.resolve_locale(tuple.locale_id),
        })
    }

    /// Indexed attribute.
    #[must_use]
    pub fn attribute_key(&self) -> &AttributeKey {
        &self.attribute_key
    }

    /// Catalog scope of the index.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Number of registered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.unique_map.len()
    }

    /// Returns true if no value is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unique_map.is_empty()
    }

    /// Returns true if the index changed since it was last stored.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn intern_locale(&mut self, locale: &Locale) -> u32 {
        if let Some(id) = self.locale_ids.get(locale) {
            return *id;
        }
        self.locale_sequence += 1;
        let id = self.locale_sequence;
        self.locale_ids.insert(locale.clone(), id);
        self.locales.insert(id, locale.clone());
        id
    }

    fn resolve_locale(&self, locale_id: Option<u32>) -> Option<Locale> {
        locale_id.and_then(|id| self.locales.get(&id).cloned())
    }

    /// Snapshots the index into its storage part.
    #[must_use]
    pub fn create_storage_part(&self) -> GlobalUniqueIndexStoragePart {
        GlobalUniqueIndexStoragePart {
            storage_part_pk: None,
            scope: self.scope,
            attribute_key: self.attribute_key.clone(),
            value_kind: self.value_kind,
            unique_map: self
                .unique_map
                .iter()
                .map(|(value, tuple)| (value.clone(), *tuple))
                .collect(),
            locale_index: self
                .locales
                .iter()
                .map(|(id, locale)| (*id, locale.clone()))
                .collect(),
            locale_sequence: self.locale_sequence,
        }
    }

    /// Rebuilds the index from its storage part.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartCorruption`] if a tuple refers to an
    /// unknown locale id.
    pub fn from_storage_part(part: GlobalUniqueIndexStoragePart) -> CoreResult<Self> {
        let locales: BTreeMap<u32, Locale> = part.locale_index.into_iter().collect();
        let locale_ids = locales
            .iter()
            .map(|(id, locale)| (locale.clone(), *id))
            .collect();
        let mut unique_map = BTreeMap::new();
        for (value, tuple) in part.unique_map {
            if let Some(locale_id) = tuple.locale_id {
                if !locales.contains_key(&locale_id) {
                    return Err(CoreError::part_corruption(format!(
                        "global unique index {} refers to unknown locale id {locale_id}",
                        part.attribute_key
                    )));
                }
            }
            unique_map.insert(value, tuple);
        }
        Ok(Self {
            scope: part.scope,
            attribute_key: part.attribute_key,
            value_kind: part.value_kind,
            unique_map,
            locale_ids,
            locales,
            locale_sequence: part.locale_sequence,
            dirty: false,
        })
    }
}

/// Stored form of a [`GlobalUniqueIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalUniqueIndexStoragePart {
    #[serde(skip)]
    storage_part_pk: Option<u64>,
    /// Catalog scope owning the index.
    pub scope: Scope,
    /// Indexed attribute.
    pub attribute_key: AttributeKey,
    /// Declared value kind.
    pub value_kind: ValueKind,
    /// `(value, owner)` pairs in value order.
    pub unique_map: Vec<(AttributeValue, EntityWithTypeTuple)>,
    /// Interned locales.
    pub locale_index: Vec<(u32, Locale)>,
    /// Last assigned locale id.
    pub locale_sequence: u32,
}

impl StoragePart for GlobalUniqueIndexStoragePart {
    const KIND: PartKind = PartKind::GlobalUnique;

    fn storage_part_pk(&self) -> Option<u64> {
        self.storage_part_pk
    }

    fn set_storage_part_pk(&mut self, id: u64) {
        self.storage_part_pk = Some(id);
    }

    fn identity(&self) -> PartIdentity {
        PartIdentity::Keyed {
            owner: self.scope.catalog_part_id() as u32,
            key: CompressibleKey::GlobalAttribute(self.attribute_key.clone()),
        }
    }

    fn into_any(self) -> AnyStoragePart {
        AnyStoragePart::GlobalUnique(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_index() -> GlobalUniqueIndex {
        GlobalUniqueIndex::new(Scope::Live, AttributeKey::new("url"), ValueKind::Text)
    }

    #[test]
    fn register_and_lookup_with_locale() {
        let mut index = url_index();
        let en = Locale::new("en");
        index.register("/shoes".into(), 3, Some(&en), 10).unwrap();
        index.register("/boty".into(), 3, Some(&Locale::new("cs")), 10).unwrap();
        index.register("/about".into(), 5, None, 1).unwrap();

        let record = index.lookup(&"/shoes".into()).unwrap();
        assert_eq!(record.entity_type, 3);
        assert_eq!(record.primary_key, 10);
        assert_eq!(record.locale, Some(en));
        assert_eq!(index.lookup(&"/about".into()).unwrap().locale, None);
    }

    #[test]
    fn duplicate_across_collections_is_rejected() {
        let mut index = url_index();
        index.register("/shoes".into(), 3, None, 10).unwrap();
        assert!(matches!(
            index.register("/shoes".into(), 4, None, 10),
            Err(CoreError::UniquenessViolation { .. })
        ));
        index.register("/shoes".into(), 3, None, 10).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn unregister_requires_owner() {
        let mut index = url_index();
        index.register("/shoes".into(), 3, None, 10).unwrap();
        assert!(index.unregister(&"/shoes".into(), 4, 10).is_err());
        index.unregister(&"/shoes".into(), 3, 10).unwrap();
        assert!(index.is_empty());
        assert!(index.unregister(&"/shoes".into(), 3, 10).is_err());
    }

    #[test]
    fn locales_survive_part_round_trip() {
        let mut index = url_index();
        index.register("/a".into(), 1, Some(&Locale::new("de")), 1).unwrap();
        index.register("/b".into(), 1, Some(&Locale::new("de")), 2).unwrap();
        let part = index.create_storage_part();
        assert_eq!(part.locale_index.len(), 1);

        let mut rebuilt = GlobalUniqueIndex::from_storage_part(part).unwrap();
        assert_eq!(rebuilt.lookup(&"/b".into()).unwrap().locale, Some(Locale::new("de")));
        rebuilt.register("/c".into(), 1, Some(&Locale::new("fr")), 3).unwrap();
        assert_eq!(rebuilt.create_storage_part().locale_sequence, 2);
    }

    #[test]
    fn unknown_locale_id_is_corruption() {
        let mut part = url_index().create_storage_part();
        part.unique_map.push((
            "/x".into(),
            EntityWithTypeTuple {
                entity_type: 1,
                primary_key: 1,
                locale_id: Some(9),
            },
        ));
        assert!(matches!(
            GlobalUniqueIndex::from_storage_part(part),
            Err(CoreError::PartCorruption { .. })
        ));
    }
}
