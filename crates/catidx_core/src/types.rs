//! Key types shared by every storage part.
//!
//! Keys with optional components (`reference_name`, `locale`) order their
//! absent components first. The comparison lives in [`nulls_first`] and is
//! reused by every key that needs it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Compares two optional values, ordering `None` before any `Some`.
#[must_use]
pub fn nulls_first<T: Ord>(a: Option<&T>, b: Option<&T>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

/// Partition of a catalog's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Data visible to regular queries.
    Live,
    /// Archived data.
    Archived,
}

impl Scope {
    /// All scopes, in storage order.
    pub const ALL: [Scope; 2] = [Scope::Live, Scope::Archived];

    /// Fixed storage id of the catalog directory part for this scope.
    #[must_use]
    pub const fn catalog_part_id(self) -> u64 {
        match self {
            Scope::Live => 1,
            Scope::Archived => 2,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Live => write!(f, "LIVE"),
            Scope::Archived => write!(f, "ARCHIVED"),
        }
    }
}

/// A BCP 47 language tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    /// Creates a locale from its language tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the language tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Creates a currency from its code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the currency code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of an entity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityIndexKind {
    /// The main index of an entity collection.
    Global,
    /// Index of all entities referencing a given reference type.
    ReferencedEntityType,
    /// Index of entities referencing one concrete entity.
    ReferencedEntity,
    /// Index of entities referencing one hierarchy node.
    ReferencedHierarchyNode,
}

/// Narrows an entity index beyond its kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexDiscriminator {
    /// A reference name.
    Reference(String),
    /// A reference name and the primary key of the referenced entity.
    ReferencedEntity {
        /// Reference name.
        reference_name: String,
        /// Primary key of the referenced entity.
        primary_key: u32,
    },
}

impl IndexDiscriminator {
    /// Returns the reference name carried by the discriminator.
    #[must_use]
    pub fn reference_name(&self) -> &str {
        match self {
            IndexDiscriminator::Reference(name) => name,
            IndexDiscriminator::ReferencedEntity { reference_name, .. } => reference_name,
        }
    }
}

/// Identifies an entity index within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityIndexKey {
    /// Index kind.
    pub kind: EntityIndexKind,
    /// Scope the index belongs to.
    pub scope: Scope,
    /// Optional discriminator.
    pub discriminator: Option<IndexDiscriminator>,
}

impl EntityIndexKey {
    /// Key of the global index of a scope.
    #[must_use]
    pub const fn global(scope: Scope) -> Self {
        Self {
            kind: EntityIndexKind::Global,
            scope,
            discriminator: None,
        }
    }

    /// Key of the index of all entities referencing `reference_name`.
    pub fn referenced_entity_type(scope: Scope, reference_name: impl Into<String>) -> Self {
        Self {
            kind: EntityIndexKind::ReferencedEntityType,
            scope,
            discriminator: Some(IndexDiscriminator::Reference(reference_name.into())),
        }
    }

    /// Key of the index of entities referencing one entity.
    pub fn referenced_entity(
        scope: Scope,
        reference_name: impl Into<String>,
        primary_key: u32,
    ) -> Self {
        Self {
            kind: EntityIndexKind::ReferencedEntity,
            scope,
            discriminator: Some(IndexDiscriminator::ReferencedEntity {
                reference_name: reference_name.into(),
                primary_key,
            }),
        }
    }

    /// Key of the index of entities referencing one hierarchy node.
    pub fn referenced_hierarchy_node(
        scope: Scope,
        reference_name: impl Into<String>,
        primary_key: u32,
    ) -> Self {
        Self {
            kind: EntityIndexKind::ReferencedHierarchyNode,
            scope,
            discriminator: Some(IndexDiscriminator::ReferencedEntity {
                reference_name: reference_name.into(),
                primary_key,
            }),
        }
    }
}

impl Ord for EntityIndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scope
            .cmp(&other.scope)
            .then(self.kind.cmp(&other.kind))
            .then_with(|| nulls_first(self.discriminator.as_ref(), other.discriminator.as_ref()))
    }
}

impl PartialOrd for EntityIndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntityIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.kind, self.scope)?;
        match &self.discriminator {
            None => Ok(()),
            Some(IndexDiscriminator::Reference(name)) => write!(f, "[{name}]"),
            Some(IndexDiscriminator::ReferencedEntity {
                reference_name,
                primary_key,
            }) => write!(f, "[{reference_name}:{primary_key}]"),
        }
    }
}

/// Key of a catalog-wide unique attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    /// Attribute name.
    pub attribute_name: String,
    /// Locale for localized attributes.
    pub locale: Option<Locale>,
}

impl AttributeKey {
    /// Creates a non-localized attribute key.
    pub fn new(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            locale: None,
        }
    }

    /// Creates a localized attribute key.
    pub fn localized(attribute_name: impl Into<String>, locale: Locale) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            locale: Some(locale),
        }
    }
}

impl Ord for AttributeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.attribute_name
            .cmp(&other.attribute_name)
            .then_with(|| nulls_first(self.locale.as_ref(), other.locale.as_ref()))
    }
}

impl PartialOrd for AttributeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{}:{}", self.attribute_name, locale),
            None => f.write_str(&self.attribute_name),
        }
    }
}

/// Identifies what an attribute index indexes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeIndexKey {
    /// Reference the attribute belongs to, if it is a reference attribute.
    pub reference_name: Option<String>,
    /// Attribute name.
    pub attribute_name: String,
    /// Locale for localized attributes.
    pub locale: Option<Locale>,
}

impl AttributeIndexKey {
    /// Creates a key for an entity attribute.
    pub fn new(attribute_name: impl Into<String>) -> Self {
        Self {
            reference_name: None,
            attribute_name: attribute_name.into(),
            locale: None,
        }
    }

    /// Creates a key for an attribute of a reference.
    pub fn of_reference(reference_name: impl Into<String>, attribute_name: impl Into<String>) -> Self {
        Self {
            reference_name: Some(reference_name.into()),
            attribute_name: attribute_name.into(),
            locale: None,
        }
    }

    /// Returns the key with the given locale.
    #[must_use]
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }
}

impl Ord for AttributeIndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        nulls_first(self.reference_name.as_ref(), other.reference_name.as_ref())
            .then_with(|| self.attribute_name.cmp(&other.attribute_name))
            .then_with(|| nulls_first(self.locale.as_ref(), other.locale.as_ref()))
    }
}

impl PartialOrd for AttributeIndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AttributeIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reference) = &self.reference_name {
            write!(f, "{reference}.")?;
        }
        f.write_str(&self.attribute_name)?;
        if let Some(locale) = &self.locale {
            write!(f, ":{locale}")?;
        }
        Ok(())
    }
}

/// Type of a per-attribute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeIndexType {
    /// Value to single record mapping.
    Unique,
    /// Value histogram.
    Filter,
    /// Sorted projection.
    Sort,
    /// Manually curated predecessor ordering.
    Chain,
    /// Occurrence counters.
    Cardinality,
}

/// Directory entry naming one attribute index of an entity index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeIndexStorageKey {
    /// Owning entity index.
    pub entity_index_key: EntityIndexKey,
    /// Index type.
    pub index_type: AttributeIndexType,
    /// Indexed attribute.
    pub attribute_key: AttributeIndexKey,
}

impl Ord for AttributeIndexStorageKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entity_index_key
            .cmp(&other.entity_index_key)
            .then(self.index_type.cmp(&other.index_type))
            .then_with(|| self.attribute_key.cmp(&other.attribute_key))
    }
}

impl PartialOrd for AttributeIndexStorageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How prices of inner records are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriceInnerRecordHandling {
    /// Inner records are ignored.
    None,
    /// The lowest inner record price is used.
    LowestPrice,
    /// Inner record prices are summed.
    Sum,
}

/// Identifies one price list and currency index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceIndexKey {
    /// Price list name.
    pub price_list: String,
    /// Currency.
    pub currency: Currency,
    /// Inner record handling.
    pub inner_record_handling: PriceInnerRecordHandling,
}

impl PriceIndexKey {
    /// Creates a price index key.
    pub fn new(
        price_list: impl Into<String>,
        currency: Currency,
        inner_record_handling: PriceInnerRecordHandling,
    ) -> Self {
        Self {
            price_list: price_list.into(),
            currency,
            inner_record_handling,
        }
    }
}

impl fmt::Display for PriceIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:?}",
            self.price_list, self.currency, self.inner_record_handling
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_first_orders_none_first() {
        assert_eq!(nulls_first::<u32>(None, Some(&1)), Ordering::Less);
        assert_eq!(nulls_first(Some(&1), None), Ordering::Greater);
        assert_eq!(nulls_first::<u32>(None, None), Ordering::Equal);
        assert_eq!(nulls_first(Some(&2), Some(&1)), Ordering::Greater);
    }

    #[test]
    fn attribute_index_key_order() {
        let mut keys = vec![
            AttributeIndexKey::of_reference("brand", "code"),
            AttributeIndexKey::new("name").with_locale(Locale::new("en")),
            AttributeIndexKey::new("name"),
            AttributeIndexKey::of_reference("AAA", "zzz"),
            AttributeIndexKey::new("code"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["code", "name", "name:en", "AAA.zzz", "brand.code"]);
    }

    #[test]
    fn catalog_part_ids_are_fixed() {
        assert_eq!(Scope::Live.catalog_part_id(), 1);
        assert_eq!(Scope::Archived.catalog_part_id(), 2);
    }

    #[test]
    fn entity_index_key_display() {
        let key = EntityIndexKey::referenced_entity(Scope::Live, "brand", 7);
        assert_eq!(key.to_string(), "ReferencedEntity@LIVE[brand:7]");
    }
}
