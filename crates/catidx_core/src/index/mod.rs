//! Specialized indexes and their storage parts.
//!
//! Each index is an in-memory structure mutated through `&mut self` by its
//! owning entity (or catalog) index, paired with a storage part holding its
//! compact persisted form. Indexes track a dirty flag so the owner persists
//! only what changed.

pub mod cardinality;
pub mod chain;
pub mod facet;
pub mod filter;
pub mod global_unique;
pub mod hierarchy;
pub mod price;
pub mod range;
pub mod sort;
pub mod unique;

pub use cardinality::{
    AttributeCardinalityIndex, AttributeCardinalityIndexStoragePart, CardinalityIndex,
    ReferenceTypeCardinalityIndex, ReferenceTypeCardinalityIndexStoragePart,
};
pub use chain::{ChainElement, ChainElementState, ChainIndex, ChainIndexStoragePart, ChainReport};
pub use facet::{FacetGroup, FacetIndex, FacetIndexStoragePart};
pub use filter::{FilterIndex, FilterIndexStoragePart, ValueBucket};
pub use global_unique::{
    EntityWithTypeTuple, GlobalUniqueIndex, GlobalUniqueIndexStoragePart, GlobalUniqueRecord,
};
pub use hierarchy::{HierarchyIndex, HierarchyIndexStoragePart, HierarchyNode, HierarchyReport};
pub use price::{
    PriceIndexPayload, PriceIndexVariant, PriceListAndCurrencyIndex,
    PriceListAndCurrencyIndexStoragePart, PriceRecord,
};
pub use range::{RangeEntry, RangeIndex};
pub use sort::{SortComparator, SortIndex, SortIndexStoragePart};
pub use unique::{UniqueIndex, UniqueIndexStoragePart};

use crate::error::{CoreError, CoreResult};
use crate::value::{AttributeValue, ValueKind};

/// Rejects values of another kind than the index declares.
pub(crate) fn check_value_kind(expected: ValueKind, value: &AttributeValue) -> CoreResult<()> {
    if value.kind() == expected {
        Ok(())
    } else {
        Err(CoreError::invalid_operation(format!(
            "expected a {expected:?} value, got {value}"
        )))
    }
}
