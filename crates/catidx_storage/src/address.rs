//! Storage part address.

use std::fmt;

/// Lookup key of a stored part.
///
/// The `kind` byte separates id spaces, so two parts of different kinds
/// may carry the same numeric `id` without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartAddress {
    /// Part kind discriminator.
    pub kind: u8,
    /// Storage part id within the kind.
    pub id: u64,
}

impl PartAddress {
    /// Creates a new part address.
    #[must_use]
    pub const fn new(kind: u8, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for PartAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part:{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_kind_first() {
        let a = PartAddress::new(1, 900);
        let b = PartAddress::new(2, 1);
        assert!(a < b);
    }

    #[test]
    fn display() {
        assert_eq!(PartAddress::new(7, 12).to_string(), "part:7/12");
    }
}
