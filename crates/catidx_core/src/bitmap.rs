//! Primary key bitmap.
//!
//! A thin wrapper over [`RoaringBitmap`] that serializes itself as the
//! portable roaring byte format inside part bodies.

use roaring::RoaringBitmap;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A set of primary keys.
#[derive(Clone, Default, PartialEq)]
pub struct Bitmap(RoaringBitmap);

impl Bitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self(RoaringBitmap::new())
    }

    /// Adds a key. Returns true if it was not present.
    pub fn insert(&mut self, pk: u32) -> bool {
        self.0.insert(pk)
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&mut self, pk: u32) -> bool {
        self.0.remove(pk)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains(&self, pk: u32) -> bool {
        self.0.contains(pk)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.0.len()
    }

    /// Returns true if the bitmap holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates keys in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter()
    }

    /// Returns the keys as an ascending vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.0.iter().collect()
    }

    /// Adds every key of `other`.
    pub fn union_with(&mut self, other: &Bitmap) {
        self.0 |= &other.0;
    }

    /// Returns the intersection of both bitmaps.
    #[must_use]
    pub fn and(&self, other: &Bitmap) -> Bitmap {
        Bitmap(&self.0 & &other.0)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl FromIterator<u32> for Bitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<u32> for Bitmap {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl Serialize for Bitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::with_capacity(self.0.serialized_size());
        self.0
            .serialize_into(&mut bytes)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }
}

struct BitmapVisitor;

impl<'de> Visitor<'de> for BitmapVisitor {
    type Value = Bitmap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("roaring bitmap bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Bitmap, E> {
        RoaringBitmap::deserialize_from(v)
            .map(Bitmap)
            .map_err(E::custom)
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Bitmap, E> {
        self.visit_bytes(&v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bitmap, A::Error> {
        let mut bytes = Vec::new();
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        self.visit_bytes(&bytes)
    }
}

impl<'de> Deserialize<'de> for Bitmap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(BitmapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_contains() {
        let mut bitmap = Bitmap::new();
        assert!(bitmap.insert(3));
        assert!(!bitmap.insert(3));
        assert!(bitmap.contains(3));
        assert!(bitmap.remove(3));
        assert!(bitmap.is_empty());
    }

    #[test]
    fn cbor_round_trip() {
        let bitmap: Bitmap = [1u32, 5, 70_000, 1_000_000].into_iter().collect();
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&bitmap, &mut bytes).unwrap();
        let decoded: Bitmap = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded, bitmap);
        assert_eq!(decoded.to_vec(), vec![1, 5, 70_000, 1_000_000]);
    }

    #[test]
    fn union_and_intersection() {
        let mut a: Bitmap = [1u32, 2, 3].into_iter().collect();
        let b: Bitmap = [3u32, 4].into_iter().collect();
        assert_eq!(a.and(&b).to_vec(), vec![3]);
        a.union_with(&b);
        assert_eq!(a.to_vec(), vec![1, 2, 3, 4]);
    }
}
