//! Part envelope encoding.
//!
//! Every stored part is framed as:
//!
//! ```text
//! | magic "CIXP" | envelope version (u8) | part kind (u8) | body version (u8) | CBOR body |
//! ```
//!
//! Bodies are serde structs encoded with `ciborium`.

use crate::error::{CoreError, CoreResult};
use crate::part::{PartKind, StoragePart};
use crate::AnyStoragePart;
use crate::{
    catalog_index::CatalogIndexStoragePart, compressor::KeyCompressorStoragePart,
    directory::EntityIndexStoragePart,
};
use crate::index::{
    AttributeCardinalityIndexStoragePart, ChainIndexStoragePart, FacetIndexStoragePart,
    FilterIndexStoragePart, GlobalUniqueIndexStoragePart, HierarchyIndexStoragePart,
    PriceListAndCurrencyIndexStoragePart, ReferenceTypeCardinalityIndexStoragePart,
    SortIndexStoragePart, UniqueIndexStoragePart,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes opening every part.
pub const MAGIC: [u8; 4] = *b"CIXP";

/// Current envelope version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of the envelope header in bytes.
pub const HEADER_SIZE: usize = 7;

/// Parsed envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Kind of the framed part.
    pub kind: PartKind,
    /// Layout version of the body.
    pub body_version: u8,
}

/// Encodes a value as CBOR.
///
/// # Errors
///
/// Returns a codec error if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a CBOR value.
///
/// # Errors
///
/// Returns a codec error if the bytes do not hold a valid value.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Frames an already encoded body.
#[must_use]
pub fn encode_envelope(kind: PartKind, body_version: u8, body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.push(ENVELOPE_VERSION);
    bytes.push(kind.as_byte());
    bytes.push(body_version);
    bytes.extend_from_slice(body);
    bytes
}

/// Parses the envelope and returns it together with the body.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFormat`] for a short buffer, bad magic, an
/// unknown envelope version, or an unknown kind byte.
pub fn decode_envelope(bytes: &[u8]) -> CoreResult<(Envelope, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(CoreError::invalid_format(format!(
            "part too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0..4] != MAGIC {
        return Err(CoreError::invalid_format("bad part magic"));
    }
    if bytes[4] != ENVELOPE_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported envelope version {}",
            bytes[4]
        )));
    }
    let kind = PartKind::from_byte(bytes[5])
        .ok_or_else(|| CoreError::invalid_format(format!("unknown part kind {}", bytes[5])))?;
    Ok((
        Envelope {
            kind,
            body_version: bytes[6],
        },
        &bytes[HEADER_SIZE..],
    ))
}

/// Encodes a part with its envelope.
///
/// # Errors
///
/// Returns a codec error if the body cannot be serialized.
pub fn encode_part<P: StoragePart>(part: &P) -> CoreResult<Vec<u8>> {
    let body = to_cbor(part)?;
    Ok(encode_envelope(P::KIND, P::BODY_VERSION, &body))
}

/// Decodes a part of a known kind.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFormat`] if the envelope is bad or frames
/// another kind, or a codec error if the body is malformed.
pub fn decode_part<P: StoragePart>(bytes: &[u8]) -> CoreResult<P> {
    let (envelope, body) = decode_envelope(bytes)?;
    if envelope.kind != P::KIND {
        return Err(CoreError::invalid_format(format!(
            "expected {} part, found {}",
            P::KIND,
            envelope.kind
        )));
    }
    P::decode_body(envelope.body_version, body)
}

/// Decodes any part, dispatching on its kind byte.
///
/// # Errors
///
/// Returns an error if the envelope or body is malformed.
pub fn decode_any(bytes: &[u8]) -> CoreResult<AnyStoragePart> {
    let (envelope, body) = decode_envelope(bytes)?;
    let version = envelope.body_version;
    let part = match envelope.kind {
        PartKind::KeyCompressor => KeyCompressorStoragePart::decode_body(version, body)?.into_any(),
        PartKind::CatalogIndex => CatalogIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::EntityIndex => EntityIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::Unique => UniqueIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::GlobalUnique => GlobalUniqueIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::Filter => FilterIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::Sort => SortIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::Chain => ChainIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::AttributeCardinality => {
            AttributeCardinalityIndexStoragePart::decode_body(version, body)?.into_any()
        }
        PartKind::ReferenceTypeCardinality => {
            ReferenceTypeCardinalityIndexStoragePart::decode_body(version, body)?.into_any()
        }
        PartKind::Hierarchy => HierarchyIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::Facet => FacetIndexStoragePart::decode_body(version, body)?.into_any(),
        PartKind::Price => PriceListAndCurrencyIndexStoragePart::decode_body(version, body)?.into_any(),
    };
    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_layout() {
        let bytes = encode_envelope(PartKind::Sort, 3, &[0xAA, 0xBB]);
        assert_eq!(&bytes[0..4], b"CIXP");
        assert_eq!(bytes[4], ENVELOPE_VERSION);
        assert_eq!(bytes[5], PartKind::Sort.as_byte());
        assert_eq!(bytes[6], 3);

        let (envelope, body) = decode_envelope(&bytes).unwrap();
        assert_eq!(envelope.kind, PartKind::Sort);
        assert_eq!(envelope.body_version, 3);
        assert_eq!(body, &[0xAA, 0xBB]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode_envelope(PartKind::Sort, 1, &[]);
        bytes[0] = b'X';
        assert!(matches!(
            decode_envelope(&bytes),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(
            decode_envelope(b"CIX"),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut bytes = encode_envelope(PartKind::Sort, 1, &[]);
        bytes[5] = 200;
        assert!(matches!(
            decode_envelope(&bytes),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn decode_part_checks_kind() {
        let compressor = crate::KeyCompressor::new();
        let part = compressor.create_storage_part().unwrap();
        let bytes = encode_part(&part).unwrap();
        assert!(decode_part::<KeyCompressorStoragePart>(&bytes).is_ok());
        assert!(matches!(
            decode_part::<HierarchyIndexStoragePart>(&bytes),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn decode_any_dispatches_on_kind() {
        let compressor = crate::KeyCompressor::new();
        let part = compressor.create_storage_part().unwrap();
        let bytes = encode_part(&part).unwrap();
        let any = decode_any(&bytes).unwrap();
        assert_eq!(any.kind(), PartKind::KeyCompressor);
    }

    #[test]
    fn rejects_unknown_body_version() {
        let compressor = crate::KeyCompressor::new();
        let part = compressor.create_storage_part().unwrap();
        let body = to_cbor(&part).unwrap();
        let bytes = encode_envelope(PartKind::KeyCompressor, 9, &body);
        assert!(matches!(
            decode_any(&bytes),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
