//! # catidx storage
//!
//! Keyed storage backends for catidx storage parts.
//!
//! Backends are **opaque part stores**: they map a [`PartAddress`]
//! (part kind byte + 64-bit part id) to the bytes last written under it.
//! They never interpret the bytes; the core crate owns the part format.
//!
//! ## Available Backends
//!
//! - [`InMemoryPartBackend`] - For testing and ephemeral stores
//! - [`FilePartBackend`] - Append-only record log with an in-memory offset index
//!
//! ## Example
//!
//! ```rust
//! use catidx_storage::{InMemoryPartBackend, PartAddress, PartBackend};
//!
//! let mut backend = InMemoryPartBackend::new();
//! let address = PartAddress::new(3, 42);
//! backend.write(address, b"part bytes").unwrap();
//! assert_eq!(backend.read(address).unwrap().as_deref(), Some(&b"part bytes"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod address;
mod backend;
mod crc;
mod error;
mod file;
mod memory;

pub use address::PartAddress;
pub use backend::PartBackend;
pub use crc::compute_crc32;
pub use error::{StorageError, StorageResult};
pub use file::FilePartBackend;
pub use memory::InMemoryPartBackend;
