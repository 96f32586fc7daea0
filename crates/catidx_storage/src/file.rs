//! File-based part backend.
//!
//! Parts are appended to a single log file. Each record is laid out as:
//!
//! ```text
//! | len (u32 LE) | kind (u8) | flags (u8) | id (u64 LE) | payload (len bytes) | crc32 (u32 LE) |
//! ```
//!
//! The CRC covers everything before it. A later record for the same
//! address supersedes earlier ones; a record with the tombstone flag
//! deletes the address. The offset index is rebuilt by scanning the log
//! on open. An incomplete record at the end of the file is a torn write
//! and is cut off.

use crate::address::PartAddress;
use crate::backend::PartBackend;
use crate::crc::compute_crc32;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: usize = 4 + 1 + 1 + 8;
const CRC_SIZE: usize = 4;
const FLAG_TOMBSTONE: u8 = 0x01;

#[derive(Debug, Clone, Copy)]
struct RecordLocation {
    payload_offset: u64,
    len: usize,
}

/// A file-based part backend.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()`
///
/// # Locking
///
/// The log file is locked exclusively for the lifetime of the backend.
/// A second open of the same file fails with [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use catidx_storage::{FilePartBackend, PartAddress, PartBackend};
/// use std::path::Path;
///
/// let mut backend = FilePartBackend::open(Path::new("parts.log")).unwrap();
/// backend.write(PartAddress::new(2, 7), b"payload").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FilePartBackend {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<BTreeMap<PartAddress, RecordLocation>>,
    size: RwLock<u64>,
    dead_bytes: RwLock<u64>,
}

impl FilePartBackend {
    /// Opens or creates a part log at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the file,
    /// [`StorageError::Corrupted`] if a complete record fails its checksum,
    /// or an I/O error.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let (index, valid_end, dead_bytes) = scan(&mut file)?;
        let file_len = file.metadata()?.len();
        if valid_end < file_len {
            tracing::warn!(
                path = %path.display(),
                valid_end,
                file_len,
                "discarding torn record at end of part log"
            );
            file.set_len(valid_end)?;
        }
        tracing::debug!(path = %path.display(), parts = index.len(), "opened part log");

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            index: RwLock::new(index),
            size: RwLock::new(valid_end),
            dead_bytes: RwLock::new(dead_bytes),
        })
    }

    /// Opens or creates a part log, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of bytes held by superseded or deleted records.
    #[must_use]
    pub fn dead_bytes(&self) -> u64 {
        *self.dead_bytes.read()
    }

    /// Rewrites the log so it contains only live records.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted file cannot be written or swapped in.
    pub fn compact(&mut self) -> StorageResult<()> {
        let tmp_path = self.path.with_extension("compact");
        let mut live = Vec::new();
        for address in self.addresses()? {
            if let Some(data) = self.read(address)? {
                live.push((address, data));
            }
        }

        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut index = BTreeMap::new();
        let mut offset = 0u64;
        for (address, data) in &live {
            let record = encode_record(*address, 0, data)?;
            tmp.write_all(&record)?;
            index.insert(
                *address,
                RecordLocation {
                    payload_offset: offset + HEADER_SIZE as u64,
                    len: data.len(),
                },
            );
            offset += record.len() as u64;
        }
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let reclaimed = *self.dead_bytes.read();
        *self.file.write() = file;
        *self.index.write() = index;
        *self.size.write() = offset;
        *self.dead_bytes.write() = 0;
        tracing::info!(path = %self.path.display(), reclaimed, "compacted part log");
        Ok(())
    }

    fn append_record(&self, address: PartAddress, flags: u8, data: &[u8]) -> StorageResult<u64> {
        let record = encode_record(address, flags, data)?;
        let mut file = self.file.write();
        let mut size = self.size.write();
        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&record)?;
        *size += record.len() as u64;
        Ok(offset)
    }
}

fn encode_record(address: PartAddress, flags: u8, data: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(data.len()).map_err(|_| StorageError::RecordTooLarge { len: data.len() })?;
    let mut record = Vec::with_capacity(HEADER_SIZE + data.len() + CRC_SIZE);
    record.extend_from_slice(&len.to_le_bytes());
    record.push(address.kind);
    record.push(flags);
    record.extend_from_slice(&address.id.to_le_bytes());
    record.extend_from_slice(data);
    let crc = compute_crc32(&record);
    record.extend_from_slice(&crc.to_le_bytes());
    Ok(record)
}

fn record_size(len: usize) -> u64 {
    (HEADER_SIZE + len + CRC_SIZE) as u64
}

type ScanResult = (BTreeMap<PartAddress, RecordLocation>, u64, u64);

fn scan(file: &mut File) -> StorageResult<ScanResult> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;

    let mut index: BTreeMap<PartAddress, RecordLocation> = BTreeMap::new();
    let mut dead_bytes = 0u64;
    let mut offset = 0usize;

    while offset + HEADER_SIZE <= bytes.len() {
        let header = &bytes[offset..offset + HEADER_SIZE];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let end = offset + HEADER_SIZE + len + CRC_SIZE;
        if end > bytes.len() {
            break;
        }

        let body = &bytes[offset..end - CRC_SIZE];
        let stored = u32::from_le_bytes([
            bytes[end - 4],
            bytes[end - 3],
            bytes[end - 2],
            bytes[end - 1],
        ]);
        if compute_crc32(body) != stored {
            return Err(StorageError::corrupted(offset as u64, "record checksum mismatch"));
        }

        let kind = header[4];
        let flags = header[5];
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&header[6..14]);
        let address = PartAddress::new(kind, u64::from_le_bytes(id_bytes));

        if let Some(previous) = index.remove(&address) {
            dead_bytes += record_size(previous.len);
        }
        if flags & FLAG_TOMBSTONE != 0 {
            dead_bytes += record_size(len);
        } else {
            index.insert(
                address,
                RecordLocation {
                    payload_offset: (offset + HEADER_SIZE) as u64,
                    len,
                },
            );
        }
        offset = end;
    }

    Ok((index, offset as u64, dead_bytes))
}

impl PartBackend for FilePartBackend {
    fn read(&self, address: PartAddress) -> StorageResult<Option<Vec<u8>>> {
        let Some(location) = self.index.read().get(&address).copied() else {
            return Ok(None);
        };
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(location.payload_offset))?;
        let mut buf = vec![0u8; location.len];
        file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    fn write(&mut self, address: PartAddress, data: &[u8]) -> StorageResult<()> {
        let offset = self.append_record(address, 0, data)?;
        let previous = self.index.write().insert(
            address,
            RecordLocation {
                payload_offset: offset + HEADER_SIZE as u64,
                len: data.len(),
            },
        );
        if let Some(previous) = previous {
            *self.dead_bytes.write() += record_size(previous.len);
        }
        Ok(())
    }

    fn remove(&mut self, address: PartAddress) -> StorageResult<bool> {
        if !self.index.read().contains_key(&address) {
            return Ok(false);
        }
        self.append_record(address, FLAG_TOMBSTONE, &[])?;
        if let Some(previous) = self.index.write().remove(&address) {
            *self.dead_bytes.write() += record_size(previous.len) + record_size(0);
        }
        Ok(true)
    }

    fn addresses(&self) -> StorageResult<Vec<PartAddress>> {
        Ok(self.index.read().keys().copied().collect())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parts.log");
        let backend = FilePartBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.addresses().unwrap().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let mut backend = FilePartBackend::open(&dir.path().join("parts.log")).unwrap();
        let address = PartAddress::new(5, 77);
        backend.write(address, b"filter part").unwrap();
        assert_eq!(backend.read(address).unwrap(), Some(b"filter part".to_vec()));
        assert_eq!(backend.read(PartAddress::new(5, 78)).unwrap(), None);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parts.log");

        {
            let mut backend = FilePartBackend::open(&path).unwrap();
            backend.write(PartAddress::new(1, 1), b"one").unwrap();
            backend.write(PartAddress::new(2, 2), b"two").unwrap();
            backend.write(PartAddress::new(1, 1), b"uno").unwrap();
            backend.remove(PartAddress::new(2, 2)).unwrap();
            backend.sync().unwrap();
        }

        let backend = FilePartBackend::open(&path).unwrap();
        assert_eq!(backend.read(PartAddress::new(1, 1)).unwrap(), Some(b"uno".to_vec()));
        assert_eq!(backend.read(PartAddress::new(2, 2)).unwrap(), None);
        assert_eq!(backend.addresses().unwrap(), vec![PartAddress::new(1, 1)]);
        assert!(backend.dead_bytes() > 0);
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parts.log");
        let _first = FilePartBackend::open(&path).unwrap();
        let second = FilePartBackend::open(&path);
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn file_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parts.log");
        let full_size;
        {
            let mut backend = FilePartBackend::open(&path).unwrap();
            backend.write(PartAddress::new(3, 1), b"complete").unwrap();
            full_size = backend.size().unwrap();
            backend.write(PartAddress::new(3, 2), b"will be torn").unwrap();
            backend.sync().unwrap();
        }
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(full_size + 7).unwrap();
        }

        let backend = FilePartBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), full_size);
        assert_eq!(backend.read(PartAddress::new(3, 1)).unwrap(), Some(b"complete".to_vec()));
        assert_eq!(backend.read(PartAddress::new(3, 2)).unwrap(), None);
    }

    #[test]
    fn file_checksum_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parts.log");
        {
            let mut backend = FilePartBackend::open(&path).unwrap();
            backend.write(PartAddress::new(3, 1), b"payload").unwrap();
            backend.sync().unwrap();
        }
        {
            let mut bytes = std::fs::read(&path).unwrap();
            bytes[HEADER_SIZE] ^= 0xFF;
            std::fs::write(&path, bytes).unwrap();
        }

        let result = FilePartBackend::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted { offset: 0, .. })));
    }

    #[test]
    fn file_compact_keeps_live_parts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parts.log");
        let mut backend = FilePartBackend::open(&path).unwrap();
        for i in 0..10u8 {
            backend.write(PartAddress::new(6, 1), &[i; 32]).unwrap();
        }
        backend.write(PartAddress::new(6, 2), b"gone").unwrap();
        backend.remove(PartAddress::new(6, 2)).unwrap();
        let before = backend.size().unwrap();

        backend.compact().unwrap();
        assert!(backend.size().unwrap() < before);
        assert_eq!(backend.dead_bytes(), 0);
        assert_eq!(backend.read(PartAddress::new(6, 1)).unwrap(), Some(vec![9u8; 32]));
        drop(backend);

        let reopened = FilePartBackend::open(&path).unwrap();
        assert_eq!(reopened.addresses().unwrap(), vec![PartAddress::new(6, 1)]);
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("parts.log");
        let backend = FilePartBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.path(), path);
    }

    proptest! {
        #[test]
        fn file_reopen_matches_last_writes(
            ops in prop::collection::vec((0u8..3, 0u64..5, prop::collection::vec(any::<u8>(), 0..16), any::<bool>()), 1..40)
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("parts.log");
            let mut expected: BTreeMap<PartAddress, Vec<u8>> = BTreeMap::new();
            {
                let mut backend = FilePartBackend::open(&path).unwrap();
                for (kind, id, data, delete) in &ops {
                    let address = PartAddress::new(*kind, *id);
                    if *delete {
                        backend.remove(address).unwrap();
                        expected.remove(&address);
                    } else {
                        backend.write(address, data).unwrap();
                        expected.insert(address, data.clone());
                    }
                }
                backend.flush().unwrap();
            }
            let backend = FilePartBackend::open(&path).unwrap();
            prop_assert_eq!(backend.addresses().unwrap(), expected.keys().copied().collect::<Vec<_>>());
            for (address, data) in &expected {
                prop_assert_eq!(backend.read(*address).unwrap(), Some(data.clone()));
            }
        }
    }
}
