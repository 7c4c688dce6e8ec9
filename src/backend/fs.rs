//! Local filesystem backend.
//!
//! Layout under the store directory:
//!
//! ```text
//! MANIFEST                     magic + format version
//! LOCK                         exclusive process lock
//! objects/<kind>/<xx>/<hex>    one file per object, sharded by first hash byte
//! refs.bin                     reference table (MessagePack + CRC32)
//! ```

use super::{ObjectBackend, ObjectKind, RefTable, ReferenceBackend};
use crate::error::{Result, StoreError};
use crate::types::{CommitId, Hash, Reference};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"RFS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Magic bytes for object files.
const OBJECT_MAGIC: &[u8; 4] = b"OBJ\0";

/// Current object format version.
const OBJECT_VERSION: u8 = 1;

/// Magic bytes for the reference table.
const REFS_MAGIC: &[u8; 4] = b"REF\0";

/// Current reference table format version.
const REFS_VERSION: u8 = 1;

/// Object file bytes around the payload: magic, version, kind, length, CRC.
const OBJECT_OVERHEAD: u64 = 4 + 1 + 1 + 8 + 4;

/// Reference table bytes around the body: magic, version, length, CRC.
const REFS_OVERHEAD: u64 = 4 + 1 + 8 + 4;

/// Filesystem backend holding an exclusive lock on its directory.
pub struct FsBackend {
    /// Base directory.
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Reference table; every mutation is persisted before it becomes visible.
    refs: Mutex<RefTable>,
}

impl FsBackend {
    /// Open an existing backend directory, or create it if allowed.
    pub fn open(path: impl AsRef<Path>, create_if_missing: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.join("MANIFEST").exists() {
            Self::verify_manifest(&path)?;
        } else if create_if_missing {
            fs::create_dir_all(&path)?;
            Self::write_manifest(&path)?;
        } else {
            return Err(StoreError::NotInitialized);
        }

        for kind in ObjectKind::ALL {
            fs::create_dir_all(path.join("objects").join(kind.as_str()))?;
        }

        let lock_file = Self::acquire_lock(&path)?;

        let refs_path = path.join("refs.bin");
        let refs = if refs_path.exists() {
            Self::load_refs(&refs_path)?
        } else {
            RefTable::default()
        };

        debug!(path = %path.display(), "opened filesystem backend");

        Ok(Self {
            path,
            _lock_file: lock_file,
            refs: Mutex::new(refs),
        })
    }

    /// Base directory of this backend.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }

    fn object_path(&self, kind: ObjectKind, key: &Hash) -> PathBuf {
        self.path
            .join("objects")
            .join(kind.as_str())
            .join(key.shard_prefix())
            .join(key.to_hex())
    }

    /// Write `bytes` to `target` through a uniquely named temp file and a rename,
    /// so readers never observe a partial file.
    fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn encode_object(kind: ObjectKind, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 18);
        out.extend_from_slice(OBJECT_MAGIC);
        out.push(OBJECT_VERSION);
        out.push(kind as u8);
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out
    }

    fn decode_object(kind: ObjectKind, key: &Hash, mut file: File) -> Result<Vec<u8>> {
        let file_len = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != OBJECT_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid object magic".into()));
        }

        let mut header = [0u8; 2];
        file.read_exact(&mut header)?;
        if header[0] != OBJECT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported object version: {}",
                header[0]
            )));
        }
        if header[1] != kind as u8 {
            return Err(StoreError::InvalidFormat(format!(
                "Object {} stored as kind {}, expected {}",
                key, header[1], kind as u8
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = Self::framed_len(len_bytes, file_len, OBJECT_OVERHEAD)?;

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&data);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        if kind.is_content_addressed() {
            let computed = Hash::from_bytes(&data);
            if &computed != key {
                return Err(StoreError::HashMismatch {
                    expected: key.to_hex(),
                    got: computed.to_hex(),
                });
            }
        }

        Ok(data)
    }

    /// Payload length from a frame header, checked against the file size.
    fn framed_len(len_bytes: [u8; 8], file_len: u64, overhead: u64) -> Result<usize> {
        let len = u64::from_le_bytes(len_bytes);
        if len.checked_add(overhead) != Some(file_len) {
            return Err(StoreError::InvalidFormat(format!(
                "Frame declares {} payload bytes but the file holds {}",
                len,
                file_len.saturating_sub(overhead)
            )));
        }
        usize::try_from(len)
            .map_err(|_| StoreError::InvalidFormat(format!("Frame too large: {} bytes", len)))
    }

    fn save_refs(&self, table: &RefTable) -> Result<()> {
        let encoded = rmp_serde::to_vec(table)?;

        let mut out = Vec::with_capacity(encoded.len() + 17);
        out.extend_from_slice(REFS_MAGIC);
        out.push(REFS_VERSION);
        out.extend_from_slice(&(encoded.len() as u64).to_le_bytes());
        out.extend_from_slice(&encoded);
        out.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());

        Self::write_atomically(&self.path.join("refs.bin"), &out)
    }

    fn load_refs(path: &Path) -> Result<RefTable> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != REFS_MAGIC {
            return Err(StoreError::InvalidFormat(
                "Invalid reference table magic".into(),
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != REFS_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported reference table version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = Self::framed_len(len_bytes, file_len, REFS_OVERHEAD)?;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }

    /// Apply `change` to a copy of the table, persist it, then publish it.
    fn mutate_refs<T>(&self, change: impl FnOnce(&mut RefTable) -> Result<T>) -> Result<T> {
        let mut refs = self.refs.lock();
        let mut next = refs.clone();
        let out = change(&mut next)?;
        if let Err(e) = self.save_refs(&next) {
            warn!(error = %e, "failed to persist reference table");
            return Err(StoreError::StorageUnavailable(e.to_string()));
        }
        *refs = next;
        Ok(out)
    }
}

impl ObjectBackend for FsBackend {
    fn put_object(&self, kind: ObjectKind, key: &Hash, data: &[u8]) -> Result<bool> {
        let path = self.object_path(kind, key);
        if path.exists() {
            return Ok(false);
        }

        let written = match path.parent() {
            Some(shard) => fs::create_dir_all(shard).map_err(StoreError::from),
            None => Ok(()),
        }
        .and_then(|()| Self::write_atomically(&path, &Self::encode_object(kind, data)));

        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "failed to write object");
            return Err(StoreError::StorageUnavailable(format!(
                "writing {} object {}: {}",
                kind.as_str(),
                key,
                e
            )));
        }
        Ok(true)
    }

    fn get_object(&self, kind: ObjectKind, key: &Hash) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(kind, key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open object");
                return Err(StoreError::StorageUnavailable(format!(
                    "reading {} object {}: {}",
                    kind.as_str(),
                    key,
                    e
                )));
            }
        };
        Self::decode_object(kind, key, file).map(Some)
    }

    fn contains_object(&self, kind: ObjectKind, key: &Hash) -> Result<bool> {
        Ok(self.object_path(kind, key).exists())
    }
}

impl ReferenceBackend for FsBackend {
    fn get_reference(&self, name: &str) -> Result<Option<Reference>> {
        Ok(self.refs.lock().get(name))
    }

    fn list_references(&self) -> Result<Vec<Reference>> {
        Ok(self.refs.lock().list())
    }

    fn create_reference(&self, reference: Reference) -> Result<()> {
        self.mutate_refs(|table| table.create(reference))
    }

    fn compare_and_swap(
        &self,
        name: &str,
        expected: CommitId,
        new_head: CommitId,
    ) -> Result<Reference> {
        self.mutate_refs(|table| table.compare_and_swap(name, expected, new_head))
    }

    fn delete_reference(&self, name: &str, expected: CommitId) -> Result<Reference> {
        self.mutate_refs(|table| table.delete(name, expected))
    }
}
