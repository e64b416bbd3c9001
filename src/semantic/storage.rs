//! Binary persistence for the vector index.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - entry_id: u64 (little-endian)
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)
//!
//! The file is a cache: any load failure is recoverable by rebuilding from
//! the TM store.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::VectorIndex;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

const HEADER_SIZE: usize = 47;

/// Bytes covered by the checksum (everything before the checksum field)
const CHECKSUMMED: usize = HEADER_SIZE - 4;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file was built by a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.version;
        bytes[1..33].copy_from_slice(&self.model_id);
        bytes[33..35].copy_from_slice(&self.dimensions.to_le_bytes());
        bytes[35..43].copy_from_slice(&self.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&bytes[..CHECKSUMMED]);
        bytes[43..47].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, VectorStorageError> {
        let version = bytes[0];
        if version > FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes(bytes[43..47].try_into().expect("4 bytes"));
        if stored_checksum != crc32fast::hash(&bytes[..CHECKSUMMED]) {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&bytes[1..33]);

        Ok(Header {
            version,
            model_id,
            dimensions: u16::from_le_bytes(bytes[33..35].try_into().expect("2 bytes")),
            entry_count: u64::from_le_bytes(bytes[35..43].try_into().expect("8 bytes")),
        })
    }
}

/// Reads and writes vectors.bin for one TM store.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index, verifying the file was written by the expected model
    /// with the expected dimensions.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;
        let header = Header::decode(&header_bytes)?;

        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let dimensions = header.dimensions as usize;
        let mut index = VectorIndex::with_capacity(dimensions, header.entry_count as usize);

        let mut entry_buf = vec![0u8; 16 + dimensions * 4];
        for _ in 0..header.entry_count {
            reader.read_exact(&mut entry_buf)?;

            let id = u64::from_le_bytes(entry_buf[0..8].try_into().expect("8 bytes"));
            let content_hash = u64::from_le_bytes(entry_buf[8..16].try_into().expect("8 bytes"));
            let embedding: Vec<f32> = entry_buf[16..]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().expect("4 bytes")))
                .collect();

            // Skip vectors the index rejects (e.g. zero norm)
            let _ = index.insert(id, content_hash, embedding);
        }

        Ok(index)
    }

    /// Save the index atomically: temp file, fsync, rename.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        if let Err(e) = self.write_to_file(&temp_path, index, model_id) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        index: &VectorIndex,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: index.dimensions() as u16,
            entry_count: index.len() as u64,
        };
        writer.write_all(&header.encode())?;

        for (id, entry) in index.iter() {
            writer.write_all(&id.to_le_bytes())?;
            writer.write_all(&entry.content_hash.to_le_bytes())?;
            for &value in &entry.embedding {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn storage_in(dir: &Path) -> VectorStorage {
        VectorStorage::new(dir.join("vectors.bin"))
    }

    #[test]
    fn save_and_load_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let model_id = test_model_id();

        let mut index = VectorIndex::new(3);
        index.insert(1, 100, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(2, 200, vec![0.0, 1.0, 0.0]).unwrap();
        storage.save(&index, &model_id).unwrap();

        let loaded = storage.load(&model_id, 3).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(1).unwrap().content_hash, 100);
        assert_eq!(loaded.get(1).unwrap().embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(loaded.get(2).unwrap().content_hash, 200);
    }

    #[test]
    fn empty_index_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let model_id = test_model_id();

        storage.save(&VectorIndex::new(384), &model_id).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&model_id, 384).unwrap();
        assert_eq!(loaded.len(), 0);
        assert_eq!(loaded.dimensions(), 384);
    }

    #[test]
    fn different_model_id_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());

        storage.save(&VectorIndex::new(3), &test_model_id()).unwrap();

        let mut other_model = [0u8; 32];
        other_model[0] = 0xFF;
        assert!(matches!(
            storage.load(&other_model, 3),
            Err(VectorStorageError::ModelMismatch)
        ));
    }

    #[test]
    fn different_dimensions_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let model_id = test_model_id();

        storage.save(&VectorIndex::new(3), &model_id).unwrap();
        assert!(matches!(
            storage.load(&model_id, 384),
            Err(VectorStorageError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_header_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let model_id = test_model_id();

        let mut index = VectorIndex::new(3);
        index.insert(1, 100, vec![1.0, 0.0, 0.0]).unwrap();
        storage.save(&index, &model_id).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        assert!(matches!(
            storage.load(&model_id, 3),
            Err(VectorStorageError::ChecksumMismatch)
        ));
    }

    #[test]
    fn failed_save_leaves_no_temp_file() {
        let storage = VectorStorage::new(PathBuf::from("/nonexistent/dir/vectors.bin"));
        let result = storage.save(&VectorIndex::new(3), &test_model_id());

        assert!(result.is_err());
        assert!(!storage.path().with_extension("tmp").exists());
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());

        storage.save(&VectorIndex::new(3), &test_model_id()).unwrap();
        assert!(storage.exists());

        storage.delete().unwrap();
        assert!(!storage.exists());
    }
}
