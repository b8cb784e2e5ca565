use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use hashbrown::HashMap;

use crate::identity::Identity;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    NotFound,
    Malformed,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    #[inline]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound,
            _ => StorageError::Io(err),
        }
    }
}

/// Identity persistence consumed by the switch: a pair of opaque DER blobs
/// (SubjectPublicKeyInfo and PKCS#8) referenced by a base name.
pub trait Storage {
    fn read_identity(&self, name: &str) -> StorageResult<Identity>;
    fn write_identity(&self, identity: &Identity, name: &str) -> StorageResult<()>;
}

/// Directory-backed storage writing `<name>.pub.der` and `<name>.key.der`.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    #[inline]
    pub fn new<P: Into<PathBuf>>(root: P) -> FileStorage {
        FileStorage { root: root.into() }
    }

    fn public_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.pub.der", name))
    }

    fn private_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.key.der", name))
    }
}

impl Storage for FileStorage {
    fn read_identity(&self, name: &str) -> StorageResult<Identity> {
        let public = fs::read(self.public_path(name))?;
        let private = fs::read(self.private_path(name))?;

        Identity::from_der(&public, &private).map_err(|_| StorageError::Malformed)
    }

    fn write_identity(&self, identity: &Identity, name: &str) -> StorageResult<()> {
        let private = identity.private_der().map_err(|_| StorageError::Malformed)?;

        fs::create_dir_all(&self.root)?;
        fs::write(self.public_path(name), identity.public_der())?;
        fs::write(self.private_path(name), &private)?;

        Ok(())
    }
}

/// In-memory storage for tests and embedded setups.
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, (Vec<u8>, Vec<u8>)>>,
}

impl MemoryStorage {
    #[inline]
    pub fn new() -> MemoryStorage {
        MemoryStorage {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Storage for MemoryStorage {
    fn read_identity(&self, name: &str) -> StorageResult<Identity> {
        let entries = self.entries.lock().expect("Storage lock poisoned");

        let (public, private) = entries.get(name).ok_or(StorageError::NotFound)?;
        Identity::from_der(public, private).map_err(|_| StorageError::Malformed)
    }

    fn write_identity(&self, identity: &Identity, name: &str) -> StorageResult<()> {
        let private = identity.private_der().map_err(|_| StorageError::Malformed)?;

        let mut entries = self.entries.lock().expect("Storage lock poisoned");
        entries.insert(
            name.to_string(),
            (identity.public_der().to_vec(), private),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_memory_storage_roundtrip() {
        let mut rng = StdRng::seed_from_u64(30);
        let identity = Identity::generate_bits(&mut rng, 1024).unwrap();

        let storage = MemoryStorage::new();
        storage.write_identity(&identity, "node").unwrap();

        let restored = storage.read_identity("node").unwrap();
        assert_eq!(restored.hashname(), identity.hashname());
    }

    #[test]
    fn test_memory_storage_not_found() {
        let storage = MemoryStorage::new();

        match storage.read_identity("missing") {
            Err(StorageError::NotFound) => (),
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }
}
