use super::Storage;
use crate::error::StorageError;
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const LOCK_FILE: &str = ".lock";

/// Whether [`FileStorage`] takes an exclusive lock on its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Hold an advisory exclusive lock for the lifetime of the storage.
    #[default]
    Exclusive,
    /// No locking. The caller guarantees a single owner.
    None,
}

/// Hex-encoded xxh64 hash of a key, plus `.json`. The file name used for `key`.
pub fn key_file_name(key: &str) -> String {
    let hash = xxhash_rust::xxh64::xxh64(key.as_bytes(), 0);
    format!("{hash:016x}.json")
}

/// Storage keeping one file per key inside a directory.
///
/// Writes are atomic: the value goes to a `.tmp` file which is synced and
/// then renamed over the target, so a crash mid-write leaves the previous
/// value intact.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    _lock: Option<File>,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory with an exclusive lock.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if another handle holds
    /// the lock.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_lock(dir, LockMode::Exclusive)
    }

    pub fn open_with_lock(dir: impl AsRef<Path>, mode: LockMode) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = match mode {
            LockMode::Exclusive => Some(acquire_lock(&dir)?),
            LockMode::None => None,
        };

        Ok(FileStorage { dir, _lock: lock })
    }

    /// Returns the storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file that holds the value for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key_file_name(key))
    }
}

fn acquire_lock(dir: &Path) -> io::Result<File> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;
    file.try_lock_exclusive().map_err(|_| {
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("another process holds the lock on {}", path.display()),
        )
    })?;
    Ok(file)
}

#[async_trait]
impl Storage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");

        let write = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(value.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        };
        write.await.map_err(|e| StorageError::io(key, e))
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        for target in [path.with_extension("json.tmp"), path] {
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(key, e)),
            }
        }
        Ok(())
    }
}
