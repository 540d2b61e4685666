use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{PortalError, Result};

/// Key holding the bearer token attached to every request
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Key holding the signed-in user's email
pub const USER_EMAIL_KEY: &str = "user_email";
/// Key holding the signed-in user's role
pub const USER_ROLE_KEY: &str = "user_role";

/// Every key that belongs to the signed-in session
pub const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, USER_EMAIL_KEY, USER_ROLE_KEY];

/// Persistent string key-value storage for session data
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn contains(&self, key: &str) -> bool;

    /// Remove a key; missing keys are not an error
    async fn remove(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Drop every session key from `store`
pub async fn clear_session(store: &dyn KeyValueStore) -> Result<()> {
    for key in SESSION_KEYS {
        store.remove(key).await?;
    }
    Ok(())
}

/// In-memory store, lost when the process exits
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

const ENTRY_EXTENSION: &str = "session";

/// Store keeping one `<sha256(key)>.session` file per key in a directory.
///
/// Writes land in a temporary file that is renamed into place, so a
/// reader never sees a half-written token. `clear` only removes this
/// store's own entries; other files in the directory are left alone.
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Open a store in `dir`, creating the directory if needed
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{:x}", digest))
            .with_extension(ENTRY_EXTENSION)
    }
}

fn storage_error(action: &str, err: std::io::Error) -> PortalError {
    PortalError::Storage {
        message: format!("Failed to {} session value: {}", action, err),
    }
}

#[async_trait]
impl KeyValueStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.entry_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        let staging = path.with_extension("tmp");
        fs::write(&staging, value)
            .await
            .map_err(|e| storage_error("write", e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| storage_error("write", e))
    }

    async fn contains(&self, key: &str) -> bool {
        fs::metadata(self.entry_path(key)).await.is_ok()
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(storage_error("remove", e)),
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| storage_error("remove", e))?;
            }
        }
        Ok(())
    }
}

/// Store that keeps nothing; every session starts signed out
pub struct NoStore;

#[async_trait]
impl KeyValueStore for NoStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn contains(&self, _key: &str) -> bool {
        false
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}
