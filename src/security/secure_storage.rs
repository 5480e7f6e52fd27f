use crate::errors::{AppError, Result};
use crate::utils::{decrypt_data, encrypt_data};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Default)]
struct StorageFile {
    cookie: Option<String>,
}

/// Encrypted-at-rest storage for the login cookie. A per-installation
/// master key lives next to the storage file in the user data directory.
pub struct SecureStorage {
    storage_path: PathBuf,
    master_key: [u8; 32],
}

impl SecureStorage {
    pub fn new() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| AppError::Filesystem("Could not find data directory".to_string()))?
            .join("ximalaya-downloader");

        fs::create_dir_all(&data_dir)
            .map_err(|e| AppError::Filesystem(format!("Failed to create data directory: {}", e)))?;

        let storage_path = data_dir.join("secure_storage.json");
        let master_key = Self::get_or_create_master_key(&data_dir)?;

        Ok(Self {
            storage_path,
            master_key,
        })
    }

    fn get_or_create_master_key(data_dir: &PathBuf) -> Result<[u8; 32]> {
        let key_path = data_dir.join("master.key");

        if key_path.exists() {
            let key_data = fs::read(&key_path)
                .map_err(|e| AppError::Filesystem(format!("Failed to read master key: {}", e)))?;

            if key_data.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&key_data);
                return Ok(key);
            }
        }

        Self::generate_master_key(&key_path)
    }

    fn generate_master_key(key_path: &PathBuf) -> Result<[u8; 32]> {
        use rand::RngCore;

        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);

        fs::write(key_path, key)
            .map_err(|e| AppError::Filesystem(format!("Failed to write master key: {}", e)))?;

        Ok(key)
    }

    pub fn store_cookie(&self, cookie: &str) -> Result<()> {
        let encrypted = encrypt_data(cookie, &self.master_key)?;
        self.save_storage(&StorageFile {
            cookie: Some(encrypted),
        })
    }

    pub fn get_cookie(&self) -> Result<Option<String>> {
        let storage = self.load_storage()?;
        match storage.cookie {
            Some(encrypted) => Ok(Some(decrypt_data(&encrypted, &self.master_key)?)),
            None => Ok(None),
        }
    }

    pub fn clear_cookie(&self) -> Result<()> {
        self.save_storage(&StorageFile::default())
    }

    fn load_storage(&self) -> Result<StorageFile> {
        if self.storage_path.exists() {
            let data = fs::read_to_string(&self.storage_path)
                .map_err(|e| AppError::Filesystem(format!("Failed to read storage file: {}", e)))?;
            let storage: StorageFile = serde_json::from_str(&data)?;
            Ok(storage)
        } else {
            Ok(StorageFile::default())
        }
    }

    fn save_storage(&self, storage: &StorageFile) -> Result<()> {
        let data = serde_json::to_string_pretty(storage)?;
        fs::write(&self.storage_path, data)
            .map_err(|e| AppError::Filesystem(format!("Failed to write storage file: {}", e)))?;
        Ok(())
    }
}
