//! In-memory raw storage backend
//!
//! Contract-conformant stand-in for the S3 backend, used by the integration
//! suite and for local runs without object storage.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use adflow_common::{IngestError, Result};

use crate::contract::{RawStorage, StorageMetadata};

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RawStorage for MemoryStorage {
    async fn put(&self, content: &[u8], metadata: &StorageMetadata) -> Result<String> {
        let key = super::build_key(&metadata.account_id, &metadata.filename);
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| IngestError::Storage("storage lock poisoned".to_string()))?;
        objects.insert(key.clone(), content.to_vec());
        Ok(key)
    }

    async fn get(&self, file_id: &str) -> Result<Vec<u8>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| IngestError::Storage("storage lock poisoned".to_string()))?;
        objects
            .get(file_id)
            .cloned()
            .ok_or_else(|| IngestError::Storage(format!("not found: {}", file_id)))
    }

    async fn delete(&self, file_id: &str) -> Result<bool> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| IngestError::Storage("storage lock poisoned".to_string()))?;
        Ok(objects.remove(file_id).is_some())
    }
}
