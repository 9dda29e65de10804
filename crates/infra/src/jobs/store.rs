//! Job record storage.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::types::JobRecord;

pub trait JobRecordStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError>;

    /// Insert or replace the record for `record.name`.
    fn save(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    /// All records, ordered by name.
    fn list(&self) -> Result<Vec<JobRecord>, JobStoreError>;
}

impl<S> JobRecordStore for Arc<S>
where
    S: JobRecordStore + ?Sized,
{
    fn load(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).load(name)
    }

    fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        (**self).save(record)
    }

    fn list(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).list()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("corrupt job record {name}: {reason}")]
    Corrupt { name: String, reason: String },
}

/// In-memory job record store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobRecordStore {
    records: RwLock<BTreeMap<String, JobRecord>>,
}

impl InMemoryJobRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobRecordStore for InMemoryJobRecordStore {
    fn load(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        Ok(records.get(name).cloned())
    }

    fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        records.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        Ok(records.values().cloned().collect())
    }
}
