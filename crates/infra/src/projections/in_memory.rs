use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use callscribe_core::{MeetingProjection, ProjectionKey, ProjectionUpdate};

use super::ProjectionStore;
use crate::store::StoreError;

/// In-memory projection rows for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    rows: RwLock<HashMap<ProjectionKey, MeetingProjection>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row, as the meetings read path would.
    pub fn insert(&self, row: MeetingProjection) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::Storage("projection store lock poisoned".to_string()))?;
        rows.insert(row.key.clone(), row);
        Ok(())
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn get(&self, key: &ProjectionKey) -> Result<Option<MeetingProjection>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::Storage("projection store lock poisoned".to_string()))?;
        Ok(rows.get(key).cloned())
    }

    async fn update(
        &self,
        key: &ProjectionKey,
        update: &ProjectionUpdate,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::Storage("projection store lock poisoned".to_string()))?;
        match rows.get_mut(key) {
            Some(row) => {
                row.apply(update, at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
