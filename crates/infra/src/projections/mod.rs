//! Meeting projection: the denormalized read model this pipeline feeds.
//!
//! Rows are created by the meetings read path; this crate only updates the
//! transcription fields of rows that already exist, keyed by
//! `(bot_id, source_type)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use callscribe_core::{MeetingProjection, ProjectionKey, ProjectionUpdate};

use crate::store::StoreError;

pub mod in_memory;
pub mod postgres;
pub mod sync;

pub use in_memory::InMemoryProjectionStore;
pub use postgres::PostgresProjectionStore;
pub use sync::{ProjectionSync, SyncOutcome};

#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn get(&self, key: &ProjectionKey) -> Result<Option<MeetingProjection>, StoreError>;

    /// Apply `update` to the row at `key`. Returns `false` when no row exists.
    async fn update(
        &self,
        key: &ProjectionKey,
        update: &ProjectionUpdate,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
