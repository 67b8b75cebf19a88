//! The seam between the engine and the network.

use crate::error::SyncResult;
use crate::protocol::{
    BatchRequest, BatchResponse, EntitySyncStatus, PullRequest, PullResponse, PushRequest,
    PushResponse,
};
use async_trait::async_trait;

/// Sync endpoints as the scheduler and coordinator see them.
///
/// [`ApiClient`](crate::ApiClient) implements this over HTTP with retries;
/// tests substitute an in-memory server.
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Fetches the delta for one kind since a cursor.
    async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse>;

    /// Sends created/updated entities or deletions.
    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse>;

    /// Pushes entities and pulls the delta in one round trip.
    async fn batch(&self, request: BatchRequest) -> SyncResult<BatchResponse>;

    /// Server-side counts per kind.
    async fn status(&self) -> SyncResult<Vec<EntitySyncStatus>>;
}
