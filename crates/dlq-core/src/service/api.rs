//! The read side of the queue as seen by a client.

use async_trait::async_trait;

use crate::store::QueueJob;

use super::{QueueError, QueueService};

/// What the client mirror needs from the server. Implemented in-process by
/// `QueueService`; a remote transport would implement it over the wire.
#[async_trait]
pub trait QueueApi: Send + Sync {
    /// Every job, with positions, from one consistent snapshot.
    async fn fetch_all(&self) -> Result<Vec<QueueJob>, QueueError>;
}

#[async_trait]
impl QueueApi for QueueService {
    async fn fetch_all(&self) -> Result<Vec<QueueJob>, QueueError> {
        self.positioned_snapshot().await
    }
}
