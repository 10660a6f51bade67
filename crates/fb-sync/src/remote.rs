use crate::error::RemoteError;
use crate::payload::WirePayload;
use async_trait::async_trait;
use serde_json::Value;

/// The service finished inspections are delivered to.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Submits one record; the raw response body is returned for acceptance
    /// detection. Transport failures and non-success responses are errors.
    async fn submit(&self, payload: &WirePayload) -> Result<Value, RemoteError>;

    /// Cheap reachability check.
    async fn ping(&self) -> bool;
}
