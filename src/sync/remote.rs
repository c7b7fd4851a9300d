use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Untyped field mapping exchanged with the remote API
pub type RawRecord = Map<String, Value>;

/// What the reconciliation engine needs from a remote variable store.
///
/// Implementations must page through listings themselves and turn every
/// non-success response into a [`TransportError`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Every variable on the remote, all pages concatenated in request order
    async fn list(&self) -> Result<Vec<Value>, TransportError>;

    async fn create(&self, record: &RawRecord) -> Result<Value, TransportError>;

    /// Overwrite the variable addressed by `(key, scope)`
    async fn update(&self, key: &str, record: &RawRecord, scope: &str) -> Result<Value, TransportError>;

    async fn delete(&self, key: &str, scope: &str) -> Result<(), TransportError>;
}
