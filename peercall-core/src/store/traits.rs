use crate::store::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

/// Snapshots of one key, starting with its value at subscription time.
///
/// Every item is the full current value (`None` once deleted), never a diff.
/// Several writes may collapse into one item and the same value may be
/// delivered more than once. Dropping the stream ends the subscription.
pub type WatchStream = BoxStream<'static, Option<Value>>;

/// Shared key-value store used as the out-of-band signaling channel.
///
/// Writes are atomic per key and last-write-wins. Collections are plain keys
/// holding a JSON array that only ever grows through [`append`].
///
/// [`append`]: SignalingStore::append
#[async_trait]
pub trait SignalingStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
    /// Appends one entry to the collection at `key`, creating it if missing.
    async fn append(&self, key: &str, entry: Value) -> Result<()>;
    async fn watch(&self, key: &str) -> Result<WatchStream>;
}
