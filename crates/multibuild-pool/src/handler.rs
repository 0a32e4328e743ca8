//! The opaque host function executed inside units.

use async_trait::async_trait;
use serde_json::Value;

/// Handler invoked by execution units, one task at a time.
///
/// An `Err` is an application-level failure and is retried up to the
/// task's retry ceiling. A panic inside `handle` is treated as a unit
/// crash and triggers replacement when auto-restart is enabled.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute one task. `method` selects the operation, `data` is the
    /// task's serializable payload.
    async fn handle(&self, method: &str, data: Value) -> Result<Value, String>;
}
