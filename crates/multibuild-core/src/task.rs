//! Pool transport contract and per-call execution options.

use crate::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Request sent to an execution unit.
///
/// A unit processes one task at a time and produces exactly one
/// [`TaskResponse`] per request, so no correlation beyond `id` is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Pool-allocated task identifier.
    pub id: TaskId,

    /// Method tag selecting the handler operation.
    pub method: String,

    /// Serializable input payload.
    pub data: Value,
}

/// Response produced by an execution unit.
///
/// Exactly one of `data`/`error` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error text on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResponse {
    /// Build a success response.
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    /// Build a failure response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
        }
    }

    /// Settle the response into a result, honoring the embedded error flag.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }
}

/// Per-call options for `WorkerPool::exec`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Timeout override for this task. `None` uses the pool-level timeout.
    pub timeout: Option<Duration>,

    /// How many times a transient failure is retried before the task
    /// rejects with the last observed error.
    pub max_retries: u32,
}

impl ExecOptions {
    /// Builder method to set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builder method to set the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_into_result() {
        assert_eq!(TaskResponse::ok(json!(1)).into_result(), Ok(json!(1)));
        assert_eq!(
            TaskResponse::err("boom").into_result(),
            Err("boom".to_string())
        );
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let wire = serde_json::to_string(&TaskResponse::ok(json!({"out": "x"}))).unwrap();
        assert!(!wire.contains("error"));

        let wire = serde_json::to_string(&TaskResponse::err("nope")).unwrap();
        assert!(!wire.contains("data"));
    }

    #[test]
    fn test_request_round_trip() {
        let req = TaskRequest {
            id: TaskId::new(3),
            method: "build".to_string(),
            data: json!({"entry": "src/index.ts"}),
        };
        let wire = serde_json::to_string(&req).unwrap();
        let back: TaskRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, req);
    }
}
