//! Test doubles for reaction handlers.
//!
//! Handy in integration tests and local demos where no provider API is
//! reachable. Pair with [`crate::clock::ManualClock`] to drive retry
//! schedules deterministically.

use crate::handlers::{HandlerError, ReactionHandler};
use crate::models::ActionInstance;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Plays back scripted results in order, then repeats the fallback.
///
/// Every call is recorded with the mapped payload it received.
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Result<Value, HandlerError>>>,
    fallback: Result<Value, HandlerError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Value>>,
}

impl ScriptedHandler {
    /// Always succeeds with `output`
    pub fn succeeding(output: Value) -> Self {
        Self::with_fallback(Ok(output))
    }

    /// Always fails with `error`
    pub fn failing(error: HandlerError) -> Self {
        Self::with_fallback(Err(error))
    }

    pub fn with_fallback(fallback: Result<Value, HandlerError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue results returned before the fallback takes over
    pub fn then(self, result: Result<Value, HandlerError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Sleep before answering; used to exercise handler timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Payloads received so far, oldest first
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ReactionHandler for ScriptedHandler {
    async fn execute(
        &self,
        _instance: &ActionInstance,
        payload: &Value,
    ) -> Result<Value, HandlerError> {
        self.calls.lock().push(payload.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
