//! # Reaction Handlers
//!
//! Capability table mapping `(provider, action type)` to the code that
//! performs a reaction. Provider API clients live outside the core and are
//! registered here at startup.
//!
//! ```rust
//! use area_core::handlers::{HandlerError, HandlerKey, HandlerRegistry, ReactionHandler};
//! use area_core::models::{ActionInstance, Provider};
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! struct PostMessage;
//!
//! #[async_trait]
//! impl ReactionHandler for PostMessage {
//!     async fn execute(&self, instance: &ActionInstance, payload: &Value)
//!         -> Result<Value, HandlerError> {
//!         Ok(json!({"channel": instance.params["channel"], "text": payload["text"]}))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let registry = HandlerRegistry::new();
//! registry.register(HandlerKey::new(Provider::Slack, "send_message"), Arc::new(PostMessage));
//!
//! let instance = ActionInstance::new(Uuid::new_v4(), Uuid::new_v4(), "notify", 1)
//!     .with_params(json!({"channel": "#eng"}));
//! let handler = registry
//!     .get(&HandlerKey::new(Provider::Slack, "send_message"))
//!     .unwrap();
//! let result = handler.execute(&instance, &json!({"text": "hi"})).await;
//! assert_eq!(result.unwrap(), json!({"channel": "#eng", "text": "hi"}));
//! # });
//! ```

use crate::models::{ActionInstance, Provider};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Lookup key for a reaction handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerKey {
    pub provider: Provider,
    pub action_type: String,
}

impl HandlerKey {
    pub fn new(provider: Provider, action_type: impl Into<String>) -> Self {
        Self {
            provider,
            action_type: action_type.into(),
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider, self.action_type)
    }
}

/// What went wrong inside a handler, as far as retry policy cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorKind {
    /// Reaction parameters or mapping are wrong for the target action
    InvalidConfiguration,
    /// Input rejected by the provider
    InvalidInput,
    /// Credentials missing, expired or lacking scope
    Unauthorized,
    /// Target resource does not exist
    NotFound,
    /// No handler registered for the action
    Unsupported,
    RateLimited,
    Network,
    Timeout,
    /// Provider returned a server-side failure
    Upstream,
    Other,
}

impl HandlerErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "invalid_configuration",
            Self::InvalidInput => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Unsupported => "unsupported",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Upstream => "upstream",
            Self::Other => "other",
        }
    }
}

/// Failure reported by a reaction handler
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    pub message: String,
    /// Provider-requested delay before the next attempt
    pub retry_after: Option<Duration>,
}

impl HandlerError {
    pub fn new(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::InvalidConfiguration, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::NotFound, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(HandlerErrorKind::RateLimited, message)
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Other, message)
    }
}

/// Performs one reaction against an external service
#[async_trait]
pub trait ReactionHandler: Send + Sync {
    /// Run the reaction for `instance` with the mapped `payload`
    async fn execute(&self, instance: &ActionInstance, payload: &Value)
        -> Result<Value, HandlerError>;
}

/// Registry of reaction handlers keyed by provider and action type
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<HandlerKey, Arc<dyn ReactionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same key
    pub fn register(&self, key: HandlerKey, handler: Arc<dyn ReactionHandler>) {
        tracing::debug!(handler = %key, "Registering reaction handler");
        self.handlers.write().insert(key, handler);
    }

    pub fn get(&self, key: &HandlerKey) -> Option<Arc<dyn ReactionHandler>> {
        self.handlers.read().get(key).cloned()
    }

    pub fn contains(&self, key: &HandlerKey) -> bool {
        self.handlers.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<HandlerKey> {
        let mut keys: Vec<_> = self.handlers.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
