use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Script registered as the fetch worker.
pub const DEFAULT_SCRIPT_URL: &str = "/service-worker.js";
/// Scope the fetch worker controls.
pub const DEFAULT_SCOPE: &str = "/";

/// Errors raised while registering the fetch worker.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The environment has no worker support at all.
    #[error("service workers are not supported in this environment")]
    Unsupported,

    /// Workers may only be registered from a secure context.
    #[error("cannot register a service worker from insecure origin {origin}")]
    InsecureContext { origin: String },

    /// The worker script could not be fetched or evaluated.
    #[error("failed to load worker script {script_url}: {reason}")]
    ScriptFetch { script_url: String, reason: String },
}

/// Handle for a successful worker registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub script_url: String,
    pub scope: String,
}

/// Something a structured message can be posted to.
pub trait MessageTarget: Send + Sync {
    /// Returns `false` if the target is gone.
    fn post_message(&self, message: Value) -> bool;
}

/// The page's view of the worker machinery (`navigator.serviceWorker`).
#[async_trait]
pub trait WorkerContainer: Send + Sync {
    /// Register `script_url` for `scope`.
    async fn register(
        &self,
        script_url: &str,
        scope: &str,
    ) -> Result<Registration, RegistrationError>;

    /// The worker currently controlling the page, if any.
    fn controller(&self) -> Option<Arc<dyn MessageTarget>>;
}

/// The embedding parent window.
pub trait ParentWindow: Send + Sync {
    /// Post `message` with the given target origin (`"*"` for any).
    fn post_message(&self, message: Value, target_origin: &str);
}
