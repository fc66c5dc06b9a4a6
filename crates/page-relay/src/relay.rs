use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use edge_interceptor::{FETCH_REQUEST, FETCH_RESPONSE};

use crate::registration::{
    ParentWindow, Registration, WorkerContainer, DEFAULT_SCOPE, DEFAULT_SCRIPT_URL,
};

/// Configuration for the page relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Worker script to register.
    pub script_url: String,
    /// Scope the worker controls.
    pub scope: String,
    /// Target origin used when posting to the parent window. The host
    /// validates messages by shape, so this is `"*"` by default.
    pub target_origin: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            script_url: DEFAULT_SCRIPT_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            target_origin: "*".to_string(),
        }
    }
}

/// What the relay did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The message was posted to the other side unchanged.
    Forwarded,
    /// The message is not addressed to this hop.
    Ignored,
    /// A `FETCH_RESPONSE` arrived but no worker controls the page; the
    /// message is dropped and the worker's timeout settles the request.
    NoController,
}

/// Page-side bridge between the fetch worker and the parent window.
pub struct Relay {
    config: RelayConfig,
    container: Arc<dyn WorkerContainer>,
    parent: Arc<dyn ParentWindow>,
    registration: OnceCell<Registration>,
}

impl Relay {
    pub fn new(
        config: RelayConfig,
        container: Arc<dyn WorkerContainer>,
        parent: Arc<dyn ParentWindow>,
    ) -> Self {
        Self {
            config,
            container,
            parent,
            registration: OnceCell::new(),
        }
    }

    /// Register the fetch worker once per page session.
    ///
    /// Concurrent callers wait for the same attempt and receive the same
    /// handle. Failures are logged and reported as `None`; they are not
    /// remembered, so a later call tries again.
    pub async fn initialize(&self) -> Option<Registration> {
        let result = self
            .registration
            .get_or_try_init(|| async {
                let registration = self
                    .container
                    .register(&self.config.script_url, &self.config.scope)
                    .await?;
                info!(
                    script_url = %registration.script_url,
                    scope = %registration.scope,
                    "fetch worker registered"
                );
                Ok::<_, crate::registration::RegistrationError>(registration)
            })
            .await;

        match result {
            Ok(registration) => Some(registration.clone()),
            Err(err) => {
                error!(
                    script_url = %self.config.script_url,
                    %err,
                    "fetch worker registration failed"
                );
                None
            }
        }
    }

    /// `true` when the worker is registered and currently controls the page.
    pub fn is_active(&self) -> bool {
        self.registration.initialized() && self.container.controller().is_some()
    }

    /// Handle a message from the worker: `FETCH_REQUEST` goes up to the
    /// parent window verbatim.
    pub fn on_worker_message(&self, message: Value) -> RelayOutcome {
        if message_type(&message) != Some(FETCH_REQUEST) {
            return RelayOutcome::Ignored;
        }

        debug!(
            request_id = request_id(&message).unwrap_or("<none>"),
            "relaying request to parent window"
        );
        self.parent.post_message(message, &self.config.target_origin);
        RelayOutcome::Forwarded
    }

    /// Handle a message from the parent window: `FETCH_RESPONSE` goes down
    /// to the controlling worker verbatim.
    pub fn on_parent_message(&self, message: Value) -> RelayOutcome {
        if message_type(&message) != Some(FETCH_RESPONSE) {
            return RelayOutcome::Ignored;
        }

        let request_id = request_id(&message).unwrap_or("<none>").to_string();

        let Some(controller) = self.container.controller() else {
            warn!(%request_id, "no controlling worker; dropping response");
            return RelayOutcome::NoController;
        };

        if !controller.post_message(message) {
            warn!(%request_id, "controlling worker went away; dropping response");
            return RelayOutcome::NoController;
        }

        debug!(%request_id, "relayed response to worker");
        RelayOutcome::Forwarded
    }
}

fn message_type(message: &Value) -> Option<&str> {
    message.get("type").and_then(Value::as_str)
}

fn request_id(message: &Value) -> Option<&str> {
    message.get("requestId").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::{MessageTarget, RegistrationError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTarget {
        received: Mutex<Vec<Value>>,
        closed: AtomicBool,
    }

    impl MessageTarget for RecordingTarget {
        fn post_message(&self, message: Value) -> bool {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            self.received.lock().unwrap().push(message);
            true
        }
    }

    #[derive(Default)]
    struct RecordingParent {
        received: Mutex<Vec<(Value, String)>>,
    }

    impl ParentWindow for RecordingParent {
        fn post_message(&self, message: Value, target_origin: &str) {
            self.received
                .lock()
                .unwrap()
                .push((message, target_origin.to_string()));
        }
    }

    /// Container that fails a configurable number of attempts, then succeeds
    /// and starts controlling the page.
    struct FakeContainer {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        worker: Arc<RecordingTarget>,
        controlling: AtomicBool,
    }

    impl FakeContainer {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
                worker: Arc::new(RecordingTarget::default()),
                controlling: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl WorkerContainer for FakeContainer {
        async fn register(
            &self,
            script_url: &str,
            scope: &str,
        ) -> Result<Registration, RegistrationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;

            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(RegistrationError::ScriptFetch {
                    script_url: script_url.to_string(),
                    reason: "404".to_string(),
                });
            }

            self.controlling.store(true, Ordering::SeqCst);
            Ok(Registration {
                script_url: script_url.to_string(),
                scope: scope.to_string(),
            })
        }

        fn controller(&self) -> Option<Arc<dyn MessageTarget>> {
            if self.controlling.load(Ordering::SeqCst) {
                Some(Arc::clone(&self.worker) as Arc<dyn MessageTarget>)
            } else {
                None
            }
        }
    }

    fn relay(failures: usize) -> (Relay, Arc<FakeContainer>, Arc<RecordingParent>) {
        let container = Arc::new(FakeContainer::new(failures));
        let parent = Arc::new(RecordingParent::default());
        let relay = Relay::new(
            RelayConfig::default(),
            Arc::clone(&container) as Arc<dyn WorkerContainer>,
            Arc::clone(&parent) as Arc<dyn ParentWindow>,
        );
        (relay, container, parent)
    }

    fn fetch_request() -> Value {
        json!({
            "type": "FETCH_REQUEST",
            "requestId": "req_1_aaaaaaaaa",
            "request": {"url": "https://api.example.com/", "method": "GET", "headers": {}, "body": null}
        })
    }

    fn fetch_response() -> Value {
        json!({
            "type": "FETCH_RESPONSE",
            "requestId": "req_1_aaaaaaaaa",
            "success": false,
            "error": "offline"
        })
    }

    // -----------------------------------------------------------------------
    // registration lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn initialize_registers_once() {
        let (relay, container, _) = relay(0);
        assert!(!relay.is_active());

        let first = relay.initialize().await.unwrap();
        let second = relay.initialize().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.script_url, DEFAULT_SCRIPT_URL);
        assert_eq!(first.scope, DEFAULT_SCOPE);
        assert_eq!(container.attempts.load(Ordering::SeqCst), 1);
        assert!(relay.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_initialize_shares_one_attempt() {
        let (relay, container, _) = relay(0);
        let (a, b) = tokio::join!(relay.initialize(), relay.initialize());
        assert_eq!(a, b);
        assert!(a.is_some());
        assert_eq!(container.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_registration_returns_none_and_can_retry() {
        let (relay, container, _) = relay(1);

        assert!(relay.initialize().await.is_none());
        assert!(!relay.is_active());

        assert!(relay.initialize().await.is_some());
        assert!(relay.is_active());
        assert_eq!(container.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn registered_without_controller_is_inactive() {
        let (relay, container, _) = relay(0);
        relay.initialize().await.unwrap();
        container.controlling.store(false, Ordering::SeqCst);
        assert!(!relay.is_active());
    }

    // -----------------------------------------------------------------------
    // message relaying
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn worker_request_goes_to_parent_verbatim() {
        let (relay, _, parent) = relay(0);

        assert_eq!(relay.on_worker_message(fetch_request()), RelayOutcome::Forwarded);

        let received = parent.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, fetch_request());
        assert_eq!(received[0].1, "*");
    }

    #[tokio::test]
    async fn worker_messages_of_other_types_are_ignored() {
        let (relay, _, parent) = relay(0);
        assert_eq!(relay.on_worker_message(fetch_response()), RelayOutcome::Ignored);
        assert_eq!(relay.on_worker_message(json!({"type": "LOG"})), RelayOutcome::Ignored);
        assert_eq!(relay.on_worker_message(json!("text")), RelayOutcome::Ignored);
        assert!(parent.received.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_response_goes_to_controller_verbatim() {
        let (relay, container, _) = relay(0);
        relay.initialize().await.unwrap();

        assert_eq!(relay.on_parent_message(fetch_response()), RelayOutcome::Forwarded);
        assert_eq!(
            container.worker.received.lock().unwrap().as_slice(),
            &[fetch_response()]
        );
    }

    #[tokio::test]
    async fn parent_response_without_controller_is_dropped() {
        let (relay, container, _) = relay(0);
        assert_eq!(relay.on_parent_message(fetch_response()), RelayOutcome::NoController);
        assert!(container.worker.received.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_response_to_closed_worker_is_dropped() {
        let (relay, container, _) = relay(0);
        relay.initialize().await.unwrap();
        container.worker.closed.store(true, Ordering::SeqCst);
        assert_eq!(relay.on_parent_message(fetch_response()), RelayOutcome::NoController);
    }

    #[tokio::test]
    async fn parent_messages_of_other_types_are_ignored() {
        let (relay, _, _) = relay(0);
        assert_eq!(relay.on_parent_message(fetch_request()), RelayOutcome::Ignored);
        assert_eq!(relay.on_parent_message(json!({"action": "navigate"})), RelayOutcome::Ignored);
    }
}
