use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_interceptor::{ChannelClient, ClientList, EdgeInterceptor};
use origin_classifier::{ClassifierConfig, OriginClassifier};
use page_relay::{
    MessageTarget, ParentWindow, Registration, RegistrationError, Relay, RelayConfig,
    WorkerContainer,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::host::Host;

const PAGE_CLIENT_ID: &str = "page-1";

/// Everything needed to wire up the three contexts.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub own_origin: Url,
    pub parent: Option<Url>,
    pub classifier: ClassifierConfig,
    pub timeout: Duration,
    pub relay: RelayConfig,
}

impl ContextSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            own_origin: config.worker.own_origin.clone(),
            parent: config.worker.parent_url.clone(),
            classifier: config.classifier.clone(),
            timeout: Duration::from_secs(config.worker.timeout_secs),
            relay: RelayConfig {
                script_url: config.worker.script_url.clone(),
                scope: config.worker.scope.clone(),
                ..RelayConfig::default()
            },
        }
    }
}

/// Posts into a context's inbox.
#[derive(Debug, Clone)]
struct ChannelPort {
    tx: mpsc::UnboundedSender<Value>,
}

impl MessageTarget for ChannelPort {
    fn post_message(&self, message: Value) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl ParentWindow for ChannelPort {
    fn post_message(&self, message: Value, _target_origin: &str) {
        if self.tx.send(message).is_err() {
            debug!("parent window closed; message dropped");
        }
    }
}

/// Worker container for a single in-process page.
///
/// Registration checks that the page origin is a secure context and that the
/// script resolves to the same origin, then claims the page so the worker
/// controls it immediately.
struct InProcessContainer {
    own_origin: Url,
    clients: Arc<ClientList>,
    page: Arc<ChannelClient>,
    worker: Arc<ChannelPort>,
    controlling: AtomicBool,
}

impl InProcessContainer {
    fn is_secure_context(&self) -> bool {
        if self.own_origin.scheme() == "https" {
            return true;
        }
        match self.own_origin.host_str() {
            Some(host) => {
                matches!(host, "localhost" | "127.0.0.1" | "[::1]") || host.ends_with(".localhost")
            }
            None => false,
        }
    }
}

#[async_trait]
impl WorkerContainer for InProcessContainer {
    async fn register(
        &self,
        script_url: &str,
        scope: &str,
    ) -> Result<Registration, RegistrationError> {
        if !self.is_secure_context() {
            return Err(RegistrationError::InsecureContext {
                origin: self.own_origin.origin().ascii_serialization(),
            });
        }

        let script = self
            .own_origin
            .join(script_url)
            .map_err(|e| RegistrationError::ScriptFetch {
                script_url: script_url.to_string(),
                reason: e.to_string(),
            })?;
        if script.origin() != self.own_origin.origin() {
            return Err(RegistrationError::ScriptFetch {
                script_url: script_url.to_string(),
                reason: "script must share the page origin".to_string(),
            });
        }

        self.clients.claim(Arc::clone(&self.page) as _);
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

/// The worker, page and host message loops running as tasks.
pub struct Contexts {
    interceptor: Arc<EdgeInterceptor>,
    relay: Arc<Relay>,
    tasks: Vec<JoinHandle<()>>,
}

impl Contexts {
    /// Wire the contexts together and start their loops. Every loop exits
    /// when `shutdown` fires.
    pub fn spawn(
        settings: ContextSettings,
        host: Arc<dyn Host>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (page_tx, page_rx) = mpsc::unbounded_channel();
        let (parent_tx, parent_rx) = mpsc::unbounded_channel();
        let (host_tx, host_rx) = mpsc::unbounded_channel();

        let clients = Arc::new(ClientList::new());
        let container = InProcessContainer {
            own_origin: settings.own_origin.clone(),
            clients: Arc::clone(&clients),
            page: Arc::new(ChannelClient::new(PAGE_CLIENT_ID, page_tx)),
            worker: Arc::new(ChannelPort { tx: worker_tx }),
            controlling: AtomicBool::new(false),
        };

        let relay = Arc::new(Relay::new(
            settings.relay,
            Arc::new(container),
            Arc::new(ChannelPort { tx: host_tx }),
        ));

        let interceptor = Arc::new(
            EdgeInterceptor::new(
                OriginClassifier::new(settings.own_origin, settings.classifier),
                Arc::new(settings.parent),
                clients,
            )
            .with_timeout(settings.timeout),
        );

        let tasks = vec![
            tokio::spawn(run_worker(
                Arc::clone(&interceptor),
                worker_rx,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_page(
                Arc::clone(&relay),
                page_rx,
                parent_rx,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_host(host, host_rx, parent_tx, shutdown.subscribe())),
        ];

        Self {
            interceptor,
            relay,
            tasks,
        }
    }

    pub fn interceptor(&self) -> &EdgeInterceptor {
        &self.interceptor
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Wait for every loop to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(%err, "context task failed");
            }
        }
    }
}

async fn run_worker(
    interceptor: Arc<EdgeInterceptor>,
    mut inbox: mpsc::UnboundedReceiver<Value>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(message) => {
                    interceptor.handle_message(&message);
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    info!(pending = interceptor.pending_count(), "worker context stopped");
}

async fn run_page(
    relay: Arc<Relay>,
    mut from_worker: mpsc::UnboundedReceiver<Value>,
    mut from_parent: mpsc::UnboundedReceiver<Value>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(message) = from_worker.recv() => {
                relay.on_worker_message(message);
            }
            Some(message) = from_parent.recv() => {
                relay.on_parent_message(message);
            }
            _ = shutdown.recv() => break,
            else => break,
        }
    }
    info!("page context stopped");
}

async fn run_host(
    host: Arc<dyn Host>,
    mut inbox: mpsc::UnboundedReceiver<Value>,
    reply_tx: mpsc::UnboundedSender<Value>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(message) => {
                    let host = Arc::clone(&host);
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        let Some(reply) = host.answer(message).await else {
                            return;
                        };
                        match serde_json::to_value(&reply) {
                            Ok(value) => {
                                if reply_tx.send(value).is_err() {
                                    debug!(request_id = reply.request_id(), "page closed; reply dropped");
                                }
                            }
                            Err(err) => warn!(%err, "failed to encode host reply"),
                        }
                    });
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    info!("host context stopped");
}
