//! Cross-origin peer of `CrossAppCommunication`.
//!
//! The bridge owns one `MessageTransport` and one listener task. Inbound
//! messages go through, in order: the origin allow-list, envelope validation,
//! target addressing, then response correlation or handler dispatch. Nothing
//! from a disallowed origin or a malformed envelope reaches a handler.
//! `destroy` (or dropping the last handle) stops the listener and rejects
//! every pending request.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use canopy_core::sync::{lock, panic_message};
use canopy_core::{
    HostError, HostResult, InboundMessage, MessageEnvelope, MessageTransport,
};
use canopy_logging::redact_sensitive_data;

use crate::cross_app::DEFAULT_REQUEST_TIMEOUT;
use crate::origin::OriginPolicy;

/// Characters of a dropped message kept in the warning.
const LOG_PREVIEW_CHARS: usize = 200;

/// Handler for one envelope `type`. For correlated requests the first
/// handler's result becomes the response.
pub type BridgeHandler = Arc<dyn Fn(&MessageEnvelope) -> Result<Value, String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Identifier this peer answers to in envelope `target`.
    pub self_id: String,
    /// Origin outgoing messages are addressed to.
    pub target_origin: String,
    pub allowed_origins: OriginPolicy,
    pub default_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(self_id: impl Into<String>, target_origin: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            target_origin: target_origin.into(),
            allowed_origins: OriginPolicy::default(),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn allow_origin(mut self, origin: &str) -> Self {
        self.allowed_origins.allow(origin);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Counters for inbound traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub received: u64,
    pub dispatched: u64,
    pub rejected_origin: u64,
    pub malformed: u64,
    pub late_responses: u64,
}

struct BridgeInner {
    config: BridgeConfig,
    transport: Arc<dyn MessageTransport>,
    handlers: Mutex<HashMap<String, Vec<(u64, BridgeHandler)>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<HostResult<Value>>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
    next_id: AtomicU64,
    stats: Mutex<BridgeStats>,
}

impl BridgeInner {
    fn receive(&self, message: InboundMessage) -> HostResult<()> {
        lock(&self.stats).received += 1;

        if !self.config.allowed_origins.is_allowed(&message.origin) {
            lock(&self.stats).rejected_origin += 1;
            warn!(
                origin = %message.origin,
                preview = %preview(&message.data),
                "Dropped message from disallowed origin"
            );
            return Err(HostError::OriginRejected(message.origin));
        }

        let envelope = match MessageEnvelope::parse(&message.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                lock(&self.stats).malformed += 1;
                warn!(origin = %message.origin, error = %e, "Dropped malformed envelope");
                return Err(e);
            }
        };

        if !envelope.is_addressed_to(&self.config.self_id) {
            debug!(
                target_peer = %envelope.target,
                kind = %envelope.kind,
                "Ignoring envelope addressed to another peer"
            );
            return Ok(());
        }

        if envelope.is_response() {
            self.settle(envelope);
            return Ok(());
        }

        self.dispatch(envelope, &message.origin);
        Ok(())
    }

    fn settle(&self, envelope: MessageEnvelope) {
        let Some(request_id) = envelope.request_id else {
            lock(&self.stats).malformed += 1;
            warn!(source = %envelope.source, "Dropped response without requestId");
            return;
        };
        let Some(tx) = lock(&self.pending).remove(&request_id) else {
            lock(&self.stats).late_responses += 1;
            debug!(request_id = %request_id, "Discarding response for settled request");
            return;
        };
        let result = match envelope.error {
            Some(error) => Err(HostError::Handler(error)),
            None => Ok(envelope.data),
        };
        let _ = tx.send(result);
    }

    fn dispatch(&self, envelope: MessageEnvelope, reply_origin: &str) {
        let handlers: Vec<BridgeHandler> = lock(&self.handlers)
            .get(&envelope.kind)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(kind = %envelope.kind, source = %envelope.source, "No handler for envelope");
            if envelope.request_id.is_some() {
                let error = format!("no handler registered for '{}'", envelope.kind);
                self.reply(&envelope, Err(error), reply_origin);
            }
            return;
        }

        lock(&self.stats).dispatched += 1;
        let mut first: Option<Result<Value, String>> = None;
        for handler in handlers {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| handler(&envelope))) {
                Ok(result) => result,
                Err(payload) => Err(panic_message(payload.as_ref())),
            };
            if let Err(e) = &result {
                let err = HostError::Handler(e.clone());
                warn!(kind = %envelope.kind, error = %err, "Bridge handler failed");
            }
            first.get_or_insert(result);
        }

        if envelope.request_id.is_some() {
            if let Some(result) = first {
                self.reply(&envelope, result, reply_origin);
            }
        }
    }

    fn reply(&self, request: &MessageEnvelope, result: Result<Value, String>, origin: &str) {
        let response = MessageEnvelope::response_to(request, self.config.self_id.clone(), result);
        let posted = response
            .to_json()
            .and_then(|json| self.transport.post(json, origin));
        if let Err(e) = posted {
            warn!(request_id = ?request.request_id, error = %e, "Failed to post response");
        }
    }

    fn reject_pending(&self) -> usize {
        let pending: Vec<_> = lock(&self.pending).drain().collect();
        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(HostError::Destroyed("post-message bridge".to_string())));
        }
        count
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
        }
    }
}

/// Removes the pending record however the request ends.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<HostResult<Value>>>>,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.request_id);
    }
}

/// Cross-origin messaging endpoint. Cloning yields another handle.
#[derive(Clone)]
pub struct PostMessageBridge {
    inner: Arc<BridgeInner>,
}

impl PostMessageBridge {
    pub fn new(config: BridgeConfig, transport: Arc<dyn MessageTransport>) -> Self {
        if config.allowed_origins.is_empty() && !config.allowed_origins.allow_any {
            warn!(peer = %config.self_id, "Bridge has an empty origin allow-list; all inbound messages will be dropped");
        }
        Self {
            inner: Arc::new(BridgeInner {
                config,
                transport,
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                destroyed: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                stats: Mutex::new(BridgeStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Take the transport's inbound stream and spawn the listener task.
    pub fn start(&self) -> HostResult<()> {
        self.ensure_active()?;
        let mut listener = lock(&self.inner.listener);
        if listener.is_some() {
            return Err(HostError::Transport("bridge already started".to_string()));
        }
        let mut rx = self
            .inner
            .transport
            .take_inbound()
            .ok_or_else(|| HostError::Transport("inbound stream already taken".to_string()))?;

        let weak: Weak<BridgeInner> = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                // Drops are already logged inside `receive`.
                let _ = inner.receive(message);
            }
            debug!("Bridge listener stopped");
        }));
        info!(
            peer = %self.inner.config.self_id,
            origin = %self.inner.transport.origin(),
            allowed_origins = self.inner.config.allowed_origins.len(),
            "Post-message bridge started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.inner.destroyed.load(Ordering::SeqCst)
            && lock(&self.inner.listener)
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Process one inbound message synchronously.
    ///
    /// The listener task calls this for every message; hosts with their own
    /// event loop may call it directly.
    pub fn receive(&self, message: InboundMessage) -> HostResult<()> {
        self.ensure_active()?;
        self.inner.receive(message)
    }

    /// Register a handler for envelopes of `kind`. Returns its id.
    pub fn on<F>(&self, kind: impl Into<String>, handler: F) -> u64
    where
        F: Fn(&MessageEnvelope) -> Result<Value, String> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.handlers)
            .entry(kind.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn off(&self, id: u64) -> bool {
        let mut handlers = lock(&self.inner.handlers);
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            removed |= before != list.len();
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Send a correlated request to `target` and wait for its response.
    pub async fn request(
        &self,
        target: &str,
        kind: &str,
        data: Value,
        timeout: Duration,
    ) -> HostResult<Value> {
        self.ensure_active()?;
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            request_id: request_id.clone(),
        };

        let envelope = MessageEnvelope::new(kind, data, self.inner.config.self_id.clone(), target)
            .with_request_id(request_id.clone());
        self.inner
            .transport
            .post(envelope.to_json()?, &self.inner.config.target_origin)?;
        debug!(target_peer = %target, kind = %kind, request_id = %request_id, "Bridge request posted");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::Destroyed("post-message bridge".to_string())),
            Err(_) => {
                warn!(target_peer = %target, kind = %kind, request_id = %request_id, "Bridge request timed out");
                Err(HostError::Timeout {
                    target: target.to_string(),
                    action: kind.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn request_default(&self, target: &str, kind: &str, data: Value) -> HostResult<Value> {
        self.request(target, kind, data, self.inner.config.default_timeout)
            .await
    }

    /// Fire-and-forget message to `target`.
    pub fn publish(&self, target: &str, kind: &str, data: Value) -> HostResult<()> {
        self.ensure_active()?;
        let envelope = MessageEnvelope::new(kind, data, self.inner.config.self_id.clone(), target);
        self.inner
            .transport
            .post(envelope.to_json()?, &self.inner.config.target_origin)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn stats(&self) -> BridgeStats {
        *lock(&self.inner.stats)
    }

    /// Stop listening, reject pending requests and drop all handlers.
    /// Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.inner.listener).take() {
            handle.abort();
        }
        let rejected = self.inner.reject_pending();
        lock(&self.inner.handlers).clear();
        info!(peer = %self.inner.config.self_id, rejected, "Post-message bridge destroyed");
    }

    fn ensure_active(&self) -> HostResult<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(HostError::Destroyed("post-message bridge".to_string()));
        }
        Ok(())
    }
}

fn preview(data: &str) -> String {
    let head: String = data.chars().take(LOG_PREVIEW_CHARS).collect();
    redact_sensitive_data(&head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const HOST: &str = "https://host.example";
    const SHOP: &str = "https://shop.example";
    const EVIL: &str = "https://evil.example";

    fn connected() -> (PostMessageBridge, PostMessageBridge) {
        let (host_t, shop_t) = ChannelTransport::pair(HOST, SHOP);
        let host = PostMessageBridge::new(
            BridgeConfig::new("host", SHOP).allow_origin(SHOP),
            Arc::new(host_t),
        );
        let shop = PostMessageBridge::new(
            BridgeConfig::new("shop", HOST).allow_origin(HOST),
            Arc::new(shop_t),
        );
        host.start().unwrap();
        shop.start().unwrap();
        (host, shop)
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..50 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (host, shop) = connected();
        shop.on("cart:count", |env| Ok(json!({"count": 2, "asked_by": env.source})));

        let result = host
            .request("shop", "cart:count", json!({}), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(result, json!({"count": 2, "asked_by": "host"}));
        assert_eq!(host.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disallowed_origin_never_reaches_handler() {
        let (evil_t, host_t) = ChannelTransport::pair(EVIL, HOST);
        let host = PostMessageBridge::new(
            BridgeConfig::new("host", SHOP).allow_origin(SHOP),
            Arc::new(host_t),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        host.on("user:logout", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        host.start().unwrap();

        let envelope = MessageEnvelope::new("user:logout", json!({}), "shop", "host");
        evil_t.post(envelope.to_json().unwrap(), HOST).unwrap();

        assert!(eventually(|| host.stats().rejected_origin == 1).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(host.stats().dispatched, 0);
    }

    #[tokio::test]
    async fn test_receive_reports_origin_rejection() {
        let (host_t, _peer) = ChannelTransport::pair(HOST, SHOP);
        let host = PostMessageBridge::new(BridgeConfig::new("host", SHOP), Arc::new(host_t));
        let err = host
            .receive(InboundMessage {
                origin: EVIL.into(),
                data: "{}".into(),
            })
            .unwrap_err();
        assert_eq!(err, HostError::OriginRejected(EVIL.into()));
    }

    #[tokio::test]
    async fn test_malformed_envelope_dropped() {
        let (host_t, _peer) = ChannelTransport::pair(HOST, SHOP);
        let host = PostMessageBridge::new(
            BridgeConfig::new("host", SHOP).allow_origin(SHOP),
            Arc::new(host_t),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        host.on("cart:add", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let result = host.receive(InboundMessage {
            origin: SHOP.into(),
            data: r#"{"type":"cart:add","data":{},"target":"host"}"#.into(),
        });
        assert!(matches!(result, Err(HostError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(host.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_envelope_for_other_peer_ignored() {
        let (host_t, _peer) = ChannelTransport::pair(HOST, SHOP);
        let host = PostMessageBridge::new(
            BridgeConfig::new("host", SHOP).allow_origin(SHOP),
            Arc::new(host_t),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        host.on("ping", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let envelope = MessageEnvelope::new("ping", json!({}), "shop", "checkout");
        host.receive(InboundMessage {
            origin: SHOP.into(),
            data: envelope.to_json().unwrap(),
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_discarded() {
        let (host_t, raw) = ChannelTransport::pair(HOST, SHOP);
        let mut raw_rx = raw.take_inbound().unwrap();
        let host = PostMessageBridge::new(
            BridgeConfig::new("host", SHOP).allow_origin(SHOP),
            Arc::new(host_t),
        );
        host.start().unwrap();

        let err = host
            .request("shop", "slow", json!({}), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Timeout { timeout_ms: 30, .. }));

        let request = MessageEnvelope::parse(&raw_rx.recv().await.unwrap().data).unwrap();
        let late = MessageEnvelope::response_to(&request, "shop", Ok(json!("late")));
        raw.post(late.to_json().unwrap(), HOST).unwrap();

        assert!(eventually(|| host.stats().late_responses == 1).await);
        assert_eq!(host.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_returns_error_response() {
        let (host, _shop) = connected();
        let err = host
            .request("shop", "unknown", json!({}), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HostError::Handler("no handler registered for 'unknown'".into())
        );
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_isolated() {
        let (host, shop) = connected();
        shop.on("checkout", |_| Err("card declined".to_string()));
        shop.on("checkout", |_| panic!("second handler panics"));
        let err = host
            .request("shop", "checkout", json!({}), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err, HostError::Handler("card declined".into()));
        assert!(shop.is_running());
    }

    #[tokio::test]
    async fn test_publish_is_fire_and_forget() {
        let (host, shop) = connected();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        shop.on("theme:changed", move |env| {
            s.lock().unwrap().push(env.data.clone());
            Ok(Value::Null)
        });
        host.publish("shop", "theme:changed", json!({"mode": "dark"}))
            .unwrap();
        assert!(eventually(|| seen.lock().unwrap().len() == 1).await);
        assert_eq!(seen.lock().unwrap()[0]["mode"], "dark");
        // No response is posted back for uncorrelated messages.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(host.stats().received, 0);
    }

    #[tokio::test]
    async fn test_destroy_rejects_pending_and_stops_listener() {
        let (host_t, _raw) = ChannelTransport::pair(HOST, SHOP);
        let host = PostMessageBridge::new(
            BridgeConfig::new("host", SHOP).allow_origin(SHOP),
            Arc::new(host_t),
        );
        host.start().unwrap();
        assert!(host.is_running());

        let h = host.clone();
        let pending = tokio::spawn(async move {
            h.request("shop", "never", json!({}), Duration::from_secs(10)).await
        });
        assert!(eventually(|| host.pending_count() == 1).await);

        host.destroy();
        host.destroy();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, HostError::Destroyed(_)));
        assert!(!host.is_running());
        assert!(matches!(host.start(), Err(HostError::Destroyed(_))));
        assert!(matches!(
            host.publish("shop", "x", Value::Null),
            Err(HostError::Destroyed(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (host, _shop) = connected();
        assert!(matches!(host.start(), Err(HostError::Transport(_))));
    }

    #[tokio::test]
    async fn test_off_removes_handler() {
        let (host_t, _peer) = ChannelTransport::pair(HOST, SHOP);
        let host = PostMessageBridge::new(BridgeConfig::new("host", SHOP), Arc::new(host_t));
        let id = host.on("ping", |_| Ok(Value::Null));
        assert!(host.off(id));
        assert!(!host.off(id));
    }
}
