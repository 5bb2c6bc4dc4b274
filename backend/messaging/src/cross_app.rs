//! In-process request/response and pub/sub between hosted applications,
//! layered on the `EventBus`.
//!
//! A request emits `{target}:{action}` with a `RequestMessage`; the responder
//! answers on `response:{requestId}`. Each pending request settles exactly
//! once: by its response, by its timeout, or by `destroy`. Anything arriving
//! for an id that is no longer pending is discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use canopy_core::sync::lock;
use canopy_core::{
    queued_event, request_event, response_channel, EventBus, HostError, HostResult,
    RequestMessage, ResponseMessage, Subscription,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = HashMap<String, oneshot::Sender<HostResult<Value>>>;

struct CommInner {
    bus: EventBus,
    pending: Mutex<PendingMap>,
    queues: Mutex<HashMap<String, Vec<Value>>>,
    default_timeout: Duration,
}

impl CommInner {
    /// Settle a pending request from a `response:{id}` payload.
    fn settle(&self, request_id: &str, data: &Value) {
        let Some(tx) = lock(&self.pending).remove(request_id) else {
            debug!(request_id = %request_id, "Discarding response for settled request");
            return;
        };
        let result = match serde_json::from_value::<ResponseMessage>(data.clone()) {
            Ok(response) => response.into_result().map_err(HostError::Handler),
            Err(e) => Err(HostError::Handler(format!("malformed response: {}", e))),
        };
        let _ = tx.send(result);
    }
}

/// Removes the pending record and response listener however the request ends.
struct PendingGuard {
    inner: Weak<CommInner>,
    request_id: String,
    listener: Option<Subscription>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.pending).remove(&self.request_id);
        }
        if let Some(listener) = self.listener.take() {
            listener.unsubscribe();
        }
    }
}

/// Cross-application messaging over the host's event bus.
#[derive(Clone)]
pub struct CrossAppCommunication {
    inner: Arc<CommInner>,
}

impl CrossAppCommunication {
    pub fn new(bus: EventBus) -> Self {
        Self::with_default_timeout(bus, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_default_timeout(bus: EventBus, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CommInner {
                bus,
                pending: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                default_timeout,
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Send `action` to `target` and wait for its response.
    ///
    /// Fails with `Timeout` if nobody answers within `timeout`, and with
    /// `Handler` if the responder replied with an error.
    pub async fn request(
        &self,
        target: &str,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> HostResult<Value> {
        let request_id = Uuid::new_v4().to_string();
        let channel = response_channel(&request_id);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(request_id.clone(), tx);

        let weak = Arc::downgrade(&self.inner);
        let listener_id = request_id.clone();
        let listener = self.inner.bus.once(channel.clone(), move |data| {
            if let Some(inner) = weak.upgrade() {
                inner.settle(&listener_id, data);
            }
            Ok(())
        });
        let _guard = PendingGuard {
            inner: Arc::downgrade(&self.inner),
            request_id: request_id.clone(),
            listener: Some(listener),
        };

        let message = RequestMessage {
            request_id: request_id.clone(),
            payload,
            response_channel: channel,
        };
        let message = serde_json::to_value(&message)
            .map_err(|e| HostError::Validation(e.to_string()))?;
        let delivered = self.inner.bus.emit(&request_event(target, action), &message);
        debug!(
            target_app = %target,
            action = %action,
            request_id = %request_id,
            delivered,
            "Request emitted"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::Destroyed("cross-app communication".to_string())),
            Err(_) => {
                warn!(
                    target_app = %target,
                    action = %action,
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(HostError::Timeout {
                    target: target.to_string(),
                    action: action.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// `request` with the configured default timeout.
    pub async fn request_default(
        &self,
        target: &str,
        action: &str,
        payload: Value,
    ) -> HostResult<Value> {
        self.request(target, action, payload, self.inner.default_timeout)
            .await
    }

    /// Answer a request. Returns false if nobody was waiting any more.
    pub fn respond(&self, request_id: &str, result: Result<Value, String>) -> bool {
        let response = match result {
            Ok(data) => ResponseMessage::ok(data),
            Err(error) => ResponseMessage::err(error),
        };
        let payload = serde_json::to_value(response).unwrap_or(Value::Null);
        self.inner.bus.emit(&response_channel(request_id), &payload) > 0
    }

    /// Register a responder for `action` on `target` that replies with the
    /// result of `handler`.
    pub fn handle<F>(&self, target: &str, action: &str, handler: F) -> Subscription
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let bus = self.inner.bus.downgrade();
        self.inner.bus.on(request_event(target, action), move |data| {
            let request: RequestMessage = serde_json::from_value(data.clone())?;
            let response = match handler(request.payload) {
                Ok(data) => ResponseMessage::ok(data),
                Err(error) => ResponseMessage::err(error),
            };
            if let Some(bus) = bus.upgrade() {
                bus.emit(&request.response_channel, &serde_json::to_value(response)?);
            }
            Ok(())
        })
    }

    /// Fire-and-forget broadcast on the bus.
    pub fn publish(&self, event: &str, data: &Value) -> usize {
        self.inner.bus.emit(event, data)
    }

    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.on(event, handler)
    }

    /// Buffer a message for a target that is not ready yet.
    pub fn queue_message(&self, target: &str, message: Value) {
        let mut queues = lock(&self.inner.queues);
        let queue = queues.entry(target.to_string()).or_default();
        queue.push(message);
        debug!(target_app = %target, queued = queue.len(), "Message queued");
    }

    pub fn queued_count(&self, target: &str) -> usize {
        lock(&self.inner.queues)
            .get(target)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Emit every buffered message for `target` on `{target}:queued`, once,
    /// and clear the buffer. Returns the number of messages flushed.
    pub fn process_queued_messages(&self, target: &str) -> usize {
        let messages = lock(&self.inner.queues).remove(target).unwrap_or_default();
        let event = queued_event(target);
        for message in &messages {
            self.inner.bus.emit(&event, message);
        }
        if !messages.is_empty() {
            info!(target_app = %target, flushed = messages.len(), "Queued messages delivered");
        }
        messages.len()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Reject every pending request and drop all queued messages.
    pub fn destroy(&self) {
        let pending: Vec<_> = lock(&self.inner.pending).drain().collect();
        let rejected = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(HostError::Destroyed(
                "cross-app communication".to_string(),
            )));
        }
        lock(&self.inner.queues).clear();
        debug!(rejected, "Cross-app communication destroyed");
    }
}
