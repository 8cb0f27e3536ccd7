//! Message bus
//!
//! Envelope exchange between a host and its embedded contexts, with event
//! pub/sub and request/response layered over a one-way transport.
//!
//! The transport delivers every message to every connected bus, the sender
//! included. A bus therefore discards envelopes tagged with its own source and,
//! when it belongs to a named application, envelopes addressed to another one.

use std::{
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::FutureExt;
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle};

use super::envelope::{now_millis, Envelope, LifecycleProps, MessageBody, MessageKind, MessageSource};
use crate::core::{
    error::{FrameError, FrameResult},
    subscription::Subscription,
    traits::{PortId, Transport, TransportPort},
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Callback invoked for every matching inbound envelope.
pub type MessageHandler = Arc<dyn Fn(&Envelope) -> FrameResult<()> + Send + Sync>;

/// Wraps a closure into a [`MessageHandler`].
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(&Envelope) -> FrameResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Subscription key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every envelope of one type.
    Kind(MessageKind),
    /// EVENT envelopes with this event name.
    Event(String),
    /// Every envelope.
    Any,
}

impl Topic {
    pub fn event(name: impl Into<String>) -> Self {
        Topic::Event(name.into())
    }
}

type HandlerTable = DashMap<Topic, Vec<MessageHandler>>;

struct PendingRequest {
    method: String,
    responder: oneshot::Sender<FrameResult<Value>>,
}

/// Removes a pending request when the waiting future completes or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingRequest>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

pub struct MessageBus {
    source: MessageSource,
    name: Option<String>,
    transport: Arc<dyn Transport>,
    port: PortId,
    handlers: Arc<HandlerTable>,
    pending: DashMap<String, PendingRequest>,
    request_counter: AtomicU64,
    request_timeout_ms: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl MessageBus {
    /// Connects a new bus to `transport` and starts draining its port.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(source: MessageSource, name: Option<String>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let TransportPort { id, mut receiver } = transport.connect();
        let bus = Arc::new(Self {
            source,
            name,
            transport,
            port: id,
            handlers: Arc::new(DashMap::new()),
            pending: DashMap::new(),
            request_counter: AtomicU64::new(0),
            request_timeout_ms: AtomicU64::new(DEFAULT_REQUEST_TIMEOUT.as_millis() as u64),
            pump: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&bus);
        let pump = tokio::spawn(async move {
            while let Some(raw) = receiver.recv().await {
                let Some(bus) = weak.upgrade() else {
                    break;
                };
                bus.receive(raw);
            }
        });
        *bus.pump.lock().unwrap_or_else(|p| p.into_inner()) = Some(pump);

        debug!("Message bus {} connected on port {}", bus.describe(), id);
        bus
    }

    /// Bus of the top-level host page.
    pub fn host(transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::new(MessageSource::Host, None, transport)
    }

    /// Bus living inside the embedded application `name`.
    pub fn embedded(name: impl Into<String>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::new(MessageSource::Embedded, Some(name.into()), transport)
    }

    pub fn source(&self) -> MessageSource {
        self.source
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_request_timeout(&self, timeout: Duration) {
        self.request_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Registers `handler` for `topic`. Registering the same handler twice has no
    /// additional effect.
    pub fn on(&self, topic: Topic, handler: MessageHandler) -> Subscription {
        {
            let mut entry = self.handlers.entry(topic.clone()).or_default();
            if !entry.iter().any(|h| same_handler(h, &handler)) {
                entry.push(handler.clone());
            }
        }

        let handlers = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = handlers.upgrade() {
                remove_handler(&handlers, &topic, &handler);
            }
        })
    }

    pub fn off(&self, topic: &Topic, handler: &MessageHandler) {
        remove_handler(&self.handlers, topic, handler);
    }

    /// Fire-and-forget event: delivered to local subscribers of `event` and to
    /// wildcard subscribers, then posted across the boundary.
    pub fn emit(&self, event: &str, payload: Option<Value>, target: Option<&str>) -> FrameResult<()> {
        let envelope = self.stamp(
            MessageBody::Event {
                event: event.to_string(),
                payload,
            },
            None,
            target,
        );
        self.deliver_local(&envelope);
        self.post(&envelope)
    }

    /// Event for same-context observers only; nothing crosses the boundary.
    pub fn emit_local(&self, event: &str, payload: Option<Value>) {
        let envelope = self.stamp(
            MessageBody::Event {
                event: event.to_string(),
                payload,
            },
            None,
            None,
        );
        self.deliver_local(&envelope);
    }

    /// Posts an arbitrary envelope body.
    pub fn send(&self, body: MessageBody, target: Option<&str>) -> FrameResult<()> {
        let envelope = self.stamp(body, None, target);
        self.post(&envelope)
    }

    pub fn send_mount(&self, props: LifecycleProps, target: &str) -> FrameResult<()> {
        self.send(MessageBody::Mount { props: Some(props) }, Some(target))
    }

    pub fn send_unmount(&self, target: &str) -> FrameResult<()> {
        self.send(MessageBody::Unmount { props: None }, Some(target))
    }

    pub fn send_route_change(&self, route: &str, target: &str) -> FrameResult<()> {
        self.send(
            MessageBody::RouteChange {
                route: route.to_string(),
            },
            Some(target),
        )
    }

    pub fn send_route_sync(&self, route: &str) -> FrameResult<()> {
        self.send(
            MessageBody::RouteSync {
                route: route.to_string(),
            },
            None,
        )
    }

    /// Sends a REQUEST and waits for the matching RESPONSE or the request timeout.
    pub async fn request(&self, method: &str, params: Option<Value>, target: Option<&str>) -> FrameResult<Value> {
        if self.is_destroyed() {
            return Err(FrameError::Transport("message bus destroyed".into()));
        }

        let seq = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("req_{}_{}", seq, now_millis());
        let (responder, response) = oneshot::channel();

        if self.pending.contains_key(&id) {
            return Err(FrameError::Internal(format!("request id {id} already pending")));
        }
        self.pending.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                responder,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        let envelope = self.stamp(
            MessageBody::Request {
                method: method.to_string(),
                params,
            },
            Some(id.clone()),
            target,
        );
        self.post(&envelope)?;

        let after = self.request_timeout();
        match tokio::time::timeout(after, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FrameError::Transport(format!(
                "message bus destroyed while {method} was pending"
            ))),
            Err(_) => {
                warn!("Request {} ({}) timed out after {:?}", method, id, after);
                Err(FrameError::RequestTimeout {
                    method: method.to_string(),
                    after,
                })
            }
        }
    }

    /// Answers REQUEST envelopes for `method` with the handler's result.
    ///
    /// Handler failures, panics included, become `success: false` responses.
    pub fn on_request<F, Fut, E>(self: &Arc<Self>, method: impl Into<String>, f: F) -> Subscription
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: fmt::Display,
    {
        let method = method.into();
        let bus = Arc::downgrade(self);
        let f = Arc::new(f);

        self.on(
            Topic::Kind(MessageKind::Request),
            handler(move |envelope| {
                let MessageBody::Request {
                    method: requested,
                    params,
                } = &envelope.body
                else {
                    return Ok(());
                };
                if *requested != method {
                    return Ok(());
                }
                let Some(id) = envelope.id.clone() else {
                    debug!("Ignoring {} request without id", requested);
                    return Ok(());
                };

                let reply_to = envelope.origin.clone();
                let params = params.clone();
                let f = f.clone();
                let bus = bus.clone();
                let method = method.clone();
                tokio::spawn(async move {
                    // synchronous panics in `f` surface through catch_unwind as well
                    let call = async move { f(params).await };
                    let body = match AssertUnwindSafe(call).catch_unwind().await {
                        Ok(Ok(data)) => MessageBody::Response {
                            success: true,
                            data: Some(data),
                            error: None,
                        },
                        Ok(Err(e)) => MessageBody::Response {
                            success: false,
                            data: None,
                            error: Some(e.to_string()),
                        },
                        Err(_) => MessageBody::Response {
                            success: false,
                            data: None,
                            error: Some(format!("handler for {method} panicked")),
                        },
                    };
                    if let Some(bus) = bus.upgrade() {
                        let response = bus.stamp(body, Some(id), reply_to.as_deref());
                        if let Err(e) = bus.post(&response) {
                            warn!("Failed to answer {} request: {}", method, e);
                        }
                    }
                });
                Ok(())
            }),
        )
    }

    /// Inbound dispatch of one raw channel message.
    pub fn receive(&self, raw: Value) {
        if self.is_destroyed() {
            return;
        }
        let Some(envelope) = Envelope::decode(raw) else {
            trace!("Dropping non-envelope message on {}", self.describe());
            return;
        };
        if envelope.source == self.source {
            return;
        }
        if let (Some(target), Some(name)) = (&envelope.target, &self.name) {
            if target != name {
                return;
            }
        }

        if let MessageBody::Response {
            success,
            data,
            error,
        } = &envelope.body
        {
            if let Some(pending) = envelope.id.as_ref().and_then(|id| self.pending.remove(id)) {
                let (id, pending) = pending;
                debug!("Response for {} ({}) success={}", pending.method, id, success);
                let result = if *success {
                    Ok(data.clone().unwrap_or(Value::Null))
                } else {
                    Err(FrameError::RequestFailed(
                        error.clone().unwrap_or_else(|| "Request failed".to_string()),
                    ))
                };
                let _ = pending.responder.send(result);
                return;
            }
        }

        self.trigger(&Topic::Kind(envelope.kind()), &envelope);
        if let MessageBody::Event { event, .. } = &envelope.body {
            self.trigger(&Topic::Event(event.clone()), &envelope);
        }
        self.trigger(&Topic::Any, &envelope);
    }

    /// Releases every subscription, pending request and the transport port.
    /// Calling it again has no effect.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handlers.clear();
        // dropping the responders fails every waiting request
        self.pending.clear();
        self.release_port();
        info!("Message bus {} destroyed", self.describe());
    }

    fn release_port(&self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(|p| p.into_inner()).take() {
            pump.abort();
        }
        self.transport.disconnect(self.port);
    }

    fn stamp(&self, body: MessageBody, id: Option<String>, target: Option<&str>) -> Envelope {
        let mut envelope = Envelope::new(body, self.source);
        envelope.id = id;
        envelope.target = target.map(str::to_string);
        envelope.origin = self.name.clone();
        envelope
    }

    fn post(&self, envelope: &Envelope) -> FrameResult<()> {
        if self.is_destroyed() {
            return Err(FrameError::Transport("message bus destroyed".into()));
        }
        trace!("{} posting {}", self.describe(), envelope.kind());
        self.transport.post(envelope.encode()?)
    }

    fn deliver_local(&self, envelope: &Envelope) {
        if let MessageBody::Event { event, .. } = &envelope.body {
            self.trigger(&Topic::Event(event.clone()), envelope);
        }
        self.trigger(&Topic::Any, envelope);
    }

    fn trigger(&self, topic: &Topic, envelope: &Envelope) {
        let handlers = match self.handlers.get(topic) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        for handler in handlers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Error in message handler for {:?}: {}", topic, e),
                Err(_) => error!("Message handler for {:?} panicked", topic),
            }
        }
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{:?}({})", self.source, name),
            None => format!("{:?}", self.source),
        }
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::SeqCst) {
            self.release_port();
        }
    }
}

fn same_handler(a: &MessageHandler, b: &MessageHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn remove_handler(handlers: &HandlerTable, topic: &Topic, handler: &MessageHandler) {
    let now_empty = match handlers.get_mut(topic) {
        Some(mut entry) => {
            entry.retain(|h| !same_handler(h, handler));
            entry.is_empty()
        }
        None => false,
    };
    if now_empty {
        handlers.remove_if(topic, |_, list| list.is_empty());
    }
}
