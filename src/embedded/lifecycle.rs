//! Lifecycle hooks of an embedded application
//!
//! MOUNT, UPDATE and UNMOUNT envelopes are queued and handled one at a time, so
//! hooks observe them in arrival order even when they are asynchronous.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::future::BoxFuture;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    core::{descriptor::Meta, error::FrameResult, subscription::Subscription},
    message::{
        bus::{handler, MessageBus, Topic},
        envelope::{LifecycleProps, MessageBody, MessageKind},
    },
};

/// Props handed to lifecycle hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppProps {
    pub name: String,
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

pub type LifecycleHook = Arc<dyn Fn(AppProps) -> BoxFuture<'static, FrameResult<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Mount,
    Update,
    Unmount,
}

#[derive(Default)]
struct Hooks {
    mount: Option<LifecycleHook>,
    update: Option<LifecycleHook>,
    unmount: Option<LifecycleHook>,
}

struct Shared {
    name: String,
    hooks: Mutex<Hooks>,
    current: Mutex<Option<AppProps>>,
}

impl Shared {
    fn hooks(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn current(&self) -> MutexGuard<'_, Option<AppProps>> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn handle(&self, phase: Phase, props: Option<LifecycleProps>) {
        let (hook, props) = match phase {
            Phase::Mount | Phase::Update => {
                // lifecycle envelopes without props carry nothing to apply
                let Some(props) = props else {
                    return;
                };
                let props = AppProps {
                    name: self.name.clone(),
                    route: props.route,
                    meta: props.meta,
                };
                *self.current() = Some(props.clone());
                let hooks = self.hooks();
                let hook = if phase == Phase::Mount {
                    hooks.mount.clone()
                } else {
                    hooks.update.clone()
                };
                (hook, props)
            }
            Phase::Unmount => {
                let Some(props) = self.current().take() else {
                    debug!("Ignoring unmount of {}, not mounted", self.name);
                    return;
                };
                (self.hooks().unmount.clone(), props)
            }
        };

        debug!("App {} {:?} at {}", self.name, phase, props.route);
        if let Some(hook) = hook {
            if let Err(e) = hook(props).await {
                error!("{:?} hook of {} failed: {}", phase, self.name, e);
            }
        }
    }
}

pub struct EmbeddedLifecycle {
    shared: Arc<Shared>,
    subscriptions: Vec<Subscription>,
    worker: JoinHandle<()>,
}

impl EmbeddedLifecycle {
    pub fn new(bus: &MessageBus) -> Self {
        let shared = Arc::new(Shared {
            name: bus.name().unwrap_or_default().to_string(),
            hooks: Mutex::new(Hooks::default()),
            current: Mutex::new(None),
        });

        let (tx, mut rx) = unbounded_channel::<(Phase, Option<LifecycleProps>)>();
        let subscriptions = vec![
            bus.on(Topic::Kind(MessageKind::Mount), enqueue(Phase::Mount, tx.clone())),
            bus.on(Topic::Kind(MessageKind::Update), enqueue(Phase::Update, tx.clone())),
            bus.on(Topic::Kind(MessageKind::Unmount), enqueue(Phase::Unmount, tx)),
        ];

        let worker = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some((phase, props)) = rx.recv().await {
                    shared.handle(phase, props).await;
                }
            })
        };

        Self {
            shared,
            subscriptions,
            worker,
        }
    }

    pub fn on_mount<F, Fut>(&self, hook: F)
    where
        F: Fn(AppProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameResult<()>> + Send + 'static,
    {
        self.shared.hooks().mount = Some(boxed(hook));
    }

    pub fn on_update<F, Fut>(&self, hook: F)
    where
        F: Fn(AppProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameResult<()>> + Send + 'static,
    {
        self.shared.hooks().update = Some(boxed(hook));
    }

    pub fn on_unmount<F, Fut>(&self, hook: F)
    where
        F: Fn(AppProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameResult<()>> + Send + 'static,
    {
        self.shared.hooks().unmount = Some(boxed(hook));
    }

    /// Props of the last MOUNT or UPDATE, cleared by UNMOUNT.
    pub fn current_props(&self) -> Option<AppProps> {
        self.shared.current().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.current().is_some()
    }

    pub fn destroy(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.worker.abort();
    }
}

impl Drop for EmbeddedLifecycle {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for EmbeddedLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedLifecycle")
            .field("name", &self.shared.name)
            .field("current", &self.current_props())
            .finish()
    }
}

fn boxed<F, Fut>(hook: F) -> LifecycleHook
where
    F: Fn(AppProps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FrameResult<()>> + Send + 'static,
{
    Arc::new(move |props| Box::pin(hook(props)))
}

fn enqueue(
    phase: Phase,
    tx: UnboundedSender<(Phase, Option<LifecycleProps>)>,
) -> crate::message::bus::MessageHandler {
    handler(move |envelope| {
        let props = match &envelope.body {
            MessageBody::Mount { props } | MessageBody::Update { props } | MessageBody::Unmount { props } => {
                props.clone()
            }
            _ => return Ok(()),
        };
        let _ = tx.send((phase, props));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{core::error::FrameError, message::transport::LoopbackTransport};

    async fn flush() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hooks_follow_lifecycle_envelopes() {
        let transport = Arc::new(LoopbackTransport::new());
        let host = MessageBus::host(transport.clone());
        let bus = MessageBus::embedded("a", transport.clone());
        let lifecycle = EmbeddedLifecycle::new(&bus);

        let calls = Arc::new(Mutex::new(Vec::new()));
        for label in ["mount", "update", "unmount"] {
            let calls = calls.clone();
            let hook = move |props: AppProps| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(format!("{label}:{}", props.route));
                    Ok::<(), FrameError>(())
                }
            };
            match label {
                "mount" => lifecycle.on_mount(hook),
                "update" => lifecycle.on_update(hook),
                _ => lifecycle.on_unmount(hook),
            }
        }

        host.send_mount(
            LifecycleProps {
                route: "/1".into(),
                meta: None,
            },
            "a",
        )
        .unwrap();
        flush().await;
        let props = lifecycle.current_props().unwrap();
        assert_eq!(props.name, "a");
        assert_eq!(props.route, "/1");

        host.send(
            MessageBody::Update {
                props: Some(LifecycleProps {
                    route: "/2".into(),
                    meta: None,
                }),
            },
            Some("a"),
        )
        .unwrap();
        host.send_unmount("a").unwrap();
        flush().await;

        assert!(!lifecycle.is_mounted());
        assert_eq!(*calls.lock().unwrap(), vec!["mount:/1", "update:/2", "unmount:/2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_hook_keeps_processing() {
        let transport = Arc::new(LoopbackTransport::new());
        let host = MessageBus::host(transport.clone());
        let bus = MessageBus::embedded("a", transport.clone());
        let lifecycle = EmbeddedLifecycle::new(&bus);
        lifecycle.on_mount(|_| async { Err::<(), _>(FrameError::Handler("render failed".into())) });

        host.send_mount(LifecycleProps::default(), "a").unwrap();
        host.send_unmount("a").unwrap();
        flush().await;
        assert!(!lifecycle.is_mounted());

        // unmount before any mount is ignored
        host.send_unmount("a").unwrap();
        flush().await;
        assert!(lifecycle.current_props().is_none());
    }
}
