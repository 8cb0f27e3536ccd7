//! Embedded application side
//!
//! [`EmbeddedApp`] is what an application rendered inside a frame creates: a
//! named bus, lifecycle hooks driven by the host and the router mirror.

pub mod lifecycle;
pub mod router;

use std::{future::Future, sync::Arc};

use log::info;

pub use lifecycle::{AppProps, EmbeddedLifecycle, LifecycleHook};
pub use router::EmbeddedRouter;

use crate::{
    core::{
        error::FrameResult,
        subscription::Subscription,
        traits::{History, Transport},
    },
    message::{
        bus::{handler, MessageBus, Topic},
        envelope::MessageKind,
    },
    orchestration::navigation::NavigationObserver,
};

pub struct EmbeddedApp {
    bus: Arc<MessageBus>,
    lifecycle: EmbeddedLifecycle,
    router: Arc<EmbeddedRouter>,
    mount_route: Subscription,
}

impl EmbeddedApp {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>, history: Arc<dyn History>) -> FrameResult<Self> {
        let bus = MessageBus::embedded(name, transport);
        let observer = Arc::new(NavigationObserver::new(history));
        let router = Arc::new(EmbeddedRouter::new(bus.clone(), observer)?);
        let lifecycle = EmbeddedLifecycle::new(&bus);

        // the route a MOUNT carries becomes the router's current route
        let weak = Arc::downgrade(&router);
        let mount_route = bus.on(
            Topic::Kind(MessageKind::Mount),
            handler(move |envelope| {
                if let (Some(router), Some(route)) = (weak.upgrade(), envelope.body.route()) {
                    router.set_route(route);
                }
                Ok(())
            }),
        );

        info!("Embedded app {} initialized", bus.name().unwrap_or_default());
        Ok(Self {
            bus,
            lifecycle,
            router,
            mount_route,
        })
    }

    pub fn name(&self) -> &str {
        self.bus.name().unwrap_or_default()
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn router(&self) -> &EmbeddedRouter {
        &self.router
    }

    pub fn lifecycle(&self) -> &EmbeddedLifecycle {
        &self.lifecycle
    }

    pub fn on_mount<F, Fut>(&self, hook: F)
    where
        F: Fn(AppProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameResult<()>> + Send + 'static,
    {
        self.lifecycle.on_mount(hook)
    }

    pub fn on_unmount<F, Fut>(&self, hook: F)
    where
        F: Fn(AppProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameResult<()>> + Send + 'static,
    {
        self.lifecycle.on_unmount(hook)
    }

    pub fn on_update<F, Fut>(&self, hook: F)
    where
        F: Fn(AppProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameResult<()>> + Send + 'static,
    {
        self.lifecycle.on_update(hook)
    }

    pub fn current_props(&self) -> Option<AppProps> {
        self.lifecycle.current_props()
    }

    /// Tears down the router, the lifecycle hooks and the bus.
    pub fn destroy(&self) {
        self.mount_route.unsubscribe();
        self.router.destroy();
        self.lifecycle.destroy();
        self.bus.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        core::error::FrameError,
        message::{envelope::LifecycleProps, transport::LoopbackTransport},
        orchestration::navigation::MemoryHistory,
    };

    #[tokio::test(start_paused = true)]
    async fn test_mount_seeds_route_and_props() {
        let transport = Arc::new(LoopbackTransport::new());
        let host = MessageBus::host(transport.clone());
        let app = EmbeddedApp::new("a", transport.clone(), Arc::new(MemoryHistory::new("/"))).unwrap();
        let mounted = Arc::new(std::sync::Mutex::new(None));
        let sink = mounted.clone();
        app.on_mount(move |props| {
            *sink.lock().unwrap() = Some(props.route);
            async { Ok::<(), FrameError>(()) }
        });

        let mut meta = serde_json::Map::new();
        meta.insert("title".into(), json!("A"));
        host.send_mount(
            LifecycleProps {
                route: "/1".into(),
                meta: Some(meta),
            },
            "a",
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(app.name(), "a");
        assert_eq!(mounted.lock().unwrap().as_deref(), Some("/1"));
        assert_eq!(app.router().get_current_route(), "/1");
        let props = app.current_props().unwrap();
        assert_eq!(props.meta.unwrap()["title"], "A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_round_trip_with_host() {
        let transport = Arc::new(LoopbackTransport::new());
        let host = MessageBus::host(transport.clone());
        let app = EmbeddedApp::new("a", transport.clone(), Arc::new(MemoryHistory::default())).unwrap();
        host.on_request("getToken", |_| async { Ok::<_, FrameError>(json!("t0k3n")) });

        let token = app.bus().request("getToken", None, None).await.unwrap();
        assert_eq!(token, json!("t0k3n"));

        app.destroy();
        assert!(app.bus().is_destroyed());
    }
}
