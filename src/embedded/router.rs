//! Router mirror inside an embedded application
//!
//! Tracks the application's own route. Routes pushed by the host (ROUTE_CHANGE)
//! are handed to local subscribers; the application's own navigation is
//! reported to the host with ROUTE_SYNC, once per distinct route.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use dashmap::DashMap;
use log::{debug, error, warn};

use crate::{
    core::{error::FrameResult, subscription::Subscription},
    message::{
        bus::{handler, MessageBus, Topic},
        envelope::MessageKind,
    },
    orchestration::{
        navigation::{NavigationEvent, NavigationObserver},
        router::RoutingMode,
    },
    utils::path::resolve_relative,
};

pub type EmbeddedRouteListener = Arc<dyn Fn(&str) + Send + Sync>;

struct State {
    bus: Arc<MessageBus>,
    observer: Arc<NavigationObserver>,
    mode: RoutingMode,
    current: Mutex<String>,
    listeners: DashMap<u64, EmbeddedRouteListener>,
}

impl State {
    fn current(&self) -> MutexGuard<'_, String> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reports the application's own navigation to the host.
    fn sync_route(&self) {
        let route = self.mode.path_of(&self.observer.location());
        {
            let mut current = self.current();
            if *current == route {
                return;
            }
            *current = route.clone();
        }
        debug!("Embedded route synced to {}", route);
        if let Err(e) = self.bus.send_route_sync(&route) {
            warn!("Failed to sync route {}: {}", route, e);
        }
    }

    /// Applies a route pushed by the host.
    fn apply(&self, route: &str) {
        {
            let mut current = self.current();
            if *current == route {
                return;
            }
            *current = route.to_string();
        }

        let mut listeners: Vec<(u64, EmbeddedRouteListener)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);
        for (_, listener) in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(route))).is_err() {
                error!("Route listener panicked on {}", route);
            }
        }
    }
}

pub struct EmbeddedRouter {
    state: Arc<State>,
    next_listener: AtomicU64,
    route_change: Subscription,
}

impl EmbeddedRouter {
    /// Starts observing `observer` and listening for host route changes.
    pub fn new(bus: Arc<MessageBus>, observer: Arc<NavigationObserver>) -> FrameResult<Self> {
        let mode = RoutingMode::detect(&observer.location());
        let state = Arc::new(State {
            current: Mutex::new(mode.path_of(&observer.location())),
            bus: bus.clone(),
            observer: observer.clone(),
            mode,
            listeners: DashMap::new(),
        });

        let weak = Arc::downgrade(&state);
        observer.install(Arc::new(move |_: &NavigationEvent| {
            if let Some(state) = weak.upgrade() {
                state.sync_route();
            }
        }))?;

        let weak = Arc::downgrade(&state);
        let route_change = bus.on(
            Topic::Kind(MessageKind::RouteChange),
            handler(move |envelope| {
                if let (Some(state), Some(route)) = (weak.upgrade(), envelope.body.route()) {
                    state.apply(route);
                }
                Ok(())
            }),
        );

        Ok(Self {
            state,
            next_listener: AtomicU64::new(0),
            route_change,
        })
    }

    pub fn get_current_route(&self) -> String {
        self.state.current().clone()
    }

    pub fn mode(&self) -> RoutingMode {
        self.state.mode
    }

    pub fn on_route_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.state.listeners.insert(id, Arc::new(listener));
        let state = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state.listeners.remove(&id);
            }
        })
    }

    /// Navigates inside the application; `./x` and `../x` resolve against the
    /// current route. Returns the resolved route.
    pub fn navigate(&self, to: &str) -> String {
        let route = resolve_relative(&self.get_current_route(), to);
        if route != self.get_current_route() {
            let url = self.state.mode.url_for(&self.state.observer.location(), &route);
            self.state.observer.push_state(None, &url);
        }
        route
    }

    /// Seeds the current route, e.g. from MOUNT props, notifying subscribers.
    pub fn set_route(&self, route: &str) {
        self.state.apply(route);
    }

    pub fn destroy(&self) {
        self.route_change.unsubscribe();
        self.state.observer.restore();
        self.state.listeners.clear();
    }
}

impl Drop for EmbeddedRouter {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        message::transport::LoopbackTransport,
        orchestration::navigation::MemoryHistory,
        testing::spy,
    };

    async fn flush() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn setup(url: &str) -> (Arc<LoopbackTransport>, Arc<MessageBus>, EmbeddedRouter) {
        let transport = Arc::new(LoopbackTransport::new());
        let host = MessageBus::host(transport.clone());
        let bus = MessageBus::embedded("a", transport.clone());
        let observer = Arc::new(NavigationObserver::new(Arc::new(MemoryHistory::new(url))));
        let router = EmbeddedRouter::new(bus, observer).unwrap();
        (transport, host, router)
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_navigation_syncs_once_per_route() {
        let (transport, _host, router) = setup("/1");
        let (_spy, seen) = spy(transport.as_ref());

        assert_eq!(router.navigate("/2"), "/2");
        router.navigate("/2");
        router.state.observer.replace_state(None, "/2");
        flush().await;

        let routes: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == MessageKind::RouteSync)
            .map(|e| (e.body.route().map(str::to_string), e.origin.clone()))
            .collect();
        assert_eq!(routes, vec![(Some("/2".to_string()), Some("a".to_string()))]);
        assert_eq!(router.get_current_route(), "/2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_route_change_reaches_listeners_without_sync() {
        let (transport, host, router) = setup("/");
        let (_spy, seen) = spy(transport.as_ref());
        let routes = Arc::new(Mutex::new(Vec::new()));
        let sink = routes.clone();
        router.on_route_change(move |route| sink.lock().unwrap().push(route.to_string()));

        host.send_route_change("/detail/7", "a").unwrap();
        host.send_route_change("/detail/7", "a").unwrap();
        flush().await;
        assert_eq!(*routes.lock().unwrap(), vec!["/detail/7".to_string()]);

        // rendering the pushed route locally does not bounce it back
        router.navigate("/detail/7");
        flush().await;
        assert!(seen.lock().unwrap().iter().all(|e| e.kind() != MessageKind::RouteSync));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relative_navigation() {
        let (_t, _host, router) = setup("/list");
        assert_eq!(router.navigate("./1"), "/list/1");
        assert_eq!(router.navigate("../2"), "/list/2");
        assert_eq!(router.navigate("/abs"), "/abs");
        assert_eq!(router.get_current_route(), "/abs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_syncing() {
        let (transport, _host, router) = setup("/");
        let (_spy, seen) = spy(transport.as_ref());
        router.destroy();
        router.state.observer.push_state(None, "/elsewhere");
        flush().await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(router.get_current_route(), "/");
    }
}
