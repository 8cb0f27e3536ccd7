//! Route orchestration
//!
//! The host-side control loop: every observed navigation is matched against the
//! registry, and the lifecycle loader is driven until the active set equals the
//! matched set. Embedded applications report their own navigation with
//! ROUTE_SYNC, which only updates the address bar.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{sync::mpsc::unbounded_channel, task::JoinHandle};

use super::navigation::{NavigationEvent, NavigationObserver};
use crate::{
    core::{
        error::{FrameError, FrameResult},
        instance::AppInstance,
        registry::AppRegistry,
        subscription::Subscription,
        traits::AppLifecycle,
    },
    message::{
        bus::{handler, MessageBus, Topic},
        envelope::{LifecycleProps, MessageKind},
    },
    utils::path::{normalize_route, strip_fragment, Location},
};

/// Name of the host-local bus event published after every route change.
pub const ROUTE_CHANGE_EVENT: &str = "ROUTE_CHANGE";

/// Which part of the location carries the routed path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// `pathname + search`
    #[default]
    History,
    /// The fragment, without `#`.
    Hash,
}

impl RoutingMode {
    /// Hash routing is assumed when the fragment looks like a path.
    pub fn detect(location: &Location) -> Self {
        if location.hash.starts_with("#/") {
            RoutingMode::Hash
        } else {
            RoutingMode::History
        }
    }

    pub fn path_of(&self, location: &Location) -> String {
        match self {
            RoutingMode::History => location.path_and_query(),
            RoutingMode::Hash => normalize_route(location.hash.trim_start_matches('#')),
        }
    }

    /// Url that shows `path` in the address bar, relative to `location`.
    pub fn url_for(&self, location: &Location, path: &str) -> String {
        match self {
            RoutingMode::History => path.to_string(),
            RoutingMode::Hash => format!("{}{}#{}", location.pathname, location.search, path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteChangeCause {
    /// A host navigation ran a full route-change cycle.
    Navigation,
    /// An embedded application reported its own navigation.
    EmbeddedSync,
}

/// What host-side observers are told after the route changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteChange {
    pub path: String,
    /// Names of the active applications, in registration order.
    pub apps: Vec<String>,
    pub cause: RouteChangeCause,
}

pub type RouteListener = Arc<dyn Fn(&RouteChange) + Send + Sync>;

#[derive(Default)]
struct RouteSnapshot {
    path: Option<String>,
    apps: Vec<Arc<AppInstance>>,
}

struct Running {
    worker: JoinHandle<()>,
    route_sync: Subscription,
}

/// Work queued to the orchestrator's worker task.
enum Command {
    Navigated(NavigationEvent),
    RouteSync { origin: Option<String>, route: String },
}

/// Guarded by the cycle mutex: the newest navigation a finished cycle observed
/// and what that cycle produced.
#[derive(Default)]
struct CycleState {
    covered: u64,
    last: Option<RouteChange>,
}

/// Marks inbound route-sync processing; navigation observed meanwhile is ignored.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RouteOrchestrator {
    registry: Arc<AppRegistry>,
    lifecycle: Arc<dyn AppLifecycle>,
    bus: Arc<MessageBus>,
    observer: Arc<NavigationObserver>,
    mode: Mutex<Option<RoutingMode>>,
    snapshot: ArcSwap<RouteSnapshot>,
    cycle: tokio::sync::Mutex<CycleState>,
    nav_seq: AtomicU64,
    syncing: Arc<AtomicBool>,
    listeners: Arc<DashMap<u64, RouteListener>>,
    next_listener: AtomicU64,
    running: Mutex<Option<Running>>,
}

impl RouteOrchestrator {
    pub fn new(
        registry: Arc<AppRegistry>,
        lifecycle: Arc<dyn AppLifecycle>,
        bus: Arc<MessageBus>,
        observer: Arc<NavigationObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            lifecycle,
            bus,
            observer,
            mode: Mutex::new(None),
            snapshot: ArcSwap::from_pointee(RouteSnapshot::default()),
            cycle: tokio::sync::Mutex::new(CycleState::default()),
            nav_seq: AtomicU64::new(0),
            syncing: Arc::new(AtomicBool::new(false)),
            listeners: Arc::new(DashMap::new()),
            next_listener: AtomicU64::new(0),
            running: Mutex::new(None),
        })
    }

    /// Installs the navigation observer, subscribes to ROUTE_SYNC and runs the
    /// first route-change cycle.
    pub async fn start(self: &Arc<Self>) -> FrameResult<()> {
        {
            let mut running = self.running_slot();
            if running.is_some() {
                return Err(FrameError::Configuration("route orchestrator already started".into()));
            }

            let mode = self.mode();
            let (tx, mut rx) = unbounded_channel::<Command>();
            let syncing = self.syncing.clone();
            let navigated = tx.clone();
            self.observer.install(Arc::new(move |event: &NavigationEvent| {
                if syncing.load(Ordering::SeqCst) {
                    trace!("Ignoring navigation caused by route sync");
                    return;
                }
                let _ = navigated.send(Command::Navigated(event.clone()));
            }))?;

            // route syncs go through the worker so they never interleave with a cycle
            let route_sync = self.bus.on(
                Topic::Kind(MessageKind::RouteSync),
                handler(move |envelope| {
                    if let Some(route) = envelope.body.route() {
                        let _ = tx.send(Command::RouteSync {
                            origin: envelope.origin.clone(),
                            route: route.to_string(),
                        });
                    }
                    Ok(())
                }),
            );

            let weak = Arc::downgrade(self);
            let worker = tokio::spawn(async move {
                while let Some(command) = rx.recv().await {
                    let Some(router) = weak.upgrade() else {
                        break;
                    };
                    match command {
                        Command::Navigated(event) => {
                            debug!("Observed {:?} navigation to {}", event.kind, event.location);
                            router.run_cycle(false, None).await;
                        }
                        Command::RouteSync { origin, route } => {
                            router.handle_route_sync(origin.as_deref(), &route).await;
                        }
                    }
                }
            });

            *running = Some(Running { worker, route_sync });
            info!("Route orchestrator started in {:?} mode", mode);
        }

        self.run_cycle(true, None).await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running_slot().is_some()
    }

    /// Re-evaluates the current location even if the path did not change.
    pub async fn check_route(&self) -> Option<RouteChange> {
        self.run_cycle(true, None).await
    }

    /// Pushes (or replaces) `url` and waits until the resulting cycle is done.
    pub async fn navigate(&self, url: &str, replace: bool) -> Option<RouteChange> {
        if replace {
            self.observer.replace_state(None, url);
        } else {
            self.observer.push_state(None, url);
        }
        let seq = self.nav_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.run_cycle(false, Some(seq)).await
    }

    /// Traverses the history and waits for the resulting cycle.
    pub async fn go(&self, delta: i32) -> Option<RouteChange> {
        if !self.observer.go(delta) {
            return None;
        }
        let seq = self.nav_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.run_cycle(false, Some(seq)).await
    }

    pub fn mode(&self) -> RoutingMode {
        let mut mode = self.mode.lock().unwrap_or_else(|p| p.into_inner());
        *mode.get_or_insert_with(|| RoutingMode::detect(&self.observer.location()))
    }

    pub fn set_mode(&self, mode: RoutingMode) {
        *self.mode.lock().unwrap_or_else(|p| p.into_inner()) = Some(mode);
    }

    pub fn get_current_path(&self) -> Option<String> {
        self.snapshot.load().path.clone()
    }

    pub fn get_current_apps(&self) -> Vec<Arc<AppInstance>> {
        self.snapshot.load().apps.clone()
    }

    pub fn observer(&self) -> &Arc<NavigationObserver> {
        &self.observer
    }

    pub fn on_route_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RouteChange) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, Arc::new(listener));
        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.remove(&id);
            }
        })
    }

    /// One route-change cycle; cycles never overlap.
    ///
    /// With `covers`, a cycle that already ran after navigation number `covers`
    /// answers for it instead of running again.
    async fn run_cycle(&self, force: bool, covers: Option<u64>) -> Option<RouteChange> {
        let mut cycle = self.cycle.lock().await;
        if let Some(seq) = covers {
            if cycle.covered >= seq {
                trace!("Navigation {} already handled by an earlier cycle", seq);
                return cycle.last.clone();
            }
        }

        let seq = self.nav_seq.load(Ordering::SeqCst);
        let change = self.apply_route(force).await;
        if change.is_some() || seq > cycle.covered {
            cycle.last = change.clone();
        }
        cycle.covered = seq;
        change
    }

    async fn apply_route(&self, force: bool) -> Option<RouteChange> {
        let path = self.mode().path_of(&self.observer.location());
        let previous = self.snapshot.load_full();
        if !force && previous.path.as_deref() == Some(path.as_str()) {
            return None;
        }
        debug!("Route change cycle for {} (forced: {})", path, force);

        let matched = self.registry.match_apps(&path);
        let was_active = |instance: &Arc<AppInstance>| previous.apps.iter().any(|a| Arc::ptr_eq(a, instance));
        let is_matched = |instance: &Arc<AppInstance>| matched.iter().any(|m| Arc::ptr_eq(m, instance));

        for instance in previous.apps.iter().filter(|i| !is_matched(*i)) {
            if let Err(e) = self.lifecycle.unmount_app(instance).await {
                error!("Failed to unmount app {}: {}", instance.name(), e);
            }
        }

        for instance in matched.iter() {
            let route = instance.descriptor().route_match.sub_route(&path);
            // a failed mount is never marked as mounted, so it is retried here
            if !was_active(instance) || !instance.has_mounted_before() {
                if let Err(e) = self.mount(instance, route).await {
                    error!("Failed to mount app {}: {}", instance.name(), e);
                }
            } else if let Err(e) = self.bus.send_route_change(&route, instance.name()) {
                warn!("Failed to forward route {} to {}: {}", route, instance.name(), e);
            }
        }

        let change = RouteChange {
            path: path.clone(),
            apps: matched.iter().map(|i| i.name().to_string()).collect(),
            cause: RouteChangeCause::Navigation,
        };
        self.snapshot.store(Arc::new(RouteSnapshot {
            path: Some(path),
            apps: matched,
        }));
        self.publish(&change);
        Some(change)
    }

    async fn mount(&self, instance: &Arc<AppInstance>, route: String) -> FrameResult<()> {
        self.lifecycle.load_app(instance).await?;

        let descriptor = instance.descriptor();
        if descriptor.cache && instance.has_mounted_before() {
            debug!("Re-activating cached app {} at {}", instance.name(), route);
            self.bus.send_route_change(&route, instance.name())?;
        } else {
            debug!("Mounting app {} at {}", instance.name(), route);
            self.bus.send_mount(
                LifecycleProps {
                    route,
                    meta: descriptor.meta.clone(),
                },
                instance.name(),
            )?;
            instance.mark_mounted();
        }

        self.lifecycle.show_app(instance);
        Ok(())
    }

    /// Reflects an embedded application's own navigation in the address bar.
    ///
    /// Routes the origin app's match already accepts are host paths; anything
    /// else is a sub-route and is mapped back through the app's route match.
    /// Returns `false` when the result is already the current path.
    pub async fn handle_route_sync(&self, origin: Option<&str>, route: &str) -> bool {
        let _cycle = self.cycle.lock().await;

        let reported = normalize_route(strip_fragment(route));
        let path = match origin.and_then(|name| self.registry.get(name)) {
            Some(instance) if !instance.descriptor().route_match.matches(&reported) => {
                instance.descriptor().route_match.host_path(&reported)
            }
            _ => reported,
        };

        let current = self.snapshot.load_full();
        if current.path.as_deref() == Some(path.as_str()) {
            trace!("Route sync to {} ignored, already current", path);
            return false;
        }

        {
            let _guard = SyncGuard::engage(&self.syncing);
            let url = self.mode().url_for(&self.observer.location(), &path);
            self.observer.replace_state(self.observer.state(), &url);
        }
        debug!("Address bar synced to {} from {}", path, origin.unwrap_or("unknown app"));

        let apps: Vec<String> = current.apps.iter().map(|i| i.name().to_string()).collect();
        self.snapshot.rcu(|snapshot| RouteSnapshot {
            path: Some(path.clone()),
            apps: snapshot.apps.clone(),
        });
        self.publish(&RouteChange {
            path,
            apps,
            cause: RouteChangeCause::EmbeddedSync,
        });
        true
    }

    /// Drops `name` from the active set, e.g. before it is unregistered.
    pub(crate) async fn deactivate(&self, name: &str) {
        let _cycle = self.cycle.lock().await;
        self.snapshot.rcu(|snapshot| RouteSnapshot {
            path: snapshot.path.clone(),
            apps: snapshot.apps.iter().filter(|i| i.name() != name).cloned().collect(),
        });
    }

    /// Stops observing navigation and route syncs. Calling it again has no effect.
    pub fn destroy(&self) {
        let Some(running) = self.running_slot().take() else {
            return;
        };
        running.worker.abort();
        running.route_sync.unsubscribe();
        self.observer.restore();
        self.listeners.clear();
        info!("Route orchestrator stopped");
    }

    fn publish(&self, change: &RouteChange) {
        let mut listeners: Vec<(u64, RouteListener)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (_, listener) in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(change))).is_err() {
                error!("Route change listener panicked on {}", change.path);
            }
        }
        self.bus
            .emit_local(ROUTE_CHANGE_EVENT, Some(json!({"path": change.path, "apps": change.apps})));
    }

    fn running_slot(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for RouteOrchestrator {
    fn drop(&mut self) {
        self.destroy();
    }
}
