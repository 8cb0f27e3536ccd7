//! Host facade
//!
//! Wires the registry, the lifecycle loader, the route orchestrator and the
//! host bus together and exposes the registration and observation API.

use std::{collections::HashSet, sync::Arc, time::Duration};

use log::{info, warn};

use super::{
    navigation::NavigationObserver,
    router::{RouteChange, RouteOrchestrator, RoutingMode},
};
use crate::{
    config::Config,
    core::{
        descriptor::AppDescriptor,
        error::{FrameError, FrameResult},
        instance::AppInstance,
        loader::{LifecycleLoader, LoaderSettings},
        registry::AppRegistry,
        subscription::Subscription,
        traits::{FrameHost, History, Transport},
    },
    message::bus::MessageBus,
};

pub struct MicroFrame {
    registry: Arc<AppRegistry>,
    bus: Arc<MessageBus>,
    loader: Arc<LifecycleLoader>,
    router: Arc<RouteOrchestrator>,
}

impl MicroFrame {
    pub fn new(
        transport: Arc<dyn Transport>,
        frames: Arc<dyn FrameHost>,
        history: Arc<dyn History>,
        settings: LoaderSettings,
    ) -> Self {
        let registry = Arc::new(AppRegistry::new());
        let bus = MessageBus::host(transport);
        let loader = Arc::new(LifecycleLoader::new(bus.clone(), frames, settings));
        let observer = Arc::new(NavigationObserver::new(history));
        let router = RouteOrchestrator::new(registry.clone(), loader.clone(), bus.clone(), observer);

        Self {
            registry,
            bus,
            loader,
            router,
        }
    }

    /// Builds a host from configuration and registers the configured apps.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        frames: Arc<dyn FrameHost>,
        history: Arc<dyn History>,
    ) -> FrameResult<Self> {
        let frame = Self::new(transport, frames, history, LoaderSettings::from(&config.loader));
        frame
            .bus
            .set_request_timeout(Duration::from_millis(config.bus.request_timeout_ms));
        if let Some(mode) = config.routing.mode {
            frame.router.set_mode(mode);
        }

        for descriptor in config.descriptors()? {
            frame.registry.register(descriptor)?;
        }
        info!("Host configured with {} apps", frame.registry.len());
        Ok(frame)
    }

    /// Starts observing navigation and activates the apps of the current location.
    pub async fn start(&self) -> FrameResult<()> {
        self.router.start().await
    }

    /// Registers one app and re-checks the current route when running.
    pub async fn register_app(&self, descriptor: AppDescriptor) -> FrameResult<Arc<AppInstance>> {
        let instance = self.registry.register(descriptor)?;
        self.recheck().await;
        Ok(instance)
    }

    /// Registers a batch of apps. Nothing is registered if any name is taken
    /// or repeated within the batch.
    pub async fn register_apps(&self, descriptors: Vec<AppDescriptor>) -> FrameResult<Vec<Arc<AppInstance>>> {
        let mut names = HashSet::new();
        for descriptor in &descriptors {
            if !names.insert(descriptor.name.as_str()) || self.registry.contains(&descriptor.name) {
                return Err(FrameError::DuplicateName(descriptor.name.clone()));
            }
        }

        let instances = descriptors
            .into_iter()
            .map(|descriptor| self.registry.register(descriptor))
            .collect::<FrameResult<Vec<_>>>()?;
        self.recheck().await;
        Ok(instances)
    }

    /// Tears down any live resource of `name`, cached ones included, then
    /// removes it from the registry.
    pub async fn unregister_app(&self, name: &str) -> FrameResult<()> {
        let instance = self
            .registry
            .get(name)
            .ok_or_else(|| FrameError::NotFound(format!("app {name}")))?;

        self.router.deactivate(name).await;
        if instance.has_resource() {
            if let Err(e) = self.loader.destroy_cache(&instance).await {
                warn!("Teardown of {} failed during unregister: {}", name, e);
            }
        }
        self.registry.unregister(name);
        info!("App {} unregistered", name);
        Ok(())
    }

    pub fn get_app(&self, name: &str) -> Option<Arc<AppInstance>> {
        self.registry.get(name)
    }

    pub fn get_all_apps(&self) -> Vec<Arc<AppInstance>> {
        self.registry.list()
    }

    pub fn get_current_apps(&self) -> Vec<Arc<AppInstance>> {
        self.router.get_current_apps()
    }

    pub fn get_current_path(&self) -> Option<String> {
        self.router.get_current_path()
    }

    pub fn on_route_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RouteChange) + Send + Sync + 'static,
    {
        self.router.on_route_change(listener)
    }

    pub fn set_router_mode(&self, mode: RoutingMode) {
        self.router.set_mode(mode);
    }

    /// Programmatic host navigation; resolves once the route change is applied.
    pub async fn navigate(&self, url: &str) -> Option<RouteChange> {
        self.router.navigate(url, false).await
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn router(&self) -> &Arc<RouteOrchestrator> {
        &self.router
    }

    /// Destroys every live resource, stops routing and closes the bus.
    pub async fn shutdown(&self) {
        self.router.destroy();
        for instance in self.registry.list() {
            if instance.has_resource() {
                if let Err(e) = self.loader.destroy_cache(&instance).await {
                    warn!("Teardown of {} failed during shutdown: {}", instance.name(), e);
                }
            }
            self.registry.unregister(instance.name());
        }
        self.bus.destroy();
        info!("Host shut down");
    }

    async fn recheck(&self) {
        if self.router.is_running() {
            self.router.check_route().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{descriptor::RouteMatch, instance::AppStatus},
        embedded::EmbeddedApp,
        message::{envelope::MessageKind, transport::LoopbackTransport},
        orchestration::navigation::MemoryHistory,
        testing::{spy, FakeFrameHost},
    };

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    async fn flush() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    struct Setup {
        transport: Arc<LoopbackTransport>,
        frames: Arc<FakeFrameHost>,
        history: Arc<MemoryHistory>,
        host: MicroFrame,
    }

    fn setup(url: &str) -> Setup {
        let transport = Arc::new(LoopbackTransport::new());
        let frames = Arc::new(FakeFrameHost::new());
        let history = Arc::new(MemoryHistory::new(url));
        let host = MicroFrame::new(
            transport.clone(),
            frames.clone(),
            history.clone(),
            LoaderSettings::default(),
        );
        Setup {
            transport,
            frames,
            history,
            host,
        }
    }

    fn app(name: &str) -> AppDescriptor {
        AppDescriptor::new(name, format!("http://{name}.local"), RouteMatch::prefix(format!("/{name}")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedded_navigation_round_trip() {
        init_log();
        let s = setup("/a/1");
        let (_spy, seen) = spy(s.transport.as_ref());
        let embedded = EmbeddedApp::new("a", s.transport.clone(), Arc::new(MemoryHistory::new("/"))).unwrap();

        s.host.register_app(app("a")).await.unwrap();
        s.host.start().await.unwrap();
        flush().await;
        assert_eq!(embedded.router().get_current_route(), "/1");

        embedded.router().navigate("/2");
        flush().await;

        assert_eq!(s.history.location().pathname, "/a/2");
        assert_eq!(s.host.get_current_path().as_deref(), Some("/a/2"));
        assert_eq!(s.host.get_app("a").unwrap().status(), AppStatus::Loaded);
        assert_eq!(embedded.router().get_current_route(), "/2");

        let kinds: Vec<_> = seen.lock().unwrap().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![MessageKind::Mount, MessageKind::RouteSync]);

        // the host pushing the same route back is not re-reported
        s.host.navigate("/a/3").await.unwrap();
        flush().await;
        assert_eq!(embedded.router().get_current_route(), "/3");
        let kinds: Vec<_> = seen.lock().unwrap().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.last(), Some(&MessageKind::RouteChange));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_while_running_activates_matching_app() {
        let s = setup("/b/x");
        s.host.start().await.unwrap();
        assert!(s.host.get_current_apps().is_empty());

        let b = s.host.register_app(app("b")).await.unwrap();
        assert_eq!(b.status(), AppStatus::Loaded);
        assert_eq!(s.host.get_current_apps().len(), 1);
        assert!(s.host.register_app(app("b")).await.unwrap_err().is_configuration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_apps_is_all_or_nothing() {
        let s = setup("/");
        s.host.register_app(app("a")).await.unwrap();

        let err = s
            .host
            .register_apps(vec![app("b"), app("a")])
            .await
            .unwrap_err();
        assert_eq!(err, FrameError::DuplicateName("a".into()));
        assert!(s.host.get_app("b").is_none());

        let err = s.host.register_apps(vec![app("c"), app("c")]).await.unwrap_err();
        assert_eq!(err, FrameError::DuplicateName("c".into()));

        let added = s.host.register_apps(vec![app("b"), app("c")]).await.unwrap();
        assert_eq!(added.len(), 2);
        let names: Vec<_> = s.host.get_all_apps().iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_tears_down_cached_app() {
        let s = setup("/a");
        s.host.register_app(app("a").with_cache(true)).await.unwrap();
        s.host.start().await.unwrap();
        let a = s.host.get_app("a").unwrap();
        assert!(a.has_resource());

        s.host.unregister_app("a").await.unwrap();
        assert!(s.host.get_app("a").is_none());
        assert!(s.host.get_current_apps().is_empty());
        assert!(!a.has_resource());
        assert_eq!(s.frames.removed(), vec!["a".to_string()]);

        assert!(matches!(
            s.host.unregister_app("a").await,
            Err(FrameError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let s = setup("/a");
        s.host.register_apps(vec![app("a"), app("b")]).await.unwrap();
        s.host.start().await.unwrap();

        s.host.shutdown().await;
        assert!(s.host.get_all_apps().is_empty());
        assert_eq!(s.frames.removed(), vec!["a".to_string()]);
        assert!(s.host.bus().is_destroyed());
        assert!(!s.host.router().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config() {
        let conf = Config::from_yaml(
            r#"
routing:
  mode: hash
bus:
  request_timeout_ms: 1000
apps:
  - name: a
    url: http://localhost:3001
    route_match: { kind: prefix, path: /a }
"#,
        )
        .unwrap();
        let transport = Arc::new(LoopbackTransport::new());
        let host = MicroFrame::from_config(
            &conf,
            transport,
            Arc::new(FakeFrameHost::new()),
            Arc::new(MemoryHistory::new("/index.html#/a/home")),
        )
        .unwrap();
        assert_eq!(host.bus().request_timeout(), Duration::from_millis(1000));

        host.start().await.unwrap();
        assert_eq!(host.router().mode(), RoutingMode::Hash);
        assert_eq!(host.get_current_path().as_deref(), Some("/a/home"));
        assert_eq!(host.get_current_apps().len(), 1);
    }
}
