//! Lifecycle loader
//!
//! Drives each application instance through
//! `NOT_LOADED -> LOADING -> LOADED -> UNMOUNTING -> NOT_LOADED`, with `ERROR`
//! reachable from `LOADING` and `UNMOUNTING` and retried through `LOADING`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::Uri;
use log::{debug, info, warn};

use crate::{
    config,
    core::{
        error::{FrameError, FrameResult},
        instance::{AppInstance, AppStatus, BeginLoad},
        traits::{AppLifecycle, FrameHandle, FrameHost, FrameSpec, LoadSignal},
    },
    message::bus::MessageBus,
};

/// Timing knobs of the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSettings {
    /// Upper bound for a resource to signal readiness.
    pub load_timeout: Duration,
    /// Wait after a raw "loaded" signal so the embedded bus can initialize.
    pub settle_delay: Duration,
    /// Wait after the UNMOUNT notification before the resource is removed.
    pub unmount_grace: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_millis(30_000),
            settle_delay: Duration::from_millis(100),
            unmount_grace: Duration::from_millis(100),
        }
    }
}

impl From<&config::Loader> for LoaderSettings {
    fn from(conf: &config::Loader) -> Self {
        Self {
            load_timeout: Duration::from_millis(conf.load_timeout_ms),
            settle_delay: Duration::from_millis(conf.settle_delay_ms),
            unmount_grace: Duration::from_millis(conf.unmount_grace_ms),
        }
    }
}

/// Turns descriptors into live, cached or destroyed embedded resources
pub struct LifecycleLoader {
    bus: Arc<MessageBus>,
    host: Arc<dyn FrameHost>,
    settings: LoaderSettings,
}

impl LifecycleLoader {
    pub fn new(bus: Arc<MessageBus>, host: Arc<dyn FrameHost>, settings: LoaderSettings) -> Self {
        Self { bus, host, settings }
    }

    pub fn settings(&self) -> LoaderSettings {
        self.settings
    }

    /// Loads the instance's resource. Concurrent callers share one load.
    pub async fn load_app(&self, instance: &AppInstance) -> FrameResult<()> {
        match instance.begin_load()? {
            BeginLoad::AlreadyLoaded => return Ok(()),
            BeginLoad::InFlight => {
                debug!("Joining in-flight load of {}", instance.name());
                return instance.wait_loaded().await;
            }
            BeginLoad::Started => {}
        }

        info!("Loading app {} from {}", instance.name(), instance.descriptor().url);
        match self.create_and_wait(instance).await {
            Ok(()) => {
                instance.transition(AppStatus::Loaded)?;
                info!("App {} loaded", instance.name());
                Ok(())
            }
            Err(err) => {
                warn!("Loading app {} failed: {}", instance.name(), err);
                instance.fail(err.clone());
                if let Some(resource) = instance.take_resource() {
                    remove_quietly(instance.name(), resource.as_ref());
                }
                Err(err)
            }
        }
    }

    /// Unmounts the instance. Cached instances are only hidden.
    pub async fn unmount_app(&self, instance: &AppInstance) -> FrameResult<()> {
        if instance.descriptor().cache {
            debug!("App {} is cached, hiding instead of unmounting", instance.name());
            self.hide_app(instance);
            return Ok(());
        }
        self.teardown(instance).await
    }

    /// Real teardown of a cached instance, the only way it returns to `NOT_LOADED`.
    pub async fn destroy_cache(&self, instance: &AppInstance) -> FrameResult<()> {
        self.teardown(instance).await
    }

    pub fn show_app(&self, instance: &AppInstance) {
        if let Some(resource) = instance.resource() {
            resource.set_visible(true);
        }
    }

    pub fn hide_app(&self, instance: &AppInstance) {
        if let Some(resource) = instance.resource() {
            resource.set_visible(false);
        }
    }

    async fn create_and_wait(&self, instance: &AppInstance) -> FrameResult<()> {
        let descriptor = instance.descriptor();
        validate_url(&descriptor.name, &descriptor.url)?;

        let container = descriptor.container.as_deref();
        if !self.host.has_container(container) {
            return Err(FrameError::MissingContainer {
                name: descriptor.name.clone(),
                selector: descriptor.container.clone(),
            });
        }

        let created = self.host.create_frame(FrameSpec {
            name: &descriptor.name,
            url: &descriptor.url,
            container,
        })?;
        instance.attach_resource(created.handle);

        let after = self.settings.load_timeout;
        let signal = tokio::time::timeout(after, created.ready)
            .await
            .map_err(|_| FrameError::LoadTimeout {
                name: descriptor.name.clone(),
                after,
            })?;

        match signal {
            Ok(LoadSignal::Ready) => Ok(()),
            Ok(LoadSignal::Loaded) => {
                tokio::time::sleep(self.settings.settle_delay).await;
                Ok(())
            }
            Ok(LoadSignal::Failed(reason)) => Err(FrameError::LoadFailure {
                name: descriptor.name.clone(),
                reason,
            }),
            Err(_) => Err(FrameError::LoadFailure {
                name: descriptor.name.clone(),
                reason: "resource dropped before signaling readiness".into(),
            }),
        }
    }

    async fn teardown(&self, instance: &AppInstance) -> FrameResult<()> {
        let Some(resource) = instance.resource() else {
            debug!("App {} has no resource to tear down", instance.name());
            instance.reset_mounted();
            // a failed load leaves nothing to remove, only the error to forget
            if instance.status() == AppStatus::Error {
                instance.clear_error();
                instance.transition(AppStatus::NotLoaded)?;
            }
            return Ok(());
        };

        let result = self.try_teardown(instance, resource.as_ref()).await;

        // the handle is cleared whatever happened above
        instance.take_resource();
        instance.reset_mounted();

        match result {
            Ok(()) => {
                instance.clear_error();
                instance.transition(AppStatus::NotLoaded)?;
                info!("App {} unmounted", instance.name());
                Ok(())
            }
            Err(err) => {
                warn!("Unmounting app {} failed: {}", instance.name(), err);
                remove_quietly(instance.name(), resource.as_ref());
                instance.fail(err.clone());
                Err(err)
            }
        }
    }

    async fn try_teardown(&self, instance: &AppInstance, resource: &dyn FrameHandle) -> FrameResult<()> {
        instance.transition(AppStatus::Unmounting)?;

        if let Err(e) = self.bus.send_unmount(instance.name()) {
            warn!("Failed to notify {} of unmount: {}", instance.name(), e);
        }
        tokio::time::sleep(self.settings.unmount_grace).await;

        resource.remove()
    }
}

#[async_trait]
impl AppLifecycle for LifecycleLoader {
    async fn load_app(&self, instance: &Arc<AppInstance>) -> FrameResult<()> {
        LifecycleLoader::load_app(self, instance).await
    }

    async fn unmount_app(&self, instance: &Arc<AppInstance>) -> FrameResult<()> {
        LifecycleLoader::unmount_app(self, instance).await
    }

    async fn destroy_cache(&self, instance: &Arc<AppInstance>) -> FrameResult<()> {
        LifecycleLoader::destroy_cache(self, instance).await
    }

    fn show_app(&self, instance: &AppInstance) {
        LifecycleLoader::show_app(self, instance)
    }

    fn hide_app(&self, instance: &AppInstance) {
        LifecycleLoader::hide_app(self, instance)
    }
}

fn validate_url(name: &str, url: &str) -> FrameResult<()> {
    let invalid = || FrameError::InvalidUrl {
        name: name.to_string(),
        url: url.to_string(),
    };
    if url.trim().is_empty() {
        return Err(invalid());
    }
    url.parse::<Uri>().map(|_| ()).map_err(|_| invalid())
}

fn remove_quietly(name: &str, resource: &dyn FrameHandle) {
    if let Err(e) = resource.remove() {
        debug!("Ignoring cleanup failure of {}: {}", name, e);
    }
}
