//! Application registry
//!
//! Catalog of descriptors and the only place route matches are evaluated.
//! The registry has no lifecycle knowledge: unregistering a live application
//! is the caller's responsibility.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info, warn};

use super::{
    descriptor::AppDescriptor,
    error::{FrameError, FrameResult},
    instance::AppInstance,
};

/// Centralized registry for all embedded applications
#[derive(Default)]
pub struct AppRegistry {
    apps: DashMap<String, Arc<AppInstance>>,
    next_seq: AtomicU64,
}

impl AppRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, creating its instance in `NOT_LOADED`
    pub fn register(&self, descriptor: AppDescriptor) -> FrameResult<Arc<AppInstance>> {
        match self.apps.entry(descriptor.name.clone()) {
            Entry::Occupied(_) => {
                warn!("App {} is already registered", descriptor.name);
                Err(FrameError::DuplicateName(descriptor.name))
            }
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Registering app {} ({} match)",
                    descriptor.name,
                    descriptor.route_match.kind()
                );
                let instance = Arc::new(AppInstance::new(descriptor, seq));
                slot.insert(instance.clone());
                Ok(instance)
            }
        }
    }

    /// Remove an instance unconditionally
    pub fn unregister(&self, name: &str) -> Option<Arc<AppInstance>> {
        debug!("Unregistering app {}", name);
        self.apps.remove(name).map(|(_, app)| app)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<AppInstance>> {
        self.apps.get(name).map(|entry| entry.value().clone())
    }

    /// All instances in registration order
    pub fn list(&self) -> Vec<Arc<AppInstance>> {
        let mut apps: Vec<_> = self.apps.iter().map(|entry| entry.value().clone()).collect();
        apps.sort_by_key(|app| app.seq());
        apps
    }

    /// Every instance whose route match accepts `path`, in registration order
    pub fn match_apps(&self, path: &str) -> Vec<Arc<AppInstance>> {
        let mut matched: Vec<_> = self
            .apps
            .iter()
            .filter(|entry| entry.value().descriptor().route_match.matches(path))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by_key(|app| app.seq());
        matched
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
