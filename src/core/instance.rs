//! Runtime record of one registered application
//!
//! Status changes are restricted to crate-internal transition methods, which
//! only the lifecycle loader drives.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{
    descriptor::AppDescriptor,
    error::{FrameError, FrameResult},
    traits::FrameHandle,
};

/// Lifecycle status of an application's embedded resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStatus {
    NotLoaded,
    Loading,
    Loaded,
    Unmounting,
    Error,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::NotLoaded => "NOT_LOADED",
            AppStatus::Loading => "LOADING",
            AppStatus::Loaded => "LOADED",
            AppStatus::Unmounting => "UNMOUNTING",
            AppStatus::Error => "ERROR",
        }
    }

    /// Edges of the lifecycle state machine.
    pub fn can_transition_to(self, to: AppStatus) -> bool {
        use AppStatus::*;
        matches!(
            (self, to),
            (NotLoaded, Loading)
                | (Error, Loading)
                | (Error, NotLoaded)
                | (Loading, Loaded)
                | (Loading, Error)
                | (Loaded, Unmounting)
                | (Unmounting, NotLoaded)
                | (Unmounting, Error)
        )
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of trying to start a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeginLoad {
    AlreadyLoaded,
    InFlight,
    Started,
}

#[derive(Default)]
struct InstanceState {
    resource: Option<Arc<dyn FrameHandle>>,
    error: Option<FrameError>,
    has_mounted_before: bool,
}

/// Mutable runtime record owned by the registry, one per descriptor.
pub struct AppInstance {
    descriptor: Arc<AppDescriptor>,
    seq: u64,
    status: watch::Sender<AppStatus>,
    state: Mutex<InstanceState>,
}

impl AppInstance {
    pub(crate) fn new(descriptor: AppDescriptor, seq: u64) -> Self {
        let (status, _) = watch::channel(AppStatus::NotLoaded);
        Self {
            descriptor: Arc::new(descriptor),
            seq,
            status,
            state: Mutex::new(InstanceState::default()),
        }
    }

    pub fn descriptor(&self) -> &AppDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Registration sequence number, used to keep match results stable.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn status(&self) -> AppStatus {
        *self.status.borrow()
    }

    /// Watches status changes, e.g. to wait for a load started elsewhere.
    pub fn subscribe_status(&self) -> watch::Receiver<AppStatus> {
        self.status.subscribe()
    }

    pub fn error(&self) -> Option<FrameError> {
        self.lock().error.clone()
    }

    pub fn has_resource(&self) -> bool {
        self.lock().resource.is_some()
    }

    pub fn has_mounted_before(&self) -> bool {
        self.lock().has_mounted_before
    }

    pub(crate) fn resource(&self) -> Option<Arc<dyn FrameHandle>> {
        self.lock().resource.clone()
    }

    /// Atomically decides whether the caller starts a load, joins one, or has nothing to do.
    pub(crate) fn begin_load(&self) -> FrameResult<BeginLoad> {
        let mut state = self.lock();
        match self.status() {
            AppStatus::Loaded => Ok(BeginLoad::AlreadyLoaded),
            AppStatus::Loading => Ok(BeginLoad::InFlight),
            AppStatus::Error => {
                state.error = None;
                self.set_status(AppStatus::Loading, &state)?;
                Ok(BeginLoad::Started)
            }
            _ => {
                self.set_status(AppStatus::Loading, &state)?;
                Ok(BeginLoad::Started)
            }
        }
    }

    /// Waits for an in-flight load to settle.
    pub(crate) async fn wait_loaded(&self) -> FrameResult<()> {
        let mut rx = self.status.subscribe();
        let settled = rx
            .wait_for(|status| *status != AppStatus::Loading)
            .await
            .map(|status| *status)
            .map_err(|_| FrameError::Internal(format!("status channel of {} closed", self.name())))?;

        match settled {
            AppStatus::Loaded => Ok(()),
            _ => Err(self.error().unwrap_or_else(|| FrameError::LoadFailure {
                name: self.name().to_string(),
                reason: format!("load ended in {settled}"),
            })),
        }
    }

    pub(crate) fn transition(&self, to: AppStatus) -> FrameResult<()> {
        let state = self.lock();
        self.set_status(to, &state)
    }

    /// Records `error` and moves to `ERROR` when the state machine allows it.
    pub(crate) fn fail(&self, error: FrameError) {
        let mut state = self.lock();
        state.error = Some(error);
        if self.status().can_transition_to(AppStatus::Error) {
            self.status.send_replace(AppStatus::Error);
        }
    }

    pub(crate) fn clear_error(&self) {
        self.lock().error = None;
    }

    pub(crate) fn attach_resource(&self, resource: Arc<dyn FrameHandle>) {
        self.lock().resource = Some(resource);
    }

    pub(crate) fn take_resource(&self) -> Option<Arc<dyn FrameHandle>> {
        self.lock().resource.take()
    }

    pub(crate) fn mark_mounted(&self) {
        self.lock().has_mounted_before = true;
    }

    pub(crate) fn reset_mounted(&self) {
        self.lock().has_mounted_before = false;
    }

    // The state guard is taken by reference to make sure callers hold the lock.
    fn set_status(&self, to: AppStatus, _state: &MutexGuard<'_, InstanceState>) -> FrameResult<()> {
        let from = self.status();
        if !from.can_transition_to(to) {
            return Err(FrameError::InvalidTransition {
                name: self.name().to_string(),
                from,
                to,
            });
        }
        log::debug!("App {} status {} -> {}", self.name(), from, to);
        self.status.send_replace(to);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for AppInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppInstance")
            .field("name", &self.name())
            .field("status", &self.status())
            .field("has_resource", &self.has_resource())
            .field("has_mounted_before", &self.has_mounted_before())
            .finish()
    }
}
