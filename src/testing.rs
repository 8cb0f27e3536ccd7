//! Test doubles for the environment seams.

use std::sync::{Arc, Mutex};

use dashmap::{DashMap, DashSet};
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    core::{
        error::{FrameError, FrameResult},
        traits::{CreatedFrame, FrameHandle, FrameHost, FrameSpec, LoadSignal, Transport},
    },
    message::envelope::Envelope,
};

/// How a fake frame signals readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyMode {
    Loaded,
    Ready,
    Never,
    Fail(String),
}

#[derive(Default)]
struct Recorded {
    modes: DashMap<String, ReadyMode>,
    created: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    visible: DashMap<String, bool>,
    failing_removal: DashSet<String>,
    // kept alive so frames in `Never` mode stay silent instead of failing
    silent: Mutex<Vec<oneshot::Sender<LoadSignal>>>,
}

/// Frame host that records what the loader does to it.
#[derive(Default)]
pub struct FakeFrameHost {
    inner: Arc<Recorded>,
}

impl FakeFrameHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, name: &str, mode: ReadyMode) {
        self.inner.modes.insert(name.to_string(), mode);
    }

    pub fn fail_removal(&self, name: &str) {
        self.inner.failing_removal.insert(name.to_string());
    }

    pub fn allow_removal(&self, name: &str) {
        self.inner.failing_removal.remove(name);
    }

    pub fn created(&self) -> Vec<String> {
        self.inner.created.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.inner.removed.lock().unwrap().clone()
    }

    pub fn visible(&self, name: &str) -> Option<bool> {
        self.inner.visible.get(name).map(|v| *v)
    }
}

impl FrameHost for FakeFrameHost {
    fn has_container(&self, selector: Option<&str>) -> bool {
        selector != Some("#missing")
    }

    fn create_frame(&self, spec: FrameSpec<'_>) -> FrameResult<CreatedFrame> {
        let name = spec.name.to_string();
        self.inner.created.lock().unwrap().push(name.clone());
        self.inner.visible.insert(name.clone(), false);

        let (tx, ready) = oneshot::channel();
        let mode = self
            .inner
            .modes
            .get(&name)
            .map(|m| m.clone())
            .unwrap_or(ReadyMode::Loaded);
        match mode {
            ReadyMode::Loaded => {
                let _ = tx.send(LoadSignal::Loaded);
            }
            ReadyMode::Ready => {
                let _ = tx.send(LoadSignal::Ready);
            }
            ReadyMode::Fail(reason) => {
                let _ = tx.send(LoadSignal::Failed(reason));
            }
            ReadyMode::Never => self.inner.silent.lock().unwrap().push(tx),
        }

        Ok(CreatedFrame {
            handle: Arc::new(FakeFrame {
                name,
                inner: self.inner.clone(),
            }),
            ready,
        })
    }
}

struct FakeFrame {
    name: String,
    inner: Arc<Recorded>,
}

impl std::fmt::Debug for FakeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FakeFrame").field(&self.name).finish()
    }
}

impl FrameHandle for FakeFrame {
    fn set_visible(&self, visible: bool) {
        self.inner.visible.insert(self.name.clone(), visible);
    }

    fn remove(&self) -> FrameResult<()> {
        if self.inner.failing_removal.contains(&self.name) {
            return Err(FrameError::Internal(format!("frame {} is stuck", self.name)));
        }
        self.inner.removed.lock().unwrap().push(self.name.clone());
        self.inner.visible.remove(&self.name);
        Ok(())
    }
}

/// Records every well-formed envelope posted on `transport`, from either side.
pub fn spy(transport: &dyn Transport) -> (JoinHandle<()>, Arc<Mutex<Vec<Envelope>>>) {
    let mut port = transport.connect();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let task = tokio::spawn(async move {
        while let Some(raw) = port.receiver.recv().await {
            if let Some(envelope) = Envelope::decode(raw) {
                sink.lock().unwrap().push(envelope);
            }
        }
    });
    (task, seen)
}
