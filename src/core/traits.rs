//! Core traits for microframe components
//!
//! These are the seams between the engine and its environment: the message
//! channel, the element tree frames are created in, and the session history.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

use super::{error::FrameResult, instance::AppInstance};
use crate::utils::path::Location;

/// Identifies one connected port on a transport.
pub type PortId = u64;

/// Receiving side of a transport connection.
pub struct TransportPort {
    pub id: PortId,
    pub receiver: UnboundedReceiver<Value>,
}

/// One-way postable message channel shared by a host and its embedded contexts.
///
/// Messages are delivered to every connected port, the sender's own port
/// included. Receivers filter purely on envelope tags.
pub trait Transport: Send + Sync {
    /// Posts a raw JSON message to every connected port.
    fn post(&self, message: Value) -> FrameResult<()>;

    /// Opens a new receiving port.
    fn connect(&self) -> TransportPort;

    /// Closes a port; later messages are no longer delivered to it.
    fn disconnect(&self, id: PortId);
}

/// Readiness signal raised by an embedded resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSignal {
    /// Raw "loaded" event; the embedded bus may still be initializing.
    Loaded,
    /// Explicit handshake from the embedded side; no settle delay needed.
    Ready,
    /// The resource failed to load.
    Failed(String),
}

/// What the loader asks the frame host to create.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec<'a> {
    pub name: &'a str,
    pub url: &'a str,
    pub container: Option<&'a str>,
}

/// A freshly created embedded resource and its readiness signal.
pub struct CreatedFrame {
    pub handle: Arc<dyn FrameHandle>,
    pub ready: oneshot::Receiver<LoadSignal>,
}

/// Handle to an embedded resource placed in the host's layout tree.
pub trait FrameHandle: Send + Sync + fmt::Debug {
    fn set_visible(&self, visible: bool);

    /// Detaches the resource from the layout tree.
    fn remove(&self) -> FrameResult<()>;
}

/// Creates embedded resources inside the host document.
pub trait FrameHost: Send + Sync {
    /// Whether the container addressed by `selector` (or the default one) exists.
    fn has_container(&self, selector: Option<&str>) -> bool;

    fn create_frame(&self, spec: FrameSpec<'_>) -> FrameResult<CreatedFrame>;
}

/// Session history of one browsing context.
pub trait History: Send + Sync {
    fn location(&self) -> Location;

    /// State object of the current entry.
    fn state(&self) -> Option<Value>;

    fn push_state(&self, state: Option<Value>, url: &str);

    fn replace_state(&self, state: Option<Value>, url: &str);

    /// Moves through the history; `false` when the target entry does not exist.
    fn go(&self, delta: i32) -> bool;
}

/// Lifecycle operations the route orchestrator drives.
#[async_trait]
pub trait AppLifecycle: Send + Sync {
    async fn load_app(&self, instance: &Arc<AppInstance>) -> FrameResult<()>;

    async fn unmount_app(&self, instance: &Arc<AppInstance>) -> FrameResult<()>;

    async fn destroy_cache(&self, instance: &Arc<AppInstance>) -> FrameResult<()>;

    fn show_app(&self, instance: &AppInstance);

    fn hide_app(&self, instance: &AppInstance);
}
