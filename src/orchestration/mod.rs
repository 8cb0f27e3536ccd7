//! Host orchestration layer
//!
//! Navigation observation, route-driven activation of applications and the
//! [`MicroFrame`] facade tying them to the registry and the bus.

pub mod host;
pub mod navigation;
pub mod router;

pub use host::MicroFrame;
pub use navigation::{MemoryHistory, NavigationEvent, NavigationKind, NavigationObserver};
pub use router::{RouteChange, RouteChangeCause, RouteOrchestrator, RoutingMode};
