//! Core abstractions for microframe
//!
//! Application descriptors and instances, the registry, the lifecycle loader
//! and the traits behind which the host environment is reached.

pub mod descriptor;
pub mod error;
pub mod instance;
pub mod loader;
pub mod registry;
pub mod subscription;
pub mod traits;

// Re-export commonly used types
pub use descriptor::{AppDescriptor, Meta, RouteMatch};
pub use error::{FrameError, FrameResult};
pub use instance::{AppInstance, AppStatus};
pub use loader::{LifecycleLoader, LoaderSettings};
pub use registry::AppRegistry;
pub use subscription::Subscription;
pub use traits::*;
