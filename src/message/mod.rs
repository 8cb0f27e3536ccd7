//! Cross-frame messaging: the envelope format, transports and the bus.

pub mod bus;
pub mod envelope;
pub mod transport;

pub use bus::{handler, MessageBus, MessageHandler, Topic};
pub use envelope::{Envelope, LifecycleProps, MessageBody, MessageKind, MessageSource};
pub use transport::LoopbackTransport;
