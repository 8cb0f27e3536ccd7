//! Micro-frontend orchestration for applications rendered in isolated frames.
//!
//! The host side activates applications by route, drives their lifecycle and
//! keeps the address bar in step with their internal navigation. The embedded
//! side mirrors routes and lifecycle hooks inside each application.

pub mod config;
pub mod core;
pub mod embedded;
pub mod logging;
pub mod message;
pub mod orchestration;
pub mod utils;

#[cfg(test)]
mod testing;

pub use crate::core::{FrameError, FrameResult};
pub use embedded::EmbeddedApp;
pub use orchestration::MicroFrame;
