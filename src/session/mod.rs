//! Session Module
//!
//! Configuration and the context that shares one connection between UI
//! consumers.

pub mod config;
mod context;

pub use config::{PageLocation, SessionConfig, Settings};
pub use context::{SessionContext, SessionHandle};
