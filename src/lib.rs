//! # nestor debugger session layer
//!
//! Keeps one WebSocket connection to the nestor emulator's debugger endpoint
//! and fans its events out to UI listeners.
//!
//! ## Example
//!
//! ```no_run
//! use nestor_ws::{CpuCommand, PageLocation, Request, SessionConfig, SessionContext};
//!
//! # async fn run() -> nestor_ws::Result<()> {
//! let context = SessionContext::new(SessionConfig::from_env());
//! let session = context.acquire(&PageLocation::default())?;
//!
//! let _sub = session.connection().on_state(|state| {
//!     println!("cpu {:?} at ${:04X}", state.status, state.pc);
//! });
//!
//! let mut ready = session.ready();
//! ready.wait_for(|open| *open).await.ok();
//! session.connection().send(&Request::SetCpuState(CpuCommand::Pause))?;
//! # Ok(())
//! # }
//! ```
pub mod error;
pub mod session;
pub mod ws;

pub use error::{Error, Result};
pub use session::*;
pub use ws::*;
