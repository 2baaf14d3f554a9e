//! WebSocket Module
//!
//! Connection lifecycle, reconnection and listener dispatch for the
//! emulator's debugger socket. Nothing here knows about any UI toolkit.

pub mod bus;
pub mod connection;
pub mod envelope;
pub mod reconnect;
pub mod transport;

pub use bus::{EventBus, Listeners, Subscription};
pub use connection::{Connection, LifecycleState};
pub use envelope::{CpuCommand, CpuStatus, Envelope, Request, Response, StateData};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectPredicate};
pub use transport::{Outgoing, SocketEvent, SocketEvents, SocketHandle, Transport, WsTransport};
