//! Envelope Codec
//!
//! Every frame exchanged with the emulator, in both directions, is a JSON text
//! frame shaped `{"event": ..., "data": ...}`. The codec only checks that the
//! frame is well-formed JSON of that shape; what `data` means is decided by the
//! `event` discriminant, resolved into typed values at the edge.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Event name of the emulator's state report.
pub const STATE_EVENT: &str = "state";

/// A single `{event, data}` message.
///
/// The event name is fixed at construction; `data` is kept as raw JSON until a
/// collaborator asks for a concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    event: String,
    data: T,
}

impl<T> Envelope<T> {
    pub fn new(event: impl Into<String>, data: T) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

impl Envelope<Value> {
    /// Deserialize the payload into the type implied by the event name.
    pub fn data_as<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Serialize an outbound message into a single text frame.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Parse an inbound text frame.
pub fn decode(text: &str) -> Result<Envelope> {
    Ok(serde_json::from_str(text)?)
}

/// Execution status reported by the emulator's CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuStatus {
    Running,
    Paused,
    Stepping,
}

/// Payload of the `state` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    pub status: CpuStatus,
    pub pc: u16,
}

/// Requested CPU transition, payload of `set-cpu-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuCommand {
    Run,
    Pause,
    Step,
}

/// Debugger -> emulator requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Request {
    SetCpuState(CpuCommand),
}

/// Emulator -> debugger responses, resolved from a raw envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    State(StateData),
    /// An event this layer has no typed payload for.
    Other(Envelope),
}

impl TryFrom<&Envelope> for Response {
    type Error = crate::Error;

    fn try_from(envelope: &Envelope) -> Result<Self> {
        match envelope.event() {
            STATE_EVENT => Ok(Response::State(envelope.data_as()?)),
            _ => Ok(Response::Other(envelope.clone())),
        }
    }
}
