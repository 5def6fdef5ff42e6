use conduit_wire::{Payload, RemoteError, WireError};
use thiserror::Error;

/// Failures surfaced by channel calls and endpoint plumbing.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The caller's cancellation token fired before a response was accepted.
    #[error("request was canceled")]
    Canceled,
    /// The remote service failed with a structured error.
    #[error(transparent)]
    Remote(RemoteError),
    /// The remote service rejected with an arbitrary payload.
    #[error("remote call rejected with a raw payload")]
    Rejected(Payload),
    /// The endpoint was disposed, or the transport closed, before the
    /// operation could settle.
    #[error("ipc endpoint disposed")]
    Disposed,
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl IpcError {
    /// Structured error for a command a service does not implement.
    pub fn unknown_command(command: &str) -> Self {
        IpcError::Remote(RemoteError::new("Unknown command", format!("Command '{command}' not found")))
    }

    /// Structured error for an event a service does not implement.
    pub fn unknown_event(event: &str) -> Self {
        IpcError::Remote(RemoteError::new("Unknown event", format!("Event '{event}' not found")))
    }
}
