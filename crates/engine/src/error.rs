//! Error types surfaced to the engine's caller
//!
//! Connection drops and resync failures are handled internally and never
//! reach this type; only failures the UI must react to are represented.

use deskline_shared::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The REST write was rejected; the optimistic placeholder has already
    /// been rolled back and the caller may offer a retry.
    #[error("send failed: {0}")]
    SendFailed(#[source] TransportError),

    /// A non-recoverable transport failure during an explicit caller
    /// operation (e.g. the initial session seed).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
