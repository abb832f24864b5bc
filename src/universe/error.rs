use thiserror::Error;

use crate::dmx::UniverseAddress;

/// Errors surfaced by a [`super::UniverseController`]. Out-of-range
/// channel addressing is intentionally *not* an error here - it is
/// silently ignored so a misconfigured fixture never takes down the
/// output pipeline.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("universe {0}: failed to bind outbound socket")]
    BindFailed(UniverseAddress),

    #[error("universe {0}: transient send failure: {1}")]
    Transient(UniverseAddress, String),

    #[error("universe {0}: {1} consecutive send failures, sender stopped")]
    Fatal(UniverseAddress, usize),
}
