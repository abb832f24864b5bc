use thiserror::Error;

/// Errors surfaced by the [`super::engine::FxEngine`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FxError {
    #[error("effect parameter invalid: {0}")]
    EffectParameterInvalid(String),
}
