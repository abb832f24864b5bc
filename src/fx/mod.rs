mod distribution;
mod effect;
mod engine;
mod error;
mod target;

pub use distribution::{CustomDistribution, DistributionStrategy};
pub use effect::{effect_catalog, Effect, EffectDescriptor, EffectOutput, ParamType};
pub use engine::{spawn_fx_engine, BlendMode, FxEngine, FxInstance, FxInstanceId, FxInstanceSummary, FxTiming};
pub use error::FxError;
pub use target::FxTarget;
