use crate::dmx::{ChannelId, UniverseAddress};

/// What an FX instance writes into. Fixture-model channel layout (which
/// physical channel numbers a "slider" or "colour" corresponds to on a
/// given fixture) is out of core scope - this is already resolved to
/// concrete universe/channel addresses by the (out-of-scope) fixture
/// catalog before an `FxTarget` reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FxTarget {
    Slider { universe: UniverseAddress, channel: ChannelId },
    Colour { universe: UniverseAddress, r: ChannelId, g: ChannelId, b: ChannelId },
    PanTilt { universe: UniverseAddress, pan: ChannelId, tilt: ChannelId },
    Group(Vec<FxTarget>),
}

impl FxTarget {
    /// Flattens a (possibly nested) group into its leaf targets, in order.
    /// A non-group target expands to itself as a single-member group.
    pub fn members(&self) -> Vec<FxTarget> {
        match self {
            FxTarget::Group(members) => members.iter().flat_map(FxTarget::members).collect(),
            leaf => vec![leaf.clone()],
        }
    }

    /// Universes this target (or any of its group members) writes into.
    pub fn universes(&self) -> Vec<UniverseAddress> {
        let mut out = Vec::new();
        for member in self.members() {
            let universe = match member {
                FxTarget::Slider { universe, .. } => universe,
                FxTarget::Colour { universe, .. } => universe,
                FxTarget::PanTilt { universe, .. } => universe,
                FxTarget::Group(_) => continue,
            };
            if !out.contains(&universe) {
                out.push(universe);
            }
        }
        out
    }
}
