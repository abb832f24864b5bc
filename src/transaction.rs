use std::collections::HashMap;

use crate::dmx::{ChannelChange, ChannelId, ChannelValue, UniverseAddress};
use crate::universe::UniverseController;

/// A short-lived, single-owner handle batching reads and writes across
/// one or more universes, committed atomically per universe.
pub struct ControllerTransaction<'a> {
    controllers: HashMap<UniverseAddress, &'a UniverseController>,
    pending: HashMap<(UniverseAddress, ChannelId), ChannelChange>,
    committed: bool,
}

impl<'a> ControllerTransaction<'a> {
    pub fn open(controllers: &'a [UniverseController]) -> ControllerTransaction<'a> {
        ControllerTransaction {
            controllers: controllers.iter().map(|c| (c.address(), c)).collect(),
            pending: HashMap::new(),
            committed: false,
        }
    }

    /// Whether `universe` was included when this transaction was opened.
    pub fn has_universe(&self, universe: UniverseAddress) -> bool {
        self.controllers.contains_key(&universe)
    }

    /// Pending-in-transaction value if written, else the committed value.
    pub fn read(&self, universe: UniverseAddress, channel: ChannelId) -> ChannelValue {
        if let Some(change) = self.pending.get(&(universe, channel)) {
            return change.target;
        }
        self.controllers
            .get(&universe)
            .map_or(0, |c| c.current_value(channel))
    }

    /// Records a change; does not reach the universe until `commit`.
    pub fn write(&mut self, universe: UniverseAddress, channel: ChannelId, change: ChannelChange) {
        self.pending.insert((universe, channel), change);
    }

    /// Issues one `schedule_batch` per universe with pending changes.
    /// A universe this transaction does not know about is silently
    /// skipped - there is nowhere to deliver the write.
    pub fn commit(mut self) {
        self.commit_mut();
    }

    fn commit_mut(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;

        let mut by_universe: HashMap<UniverseAddress, Vec<(ChannelId, ChannelChange)>> = HashMap::new();
        for ((universe, channel), change) in self.pending.drain() {
            by_universe.entry(universe).or_default().push((channel, change));
        }

        for (universe, changes) in by_universe {
            if let Some(controller) = self.controllers.get(&universe) {
                controller.schedule_batch(changes);
            }
        }
    }

    /// Drops pending writes without applying them.
    pub fn discard(mut self) {
        self.pending.clear();
        self.committed = true;
    }
}

impl<'a> Drop for ControllerTransaction<'a> {
    fn drop(&mut self) {
        // Scoped acquisition with guaranteed release: any exit path that
        // did not explicitly commit or discard ends up discarding.
        if !self.committed {
            self.pending.clear();
        }
    }
}
