use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::dmx::{ChannelId, ChannelValue, UniverseAddress};

pub type SceneId = i32;

/// A named snapshot of channel values across universes, as produced by a
/// "record scene" call. Persistence is an external collaborator's job;
/// this type only carries the in-memory shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scene {
    pub id: SceneId,
    pub captured_values: HashMap<UniverseAddress, HashMap<ChannelId, ChannelValue>>,
}

pub type SceneListener = Arc<dyn Fn(SceneId) + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    active_scenes: HashMap<SceneId, HashMap<UniverseAddress, HashMap<ChannelId, ChannelValue>>>,
    active_chases: HashSet<SceneId>,
    listeners: Vec<SceneListener>,
}

/// Tracks which recorded scenes are still "in force": a scene is active
/// from the moment it is recorded until any of its captured channels is
/// observed at a different emitted value.
#[derive(Clone, Default)]
pub struct SceneTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl SceneTracker {
    pub fn new() -> SceneTracker {
        SceneTracker::default()
    }

    pub fn subscribe(&self, listener: SceneListener) {
        self.state.write().unwrap().listeners.push(listener);
    }

    /// An empty snapshot removes the scene from the active set instead.
    pub fn record(&self, id: SceneId, captured: HashMap<UniverseAddress, HashMap<ChannelId, ChannelValue>>) {
        let mut state = self.state.write().unwrap();
        if captured.is_empty() {
            state.active_scenes.remove(&id);
        } else {
            state.active_scenes.insert(id, captured);
        }
    }

    pub fn is_active(&self, id: SceneId) -> bool {
        self.state.read().unwrap().active_scenes.contains_key(&id)
    }

    /// Chases are tracked separately; channel divergence never invalidates them.
    pub fn record_chase_start(&self, id: SceneId) {
        self.state.write().unwrap().active_chases.insert(id);
    }

    pub fn record_chase_stop(&self, id: SceneId) {
        self.state.write().unwrap().active_chases.remove(&id);
    }

    pub fn is_chase_active(&self, id: SceneId) -> bool {
        self.state.read().unwrap().active_chases.contains(&id)
    }

    /// Invalidates every active scene whose snapshot contains one of
    /// `changes` at a value different from what was just emitted.
    pub fn on_channels_changed(&self, universe: UniverseAddress, changes: &HashMap<ChannelId, ChannelValue>) {
        let invalidated = {
            let mut state = self.state.write().unwrap();
            let to_remove: Vec<SceneId> = state
                .active_scenes
                .iter()
                .filter(|(_, snapshot)| {
                    snapshot.get(&universe).is_some_and(|universe_snapshot| {
                        changes.iter().any(|(channel, emitted)| {
                            universe_snapshot.get(channel).is_some_and(|captured| captured != emitted)
                        })
                    })
                })
                .map(|(id, _)| *id)
                .collect();

            for id in &to_remove {
                state.active_scenes.remove(id);
            }
            to_remove
        };

        if invalidated.is_empty() {
            return;
        }
        let listeners = self.state.read().unwrap().listeners.clone();
        for id in invalidated {
            for listener in &listeners {
                listener(id);
            }
        }
    }
}
