use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::clock::{spawn_clock, MasterClock};
use crate::config::ShowConfig;
use crate::dmx::{ChannelChange, ChannelId, ChannelValue, UniverseAddress};
use crate::fx::{spawn_fx_engine, FxEngine};
use crate::scene::{Scene, SceneId, SceneTracker};
use crate::transaction::ControllerTransaction;
use crate::universe::{spawn_universe, TransportError, UniverseController, UniverseEvent, UniverseRuntimeConfig};

/// Application root. Owns one [`MasterClock`], one [`UniverseController`]
/// per configured universe, one [`FxEngine`], and one [`SceneTracker`].
pub struct Show {
    pub clock: MasterClock,
    pub fx: FxEngine,
    pub scenes: SceneTracker,
    controllers: HashMap<UniverseAddress, UniverseController>,
    cancel: CancellationToken,
}

impl Show {
    /// Spawns a sender task per configured universe, the clock, and the
    /// FX evaluator, then wires each universe's frame-emission events into
    /// the scene tracker so scene invalidation happens without polling.
    pub fn start(config: &ShowConfig) -> Result<Show, TransportError> {
        let cancel = CancellationToken::new();
        let mut controllers = HashMap::new();

        for universe in &config.universes {
            let runtime = UniverseRuntimeConfig {
                cadence_ms: config.cadence_ms,
                fade_step_ms: config.fade_step_ms,
                refresh_ms: config.refresh_ms_for(universe),
                max_consecutive_send_errors: config.max_consecutive_send_errors,
            };
            let controller = spawn_universe(universe.address, universe.transport, runtime, cancel.clone())?;
            controllers.insert(universe.address, controller);
        }

        let scenes = SceneTracker::new();
        for (&address, controller) in controllers.iter() {
            let scenes = scenes.clone();
            controller.subscribe(Arc::new(move |event| {
                if let UniverseEvent::FrameSent(diff) = event {
                    scenes.on_channels_changed(address, &diff);
                }
            }));
        }

        let clock = spawn_clock(config.initial_bpm, cancel.clone());
        let all_controllers: Vec<UniverseController> = controllers.values().cloned().collect();
        let fx = spawn_fx_engine(all_controllers, clock.subscribe(), cancel.clone());

        info!("show started with {} universe(s)", controllers.len());
        Ok(Show { clock, fx, scenes, controllers, cancel })
    }

    pub fn controller(&self, address: UniverseAddress) -> Option<&UniverseController> {
        self.controllers.get(&address)
    }

    fn all_controllers(&self) -> Vec<UniverseController> {
        self.controllers.values().cloned().collect()
    }

    pub fn set_channel(&self, universe: UniverseAddress, channel: ChannelId, change: ChannelChange) {
        let all = self.all_controllers();
        let mut txn = ControllerTransaction::open(&all);
        txn.write(universe, channel, change);
        txn.commit();
    }

    pub fn set_channels(&self, universe: UniverseAddress, changes: Vec<(ChannelId, ChannelChange)>) {
        let all = self.all_controllers();
        let mut txn = ControllerTransaction::open(&all);
        for (channel, change) in changes {
            txn.write(universe, channel, change);
        }
        txn.commit();
    }

    /// Captures the current value of each listed channel, registers the
    /// snapshot with the scene tracker, and returns the recorded [`Scene`].
    pub fn record_scene(&self, id: SceneId, channels: &[(UniverseAddress, ChannelId)]) -> Scene {
        let mut captured: HashMap<UniverseAddress, HashMap<ChannelId, ChannelValue>> = HashMap::new();
        for (universe, channel) in channels {
            if let Some(controller) = self.controllers.get(universe) {
                captured.entry(*universe).or_default().insert(*channel, controller.current_value(*channel));
            }
        }
        self.scenes.record(id, captured.clone());
        Scene { id, captured_values: captured }
    }

    /// Cancels every background task. Each universe sender flushes one
    /// final frame at its current state before terminating.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        info!("show stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::TransportMode;

    fn test_config() -> ShowConfig {
        ShowConfig {
            universes: vec![crate::config::UniverseConfig {
                address: UniverseAddress::new(0, 0).unwrap(),
                description: "test".to_string(),
                transport: TransportMode::Broadcast,
                needs_refresh: false,
            }],
            cadence_ms: 15,
            fade_step_ms: 5,
            refresh_ms: 1000,
            max_consecutive_send_errors: 20,
            initial_bpm: 120.0,
        }
    }

    #[tokio::test]
    async fn set_channel_reaches_the_universe() {
        let show = Show::start(&test_config()).unwrap();
        let addr = UniverseAddress::new(0, 0).unwrap();

        show.set_channel(addr, 1, ChannelChange::instant(200));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(show.controller(addr).unwrap().current_value(1), 200);
        show.shutdown().await;
    }

    #[tokio::test]
    async fn record_scene_captures_current_values_and_tracks_activity() {
        let show = Show::start(&test_config()).unwrap();
        let addr = UniverseAddress::new(0, 0).unwrap();

        show.set_channel(addr, 1, ChannelChange::instant(128));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let scene = show.record_scene(1, &[(addr, 1)]);
        assert_eq!(scene.captured_values[&addr][&1], 128);
        assert!(show.scenes.is_active(1));

        show.set_channel(addr, 1, ChannelChange::instant(200));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!show.scenes.is_active(1));

        show.shutdown().await;
    }

    #[tokio::test]
    async fn fx_engine_is_wired_to_the_show_s_universes() {
        let show = Show::start(&test_config()).unwrap();
        let addr = UniverseAddress::new(0, 0).unwrap();

        let instance = crate::fx::FxInstance::new(
            crate::fx::Effect::StaticValue(222),
            crate::fx::FxTarget::Slider { universe: addr, channel: 7 },
            crate::fx::FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            crate::fx::BlendMode::Override,
            crate::fx::DistributionStrategy::Linear,
        );
        show.fx.add(instance).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(show.controller(addr).unwrap().current_value(7), 222);

        show.shutdown().await;
    }
}
