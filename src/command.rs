use log::info;
use tokio::sync::{mpsc, oneshot};

use crate::dmx::{ChannelChange, ChannelId, UniverseAddress};
use crate::fx::{FxError, FxInstance, FxInstanceId, FxInstanceSummary};
use crate::scene::{Scene, SceneId};
use crate::show::Show;

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Everything an external collaborator (the out-of-scope HTTP/WebSocket
/// layer, a script host, an operator console) can ask the show to do.
/// Carries no business logic itself; each variant is a thin dispatch
/// into a [`Show`] method.
pub enum ShowCommand {
    SetChannel {
        universe: UniverseAddress,
        channel: ChannelId,
        change: ChannelChange,
    },
    SetChannels {
        universe: UniverseAddress,
        changes: Vec<(ChannelId, ChannelChange)>,
    },
    RecordScene {
        id: SceneId,
        channels: Vec<(UniverseAddress, ChannelId)>,
        reply: oneshot::Sender<Scene>,
    },
    IsSceneActive {
        id: SceneId,
        reply: oneshot::Sender<bool>,
    },
    AddFx {
        instance: FxInstance,
        reply: oneshot::Sender<Result<FxInstanceId, FxError>>,
    },
    RemoveFx {
        id: FxInstanceId,
    },
    ListFx {
        reply: oneshot::Sender<Vec<FxInstanceSummary>>,
    },
    SetBpm {
        bpm: f64,
        reply: oneshot::Sender<f64>,
    },
    GetBpm {
        reply: oneshot::Sender<f64>,
    },
    TapTempo {
        reply: oneshot::Sender<f64>,
    },
    PauseClock,
    ResumeClock,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle onto the command channel. Every method either
/// fires-and-forgets (no reply needed) or awaits a oneshot reply.
#[derive(Clone)]
pub struct ShowHandle {
    cmd_tx: mpsc::Sender<ShowCommand>,
}

impl ShowHandle {
    pub fn set_channel(&self, universe: UniverseAddress, channel: ChannelId, change: ChannelChange) {
        let _ = self.cmd_tx.try_send(ShowCommand::SetChannel { universe, channel, change });
    }

    pub fn set_channels(&self, universe: UniverseAddress, changes: Vec<(ChannelId, ChannelChange)>) {
        let _ = self.cmd_tx.try_send(ShowCommand::SetChannels { universe, changes });
    }

    pub async fn record_scene(&self, id: SceneId, channels: Vec<(UniverseAddress, ChannelId)>) -> Scene {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::RecordScene { id, channels, reply: reply_tx }).await;
        reply_rx.await.unwrap_or_default()
    }

    pub async fn is_scene_active(&self, id: SceneId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::IsSceneActive { id, reply: reply_tx }).await;
        reply_rx.await.unwrap_or(false)
    }

    pub async fn add_fx(&self, instance: FxInstance) -> Result<FxInstanceId, FxError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::AddFx { instance, reply: reply_tx }).await;
        reply_rx.await.unwrap_or(Err(FxError::EffectParameterInvalid("show stopped".to_string())))
    }

    pub fn remove_fx(&self, id: FxInstanceId) {
        let _ = self.cmd_tx.try_send(ShowCommand::RemoveFx { id });
    }

    pub async fn list_fx(&self) -> Vec<FxInstanceSummary> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::ListFx { reply: reply_tx }).await;
        reply_rx.await.unwrap_or_default()
    }

    pub async fn set_bpm(&self, bpm: f64) -> f64 {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::SetBpm { bpm, reply: reply_tx }).await;
        reply_rx.await.unwrap_or(bpm)
    }

    pub async fn get_bpm(&self) -> f64 {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::GetBpm { reply: reply_tx }).await;
        reply_rx.await.unwrap_or(0.0)
    }

    pub async fn tap_tempo(&self) -> f64 {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::TapTempo { reply: reply_tx }).await;
        reply_rx.await.unwrap_or(0.0)
    }

    pub fn pause_clock(&self) {
        let _ = self.cmd_tx.try_send(ShowCommand::PauseClock);
    }

    pub fn resume_clock(&self) {
        let _ = self.cmd_tx.try_send(ShowCommand::ResumeClock);
    }

    /// Requests shutdown and waits for the show to finish tearing down.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(ShowCommand::Shutdown { reply: reply_tx }).await;
        let _ = reply_rx.await;
    }
}

/// Spawns the command-dispatch actor owning `show` and returns a handle.
/// The bounded channel applies backpressure to callers instead of letting
/// an unbounded queue of external commands grow without limit.
pub fn spawn_command_surface(show: Show) -> ShowHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    tokio::spawn(run(show, cmd_rx));
    ShowHandle { cmd_tx }
}

async fn run(show: Show, mut cmd_rx: mpsc::Receiver<ShowCommand>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ShowCommand::SetChannel { universe, channel, change } => {
                show.set_channel(universe, channel, change);
            }
            ShowCommand::SetChannels { universe, changes } => {
                show.set_channels(universe, changes);
            }
            ShowCommand::RecordScene { id, channels, reply } => {
                let scene = show.record_scene(id, &channels);
                let _ = reply.send(scene);
            }
            ShowCommand::IsSceneActive { id, reply } => {
                let _ = reply.send(show.scenes.is_active(id));
            }
            ShowCommand::AddFx { instance, reply } => {
                let result = show.fx.add(instance).await;
                let _ = reply.send(result);
            }
            ShowCommand::RemoveFx { id } => show.fx.remove(id),
            ShowCommand::ListFx { reply } => {
                let _ = reply.send(show.fx.list().await);
            }
            ShowCommand::SetBpm { bpm, reply } => {
                let _ = reply.send(show.clock.set_bpm(bpm).await);
            }
            ShowCommand::GetBpm { reply } => {
                let _ = reply.send(show.clock.get_bpm().await);
            }
            ShowCommand::TapTempo { reply } => {
                let _ = reply.send(show.clock.tap().await);
            }
            ShowCommand::PauseClock => show.clock.pause(),
            ShowCommand::ResumeClock => show.clock.resume(),
            ShowCommand::Shutdown { reply } => {
                info!("command surface: shutting down show");
                show.shutdown().await;
                let _ = reply.send(());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ShowConfig, UniverseConfig};
    use crate::fx::{BlendMode, DistributionStrategy, Effect, FxInstance, FxTarget, FxTiming};
    use crate::universe::TransportMode;
    use std::time::Duration;

    fn test_config() -> ShowConfig {
        ShowConfig {
            universes: vec![UniverseConfig {
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
    async fn set_channel_command_reaches_the_universe() {
        let show = Show::start(&test_config()).unwrap();
        let handle = spawn_command_surface(show);
        let addr = UniverseAddress::new(0, 0).unwrap();

        handle.set_channel(addr, 1, ChannelChange::instant(77));
        tokio::time::sleep(Duration::from_millis(40)).await;

        let scene = handle.record_scene(1, vec![(addr, 1)]).await;
        assert_eq!(scene.captured_values[&addr][&1], 77);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn add_fx_command_rejects_invalid_parameters() {
        let show = Show::start(&test_config()).unwrap();
        let handle = spawn_command_surface(show);
        let addr = UniverseAddress::new(0, 0).unwrap();

        let instance = FxInstance::new(
            Effect::Pulse { min: 0, max: 255, duty: 3.0 },
            FxTarget::Slider { universe: addr, channel: 1 },
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Override,
            DistributionStrategy::Linear,
        );

        let result = handle.add_fx(instance).await;
        assert!(matches!(result, Err(FxError::EffectParameterInvalid(_))));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn clock_commands_round_trip() {
        let show = Show::start(&test_config()).unwrap();
        let handle = spawn_command_surface(show);

        let applied = handle.set_bpm(140.0).await;
        assert_eq!(applied, 140.0);
        assert_eq!(handle.get_bpm().await, 140.0);

        handle.shutdown().await;
    }
}
