use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::clock::{ClockTick, MasterClock};
use crate::dmx::ChannelChange;
use crate::transaction::ControllerTransaction;
use crate::universe::UniverseController;

use super::distribution::DistributionStrategy;
use super::effect::{Effect, EffectOutput};
use super::error::FxError;
use super::target::FxTarget;

pub type FxInstanceId = u64;

/// How an effect's output combines with the channel's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Override,
    Additive,
    Multiply,
    Max,
    Min,
}

impl BlendMode {
    pub fn blend(&self, base: u8, effect: u8) -> u8 {
        match self {
            BlendMode::Override => effect,
            BlendMode::Additive => (base as u16 + effect as u16).min(255) as u8,
            BlendMode::Multiply => ((base as u16 * effect as u16) / 255) as u8,
            BlendMode::Max => base.max(effect),
            BlendMode::Min => base.min(effect),
        }
    }
}

/// `phase_offset` is a constant added to every member's phase, distinct
/// from the per-member offset a [`DistributionStrategy`] contributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FxTiming {
    pub beat_division: f64,
    pub phase_offset: f64,
}

/// A live, tempo-synchronized animation bound to a target.
#[derive(Debug, Clone)]
pub struct FxInstance {
    pub id: FxInstanceId,
    pub effect: Effect,
    pub target: FxTarget,
    pub timing: FxTiming,
    pub blend: BlendMode,
    pub distribution: DistributionStrategy,
    pub paused: bool,
    pub step_timing: bool,
}

impl FxInstance {
    /// `id` is assigned by the engine on `add`.
    pub fn new(
        effect: Effect,
        target: FxTarget,
        timing: FxTiming,
        blend: BlendMode,
        distribution: DistributionStrategy,
    ) -> FxInstance {
        let step_timing = effect.default_step_timing();
        FxInstance {
            id: 0,
            effect,
            target,
            timing,
            blend,
            distribution,
            paused: false,
            step_timing,
        }
    }

    pub fn with_step_timing(mut self, step_timing: bool) -> FxInstance {
        self.step_timing = step_timing;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FxInstanceSummary {
    pub id: FxInstanceId,
    pub target: FxTarget,
    pub paused: bool,
}

enum FxCommand {
    Add(FxInstance, oneshot::Sender<Result<FxInstanceId, FxError>>),
    Remove(FxInstanceId),
    Pause(FxInstanceId),
    Resume(FxInstanceId),
    Clear,
    ClearForTarget(FxTarget),
    List(oneshot::Sender<Vec<FxInstanceSummary>>),
}

/// Cheap, cloneable handle to the FX registry and evaluator. Mutation
/// commands and the clock-driven evaluation loop are serialized through
/// a single background task.
#[derive(Clone)]
pub struct FxEngine {
    cmd_tx: mpsc::UnboundedSender<FxCommand>,
}

impl FxEngine {
    /// Rejected if the effect's parameters are invalid; existing
    /// instances are unaffected.
    pub async fn add(&self, instance: FxInstance) -> Result<FxInstanceId, FxError> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(FxCommand::Add(instance, tx));
        rx.await.unwrap_or(Err(FxError::EffectParameterInvalid("engine stopped".to_string())))
    }

    pub fn remove(&self, id: FxInstanceId) {
        let _ = self.cmd_tx.send(FxCommand::Remove(id));
    }

    pub fn pause(&self, id: FxInstanceId) {
        let _ = self.cmd_tx.send(FxCommand::Pause(id));
    }

    pub fn resume(&self, id: FxInstanceId) {
        let _ = self.cmd_tx.send(FxCommand::Resume(id));
    }

    pub fn clear(&self) {
        let _ = self.cmd_tx.send(FxCommand::Clear);
    }

    pub fn clear_for_target(&self, target: FxTarget) {
        let _ = self.cmd_tx.send(FxCommand::ClearForTarget(target));
    }

    pub async fn list(&self) -> Vec<FxInstanceSummary> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(FxCommand::List(tx));
        rx.await.unwrap_or_default()
    }
}

/// Spawns the FX evaluator task. `controllers` is the full set of
/// universes FX instances may target.
pub fn spawn_fx_engine(
    controllers: Vec<UniverseController>,
    ticks: broadcast::Receiver<ClockTick>,
    cancel: CancellationToken,
) -> FxEngine {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let actor = FxEngineActor {
        controllers,
        instances: Vec::new(),
        next_id: 1,
    };

    tokio::spawn(actor.run(cmd_rx, ticks, cancel));

    FxEngine { cmd_tx }
}

struct FxEngineActor {
    controllers: Vec<UniverseController>,
    instances: Vec<FxInstance>,
    next_id: FxInstanceId,
}

impl FxEngineActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<FxCommand>,
        mut ticks: broadcast::Receiver<ClockTick>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                cmd = cmd_rx.recv() => match cmd {
                    None => break,
                    Some(cmd) => self.handle_command(cmd),
                },

                tick = ticks.recv() => match tick {
                    Ok(tick) => self.evaluate_tick(&tick),
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Evaluation fell behind; use the next tick that
                        // arrives rather than replaying missed ones.
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    fn handle_command(&mut self, cmd: FxCommand) {
        match cmd {
            FxCommand::Add(mut instance, reply) => {
                if let Err(e) = instance.effect.validate() {
                    let _ = reply.send(Err(FxError::EffectParameterInvalid(e)));
                    return;
                }
                let id = self.next_id;
                self.next_id += 1;
                instance.id = id;
                self.instances.push(instance);
                let _ = reply.send(Ok(id));
            }
            FxCommand::Remove(id) => self.instances.retain(|i| i.id != id),
            FxCommand::Pause(id) => {
                if let Some(i) = self.instances.iter_mut().find(|i| i.id == id) {
                    i.paused = true;
                }
            }
            FxCommand::Resume(id) => {
                if let Some(i) = self.instances.iter_mut().find(|i| i.id == id) {
                    i.paused = false;
                }
            }
            FxCommand::Clear => self.instances.clear(),
            FxCommand::ClearForTarget(target) => self.instances.retain(|i| i.target != target),
            FxCommand::List(reply) => {
                let summaries = self
                    .instances
                    .iter()
                    .map(|i| FxInstanceSummary { id: i.id, target: i.target.clone(), paused: i.paused })
                    .collect();
                let _ = reply.send(summaries);
            }
        }
    }

    fn evaluate_tick(&mut self, tick: &ClockTick) {
        let mut txn = ControllerTransaction::open(&self.controllers);

        for instance in self.instances.iter().filter(|i| !i.paused) {
            let universes = instance.target.universes();
            if universes.iter().any(|u| !txn.has_universe(*u)) {
                // GroupTargetMismatch: target references a universe this
                // transaction cannot reach. Skip for this tick only;
                // removal still requires an explicit `remove`/`clearForTarget`.
                continue;
            }

            let members = instance.target.members();
            let group_size = members.len();
            let slots = if instance.step_timing { instance.distribution.distinct_slots(group_size).max(1) } else { 1 };
            let effective_division = instance.timing.beat_division * slots as f64;
            let base_phase = MasterClock::phase_for_division(tick.tick_number, effective_division);
            // Which of the `slots` distinct offsets holds the stage right now.
            let active_slot = ((base_phase * slots as f64).floor() as usize).min(slots - 1);

            let offsets: Vec<f64> = (0..group_size)
                .map(|idx| {
                    let normalized_position = if group_size <= 1 { 0.0 } else { idx as f64 / (group_size - 1) as f64 };
                    instance.distribution.offset(idx, group_size, normalized_position)
                })
                .collect();
            // Distinct offsets, ranked ascending, so members land in slot
            // order even when a strategy's offsets (PingPong, Split) are
            // not evenly spaced across `[0,1)` by `1 / slots`.
            let mut ranked_offsets: Vec<f64> = Vec::new();
            if instance.step_timing {
                for &o in &offsets {
                    if !ranked_offsets.iter().any(|s: &f64| (s - o).abs() < 1e-9) {
                        ranked_offsets.push(o);
                    }
                }
                ranked_offsets.sort_by(|a, b| a.partial_cmp(b).unwrap());
            }

            for (member_index, member) in members.into_iter().enumerate() {
                let member_offset = offsets[member_index];

                if instance.step_timing {
                    let member_slot = ranked_offsets
                        .iter()
                        .position(|s| (s - member_offset).abs() < 1e-9)
                        .unwrap_or(0)
                        .min(slots - 1);
                    if member_slot != active_slot {
                        // Not this member's division yet; it rests rather
                        // than keep showing whatever its last active slot left behind.
                        if let Some(rest) = instance.effect.rest_output() {
                            write_through(&mut txn, &member, rest, instance.blend);
                        }
                        continue;
                    }
                    // Progress through this member's one-division window,
                    // so a continuous effect run with step_timing still animates in place.
                    let local_phase = (base_phase * slots as f64 - active_slot as f64).rem_euclid(1.0);
                    let phase = (local_phase + instance.timing.phase_offset).rem_euclid(1.0);
                    let output = instance.effect.evaluate(phase);
                    write_through(&mut txn, &member, output, instance.blend);
                } else {
                    let phase = (base_phase + member_offset + instance.timing.phase_offset).rem_euclid(1.0);
                    let output = instance.effect.evaluate(phase);
                    write_through(&mut txn, &member, output, instance.blend);
                }
            }
        }

        txn.commit();
    }
}

fn write_through(txn: &mut ControllerTransaction, target: &FxTarget, output: EffectOutput, blend: BlendMode) {
    match (target, output) {
        (FxTarget::Slider { universe, channel }, EffectOutput::Slider(v)) => {
            let base = txn.read(*universe, *channel);
            txn.write(*universe, *channel, ChannelChange::instant(blend.blend(base, v)));
        }
        (FxTarget::Colour { universe, r, g, b }, EffectOutput::Colour(c)) => {
            for (channel, v) in [(*r, c.r), (*g, c.g), (*b, c.b)] {
                let base = txn.read(*universe, channel);
                txn.write(*universe, channel, ChannelChange::instant(blend.blend(base, v)));
            }
        }
        (FxTarget::PanTilt { universe, pan, tilt }, EffectOutput::PanTilt(p, t)) => {
            for (channel, v) in [(*pan, p), (*tilt, t)] {
                let base = txn.read(*universe, channel);
                txn.write(*universe, channel, ChannelChange::instant(blend.blend(base, v)));
            }
        }
        // Category mismatch (e.g. a colour effect bound to a slider target)
        // or an unexpanded Group; nothing well-defined to write.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx::UniverseAddress;
    use crate::universe::{spawn_universe, TransportMode, UniverseRuntimeConfig};
    use std::time::Duration;

    #[test]
    fn max_and_min_blend_are_identity_when_equal_to_base() {
        assert_eq!(BlendMode::Max.blend(100, 100), 100);
        assert_eq!(BlendMode::Min.blend(100, 100), 100);
        assert_eq!(BlendMode::Max.blend(0, 0), 0);
        assert_eq!(BlendMode::Min.blend(255, 255), 255);
    }

    fn fast_runtime() -> UniverseRuntimeConfig {
        UniverseRuntimeConfig {
            cadence_ms: 10,
            fade_step_ms: 5,
            refresh_ms: None,
            max_consecutive_send_errors: 20,
        }
    }

    #[tokio::test]
    async fn add_rejects_invalid_effect_parameters() {
        let cancel = CancellationToken::new();
        let controller = spawn_universe(
            UniverseAddress::new(0, 0).unwrap(),
            TransportMode::Broadcast,
            fast_runtime(),
            cancel.clone(),
        )
        .unwrap();
        let (_tick_tx, tick_rx) = broadcast::channel(16);
        let engine = spawn_fx_engine(vec![controller], tick_rx, cancel.clone());

        let instance = FxInstance::new(
            Effect::Pulse { min: 0, max: 255, duty: 1.5 },
            FxTarget::Slider { universe: UniverseAddress::new(0, 0).unwrap(), channel: 1 },
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Override,
            DistributionStrategy::Linear,
        );

        let result = engine.add(instance).await;
        assert!(matches!(result, Err(FxError::EffectParameterInvalid(_))));
        assert!(engine.list().await.is_empty());

        cancel.cancel();
    }

    #[tokio::test]
    async fn static_value_override_writes_through_on_tick() {
        let cancel = CancellationToken::new();
        let addr = UniverseAddress::new(0, 0).unwrap();
        let controller = spawn_universe(addr, TransportMode::Broadcast, fast_runtime(), cancel.clone()).unwrap();
        let (tick_tx, tick_rx) = broadcast::channel(16);
        let engine = spawn_fx_engine(vec![controller.clone()], tick_rx, cancel.clone());

        let instance = FxInstance::new(
            Effect::StaticValue(200),
            FxTarget::Slider { universe: addr, channel: 5 },
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Override,
            DistributionStrategy::Linear,
        );
        engine.add(instance).await.unwrap();

        tick_tx.send(ClockTick { tick_number: 0, beat_number: 0, tick_in_beat: 0, phase_in_beat: 0.0, timestamp_ms: 0 }).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.current_value(5), 200);

        cancel.cancel();
    }

    #[tokio::test]
    async fn additive_then_max_blend_composes_to_base_plus() {
        let cancel = CancellationToken::new();
        let addr = UniverseAddress::new(0, 0).unwrap();
        let controller = spawn_universe(addr, TransportMode::Broadcast, fast_runtime(), cancel.clone()).unwrap();
        controller.schedule_change(1, ChannelChange::instant(100));
        tokio::time::sleep(Duration::from_millis(15)).await;

        let (tick_tx, tick_rx) = broadcast::channel(16);
        let engine = spawn_fx_engine(vec![controller.clone()], tick_rx, cancel.clone());

        let a = FxInstance::new(
            Effect::StaticValue(50),
            FxTarget::Slider { universe: addr, channel: 1 },
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Additive,
            DistributionStrategy::Linear,
        );
        let b = FxInstance::new(
            Effect::StaticValue(200),
            FxTarget::Slider { universe: addr, channel: 1 },
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Max,
            DistributionStrategy::Linear,
        );
        engine.add(a).await.unwrap();
        engine.add(b).await.unwrap();

        tick_tx.send(ClockTick { tick_number: 0, beat_number: 0, tick_in_beat: 0, phase_in_beat: 0.0, timestamp_ms: 0 }).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // base=100, A: Additive(50) -> 150, B: Max(200) -> 200
        assert_eq!(controller.current_value(1), 200);

        cancel.cancel();
    }

    #[tokio::test]
    async fn tempo_step_chase_lights_one_member_at_a_time() {
        let cancel = CancellationToken::new();
        let addr = UniverseAddress::new(0, 0).unwrap();
        let controller = spawn_universe(addr, TransportMode::Broadcast, fast_runtime(), cancel.clone()).unwrap();
        let (tick_tx, tick_rx) = broadcast::channel(64);
        let engine = spawn_fx_engine(vec![controller.clone()], tick_rx, cancel.clone());

        let group = FxTarget::Group(vec![
            FxTarget::Slider { universe: addr, channel: 1 },
            FxTarget::Slider { universe: addr, channel: 2 },
            FxTarget::Slider { universe: addr, channel: 3 },
            FxTarget::Slider { universe: addr, channel: 4 },
        ]);
        let instance = FxInstance::new(
            Effect::StaticValue(200),
            group,
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Override,
            DistributionStrategy::Linear,
        );
        engine.add(instance).await.unwrap();

        // effective_division = 1 beat * 4 distinct slots = 4 beats = 96 ticks.
        // tick 0 -> member 0 lit; tick 24 -> member 1 lit; etc.
        for (tick_number, expected_channel) in [(0u64, 1u16), (24, 2), (48, 3), (72, 4)] {
            tick_tx
                .send(ClockTick {
                    tick_number,
                    beat_number: tick_number / 24,
                    tick_in_beat: 0,
                    phase_in_beat: 0.0,
                    timestamp_ms: 0,
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;

            for channel in 1..=4u16 {
                let value = controller.current_value(channel);
                if channel == expected_channel {
                    assert_eq!(value, 200, "tick {tick_number}: channel {channel} should be lit");
                } else {
                    assert_eq!(value, 0, "tick {tick_number}: channel {channel} should be dark");
                }
            }
        }

        cancel.cancel();
    }

    #[tokio::test]
    async fn remove_stops_future_writes() {
        let cancel = CancellationToken::new();
        let addr = UniverseAddress::new(0, 0).unwrap();
        let controller = spawn_universe(addr, TransportMode::Broadcast, fast_runtime(), cancel.clone()).unwrap();
        let (tick_tx, tick_rx) = broadcast::channel(16);
        let engine = spawn_fx_engine(vec![controller.clone()], tick_rx, cancel.clone());

        let instance = FxInstance::new(
            Effect::StaticValue(150),
            FxTarget::Slider { universe: addr, channel: 9 },
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Override,
            DistributionStrategy::Linear,
        );
        let id = engine.add(instance).await.unwrap();

        tick_tx.send(ClockTick { tick_number: 0, beat_number: 0, tick_in_beat: 0, phase_in_beat: 0.0, timestamp_ms: 0 }).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.current_value(9), 150);

        engine.remove(id);
        controller.schedule_change(9, ChannelChange::instant(0));
        tokio::time::sleep(Duration::from_millis(20)).await;

        tick_tx.send(ClockTick { tick_number: 1, beat_number: 0, tick_in_beat: 1, phase_in_beat: 1.0 / 24.0, timestamp_ms: 0 }).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.current_value(9), 0);

        cancel.cancel();
    }

    #[tokio::test]
    async fn group_target_mismatch_skips_instance_for_unreachable_universe() {
        let cancel = CancellationToken::new();
        let addr = UniverseAddress::new(0, 0).unwrap();
        let other = UniverseAddress::new(0, 1).unwrap();
        let controller = spawn_universe(addr, TransportMode::Broadcast, fast_runtime(), cancel.clone()).unwrap();
        let (tick_tx, tick_rx) = broadcast::channel(16);
        // Engine only knows about `addr`, not `other`.
        let engine = spawn_fx_engine(vec![controller.clone()], tick_rx, cancel.clone());

        let instance = FxInstance::new(
            Effect::StaticValue(123),
            FxTarget::Slider { universe: other, channel: 1 },
            FxTiming { beat_division: 1.0, phase_offset: 0.0 },
            BlendMode::Override,
            DistributionStrategy::Linear,
        );
        engine.add(instance).await.unwrap();

        tick_tx.send(ClockTick { tick_number: 0, beat_number: 0, tick_in_beat: 0, phase_in_beat: 0.0, timestamp_ms: 0 }).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // No panic, no write anywhere reachable; instance remains registered.
        assert_eq!(engine.list().await.len(), 1);

        cancel.cancel();
    }
}
