use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::error::TransportError;
use super::frame::UniverseFrame;
use super::transport::{ArtnetTransport, TransportMode};
use crate::dmx::{channel_index, ChannelChange, ChannelId, ChannelValue, UniverseAddress, CHANNEL_COUNT};
use crate::fader::ChannelFader;

/// Event delivered to a [`UniverseController`] subscriber.
#[derive(Debug, Clone)]
pub enum UniverseEvent {
    /// Channels whose emitted byte differs from the previous emission.
    FrameSent(Arc<HashMap<ChannelId, ChannelValue>>),
    /// The sender has given up after too many consecutive transport failures.
    Fatal(TransportError),
}

pub type UniverseListener = Arc<dyn Fn(UniverseEvent) + Send + Sync>;

enum ControllerCommand {
    Change(ChannelId, ChannelChange),
    Batch(Vec<(ChannelId, ChannelChange)>),
    Subscribe(UniverseListener),
}

/// Runtime knobs for a universe's sender task.
#[derive(Debug, Clone, Copy)]
pub struct UniverseRuntimeConfig {
    pub cadence_ms: u64,
    pub fade_step_ms: u64,
    pub refresh_ms: Option<u64>,
    pub max_consecutive_send_errors: usize,
}

impl Default for UniverseRuntimeConfig {
    fn default() -> Self {
        UniverseRuntimeConfig {
            cadence_ms: 25,
            fade_step_ms: 10,
            refresh_ms: None,
            max_consecutive_send_errors: 20,
        }
    }
}

/// Cheap, cloneable handle to a universe's output pipeline. The actual
/// fade and frame-emission state lives in a single background task owning
/// all 512 channels; this handle only shares the authoritative value
/// buffer (for synchronous reads) and a command queue into that task.
#[derive(Clone)]
pub struct UniverseController {
    address: UniverseAddress,
    shared: Arc<Mutex<UniverseFrame>>,
    cmd_tx: mpsc::UnboundedSender<ControllerCommand>,
}

impl UniverseController {
    pub fn address(&self) -> UniverseAddress {
        self.address
    }

    pub fn current_value(&self, channel: ChannelId) -> ChannelValue {
        self.shared.lock().unwrap().value(channel)
    }

    pub fn schedule_change(&self, channel: ChannelId, change: ChannelChange) {
        if channel_index(channel).is_none() {
            return;
        }
        let _ = self.cmd_tx.send(ControllerCommand::Change(channel, change));
    }

    /// Applied atomically: either all land in the next frame, or none do.
    pub fn schedule_batch(&self, changes: Vec<(ChannelId, ChannelChange)>) {
        let changes: Vec<_> = changes
            .into_iter()
            .filter(|(ch, _)| channel_index(*ch).is_some())
            .collect();
        if changes.is_empty() {
            return;
        }
        let _ = self.cmd_tx.send(ControllerCommand::Batch(changes));
    }

    pub fn subscribe(&self, listener: UniverseListener) {
        let _ = self.cmd_tx.send(ControllerCommand::Subscribe(listener));
    }
}

/// Spawns the background sender task for `address` and returns a handle.
pub fn spawn_universe(
    address: UniverseAddress,
    transport_mode: TransportMode,
    runtime: UniverseRuntimeConfig,
    cancel: CancellationToken,
) -> Result<UniverseController, TransportError> {
    let transport = ArtnetTransport::new(address, transport_mode)?;
    let shared = Arc::new(Mutex::new(UniverseFrame::new(address)));
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let actor = UniverseActor {
        address,
        shared: shared.clone(),
        transport,
        runtime,
        faders: std::array::from_fn(|_| ChannelFader::new()),
        last_emitted: [0; CHANNEL_COUNT],
        listeners: Vec::new(),
        consecutive_failures: 0,
    };

    tokio::spawn(actor.run(cmd_rx, cancel));

    Ok(UniverseController {
        address,
        shared,
        cmd_tx,
    })
}

struct UniverseActor {
    address: UniverseAddress,
    shared: Arc<Mutex<UniverseFrame>>,
    transport: ArtnetTransport,
    runtime: UniverseRuntimeConfig,
    faders: [ChannelFader; CHANNEL_COUNT],
    last_emitted: [ChannelValue; CHANNEL_COUNT],
    listeners: Vec<UniverseListener>,
    consecutive_failures: usize,
}

impl UniverseActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ControllerCommand>, cancel: CancellationToken) {
        let mut step_timer = interval(Duration::from_millis(self.runtime.fade_step_ms));
        let mut cadence_timer = interval(Duration::from_millis(self.runtime.cadence_ms));
        let mut non_modified_ticks: u64 = 0;
        let mut dirty = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                cmd = cmd_rx.recv() => {
                    match cmd {
                        None => break,
                        Some(ControllerCommand::Change(channel, change)) => {
                            if self.apply_change(channel, change) {
                                dirty = true;
                            }
                        }
                        Some(ControllerCommand::Batch(changes)) => {
                            let mut any = false;
                            for (channel, change) in changes {
                                any |= self.apply_change(channel, change);
                            }
                            if any {
                                dirty = true;
                            }
                        }
                        Some(ControllerCommand::Subscribe(listener)) => self.listeners.push(listener),
                    }
                }

                _ = step_timer.tick() => {
                    if self.advance_faders() {
                        dirty = true;
                    }
                }

                _ = cadence_timer.tick() => {
                    non_modified_ticks += 1;
                    let due_for_refresh = self
                        .runtime
                        .refresh_ms
                        .is_some_and(|refresh| non_modified_ticks * self.runtime.cadence_ms >= refresh);

                    if dirty || due_for_refresh {
                        if self.emit_frame().await.is_err() {
                            break;
                        }
                        dirty = false;
                        non_modified_ticks = 0;
                    }
                }
            }
        }

        debug!("universe {}: flushing final frame before shutdown", self.address);
        let _ = self.emit_frame().await;
        info!("universe {}: sender stopped", self.address);
    }

    fn apply_change(&mut self, channel: ChannelId, change: ChannelChange) -> bool {
        let Some(idx) = channel_index(channel) else {
            return false;
        };
        self.faders[idx].begin_change(change);

        if change.fade_ms == 0 {
            let value = self.faders[idx].current_value();
            let mut frame = self.shared.lock().unwrap();
            frame.set(channel, value) != Some(value)
        } else {
            false
        }
    }

    fn advance_faders(&mut self) -> bool {
        let now = std::time::Instant::now();
        let mut changed = false;
        let mut frame = self.shared.lock().unwrap();

        for idx in 0..CHANNEL_COUNT {
            if self.faders[idx].is_idle() {
                continue;
            }
            let value = self.faders[idx].sample(now);
            let channel = (idx + 1) as ChannelId;
            if frame.set(channel, value) != Some(value) {
                changed = true;
            }
        }
        changed
    }

    async fn emit_frame(&mut self) -> Result<(), TransportError> {
        let packet = {
            let mut frame = self.shared.lock().unwrap();
            frame.take_packet().to_vec()
        };

        loop {
            match self.transport.send(&packet) {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    break;
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures > self.runtime.max_consecutive_send_errors {
                        let fatal = TransportError::Fatal(self.address, self.consecutive_failures);
                        self.notify(UniverseEvent::Fatal(fatal.clone()));
                        return Err(fatal);
                    }
                    let transient = TransportError::Transient(self.address, e.to_string());
                    warn!(
                        "{transient} ({}/{})",
                        self.consecutive_failures, self.runtime.max_consecutive_send_errors
                    );
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        }

        let diff = self.diff_against_last_emission();
        self.notify(UniverseEvent::FrameSent(Arc::new(diff)));
        Ok(())
    }

    fn diff_against_last_emission(&mut self) -> HashMap<ChannelId, ChannelValue> {
        let frame = self.shared.lock().unwrap();
        let mut diff = HashMap::new();
        for idx in 0..CHANNEL_COUNT {
            let channel = (idx + 1) as ChannelId;
            let value = frame.value(channel);
            if self.last_emitted[idx] != value {
                self.last_emitted[idx] = value;
                diff.insert(channel, value);
            }
        }
        diff
    }

    fn notify(&self, event: UniverseEvent) {
        for listener in &self.listeners {
            listener(event.clone());
        }
    }
}
