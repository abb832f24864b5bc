use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

pub const TICKS_PER_BEAT: u64 = 24;
const MIN_BPM: f64 = 20.0;
const MAX_BPM: f64 = 300.0;
const TAP_HISTORY_LEN: usize = 8;
const TAP_WINDOW: Duration = Duration::from_secs(3);

/// One tick of the master tempo reference. 24 emitted per beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    pub tick_number: u64,
    pub beat_number: u64,
    pub tick_in_beat: u8,
    pub phase_in_beat: f64,
    pub timestamp_ms: u64,
}

impl ClockTick {
    fn new(tick_number: u64, timestamp_ms: u64) -> ClockTick {
        ClockTick {
            tick_number,
            beat_number: tick_number / TICKS_PER_BEAT,
            tick_in_beat: (tick_number % TICKS_PER_BEAT) as u8,
            phase_in_beat: (tick_number % TICKS_PER_BEAT) as f64 / TICKS_PER_BEAT as f64,
            timestamp_ms,
        }
    }
}

enum ClockCommand {
    SetBpm(f64, tokio::sync::oneshot::Sender<f64>),
    Tap(tokio::sync::oneshot::Sender<f64>),
    Pause,
    Resume,
    GetBpm(tokio::sync::oneshot::Sender<f64>),
}

/// Cheap, cloneable handle to the process-wide tempo source. The ticking
/// loop lives in a single background task; this handle only carries a
/// command queue and the broadcast sender ticks are fanned out on.
#[derive(Clone)]
pub struct MasterClock {
    cmd_tx: mpsc::UnboundedSender<ClockCommand>,
    tick_tx: broadcast::Sender<ClockTick>,
}

impl MasterClock {
    /// `phaseForDivision`: `(tickNumber mod (beatDivision * 24)) / (beatDivision * 24)`.
    pub fn phase_for_division(tick_number: u64, beat_division: f64) -> f64 {
        let ticks_per_cycle = (beat_division * TICKS_PER_BEAT as f64).max(1e-9);
        (tick_number as f64).rem_euclid(ticks_per_cycle) / ticks_per_cycle
    }

    /// New multi-subscriber stream of ticks. A lagging subscriber may
    /// drop ticks and must treat delivery as at-most-once.
    pub fn subscribe(&self) -> broadcast::Receiver<ClockTick> {
        self.tick_tx.subscribe()
    }

    pub async fn set_bpm(&self, bpm: f64) -> f64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = self.cmd_tx.send(ClockCommand::SetBpm(bpm, tx));
        rx.await.unwrap_or(bpm.clamp(MIN_BPM, MAX_BPM))
    }

    pub async fn get_bpm(&self) -> f64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = self.cmd_tx.send(ClockCommand::GetBpm(tx));
        rx.await.unwrap_or(MIN_BPM)
    }

    /// Appends `now` to the tap ring; if >=2 taps fall within the last
    /// 3s, derives a BPM from their mean interval and applies it.
    /// Returns the (possibly unchanged) BPM in force afterward.
    pub async fn tap(&self) -> f64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = self.cmd_tx.send(ClockCommand::Tap(tx));
        rx.await.unwrap_or(MIN_BPM)
    }

    pub fn pause(&self) {
        let _ = self.cmd_tx.send(ClockCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.cmd_tx.send(ClockCommand::Resume);
    }
}

/// Spawns the clock's background task and returns a handle.
pub fn spawn_clock(initial_bpm: f64, cancel: CancellationToken) -> MasterClock {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (tick_tx, _) = broadcast::channel(1024);

    let actor = ClockActor {
        bpm: initial_bpm.clamp(MIN_BPM, MAX_BPM),
        tick_number: 0,
        paused: false,
        tap_history: VecDeque::with_capacity(TAP_HISTORY_LEN),
        created: Instant::now(),
        tick_tx: tick_tx.clone(),
    };

    tokio::spawn(actor.run(cmd_rx, cancel));

    MasterClock { cmd_tx, tick_tx }
}

struct ClockActor {
    bpm: f64,
    tick_number: u64,
    paused: bool,
    tap_history: VecDeque<Instant>,
    created: Instant,
    tick_tx: broadcast::Sender<ClockTick>,
}

impl ClockActor {
    fn ms_per_tick(&self) -> Duration {
        let ms = 60_000.0 / (self.bpm * TICKS_PER_BEAT as f64);
        Duration::from_secs_f64(ms.max(0.1) / 1000.0)
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ClockCommand>, cancel: CancellationToken) {
        let mut next_tick = Instant::now() + self.ms_per_tick();

        loop {
            let sleep = tokio::time::sleep_until(next_tick.into());
            tokio::pin!(sleep);

            tokio::select! {
                _ = cancel.cancelled() => break,

                cmd = cmd_rx.recv() => match cmd {
                    None => break,
                    Some(cmd) => self.handle_command(cmd),
                },

                _ = &mut sleep => {
                    if !self.paused {
                        let timestamp_ms = self.created.elapsed().as_millis() as u64;
                        let tick = ClockTick::new(self.tick_number, timestamp_ms);
                        self.tick_number += 1;
                        let _ = self.tick_tx.send(tick);
                    }
                    next_tick = Instant::now() + self.ms_per_tick();
                }
            }
        }

        debug!("clock stopped at tick {}", self.tick_number);
    }

    fn handle_command(&mut self, cmd: ClockCommand) {
        match cmd {
            ClockCommand::SetBpm(bpm, reply) => {
                // Continuity ("no snap-back") falls out for free: tick_number
                // keeps counting from where it was, only the pacing of
                // future ticks changes.
                self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
                let _ = reply.send(self.bpm);
            }
            ClockCommand::GetBpm(reply) => {
                let _ = reply.send(self.bpm);
            }
            ClockCommand::Tap(reply) => {
                let now = Instant::now();
                self.tap_history.push_back(now);
                if self.tap_history.len() > TAP_HISTORY_LEN {
                    self.tap_history.pop_front();
                }

                let recent: Vec<Instant> = self
                    .tap_history
                    .iter()
                    .copied()
                    .filter(|t| now.duration_since(*t) <= TAP_WINDOW)
                    .collect();

                if recent.len() >= 2 {
                    let deltas: Vec<f64> = recent
                        .windows(2)
                        .map(|w| w[1].duration_since(w[0]).as_secs_f64() * 1000.0)
                        .collect();
                    let mean_ms = deltas.iter().sum::<f64>() / deltas.len() as f64;
                    if mean_ms > 0.0 {
                        self.bpm = (60_000.0 / mean_ms).clamp(MIN_BPM, MAX_BPM);
                    }
                }

                let _ = reply.send(self.bpm);
            }
            ClockCommand::Pause => self.paused = true,
            ClockCommand::Resume => self.paused = false,
        }
    }
}
