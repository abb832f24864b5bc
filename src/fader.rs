use std::time::{Duration, Instant};

use crate::dmx::{ChannelChange, ChannelValue, EasingCurve};

/// Per-channel fade state machine. `Idle` holds the last value reached by
/// a fade (or set instantly); `Fading` interpolates from `start_value` to
/// `target_value` over `duration`, timed from `start` off the monotonic
/// clock so scheduler jitter in the tick loop can't accumulate drift.
#[derive(Debug, Clone, Copy)]
enum FaderState {
    Idle { value: ChannelValue },
    Fading {
        start_value: ChannelValue,
        target_value: ChannelValue,
        curve: EasingCurve,
        start: Instant,
        duration: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct ChannelFader {
    state: FaderState,
}

impl ChannelFader {
    pub fn new() -> ChannelFader {
        ChannelFader {
            state: FaderState::Idle { value: 0 },
        }
    }

    pub fn with_value(value: ChannelValue) -> ChannelFader {
        ChannelFader {
            state: FaderState::Idle { value },
        }
    }

    /// Current value without advancing time.
    pub fn current_value(&self) -> ChannelValue {
        match self.state {
            FaderState::Idle { value } => value,
            FaderState::Fading {
                start_value,
                target_value,
                curve,
                start,
                duration,
            } => Self::eased_value(start_value, target_value, curve, start, duration, Instant::now()),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, FaderState::Idle { .. })
    }

    /// Restarts from the currently visible value, not the previous fade's start.
    pub fn begin_change(&mut self, change: ChannelChange) {
        let now = Instant::now();
        let from = self.current_value();

        self.state = if change.fade_ms == 0 {
            FaderState::Idle { value: change.target }
        } else {
            FaderState::Fading {
                start_value: from,
                target_value: change.target,
                curve: change.curve,
                start: now,
                duration: Duration::from_millis(change.fade_ms as u64),
            }
        };
    }

    /// Advance the fader to `now`, returning the sampled value. Transitions
    /// to Idle once the deadline has passed.
    pub fn sample(&mut self, now: Instant) -> ChannelValue {
        match self.state {
            FaderState::Idle { value } => value,
            FaderState::Fading {
                start_value,
                target_value,
                curve,
                start,
                duration,
            } => {
                if now >= start + duration {
                    self.state = FaderState::Idle { value: target_value };
                    target_value
                } else {
                    Self::eased_value(start_value, target_value, curve, start, duration, now)
                }
            }
        }
    }

    fn eased_value(
        start_value: ChannelValue,
        target_value: ChannelValue,
        curve: EasingCurve,
        start: Instant,
        duration: Duration,
        now: Instant,
    ) -> ChannelValue {
        if now >= start + duration {
            return target_value;
        }
        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        let fraction = if duration.is_zero() {
            1.0
        } else {
            elapsed / duration.as_secs_f64()
        };
        let shaped = curve.apply(fraction);
        let value = start_value as f64 + (target_value as f64 - start_value as f64) * shaped;
        value.round().clamp(0.0, 255.0) as ChannelValue
    }
}

impl Default for ChannelFader {
    fn default() -> Self {
        ChannelFader::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn instant_change_is_immediately_idle() {
        let mut fader = ChannelFader::new();
        fader.begin_change(ChannelChange::instant(200));
        assert!(fader.is_idle());
        assert_eq!(fader.current_value(), 200);
    }

    #[test]
    fn linear_fade_reaches_midpoint_and_completes() {
        let mut fader = ChannelFader::new();
        fader.begin_change(ChannelChange::fade(255, 1000, EasingCurve::Linear));
        assert!(!fader.is_idle());

        sleep(Duration::from_millis(500));
        let mid = fader.sample(Instant::now());
        assert!((120..=140).contains(&mid), "mid value was {mid}");

        sleep(Duration::from_millis(600));
        let end = fader.sample(Instant::now());
        assert_eq!(end, 255);
        assert!(fader.is_idle());
    }

    #[test]
    fn restarting_a_fade_begins_from_visible_value() {
        let mut fader = ChannelFader::new();
        fader.begin_change(ChannelChange::fade(255, 1000, EasingCurve::Linear));
        sleep(Duration::from_millis(500));
        let at_restart = fader.sample(Instant::now());

        fader.begin_change(ChannelChange::fade(0, 500, EasingCurve::Linear));
        // Must not overshoot above the value visible at restart time.
        let just_after = fader.sample(Instant::now());
        assert!(just_after <= at_restart + 1);

        sleep(Duration::from_millis(600));
        let end = fader.sample(Instant::now());
        assert_eq!(end, 0);
        assert!(fader.is_idle());
    }
}
