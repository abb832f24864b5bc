use std::f64::consts::PI;

use crate::dmx::{ChannelValue, Colour};

use super::distribution::pseudo_random;

/// What an [`Effect`] produces for a given phase; the variant must agree
/// with the category of [`super::target::FxTarget`] it is bound to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectOutput {
    Slider(ChannelValue),
    Colour(Colour),
    PanTilt(ChannelValue, ChannelValue),
}

fn triangle(x: f64) -> f64 {
    let x = x.rem_euclid(1.0);
    if x < 0.5 {
        x * 2.0
    } else {
        2.0 - x * 2.0
    }
}

fn lerp_u8(min: u8, max: u8, t: f64) -> u8 {
    (min as f64 + (max as f64 - min as f64) * t.clamp(0.0, 1.0))
        .round()
        .clamp(0.0, 255.0) as u8
}

/// A pure `(phase, params) -> output` function; no state carries between
/// ticks, so the same phase always yields the same output.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    // --- Dimmer sliders ---
    SineWave { min: u8, max: u8 },
    Pulse { min: u8, max: u8, duty: f64 },
    RampUp { min: u8, max: u8 },
    RampDown { min: u8, max: u8 },
    Triangle { min: u8, max: u8 },
    Strobe { min: u8, max: u8, duty: f64 },
    Flicker { min: u8, max: u8, seed: u64, rate: u64 },
    Breathe { min: u8, max: u8 },
    StaticValue(u8),

    // --- Colour ---
    ColourCycle { colours: Vec<Colour> },
    RainbowCycle,
    ColourStrobe { colour: Colour, duty: f64 },
    ColourPulse { colour: Colour, duty: f64 },
    ColourFade { from: Colour, to: Colour },

    // --- Position ---
    Circle { center_pan: u8, center_tilt: u8, radius: u8 },
    Figure8 { center_pan: u8, center_tilt: u8, radius: u8 },
    Sweep { pan_min: u8, pan_max: u8, tilt: u8 },
    PanSweep { min: u8, max: u8 },
    TiltSweep { min: u8, max: u8 },
    RandomPosition { seed: u64, pan_range: (u8, u8), tilt_range: (u8, u8) },
}

impl Effect {
    /// Evaluate at `phase` in `[0,1)`.
    pub fn evaluate(&self, phase: f64) -> EffectOutput {
        let phase = phase.rem_euclid(1.0);
        match self {
            Effect::SineWave { min, max } => {
                let t = (((phase * 2.0 * PI).sin()) + 1.0) / 2.0;
                EffectOutput::Slider(lerp_u8(*min, *max, t))
            }
            Effect::Pulse { min, max, duty } => {
                let duty = duty.clamp(1e-6, 1.0);
                let t = if phase < duty { (PI * phase / duty).sin() } else { 0.0 };
                EffectOutput::Slider(lerp_u8(*min, *max, t))
            }
            Effect::RampUp { min, max } => EffectOutput::Slider(lerp_u8(*min, *max, phase)),
            Effect::RampDown { min, max } => EffectOutput::Slider(lerp_u8(*min, *max, 1.0 - phase)),
            Effect::Triangle { min, max } => EffectOutput::Slider(lerp_u8(*min, *max, triangle(phase))),
            Effect::Strobe { min, max, duty } => {
                let duty = duty.clamp(0.0, 1.0);
                let value = if phase < duty { *max } else { *min };
                EffectOutput::Slider(value)
            }
            Effect::Flicker { min, max, seed, rate } => {
                let bucket = (phase * (*rate).max(1) as f64).floor() as u64;
                let t = pseudo_random(*seed, bucket);
                EffectOutput::Slider(lerp_u8(*min, *max, t))
            }
            Effect::Breathe { min, max } => {
                let raw = (1.0 - (2.0 * PI * phase).cos()) / 2.0;
                EffectOutput::Slider(lerp_u8(*min, *max, raw.powf(1.5)))
            }
            Effect::StaticValue(v) => EffectOutput::Slider(*v),

            Effect::ColourCycle { colours } => {
                if colours.is_empty() {
                    EffectOutput::Colour(Colour::BLACK)
                } else {
                    let idx = ((phase * colours.len() as f64).floor() as usize).min(colours.len() - 1);
                    EffectOutput::Colour(colours[idx])
                }
            }
            Effect::RainbowCycle => EffectOutput::Colour(Colour::from_hsv(phase * 360.0, 1.0, 1.0)),
            Effect::ColourStrobe { colour, duty } => {
                let duty = duty.clamp(0.0, 1.0);
                EffectOutput::Colour(if phase < duty { *colour } else { Colour::BLACK })
            }
            Effect::ColourPulse { colour, duty } => {
                let duty = duty.clamp(1e-6, 1.0);
                let t = if phase < duty { (PI * phase / duty).sin() } else { 0.0 };
                EffectOutput::Colour(Colour::BLACK.lerp(*colour, t))
            }
            Effect::ColourFade { from, to } => EffectOutput::Colour(from.lerp(*to, triangle(phase))),

            Effect::Circle { center_pan, center_tilt, radius } => {
                let pan = *center_pan as f64 + *radius as f64 * (phase * 2.0 * PI).cos();
                let tilt = *center_tilt as f64 + *radius as f64 * (phase * 2.0 * PI).sin();
                EffectOutput::PanTilt(clamp_byte(pan), clamp_byte(tilt))
            }
            Effect::Figure8 { center_pan, center_tilt, radius } => {
                let pan = *center_pan as f64 + *radius as f64 * (phase * 2.0 * PI).sin();
                let tilt = *center_tilt as f64 + (*radius as f64 / 2.0) * (phase * 4.0 * PI).sin();
                EffectOutput::PanTilt(clamp_byte(pan), clamp_byte(tilt))
            }
            Effect::Sweep { pan_min, pan_max, tilt } => {
                EffectOutput::PanTilt(lerp_u8(*pan_min, *pan_max, triangle(phase)), *tilt)
            }
            Effect::PanSweep { min, max } => EffectOutput::PanTilt(lerp_u8(*min, *max, triangle(phase)), 128),
            Effect::TiltSweep { min, max } => EffectOutput::PanTilt(128, lerp_u8(*min, *max, triangle(phase))),
            Effect::RandomPosition { seed, pan_range, tilt_range } => {
                let bucket = (phase * 16.0).floor() as u64;
                let pan_t = pseudo_random(*seed, bucket * 2);
                let tilt_t = pseudo_random(*seed, bucket * 2 + 1);
                EffectOutput::PanTilt(
                    lerp_u8(pan_range.0, pan_range.1, pan_t),
                    lerp_u8(tilt_range.0, tilt_range.1, tilt_t),
                )
            }
        }
    }

    /// `StaticValue` and the hard-edged step effects default to
    /// `stepTiming=true`; continuous waves default to `false`.
    pub fn default_step_timing(&self) -> bool {
        matches!(self, Effect::StaticValue(_) | Effect::Strobe { .. } | Effect::ColourStrobe { .. })
    }

    /// The output a member not currently holding the active step-chase
    /// slot should show. Dimmer and colour effects rest dark; position
    /// effects have no natural rest pose, so callers leave them unwritten.
    pub fn rest_output(&self) -> Option<EffectOutput> {
        match self {
            Effect::SineWave { .. }
            | Effect::Pulse { .. }
            | Effect::RampUp { .. }
            | Effect::RampDown { .. }
            | Effect::Triangle { .. }
            | Effect::Strobe { .. }
            | Effect::Flicker { .. }
            | Effect::Breathe { .. }
            | Effect::StaticValue(_) => Some(EffectOutput::Slider(0)),
            Effect::ColourCycle { .. }
            | Effect::RainbowCycle
            | Effect::ColourStrobe { .. }
            | Effect::ColourPulse { .. }
            | Effect::ColourFade { .. } => Some(EffectOutput::Colour(Colour::BLACK)),
            Effect::Circle { .. }
            | Effect::Figure8 { .. }
            | Effect::Sweep { .. }
            | Effect::PanSweep { .. }
            | Effect::TiltSweep { .. }
            | Effect::RandomPosition { .. } => None,
        }
    }

    /// Rejects parameter combinations that make an instance meaningless.
    pub fn validate(&self) -> Result<(), String> {
        let duty_ok = |d: f64| (0.0..=1.0).contains(&d);
        match self {
            Effect::Pulse { duty, .. } | Effect::Strobe { duty, .. } | Effect::ColourStrobe { duty, .. } | Effect::ColourPulse { duty, .. } => {
                if duty_ok(*duty) {
                    Ok(())
                } else {
                    Err(format!("duty cycle {duty} out of range [0,1]"))
                }
            }
            Effect::ColourCycle { colours } if colours.is_empty() => {
                Err("ColourCycle requires at least one colour".to_string())
            }
            Effect::Flicker { rate, .. } if *rate == 0 => Err("Flicker rate must be nonzero".to_string()),
            _ => Ok(()),
        }
    }
}

fn clamp_byte(v: f64) -> ChannelValue {
    v.round().clamp(0.0, 255.0) as ChannelValue
}

/// Parameter type for an effect's introspectable schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Byte,
    Fraction,
    Colour,
    ColourList,
    Seed,
    /// A positive integer count, not a `[0,1]` fraction (e.g. `Flicker::rate`).
    Count,
    /// A `(min, max)` byte pair, as opposed to a single `Byte`.
    ByteRange,
}

#[derive(Debug, Clone)]
pub struct EffectDescriptor {
    pub name: &'static str,
    pub params: Vec<(&'static str, ParamType)>,
}

/// Enumerates the effect catalog for introspection by the (out-of-scope)
/// API layer - names and parameter schemas only, no runtime behavior.
pub fn effect_catalog() -> Vec<EffectDescriptor> {
    use ParamType::*;
    vec![
        EffectDescriptor { name: "SineWave", params: vec![("min", Byte), ("max", Byte)] },
        EffectDescriptor { name: "Pulse", params: vec![("min", Byte), ("max", Byte), ("duty", Fraction)] },
        EffectDescriptor { name: "RampUp", params: vec![("min", Byte), ("max", Byte)] },
        EffectDescriptor { name: "RampDown", params: vec![("min", Byte), ("max", Byte)] },
        EffectDescriptor { name: "Triangle", params: vec![("min", Byte), ("max", Byte)] },
        EffectDescriptor { name: "Strobe", params: vec![("min", Byte), ("max", Byte), ("duty", Fraction)] },
        EffectDescriptor { name: "Flicker", params: vec![("min", Byte), ("max", Byte), ("seed", Seed), ("rate", Count)] },
        EffectDescriptor { name: "Breathe", params: vec![("min", Byte), ("max", Byte)] },
        EffectDescriptor { name: "StaticValue", params: vec![("value", Byte)] },
        EffectDescriptor { name: "ColourCycle", params: vec![("colours", ColourList)] },
        EffectDescriptor { name: "RainbowCycle", params: vec![] },
        EffectDescriptor { name: "ColourStrobe", params: vec![("colour", Colour), ("duty", Fraction)] },
        EffectDescriptor { name: "ColourPulse", params: vec![("colour", Colour), ("duty", Fraction)] },
        EffectDescriptor { name: "ColourFade", params: vec![("from", Colour), ("to", Colour)] },
        EffectDescriptor { name: "Circle", params: vec![("center_pan", Byte), ("center_tilt", Byte), ("radius", Byte)] },
        EffectDescriptor { name: "Figure8", params: vec![("center_pan", Byte), ("center_tilt", Byte), ("radius", Byte)] },
        EffectDescriptor { name: "Sweep", params: vec![("pan_min", Byte), ("pan_max", Byte), ("tilt", Byte)] },
        EffectDescriptor { name: "PanSweep", params: vec![("min", Byte), ("max", Byte)] },
        EffectDescriptor { name: "TiltSweep", params: vec![("min", Byte), ("max", Byte)] },
        EffectDescriptor { name: "RandomPosition", params: vec![("seed", Seed), ("pan_range", ByteRange), ("tilt_range", ByteRange)] },
    ]
}
