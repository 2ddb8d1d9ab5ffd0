//! Live effects: periodic modulation layered over the drone.
//!
//! Each effect owns its own timer and phase accumulator and reaches the
//! audio only through [`ToneEngine`]'s public methods. Effects are
//! independent: toggling one never disturbs another.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Context, TimerEvent, TimerId};
use crate::error::CoreError;
use crate::events::UiEvent;
use crate::tone::ToneEngine;

const PAN_STEP_MS: u64 = 50;
const BREATH_STEP_MS: u64 = 100;
const SWELL_STEP_MS: u64 = 100;

/// Swell oscillates the master between (centre - depth) and
/// (centre + depth) of the user's target volume.
const SWELL_CENTRE: f64 = 0.85;
const SWELL_DEPTH: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectKind {
    Pulse,
    PanDrift,
    BreathGuide,
    VolumeSwell,
}

impl EffectKind {
    pub const ALL: [EffectKind; 4] = [
        EffectKind::Pulse,
        EffectKind::PanDrift,
        EffectKind::BreathGuide,
        EffectKind::VolumeSwell,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreathPhase {
    Inhale,
    Exhale,
}

/// Effect rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectSettings {
    pub pulse_bpm: f64,
    /// Fractional boost above the target volume per pulse.
    pub pulse_intensity: f64,
    /// Seconds for the pan to travel from one side to the other.
    pub pan_sweep_seconds: f64,
    /// Seconds for one inhale + exhale.
    pub breath_cycle_seconds: f64,
    pub swell_period_seconds: f64,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            pulse_bpm: 60.0,
            pulse_intensity: 0.3,
            pan_sweep_seconds: 8.0,
            breath_cycle_seconds: 10.0,
            swell_period_seconds: 20.0,
        }
    }
}

impl EffectSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        let positive = [
            ("pulseBpm", self.pulse_bpm),
            ("panSweepSeconds", self.pan_sweep_seconds),
            ("breathCycleSeconds", self.breath_cycle_seconds),
            ("swellPeriodSeconds", self.swell_period_seconds),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CoreError::InvalidConfig(format!("{name} must be positive, got {value}")));
            }
        }
        if !(0.0..=1.0).contains(&self.pulse_intensity) {
            return Err(CoreError::InvalidConfig(format!(
                "pulseIntensity must be within 0..1, got {}",
                self.pulse_intensity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct EffectState {
    timer: Option<TimerId>,
    /// Seconds into the current cycle.
    phase: f64,
}

impl EffectState {
    fn is_active(&self) -> bool {
        self.timer.is_some()
    }
}

pub struct LiveEffects {
    settings: EffectSettings,
    pulse: EffectState,
    pan: EffectState,
    breath: EffectState,
    swell: EffectState,
    pan_position: f64,
    pan_direction: f64,
}

impl LiveEffects {
    pub fn new(settings: EffectSettings) -> Self {
        LiveEffects {
            settings,
            pulse: EffectState::default(),
            pan: EffectState::default(),
            breath: EffectState::default(),
            swell: EffectState::default(),
            pan_position: 1.0,
            pan_direction: -1.0,
        }
    }

    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    fn state(&self, kind: EffectKind) -> &EffectState {
        match kind {
            EffectKind::Pulse => &self.pulse,
            EffectKind::PanDrift => &self.pan,
            EffectKind::BreathGuide => &self.breath,
            EffectKind::VolumeSwell => &self.swell,
        }
    }

    fn state_mut(&mut self, kind: EffectKind) -> &mut EffectState {
        match kind {
            EffectKind::Pulse => &mut self.pulse,
            EffectKind::PanDrift => &mut self.pan,
            EffectKind::BreathGuide => &mut self.breath,
            EffectKind::VolumeSwell => &mut self.swell,
        }
    }

    pub fn is_active(&self, kind: EffectKind) -> bool {
        self.state(kind).is_active()
    }

    fn period_ms(&self, kind: EffectKind) -> u64 {
        match kind {
            EffectKind::Pulse => (60_000.0 / self.settings.pulse_bpm).round().max(1.0) as u64,
            EffectKind::PanDrift => PAN_STEP_MS,
            EffectKind::BreathGuide => BREATH_STEP_MS,
            EffectKind::VolumeSwell => SWELL_STEP_MS,
        }
    }

    /// Flip an effect on or off. Returns whether it is now active.
    pub fn toggle(&mut self, kind: EffectKind, cx: &mut Context<'_>, tone: &mut ToneEngine) -> bool {
        if self.is_active(kind) {
            self.stop(kind, cx, tone);
        } else {
            self.start(kind, cx, tone);
        }
        self.is_active(kind)
    }

    /// Start an effect. Refuses to register a second interval.
    pub fn start(&mut self, kind: EffectKind, cx: &mut Context<'_>, tone: &mut ToneEngine) {
        if self.is_active(kind) {
            return;
        }
        let period = self.period_ms(kind);
        let timer = cx.timers.set_interval(period, TimerEvent::Effect(kind));
        let state = self.state_mut(kind);
        state.timer = Some(timer);
        state.phase = 0.0;
        if kind == EffectKind::PanDrift {
            self.pan_position = tone.pan();
            self.pan_direction = if self.pan_position > 0.0 { -1.0 } else { 1.0 };
        }
        debug!(?kind, period, "effect started");
        cx.emit(UiEvent::EffectToggled { effect: kind, active: true });
    }

    /// Stop an effect and undo its audible footprint. Idempotent.
    pub fn stop(&mut self, kind: EffectKind, cx: &mut Context<'_>, tone: &mut ToneEngine) {
        let Some(timer) = self.state_mut(kind).timer.take() else {
            return;
        };
        cx.timers.cancel(timer);
        self.state_mut(kind).phase = 0.0;
        match kind {
            EffectKind::PanDrift => tone.reset_pan(),
            EffectKind::VolumeSwell => {
                let target = tone.target_volume();
                tone.modulate_master_volume(target);
            }
            EffectKind::Pulse | EffectKind::BreathGuide => {}
        }
        debug!(?kind, "effect stopped");
        cx.emit(UiEvent::EffectToggled { effect: kind, active: false });
    }

    pub fn stop_all(&mut self, cx: &mut Context<'_>, tone: &mut ToneEngine) {
        for kind in EffectKind::ALL {
            self.stop(kind, cx, tone);
        }
    }

    /// One timer step of `kind`.
    pub fn on_timer(&mut self, kind: EffectKind, cx: &mut Context<'_>, tone: &mut ToneEngine) {
        if !self.is_active(kind) {
            return;
        }
        match kind {
            EffectKind::Pulse => {
                if !tone.is_playing() {
                    return;
                }
                tone.pulse_volume(self.settings.pulse_intensity);
                cx.emit(UiEvent::EffectValue {
                    effect: kind,
                    value: self.settings.pulse_intensity,
                });
            }
            EffectKind::PanDrift => {
                let steps_per_sweep = self.settings.pan_sweep_seconds * 1000.0 / PAN_STEP_MS as f64;
                let step = 2.0 / steps_per_sweep;
                self.pan_position += self.pan_direction * step;
                if self.pan_position >= 1.0 {
                    self.pan_position = 1.0;
                    self.pan_direction = -1.0;
                } else if self.pan_position <= -1.0 {
                    self.pan_position = -1.0;
                    self.pan_direction = 1.0;
                }
                tone.set_pan(self.pan_position);
                cx.emit(UiEvent::EffectValue {
                    effect: kind,
                    value: self.pan_position,
                });
            }
            EffectKind::BreathGuide => {
                let cycle = self.settings.breath_cycle_seconds;
                let phase = advance_phase(&mut self.breath, BREATH_STEP_MS, cycle);
                let half = cycle / 2.0;
                let (breath, progress) = if phase < half {
                    (BreathPhase::Inhale, phase / half)
                } else {
                    (BreathPhase::Exhale, (phase - half) / half)
                };
                cx.emit(UiEvent::Breath {
                    phase: breath,
                    progress,
                });
            }
            EffectKind::VolumeSwell => {
                if !tone.is_playing() {
                    return;
                }
                let period = self.settings.swell_period_seconds;
                let phase = advance_phase(&mut self.swell, SWELL_STEP_MS, period);
                let multiplier = swell_multiplier(phase, period);
                tone.modulate_master_volume(tone.target_volume() * multiplier);
                cx.emit(UiEvent::EffectValue {
                    effect: kind,
                    value: multiplier,
                });
            }
        }
    }

    pub fn set_pulse_bpm(&mut self, bpm: f64, cx: &mut Context<'_>, tone: &mut ToneEngine) -> Result<(), CoreError> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(CoreError::InvalidConfig(format!("pulse bpm must be positive, got {bpm}")));
        }
        self.settings.pulse_bpm = bpm;
        // Re-register at the new rate.
        if self.is_active(EffectKind::Pulse) {
            self.stop(EffectKind::Pulse, cx, tone);
            self.start(EffectKind::Pulse, cx, tone);
        }
        Ok(())
    }

    pub fn set_pan_sweep(&mut self, seconds: f64) -> Result<(), CoreError> {
        self.settings.pan_sweep_seconds = positive("pan sweep", seconds)?;
        Ok(())
    }

    pub fn set_breath_cycle(&mut self, seconds: f64) -> Result<(), CoreError> {
        self.settings.breath_cycle_seconds = positive("breath cycle", seconds)?;
        self.breath.phase %= seconds;
        Ok(())
    }

    pub fn set_swell_period(&mut self, seconds: f64) -> Result<(), CoreError> {
        self.settings.swell_period_seconds = positive("swell period", seconds)?;
        self.swell.phase %= seconds;
        Ok(())
    }
}

fn positive(what: &str, seconds: f64) -> Result<f64, CoreError> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(CoreError::InvalidConfig(format!("{what} must be positive, got {seconds}")))
    }
}

fn advance_phase(state: &mut EffectState, step_ms: u64, cycle: f64) -> f64 {
    state.phase = (state.phase + step_ms as f64 / 1000.0) % cycle;
    state.phase
}

/// Master multiplier for the swell at `phase` seconds into `period`.
pub fn swell_multiplier(phase: f64, period: f64) -> f64 {
    SWELL_CENTRE + SWELL_DEPTH * (TAU * phase / period).sin()
}
