//! Tone engine: the two-channel binaural drone.
//!
//! Owns the session's [`SignalGraph`] exclusively. Every other component
//! (scheduler, live effects, user commands) changes the drone only through
//! the methods here.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{AudioClock, TimerEvent, TimerId, Timers};
use crate::dsp::graph::{Channel, ParamTarget, SignalGraph};
use crate::dsp::oscillator::Waveform;
use crate::error::CoreError;
use crate::tables::classify_beat;

/// Tunables for the drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToneSettings {
    /// Initial master volume [0, 1].
    pub master_volume: f64,
    pub left_volume: f64,
    pub right_volume: f64,
    /// Time constant for volume changes, in seconds.
    pub smoothing_seconds: f64,
    /// Detune jitter is drawn uniformly from ±this many cents.
    pub detune_cents: f64,
    pub detune_period_ms: u64,
    pub detune_smoothing_seconds: f64,
    pub pan_smoothing_seconds: f64,
    pub pulse_rise_seconds: f64,
    pub pulse_fall_seconds: f64,
    /// Seed for the detune jitter generator.
    pub seed: u64,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            master_volume: 0.5,
            left_volume: 1.0,
            right_volume: 1.0,
            smoothing_seconds: 0.1,
            detune_cents: 3.0,
            detune_period_ms: 2000,
            detune_smoothing_seconds: 0.5,
            pan_smoothing_seconds: 0.05,
            pulse_rise_seconds: 0.1,
            pulse_fall_seconds: 0.3,
            seed: 0x5eed,
        }
    }
}

/// Lifecycle of the drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Uninitialized,
    Idle,
    Playing,
}

pub struct ToneEngine {
    clock: AudioClock,
    settings: ToneSettings,
    graph: Option<SignalGraph>,
    state: EngineState,
    target_volume: f64,
    left_volume: f64,
    right_volume: f64,
    frequencies: (f64, f64),
    pan: f64,
    detune_active: bool,
    detune_timer: Option<TimerId>,
    rng: StdRng,
    /// Bumped by every `start`; a pending release only fires if its
    /// generation still matches.
    generation: u64,
    pending_release: Option<TimerId>,
}

impl ToneEngine {
    pub fn new(clock: AudioClock, settings: ToneSettings) -> Self {
        ToneEngine {
            clock,
            target_volume: settings.master_volume.clamp(0.0, 1.0),
            left_volume: settings.left_volume.clamp(0.0, 1.0),
            right_volume: settings.right_volume.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            graph: None,
            state: EngineState::Uninitialized,
            frequencies: (0.0, 0.0),
            pan: 1.0,
            detune_active: false,
            detune_timer: None,
            generation: 0,
            pending_release: None,
        }
    }

    /// Allocate the signal chain and unlock platform audio. Idempotent.
    pub fn init(&mut self) -> Result<(), CoreError> {
        if self.state != EngineState::Uninitialized {
            return Ok(());
        }
        let mut graph = SignalGraph::new(self.clock.clone(), Waveform::Sine).inspect_err(|e| {
            warn!("tone engine init failed: {e}");
        })?;
        graph.unlock();
        self.graph = Some(graph);
        self.state = EngineState::Idle;
        debug!("tone engine initialised");
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == EngineState::Playing
    }

    /// Start fresh oscillators and fade the master in over `fade` seconds.
    pub fn start(
        &mut self,
        timers: &mut Timers,
        left: f64,
        right: f64,
        fade: f64,
    ) -> Result<(), CoreError> {
        self.init()?;
        self.generation += 1;
        if let Some(id) = self.pending_release.take() {
            timers.cancel(id);
        }
        let (left_volume, right_volume, target, pan) =
            (self.left_volume, self.right_volume, self.target_volume, self.pan);
        let Some(graph) = self.graph.as_mut() else {
            return Err(CoreError::AudioUnavailable("signal graph missing".to_string()));
        };

        graph.release_all();
        graph.set(ParamTarget::Master, 0.0);
        graph.start_oscillator(Channel::Left, left);
        graph.start_oscillator(Channel::Right, right);
        graph.set(ParamTarget::Gain(Channel::Left), left_volume);
        graph.set(ParamTarget::Gain(Channel::Right), right_volume);
        graph.set(ParamTarget::Pan(Channel::Left), -pan);
        graph.set(ParamTarget::Pan(Channel::Right), pan);
        graph.ramp(ParamTarget::Master, target, fade);

        self.frequencies = (left, right);
        self.state = EngineState::Playing;
        debug!(left, right, fade, "drone started");

        if self.detune_active {
            self.jitter_detune();
        }
        Ok(())
    }

    /// Retune both channels. When nothing is playing this is `start`.
    pub fn set_frequencies(
        &mut self,
        timers: &mut Timers,
        left: f64,
        right: f64,
        transition: f64,
    ) -> Result<(), CoreError> {
        if !self.is_playing() {
            return self.start(timers, left, right, transition);
        }
        if let Some(graph) = self.graph.as_mut() {
            graph.ramp(ParamTarget::Frequency(Channel::Left), left, transition);
            graph.ramp(ParamTarget::Frequency(Channel::Right), right, transition);
        }
        self.frequencies = (left, right);
        debug!(left, right, transition, "drone retuned");
        Ok(())
    }

    /// Fade the master out, then release the oscillators once `fade`
    /// seconds of wall-clock time have passed. Safe to call repeatedly.
    pub fn stop(&mut self, timers: &mut Timers, fade: f64) {
        if !self.is_playing() {
            return;
        }
        self.state = EngineState::Idle;
        if let Some(graph) = self.graph.as_mut() {
            graph.ramp(ParamTarget::Master, 0.0, fade);
        }
        if let Some(id) = self.pending_release.take() {
            timers.cancel(id);
        }
        let delay_ms = (fade.max(0.0) * 1000.0).ceil() as u64;
        if delay_ms == 0 {
            self.release(self.generation);
        } else {
            self.pending_release = Some(timers.set_timeout(
                delay_ms,
                TimerEvent::ReleaseOscillators {
                    generation: self.generation,
                },
            ));
        }
        debug!(fade, "drone stopping");
    }

    /// Deferred teardown. Ignored when a later `start` superseded it.
    pub fn release(&mut self, generation: u64) -> bool {
        self.pending_release = None;
        if generation != self.generation || self.is_playing() {
            return false;
        }
        match self.graph.as_mut() {
            Some(graph) => {
                graph.set(ParamTarget::Master, 0.0);
                graph.release_all();
                true
            }
            None => false,
        }
    }

    pub fn set_left_volume(&mut self, volume: f64) {
        self.left_volume = volume.clamp(0.0, 1.0);
        self.smooth(ParamTarget::Gain(Channel::Left), self.left_volume);
    }

    pub fn set_right_volume(&mut self, volume: f64) {
        self.right_volume = volume.clamp(0.0, 1.0);
        self.smooth(ParamTarget::Gain(Channel::Right), self.right_volume);
    }

    /// Set the user's master volume. The value is remembered as the target
    /// other components scale against.
    pub fn set_master_volume(&mut self, volume: f64) {
        self.target_volume = volume.clamp(0.0, 1.0);
        if self.is_playing() {
            self.smooth(ParamTarget::Master, self.target_volume);
        }
    }

    /// Move the master gain without touching the remembered target.
    pub fn modulate_master_volume(&mut self, volume: f64) {
        if self.is_playing() {
            self.smooth(ParamTarget::Master, volume.clamp(0.0, 1.0));
        }
    }

    /// The volume the user asked for, independent of any ramp in flight.
    pub fn target_volume(&self) -> f64 {
        self.target_volume
    }

    pub fn left_volume(&self) -> f64 {
        self.left_volume
    }

    pub fn right_volume(&self) -> f64 {
        self.right_volume
    }

    fn smooth(&mut self, target: ParamTarget, value: f64) {
        let tau = self.settings.smoothing_seconds;
        if let Some(graph) = self.graph.as_mut() {
            graph.approach(target, value, tau);
        }
    }

    /// Toggle periodic random detune on both channels.
    pub fn set_detune(&mut self, timers: &mut Timers, active: bool) {
        self.detune_active = active;
        if active {
            if self.detune_timer.is_none() {
                self.detune_timer = Some(
                    timers.set_interval(self.settings.detune_period_ms, TimerEvent::DetuneJitter),
                );
            }
            self.jitter_detune();
        } else {
            if let Some(id) = self.detune_timer.take() {
                timers.cancel(id);
            }
            let tau = self.settings.detune_smoothing_seconds;
            if let Some(graph) = self.graph.as_mut() {
                for channel in Channel::BOTH {
                    graph.approach(ParamTarget::Detune(channel), 0.0, tau);
                }
            }
        }
        debug!(active, "detune toggled");
    }

    pub fn detune_active(&self) -> bool {
        self.detune_active
    }

    /// Draw new independent detune offsets for each channel.
    pub fn jitter_detune(&mut self) {
        if !self.detune_active || !self.is_playing() {
            return;
        }
        let range = self.settings.detune_cents.abs();
        let tau = self.settings.detune_smoothing_seconds;
        for channel in Channel::BOTH {
            let cents = if range > 0.0 {
                self.rng.gen_range(-range..=range)
            } else {
                0.0
            };
            if let Some(graph) = self.graph.as_mut() {
                graph.approach(ParamTarget::Detune(channel), cents, tau);
            }
        }
    }

    /// Place the channels at `-pan` (left) and `+pan` (right). 1.0 is full
    /// separation, 0.0 collapses to centre, -1.0 swaps sides.
    pub fn set_pan(&mut self, pan: f64) {
        self.pan = pan.clamp(-1.0, 1.0);
        if !self.is_playing() {
            return;
        }
        let tau = self.settings.pan_smoothing_seconds;
        if let Some(graph) = self.graph.as_mut() {
            graph.approach(ParamTarget::Pan(Channel::Left), -self.pan, tau);
            graph.approach(ParamTarget::Pan(Channel::Right), self.pan, tau);
        }
    }

    pub fn reset_pan(&mut self) {
        self.set_pan(1.0);
    }

    pub fn pan(&self) -> f64 {
        self.pan
    }

    /// Brief master boost above the target and back. The stored target is
    /// left untouched.
    pub fn pulse_volume(&mut self, intensity: f64) {
        if !self.is_playing() {
            return;
        }
        let target = self.target_volume;
        let peak = target * (1.0 + intensity.max(0.0));
        let rise = self.settings.pulse_rise_seconds;
        let fall = self.settings.pulse_fall_seconds;
        if let Some(graph) = self.graph.as_mut() {
            let now = graph.now();
            if let Some(master) = graph.param_mut(ParamTarget::Master) {
                master.prune(now);
                master.linear_ramp_at(peak, now, now + rise);
                master.linear_ramp_at(target, now + rise, now + rise + fall);
            }
        }
    }

    /// Last requested (left, right) frequencies.
    pub fn frequencies(&self) -> (f64, f64) {
        self.frequencies
    }

    pub fn binaural_beat(&self) -> f64 {
        (self.frequencies.1 - self.frequencies.0).abs()
    }

    pub fn beat_band(&self) -> &'static str {
        classify_beat(self.binaural_beat())
    }

    /// Instantaneous master gain on the audio clock.
    pub fn master_gain(&self) -> f64 {
        self.graph
            .as_ref()
            .and_then(|g| g.value(ParamTarget::Master))
            .unwrap_or(0.0)
    }

    /// Instantaneous value of any drone parameter.
    pub fn param_value(&self, target: ParamTarget) -> Option<f64> {
        self.graph.as_ref().and_then(|g| g.value(target))
    }

    pub fn has_oscillators(&self) -> bool {
        self.graph.as_ref().is_some_and(|g| g.has_any_oscillator())
    }

    pub fn render(&mut self, left: &mut [f64], right: &mut [f64]) {
        if let Some(graph) = self.graph.as_mut() {
            graph.render(left, right);
        }
    }
}
