//! Signal graph: two channel strips (oscillator → gain → pan) feeding a
//! shared master gain.
//!
//! The graph owns its oscillators and parameters outright. All timing is
//! read from the shared [`AudioClock`], so a ramp issued "now" by any caller
//! lines up with what the next rendered sample will hear.

use std::f64::consts::FRAC_PI_4;

use serde::{Deserialize, Serialize};

use crate::clock::AudioClock;
use crate::error::CoreError;

use super::oscillator::{Oscillator, Waveform};
use super::param::AudioParam;

/// One side of the stereo drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Left, Channel::Right];

    fn index(self) -> usize {
        match self {
            Channel::Left => 0,
            Channel::Right => 1,
        }
    }
}

/// Addressable parameters of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamTarget {
    Master,
    Gain(Channel),
    Pan(Channel),
    Frequency(Channel),
    Detune(Channel),
}

/// A running oscillator with automatable frequency and detune.
#[derive(Debug, Clone)]
pub struct OscillatorNode {
    osc: Oscillator,
    pub frequency: AudioParam,
    pub detune: AudioParam,
}

impl OscillatorNode {
    fn new(waveform: Waveform, sample_rate: f64, frequency: f64) -> Self {
        OscillatorNode {
            osc: Oscillator::new(waveform, sample_rate),
            frequency: AudioParam::new(frequency),
            detune: AudioParam::new(0.0),
        }
    }
}

#[derive(Debug, Clone)]
struct ChannelStrip {
    oscillator: Option<OscillatorNode>,
    gain: AudioParam,
    pan: AudioParam,
}

/// Per-channel oscillator/gain/pan chains summed through a master gain.
#[derive(Debug, Clone)]
pub struct SignalGraph {
    clock: AudioClock,
    waveform: Waveform,
    strips: [ChannelStrip; 2],
    master: AudioParam,
    unlocked: bool,
}

impl SignalGraph {
    /// Allocate a silent graph. Fails when the clock cannot drive audio.
    pub fn new(clock: AudioClock, waveform: Waveform) -> Result<Self, CoreError> {
        let sr = clock.sample_rate();
        if !sr.is_finite() || sr < 8000.0 {
            return Err(CoreError::AudioUnavailable(format!(
                "unsupported sample rate {sr}"
            )));
        }
        let strip = |pan: f64| ChannelStrip {
            oscillator: None,
            gain: AudioParam::new(1.0),
            pan: AudioParam::new(pan),
        };
        Ok(SignalGraph {
            clock,
            waveform,
            strips: [strip(-1.0), strip(1.0)],
            master: AudioParam::new(0.0),
            unlocked: false,
        })
    }

    /// Current time on the shared audio clock, in seconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn sample_rate(&self) -> f64 {
        self.clock.sample_rate()
    }

    /// Push one silent buffer through the output so platforms that gate
    /// audio behind a first playback start producing sound.
    pub fn unlock(&mut self) {
        if self.unlocked {
            return;
        }
        let mut left = [0.0; 1];
        let mut right = [0.0; 1];
        self.render(&mut left, &mut right);
        self.unlocked = true;
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Create a fresh oscillator on `channel`, replacing any existing one.
    pub fn start_oscillator(&mut self, channel: Channel, frequency: f64) {
        let node = OscillatorNode::new(self.waveform, self.sample_rate(), frequency);
        self.strips[channel.index()].oscillator = Some(node);
    }

    /// Tear down the oscillator on `channel`. Returns `false` if there was
    /// nothing to stop.
    pub fn stop_oscillator(&mut self, channel: Channel) -> bool {
        self.strips[channel.index()].oscillator.take().is_some()
    }

    pub fn release_all(&mut self) {
        for channel in Channel::BOTH {
            self.stop_oscillator(channel);
        }
    }

    pub fn has_oscillator(&self, channel: Channel) -> bool {
        self.strips[channel.index()].oscillator.is_some()
    }

    pub fn has_any_oscillator(&self) -> bool {
        Channel::BOTH.iter().any(|&c| self.has_oscillator(c))
    }

    /// Mutable access to a parameter. `None` for frequency/detune of a
    /// channel with no running oscillator.
    pub fn param_mut(&mut self, target: ParamTarget) -> Option<&mut AudioParam> {
        match target {
            ParamTarget::Master => Some(&mut self.master),
            ParamTarget::Gain(c) => Some(&mut self.strips[c.index()].gain),
            ParamTarget::Pan(c) => Some(&mut self.strips[c.index()].pan),
            ParamTarget::Frequency(c) => self.strips[c.index()]
                .oscillator
                .as_mut()
                .map(|o| &mut o.frequency),
            ParamTarget::Detune(c) => self.strips[c.index()]
                .oscillator
                .as_mut()
                .map(|o| &mut o.detune),
        }
    }

    pub fn param(&self, target: ParamTarget) -> Option<&AudioParam> {
        match target {
            ParamTarget::Master => Some(&self.master),
            ParamTarget::Gain(c) => Some(&self.strips[c.index()].gain),
            ParamTarget::Pan(c) => Some(&self.strips[c.index()].pan),
            ParamTarget::Frequency(c) => self.strips[c.index()]
                .oscillator
                .as_ref()
                .map(|o| &o.frequency),
            ParamTarget::Detune(c) => self.strips[c.index()]
                .oscillator
                .as_ref()
                .map(|o| &o.detune),
        }
    }

    /// Value of `target` right now.
    pub fn value(&self, target: ParamTarget) -> Option<f64> {
        let now = self.now();
        self.param(target).map(|p| p.value_at(now))
    }

    /// Immediate set, effective from the next rendered sample.
    pub fn set(&mut self, target: ParamTarget, value: f64) {
        let now = self.now();
        if let Some(p) = self.param_mut(target) {
            p.prune(now);
            p.set_value_at(value, now);
        }
    }

    /// Linear ramp from the current value, anchored at the clock's now.
    pub fn ramp(&mut self, target: ParamTarget, value: f64, duration: f64) {
        let now = self.now();
        if let Some(p) = self.param_mut(target) {
            p.prune(now);
            p.linear_ramp(value, now, duration);
        }
    }

    /// Exponential-decay approach toward `value` with time constant `tau`.
    pub fn approach(&mut self, target: ParamTarget, value: f64, tau: f64) {
        let now = self.now();
        if let Some(p) = self.param_mut(target) {
            p.prune(now);
            p.set_target(value, now, tau);
        }
    }

    /// Accumulate `left.len()` frames of output starting at the clock's
    /// current frame. The clock itself is advanced by the caller.
    pub fn render(&mut self, left: &mut [f64], right: &mut [f64]) {
        let frames = left.len().min(right.len());
        let sr = self.sample_rate();
        let start = self.clock.frame();
        let t0 = start as f64 / sr;

        self.master.prune(t0);
        for strip in self.strips.iter_mut() {
            strip.gain.prune(t0);
            strip.pan.prune(t0);
            if let Some(node) = strip.oscillator.as_mut() {
                node.frequency.prune(t0);
                node.detune.prune(t0);
            }
        }

        for i in 0..frames {
            let t = (start + i as u64) as f64 / sr;
            let master = self.master.value_at(t);
            for strip in self.strips.iter_mut() {
                let Some(node) = strip.oscillator.as_mut() else {
                    continue;
                };
                let freq = node.frequency.value_at(t);
                let detune = node.detune.value_at(t);
                let s = node.osc.next_sample(freq, detune) * strip.gain.value_at(t) * master;
                let (l, r) = equal_power_pan(strip.pan.value_at(t));
                left[i] += s * l;
                right[i] += s * r;
            }
        }
    }
}

/// Equal-power pan law: -1 = hard left, 0 = centre, +1 = hard right.
pub fn equal_power_pan(pan: f64) -> (f64, f64) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}
