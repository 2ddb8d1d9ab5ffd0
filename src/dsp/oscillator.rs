//! Phase-accumulating oscillators with per-sample frequency input.

use std::f64::consts::PI;

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    Sine,
    Triangle,
}

/// An oscillator whose frequency is supplied on every sample, so automated
/// frequency ramps glide without phase discontinuities.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Phase increment per sample for `frequency` shifted by `detune` cents.
    fn phase_inc(&self, frequency: f64, detune: f64) -> f64 {
        frequency * (2.0_f64).powf(detune / 1200.0) / self.sample_rate
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self, frequency: f64, detune: f64) -> f64 {
        let sample = match self.waveform {
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            // -1→+1 over the first half, +1→-1 over the second
            Waveform::Triangle => {
                if self.phase < 0.5 {
                    4.0 * self.phase - 1.0
                } else {
                    3.0 - 4.0 * self.phase
                }
            }
        };

        self.phase += self.phase_inc(frequency, detune);
        self.phase -= self.phase.floor();

        sample
    }
}
