//! Microphone pitch detection.
//!
//! Autocorrelation over a fixed analysis window: skip the initial
//! descending run of the correlation (so lag 0 never wins), take the
//! strongest peak beyond it, then refine the lag to sub-sample precision
//! with a parabola through its neighbours.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Context;
use crate::error::CoreError;
use crate::events::UiEvent;
use crate::tables::NOTE_NAMES;

pub const WINDOW_SIZE: usize = 4096;
pub const DEFAULT_SILENCE_THRESHOLD: f64 = 0.01;
pub const MIN_FREQUENCY: f64 = 50.0;
pub const MAX_FREQUENCY: f64 = 1500.0;
/// Largest deviation still shown as "in tune".
pub const IN_TUNE_CENTS: f64 = 5.0;
/// Needle full-scale deflection.
pub const NEEDLE_RANGE_CENTS: f64 = 50.0;

/// Root-mean-square amplitude.
pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
}

/// Estimate the fundamental of `samples` in Hz.
///
/// Returns `None` when no usable periodicity exists or the estimate falls
/// outside [`MIN_FREQUENCY`, `MAX_FREQUENCY`].
pub fn autocorrelate(samples: &[f64], sample_rate: f64) -> Option<f64> {
    let n = samples.len();
    if n < 4 {
        return None;
    }

    let mut corr = vec![0.0f64; n];
    for (lag, c) in corr.iter_mut().enumerate() {
        *c = samples[..n - lag]
            .iter()
            .zip(&samples[lag..])
            .map(|(a, b)| a * b)
            .sum();
    }

    // Energy of both overlapping segments per lag, for the normalised
    // correlation used during refinement.
    let mut energy = vec![0.0f64; n];
    energy[0] = 2.0 * corr[0];
    for lag in 1..n {
        energy[lag] = energy[lag - 1] - samples[n - lag] * samples[n - lag] - samples[lag - 1] * samples[lag - 1];
    }
    let normalised = |lag: usize| {
        if energy[lag] > 1e-12 { 2.0 * corr[lag] / energy[lag] } else { 0.0 }
    };

    let mut start = 0;
    while start + 1 < n && corr[start] > corr[start + 1] {
        start += 1;
    }
    if start + 1 >= n {
        return None;
    }

    let (mut peak, peak_value) = corr[start..]
        .iter()
        .enumerate()
        .fold((start, f64::MIN), |best, (i, &v)| if v > best.1 { (start + i, v) } else { best });
    if peak_value <= 0.0 {
        return None;
    }

    // The raw correlation is weighted by overlap length, which pulls its
    // peak toward shorter lags. Settle on the normalised peak instead.
    while peak + 1 < n - 1 && normalised(peak + 1) > normalised(peak) {
        peak += 1;
    }
    while peak > start + 1 && normalised(peak - 1) > normalised(peak) {
        peak -= 1;
    }
    if peak == 0 || peak + 1 >= n {
        return None;
    }

    let (x1, x2, x3) = (normalised(peak - 1), normalised(peak), normalised(peak + 1));
    let a = (x1 + x3 - 2.0 * x2) / 2.0;
    let b = (x3 - x1) / 2.0;
    let lag = if a.abs() > 1e-12 { peak as f64 - b / (2.0 * a) } else { peak as f64 };
    if lag <= 0.0 {
        return None;
    }

    let frequency = sample_rate / lag;
    (MIN_FREQUENCY..=MAX_FREQUENCY)
        .contains(&frequency)
        .then_some(frequency)
}

/// Deviation in cents of `frequency` from `target`.
pub fn cents_between(frequency: f64, target: f64) -> f64 {
    1200.0 * (frequency / target).log2()
}

/// Nearest chromatic note to `frequency`: (name, octave, exact frequency).
pub fn frequency_to_note(frequency: f64, reference_pitch: f64) -> (&'static str, i32, f64) {
    let semitones = (12.0 * (frequency / reference_pitch).log2()).round() as i32;
    let name = NOTE_NAMES[(semitones + 9).rem_euclid(12) as usize];
    let octave = (semitones + 57).div_euclid(12);
    let exact = reference_pitch * 2.0_f64.powf(semitones as f64 / 12.0);
    (name, octave, exact)
}

/// One detected pitch, ready for the tuning meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchInfo {
    pub frequency: f64,
    pub note: String,
    pub octave: i32,
    /// Signed deviation from the target, not clamped.
    pub cents: f64,
    /// Needle position in -1..=1 (cents clamped to ±50).
    pub needle: f64,
    pub in_tune: bool,
    /// Frequency the cents are measured against.
    pub target: f64,
}

/// Outcome of one detection frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PitchReading {
    NoSignal,
    Pitch(PitchInfo),
}

impl PitchReading {
    pub fn frequency(&self) -> Option<f64> {
        match self {
            PitchReading::Pitch(info) => Some(info.frequency),
            PitchReading::NoSignal => None,
        }
    }
}

/// Processing the platform must leave off for a clean pitch signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl CaptureConstraints {
    pub const RAW: CaptureConstraints = CaptureConstraints {
        echo_cancellation: false,
        noise_suppression: false,
        auto_gain_control: false,
    };
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::RAW
    }
}

/// A source of microphone samples.
pub trait InputDevice {
    /// Acquire the stream. Returns its sample rate.
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<f64, CoreError>;
    /// Copy the most recent `out.len()` samples, oldest first.
    fn read_window(&mut self, out: &mut [f64]);
    fn close(&mut self);
}

/// Ring buffer the host pushes captured samples into.
#[derive(Debug, Clone)]
pub struct BufferedInput {
    ring: Vec<f64>,
    write: usize,
    sample_rate: Option<f64>,
    open: bool,
}

impl BufferedInput {
    pub fn new(capacity: usize) -> Self {
        BufferedInput {
            ring: vec![0.0; capacity.max(1)],
            write: 0,
            sample_rate: None,
            open: false,
        }
    }

    /// The host granted a stream at `sample_rate`.
    pub fn connect(&mut self, sample_rate: f64) {
        self.sample_rate = Some(sample_rate);
    }

    /// The stream went away (or permission was revoked).
    pub fn disconnect(&mut self) {
        self.sample_rate = None;
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Append captured samples. Dropped while the stream is closed.
    pub fn push(&mut self, samples: &[f32]) {
        if !self.open {
            return;
        }
        let len = self.ring.len();
        for &s in samples {
            self.ring[self.write] = s as f64;
            self.write = (self.write + 1) % len;
        }
    }
}

impl Default for BufferedInput {
    fn default() -> Self {
        Self::new(WINDOW_SIZE)
    }
}

impl InputDevice for BufferedInput {
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<f64, CoreError> {
        let Some(sample_rate) = self.sample_rate else {
            return Err(CoreError::MicrophoneDenied("no microphone stream connected".to_string()));
        };
        debug!(?constraints, sample_rate, "microphone opened");
        self.ring.fill(0.0);
        self.write = 0;
        self.open = true;
        Ok(sample_rate)
    }

    fn read_window(&mut self, out: &mut [f64]) {
        let len = self.ring.len();
        let take = out.len().min(len);
        let pad = out.len() - take;
        out[..pad].fill(0.0);
        let first = (self.write + len - take) % len;
        for (i, slot) in out[pad..].iter_mut().enumerate() {
            *slot = self.ring[(first + i) % len];
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorSettings {
    pub window_size: usize,
    /// RMS below which a frame counts as silence.
    pub silence_threshold: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
        }
    }
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.window_size < 256 {
            return Err(CoreError::InvalidConfig(format!("analysis window {} too small", self.window_size)));
        }
        if !(self.silence_threshold >= 0.0) {
            return Err(CoreError::InvalidConfig("silence threshold must be non-negative".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Listening,
}

/// Frame-paced pitch tracker over an [`InputDevice`].
pub struct PitchDetector<I: InputDevice = BufferedInput> {
    input: I,
    settings: DetectorSettings,
    state: DetectorState,
    sample_rate: f64,
    reference_pitch: f64,
    target: Option<f64>,
    window: Vec<f64>,
}

impl<I: InputDevice> PitchDetector<I> {
    pub fn new(input: I, settings: DetectorSettings, reference_pitch: f64) -> Self {
        PitchDetector {
            input,
            settings,
            state: DetectorState::Idle,
            sample_rate: 0.0,
            reference_pitch,
            target: None,
            window: Vec::new(),
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == DetectorState::Listening
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }

    /// Measure cents against `target` instead of the nearest note.
    pub fn set_target(&mut self, target: Option<f64>) {
        self.target = target.filter(|f| *f > 0.0);
    }

    pub fn target(&self) -> Option<f64> {
        self.target
    }

    pub fn set_reference(&mut self, reference_pitch: f64) {
        self.reference_pitch = reference_pitch;
    }

    /// Open the microphone and begin listening. On refusal the detector
    /// stays idle and the error is returned.
    pub fn start(&mut self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        if self.is_listening() {
            return Ok(());
        }
        self.sample_rate = self.input.open(&CaptureConstraints::RAW)?;
        self.state = DetectorState::Listening;
        info!(sample_rate = self.sample_rate, "pitch detection started");
        cx.emit(UiEvent::Listening { active: true });
        Ok(())
    }

    /// Release the microphone and reset the meter. Safe when idle.
    pub fn stop(&mut self, cx: &mut Context<'_>) {
        if !self.is_listening() {
            return;
        }
        self.input.close();
        self.state = DetectorState::Idle;
        info!("pitch detection stopped");
        cx.emit(UiEvent::Listening { active: false });
        cx.emit(UiEvent::Pitch {
            reading: PitchReading::NoSignal,
        });
    }

    /// One detection pass. Returns `None` while idle.
    pub fn on_frame(&mut self, cx: &mut Context<'_>) -> Option<PitchReading> {
        if !self.is_listening() {
            return None;
        }
        self.window.clear();
        self.window.resize(self.settings.window_size, 0.0);
        self.input.read_window(&mut self.window);
        let reading = self.analyse(&self.window);
        cx.emit(UiEvent::Pitch {
            reading: reading.clone(),
        });
        Some(reading)
    }

    /// Turn a window of samples into a reading.
    pub fn analyse(&self, samples: &[f64]) -> PitchReading {
        if rms(samples) < self.settings.silence_threshold {
            return PitchReading::NoSignal;
        }
        match autocorrelate(samples, self.sample_rate) {
            Some(frequency) => PitchReading::Pitch(self.describe(frequency)),
            None => PitchReading::NoSignal,
        }
    }

    fn describe(&self, frequency: f64) -> PitchInfo {
        let (name, octave, exact) = frequency_to_note(frequency, self.reference_pitch);
        let target = self.target.unwrap_or(exact);
        let cents = cents_between(frequency, target);
        PitchInfo {
            frequency,
            note: name.to_string(),
            octave,
            cents,
            needle: cents.clamp(-NEEDLE_RANGE_CENTS, NEEDLE_RANGE_CENTS) / NEEDLE_RANGE_CENTS,
            in_tune: cents.abs() <= IN_TUNE_CENTS,
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timers;
    use std::f64::consts::PI;

    fn generate_sine(freq: f64, sample_rate: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn listening(reference: f64) -> (PitchDetector, Timers, Vec<UiEvent>) {
        let mut input = BufferedInput::default();
        input.connect(44100.0);
        let mut detector = PitchDetector::new(input, DetectorSettings::default(), reference);
        let mut timers = Timers::new();
        let mut events = Vec::new();
        detector.start(&mut Context::new(&mut timers, &mut events)).unwrap();
        (detector, timers, events)
    }

    #[test]
    fn sine_within_half_percent() {
        for sr in [44100.0, 48000.0] {
            let mut f = 80.0;
            while f <= 1000.0 {
                let samples = generate_sine(f, sr, WINDOW_SIZE);
                let detected = autocorrelate(&samples, sr).unwrap();
                assert!((detected - f).abs() / f <= 0.005, "{f} Hz at {sr}: got {detected}");
                f *= 1.13;
            }
        }
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert_eq!(autocorrelate(&generate_sine(2000.0, 44100.0, WINDOW_SIZE), 44100.0), None);
        assert_eq!(autocorrelate(&[0.0; WINDOW_SIZE], 44100.0), None);
        assert_eq!(autocorrelate(&[], 44100.0), None);
    }

    #[test]
    fn cents_match_exact_offsets() {
        for n in [-50.0, -7.5, 0.0, 3.0, 31.77] {
            let target = 220.0;
            let f = target * 2.0_f64.powf(n / 1200.0);
            assert!((cents_between(f, target) - n).abs() < 1e-9);
        }
    }

    #[test]
    fn note_names_and_octaves() {
        assert_eq!(frequency_to_note(440.0, 440.0).0, "A");
        assert_eq!(frequency_to_note(440.0, 440.0).1, 4);
        let (name, octave, exact) = frequency_to_note(261.0, 440.0);
        assert_eq!((name, octave), ("C", 4));
        assert!((exact - 261.63).abs() < 0.01);
        assert_eq!(frequency_to_note(493.0, 440.0).1, 4);
        assert_eq!(frequency_to_note(82.41, 440.0), ("E", 2, 440.0 * 2.0_f64.powf(-29.0 / 12.0)));
    }

    #[test]
    fn silence_reports_no_signal() {
        let (mut detector, mut timers, mut events) = listening(440.0);
        detector.input_mut().push(&[0.001; WINDOW_SIZE]);
        let reading = detector.on_frame(&mut Context::new(&mut timers, &mut events));
        assert_eq!(reading, Some(PitchReading::NoSignal));
    }

    #[test]
    fn live_frame_reads_note_against_target() {
        let (mut detector, mut timers, mut events) = listening(432.0);
        let tone: Vec<f32> = generate_sine(146.0, 44100.0, WINDOW_SIZE).iter().map(|&s| s as f32).collect();
        detector.input_mut().push(&tone);
        detector.set_target(Some(144.16));

        let Some(PitchReading::Pitch(info)) = detector.on_frame(&mut Context::new(&mut timers, &mut events)) else {
            panic!("expected a pitch");
        };
        assert_eq!(info.note, "D");
        assert_eq!(info.octave, 3);
        assert_eq!(info.target, 144.16);
        // ~22 cents sharp of the string
        assert!(info.cents > 15.0 && info.cents < 30.0, "cents {}", info.cents);
        assert!(!info.in_tune);
        assert!((info.needle - info.cents / 50.0).abs() < 1e-12);
        assert!(matches!(events.last(), Some(UiEvent::Pitch { .. })));
    }

    #[test]
    fn needle_clamps_but_cents_do_not() {
        let detector = PitchDetector::new(BufferedInput::default(), DetectorSettings::default(), 440.0);
        let info = detector.describe(440.0 * 2.0_f64.powf(45.0 / 1200.0));
        assert!((info.cents - 45.0).abs() < 1e-9);

        let mut detector = detector;
        detector.set_target(Some(400.0));
        let info = detector.describe(440.0);
        assert!(info.cents > 100.0);
        assert_eq!(info.needle, 1.0);
    }

    #[test]
    fn denied_microphone_stays_idle() {
        let mut detector = PitchDetector::new(BufferedInput::default(), DetectorSettings::default(), 440.0);
        let mut timers = Timers::new();
        let mut events = Vec::new();
        let mut cx = Context::new(&mut timers, &mut events);
        let err = detector.start(&mut cx).unwrap_err();
        assert!(matches!(err, CoreError::MicrophoneDenied(_)));
        assert_eq!(detector.state(), DetectorState::Idle);
        assert_eq!(detector.on_frame(&mut cx), None);
        assert!(events.is_empty());
    }

    #[test]
    fn stop_resets_meter_once() {
        let (mut detector, mut timers, mut events) = listening(440.0);
        events.clear();
        let mut cx = Context::new(&mut timers, &mut events);
        detector.stop(&mut cx);
        detector.stop(&mut cx);
        assert_eq!(
            events,
            vec![
                UiEvent::Listening { active: false },
                UiEvent::Pitch {
                    reading: PitchReading::NoSignal
                }
            ]
        );
    }

    #[test]
    fn ring_keeps_most_recent_samples() {
        let mut input = BufferedInput::new(4);
        input.connect(8000.0);
        input.open(&CaptureConstraints::RAW).unwrap();
        input.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut out = [0.0; 4];
        input.read_window(&mut out);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }
}
