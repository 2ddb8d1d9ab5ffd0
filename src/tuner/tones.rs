//! Reference-tone player for instrument tuning.
//!
//! Runs on its own [`SignalGraph`], never the drone's. Play modes are
//! mutually exclusive: starting one silences whatever else was sounding.

use tracing::debug;

use crate::clock::{AudioClock, Context, TimerEvent, TimerId};
use crate::dsp::graph::{Channel, ParamTarget, SignalGraph};
use crate::dsp::oscillator::Waveform;
use crate::error::CoreError;
use crate::events::UiEvent;
use crate::tables::Instrument;

use super::{REFERENCE_RANGE, TunerConfig, TunerString};

pub const SWEEP_DWELL_MS: u64 = 3000;
pub const CHECK_DURATION_MS: u64 = 4000;

/// How a string click behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    /// Sound only while the string is held.
    Normal,
    /// A click latches the tone until clicked again.
    Drone,
}

/// What the tuner is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Silent,
    Held(usize),
    Drone(usize),
    Sweep(usize),
    OctaveCheck,
    FifthCheck,
}

pub struct TunerToneEngine {
    clock: AudioClock,
    config: TunerConfig,
    graph: Option<SignalGraph>,
    mode: PlayMode,
    activity: Activity,
    sounding: bool,
    sweep_timer: Option<TimerId>,
    check_timer: Option<TimerId>,
    generation: u64,
    pending_release: Option<TimerId>,
}

impl TunerToneEngine {
    pub fn new(clock: AudioClock, config: TunerConfig) -> Self {
        TunerToneEngine {
            clock,
            config,
            graph: None,
            mode: PlayMode::Normal,
            activity: Activity::Silent,
            sounding: false,
            sweep_timer: None,
            check_timer: None,
            generation: 0,
            pending_release: None,
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding
    }

    pub fn strings(&self) -> Vec<TunerString> {
        self.config.strings()
    }

    fn graph(&mut self) -> Result<&mut SignalGraph, CoreError> {
        if self.graph.is_none() {
            let mut graph = SignalGraph::new(self.clock.clone(), Waveform::Sine)?;
            graph.unlock();
            for channel in Channel::BOTH {
                graph.set(ParamTarget::Pan(channel), 0.0);
            }
            self.graph = Some(graph);
        }
        self.graph
            .as_mut()
            .ok_or_else(|| CoreError::AudioUnavailable("tuner graph missing".to_string()))
    }

    /// Sound a single reference tone.
    pub fn play_tone(&mut self, cx: &mut Context<'_>, frequency: f64) -> Result<(), CoreError> {
        self.sound(cx, &[frequency])
    }

    /// Sound two reference tones together (interval checks).
    pub fn play_two_tones(&mut self, cx: &mut Context<'_>, first: f64, second: f64) -> Result<(), CoreError> {
        self.sound(cx, &[first, second])
    }

    fn sound(&mut self, cx: &mut Context<'_>, frequencies: &[f64]) -> Result<(), CoreError> {
        let volume = self.config.volume;
        let fade = self.config.fade_seconds;
        if let Some(id) = self.pending_release.take() {
            cx.timers.cancel(id);
        }
        self.generation += 1;
        let graph = self.graph()?;
        let level = 1.0 / frequencies.len().max(1) as f64;

        if !graph.has_any_oscillator() {
            graph.set(ParamTarget::Master, 0.0);
        }
        for (i, channel) in Channel::BOTH.into_iter().enumerate() {
            match frequencies.get(i) {
                Some(&f) if graph.has_oscillator(channel) => {
                    graph.ramp(ParamTarget::Frequency(channel), f, fade);
                    graph.ramp(ParamTarget::Gain(channel), level, fade);
                }
                Some(&f) => {
                    graph.start_oscillator(channel, f);
                    graph.set(ParamTarget::Gain(channel), 0.0);
                    graph.ramp(ParamTarget::Gain(channel), level, fade);
                }
                None => graph.ramp(ParamTarget::Gain(channel), 0.0, fade),
            }
        }
        graph.ramp(ParamTarget::Master, volume, fade);

        self.sounding = true;
        cx.emit(UiEvent::TunerTone {
            frequencies: frequencies.to_vec(),
        });
        Ok(())
    }

    /// Fade out whatever is sounding. Safe to call when already silent.
    pub fn stop_tone(&mut self, cx: &mut Context<'_>) {
        if !self.sounding {
            return;
        }
        self.sounding = false;
        let fade = self.config.fade_seconds;
        if let Some(graph) = self.graph.as_mut() {
            graph.ramp(ParamTarget::Master, 0.0, fade);
        }
        if let Some(id) = self.pending_release.take() {
            cx.timers.cancel(id);
        }
        let delay = (fade * 1000.0).ceil() as u64;
        self.pending_release = Some(cx.timers.set_timeout(
            delay,
            TimerEvent::ReleaseTunerTone {
                generation: self.generation,
            },
        ));
        cx.emit(UiEvent::TunerTone {
            frequencies: Vec::new(),
        });
    }

    /// Deferred oscillator teardown. Ignored if a newer tone started.
    pub fn release(&mut self, generation: u64) {
        self.pending_release = None;
        if generation != self.generation || self.sounding {
            return;
        }
        if let Some(graph) = self.graph.as_mut() {
            graph.release_all();
        }
    }

    /// Silence everything and cancel sweep/check timers.
    pub fn stop_all(&mut self, cx: &mut Context<'_>) {
        if let Some(id) = self.sweep_timer.take() {
            cx.timers.cancel(id);
        }
        if let Some(id) = self.check_timer.take() {
            cx.timers.cancel(id);
        }
        self.stop_tone(cx);
        if self.activity != Activity::Silent {
            self.activity = Activity::Silent;
            cx.emit(UiEvent::TunerString { index: None });
        }
    }

    fn play_string(&mut self, cx: &mut Context<'_>, index: usize) -> Result<f64, CoreError> {
        let frequency = self.config.string_frequency(index)?;
        self.play_tone(cx, frequency)?;
        cx.emit(UiEvent::TunerString { index: Some(index) });
        Ok(frequency)
    }

    /// Toggle between latched (drone) and held (normal) string playing.
    pub fn toggle_drone(&mut self, cx: &mut Context<'_>) -> PlayMode {
        self.stop_all(cx);
        self.mode = match self.mode {
            PlayMode::Normal => PlayMode::Drone,
            PlayMode::Drone => PlayMode::Normal,
        };
        debug!(mode = ?self.mode, "tuner play mode");
        self.mode
    }

    /// Trigger pressed on a string. Returns the string frequency when a
    /// tone started.
    pub fn press_string(&mut self, cx: &mut Context<'_>, index: usize) -> Result<Option<f64>, CoreError> {
        if self.mode != PlayMode::Normal {
            return Ok(None);
        }
        self.stop_all(cx);
        let frequency = self.play_string(cx, index)?;
        self.activity = Activity::Held(index);
        Ok(Some(frequency))
    }

    /// Trigger released. Only the held string's release stops it.
    pub fn release_string(&mut self, cx: &mut Context<'_>, index: usize) {
        if self.activity == Activity::Held(index) {
            self.stop_all(cx);
        }
    }

    /// Click on a string in drone mode: latch it, or unlatch if it is the
    /// one already droning.
    pub fn click_string(&mut self, cx: &mut Context<'_>, index: usize) -> Result<Option<f64>, CoreError> {
        if self.mode != PlayMode::Drone {
            return Ok(None);
        }
        if self.activity == Activity::Drone(index) {
            self.stop_all(cx);
            return Ok(None);
        }
        self.stop_all(cx);
        let frequency = self.play_string(cx, index)?;
        self.activity = Activity::Drone(index);
        Ok(Some(frequency))
    }

    /// Step through every string with a fixed dwell, once.
    pub fn toggle_sweep(&mut self, cx: &mut Context<'_>) -> Result<bool, CoreError> {
        if matches!(self.activity, Activity::Sweep(_)) {
            self.stop_all(cx);
            return Ok(false);
        }
        self.stop_all(cx);
        self.play_string(cx, 0)?;
        self.activity = Activity::Sweep(0);
        self.sweep_timer = Some(cx.timers.set_interval(SWEEP_DWELL_MS, TimerEvent::SweepAdvance));
        Ok(true)
    }

    pub fn on_sweep_advance(&mut self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        let Activity::Sweep(index) = self.activity else {
            return Ok(());
        };
        let next = index + 1;
        if next >= self.config.instrument.strings().len() {
            self.stop_all(cx);
            return Ok(());
        }
        self.play_string(cx, next)?;
        self.activity = Activity::Sweep(next);
        Ok(())
    }

    /// Root at octaves 2 and 3 together.
    pub fn toggle_octave_check(&mut self, cx: &mut Context<'_>) -> Result<bool, CoreError> {
        let pair = (self.config.root_frequency(0, 2), self.config.root_frequency(0, 3));
        self.toggle_check(cx, Activity::OctaveCheck, pair)
    }

    /// Root and its fifth in octave 3 together.
    pub fn toggle_fifth_check(&mut self, cx: &mut Context<'_>) -> Result<bool, CoreError> {
        let pair = (self.config.root_frequency(0, 3), self.config.root_frequency(7, 3));
        self.toggle_check(cx, Activity::FifthCheck, pair)
    }

    fn toggle_check(&mut self, cx: &mut Context<'_>, check: Activity, (first, second): (f64, f64)) -> Result<bool, CoreError> {
        if self.activity == check {
            self.stop_all(cx);
            return Ok(false);
        }
        self.stop_all(cx);
        self.play_two_tones(cx, first, second)?;
        self.activity = check;
        self.check_timer = Some(cx.timers.set_timeout(CHECK_DURATION_MS, TimerEvent::CheckTimeout));
        Ok(true)
    }

    pub fn on_check_timeout(&mut self, cx: &mut Context<'_>) {
        self.check_timer = None;
        if matches!(self.activity, Activity::OctaveCheck | Activity::FifthCheck) {
            self.stop_all(cx);
        }
    }

    pub fn set_reference_pitch(&mut self, cx: &mut Context<'_>, hz: f64) -> Result<(), CoreError> {
        if !REFERENCE_RANGE.contains(&hz) {
            return Err(CoreError::InvalidConfig(format!("reference pitch {hz} outside {REFERENCE_RANGE:?}")));
        }
        self.config.reference_pitch = hz;
        self.retune(cx)
    }

    pub fn set_transposition(&mut self, cx: &mut Context<'_>, semitones: i32) -> Result<(), CoreError> {
        self.config.transposition = semitones.clamp(-12, 12);
        self.retune(cx)
    }

    pub fn select_instrument(&mut self, cx: &mut Context<'_>, instrument: Instrument) {
        self.stop_all(cx);
        self.config.instrument = instrument;
    }

    /// Re-sound the current activity with the updated configuration.
    fn retune(&mut self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        if !self.sounding {
            return Ok(());
        }
        match self.activity {
            Activity::Held(i) | Activity::Drone(i) | Activity::Sweep(i) => {
                let f = self.config.string_frequency(i)?;
                self.play_tone(cx, f)
            }
            Activity::OctaveCheck => {
                let (a, b) = (self.config.root_frequency(0, 2), self.config.root_frequency(0, 3));
                self.play_two_tones(cx, a, b)
            }
            Activity::FifthCheck => {
                let (a, b) = (self.config.root_frequency(0, 3), self.config.root_frequency(7, 3));
                self.play_two_tones(cx, a, b)
            }
            Activity::Silent => Ok(()),
        }
    }

    /// Current frequency of a tuner oscillator, if one is running.
    pub fn frequency(&self, channel: Channel) -> Option<f64> {
        self.graph
            .as_ref()
            .and_then(|g| g.value(ParamTarget::Frequency(channel)))
    }

    pub fn master_gain(&self) -> f64 {
        self.graph
            .as_ref()
            .and_then(|g| g.value(ParamTarget::Master))
            .unwrap_or(0.0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timers;

    struct Rig {
        clock: AudioClock,
        timers: Timers,
        events: Vec<UiEvent>,
        tuner: TunerToneEngine,
    }

    impl Rig {
        fn new() -> Self {
            let clock = AudioClock::new(44100.0);
            let tuner = TunerToneEngine::new(clock.clone(), TunerConfig::default());
            Rig {
                clock,
                timers: Timers::new(),
                events: Vec::new(),
                tuner,
            }
        }

        fn with<R>(&mut self, f: impl FnOnce(&mut TunerToneEngine, &mut Context<'_>) -> R) -> R {
            let mut cx = Context::new(&mut self.timers, &mut self.events);
            f(&mut self.tuner, &mut cx)
        }

        fn run(&mut self, ms: u64) {
            while let Some((_, event)) = self.timers.pop_due(ms) {
                self.clock.advance_to_ms(self.timers.now_ms());
                let mut cx = Context::new(&mut self.timers, &mut self.events);
                match event {
                    TimerEvent::SweepAdvance => self.tuner.on_sweep_advance(&mut cx).unwrap(),
                    TimerEvent::CheckTimeout => self.tuner.on_check_timeout(&mut cx),
                    TimerEvent::ReleaseTunerTone { generation } => self.tuner.release(generation),
                    _ => {}
                }
            }
            self.timers.advance_to(ms);
            self.clock.advance_to_ms(ms);
        }
    }

    #[test]
    fn octave_check_plays_both_roots_and_auto_stops() {
        let mut rig = Rig::new();
        assert!(rig.with(|t, cx| t.toggle_octave_check(cx)).unwrap());
        assert_eq!(rig.tuner.frequency(Channel::Left), Some(72.08));
        assert_eq!(rig.tuner.frequency(Channel::Right), Some(144.16));
        assert!(rig.events.contains(&UiEvent::TunerTone {
            frequencies: vec![72.08, 144.16]
        }));
        rig.run(3999);
        assert_eq!(rig.tuner.activity(), Activity::OctaveCheck);
        assert!(rig.tuner.is_sounding());
        rig.run(4000);
        assert_eq!(rig.tuner.activity(), Activity::Silent);
        assert!(!rig.tuner.is_sounding());
        rig.run(4100);
        assert!(!rig.tuner.has_oscillators());
        assert_eq!(rig.tuner.master_gain(), 0.0);
    }

    #[test]
    fn manual_stop_cancels_check_timeout() {
        let mut rig = Rig::new();
        rig.with(|t, cx| t.toggle_fifth_check(cx)).unwrap();
        assert_eq!(rig.tuner.frequency(Channel::Right), Some(216.0));
        rig.run(1000);
        assert!(!rig.with(|t, cx| t.toggle_fifth_check(cx)).unwrap());
        rig.run(10_000);
        assert!(rig.timers.is_empty());
        assert_eq!(rig.tuner.activity(), Activity::Silent);
    }

    #[test]
    fn sweep_visits_every_string_then_stops() {
        let mut rig = Rig::new();
        rig.with(|t, cx| t.toggle_sweep(cx)).unwrap();
        let strings = rig.tuner.strings();
        let mut heard = vec![rig.tuner.frequency(Channel::Left).unwrap()];
        for step in 1..strings.len() as u64 {
            rig.run(step * SWEEP_DWELL_MS + 100);
            heard.push(rig.tuner.frequency(Channel::Left).unwrap());
        }
        let expected: Vec<f64> = strings.iter().map(|s| s.frequency).collect();
        assert_eq!(heard, expected);
        rig.run(strings.len() as u64 * SWEEP_DWELL_MS + 100);
        assert_eq!(rig.tuner.activity(), Activity::Silent);
        assert!(rig.timers.is_empty());
    }

    #[test]
    fn normal_mode_sounds_only_while_held() {
        let mut rig = Rig::new();
        let f = rig.with(|t, cx| t.press_string(cx, 1)).unwrap();
        assert_eq!(f, Some(144.16));
        assert!(rig.tuner.is_sounding());
        rig.with(|t, cx| t.release_string(cx, 0));
        assert!(rig.tuner.is_sounding(), "releasing another string stopped the tone");
        rig.with(|t, cx| t.release_string(cx, 1));
        assert!(!rig.tuner.is_sounding());
        // clicks are ignored outside drone mode
        assert_eq!(rig.with(|t, cx| t.click_string(cx, 1)).unwrap(), None);
    }

    #[test]
    fn drone_mode_latches_until_clicked_again() {
        let mut rig = Rig::new();
        assert_eq!(rig.with(|t, cx| t.toggle_drone(cx)), PlayMode::Drone);
        rig.with(|t, cx| t.click_string(cx, 2)).unwrap();
        rig.run(60_000);
        assert_eq!(rig.tuner.activity(), Activity::Drone(2));
        assert!(rig.tuner.is_sounding());
        rig.with(|t, cx| t.click_string(cx, 2)).unwrap();
        assert!(!rig.tuner.is_sounding());
    }

    #[test]
    fn starting_a_mode_stops_the_previous_one() {
        let mut rig = Rig::new();
        rig.with(|t, cx| t.toggle_sweep(cx)).unwrap();
        rig.with(|t, cx| t.toggle_octave_check(cx)).unwrap();
        assert_eq!(rig.tuner.activity(), Activity::OctaveCheck);
        // the sweep interval is gone; only the check timeout remains
        rig.run(3500);
        assert_eq!(rig.tuner.activity(), Activity::OctaveCheck);
        assert_eq!(rig.tuner.frequency(Channel::Left), Some(72.08));
    }

    #[test]
    fn retune_follows_reference_pitch() {
        let mut rig = Rig::new();
        rig.with(|t, cx| t.press_string(cx, 1)).unwrap();
        rig.with(|t, cx| t.set_reference_pitch(cx, 440.0)).unwrap();
        rig.run(1000);
        assert_eq!(rig.tuner.frequency(Channel::Left), Some(146.83));
        assert!(rig.with(|t, cx| t.set_reference_pitch(cx, 100.0)).is_err());
    }

    #[test]
    fn stop_tone_is_idempotent() {
        let mut rig = Rig::new();
        rig.with(|t, cx| t.play_tone(cx, 220.0)).unwrap();
        rig.with(|t, cx| t.stop_tone(cx));
        rig.with(|t, cx| t.stop_tone(cx));
        assert_eq!(rig.timers.len(), 1);
    }

    #[test]
    fn quick_replay_survives_pending_release() {
        let mut rig = Rig::new();
        rig.with(|t, cx| t.play_tone(cx, 220.0)).unwrap();
        rig.with(|t, cx| t.stop_tone(cx));
        rig.with(|t, cx| t.play_tone(cx, 330.0)).unwrap();
        rig.run(1000);
        assert!(rig.tuner.has_oscillators());
        assert_eq!(rig.tuner.frequency(Channel::Left), Some(330.0));
    }
}
