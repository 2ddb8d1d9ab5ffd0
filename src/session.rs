//! Session scheduler: the timeline of a relaxation session.
//!
//! Guided sessions run for a fixed duration split into five phases, with a
//! one-second tick counting down. Free play counts up without phases and
//! takes its notes straight from the user. Either way the drone is driven
//! through the [`ToneEngine`] this scheduler owns.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{AudioClock, Context, TimerEvent, TimerId};
use crate::dsp::graph::{Channel, ParamTarget, SignalGraph};
use crate::dsp::oscillator::Waveform;
use crate::error::CoreError;
use crate::events::UiEvent;
use crate::tables::{
    DURATIONS_MINUTES, PHASES, Preset, PresetKind, TuningSystem, classify_beat, current_phase, note_frequency,
    preset, round2,
};
use crate::tone::ToneEngine;

const TICK_MS: u64 = 1000;

const CHIME_RISE_SECONDS: f64 = 0.5;
const CHIME_DECAY_SECONDS: f64 = 5.0;
const CHIME_FLOOR: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    Guided,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Ready,
    Running,
    /// Free play stopped; elapsed time is kept for resuming.
    Paused,
    /// Guided session stopped or completed.
    Ended,
}

/// Which channel(s) a free-play note selection retunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelTarget {
    Left,
    Right,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    /// Fade in/out on start and stop, in seconds.
    pub fade_seconds: f64,
    /// Glide time when a running drone changes notes.
    pub transition_seconds: f64,
    pub default_preset: String,
    pub default_duration_minutes: u64,
    pub tuning: TuningSystem,
    pub free_left_note: String,
    pub free_right_note: String,
    pub chime_frequency: f64,
    pub chime_volume: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fade_seconds: 3.0,
            transition_seconds: 2.0,
            default_preset: "grounding".to_string(),
            default_duration_minutes: 10,
            tuning: TuningSystem::A432,
            free_left_note: "D3".to_string(),
            free_right_note: "A3".to_string(),
            chime_frequency: 528.0,
            chime_volume: 0.3,
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.fade_seconds >= 0.0) || !(self.transition_seconds >= 0.0) {
            return Err(CoreError::InvalidConfig("fade and transition times must be non-negative".to_string()));
        }
        if !DURATIONS_MINUTES.contains(&self.default_duration_minutes) {
            return Err(CoreError::InvalidConfig(format!(
                "duration {} not one of {DURATIONS_MINUTES:?}",
                self.default_duration_minutes
            )));
        }
        preset(&self.default_preset)?;
        note_frequency(&self.free_left_note, self.tuning)?;
        note_frequency(&self.free_right_note, self.tuning)?;
        if !(0.0..=1.0).contains(&self.chime_volume) || self.chime_frequency <= 0.0 {
            return Err(CoreError::InvalidConfig("chime frequency/volume out of range".to_string()));
        }
        Ok(())
    }
}

/// Short completion bell on its own throwaway graph. A triangle wave
/// keeps it audible over a sine drone.
struct Chime {
    graph: SignalGraph,
    timer: TimerId,
}

pub struct SessionScheduler {
    clock: AudioClock,
    settings: SessionSettings,
    tone: ToneEngine,
    preset: &'static Preset,
    /// The user's selection; takes effect on the next fresh session.
    duration_minutes: u64,
    /// Length of the current timeline, fixed when it starts.
    session_seconds: u64,
    started_at_ms: u64,
    tuning: TuningSystem,
    state: SessionState,
    elapsed: u64,
    remaining: u64,
    phase: Option<usize>,
    sequence_index: usize,
    free_target: ChannelTarget,
    free_notes: (String, String),
    tick_timer: Option<TimerId>,
    sequence_timer: Option<TimerId>,
    chime: Option<Chime>,
}

impl SessionScheduler {
    pub fn new(clock: AudioClock, settings: SessionSettings, tone: ToneEngine) -> Result<Self, CoreError> {
        settings.validate()?;
        let preset = preset(&settings.default_preset)?;
        let duration_minutes = settings.default_duration_minutes;
        Ok(SessionScheduler {
            clock,
            tuning: settings.tuning,
            free_notes: (settings.free_left_note.clone(), settings.free_right_note.clone()),
            settings,
            tone,
            preset,
            duration_minutes,
            session_seconds: duration_minutes * 60,
            started_at_ms: 0,
            state: SessionState::Ready,
            elapsed: 0,
            remaining: duration_minutes * 60,
            phase: None,
            sequence_index: 0,
            free_target: ChannelTarget::Both,
            tick_timer: None,
            sequence_timer: None,
            chime: None,
        })
    }

    pub fn tone(&self) -> &ToneEngine {
        &self.tone
    }

    pub fn tone_mut(&mut self) -> &mut ToneEngine {
        &mut self.tone
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn mode(&self) -> SessionMode {
        if self.preset.is_free_play() {
            SessionMode::Free
        } else {
            SessionMode::Guided
        }
    }

    pub fn preset(&self) -> &'static Preset {
        self.preset
    }

    pub fn tuning(&self) -> TuningSystem {
        self.tuning
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn phase(&self) -> Option<usize> {
        self.phase
    }

    /// Length of the current (or next, when idle) session timeline.
    pub fn duration_seconds(&self) -> u64 {
        self.session_seconds
    }

    pub fn selected_duration_minutes(&self) -> u64 {
        self.duration_minutes
    }

    pub fn fade_seconds(&self) -> f64 {
        self.settings.fade_seconds
    }

    pub fn chime_active(&self) -> bool {
        self.chime.is_some()
    }

    /// Frequencies the drone should be playing right now.
    pub fn current_frequencies(&self) -> Result<(f64, f64), CoreError> {
        let (left, right) = match self.preset.kind {
            PresetKind::Pair { left, right } => (left, right),
            PresetKind::Sequence(pairs) => {
                let index = self.sequence_index.min(pairs.len().saturating_sub(1));
                pairs
                    .get(index)
                    .copied()
                    .ok_or_else(|| CoreError::UnknownPreset(self.preset.id.to_string()))?
            }
            PresetKind::FreePlay => (self.free_notes.0.as_str(), self.free_notes.1.as_str()),
        };
        Ok((note_frequency(left, self.tuning)?, note_frequency(right, self.tuning)?))
    }

    fn emit_frequencies(&self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        let (left, right) = self.current_frequencies()?;
        let beat = round2((right - left).abs());
        cx.emit(UiEvent::Frequencies {
            left,
            right,
            beat,
            band: classify_beat(beat).to_string(),
        });
        Ok(())
    }

    fn emit_time(&self, cx: &mut Context<'_>) {
        let remaining = match self.mode() {
            SessionMode::Guided => Some(self.remaining),
            SessionMode::Free => None,
        };
        cx.emit(UiEvent::SessionTime {
            elapsed: self.elapsed,
            remaining,
        });
    }

    fn set_state(&mut self, cx: &mut Context<'_>, state: SessionState) {
        if self.state != state {
            self.state = state;
            cx.emit(UiEvent::SessionState { state });
        }
    }

    /// Glide a running drone to the current frequencies.
    fn retune(&mut self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        let (left, right) = self.current_frequencies()?;
        if self.is_running() {
            self.tone
                .set_frequencies(cx.timers, left, right, self.settings.transition_seconds)?;
        }
        self.emit_frequencies(cx)
    }

    pub fn select_preset(&mut self, cx: &mut Context<'_>, id: &str) -> Result<(), CoreError> {
        let next = preset(id)?;
        let mode_changed = next.is_free_play() != self.preset.is_free_play();
        self.preset = next;
        self.sequence_index = 0;
        if mode_changed {
            // Guided and free timelines count differently; start over.
            self.reset(cx);
        } else if self.is_running() {
            self.schedule_sequence(cx);
        }
        debug!(preset = id, "preset selected");
        self.retune(cx)
    }

    pub fn select_duration(&mut self, cx: &mut Context<'_>, minutes: u64) -> Result<(), CoreError> {
        if !DURATIONS_MINUTES.contains(&minutes) {
            return Err(CoreError::InvalidConfig(format!("duration {minutes} not one of {DURATIONS_MINUTES:?}")));
        }
        self.duration_minutes = minutes;
        // A running or paused timeline keeps its length and position.
        if matches!(self.state, SessionState::Ready | SessionState::Ended) {
            self.rewind(cx.timers.now_ms());
            self.emit_time(cx);
        }
        Ok(())
    }

    pub fn set_tuning(&mut self, cx: &mut Context<'_>, tuning: TuningSystem) -> Result<(), CoreError> {
        self.tuning = tuning;
        debug!(?tuning, "tuning changed");
        self.retune(cx)
    }

    pub fn toggle_tuning(&mut self, cx: &mut Context<'_>) -> Result<TuningSystem, CoreError> {
        let next = self.tuning.toggled();
        self.set_tuning(cx, next)?;
        Ok(next)
    }

    pub fn select_free_channel(&mut self, target: ChannelTarget) {
        self.free_target = target;
    }

    pub fn free_channel(&self) -> ChannelTarget {
        self.free_target
    }

    /// Assign `note` to the selected free-play channel(s).
    pub fn select_free_note(&mut self, cx: &mut Context<'_>, note: &str) -> Result<(), CoreError> {
        note_frequency(note, self.tuning)?;
        match self.free_target {
            ChannelTarget::Left => self.free_notes.0 = note.to_string(),
            ChannelTarget::Right => self.free_notes.1 = note.to_string(),
            ChannelTarget::Both => {
                self.free_notes = (note.to_string(), note.to_string());
            }
        }
        if self.mode() == SessionMode::Free {
            self.retune(cx)?;
        }
        Ok(())
    }

    pub fn set_fade_seconds(&mut self, seconds: f64) -> Result<(), CoreError> {
        if !(seconds >= 0.0) {
            return Err(CoreError::InvalidConfig(format!("fade {seconds} must be non-negative")));
        }
        self.settings.fade_seconds = seconds;
        Ok(())
    }

    /// Begin (or resume) the session.
    pub fn start(&mut self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        if self.is_running() {
            return Ok(());
        }
        match (self.mode(), self.state) {
            (SessionMode::Free, SessionState::Paused) => {}
            _ => self.rewind(cx.timers.now_ms()),
        }
        let (left, right) = self.current_frequencies()?;
        self.tone
            .start(cx.timers, left, right, self.settings.fade_seconds)?;

        self.tick_timer = Some(cx.timers.set_interval(TICK_MS, TimerEvent::SessionTick));
        self.set_state(cx, SessionState::Running);
        self.schedule_sequence(cx);
        if self.mode() == SessionMode::Guided {
            self.phase = None;
            self.update_phase(cx);
        }
        cx.emit(UiEvent::WakeLock { held: true });
        self.emit_time(cx);
        self.emit_frequencies(cx)?;
        info!(preset = self.preset.id, mode = ?self.mode(), "session started");
        Ok(())
    }

    /// Fresh timeline at the selected duration.
    fn rewind(&mut self, now_ms: u64) {
        self.session_seconds = self.duration_minutes * 60;
        self.started_at_ms = now_ms;
        self.elapsed = 0;
        self.remaining = self.session_seconds;
        self.sequence_index = 0;
    }

    /// Arm the sequence steps on a grid anchored at the session start, so a
    /// sequence selected mid-session picks up at the pair it would be on.
    fn schedule_sequence(&mut self, cx: &mut Context<'_>) {
        if let Some(id) = self.sequence_timer.take() {
            cx.timers.cancel(id);
        }
        if let PresetKind::Sequence(pairs) = self.preset.kind {
            if pairs.len() > 1 {
                let step = (self.session_seconds * 1000 / pairs.len() as u64).max(1);
                let offset = cx.timers.now_ms().saturating_sub(self.started_at_ms);
                self.sequence_index = ((offset / step) as usize).min(pairs.len() - 1);
                let first = step - offset % step;
                self.sequence_timer = Some(cx.timers.set_interval_after(first, step, TimerEvent::SequenceStep));
            }
        }
    }

    fn cancel_timers(&mut self, cx: &mut Context<'_>) {
        if let Some(id) = self.tick_timer.take() {
            cx.timers.cancel(id);
        }
        if let Some(id) = self.sequence_timer.take() {
            cx.timers.cancel(id);
        }
    }

    /// Fade out and halt the timeline. Free play pauses; guided ends.
    pub fn stop(&mut self, cx: &mut Context<'_>) {
        if !self.is_running() {
            return;
        }
        self.tone.stop(cx.timers, self.settings.fade_seconds);
        self.cancel_timers(cx);
        let next = match self.mode() {
            SessionMode::Free => SessionState::Paused,
            SessionMode::Guided => SessionState::Ended,
        };
        self.set_state(cx, next);
        cx.emit(UiEvent::WakeLock { held: false });
        info!(elapsed = self.elapsed, "session stopped");
    }

    /// Stop if needed and return to a fresh, full-length session.
    pub fn reset(&mut self, cx: &mut Context<'_>) {
        self.stop(cx);
        self.rewind(cx.timers.now_ms());
        self.phase = None;
        cx.emit(UiEvent::PhaseCleared);
        self.emit_time(cx);
        self.set_state(cx, SessionState::Ready);
    }

    pub fn on_tick(&mut self, cx: &mut Context<'_>) {
        if !self.is_running() {
            return;
        }
        self.elapsed += 1;
        if self.mode() == SessionMode::Free {
            self.emit_time(cx);
            return;
        }
        self.remaining = self.remaining.saturating_sub(1);
        self.emit_time(cx);
        if self.remaining == 0 {
            self.complete(cx);
        } else {
            self.update_phase(cx);
        }
    }

    fn update_phase(&mut self, cx: &mut Context<'_>) {
        let total = self.duration_seconds().max(1);
        let index = current_phase(self.elapsed as f64 / total as f64);
        if self.phase != Some(index) {
            self.phase = Some(index);
            let phase = &PHASES[index];
            debug!(phase = phase.name, "phase changed");
            cx.emit(UiEvent::Phase {
                index,
                name: phase.name.to_string(),
                guidance: phase.guidance.to_string(),
            });
        }
    }

    pub fn on_sequence_step(&mut self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        let PresetKind::Sequence(pairs) = self.preset.kind else {
            return Ok(());
        };
        if !self.is_running() || self.sequence_index + 1 >= pairs.len() {
            return Ok(());
        }
        self.sequence_index += 1;
        debug!(step = self.sequence_index, "sequence advanced");
        self.retune(cx)
    }

    fn complete(&mut self, cx: &mut Context<'_>) {
        self.stop(cx);
        cx.emit(UiEvent::SessionComplete);
        info!(preset = self.preset.id, "session complete");
        if let Err(e) = self.play_chime(cx) {
            debug!("completion chime skipped: {e}");
        }
    }

    fn play_chime(&mut self, cx: &mut Context<'_>) -> Result<(), CoreError> {
        if let Some(old) = self.chime.take() {
            cx.timers.cancel(old.timer);
        }
        let mut graph = SignalGraph::new(self.clock.clone(), Waveform::Triangle)?;
        graph.set(ParamTarget::Pan(Channel::Left), 0.0);
        graph.start_oscillator(Channel::Left, self.settings.chime_frequency);
        let now = graph.now();
        let peak = self.settings.chime_volume.max(CHIME_FLOOR);
        if let Some(master) = graph.param_mut(ParamTarget::Master) {
            master.set_value_at(0.0, now);
            master.linear_ramp_at(peak, now, now + CHIME_RISE_SECONDS);
            master.exponential_ramp_at(
                CHIME_FLOOR,
                now + CHIME_RISE_SECONDS,
                now + CHIME_RISE_SECONDS + CHIME_DECAY_SECONDS,
            );
        }
        let lifetime = ((CHIME_RISE_SECONDS + CHIME_DECAY_SECONDS) * 1000.0) as u64;
        let timer = cx.timers.set_timeout(lifetime, TimerEvent::ChimeFinished);
        self.chime = Some(Chime { graph, timer });
        Ok(())
    }

    pub fn on_chime_finished(&mut self) {
        self.chime = None;
    }

    /// Instantaneous chime gain, zero when no chime is sounding.
    pub fn chime_gain(&self) -> f64 {
        self.chime
            .as_ref()
            .and_then(|c| c.graph.value(ParamTarget::Master))
            .unwrap_or(0.0)
    }

    pub fn render(&mut self, left: &mut [f64], right: &mut [f64]) {
        self.tone.render(left, right);
        if let Some(chime) = self.chime.as_mut() {
            chime.graph.render(left, right);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timers;
    use crate::tone::ToneSettings;

    struct Rig {
        clock: AudioClock,
        timers: Timers,
        events: Vec<UiEvent>,
        session: SessionScheduler,
    }

    impl Rig {
        fn new() -> Self {
            let clock = AudioClock::new(44100.0);
            let tone = ToneEngine::new(clock.clone(), ToneSettings::default());
            let session = SessionScheduler::new(clock.clone(), SessionSettings::default(), tone).unwrap();
            Rig {
                clock,
                timers: Timers::new(),
                events: Vec::new(),
                session,
            }
        }

        fn with<R>(&mut self, f: impl FnOnce(&mut SessionScheduler, &mut Context<'_>) -> R) -> R {
            let mut cx = Context::new(&mut self.timers, &mut self.events);
            f(&mut self.session, &mut cx)
        }

        fn run(&mut self, ms: u64) {
            while let Some((_, event)) = self.timers.pop_due(ms) {
                self.clock.advance_to_ms(self.timers.now_ms());
                let mut cx = Context::new(&mut self.timers, &mut self.events);
                match event {
                    TimerEvent::SessionTick => self.session.on_tick(&mut cx),
                    TimerEvent::SequenceStep => self.session.on_sequence_step(&mut cx).unwrap(),
                    TimerEvent::ChimeFinished => self.session.on_chime_finished(),
                    TimerEvent::ReleaseOscillators { generation } => {
                        self.session.tone_mut().release(generation);
                    }
                    _ => {}
                }
            }
            self.timers.advance_to(ms);
            self.clock.advance_to_ms(ms);
        }
    }

    #[test]
    fn guided_session_counts_down_through_phases() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_duration(cx, 10)).unwrap();
        rig.with(|s, cx| s.start(cx)).unwrap();
        assert_eq!(rig.session.tone().frequencies(), (144.16, 216.0));
        assert!(rig.events.contains(&UiEvent::WakeLock { held: true }));
        assert_eq!(rig.session.phase(), Some(0));

        rig.run(120_000);
        assert_eq!(rig.session.remaining(), 480);
        assert_eq!(rig.session.elapsed(), 120);
        assert_eq!(rig.session.phase(), Some(1));
        assert_eq!(PHASES[1].name, "Deepening");
    }

    #[test]
    fn free_play_retunes_on_tuning_toggle() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_preset(cx, "free-play")).unwrap();
        rig.with(|s, cx| s.start(cx)).unwrap();
        assert_eq!(rig.session.mode(), SessionMode::Free);
        rig.events.clear();

        rig.with(|s, cx| s.toggle_tuning(cx)).unwrap();
        assert_eq!(rig.session.tone().frequencies(), (146.83, 220.0));
        assert_eq!(
            rig.events.last(),
            Some(&UiEvent::Frequencies {
                left: 146.83,
                right: 220.0,
                beat: 73.17,
                band: "Gamma (Peak)".to_string(),
            })
        );
    }

    #[test]
    fn free_play_pauses_and_resumes_elapsed() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_preset(cx, "free-play")).unwrap();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(5000);
        rig.with(|s, cx| s.stop(cx));
        assert_eq!(rig.session.state(), SessionState::Paused);
        rig.run(20_000);
        assert_eq!(rig.session.elapsed(), 5);

        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(23_000);
        assert_eq!(rig.session.elapsed(), 8);
        assert!(rig.events.contains(&UiEvent::SessionTime {
            elapsed: 8,
            remaining: None
        }));
    }

    #[test]
    fn guided_stop_ends_and_next_start_is_fresh() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(30_000);
        rig.with(|s, cx| s.stop(cx));
        rig.with(|s, cx| s.stop(cx));
        assert_eq!(rig.session.state(), SessionState::Ended);
        rig.run(40_000);
        assert!(!rig.session.tone().has_oscillators());
        assert!(rig.timers.is_empty());

        rig.with(|s, cx| s.start(cx)).unwrap();
        assert_eq!(rig.session.elapsed(), 0);
        assert_eq!(rig.session.remaining(), 600);
    }

    #[test]
    fn free_note_selection_by_channel() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_preset(cx, "free-play")).unwrap();
        rig.session.select_free_channel(ChannelTarget::Right);
        rig.with(|s, cx| s.select_free_note(cx, "E4")).unwrap();
        let (left, right) = rig.session.current_frequencies().unwrap();
        assert_eq!(left, 144.16);
        assert_eq!(right, note_frequency("E4", TuningSystem::A432).unwrap());
        assert!(rig.with(|s, cx| s.select_free_note(cx, "Q9")).is_err());

        rig.session.select_free_channel(ChannelTarget::Both);
        rig.with(|s, cx| s.select_free_note(cx, "A3")).unwrap();
        let (left, right) = rig.session.current_frequencies().unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn completion_plays_a_chime_and_cleans_up() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_duration(cx, 5)).unwrap();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(300_000);
        assert_eq!(rig.session.state(), SessionState::Ended);
        assert_eq!(rig.session.remaining(), 0);
        assert!(rig.events.contains(&UiEvent::SessionComplete));
        assert!(rig.session.chime_active());
        assert_eq!(rig.session.chime_gain(), 0.0);

        rig.run(300_500);
        assert!((rig.session.chime_gain() - 0.3).abs() < 1e-3);
        rig.run(303_000);
        let decaying = rig.session.chime_gain();
        assert!(decaying < 0.3 && decaying > CHIME_FLOOR);

        rig.run(305_500);
        assert!(!rig.session.chime_active());
        assert!(rig.timers.is_empty());
    }

    #[test]
    fn sequence_steps_through_pairs() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_preset(cx, "overtone-journey")).unwrap();
        rig.with(|s, cx| s.select_duration(cx, 20)).unwrap();
        rig.with(|s, cx| s.start(cx)).unwrap();
        let t = TuningSystem::A432;
        let pair = |l: &str, r: &str| (note_frequency(l, t).unwrap(), note_frequency(r, t).unwrap());
        assert_eq!(rig.session.tone().frequencies(), pair("D3", "A3"));
        rig.run(300_000);
        assert_eq!(rig.session.tone().frequencies(), pair("D3", "D4"));
        rig.run(900_000);
        assert_eq!(rig.session.tone().frequencies(), pair("D4", "A4"));
        rig.run(1_200_000);
        assert_eq!(rig.session.state(), SessionState::Ended);
        assert_eq!(rig.session.tone().frequencies(), pair("D4", "A4"));
    }

    #[test]
    fn preset_switch_while_running_glides() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(10_000);
        rig.with(|s, cx| s.select_preset(cx, "heart")).unwrap();
        assert!(rig.session.is_running());
        assert_eq!(rig.session.elapsed(), 10);
        // glide has only just begun
        let left = rig.session.tone().param_value(ParamTarget::Frequency(Channel::Left)).unwrap();
        assert_eq!(left, 144.16);
        rig.run(13_000);
        let left = rig.session.tone().param_value(ParamTarget::Frequency(Channel::Left)).unwrap();
        assert_eq!(left, note_frequency("F3", TuningSystem::A432).unwrap());
    }

    #[test]
    fn reset_restores_full_duration() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(90_000);
        rig.with(|s, cx| s.reset(cx));
        assert_eq!(rig.session.state(), SessionState::Ready);
        assert_eq!(rig.session.remaining(), 600);
        assert_eq!(rig.session.phase(), None);
        assert!(rig.events.contains(&UiEvent::PhaseCleared));
    }

    #[test]
    fn duration_change_mid_session_applies_to_the_next_one() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(60_000);
        rig.with(|s, cx| s.select_duration(cx, 60)).unwrap();
        assert_eq!(rig.session.duration_seconds(), 600);
        assert_eq!(rig.session.selected_duration_minutes(), 60);
        assert_eq!(rig.session.remaining(), 540);

        rig.run(599_000);
        assert_eq!(rig.session.remaining(), 1);
        assert_eq!(rig.session.phase(), Some(4));
        rig.run(600_000);
        assert_eq!(rig.session.state(), SessionState::Ended);

        rig.with(|s, cx| s.start(cx)).unwrap();
        assert_eq!(rig.session.remaining(), 3600);
        rig.run(600_000 + 720_000);
        assert_eq!(rig.session.phase(), Some(1));
    }

    #[test]
    fn duration_change_while_paused_keeps_free_play_position() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_preset(cx, "free-play")).unwrap();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(5000);
        rig.with(|s, cx| s.stop(cx));
        rig.with(|s, cx| s.select_duration(cx, 30)).unwrap();
        assert_eq!(rig.session.state(), SessionState::Paused);
        assert_eq!(rig.session.elapsed(), 5);

        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(7000);
        assert_eq!(rig.session.elapsed(), 7);
    }

    #[test]
    fn preset_switch_mid_session_keeps_phase_timeline() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(60_000);
        rig.with(|s, cx| s.select_preset(cx, "clarity")).unwrap();
        rig.run(299_000);
        assert_eq!(rig.session.phase(), Some(2));
        rig.run(599_000);
        assert_eq!(rig.session.phase(), Some(4));
        assert_eq!(rig.session.remaining(), 1);
    }

    #[test]
    fn late_switch_to_sequence_joins_the_current_pair() {
        let mut rig = Rig::new();
        rig.with(|s, cx| s.select_duration(cx, 20)).unwrap();
        rig.with(|s, cx| s.start(cx)).unwrap();
        rig.run(650_000);
        rig.with(|s, cx| s.select_preset(cx, "overtone-journey")).unwrap();
        let t = TuningSystem::A432;
        let pair = |l: &str, r: &str| (note_frequency(l, t).unwrap(), note_frequency(r, t).unwrap());
        assert_eq!(rig.session.current_frequencies().unwrap(), pair("A3", "E4"));
        assert_eq!(rig.session.tone().frequencies(), pair("A3", "E4"));

        rig.run(899_000);
        assert_eq!(rig.session.tone().frequencies(), pair("A3", "E4"));
        rig.run(900_000);
        assert_eq!(rig.session.tone().frequencies(), pair("D4", "A4"));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let mut rig = Rig::new();
        assert!(rig.with(|s, cx| s.select_duration(cx, 7)).is_err());
        assert_eq!(rig.session.remaining(), 600);
    }
}
