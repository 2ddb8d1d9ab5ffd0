//! Studio: owns every component and the virtual clocks, routes user
//! commands, and fires timers at their exact sample frame while rendering.

use tracing::{debug, warn};

use crate::clock::{AudioClock, Context, TimerEvent, Timers};
use crate::config::StudioConfig;
use crate::dsp::mixer::Mixer;
use crate::effects::LiveEffects;
use crate::error::CoreError;
use crate::events::{Command, UiEvent, VolumeChannel};
use crate::pitch::{BufferedInput, PitchDetector, PitchReading};
use crate::session::SessionScheduler;
use crate::tone::ToneEngine;
use crate::tuner::tones::PlayMode;
use crate::tuner::{TunerToneEngine, transposition_for_root};

const AUDIO_PROMPT: &str = "Tap to enable audio";

pub struct Studio {
    config: StudioConfig,
    clock: AudioClock,
    timers: Timers,
    events: Vec<UiEvent>,
    session: SessionScheduler,
    effects: LiveEffects,
    tuner: TunerToneEngine,
    detector: PitchDetector<BufferedInput>,
    mixer: Mixer,
    audio_suspended: bool,
    visible: bool,
}

impl Studio {
    pub fn new(config: StudioConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let clock = AudioClock::new(config.sample_rate);
        let tone = ToneEngine::new(clock.clone(), config.tone.clone());
        let session = SessionScheduler::new(clock.clone(), config.session.clone(), tone)?;
        let detector = PitchDetector::new(
            BufferedInput::new(config.detector.window_size),
            config.detector.clone(),
            config.tuner.reference_pitch,
        );
        Ok(Studio {
            effects: LiveEffects::new(config.effects.clone()),
            tuner: TunerToneEngine::new(clock.clone(), config.tuner.clone()),
            clock,
            timers: Timers::new(),
            events: Vec::new(),
            session,
            detector,
            mixer: Mixer::new(),
            audio_suspended: false,
            visible: true,
            config,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Self::new(StudioConfig::from_json(json)?)
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.timers.now_ms()
    }

    pub fn session(&self) -> &SessionScheduler {
        &self.session
    }

    pub fn effects(&self) -> &LiveEffects {
        &self.effects
    }

    pub fn tuner(&self) -> &TunerToneEngine {
        &self.tuner
    }

    pub fn detector(&self) -> &PitchDetector<BufferedInput> {
        &self.detector
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Hand every queued UI event to the caller.
    pub fn drain_events(&mut self) -> Vec<UiEvent> {
        std::mem::take(&mut self.events)
    }

    /// The platform suspended audio output (autoplay policy, interruption).
    pub fn suspend_audio(&mut self) {
        self.audio_suspended = true;
    }

    /// A user gesture let audio resume.
    pub fn resume_audio(&mut self) {
        self.audio_suspended = false;
    }

    /// The host granted a microphone stream.
    pub fn connect_microphone(&mut self, sample_rate: f64) {
        self.detector.input_mut().connect(sample_rate);
    }

    pub fn disconnect_microphone(&mut self) {
        let mut cx = Context::new(&mut self.timers, &mut self.events);
        self.detector.stop(&mut cx);
        self.detector.input_mut().disconnect();
    }

    pub fn push_microphone(&mut self, samples: &[f32]) {
        self.detector.input_mut().push(samples);
    }

    /// Parse a JSON command and apply it.
    pub fn handle_json(&mut self, json: &str) -> Result<(), CoreError> {
        let command: Command = serde_json::from_str(json)?;
        self.handle(command)
    }

    /// Apply a user command. Audio and microphone failures are also
    /// surfaced to the UI as a prompt or notice.
    pub fn handle(&mut self, command: Command) -> Result<(), CoreError> {
        debug!(?command, "command");
        let result = self.apply(command);
        if let Err(e) = &result {
            warn!("command failed: {e}");
            match e {
                CoreError::AudioUnavailable(_) => self.events.push(UiEvent::AudioPrompt {
                    message: AUDIO_PROMPT.to_string(),
                }),
                CoreError::MicrophoneDenied(reason) => self.events.push(UiEvent::Notice {
                    message: format!("Microphone unavailable: {reason}"),
                }),
                _ => {}
            }
        }
        result
    }

    fn apply(&mut self, command: Command) -> Result<(), CoreError> {
        if self.audio_suspended && starts_playback(&command) {
            return Err(CoreError::AudioUnavailable("audio output is suspended".to_string()));
        }
        let cx = &mut Context::new(&mut self.timers, &mut self.events);
        match command {
            Command::StartSession => self.session.start(cx),
            Command::StopSession => {
                self.session.stop(cx);
                Ok(())
            }
            Command::ResetSession => {
                self.session.reset(cx);
                Ok(())
            }
            Command::SelectPreset { id } => self.session.select_preset(cx, &id),
            Command::SelectDuration { minutes } => self.session.select_duration(cx, minutes),
            Command::ToggleTuning => self.session.toggle_tuning(cx).map(|_| ()),
            Command::SetTuning { tuning } => self.session.set_tuning(cx, tuning),
            Command::ToggleDetune => {
                let tone = self.session.tone_mut();
                let active = !tone.detune_active();
                tone.set_detune(cx.timers, active);
                Ok(())
            }
            Command::SetVolume { channel, percent } => {
                let volume = (percent / 100.0).clamp(0.0, 1.0);
                let tone = self.session.tone_mut();
                match channel {
                    VolumeChannel::Left => tone.set_left_volume(volume),
                    VolumeChannel::Right => tone.set_right_volume(volume),
                    VolumeChannel::Master => tone.set_master_volume(volume),
                }
                Ok(())
            }
            Command::SelectFreeChannel { target } => {
                self.session.select_free_channel(target);
                Ok(())
            }
            Command::SelectFreeNote { note } => self.session.select_free_note(cx, &note),
            Command::SetFadeSpeed { seconds } => self.session.set_fade_seconds(seconds),
            Command::ToggleEffect { effect } => {
                self.effects.toggle(effect, cx, self.session.tone_mut());
                Ok(())
            }
            Command::SetPulseBpm { bpm } => self.effects.set_pulse_bpm(bpm, cx, self.session.tone_mut()),
            Command::SetPanSweep { seconds } => self.effects.set_pan_sweep(seconds),
            Command::SetBreathCycle { seconds } => self.effects.set_breath_cycle(seconds),
            Command::SetSwellPeriod { seconds } => self.effects.set_swell_period(seconds),
            Command::SetReferencePitch { hz } => {
                self.tuner.set_reference_pitch(cx, hz)?;
                self.detector.set_reference(hz);
                Ok(())
            }
            Command::SetRootNote { note } => {
                let semitones = transposition_for_root(&note)?;
                self.tuner.set_transposition(cx, semitones)
            }
            Command::SelectInstrument { instrument } => {
                self.tuner.select_instrument(cx, instrument);
                self.detector.set_target(None);
                Ok(())
            }
            Command::PressString { index } => {
                if let Some(frequency) = self.tuner.press_string(cx, index)? {
                    self.detector.set_target(Some(frequency));
                }
                Ok(())
            }
            Command::ReleaseString { index } => {
                self.tuner.release_string(cx, index);
                Ok(())
            }
            Command::ClickString { index } => {
                if self.tuner.mode() == PlayMode::Drone {
                    let latched = self.tuner.click_string(cx, index)?;
                    self.detector.set_target(latched);
                }
                Ok(())
            }
            Command::ToggleDrone => {
                self.tuner.toggle_drone(cx);
                Ok(())
            }
            Command::ToggleSweep => self.tuner.toggle_sweep(cx).map(|_| ()),
            Command::ToggleOctaveCheck => self.tuner.toggle_octave_check(cx).map(|_| ()),
            Command::ToggleFifthCheck => self.tuner.toggle_fifth_check(cx).map(|_| ()),
            Command::ToggleListening => {
                if self.detector.is_listening() {
                    self.detector.stop(cx);
                    Ok(())
                } else {
                    self.detector.start(cx)
                }
            }
            Command::Visibility { visible } => {
                let regained = visible && !self.visible;
                self.visible = visible;
                // Platforms drop the wake lock while hidden.
                if regained && self.session.is_running() {
                    cx.emit(UiEvent::WakeLock { held: true });
                }
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, event: TimerEvent) {
        let cx = &mut Context::new(&mut self.timers, &mut self.events);
        let result = match event {
            TimerEvent::SessionTick => {
                self.session.on_tick(cx);
                Ok(())
            }
            TimerEvent::SequenceStep => self.session.on_sequence_step(cx),
            TimerEvent::ChimeFinished => {
                self.session.on_chime_finished();
                Ok(())
            }
            TimerEvent::ReleaseOscillators { generation } => {
                self.session.tone_mut().release(generation);
                Ok(())
            }
            TimerEvent::DetuneJitter => {
                self.session.tone_mut().jitter_detune();
                Ok(())
            }
            TimerEvent::Effect(kind) => {
                self.effects.on_timer(kind, cx, self.session.tone_mut());
                Ok(())
            }
            TimerEvent::SweepAdvance => self.tuner.on_sweep_advance(cx),
            TimerEvent::CheckTimeout => {
                self.tuner.on_check_timeout(cx);
                Ok(())
            }
            TimerEvent::ReleaseTunerTone { generation } => {
                self.tuner.release(generation);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("timer {event:?} failed: {e}");
        }
    }

    /// Fire everything due at or before `until`, in order, keeping the
    /// audio clock in step with each firing.
    fn fire_due(&mut self, until: u64) {
        while let Some((_, event)) = self.timers.pop_due(until) {
            self.clock.advance_to_ms(self.timers.now_ms());
            self.dispatch(event);
        }
    }

    /// Run `ms` of virtual time without producing audio.
    pub fn advance(&mut self, ms: u64) {
        let until = self.timers.now_ms() + ms;
        self.fire_due(until);
        self.timers.advance_to(until);
        self.clock.advance_to_ms(until);
    }

    fn render_span(&mut self, from: usize, to: usize) {
        if to <= from {
            return;
        }
        let (left, right) = self.mixer.span_mut(from, to);
        self.session.render(left, right);
        self.tuner.render(left, right);
        self.clock.advance_frames((to - from) as u64);
    }

    /// Render `frames` of stereo audio. Timers due inside the block fire
    /// at their own frame, so their automation lands sample-accurately.
    pub fn render(&mut self, frames: usize) -> (Vec<f32>, Vec<f32>) {
        self.render_block(frames);
        self.mixer.output()
    }

    /// Same as [`render`](Self::render), interleaved L/R.
    pub fn render_interleaved(&mut self, frames: usize) -> Vec<f32> {
        self.render_block(frames);
        self.mixer.interleaved()
    }

    fn render_block(&mut self, frames: usize) {
        self.mixer.clear(frames);
        let start = self.clock.frame();
        let end = start + frames as u64;
        let mut pos = 0;
        while let Some(due) = self.timers.next_due() {
            let due_frame = self.clock.ms_to_frame(due).max(self.clock.frame());
            if due_frame >= end {
                break;
            }
            let split = (due_frame - start) as usize;
            self.render_span(pos, split);
            pos = split;
            self.fire_due(due);
        }
        self.render_span(pos, frames);
        let now = self.clock.frame_to_ms(self.clock.frame());
        self.timers.advance_to(now);
    }

    /// One pitch detection pass, paced by the host's display refresh.
    pub fn animation_frame(&mut self) -> Option<PitchReading> {
        let mut cx = Context::new(&mut self.timers, &mut self.events);
        self.detector.on_frame(&mut cx)
    }
}

fn starts_playback(command: &Command) -> bool {
    matches!(
        command,
        Command::StartSession
            | Command::PressString { .. }
            | Command::ClickString { .. }
            | Command::ToggleSweep
            | Command::ToggleOctaveCheck
            | Command::ToggleFifthCheck
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectKind;
    use crate::session::SessionState;
    use std::f64::consts::PI;

    fn studio() -> Studio {
        Studio::new(StudioConfig::default()).unwrap()
    }

    #[test]
    fn pulse_boosts_and_returns_without_moving_target() {
        let mut s = studio();
        s.handle(Command::SetFadeSpeed { seconds: 0.0 }).unwrap();
        s.handle(Command::StartSession).unwrap();
        s.handle(Command::ToggleEffect {
            effect: EffectKind::Pulse,
        })
        .unwrap();

        s.advance(1100);
        let peak = s.session().tone().master_gain();
        assert!((peak - 0.65).abs() < 1e-3, "peak {peak}");
        s.advance(300);
        let settled = s.session().tone().master_gain();
        assert!((settled - 0.5).abs() < 1e-3, "settled {settled}");
        assert_eq!(s.session().tone().target_volume(), 0.5);
    }

    #[test]
    fn render_fires_timers_mid_block() {
        let mut s = studio();
        s.handle(Command::StartSession).unwrap();
        let mut peak = 0.0f32;
        for _ in 0..(2 * 44100 / 512 + 1) {
            let (left, right) = s.render(512);
            for x in left.iter().chain(&right) {
                assert!(x.abs() <= 1.0);
                peak = peak.max(x.abs());
            }
        }
        assert_eq!(s.session().elapsed(), 2);
        assert!(peak > 0.01, "drone is silent");
        assert!(s.now_ms() >= 2000);
    }

    #[test]
    fn suspended_audio_prompts_and_blocks_playback() {
        let mut s = studio();
        s.suspend_audio();
        assert!(matches!(
            s.handle(Command::StartSession),
            Err(CoreError::AudioUnavailable(_))
        ));
        assert_eq!(s.session().state(), SessionState::Ready);
        assert!(s.drain_events().iter().any(|e| matches!(e, UiEvent::AudioPrompt { .. })));

        // non-playback commands still work
        s.handle(Command::SelectPreset { id: "heart".to_string() }).unwrap();
        s.resume_audio();
        s.handle(Command::StartSession).unwrap();
        assert!(s.session().is_running());
    }

    #[test]
    fn refused_microphone_is_a_notice() {
        let mut s = studio();
        assert!(s.handle(Command::ToggleListening).is_err());
        let events = s.drain_events();
        assert!(events.iter().any(|e| matches!(e, UiEvent::Notice { .. })));
        assert!(!s.detector().is_listening());
    }

    #[test]
    fn microphone_frames_produce_readings() {
        let mut s = studio();
        s.connect_microphone(44100.0);
        s.handle(Command::ToggleListening).unwrap();
        let tone: Vec<f32> = (0..4096)
            .map(|i| (0.4 * (2.0 * PI * 216.0 * i as f64 / 44100.0).sin()) as f32)
            .collect();
        s.push_microphone(&tone);
        let Some(PitchReading::Pitch(info)) = s.animation_frame() else {
            panic!("no pitch");
        };
        assert_eq!((info.note.as_str(), info.octave), ("A", 3));
        assert!(info.in_tune, "cents {}", info.cents);

        s.disconnect_microphone();
        assert!(!s.detector().is_listening());
        assert_eq!(s.animation_frame(), None);
    }

    #[test]
    fn pressing_a_string_sets_the_meter_target() {
        let mut s = studio();
        s.handle(Command::PressString { index: 0 }).unwrap();
        assert_eq!(s.detector().target(), Some(72.08));
        s.handle(Command::ReleaseString { index: 0 }).unwrap();
        assert!(!s.tuner().is_sounding());
    }

    #[test]
    fn root_note_transposes_strings() {
        let mut s = studio();
        s.handle(Command::SetRootNote { note: "E".to_string() }).unwrap();
        s.handle(Command::PressString { index: 1 }).unwrap();
        // E3 at 432
        assert_eq!(s.detector().target(), Some(161.82));
    }

    #[test]
    fn json_commands_round_through_handle() {
        let mut s = studio();
        s.handle_json(r#"{"type":"toggleEffect","effect":"breathGuide"}"#).unwrap();
        assert!(s.effects().is_active(EffectKind::BreathGuide));
        assert!(s.handle_json(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn visibility_regained_reacquires_wake_lock() {
        let mut s = studio();
        s.handle(Command::StartSession).unwrap();
        s.handle(Command::Visibility { visible: false }).unwrap();
        s.drain_events();
        s.handle(Command::Visibility { visible: true }).unwrap();
        assert_eq!(s.drain_events(), vec![UiEvent::WakeLock { held: true }]);
    }

    #[test]
    fn tuner_and_drone_play_side_by_side() {
        let mut s = studio();
        s.handle(Command::StartSession).unwrap();
        s.handle(Command::ToggleOctaveCheck).unwrap();
        s.advance(4500);
        assert!(s.session().is_running());
        assert!(!s.tuner().is_sounding());
        assert!(s.session().tone().has_oscillators());
    }

    #[test]
    fn detune_toggle_registers_one_interval() {
        let mut s = studio();
        s.handle(Command::StartSession).unwrap();
        let before = s.pending_timers();
        s.handle(Command::ToggleDetune).unwrap();
        assert_eq!(s.pending_timers(), before + 1);
        s.handle(Command::ToggleDetune).unwrap();
        assert_eq!(s.pending_timers(), before);
    }
}
