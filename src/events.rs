//! The two narrow interfaces to the host: [`UiEvent`]s the core pushes out
//! for rendering, and [`Command`]s the UI sends in.
//!
//! Both serialise as JSON objects tagged by `type`, e.g.
//! `{"type":"selectPreset","id":"grounding"}`.

use serde::{Deserialize, Serialize};

use crate::effects::{BreathPhase, EffectKind};
use crate::pitch::PitchReading;
use crate::session::{ChannelTarget, SessionState};
use crate::tables::{Instrument, TuningSystem};

/// Numeric and string state changes for the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UiEvent {
    /// Drone frequencies and their binaural beat.
    Frequencies {
        left: f64,
        right: f64,
        beat: f64,
        band: String,
    },
    /// Session clock. `remaining` is absent in free play.
    SessionTime {
        elapsed: u64,
        remaining: Option<u64>,
    },
    Phase {
        index: usize,
        name: String,
        guidance: String,
    },
    PhaseCleared,
    SessionState {
        state: SessionState,
    },
    SessionComplete,
    /// Ask the platform to keep the screen awake (or let it sleep).
    WakeLock {
        held: bool,
    },
    EffectToggled {
        effect: EffectKind,
        active: bool,
    },
    /// Visualiser value for a running effect.
    EffectValue {
        effect: EffectKind,
        value: f64,
    },
    Breath {
        phase: BreathPhase,
        /// Progress through the current half-cycle, 0..1.
        progress: f64,
    },
    /// Tuner tones now sounding; empty when silent.
    TunerTone {
        frequencies: Vec<f64>,
    },
    /// Highlight the tuner string currently playing, if any.
    TunerString {
        index: Option<usize>,
    },
    Pitch {
        reading: PitchReading,
    },
    Listening {
        active: bool,
    },
    /// Persistent "tap to enable audio" prompt.
    AudioPrompt {
        message: String,
    },
    /// One-time notice (e.g. microphone refused).
    Notice {
        message: String,
    },
}

/// Which volume a volume command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeChannel {
    Left,
    Right,
    Master,
}

/// User-initiated commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    StartSession,
    StopSession,
    ResetSession,
    SelectPreset { id: String },
    SelectDuration { minutes: u64 },
    ToggleTuning,
    SetTuning { tuning: TuningSystem },
    ToggleDetune,
    /// Volume as a percentage, 0–100.
    SetVolume { channel: VolumeChannel, percent: f64 },
    SelectFreeChannel { target: ChannelTarget },
    SelectFreeNote { note: String },
    SetFadeSpeed { seconds: f64 },
    ToggleEffect { effect: EffectKind },
    SetPulseBpm { bpm: f64 },
    SetPanSweep { seconds: f64 },
    SetBreathCycle { seconds: f64 },
    SetSwellPeriod { seconds: f64 },
    SetReferencePitch { hz: f64 },
    SetRootNote { note: String },
    SelectInstrument { instrument: Instrument },
    PressString { index: usize },
    ReleaseString { index: usize },
    ClickString { index: usize },
    ToggleDrone,
    ToggleSweep,
    ToggleOctaveCheck,
    ToggleFifthCheck,
    ToggleListening,
    /// The page became visible or hidden.
    Visibility { visible: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_tagged_json() {
        let cmd: Command = serde_json::from_str(r#"{"type":"selectPreset","id":"grounding"}"#).unwrap();
        assert_eq!(cmd, Command::SelectPreset { id: "grounding".to_string() });

        let cmd: Command =
            serde_json::from_str(r#"{"type":"setVolume","channel":"master","percent":40}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetVolume {
                channel: VolumeChannel::Master,
                percent: 40.0
            }
        );

        let cmd: Command = serde_json::from_str(r#"{"type":"toggleEffect","effect":"panDrift"}"#).unwrap();
        assert_eq!(cmd, Command::ToggleEffect { effect: EffectKind::PanDrift });
    }

    #[test]
    fn unit_commands_need_only_a_tag() {
        let cmd: Command = serde_json::from_str(r#"{"type":"toggleOctaveCheck"}"#).unwrap();
        assert_eq!(cmd, Command::ToggleOctaveCheck);
    }

    #[test]
    fn instruments_parse_by_name_only() {
        let cmd: Command = serde_json::from_str(r#"{"type":"selectInstrument","instrument":"koto"}"#).unwrap();
        assert_eq!(cmd, Command::SelectInstrument { instrument: Instrument::Koto });
        let err = serde_json::from_str::<Command>(r#"{"type":"selectInstrument","instrument":"sitar"}"#).unwrap_err();
        assert!(matches!(crate::error::CoreError::from(err), crate::error::CoreError::InvalidConfig(_)));
    }

    #[test]
    fn events_serialise_with_camel_case_tags() {
        let json = serde_json::to_value(UiEvent::WakeLock { held: true }).unwrap();
        assert_eq!(json["type"], "wakeLock");
        assert_eq!(json["held"], true);

        let json = serde_json::to_value(UiEvent::SessionTime {
            elapsed: 3,
            remaining: Some(597),
        })
        .unwrap();
        assert_eq!(json["type"], "sessionTime");
        assert_eq!(json["remaining"], 597);
    }
}
