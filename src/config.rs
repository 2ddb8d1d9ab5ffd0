//! Studio configuration, loadable from camelCase JSON.
//!
//! Every field has a default, so `{}` is a valid config and hosts only
//! spell out what they change.

use serde::{Deserialize, Serialize};

use crate::effects::EffectSettings;
use crate::error::CoreError;
use crate::pitch::DetectorSettings;
use crate::session::SessionSettings;
use crate::tone::ToneSettings;
use crate::tuner::TunerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StudioConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f64,
    pub tone: ToneSettings,
    pub session: SessionSettings,
    pub effects: EffectSettings,
    pub tuner: TunerConfig,
    pub detector: DetectorSettings,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            tone: ToneSettings::default(),
            session: SessionSettings::default(),
            effects: EffectSettings::default(),
            tuner: TunerConfig::default(),
            detector: DetectorSettings::default(),
        }
    }
}

impl StudioConfig {
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: StudioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.sample_rate.is_finite() || self.sample_rate < 8000.0 {
            return Err(CoreError::InvalidConfig(format!("sample rate {} too low", self.sample_rate)));
        }
        let tone = &self.tone;
        for (name, v) in [
            ("masterVolume", tone.master_volume),
            ("leftVolume", tone.left_volume),
            ("rightVolume", tone.right_volume),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(CoreError::InvalidConfig(format!("{name} must be within 0..1, got {v}")));
            }
        }
        if tone.detune_period_ms == 0 {
            return Err(CoreError::InvalidConfig("detunePeriodMs must be positive".to_string()));
        }
        self.session.validate()?;
        self.effects.validate()?;
        self.tuner.validate()?;
        self.detector.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let config = StudioConfig::from_json("{}").unwrap();
        assert_eq!(config, StudioConfig::default());
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let config = StudioConfig::from_json(
            r#"{"sampleRate": 48000, "tone": {"detuneCents": 5}, "effects": {"pulseBpm": 72}}"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.tone.detune_cents, 5.0);
        assert_eq!(config.tone.master_volume, 0.5);
        assert_eq!(config.effects.pulse_bpm, 72.0);
        assert_eq!(config.session.chime_frequency, 528.0);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for json in [
            r#"{"sampleRate": 100}"#,
            r#"{"tone": {"masterVolume": 2}}"#,
            r#"{"session": {"defaultPreset": "nope"}}"#,
            r#"{"session": {"defaultDurationMinutes": 7}}"#,
            r#"{"tuner": {"referencePitch": 300}}"#,
            r#"{"effects": {"breathCycleSeconds": 0}}"#,
        ] {
            assert!(StudioConfig::from_json(json).is_err(), "{json} accepted");
        }
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(StudioConfig::from_json("{"), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn survives_a_json_round_trip() {
        let config = StudioConfig::default();
        let back = StudioConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
