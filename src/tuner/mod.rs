//! Instrument tuner: string frequency math and the reference-tone player.
//!
//! Strings are described relative to the instrument's nominal root (D) as
//! (semitone offset, octave) pairs. A root transposition shifts every
//! string by the same number of semitones.

pub mod tones;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::tables::{Instrument, NOTE_NAMES, ROOT_FROM_A, ROOT_INDEX, round2};

pub use tones::TunerToneEngine;

/// Reference pitches the tuner accepts.
pub const REFERENCE_RANGE: std::ops::RangeInclusive<f64> = 400.0..=480.0;

/// Absolute frequency of a string, rounded to 2 decimals.
///
/// `semitone` and `octave` locate the string relative to the root (D);
/// `transposition` moves the root up or down in semitones.
pub fn calculate_frequency(semitone: i32, octave: i32, reference_pitch: f64, transposition: i32) -> f64 {
    let from_a4 = (octave - 4) * 12 + ROOT_FROM_A + semitone + transposition;
    round2(reference_pitch * (2.0_f64).powf(from_a4 as f64 / 12.0))
}

/// Display name ("F#3") of a string after transposition, carrying the
/// octave when the position wraps past either end of the chromatic scale.
pub fn note_name(semitone: i32, octave: i32, transposition: i32) -> String {
    let position = ROOT_INDEX + semitone + transposition;
    let name = NOTE_NAMES[position.rem_euclid(12) as usize];
    let octave = octave + position.div_euclid(12);
    format!("{name}{octave}")
}

/// Semitones between the nominal root D and `root`, folded to -6..=5 so
/// the instrument stays near its native register.
pub fn transposition_for_root(root: &str) -> Result<i32, CoreError> {
    let index = NOTE_NAMES
        .iter()
        .position(|n| *n == root)
        .ok_or_else(|| CoreError::UnknownNote(root.to_string()))? as i32;
    let delta = (index - ROOT_INDEX).rem_euclid(12);
    Ok(if delta > 5 { delta - 12 } else { delta })
}

/// A playable string as the UI shows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunerString {
    pub index: usize,
    pub name: String,
    pub frequency: f64,
}

/// Reference pitch, root transposition and the selected instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TunerConfig {
    pub reference_pitch: f64,
    pub transposition: i32,
    pub instrument: Instrument,
    /// Output level of reference tones [0, 1].
    pub volume: f64,
    /// Fade in/out of reference tones, in seconds.
    pub fade_seconds: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            reference_pitch: 432.0,
            transposition: 0,
            instrument: Instrument::Monochord,
            volume: 0.4,
            fade_seconds: 0.05,
        }
    }
}

impl TunerConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !REFERENCE_RANGE.contains(&self.reference_pitch) {
            return Err(CoreError::InvalidConfig(format!(
                "reference pitch {} outside {:?}",
                self.reference_pitch, REFERENCE_RANGE
            )));
        }
        if !(-12..=12).contains(&self.transposition) {
            return Err(CoreError::InvalidConfig(format!(
                "transposition {} outside -12..=12",
                self.transposition
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) || self.fade_seconds < 0.0 {
            return Err(CoreError::InvalidConfig("tuner volume/fade out of range".to_string()));
        }
        Ok(())
    }

    /// Frequency of string `index` on the selected instrument.
    pub fn string_frequency(&self, index: usize) -> Result<f64, CoreError> {
        let &(semitone, octave) = self
            .instrument
            .strings()
            .get(index)
            .ok_or_else(|| CoreError::InvalidConfig(format!("no string {index} on {}", self.instrument.name())))?;
        Ok(calculate_frequency(semitone, octave, self.reference_pitch, self.transposition))
    }

    /// Frequency of the root itself at `octave`, with `semitone` added.
    pub fn root_frequency(&self, semitone: i32, octave: i32) -> f64 {
        calculate_frequency(semitone, octave, self.reference_pitch, self.transposition)
    }

    pub fn strings(&self) -> Vec<TunerString> {
        self.instrument
            .strings()
            .iter()
            .enumerate()
            .map(|(index, &(semitone, octave))| TunerString {
                index,
                name: note_name(semitone, octave, self.transposition),
                frequency: calculate_frequency(semitone, octave, self.reference_pitch, self.transposition),
            })
            .collect()
    }
}
