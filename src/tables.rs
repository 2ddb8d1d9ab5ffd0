//! Static data: tuning systems, note tables, presets, session phases,
//! durations and tuner instrument layouts.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Chromatic note names, C-based, sharps only.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Octave span of the note tables.
pub const LOWEST_OCTAVE: i32 = 1;
pub const HIGHEST_OCTAVE: i32 = 6;

/// Selectable session lengths in minutes.
pub const DURATIONS_MINUTES: [u64; 7] = [5, 10, 15, 20, 30, 45, 60];

/// Reference pitch for A4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TuningSystem {
    A432,
    A440,
}

impl TuningSystem {
    pub fn reference_pitch(self) -> f64 {
        match self {
            TuningSystem::A432 => 432.0,
            TuningSystem::A440 => 440.0,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            TuningSystem::A432 => TuningSystem::A440,
            TuningSystem::A440 => TuningSystem::A432,
        }
    }
}

/// Round to two decimal places, the precision every table entry carries.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Parse a note name (e.g. "D3", "F#4", "Bb2") into a MIDI note number.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let mut chars = note.chars();
    let base = match chars.next()? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let (semitone, octave_str) = if let Some(r) = rest.strip_prefix('#') {
        (base + 1, r)
    } else if let Some(r) = rest.strip_prefix('b') {
        (base - 1, r)
    } else {
        (base, rest)
    };
    let octave: i32 = octave_str.parse().ok()?;
    // MIDI note number: C4 = 60
    Some((octave + 1) * 12 + semitone)
}

/// Equal-tempered frequency of a MIDI note for the given A4 pitch.
pub fn midi_to_frequency(midi: i32, reference_pitch: f64) -> f64 {
    reference_pitch * (2.0_f64).powf((midi as f64 - 69.0) / 12.0)
}

/// Resolve a note name through a tuning system's table.
pub fn note_frequency(note: &str, tuning: TuningSystem) -> Result<f64, CoreError> {
    let midi = note_to_midi(note).ok_or_else(|| CoreError::UnknownNote(note.to_string()))?;
    let octave = midi.div_euclid(12) - 1;
    if !(LOWEST_OCTAVE..=HIGHEST_OCTAVE).contains(&octave) {
        return Err(CoreError::UnknownNote(note.to_string()));
    }
    Ok(round2(midi_to_frequency(midi, tuning.reference_pitch())))
}

/// Every named pitch in the table for `tuning`, lowest first.
pub fn note_table(tuning: TuningSystem) -> Vec<(String, f64)> {
    (LOWEST_OCTAVE..=HIGHEST_OCTAVE)
        .flat_map(|octave| {
            NOTE_NAMES.iter().enumerate().map(move |(i, name)| {
                let midi = (octave + 1) * 12 + i as i32;
                (
                    format!("{name}{octave}"),
                    round2(midi_to_frequency(midi, tuning.reference_pitch())),
                )
            })
        })
        .collect()
}

/// Brainwave band label for a binaural beat frequency.
pub fn classify_beat(beat_hz: f64) -> &'static str {
    match beat_hz {
        b if b < 4.0 => "Delta (Deep Sleep)",
        b if b < 8.0 => "Theta (Meditation)",
        b if b < 14.0 => "Alpha (Relaxation)",
        b if b < 30.0 => "Beta (Focus)",
        _ => "Gamma (Peak)",
    }
}

// ── Presets ─────────────────────────────────────────────────

/// How a preset chooses its notes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresetKind {
    /// One fixed pair for the whole session.
    Pair {
        left: &'static str,
        right: &'static str,
    },
    /// Pairs advanced at equal intervals across the session.
    Sequence(&'static [(&'static str, &'static str)]),
    /// No schedule; notes come from direct user selection.
    FreePlay,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: PresetKind,
}

impl Preset {
    pub fn is_free_play(&self) -> bool {
        matches!(self.kind, PresetKind::FreePlay)
    }

    /// Every note name this preset can ask for.
    pub fn notes(&self) -> Vec<&'static str> {
        match self.kind {
            PresetKind::Pair { left, right } => vec![left, right],
            PresetKind::Sequence(pairs) => pairs.iter().flat_map(|&(l, r)| [l, r]).collect(),
            PresetKind::FreePlay => Vec::new(),
        }
    }
}

const OVERTONE_JOURNEY: &[(&str, &str)] = &[("D3", "A3"), ("D3", "D4"), ("A3", "E4"), ("D4", "A4")];

pub static PRESETS: &[Preset] = &[
    Preset {
        id: "grounding",
        name: "Grounding",
        kind: PresetKind::Pair { left: "D3", right: "A3" },
    },
    Preset {
        id: "heart",
        name: "Heart Opening",
        kind: PresetKind::Pair { left: "F3", right: "C4" },
    },
    Preset {
        id: "clarity",
        name: "Clarity",
        kind: PresetKind::Pair { left: "A3", right: "E4" },
    },
    Preset {
        id: "overtone-journey",
        name: "Overtone Journey",
        kind: PresetKind::Sequence(OVERTONE_JOURNEY),
    },
    Preset {
        id: "free-play",
        name: "Free Play",
        kind: PresetKind::FreePlay,
    },
];

pub fn preset(id: &str) -> Result<&'static Preset, CoreError> {
    PRESETS
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| CoreError::UnknownPreset(id.to_string()))
}

// ── Session phases ──────────────────────────────────────────

/// A named slice `[start, end)` of session progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    pub name: &'static str,
    pub guidance: &'static str,
    pub start: f64,
    pub end: f64,
}

pub static PHASES: [Phase; 5] = [
    Phase {
        name: "Settling",
        guidance: "Let your breath slow down and your body become heavy.",
        start: 0.0,
        end: 0.2,
    },
    Phase {
        name: "Deepening",
        guidance: "Follow the tones inward; let thoughts pass without holding them.",
        start: 0.2,
        end: 0.45,
    },
    Phase {
        name: "Immersion",
        guidance: "Rest in the space between the two tones.",
        start: 0.45,
        end: 0.75,
    },
    Phase {
        name: "Integration",
        guidance: "Notice how you feel and let it settle into the body.",
        start: 0.75,
        end: 0.9,
    },
    Phase {
        name: "Returning",
        guidance: "Slowly bring awareness back to the room.",
        start: 0.9,
        end: 1.0,
    },
];

/// Index of the phase active at `progress`. Boundaries belong to the later
/// phase; progress at or past 1.0 reports the last phase.
pub fn current_phase(progress: f64) -> usize {
    PHASES
        .iter()
        .position(|p| progress >= p.start && progress < p.end)
        .unwrap_or(if progress < 0.0 { 0 } else { PHASES.len() - 1 })
}

// ── Tuner instruments ───────────────────────────────────────

/// Semitone offset of the instruments' nominal root (D) from A.
pub const ROOT_FROM_A: i32 = -7;
/// Chromatic index of the nominal root (D) in [`NOTE_NAMES`].
pub const ROOT_INDEX: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Instrument {
    Monochord,
    Tampura,
    Koto,
}

impl Instrument {
    pub const ALL: [Instrument; 3] = [Instrument::Monochord, Instrument::Tampura, Instrument::Koto];

    pub fn name(self) -> &'static str {
        match self {
            Instrument::Monochord => "Monochord",
            Instrument::Tampura => "Tampura",
            Instrument::Koto => "Koto",
        }
    }

    /// Strings as (semitone offset from root, octave) pairs, in playing order.
    pub fn strings(self) -> &'static [(i32, i32)] {
        match self {
            Instrument::Monochord => &[(0, 2), (0, 3), (7, 3), (0, 4)],
            // Pa, Sa, Sa, low Sa
            Instrument::Tampura => &[(7, 2), (0, 3), (0, 3), (0, 2)],
            // Hirajoshi layout across thirteen strings
            Instrument::Koto => &[
                (0, 3),
                (-5, 3),
                (0, 3),
                (2, 3),
                (3, 3),
                (7, 3),
                (8, 3),
                (12, 3),
                (14, 3),
                (15, 3),
                (19, 3),
                (20, 3),
                (24, 3),
            ],
        }
    }
}
