pub mod clock;
pub mod config;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod events;
pub mod pitch;
pub mod session;
pub mod studio;
pub mod tables;
pub mod tone;
pub mod tuner;

use crate::error::CoreError;
use crate::studio::Studio;
use crate::tables::TuningSystem;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn to_js(e: CoreError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// WASM-exposed: return the binaural-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: frequency of a string `semitone` above the root D at
/// `octave`, for a reference pitch and root transposition.
#[wasm_bindgen]
pub fn calculate_string_frequency(semitone: i32, octave: i32, reference_pitch: f64, transposition: i32) -> f64 {
    tuner::calculate_frequency(semitone, octave, reference_pitch, transposition)
}

/// WASM-exposed: one-shot pitch estimate of a mono buffer, or `undefined`
/// when the buffer is silent or aperiodic.
#[wasm_bindgen]
pub fn detect_pitch_samples(samples: &[f32], sample_rate: f64) -> Option<f64> {
    let samples: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    if pitch::rms(&samples) < pitch::DEFAULT_SILENCE_THRESHOLD {
        return None;
    }
    pitch::autocorrelate(&samples, sample_rate)
}

/// WASM-exposed: render a preset preview to a WAV byte array.
/// `reference_pitch` selects the tuning system (432 or 440).
#[wasm_bindgen]
pub fn render_preview(preset_id: &str, reference_pitch: f64, seconds: f64, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let tuning = if reference_pitch == 440.0 {
        TuningSystem::A440
    } else {
        TuningSystem::A432
    };
    dsp::renderer::render_preview_wav(preset_id, tuning, seconds, sample_rate).map_err(to_js)
}

/// WASM-exposed handle on a [`Studio`]. The host feeds it commands, time
/// and microphone samples, and pulls audio and UI events back out.
#[wasm_bindgen]
pub struct WasmStudio {
    inner: Studio,
}

#[wasm_bindgen]
impl WasmStudio {
    /// Create a studio from an optional JSON config.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<WasmStudio, JsValue> {
        let inner = match config_json {
            Some(json) => Studio::from_json(&json),
            None => Studio::new(config::StudioConfig::default()),
        }
        .map_err(to_js)?;
        Ok(WasmStudio { inner })
    }

    /// Apply a JSON command such as `{"type":"startSession"}`.
    pub fn apply_command(&mut self, json: &str) -> Result<(), JsValue> {
        self.inner.handle_json(json).map_err(to_js)
    }

    pub fn advance(&mut self, ms: u32) {
        self.inner.advance(ms as u64);
    }

    /// Render interleaved stereo for the audio callback.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        self.inner.render_interleaved(frames)
    }

    /// Run one pitch detection pass; readings arrive as events.
    pub fn animation_frame(&mut self) {
        self.inner.animation_frame();
    }

    pub fn connect_microphone(&mut self, sample_rate: f64) {
        self.inner.connect_microphone(sample_rate);
    }

    pub fn disconnect_microphone(&mut self) {
        self.inner.disconnect_microphone();
    }

    pub fn push_microphone(&mut self, samples: &[f32]) {
        self.inner.push_microphone(samples);
    }

    pub fn suspend_audio(&mut self) {
        self.inner.suspend_audio();
    }

    pub fn resume_audio(&mut self) {
        self.inner.resume_audio();
    }

    /// All UI events queued since the last call, as an array of objects.
    pub fn drain_events(&mut self) -> Result<JsValue, JsValue> {
        let events = self.inner.drain_events();
        serde_wasm_bindgen::to_value(&events).map_err(|e| JsValue::from_str(&format!("{e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn string_frequency_export() {
        assert_eq!(calculate_string_frequency(0, 3, 432.0, 0), 144.16);
        assert_eq!(calculate_string_frequency(0, 3, 440.0, 0), 146.83);
    }

    #[test]
    fn one_shot_detection_ignores_silence() {
        assert_eq!(detect_pitch_samples(&[0.0; 2048], 44100.0), None);
        let tone: Vec<f32> = (0..4096)
            .map(|i| (0.5 * (std::f64::consts::TAU * 330.0 * i as f64 / 44100.0).sin()) as f32)
            .collect();
        let f = detect_pitch_samples(&tone, 44100.0).unwrap();
        assert!((f - 330.0).abs() < 1.0, "{f}");
    }
}
