//! DSP layer: oscillators, automatable parameters and the stereo signal
//! graph every audible component renders through.
//!
//! Rendering is deterministic: the same automation on the same clock
//! always produces the same samples, whether driven by a live audio
//! callback or an offline WAV export.

pub mod graph;
pub mod mixer;
pub mod oscillator;
pub mod param;
pub mod renderer;
