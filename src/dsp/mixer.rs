//! Mixer: sums stereo graph outputs and soft clips the result.

/// A stereo summing buffer that graphs render into.
#[derive(Debug, Clone)]
pub struct Mixer {
    left: Vec<f64>,
    right: Vec<f64>,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    pub fn new() -> Self {
        Mixer {
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// Prepare `num_frames` of silence on both channels.
    pub fn clear(&mut self, num_frames: usize) {
        self.left.clear();
        self.left.resize(num_frames, 0.0);
        self.right.clear();
        self.right.resize(num_frames, 0.0);
    }

    /// Mutable views of the frames `[from, to)` for a graph to accumulate into.
    pub fn span_mut(&mut self, from: usize, to: usize) -> (&mut [f64], &mut [f64]) {
        let to = to.min(self.left.len());
        let from = from.min(to);
        (&mut self.left[from..to], &mut self.right[from..to])
    }

    /// Planar output with soft clipping applied.
    pub fn output(&self) -> (Vec<f32>, Vec<f32>) {
        let process = |buf: &[f64]| {
            buf.iter()
                .map(|&s| soft_clip(s) as f32)
                .collect::<Vec<f32>>()
        };
        (process(&self.left), process(&self.right))
    }

    /// Interleaved L/R output, as audio callbacks usually want it.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.left.len() * 2);
        for (&l, &r) in self.left.iter().zip(self.right.iter()) {
            out.push(soft_clip(l) as f32);
            out.push(soft_clip(r) as f32);
        }
        out
    }

    /// Number of frames in the buffer.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
fn soft_clip(x: f64) -> f64 {
    x.tanh()
}
