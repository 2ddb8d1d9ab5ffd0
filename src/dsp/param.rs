//! Automatable parameters: a timeline of holds, ramps and approaches.
//!
//! Every automation call is anchored to an explicit time and supersedes
//! whatever was scheduled at or after that time, so the most recently
//! issued change always wins.

/// Smallest value an exponential ramp may touch.
const EXP_FLOOR: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Segment {
    Hold {
        start: f64,
        value: f64,
    },
    Linear {
        start: f64,
        end: f64,
        from: f64,
        to: f64,
    },
    Exponential {
        start: f64,
        end: f64,
        from: f64,
        to: f64,
    },
    /// First-order approach toward `target` with time constant `tau`.
    Approach {
        start: f64,
        from: f64,
        target: f64,
        tau: f64,
    },
}

impl Segment {
    fn start(&self) -> f64 {
        match *self {
            Segment::Hold { start, .. }
            | Segment::Linear { start, .. }
            | Segment::Exponential { start, .. }
            | Segment::Approach { start, .. } => start,
        }
    }

    fn value_at(&self, t: f64) -> f64 {
        match *self {
            Segment::Hold { value, .. } => value,
            Segment::Linear { start, end, from, to } => {
                if t >= end {
                    to
                } else {
                    from + (to - from) * ((t - start) / (end - start))
                }
            }
            Segment::Exponential { start, end, from, to } => {
                if t >= end {
                    to
                } else {
                    from * (to / from).powf((t - start) / (end - start))
                }
            }
            Segment::Approach { start, from, target, tau } => {
                target + (from - target) * (-(t - start) / tau).exp()
            }
        }
    }
}

/// A continuously varying parameter (gain, frequency, pan, detune).
#[derive(Debug, Clone)]
pub struct AudioParam {
    segments: Vec<Segment>,
}

impl AudioParam {
    pub fn new(value: f64) -> Self {
        AudioParam {
            segments: vec![Segment::Hold {
                start: f64::NEG_INFINITY,
                value,
            }],
        }
    }

    /// Value of the parameter at time `t` (seconds).
    pub fn value_at(&self, t: f64) -> f64 {
        self.segments
            .iter()
            .rev()
            .find(|s| s.start() <= t)
            .or_else(|| self.segments.first())
            .map_or(0.0, |s| s.value_at(t))
    }

    /// Jump to `value` at time `at`.
    pub fn set_value_at(&mut self, value: f64, at: f64) {
        self.truncate_from(at);
        self.segments.push(Segment::Hold { start: at, value });
    }

    /// Ramp linearly from the value at `now` to `target` over `duration`
    /// seconds. A non-positive duration degrades to an immediate set.
    pub fn linear_ramp(&mut self, target: f64, now: f64, duration: f64) {
        if duration <= 0.0 {
            self.set_value_at(target, now);
        } else {
            self.linear_ramp_at(target, now, now + duration);
        }
    }

    /// Ramp linearly over `[start, end]`, starting from whatever the
    /// timeline holds at `start`. Used to chain ramps into the future.
    pub fn linear_ramp_at(&mut self, target: f64, start: f64, end: f64) {
        if end <= start {
            self.set_value_at(target, start);
            return;
        }
        let from = self.value_at(start);
        self.truncate_from(start);
        self.segments.push(Segment::Linear {
            start,
            end,
            from,
            to: target,
        });
    }

    /// Exponential ramp over `[start, end]`. Endpoints are floored to a
    /// small positive value since the curve cannot cross zero.
    pub fn exponential_ramp_at(&mut self, target: f64, start: f64, end: f64) {
        if end <= start {
            self.set_value_at(target, start);
            return;
        }
        let from = self.value_at(start).max(EXP_FLOOR);
        self.truncate_from(start);
        self.segments.push(Segment::Exponential {
            start,
            end,
            from,
            to: target.max(EXP_FLOOR),
        });
    }

    /// Approach `target` exponentially with time constant `tau`, starting
    /// from the value at `now`. Never arrives exactly, never steps.
    pub fn set_target(&mut self, target: f64, now: f64, tau: f64) {
        if tau <= 0.0 {
            self.set_value_at(target, now);
            return;
        }
        let from = self.value_at(now);
        self.truncate_from(now);
        self.segments.push(Segment::Approach {
            start: now,
            from,
            target,
            tau,
        });
    }

    /// Forget segments that can no longer affect any time at or after `now`.
    pub fn prune(&mut self, now: f64) {
        if let Some(active) = self.segments.iter().rposition(|s| s.start() <= now) {
            self.segments.drain(..active);
        }
    }

    /// Number of scheduled segments (including the active one).
    pub fn scheduled_len(&self) -> usize {
        self.segments.len()
    }

    fn truncate_from(&mut self, t: f64) {
        self.segments.retain(|s| s.start() < t);
        if self.segments.is_empty() {
            // A set at -inf removed the baseline; nothing to fall back to.
            self.segments.push(Segment::Hold {
                start: f64::NEG_INFINITY,
                value: 0.0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn holds_initial_value() {
        let p = AudioParam::new(0.5);
        assert!(close(p.value_at(0.0), 0.5));
        assert!(close(p.value_at(1e6), 0.5));
    }

    #[test]
    fn linear_ramp_interpolates() {
        let mut p = AudioParam::new(0.0);
        p.linear_ramp(1.0, 2.0, 4.0);
        assert!(close(p.value_at(2.0), 0.0));
        assert!(close(p.value_at(3.0), 0.25));
        assert!(close(p.value_at(6.0), 1.0));
        assert!(close(p.value_at(100.0), 1.0));
    }

    #[test]
    fn zero_duration_ramp_is_immediate() {
        let mut p = AudioParam::new(0.2);
        p.linear_ramp(0.9, 1.0, 0.0);
        assert!(close(p.value_at(1.0), 0.9));
    }

    #[test]
    fn new_ramp_cancels_remaining_in_flight_ramp() {
        let mut p = AudioParam::new(0.0);
        p.linear_ramp(1.0, 0.0, 10.0);
        // halfway through, retarget back down
        p.linear_ramp(0.0, 5.0, 1.0);
        assert!(close(p.value_at(5.0), 0.5), "new ramp starts from current value");
        assert!(close(p.value_at(5.5), 0.25));
        assert!(close(p.value_at(9.0), 0.0), "old ramp must not resume");
    }

    #[test]
    fn chained_ramps_run_back_to_back() {
        let mut p = AudioParam::new(0.5);
        p.linear_ramp_at(0.8, 0.0, 0.1);
        p.linear_ramp_at(0.5, 0.1, 0.4);
        assert!(close(p.value_at(0.1), 0.8));
        assert!(close(p.value_at(0.25), 0.65));
        assert!(close(p.value_at(0.4), 0.5));
    }

    #[test]
    fn approach_converges_without_stepping() {
        let mut p = AudioParam::new(0.0);
        p.set_target(1.0, 0.0, 0.1);
        assert!(close(p.value_at(0.0), 0.0));
        let one_tau = p.value_at(0.1);
        assert!((one_tau - (1.0 - (-1.0f64).exp())).abs() < 1e-9);
        assert!(p.value_at(1.0) > 0.9999);
    }

    #[test]
    fn exponential_ramp_decays() {
        let mut p = AudioParam::new(0.3);
        p.exponential_ramp_at(0.001, 0.0, 5.0);
        assert!(close(p.value_at(0.0), 0.3));
        let mid = p.value_at(2.5);
        assert!((mid - (0.3f64 * 0.001).sqrt()).abs() < 1e-9);
        assert!(close(p.value_at(6.0), 0.001));
    }

    #[test]
    fn prune_keeps_active_segment() {
        let mut p = AudioParam::new(0.0);
        p.linear_ramp(1.0, 0.0, 1.0);
        p.linear_ramp(0.0, 2.0, 1.0);
        p.prune(2.5);
        assert_eq!(p.scheduled_len(), 1);
        assert!(close(p.value_at(2.5), 0.5));
    }
}
