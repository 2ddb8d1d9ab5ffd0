//! Virtual time: the shared audio sample clock and the cooperative timer queue.
//!
//! Two clock domains exist. Scheduling callbacks run on the timer queue in
//! whole milliseconds; parameter automation and rendering run on the audio
//! clock in sample frames. Callbacks only *issue* automation against the
//! audio clock, they never wait on it.

use std::cell::Cell;
use std::rc::Rc;

use crate::effects::EffectKind;
use crate::events::UiEvent;

/// Shared sample-frame clock. Every signal graph created from the same
/// clock agrees on "now".
#[derive(Debug, Clone)]
pub struct AudioClock {
    frame: Rc<Cell<u64>>,
    sample_rate: f64,
}

impl AudioClock {
    pub fn new(sample_rate: f64) -> Self {
        AudioClock {
            frame: Rc::new(Cell::new(0)),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Current frame index.
    pub fn frame(&self) -> u64 {
        self.frame.get()
    }

    /// Current time in seconds.
    pub fn now(&self) -> f64 {
        self.frame.get() as f64 / self.sample_rate
    }

    pub fn advance_frames(&self, frames: u64) {
        self.frame.set(self.frame.get() + frames);
    }

    /// Move forward to the frame matching `ms`. Never moves backwards.
    pub fn advance_to_ms(&self, ms: u64) {
        let target = self.ms_to_frame(ms);
        if target > self.frame.get() {
            self.frame.set(target);
        }
    }

    pub fn ms_to_frame(&self, ms: u64) -> u64 {
        (ms as f64 * self.sample_rate / 1000.0).round() as u64
    }

    pub fn frame_to_ms(&self, frame: u64) -> u64 {
        (frame as f64 * 1000.0 / self.sample_rate).floor() as u64
    }
}

/// Handle returned when a timer is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Every deferred or periodic action in the core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerEvent {
    /// One-second session clock.
    SessionTick,
    /// Advance a sequence preset to its next pair.
    SequenceStep,
    /// Completion chime has decayed; drop its audio path.
    ChimeFinished,
    /// Deferred drone oscillator teardown after a fade-out.
    ReleaseOscillators { generation: u64 },
    /// Pick fresh random detune offsets.
    DetuneJitter,
    /// One step of a live effect.
    Effect(EffectKind),
    /// Move the tuner sweep to the next string.
    SweepAdvance,
    /// Octave/fifth check has run its course.
    CheckTimeout,
    /// Deferred tuner oscillator teardown after a fade-out.
    ReleaseTunerTone { generation: u64 },
}

#[derive(Debug, Clone)]
struct Entry {
    id: TimerId,
    due: u64,
    period: Option<u64>,
    seq: u64,
    event: TimerEvent,
}

/// Cooperative timer queue over virtual milliseconds.
///
/// Timers due at the same instant fire in registration order. Cancelling
/// an unknown or already-fired handle is a no-op.
#[derive(Debug, Default)]
pub struct Timers {
    now: u64,
    next_id: u64,
    next_seq: u64,
    entries: Vec<Entry>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now
    }

    /// Fire `event` once, `delay_ms` from now.
    pub fn set_timeout(&mut self, delay_ms: u64, event: TimerEvent) -> TimerId {
        self.register(delay_ms, None, event)
    }

    /// Fire `event` every `period_ms`, first firing one period from now.
    pub fn set_interval(&mut self, period_ms: u64, event: TimerEvent) -> TimerId {
        let period = period_ms.max(1);
        self.register(period, Some(period), event)
    }

    /// Like [`Timers::set_interval`], but the first firing is `first_ms`
    /// from now. Used to join a grid that started earlier.
    pub fn set_interval_after(&mut self, first_ms: u64, period_ms: u64, event: TimerEvent) -> TimerId {
        self.register(first_ms, Some(period_ms.max(1)), event)
    }

    fn register(&mut self, delay_ms: u64, period: Option<u64>, event: TimerEvent) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            due: self.now + delay_ms,
            period,
            seq: self.next_seq,
            event,
        });
        self.next_seq += 1;
        id
    }

    /// Remove a timer. Returns `false` when the handle was already gone.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if !removed {
            tracing::trace!("stale timer handle {id:?} ignored");
        }
        removed
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Earliest due time among pending timers.
    pub fn next_due(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.due).min()
    }

    /// Pop the next timer due at or before `until`, moving `now` to its due
    /// time. Intervals are re-armed one period later.
    pub fn pop_due(&mut self, until: u64) -> Option<(TimerId, TimerEvent)> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due <= until)
            .min_by_key(|(_, e)| (e.due, e.seq))
            .map(|(i, _)| i)?;

        let due = self.entries[index].due;
        self.now = self.now.max(due);
        let fired = match self.entries[index].period {
            Some(period) => {
                let entry = &mut self.entries[index];
                entry.due += period;
                (entry.id, entry.event)
            }
            None => {
                let entry = self.entries.remove(index);
                (entry.id, entry.event)
            }
        };
        Some(fired)
    }

    /// Move `now` forward without firing anything.
    pub fn advance_to(&mut self, ms: u64) {
        self.now = self.now.max(ms);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a scheduling callback gets to touch: the timer queue and the
/// outbound UI event list.
pub struct Context<'a> {
    pub timers: &'a mut Timers,
    pub events: &'a mut Vec<UiEvent>,
}

impl<'a> Context<'a> {
    pub fn new(timers: &'a mut Timers, events: &'a mut Vec<UiEvent>) -> Self {
        Context { timers, events }
    }

    pub fn emit(&mut self, event: UiEvent) {
        self.events.push(event);
    }
}
