use serde::{Deserialize, Serialize};

/// A single MIDI note with absolute tick timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub duration_ticks: u64,
    pub channel: u8,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start_tick: u64, duration_ticks: u64, channel: u8) -> Self {
        Self {
            pitch: pitch & 0x7F,
            velocity: velocity & 0x7F,
            start_tick,
            duration_ticks,
            channel: channel & 0x0F,
        }
    }

    pub fn end_tick(&self) -> u64 {
        self.start_tick.saturating_add(self.duration_ticks)
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }

    /// Ticks of this note that fall inside `[start, end)`.
    pub fn overlap(&self, start: u64, end: u64) -> u64 {
        let lo = self.start_tick.max(start);
        let hi = self.end_tick().min(end);
        hi.saturating_sub(lo)
    }

    /// True if the note is sounding at `tick` (zero-length notes sound at their onset).
    pub fn sounds_at(&self, tick: u64) -> bool {
        if self.duration_ticks == 0 {
            return self.start_tick == tick;
        }
        self.start_tick <= tick && tick < self.end_tick()
    }

    fn canonical_key(&self) -> (u64, u8, u8, u64) {
        (self.start_tick, self.channel, self.pitch, self.duration_ticks)
    }
}

/// Tempo change from a Set Tempo meta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoChange {
    pub tick: u64,
    pub microseconds_per_quarter: u32,
}

/// Time signature from a meta event. `denominator` is the actual note value (4, 8, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub tick: u64,
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub const COMMON_TIME: TimeSignature = TimeSignature {
        tick: 0,
        numerator: 4,
        denominator: 4,
    };

    /// Length of one measure in ticks at the given division.
    pub fn measure_ticks(&self, ticks_per_quarter: u16) -> u64 {
        let numerator = self.numerator.max(1) as u64;
        let denominator = self.denominator.max(1) as u64;
        (ticks_per_quarter as u64 * 4 * numerator / denominator).max(1)
    }
}

/// One track of a score: its notes plus the per-track metadata we round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub name: Option<String>,
    pub program: Option<u8>,
    pub notes: Vec<Note>,
}

impl Track {
    /// Build a track with its notes in canonical order
    /// (start tick, channel, pitch, duration), the order `decode` produces.
    pub fn new(name: Option<String>, mut notes: Vec<Note>) -> Self {
        notes.sort_by_key(Note::canonical_key);
        Self {
            name,
            program: None,
            notes,
        }
    }

    pub fn with_program(mut self, program: u8) -> Self {
        self.program = Some(program & 0x7F);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Latest note end in the track, 0 when empty.
    pub fn end_tick(&self) -> u64 {
        self.notes.iter().map(Note::end_tick).max().unwrap_or(0)
    }

    /// Channel of the first note, used for track-level channel events.
    pub fn channel(&self) -> u8 {
        self.notes.first().map(|n| n.channel).unwrap_or(0)
    }

    pub(crate) fn sort_canonical(&mut self) {
        self.notes.sort_by_key(Note::canonical_key);
    }
}

/// A decoded MIDI file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub ticks_per_quarter: u16,
    pub tempo_map: Vec<TempoChange>,
    pub time_signatures: Vec<TimeSignature>,
    pub tracks: Vec<Track>,
}

impl Score {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter,
            tempo_map: Vec::new(),
            time_signatures: Vec::new(),
            tracks: Vec::new(),
        }
    }

    /// Time signature in effect at `tick`, 4/4 when none is declared.
    pub fn time_signature_at(&self, tick: u64) -> TimeSignature {
        time_signature_at(&self.time_signatures, tick)
    }
}

/// Time signature in effect at `tick` in an ordered list, 4/4 by default.
pub fn time_signature_at(signatures: &[TimeSignature], tick: u64) -> TimeSignature {
    signatures
        .iter()
        .take_while(|ts| ts.tick <= tick)
        .last()
        .copied()
        .unwrap_or(TimeSignature::COMMON_TIME)
}
