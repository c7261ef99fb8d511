//! SMF format 1 encoder.
//!
//! Track 0 carries the score's tempo map and time signatures. Note-offs are
//! written as velocity-0 note-ons so consecutive note events share one status
//! byte under running status.

use tracing::debug;

use crate::note::{Note, Score, TempoChange, TimeSignature, Track};
use crate::{Error, Result};

/// Largest delta a 4-byte variable-length quantity can hold.
const MAX_VLQ: u64 = 0x0FFF_FFFF;

/// Encode a score as a format 1 Standard MIDI File.
///
/// The output depends only on the score, so equal scores always encode to
/// identical bytes.
pub fn encode(score: &Score) -> Result<Vec<u8>> {
    let track_count =
        u16::try_from(score.tracks.len()).map_err(|_| Error::TooManyTracks(score.tracks.len()))?;

    let mut chunks = Vec::with_capacity(score.tracks.len());
    for (index, track) in score.tracks.iter().enumerate() {
        let conductor = (index == 0).then_some((&score.tempo_map[..], &score.time_signatures[..]));
        chunks.push(build_track(index, track, conductor)?);
    }

    let bytes = build_midi_file(score.ticks_per_quarter, track_count, &chunks)?;
    debug!(tracks = track_count, bytes = bytes.len(), "encoded MIDI file");
    Ok(bytes)
}

/// Ordering of events that share a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    /// Track name and program change
    Setup,
    /// Tempo and time signature
    Conductor,
    NoteOff,
    NoteOn,
    /// The off of a zero-length note must follow its own on.
    ZeroLengthOff,
}

#[derive(Debug)]
enum Payload {
    Channel { status: u8, data: Vec<u8> },
    Meta(Vec<u8>),
}

#[derive(Debug)]
struct TimedEvent {
    tick: u64,
    slot: Slot,
    payload: Payload,
}

fn build_track(
    index: usize,
    track: &Track,
    conductor: Option<(&[TempoChange], &[TimeSignature])>,
) -> Result<Vec<u8>> {
    let mut events: Vec<TimedEvent> = Vec::new();

    if let Some(name) = &track.name {
        let mut meta = vec![0xFF, 0x03];
        write_vlq(&mut meta, name.len() as u32);
        meta.extend_from_slice(name.as_bytes());
        events.push(TimedEvent {
            tick: 0,
            slot: Slot::Setup,
            payload: Payload::Meta(meta),
        });
    }

    if let Some(program) = track.program {
        events.push(TimedEvent {
            tick: 0,
            slot: Slot::Setup,
            payload: Payload::Channel {
                status: 0xC0 | (track.channel() & 0x0F),
                data: vec![program & 0x7F],
            },
        });
    }

    if let Some((tempo_map, time_signatures)) = conductor {
        for tc in tempo_map {
            let usec = tc.microseconds_per_quarter.min(0x00FF_FFFF);
            events.push(TimedEvent {
                tick: tc.tick,
                slot: Slot::Conductor,
                payload: Payload::Meta(vec![
                    0xFF,
                    0x51,
                    0x03,
                    (usec >> 16) as u8,
                    (usec >> 8) as u8,
                    usec as u8,
                ]),
            });
        }
        for ts in time_signatures {
            let denom_pow = ts.denominator.max(1).trailing_zeros() as u8;
            events.push(TimedEvent {
                tick: ts.tick,
                slot: Slot::Conductor,
                payload: Payload::Meta(vec![0xFF, 0x58, 0x04, ts.numerator, denom_pow, 0x18, 0x08]),
            });
        }
    }

    for note in &track.notes {
        push_note(&mut events, note);
    }

    // Stable: events in the same slot keep note order.
    events.sort_by_key(|e| (e.tick, e.slot));

    let mut data = Vec::new();
    let mut last_tick = 0u64;
    let mut running: Option<u8> = None;

    for event in events {
        let delta = event.tick - last_tick;
        if delta > MAX_VLQ {
            return Err(Error::DeltaOutOfRange {
                track: index,
                delta,
            });
        }
        write_vlq(&mut data, delta as u32);
        last_tick = event.tick;

        match event.payload {
            Payload::Channel { status, data: bytes } => {
                if running != Some(status) {
                    data.push(status);
                    running = Some(status);
                }
                data.extend_from_slice(&bytes);
            }
            Payload::Meta(bytes) => {
                data.extend_from_slice(&bytes);
                running = None;
            }
        }
    }

    // End of track
    write_vlq(&mut data, 0);
    data.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    Ok(data)
}

fn push_note(events: &mut Vec<TimedEvent>, note: &Note) {
    let status = 0x90 | (note.channel & 0x0F);
    let key = note.pitch & 0x7F;
    // Velocity 0 would read back as a note-off.
    let velocity = (note.velocity & 0x7F).max(1);

    events.push(TimedEvent {
        tick: note.start_tick,
        slot: Slot::NoteOn,
        payload: Payload::Channel {
            status,
            data: vec![key, velocity],
        },
    });
    events.push(TimedEvent {
        tick: note.end_tick(),
        slot: if note.duration_ticks == 0 {
            Slot::ZeroLengthOff
        } else {
            Slot::NoteOff
        },
        payload: Payload::Channel {
            status,
            data: vec![key, 0],
        },
    });
}

/// Assemble a complete MIDI file from track data blobs.
fn build_midi_file(ppq: u16, track_count: u16, tracks: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();

    // MThd header
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // format 1
    buf.extend_from_slice(&track_count.to_be_bytes());
    buf.extend_from_slice(&ppq.to_be_bytes());

    // MTrk chunks
    for (index, track_data) in tracks.iter().enumerate() {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&chunk_len(index, track_data.len())?.to_be_bytes());
        buf.extend_from_slice(track_data);
    }

    Ok(buf)
}

fn chunk_len(track: usize, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::TrackTooLarge { track, len })
}

/// Write a variable-length quantity (at most 28 bits) to a byte buffer.
fn write_vlq(buf: &mut Vec<u8>, value: u32) {
    let value = value & MAX_VLQ as u32;
    let mut groups = [0u8; 4];
    let mut count = 0;
    let mut rest = value;
    loop {
        groups[count] = (rest & 0x7F) as u8;
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        buf.push(groups[i] | continuation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::Smf;
    use pretty_assertions::assert_eq;

    fn two_note_score() -> Score {
        let mut score = Score::new(480);
        score.tracks.push(Track::new(
            None,
            vec![Note::new(60, 100, 0, 480, 0), Note::new(64, 100, 480, 480, 0)],
        ));
        score
    }

    #[test]
    fn vlq_encoding() {
        let mut buf = Vec::new();
        write_vlq(&mut buf, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_vlq(&mut buf, 127);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        write_vlq(&mut buf, 128);
        assert_eq!(buf, vec![0x81, 0x00]);

        buf.clear();
        write_vlq(&mut buf, 480);
        assert_eq!(buf, vec![0x83, 0x60]);

        buf.clear();
        write_vlq(&mut buf, 0x0FFF_FFFF);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn exact_bytes_with_running_status() {
        let bytes = encode(&two_note_score()).unwrap();
        let expected_track: Vec<u8> = vec![
            0x00, 0x90, 60, 100, // on C4
            0x83, 0x60, 60, 0, // off C4 (running status)
            0x00, 64, 100, // on E4
            0x83, 0x60, 64, 0, // off E4
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let mut expected = b"MThd".to_vec();
        expected.extend_from_slice(&[0, 0, 0, 6, 0, 1, 0, 1, 0x01, 0xE0]);
        expected.extend_from_slice(b"MTrk");
        expected.extend_from_slice(&(expected_track.len() as u32).to_be_bytes());
        expected.extend_from_slice(&expected_track);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn note_off_precedes_note_on_at_same_tick() {
        let mut score = Score::new(480);
        score.tracks.push(Track::new(
            None,
            vec![Note::new(60, 100, 0, 480, 0), Note::new(60, 100, 480, 480, 0)],
        ));
        let bytes = encode(&score).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let mut kinds = Vec::new();
        for event in &smf.tracks[0] {
            if let midly::TrackEventKind::Midi {
                message: midly::MidiMessage::NoteOn { vel, .. },
                ..
            } = event.kind
            {
                kinds.push((event.delta.as_int(), vel.as_int()));
            }
        }
        assert_eq!(kinds, vec![(0, 100), (480, 0), (0, 100), (480, 0)]);
    }

    #[test]
    fn zero_length_note_keeps_its_off_after_its_on() {
        let mut score = Score::new(480);
        score
            .tracks
            .push(Track::new(None, vec![Note::new(72, 90, 240, 0, 3)]));
        let bytes = encode(&score).unwrap();
        let track_start = 14 + 8;
        assert_eq!(
            &bytes[track_start..],
            &[0x81, 0x70, 0x93, 72, 90, 0x00, 72, 0, 0x00, 0xFF, 0x2F, 0x00]
        );
    }

    #[test]
    fn conductor_events_go_to_first_track_only() {
        let mut score = two_note_score();
        score.tempo_map.push(TempoChange {
            tick: 0,
            microseconds_per_quarter: 600_000,
        });
        score.time_signatures.push(TimeSignature {
            tick: 0,
            numerator: 3,
            denominator: 4,
        });
        score.tracks.push(Track::new(
            Some("Harmony 1".into()),
            vec![Note::new(55, 72, 0, 960, 1)],
        ));

        let bytes = encode(&score).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
        let tempo_in = |track: &midly::Track| {
            track.iter().any(|e| {
                matches!(
                    e.kind,
                    midly::TrackEventKind::Meta(midly::MetaMessage::Tempo(_))
                )
            })
        };
        assert!(tempo_in(&smf.tracks[0]));
        assert!(!tempo_in(&smf.tracks[1]));
    }

    #[test]
    fn zero_velocity_note_is_written_audibly() {
        let mut score = Score::new(480);
        score
            .tracks
            .push(Track::new(None, vec![Note::new(60, 0, 0, 10, 0)]));
        let bytes = encode(&score).unwrap();
        assert_eq!(&bytes[22..26], &[0x00, 0x90, 60, 1]);
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let len = u32::MAX as usize + 1;
        assert_eq!(
            chunk_len(2, len),
            Err(Error::TrackTooLarge { track: 2, len })
        );
        assert_eq!(chunk_len(0, 19), Ok(19));
    }

    #[test]
    fn delta_beyond_vlq_range_is_rejected() {
        let mut score = Score::new(480);
        score.tracks.push(Track::new(
            None,
            vec![Note::new(60, 100, MAX_VLQ + 1, 10, 0)],
        ));
        assert_eq!(
            encode(&score),
            Err(Error::DeltaOutOfRange {
                track: 0,
                delta: MAX_VLQ + 1
            })
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let score = two_note_score();
        assert_eq!(encode(&score).unwrap(), encode(&score).unwrap());
    }
}
