//! Single-pass SMF decoder.
//!
//! Each track chunk is walked once, front to back. The running-status byte is
//! an explicit [`RunningStatus`] value handed to and returned from
//! [`parse_event`], so no state outlives the track it belongs to.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use crate::note::{Note, Score, TempoChange, TimeSignature, Track};
use crate::{Error, Result};

const HEADER_MAGIC: &[u8; 4] = b"MThd";
const TRACK_MAGIC: &[u8; 4] = b"MTrk";
const HEADER_LEN: u32 = 6;
const MAX_VLQ_BYTES: usize = 4;

const META_TRACK_NAME: u8 = 0x03;
const META_END_OF_TRACK: u8 = 0x2F;
const META_TEMPO: u8 = 0x51;
const META_TIME_SIGNATURE: u8 = 0x58;

/// Decode a Standard MIDI File (format 0 or 1) into a [`Score`].
pub fn decode(bytes: &[u8]) -> Result<Score> {
    let mut reader = Reader::new(bytes, 0, "unexpected end of data in header chunk");

    let magic = reader.read_slice(4)?;
    if magic != HEADER_MAGIC {
        return Err(Error::malformed(0, "missing MThd header chunk"));
    }
    let header_len = reader.read_u32()?;
    if header_len < HEADER_LEN {
        return Err(Error::malformed(
            4,
            format!("header chunk length {header_len} is shorter than 6"),
        ));
    }
    let format = reader.read_u16()?;
    let track_count = reader.read_u16()? as usize;
    let division = reader.read_u16()?;
    reader.read_slice((header_len - HEADER_LEN) as usize)?;

    if format > 1 {
        return Err(Error::malformed(
            8,
            format!("unsupported SMF format {format}; only formats 0 and 1 are accepted"),
        ));
    }
    if format == 0 && track_count != 1 {
        return Err(Error::malformed(
            10,
            format!("format 0 file declares {track_count} tracks"),
        ));
    }
    if division & 0x8000 != 0 {
        return Err(Error::malformed(12, "SMPTE timecode division is not supported"));
    }
    if division == 0 {
        return Err(Error::malformed(12, "division of 0 ticks per quarter note"));
    }

    let mut score = Score::new(division);
    reader.context = "unexpected end of data in chunk header";

    while score.tracks.len() < track_count {
        if reader.is_at_end() {
            return Err(Error::malformed(
                reader.offset(),
                format!(
                    "header declares {track_count} tracks but only {} track chunks are present",
                    score.tracks.len()
                ),
            ));
        }

        let chunk_offset = reader.offset();
        let id = reader.read_slice(4)?;
        let len = reader.read_u32()? as usize;
        if len > reader.remaining() {
            return Err(Error::malformed(
                chunk_offset + 4,
                format!(
                    "chunk declares {len} bytes but only {} remain",
                    reader.remaining()
                ),
            ));
        }
        let body_offset = reader.offset();
        let body = reader.read_slice(len)?;

        if id != TRACK_MAGIC {
            debug!(offset = chunk_offset, len, "skipping unknown chunk");
            continue;
        }

        let decoded = decode_track(body, body_offset)?;
        score.tempo_map.extend(decoded.tempo_map);
        score.time_signatures.extend(decoded.time_signatures);
        score.tracks.push(decoded.track);
    }

    // Stable sorts: same-tick entries keep file order.
    score.tempo_map.sort_by_key(|t| t.tick);
    score.time_signatures.sort_by_key(|t| t.tick);

    debug!(
        format,
        tracks = score.tracks.len(),
        ticks_per_quarter = division,
        "decoded MIDI file"
    );

    Ok(score)
}

/// Per-track decoding result; tracks never share state while decoding.
struct DecodedTrack {
    track: Track,
    tempo_map: Vec<TempoChange>,
    time_signatures: Vec<TimeSignature>,
}

fn decode_track(body: &[u8], base: usize) -> Result<DecodedTrack> {
    let mut reader = Reader::new(
        body,
        base,
        "event runs past the declared length of its track chunk",
    );
    let mut running = RunningStatus::default();
    let mut tick: u64 = 0;

    let mut track = Track::default();
    let mut tempo_map = Vec::new();
    let mut time_signatures = Vec::new();
    // (channel, pitch) -> onsets waiting for their note-off, oldest first
    let mut pending: BTreeMap<(u8, u8), VecDeque<(u64, u8)>> = BTreeMap::new();

    loop {
        if reader.is_at_end() {
            return Err(Error::malformed(
                reader.offset(),
                "track chunk ended without an end-of-track event",
            ));
        }

        tick += reader.read_vlq()? as u64;
        let (event, next) = parse_event(&mut reader, running)?;
        running = next;

        match event {
            Event::NoteOn {
                channel,
                key,
                velocity,
            } => {
                pending
                    .entry((channel, key))
                    .or_default()
                    .push_back((tick, velocity));
            }
            Event::NoteOff { channel, key } => {
                match pending.get_mut(&(channel, key)).and_then(VecDeque::pop_front) {
                    Some((onset, velocity)) => track.notes.push(Note::new(
                        key,
                        velocity,
                        onset,
                        tick - onset,
                        channel,
                    )),
                    None => warn!(tick, channel, key, "ignoring unmatched note-off"),
                }
            }
            Event::ProgramChange { program, .. } => {
                if track.program.is_none() {
                    track.program = Some(program);
                }
            }
            Event::Tempo(microseconds_per_quarter) => tempo_map.push(TempoChange {
                tick,
                microseconds_per_quarter,
            }),
            Event::TimeSignature {
                numerator,
                denominator,
            } => time_signatures.push(TimeSignature {
                tick,
                numerator,
                denominator,
            }),
            Event::TrackName(name) => {
                if track.name.is_none() {
                    track.name = Some(String::from_utf8_lossy(name).into_owned());
                }
            }
            Event::EndOfTrack => {
                if !reader.is_at_end() {
                    return Err(Error::malformed(
                        reader.offset(),
                        format!(
                            "{} bytes follow end-of-track inside the declared track length",
                            reader.remaining()
                        ),
                    ));
                }
                break;
            }
            Event::Other => {}
        }
    }

    // Notes still open at end of track are clipped to the final tick.
    for ((channel, key), onsets) in pending {
        for (onset, velocity) in onsets {
            track
                .notes
                .push(Note::new(key, velocity, onset, tick - onset, channel));
        }
    }
    track.sort_canonical();

    Ok(DecodedTrack {
        track,
        tempo_map,
        time_signatures,
    })
}

/// Status byte carried over from the previous channel event, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunningStatus(Option<u8>);

#[derive(Debug, PartialEq, Eq)]
enum Event<'a> {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ProgramChange { channel: u8, program: u8 },
    Tempo(u32),
    TimeSignature { numerator: u8, denominator: u8 },
    TrackName(&'a [u8]),
    EndOfTrack,
    Other,
}

/// Parse one event (without its delta time).
///
/// Returns the event and the running status that applies to the next one.
/// Meta and SysEx events cancel running status.
fn parse_event<'a>(
    reader: &mut Reader<'a>,
    running: RunningStatus,
) -> Result<(Event<'a>, RunningStatus)> {
    let offset = reader.offset();
    let first = reader.peek()?;
    let status = if first & 0x80 != 0 {
        reader.read_u8()?;
        first
    } else {
        running.0.ok_or_else(|| {
            Error::malformed(
                offset,
                format!("data byte 0x{first:02X} with no running status in effect"),
            )
        })?
    };

    match status {
        0xFF => {
            let kind = reader.read_u8()?;
            let len = reader.read_vlq()? as usize;
            let data = reader.read_slice(len)?;
            Ok((parse_meta(kind, data, offset)?, RunningStatus::default()))
        }
        0xF0 | 0xF7 => {
            let len = reader.read_vlq()? as usize;
            reader.read_slice(len)?;
            Ok((Event::Other, RunningStatus::default()))
        }
        0xF1..=0xFE => Err(Error::malformed(
            offset,
            format!("unexpected system message 0x{status:02X} in track data"),
        )),
        _ => {
            let channel = status & 0x0F;
            let event = match status & 0xF0 {
                0x80 => {
                    let key = reader.read_data_byte()?;
                    reader.read_data_byte()?;
                    Event::NoteOff { channel, key }
                }
                0x90 => {
                    let key = reader.read_data_byte()?;
                    let velocity = reader.read_data_byte()?;
                    if velocity == 0 {
                        Event::NoteOff { channel, key }
                    } else {
                        Event::NoteOn {
                            channel,
                            key,
                            velocity,
                        }
                    }
                }
                0xC0 => Event::ProgramChange {
                    channel,
                    program: reader.read_data_byte()?,
                },
                0xD0 => {
                    reader.read_data_byte()?;
                    Event::Other
                }
                // 0xA0 aftertouch, 0xB0 controller, 0xE0 pitch bend
                _ => {
                    reader.read_data_byte()?;
                    reader.read_data_byte()?;
                    Event::Other
                }
            };
            Ok((event, RunningStatus(Some(status))))
        }
    }
}

fn parse_meta(kind: u8, data: &[u8], offset: usize) -> Result<Event<'_>> {
    match kind {
        META_END_OF_TRACK => Ok(Event::EndOfTrack),
        META_TRACK_NAME => Ok(Event::TrackName(data)),
        META_TEMPO => match data {
            [a, b, c] => Ok(Event::Tempo(
                (*a as u32) << 16 | (*b as u32) << 8 | *c as u32,
            )),
            _ => Err(Error::malformed(
                offset,
                format!("tempo meta event carries {} bytes instead of 3", data.len()),
            )),
        },
        META_TIME_SIGNATURE => match data {
            [numerator, power, ..] if data.len() >= 4 && *power <= 7 => Ok(Event::TimeSignature {
                numerator: *numerator,
                denominator: 1u8 << *power,
            }),
            _ => Err(Error::malformed(offset, "invalid time signature meta event")),
        },
        _ => Ok(Event::Other),
    }
}

/// Bounds-checked big-endian reader. Offsets in errors are absolute file offsets.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
    context: &'static str,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], base: usize, context: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            base,
            context,
        }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn eof(&self) -> Error {
        Error::malformed(self.offset(), self.context)
    }

    fn peek(&self) -> Result<u8> {
        self.bytes.get(self.pos).copied().ok_or_else(|| self.eof())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_data_byte(&mut self) -> Result<u8> {
        let offset = self.offset();
        let byte = self.read_u8()?;
        if byte & 0x80 != 0 {
            return Err(Error::malformed(
                offset,
                format!("expected a data byte, found status byte 0x{byte:02X}"),
            ));
        }
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.eof());
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a variable-length quantity of at most 4 bytes.
    fn read_vlq(&mut self) -> Result<u32> {
        let start = self.offset();
        let mut value: u32 = 0;
        for _ in 0..MAX_VLQ_BYTES {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::malformed(
            start,
            "variable-length quantity longer than 4 bytes",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(format: u16, tracks: u16, division: u16) -> Vec<u8> {
        let mut buf = b"MThd".to_vec();
        buf.extend_from_slice(&6u32.to_be_bytes());
        buf.extend_from_slice(&format.to_be_bytes());
        buf.extend_from_slice(&tracks.to_be_bytes());
        buf.extend_from_slice(&division.to_be_bytes());
        buf
    }

    fn track_chunk(events: &[u8]) -> Vec<u8> {
        let mut buf = b"MTrk".to_vec();
        buf.extend_from_slice(&(events.len() as u32).to_be_bytes());
        buf.extend_from_slice(events);
        buf
    }

    fn file(events: &[u8]) -> Vec<u8> {
        let mut buf = header(0, 1, 480);
        buf.extend(track_chunk(events));
        buf
    }

    fn malformed_reason(result: Result<Score>) -> String {
        match result {
            Err(Error::MalformedInput { reason, .. }) => reason,
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn vlq_decoding() {
        let cases: [(&[u8], u32); 5] = [
            (&[0x00], 0),
            (&[0x7F], 127),
            (&[0x81, 0x00], 128),
            (&[0x83, 0x60], 480),
            (&[0xFF, 0xFF, 0xFF, 0x7F], 0x0FFF_FFFF),
        ];
        for (bytes, expected) in cases {
            let mut reader = Reader::new(bytes, 0, "eof");
            assert_eq!(reader.read_vlq().unwrap(), expected);
            assert!(reader.is_at_end());
        }
    }

    #[test]
    fn vlq_longer_than_four_bytes_is_rejected() {
        let mut reader = Reader::new(&[0x81, 0x80, 0x80, 0x80, 0x00], 0, "eof");
        let err = reader.read_vlq().unwrap_err();
        assert!(matches!(err, Error::MalformedInput { offset: 0, .. }));
    }

    #[test]
    fn decodes_notes_with_running_status_and_zero_velocity_off() {
        // on C4, (running) on E4, (running) vel-0 off C4, (running) off E4
        let events = [
            0x00, 0x90, 60, 100, //
            0x00, 64, 90, //
            0x83, 0x60, 60, 0, //
            0x00, 64, 0, //
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let score = decode(&file(&events)).unwrap();
        let notes = &score.tracks[0].notes;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0], Note::new(60, 100, 0, 480, 0));
        assert_eq!(notes[1], Note::new(64, 90, 0, 480, 0));
    }

    #[test]
    fn running_status_state_is_threaded_explicitly() {
        let bytes = [0x3C, 0x40];
        let mut reader = Reader::new(&bytes, 0, "eof");
        let (event, next) = parse_event(&mut reader, RunningStatus(Some(0x91))).unwrap();
        assert_eq!(
            event,
            Event::NoteOn {
                channel: 1,
                key: 0x3C,
                velocity: 0x40
            }
        );
        assert_eq!(next, RunningStatus(Some(0x91)));
    }

    #[test]
    fn meta_event_cancels_running_status() {
        let events = [
            0x00, 0x90, 60, 100, //
            0x00, 0xFF, 0x01, 0x01, b'x', // text meta
            0x10, 60, 0, // data byte with no running status
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let reason = malformed_reason(decode(&file(&events)));
        assert!(reason.contains("no running status"), "{reason}");
    }

    #[test]
    fn captures_tempo_time_signature_name_and_program() {
        let events = [
            0x00, 0xFF, 0x03, 0x05, b'M', b'e', b'l', b'o', b'd', //
            0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, //
            0x00, 0xFF, 0x58, 0x04, 0x03, 0x02, 0x18, 0x08, //
            0x00, 0xC2, 0x30, //
            0x00, 0x92, 62, 80, //
            0x60, 0x82, 62, 0, //
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let score = decode(&file(&events)).unwrap();
        assert_eq!(
            score.tempo_map,
            vec![TempoChange {
                tick: 0,
                microseconds_per_quarter: 500_000
            }]
        );
        assert_eq!(score.time_signatures[0].numerator, 3);
        assert_eq!(score.time_signatures[0].denominator, 4);
        let track = &score.tracks[0];
        assert_eq!(track.name.as_deref(), Some("Melod"));
        assert_eq!(track.program, Some(0x30));
        assert_eq!(track.notes, vec![Note::new(62, 80, 0, 96, 2)]);
    }

    #[test]
    fn unmatched_note_on_is_clipped_to_final_tick() {
        let events = [
            0x00, 0x90, 60, 100, //
            0x81, 0x00, 0xFF, 0x2F, 0x00, // end of track at tick 128
        ];
        let score = decode(&file(&events)).unwrap();
        assert_eq!(score.tracks[0].notes, vec![Note::new(60, 100, 0, 128, 0)]);
    }

    #[test]
    fn repeated_pitch_pairs_first_in_first_out() {
        let events = [
            0x00, 0x90, 60, 100, //
            0x0A, 60, 90, // second onset at 10 while the first still sounds
            0x0A, 60, 0, // off at 20 closes the onset at 0
            0x0A, 60, 0, // off at 30 closes the onset at 10
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let score = decode(&file(&events)).unwrap();
        assert_eq!(
            score.tracks[0].notes,
            vec![Note::new(60, 100, 0, 20, 0), Note::new(60, 90, 10, 20, 0)]
        );
    }

    #[test]
    fn unmatched_note_off_is_ignored() {
        let events = [0x00, 0x80, 60, 0, 0x00, 0xFF, 0x2F, 0x00];
        let score = decode(&file(&events)).unwrap();
        assert!(score.tracks[0].notes.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = file(&[0x00, 0xFF, 0x2F, 0x00]);
        bytes[0] = b'X';
        assert!(malformed_reason(decode(&bytes)).contains("MThd"));
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn rejects_format_two() {
        let mut bytes = header(2, 1, 480);
        bytes.extend(track_chunk(&[0x00, 0xFF, 0x2F, 0x00]));
        assert!(malformed_reason(decode(&bytes)).contains("format 2"));
    }

    #[test]
    fn rejects_smpte_division() {
        let mut bytes = header(0, 1, 0xE728);
        bytes.extend(track_chunk(&[0x00, 0xFF, 0x2F, 0x00]));
        assert!(malformed_reason(decode(&bytes)).contains("SMPTE"));
    }

    #[test]
    fn rejects_declared_length_longer_than_data() {
        let mut bytes = header(0, 1, 480);
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
        assert!(malformed_reason(decode(&bytes)).contains("declares 100 bytes"));
    }

    #[test]
    fn rejects_bytes_after_end_of_track() {
        let events = [0x00, 0xFF, 0x2F, 0x00, 0x00, 0x90, 60, 100];
        assert!(malformed_reason(decode(&file(&events))).contains("follow end-of-track"));
    }

    #[test]
    fn rejects_event_running_past_chunk() {
        let events = [0x00, 0x90, 60];
        assert!(malformed_reason(decode(&file(&events))).contains("past the declared length"));
    }

    #[test]
    fn rejects_missing_end_of_track() {
        let events = [0x00, 0x90, 60, 100];
        assert!(malformed_reason(decode(&file(&events))).contains("without an end-of-track"));
    }

    #[test]
    fn rejects_missing_track_chunks() {
        let mut bytes = header(1, 2, 480);
        bytes.extend(track_chunk(&[0x00, 0xFF, 0x2F, 0x00]));
        assert!(malformed_reason(decode(&bytes)).contains("only 1 track chunks"));
    }

    #[test]
    fn skips_unknown_chunks() {
        let mut bytes = header(0, 1, 96);
        bytes.extend_from_slice(b"XFIH");
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        bytes.extend(track_chunk(&[0x00, 0xFF, 0x2F, 0x00]));
        let score = decode(&bytes).unwrap();
        assert_eq!(score.ticks_per_quarter, 96);
        assert_eq!(score.tracks.len(), 1);
    }

    #[test]
    fn tracks_decode_independently() {
        // Running status from track 0 must not leak into track 1.
        let mut bytes = header(1, 2, 480);
        bytes.extend(track_chunk(&[0x00, 0x90, 60, 100, 0x10, 60, 0, 0x00, 0xFF, 0x2F, 0x00]));
        bytes.extend(track_chunk(&[0x00, 64, 100, 0x00, 0xFF, 0x2F, 0x00]));
        let reason = malformed_reason(decode(&bytes));
        assert!(reason.contains("no running status"), "{reason}");
    }
}
