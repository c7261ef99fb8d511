//! Decode/encode agreement, checked against `midly` as an independent reader.

use midi_codec::{decode, encode, Note, Score, TempoChange, TimeSignature, Track};
use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use pretty_assertions::assert_eq;

fn melody_score() -> Score {
    let mut score = Score::new(480);
    score.tempo_map = vec![
        TempoChange {
            tick: 0,
            microseconds_per_quarter: 500_000,
        },
        TempoChange {
            tick: 1920,
            microseconds_per_quarter: 400_000,
        },
    ];
    score.time_signatures = vec![TimeSignature {
        tick: 0,
        numerator: 3,
        denominator: 4,
    }];
    score.tracks.push(Track::new(
        Some("Melody".into()),
        vec![
            Note::new(60, 100, 0, 480, 0),
            Note::new(62, 96, 480, 240, 0),
            Note::new(64, 90, 720, 240, 0),
            Note::new(65, 88, 960, 960, 0),
            Note::new(67, 80, 2400, 1, 0),
        ],
    ));
    score.tracks.push(
        Track::new(
            Some("Harmony 1".into()),
            vec![
                Note::new(48, 72, 0, 1440, 1),
                Note::new(52, 72, 1440, 0, 1),
                Note::new(53, 72, 1440, 961, 1),
            ],
        )
        .with_program(48),
    );
    score
}

#[test]
fn decode_inverts_encode() {
    let score = melody_score();
    let bytes = encode(&score).unwrap();
    assert_eq!(decode(&bytes).unwrap(), score);
}

#[test]
fn reencoding_decoded_output_is_byte_identical() {
    let bytes = encode(&melody_score()).unwrap();
    let again = encode(&decode(&bytes).unwrap()).unwrap();
    assert_eq!(again, bytes);
}

#[test]
fn midly_reads_the_same_notes() {
    let score = melody_score();
    let bytes = encode(&score).unwrap();
    let smf = Smf::parse(&bytes).expect("encoded MIDI should be valid");

    assert_eq!(smf.header.format, midly::Format::Parallel);
    assert_eq!(smf.tracks.len(), 2);
    assert_eq!(
        smf.header.timing,
        midly::Timing::Metrical(midly::num::u15::new(480))
    );

    let mut onsets = Vec::new();
    let mut tick = 0u64;
    let mut tempos = 0;
    for event in &smf.tracks[0] {
        tick += event.delta.as_int() as u64;
        match event.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } if vel.as_int() > 0 => onsets.push((tick, key.as_int())),
            TrackEventKind::Meta(MetaMessage::Tempo(_)) => tempos += 1,
            _ => {}
        }
    }
    assert_eq!(
        onsets,
        vec![(0, 60), (480, 62), (720, 64), (960, 65), (2400, 67)]
    );
    assert_eq!(tempos, 2);
}

#[test]
fn decodes_midly_written_file() {
    use midly::num::{u15, u28, u4, u7};
    use midly::{Format, Header, Timing, TrackEvent};

    let mut smf = Smf::new(Header::new(Format::SingleTrack, Timing::Metrical(u15::new(96))));
    let channel = u4::new(5);
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn {
                    key: u7::new(69),
                    vel: u7::new(70),
                },
            },
        },
        TrackEvent {
            delta: u28::new(96),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOff {
                    key: u7::new(69),
                    vel: u7::new(64),
                },
            },
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);
    let mut bytes = Vec::new();
    smf.write(&mut bytes).unwrap();

    let score = decode(&bytes).unwrap();
    assert_eq!(score.ticks_per_quarter, 96);
    assert_eq!(score.tracks[0].notes, vec![Note::new(69, 70, 0, 96, 5)]);
}

#[test]
fn empty_score_encodes_header_only() {
    let score = Score::new(240);
    let bytes = encode(&score).unwrap();
    assert_eq!(bytes.len(), 14);
    assert_eq!(decode(&bytes).unwrap(), score);
}
