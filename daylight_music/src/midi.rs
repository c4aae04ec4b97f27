// MIDI output from composed timelines.
//
// Converts a finished page (a simultaneous event of tagged instrument
// streams) into a Standard MIDI File for playback. Track 0 carries the
// tempo; every stream gets its own track named after its tag, with the
// instrument's program.
//
// Just-intonation pitches are played as the nearest equal-tempered key plus
// a 14-bit pitch bend (bend range +-2 semitones, keys tuned to A = 440 Hz,
// 1/1 sounding at the concert pitch). A bend applies to a whole channel, so
// every pitch of a chord sounds on its own channel: each track owns
// `VOICES_PER_TRACK` channels, skipping the General MIDI drum channel.
//
// Uses the `midly` crate. Output is SMF Format 1 (multi-track). The
// timeline is only read.

use crate::error::Result;
use crate::event::Event;
use crate::pitch::{JustPitch, Orchestration};
use crate::time::Beats;
use log::{debug, warn};
use midly::{
    Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u14, u15, u24, u28},
};
use num_rational::Ratio;
use num_traits::Zero;
use std::path::Path;

/// Ticks per beat (quarter note) in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// MIDI key of A = 440 Hz.
const REFERENCE_KEY: f64 = 69.0;
const REFERENCE_FREQUENCY: f64 = 440.0;

const BEND_CENTER: f64 = 8192.0;
const BEND_RANGE_SEMITONES: f64 = 2.0;

/// Channels reserved per track, i.e. the largest chord played in tune.
const VOICES_PER_TRACK: usize = 3;

const DRUM_CHANNEL: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MidiSettings {
    /// Quarter notes per minute.
    pub tempo: u16,
    /// Frequency of 1/1 in Hz.
    pub concert_pitch: f64,
}

/// Nearest MIDI key and pitch bend value sounding `pitch`.
pub fn key_and_bend(pitch: &JustPitch, concert_pitch: f64) -> (u8, u16) {
    let exact = REFERENCE_KEY + 12.0 * (pitch.frequency(concert_pitch) / REFERENCE_FREQUENCY).log2();
    let key = exact.round().clamp(0.0, 127.0);
    let bend = BEND_CENTER + (exact - key) / BEND_RANGE_SEMITONES * BEND_CENTER;
    (key as u8, bend.round().clamp(0.0, 16383.0) as u16)
}

fn to_ticks(time: Beats) -> u32 {
    if time <= Beats::zero() {
        return 0;
    }
    (time * Ratio::from_integer(i64::from(TICKS_PER_QUARTER)))
        .round()
        .to_integer()
        .clamp(0, i64::from(u32::MAX)) as u32
}

fn channel(track: usize, voice: usize) -> u4 {
    let mut index = (track * VOICES_PER_TRACK + voice) % 15;
    if index >= DRUM_CHANNEL {
        index += 1;
    }
    u4::new(index as u8)
}

/// A MIDI message at an absolute tick. At equal ticks, lower `order` comes
/// first: note offs, then bends, then note ons.
struct Timed {
    tick: u32,
    order: u8,
    channel: u4,
    message: MidiMessage,
}

fn stream_track<'a>(track: usize, tag: &'a str, stream: &Event, program: u8, concert_pitch: f64) -> Track<'a> {
    let mut timed = Vec::new();
    for leaf in stream.leaves() {
        let note = leaf.note;
        if note.is_rest() {
            continue;
        }
        if note.pitches.len() > VOICES_PER_TRACK {
            warn!("{tag}: chord of {} pitches, extra voices share channels", note.pitches.len());
        }
        let on = to_ticks(leaf.start);
        let off = to_ticks(leaf.start + note.duration);
        let vel = u7::new(note.volume.velocity().min(127));
        for (voice, pitch) in note.pitches.iter().enumerate() {
            let channel = channel(track, voice % VOICES_PER_TRACK);
            let (key, bend) = key_and_bend(pitch, concert_pitch);
            let key = u7::new(key);
            timed.push(Timed {
                tick: on,
                order: 1,
                channel,
                message: MidiMessage::PitchBend {
                    bend: PitchBend(u14::new(bend)),
                },
            });
            timed.push(Timed {
                tick: on,
                order: 2,
                channel,
                message: MidiMessage::NoteOn { key, vel },
            });
            timed.push(Timed {
                tick: off,
                order: 0,
                channel,
                message: MidiMessage::NoteOff { key, vel: u7::new(0) },
            });
        }
    }
    timed.sort_by_key(|t| (t.tick, t.order));

    let mut events: Track<'a> = vec![TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(tag.as_bytes())),
    }];
    for voice in 0..VOICES_PER_TRACK {
        events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel: channel(track, voice),
                message: MidiMessage::ProgramChange {
                    program: u7::new(program.min(127)),
                },
            },
        });
    }
    let mut last = 0;
    for t in timed {
        events.push(TrackEvent {
            delta: u28::new(t.tick - last),
            kind: TrackEventKind::Midi {
                channel: t.channel,
                message: t.message,
            },
        });
        last = t.tick;
    }
    events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    events
}

/// Convert a composed page to an in-memory SMF.
///
/// `page` is a simultaneous event of tagged streams (or a single tagged
/// stream); untagged children are skipped.
pub fn timeline_to_smf<'a>(page: &'a Event, orchestration: &Orchestration, settings: MidiSettings) -> Smf<'a> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    let tempo = 60_000_000 / u32::from(settings.tempo.max(1));
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    let streams: Vec<&Event> = match page {
        Event::Simultaneous { children, .. } => children.iter().collect(),
        other => vec![other],
    };
    for stream in streams {
        let Some(tag) = stream.tag() else {
            debug!("skipping untagged {} in MIDI export", stream.kind_name());
            continue;
        };
        let program = orchestration.get(tag).map(|i| i.midi_program).unwrap_or(0);
        let track = smf.tracks.len() - 1;
        smf.tracks.push(stream_track(track, tag, stream, program, settings.concert_pitch));
    }
    smf
}

/// Convert a composed page to MIDI and write it to `path`.
pub fn write_midi(page: &Event, orchestration: &Orchestration, settings: MidiSettings, path: &Path) -> Result<()> {
    let smf = timeline_to_smf(page, orchestration, settings);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    std::fs::write(path, &buf)?;
    Ok(())
}
