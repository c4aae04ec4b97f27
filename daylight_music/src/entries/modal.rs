// Modal entries.
//
// ModalContext0 nodes move one instrument from the modal event's start pitch
// to its end pitch. `scale`, `dyad`, `scale-harp` and
// `alternating-scale-chords` are helpers: they declare pitch or chord
// output, so tree nodes never pick them and they only run when another
// entry calls them through a dependency slot. `scale-event-harp` and
// `two-dyads` turn that material into placements, `scale-event-one-chord`
// holds a single soft chord late in a phrase. `explicit-silence-0`
// overrides everything on silenced events (negative energy).
//
// ModalContext1 nodes dwell on the event's pitch: string instruments play
// natural harmonics on loud enough events, polyphonic instruments play a
// short `pattern`, and `still-event` places the `still` helper's soft
// repeated notes. Anything else rests.

use super::{DEFAULT_CONCERT_PITCH, capped, proportional, rests, sample_strings, solo_tag};
use crate::context::{Context, ContextKind};
use crate::entry::{Call, Entry, Output, OutputKind, Support};
use crate::error::EntryError;
use crate::event::{Dynamic, Event, Indicator, Note};
use crate::params::Params;
use crate::pitch::{Instrument, JustPitch, Orchestration, Scale};
use crate::placement::EventPlacement;
use crate::require;
use crate::resonator::{Resonator, ResonatorTuple};
use crate::time::{Beats, TimeRange, balance, beats, get_ranges};
use log::debug;
use num_traits::Zero;
use std::ops::{Range, RangeInclusive};

/// Walks the scale from the start pitch to the end pitch.
///
/// Params: `start`, `end` (pitch classes overriding the modal event's),
/// `direction` (true rises, default), `octave-count` (extra octaves to span).
pub struct ScaleWalk;

impl ScaleWalk {
    fn pitch_classes(cx: &Context, params: &Params) -> Result<(JustPitch, JustPitch), EntryError> {
        let event = cx.modal0()?;
        Ok((
            params.pitch("start").unwrap_or(event.start_pitch),
            params.pitch("end").unwrap_or(event.end_pitch),
        ))
    }
}

/// The registers of the start and end pitch classes a walk spans. Registers
/// are paired bottom-up and the `octave_count + 1` middle pairs kept.
fn walk_bounds(
    start_class: JustPitch,
    end_class: JustPitch,
    instrument: &Instrument,
    rise: bool,
    octave_count: usize,
) -> Option<(JustPitch, JustPitch)> {
    let mut starts = instrument.pitch_variants(&start_class);
    let mut ends = instrument.pitch_variants(&end_class);
    let (first_start, first_end) = (*starts.first()?, *ends.first()?);
    if first_start > first_end {
        if rise {
            ends.remove(0);
        }
    } else if !rise {
        starts.remove(0);
    }
    let pairs: Vec<(JustPitch, JustPitch)> = starts.into_iter().zip(ends).collect();
    let keep = (octave_count + 1).min(pairs.len());
    let left = (pairs.len() - keep) / 2;
    let kept = &pairs[left..left + keep];
    let (first, last) = (kept.first()?, kept.last()?);
    if rise {
        Some((first.0, last.1))
    } else {
        Some((last.0, first.1))
    }
}

impl Entry for ScaleWalk {
    fn name(&self) -> &str {
        "scale"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Pitches
    }

    fn relevance(&self) -> i32 {
        1
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        require!(cx.instrument()?.pitched, "needs a pitched instrument");
        require!(cx.modal0().is_ok(), "needs a ModalEvent0");
        let (start, end) = Self::pitch_classes(cx, call.params())?;
        require!(start != end, "start and end pitch are both {start}");
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let scale = &cx.modal0()?.scale;
        let instrument = cx.instrument()?;
        let (start_class, end_class) = Self::pitch_classes(cx, call.params())?;
        let rise = call.params().bool("direction").unwrap_or(true);
        let octave_count = call.params().int("octave-count").unwrap_or(0).max(0) as usize;
        let Some((start, end)) = walk_bounds(start_class, end_class, instrument, rise, octave_count) else {
            return Ok(Output::Pitches(Vec::new()));
        };
        let (Some(a), Some(b)) = (scale.pitch_to_scale_index(&start), scale.pitch_to_scale_index(&end)) else {
            return Err(EntryError::invalid(format!("{start} or {end} lies outside the scale")));
        };
        let indices: Vec<usize> = if b < a { (b..=a).rev().collect() } else { (a..=b).collect() };
        let pitches = indices
            .into_iter()
            .filter_map(|i| scale.pitches().get(i).copied())
            .filter(|p| instrument.contains(p))
            .collect();
        Ok(Output::Pitches(pitches))
    }
}

/// The most harmonic partner of `pitch` among the scale pitches
/// `distance` steps away, preferring anything but octaves. Returns
/// `[pitch, partner]`, or just `[pitch]` if no partner exists.
pub fn find_dyad(
    pitch: JustPitch,
    scale: &Scale,
    direction: Option<bool>,
    distance: Range<i64>,
    prohibited: &[JustPitch],
) -> Vec<JustPitch> {
    let Some(index) = scale.pitch_to_scale_index(&pitch) else {
        return vec![pitch];
    };
    let signs: &[i64] = match direction {
        None => &[1, -1],
        Some(true) => &[1],
        Some(false) => &[-1],
    };
    let mut candidates = Vec::new();
    for sign in signs {
        for steps in distance.clone() {
            let target = index as i64 + sign * steps;
            if let Some(candidate) = scale.scale_index_to_pitch(target as isize) {
                if !prohibited.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }
    }
    let non_octaves: Vec<JustPitch> = candidates.iter().copied().filter(|c| !c.same_class(&pitch)).collect();
    let pool = if non_octaves.is_empty() { candidates } else { non_octaves };
    let champion = pool.iter().fold(None::<(JustPitch, f64)>, |best, &c| {
        let h = (pitch - c).harmonicity();
        match best {
            Some((_, bh)) if bh >= h => best,
            _ => Some((c, h)),
        }
    });
    match champion {
        Some((partner, _)) => vec![pitch, partner],
        None => {
            debug!("no dyad partner for {pitch}");
            vec![pitch]
        }
    }
}

/// Finds a harmonic partner for a pitch.
///
/// Params: `pitch` (defaults to the lowest playable register of the end
/// pitch), `direction` (absent: both ways), `distance-min`/`distance-max`
/// (scale steps, half-open, default 2..6), `prohibited` (pitches).
pub struct Dyad;

fn default_dyad_pitch(cx: &Context, instrument: &Instrument) -> Option<JustPitch> {
    let event = cx.modal0().ok()?;
    instrument.pitch_variants(&event.end_pitch).first().copied()
}

impl Entry for Dyad {
    fn name(&self) -> &str {
        "dyad"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Pitches
    }

    fn relevance(&self) -> i32 {
        1
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        let instrument = cx.instrument()?;
        require!(instrument.pitched, "needs a pitched instrument");
        require!(
            instrument.max_simultaneous >= 2,
            "{} cannot play two pitches at once",
            instrument.name
        );
        let Ok(event) = cx.modal0() else {
            return Ok(Support::unsupported("needs a ModalEvent0"));
        };
        require!(event.scale.pitches().len() > 2, "scale is too small for dyads");
        let Some(pitch) = call.params().pitch("pitch").or_else(|| default_dyad_pitch(cx, instrument)) else {
            return Ok(Support::unsupported(format!(
                "{} cannot play {}",
                instrument.name, event.end_pitch
            )));
        };
        require!(instrument.contains(&pitch), "{pitch} is outside the {}", instrument.name);
        require!(event.scale.contains(&pitch), "{pitch} is not a scale pitch");
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let event = cx.modal0()?;
        let instrument = cx.instrument()?;
        let params = call.params();
        let pitch = params
            .pitch("pitch")
            .or_else(|| default_dyad_pitch(cx, instrument))
            .ok_or(EntryError::MissingContextField("dyad pitch"))?;
        let distance = params.int("distance-min").unwrap_or(2)..params.int("distance-max").unwrap_or(6);
        let prohibited = params.pitches("prohibited").unwrap_or(&[]);
        Ok(Output::Pitches(find_dyad(
            pitch,
            &event.scale,
            params.bool("direction"),
            distance,
            prohibited,
        )))
    }
}

/// Scale-step ranges of the dyads added to the first and the last chord.
const HARP_DYAD_DISTANCES: [(i64, i64); 2] = [(3, 5), (6, 9)];

/// A scale walk harmonized into chords for the harp.
///
/// Params: `direction` (otherwise an activity decision at level 5).
pub struct ScaleHarp;

fn dyad_on(
    call: &Call<'_>,
    cx: &Context,
    pitch: JustPitch,
    (low, high): (i64, i64),
    prohibited: &[JustPitch],
) -> Result<Vec<JustPitch>, EntryError> {
    let params = Params::new()
        .with("pitch", pitch)
        .with("direction", false)
        .with("distance-min", low)
        .with("distance-max", high)
        .with("prohibited", prohibited.to_vec());
    call.dependency("dyad")?.call(cx, &params)?.into_pitches()
}

/// Append the last chord with its registers swapped, if playable.
fn add_inversion(instrument: &Instrument, chords: &mut Vec<Vec<JustPitch>>) {
    let Some(last) = chords.last() else {
        return;
    };
    let [low, high] = last.as_slice() else {
        return;
    };
    let inversion = vec![low.register(high.octave()), high.register(low.octave())];
    if inversion.iter().all(|p| instrument.contains(p)) {
        chords.push(inversion);
    }
}

/// Double the last pitch an octave, fifth or fourth below.
fn add_low_support(instrument: &Instrument, chords: &mut [Vec<JustPitch>]) {
    let Some(last) = chords.last_mut() else {
        return;
    };
    let Some(&top) = last.first() else {
        return;
    };
    let support = [JustPitch::new(2, 1), JustPitch::new(3, 2), JustPitch::new(4, 3)]
        .into_iter()
        .map(|interval| top - interval)
        .find(|p| instrument.contains(p));
    if let Some(support) = support {
        last.push(support);
    }
}

impl Entry for ScaleHarp {
    fn name(&self) -> &str {
        "scale-harp"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Chords
    }

    fn relevance(&self) -> i32 {
        1
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("scale", "scale"), ("dyad", "dyad")]
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind()).with_index(1)
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        require!(cx.instrument()?.max_simultaneous >= 2, "needs a harp");
        require!(cx.modal0().is_ok(), "needs a ModalEvent0");
        require!(cx.index() % 3 != 0, "index {} is a multiple of 3", cx.index());
        for slot in ["scale", "dyad"] {
            if let Support::Unsupported(reason) = call.dependency(slot)?.is_supported(cx, call.params())? {
                return Ok(Support::unsupported(format!("{slot}: {reason}")));
            }
        }
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let direction = match call.params().bool("direction") {
            Some(direction) => direction,
            None => call.activity(5),
        };
        let [first_range, last_range] = if direction {
            HARP_DYAD_DISTANCES
        } else {
            [HARP_DYAD_DISTANCES[1], HARP_DYAD_DISTANCES[0]]
        };

        let mut pitches = Vec::new();
        let mut octave_count = 0i64;
        while pitches.len() < 3 && octave_count < 3 {
            let params = call
                .params()
                .clone()
                .with("direction", direction)
                .with("octave-count", octave_count);
            pitches = call.dependency("scale")?.call(cx, &params)?.into_pitches()?;
            octave_count += 1;
        }
        if pitches.is_empty() {
            return Err(EntryError::invalid("scale walk produced no pitches"));
        }

        let instrument = cx.instrument()?;
        let mut chords: Vec<Vec<JustPitch>> = pitches.iter().map(|p| vec![*p]).collect();
        if call.activity(6) {
            chords[0] = dyad_on(call, cx, chords[0][0], first_range, &[])?;
        }
        if chords.len() >= 2 && call.activity(7) {
            let last = chords.len() - 1;
            // A closing second would sound like a cadence; answer it with
            // the inverted dyad.
            let inversion = chords[last][0].interval_to(&chords[last - 1][0]).cents().abs() < 250.0;
            let prohibited = chords[0].clone();
            chords[last] = dyad_on(call, cx, chords[last][0], last_range, &prohibited)?;
            if inversion {
                add_inversion(instrument, &mut chords);
            }
        }
        if chords.iter().all(|c| c.len() <= 1) && call.activity(4) {
            add_low_support(instrument, &mut chords);
        }
        Ok(Output::Chords(chords))
    }
}

/// Relative note lengths of the harp scale event.
const HARP_NOTE_WEIGHTS: [i64; 4] = [2, 3, 4, 5];

/// The harp's scale event: the chords of `scale-harp` as one soft phrase.
pub struct ScaleEventHarp;

impl Entry for ScaleEventHarp {
    fn name(&self) -> &str {
        "scale-event-harp"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn relevance(&self) -> i32 {
        50
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("scale-harp", "scale-harp")]
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind()).with_index(1)
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        call.dependency("scale-harp")?.is_supported(cx, call.params())
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let chords = call.dependency("scale-harp")?.call(cx, call.params())?.into_chords()?;
        if chords.is_empty() {
            return Err(EntryError::invalid("scale-harp returned no chords"));
        }
        let end_pitch = cx.modal0()?.end_pitch;
        let tag = solo_tag(cx)?;
        let duration = cx.duration();
        let real = capped(beats(25, 16), duration);
        let (start_range, end_range) = get_ranges(real, duration, beats(1, 2))?;

        let count = chords.len();
        let has_inversion = count >= 2 && chords[count - 2].len() > 1;
        let mut weights: Vec<i64> = (0..count)
            .map(|_| call.rng().choose(&HARP_NOTE_WEIGHTS).copied().unwrap_or(4))
            .collect();
        if has_inversion {
            weights[count - 1] = 4;
            weights[count - 2] = 4;
        } else {
            weights[count - 1] = 8;
        }
        let mut notes: Vec<Note> = chords
            .into_iter()
            .zip(proportional(real, &weights))
            .map(|(chord, d)| Note::new(d, chord).with_volume(Dynamic::Pp))
            .collect();

        if notes.iter().all(|n| n.pitches.len() <= 1) && call.activity(7) {
            for note in &mut notes[..count - 1] {
                note.indicators.insert("sons-xylo".to_string(), Indicator::Flag(true));
            }
        } else if count > 3 && call.activity(5) {
            let last_candidate = count - 2 - usize::from(has_inversion);
            if last_candidate >= 1 {
                let i = call.rng().range_usize_inclusive(1, last_candidate);
                notes[i]
                    .indicators
                    .insert("articulation".to_string(), Indicator::Text(".".to_string()));
            }
        }

        let stop = if has_inversion { count - 1 } else { count };
        for (i, note) in notes[..stop].iter_mut().rev().enumerate() {
            let lands = note.pitches.iter().any(|p| p.same_class(&end_pitch));
            if lands && ((i == 0 && call.activity(6)) || call.activity(2)) {
                note.indicators
                    .insert("articulation".to_string(), Indicator::Text(">".to_string()));
                note.volume = Dynamic::Mf;
            }
        }

        let event = Event::stream(&tag, notes.into_iter().map(Event::Note).collect());
        Ok(Output::Placement(EventPlacement::new(event, start_range, end_range)?))
    }
}

const DYAD_WEIGHTS: [i64; 4] = [2, 4, 3, 1];

/// Two dyads, one on the start pitch and one on the end pitch.
pub struct TwoDyads;

impl Entry for TwoDyads {
    fn name(&self) -> &str {
        "two-dyads"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn relevance(&self) -> i32 {
        35
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("dyad", "dyad")]
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind()).with_index(1)
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        let Ok(event) = cx.modal0() else {
            return Ok(Support::unsupported("needs a ModalEvent0"));
        };
        require!(cx.index() % 3 != 0, "index {} is a multiple of 3", cx.index());
        for pitch in [event.start_pitch, event.end_pitch] {
            let params = call.params().clone().with("pitch", pitch);
            if let Support::Unsupported(reason) = call.dependency("dyad")?.is_supported(cx, &params)? {
                return Ok(Support::unsupported(format!("dyad on {pitch}: {reason}")));
            }
        }
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let event = cx.modal0()?;
        let (pitch0, pitch1) = (event.start_pitch, event.end_pitch);
        let first_params = call
            .params()
            .clone()
            .with("pitch", pitch0)
            .with("prohibited", vec![pitch1]);
        let first = call.dependency("dyad")?.call(cx, &first_params)?.into_pitches()?;
        let second_params = call
            .params()
            .clone()
            .with("pitch", pitch1)
            .with("prohibited", first.clone());
        let second = call.dependency("dyad")?.call(cx, &second_params)?.into_pitches()?;

        let tag = solo_tag(cx)?;
        let duration = cx.duration();
        let real = capped(beats(20, 16), duration);
        let (start_range, end_range) = get_ranges(real, duration, beats(1, 2))?;
        let weights: Vec<i64> = (0..2)
            .map(|_| call.rng().choose(&DYAD_WEIGHTS).copied().unwrap_or(2))
            .collect();
        let notes = [first, second]
            .into_iter()
            .zip(proportional(real, &weights))
            .map(|(dyad, d)| Event::Note(Note::new(d, dyad).with_volume(Dynamic::P)))
            .collect();
        let placement = EventPlacement::new(Event::stream(&tag, notes), start_range, end_range)?;
        Ok(Output::Placement(placement))
    }
}

/// Rest through the whole modal event.
pub struct ModalSilence;

impl Entry for ModalSilence {
    fn name(&self) -> &str {
        "modal-silence"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn relevance(&self) -> i32 {
        10
    }

    fn is_supported(&self, cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        require!(!cx.orchestration().is_empty(), "nobody plays here");
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, _call: &mut Call<'_>) -> Result<Output, EntryError> {
        Ok(rests(cx))
    }
}

/// A held fermata rest for every instrument of a silenced event.
pub struct ExplicitSilence;

impl Entry for ExplicitSilence {
    fn name(&self) -> &str {
        "explicit-silence-0"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn relevance(&self) -> i32 {
        10000
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind()).with_energy(-1)
    }

    fn is_supported(&self, cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.energy() < 0, "energy {} is not negative", cx.energy());
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, _call: &mut Call<'_>) -> Result<Output, EntryError> {
        let duration = cx.duration();
        let real = capped(beats(10, 16), duration);
        let (start_range, end_range) = get_ranges(real, duration, beats(1, 2))?;
        let streams = cx
            .orchestration()
            .iter()
            .map(|instrument| {
                let fermata = Note::rest(real).with_indicator("fermata", Indicator::Text("longfermata".to_string()));
                Event::stream(&instrument.name, vec![Event::Note(fermata)])
            })
            .collect();
        let placement = EventPlacement::new(Event::simultaneous(None, streams), start_range, end_range)?;
        Ok(Output::Placement(placement))
    }
}

pub struct Modal1Silence;

impl Entry for Modal1Silence {
    fn name(&self) -> &str {
        "modal-1-silence"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal1
    }

    fn relevance(&self) -> i32 {
        20
    }

    fn is_supported(&self, cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        require!(!cx.orchestration().is_empty(), "nobody plays here");
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, _call: &mut Call<'_>) -> Result<Output, EntryError> {
        Ok(rests(cx))
    }
}

/// Natural harmonics on the dwelling pitch, with a resonator tuned to the
/// harmonic and its open string.
///
/// Params: `pitch` (overrides the modal event's), `pizzicato-level`
/// (activity level, default 3), `concert-pitch` (Hz).
pub struct NaturalHarmonic;

impl NaturalHarmonic {
    fn pitch(cx: &Context, params: &Params) -> Result<JustPitch, EntryError> {
        Ok(params.pitch("pitch").unwrap_or(cx.modal1()?.pitch))
    }
}

impl Entry for NaturalHarmonic {
    fn name(&self) -> &str {
        "natural-harmonic"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal1
    }

    fn relevance(&self) -> i32 {
        80
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind())
            .with_orchestration(Orchestration(vec![sample_strings()]))
            .with_energy(60)
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.modal1().is_ok(), "needs a ModalEvent1");
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        let instrument = cx.instrument()?;
        require!(!instrument.strings.is_empty(), "{} has no strings", instrument.name);
        let pitch = Self::pitch(cx, call.params())?;
        require!(
            !instrument.harmonic_variants(&pitch).is_empty(),
            "{} has no natural harmonic for {pitch}",
            instrument.name
        );
        require!(cx.energy() > 50, "energy {} is too low", cx.energy());
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let instrument = cx.instrument()?;
        let duration = cx.duration();
        let position = if cx.index() % 4 == 3 { balance(0.95) } else { beats(1, 2) };
        let mut real = beats(27, 16);
        if real > duration {
            real = duration - beats(1, 16);
            if real < Beats::zero() {
                real = duration;
            }
        }
        let (start_range, end_range) = get_ranges(real, duration, position)?;

        let pitch = Self::pitch(cx, call.params())?;
        let variants = instrument.harmonic_variants(&pitch);
        let &(sounding, string, partial) = call
            .rng()
            .choose(&variants)
            .ok_or_else(|| EntryError::invalid(format!("no natural harmonic for {pitch}")))?;

        let (low, high) = if real > beats(25, 16) {
            (2, 3)
        } else if real > beats(22, 16) {
            (1, 3)
        } else {
            (1, 2)
        };
        let count = call.rng().range_usize_inclusive(low, high);
        // High partials only give noise when plucked.
        let level = call.params().int("pizzicato-level").unwrap_or(3).max(0) as usize;
        let contact = if partial <= 4 && call.activity(level) { "pizzicato" } else { "ordinario" };

        let mut weights = Vec::with_capacity(2 * count);
        for i in 0..count {
            if i > 0 {
                weights.push(1);
            }
            weights.push(2);
        }
        let children = proportional(real, &weights)
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                if i % 2 == 1 {
                    return Event::rest(d);
                }
                Event::Note(
                    Note::new(d, vec![sounding])
                        .with_volume(Dynamic::Ppp)
                        .with_indicator("natural-harmonic", Indicator::Count(partial))
                        .with_indicator("string", Indicator::Text(string.to_string()))
                        .with_indicator("contact-point", Indicator::Text(contact.to_string())),
                )
            })
            .collect();

        let placement = EventPlacement::new(Event::stream(&instrument.name, children), start_range, end_range)?;
        let concert_pitch = call.params().float("concert-pitch").unwrap_or(DEFAULT_CONCERT_PITCH);
        let resonators = ResonatorTuple(vec![Resonator::from_pitches(0.0, &[sounding, string], concert_pitch)]);
        Ok(Output::PlacementWithResonators(placement, resonators))
    }
}

/// Average pairwise harmonicity and interval check over a chord made of
/// `picked` plus `partners`. Pairs inside `picked` are not counted.
fn chord_harmonicity(picked: &[JustPitch], partners: &[JustPitch], max_cents: Option<f64>) -> Option<f64> {
    let mut pairs = Vec::new();
    for p in picked {
        pairs.extend(partners.iter().map(|q| (*p, *q)));
    }
    for (i, p) in partners.iter().enumerate() {
        pairs.extend(partners[i + 1..].iter().map(|q| (*p, *q)));
    }
    if pairs.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for (p, q) in &pairs {
        let interval = *p - *q;
        if max_cents.is_some_and(|max| interval.cents().abs() > max) {
            return None;
        }
        total += interval.harmonicity();
    }
    Some(total / pairs.len() as f64)
}

/// Every `k`-element subset of `pool`, in index order.
fn combinations(pool: &[JustPitch], k: usize) -> Vec<Vec<JustPitch>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for (i, &first) in pool.iter().enumerate() {
        for mut tail in combinations(&pool[i + 1..], k - 1) {
            tail.insert(0, first);
            out.push(tail);
        }
    }
    out
}

/// The most harmonic chord holding `picked` and partners from `pool`, in
/// ascending order.
///
/// Chords have `sizes` pitches, no interval wider than `max_interval`, and
/// an average pairwise harmonicity of at least that of 7/4. The first chord
/// found wins ties.
pub fn most_harmonic_chord(
    picked: &[JustPitch],
    pool: &[JustPitch],
    sizes: RangeInclusive<usize>,
    max_interval: Option<JustPitch>,
) -> Option<Vec<JustPitch>> {
    let mut valid: Vec<JustPitch> = pool.iter().copied().filter(|p| !picked.contains(p)).collect();
    valid.sort();
    valid.dedup();
    let max_cents = max_interval.map(|i| i.cents().abs());
    let threshold = JustPitch::new(7, 4).harmonicity();
    let mut champion: Option<(Vec<JustPitch>, f64)> = None;
    for size in sizes {
        let Some(partner_count) = size.checked_sub(picked.len()) else {
            continue;
        };
        for partners in combinations(&valid, partner_count) {
            let Some(h) = chord_harmonicity(picked, &partners, max_cents) else {
                continue;
            };
            if h < threshold || champion.as_ref().is_some_and(|(_, best)| *best >= h) {
                continue;
            }
            let mut chord: Vec<JustPitch> = picked.iter().copied().chain(partners).collect();
            chord.sort();
            champion = Some((chord, h));
        }
    }
    champion.map(|(chord, _)| chord)
}

/// The scale's degrees in the octave above its tonic.
fn degree_classes(scale: &Scale) -> Vec<JustPitch> {
    (0..scale.len_per_period())
        .map(|d| scale.scale_position_to_pitch(d, 0).normalize())
        .collect()
}

/// Interleaves a scale walk's chords with chords nobody can tune by ear.
///
/// Every walk pitch gets its most harmonic two- or three-note chord from
/// the scale's degrees (tunable). Before each, a chord of the degrees that
/// neither it nor the previous tunable chord uses (untunable):
/// `X A X B X C ...`. Pitches are classes in the octave above 1/1.
pub struct AlternatingScaleChords;

impl AlternatingScaleChords {
    /// `cx` played by an instrument covering the whole scale, so the walk
    /// only depends on the modal event.
    fn unbounded(cx: &Context) -> Context {
        let any = Instrument::pitched("any", "any", JustPitch::new(1, 16), JustPitch::new(16, 1));
        cx.with_orchestration(Orchestration(vec![any]))
    }
}

impl Entry for AlternatingScaleChords {
    fn name(&self) -> &str {
        "alternating-scale-chords"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Chords
    }

    fn relevance(&self) -> i32 {
        1
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("scale", "scale")]
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.modal0().is_ok(), "needs a ModalEvent0");
        call.dependency("scale")?.is_supported(&Self::unbounded(cx), call.params())
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let walk = call
            .dependency("scale")?
            .call(&Self::unbounded(cx), call.params())?
            .into_pitches()?;
        let available = degree_classes(&cx.modal0()?.scale);
        let tunable: Vec<Vec<JustPitch>> = walk
            .iter()
            .map(|p| {
                let class = p.normalize();
                most_harmonic_chord(&[class], &available, 2..=3, None).unwrap_or_else(|| vec![class])
            })
            .collect();
        let mut chords = Vec::with_capacity(2 * tunable.len());
        let mut previous: &[JustPitch] = &[];
        for chord in &tunable {
            let untunable = available
                .iter()
                .copied()
                .filter(|p| !previous.contains(p) && !chord.contains(p))
                .collect();
            chords.push(untunable);
            chords.push(chord.clone());
            previous = chord.as_slice();
        }
        Ok(Output::Chords(chords))
    }
}

/// Bowed harp strings only speak between these pitches.
fn bowed_harp_ambitus() -> (JustPitch, JustPitch) {
    (JustPitch::new(1, 5), JustPitch::new(2, 5))
}

/// Fewest distinct pitch classes a chord of `n` pitches may have.
const MIN_PITCH_CLASSES: [usize; 6] = [0, 1, 2, 2, 3, 3];

/// What `instrument` may contribute to a held chord over `scale`: double
/// stops on neighbouring open strings, bowed low harp notes, or any single
/// playable scale pitch.
fn held_chord_options(instrument: &Instrument, scale: &Scale) -> Vec<Vec<JustPitch>> {
    if !instrument.strings.is_empty() {
        return instrument
            .strings
            .windows(2)
            .filter(|pair| pair[0] != pair[1] && pair.iter().all(|p| scale.contains(p)))
            .map(<[JustPitch]>::to_vec)
            .collect();
    }
    if instrument.name == "harp" {
        let (low, high) = bowed_harp_ambitus();
        return degree_classes(scale)
            .iter()
            .flat_map(|d| instrument.pitch_variants(d))
            .filter(|p| *p >= low && *p <= high)
            .map(|p| vec![p])
            .collect();
    }
    scale
        .pitches()
        .iter()
        .filter(|p| instrument.contains(p))
        .map(|p| vec![*p])
        .collect()
}

/// Every way of picking one option per instrument.
fn product(options: &[Vec<Vec<JustPitch>>]) -> Vec<Vec<Vec<JustPitch>>> {
    let mut out: Vec<Vec<Vec<JustPitch>>> = vec![Vec::new()];
    for choices in options {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                choices.iter().map(move |choice| {
                    let mut next = prefix.clone();
                    next.push(choice.clone());
                    next
                })
            })
            .collect();
    }
    out
}

/// One option per instrument, maximizing the summed pairwise harmonicity of
/// all pitches and `reference`. Combinations doubling a pitch are used only
/// if nothing else has enough pitch classes.
fn held_chord(options: &[Vec<Vec<JustPitch>>], reference: JustPitch) -> Option<Vec<Vec<JustPitch>>> {
    let pitch_count: usize = options.iter().map(|o| o.first().map_or(0, Vec::len)).sum();
    let min_classes = MIN_PITCH_CLASSES.get(pitch_count).copied().unwrap_or(3);
    let mut best: Option<(Vec<Vec<JustPitch>>, f64)> = None;
    let mut doubled: Option<(Vec<Vec<JustPitch>>, f64)> = None;
    for combination in product(options) {
        let pitches = combination.concat();
        let mut classes: Vec<JustPitch> = pitches.iter().map(JustPitch::normalize).collect();
        classes.sort();
        classes.dedup();
        if classes.len() < min_classes {
            continue;
        }
        let mut distinct = pitches.clone();
        distinct.sort();
        distinct.dedup();
        let mut all = pitches.clone();
        all.push(reference);
        let fitness: f64 = all
            .iter()
            .enumerate()
            .flat_map(|(i, p)| all[i + 1..].iter().map(move |q| (*p - *q).harmonicity()))
            .sum();
        let slot = if distinct.len() == pitches.len() { &mut best } else { &mut doubled };
        if slot.as_ref().is_none_or(|(_, f)| fitness > *f) {
            *slot = Some((combination, fitness));
        }
    }
    best.or(doubled).map(|(chord, _)| chord)
}

/// A single very soft chord held by every instrument, around the end pitch.
pub struct ScaleEventOneChord;

impl Entry for ScaleEventOneChord {
    fn name(&self) -> &str {
        "scale-event-one-chord"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn relevance(&self) -> i32 {
        60
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind()).with_index(2)
    }

    fn is_supported(&self, cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        require!(matches!(cx.index() % 4, 2 | 3), "index {} is early in its phrase", cx.index());
        require!((40..=50).contains(&cx.energy()), "energy {} is not moderate", cx.energy());
        require!(!cx.orchestration().is_empty(), "nobody plays here");
        let Ok(event) = cx.modal0() else {
            return Ok(Support::unsupported("needs a ModalEvent0"));
        };
        for instrument in cx.orchestration().iter() {
            require!(instrument.pitched, "{} is unpitched", instrument.name);
            require!(
                !held_chord_options(instrument, &event.scale).is_empty(),
                "{} has nothing to hold",
                instrument.name
            );
        }
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, _call: &mut Call<'_>) -> Result<Output, EntryError> {
        let event = cx.modal0()?;
        let duration = cx.duration();
        let mut real = beats(26, 16);
        if real > duration {
            real = duration - beats(2, 16);
            if real < Beats::zero() {
                real = duration;
            }
        }
        let (start_range, end_range) = get_ranges(real, duration, balance(1.0))?;

        let options: Vec<Vec<Vec<JustPitch>>> = cx
            .orchestration()
            .iter()
            .map(|instrument| held_chord_options(instrument, &event.scale))
            .collect();
        let chord = held_chord(&options, event.end_pitch)
            .ok_or_else(|| EntryError::invalid(format!("no held chord around {}", event.end_pitch)))?;

        let last = cx.orchestration().len().saturating_sub(1);
        let streams = cx
            .orchestration()
            .iter()
            .zip(chord)
            .enumerate()
            .map(|(i, (instrument, pitches))| {
                let mut note = Note::new(real, pitches)
                    .with_volume(Dynamic::Ppp)
                    .with_indicator("duration-line", Indicator::Flag(true));
                if i < last {
                    note = note.with_indicator("synchronization-point", Indicator::Count(5));
                }
                Event::stream(&instrument.name, vec![Event::Note(note)])
            })
            .collect();
        let placement = EventPlacement::new(Event::simultaneous(None, streams), start_range, end_range)?;
        Ok(Output::Placement(placement))
    }
}

/// Markov weights of the next pitch of `still`. State 0 is the dwelling
/// pitch, 1 and 2 its lower and upper scale neighbours.
const STILL_CHAIN: [[f64; 3]; 3] = [[0.0, 1.0, 1.0], [1.0, 0.0, 0.25], [1.0, 0.25, 0.0]];

/// One attack per this many beats.
fn still_attack() -> Beats {
    beats(10, 16)
}

/// A pitch of `still` with the scale steps just below and above it.
struct StillPitch {
    pitch: JustPitch,
    down: JustPitch,
    up: JustPitch,
}

/// Soft repeated notes circling the dwelling pitch and its two scale
/// neighbours, each now and then bent to the next scale step. Returns the
/// bare stream; `still-event` places it.
///
/// Params: `duration` (beats to fill, default the context's).
pub struct Still;

impl Still {
    fn duration(cx: &Context, params: &Params) -> Beats {
        params.beats("duration").unwrap_or_else(|| cx.duration())
    }

    /// Dwelling pitch, lower neighbour and upper neighbour, in the octave
    /// above the tonic.
    fn material(cx: &Context) -> Result<[StillPitch; 3], EntryError> {
        let event = cx.modal1()?;
        let scale = &event.scale;
        let n = scale.len_per_period();
        let degree = scale
            .degree_of(&event.pitch)
            .ok_or_else(|| EntryError::invalid(format!("{} is not a scale pitch", event.pitch)))?;
        let at = |d: usize| scale.scale_position_to_pitch(d % n, 0);
        let part = |d: usize| StillPitch {
            pitch: at(d),
            down: at(d + n - 1),
            up: at(d + 1),
        };
        Ok([part(degree), part(degree + n - 1), part(degree + 1)])
    }
}

impl Entry for Still {
    fn name(&self) -> &str {
        "still"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal1
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn relevance(&self) -> i32 {
        80
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        let Ok(event) = cx.modal1() else {
            return Ok(Support::unsupported("needs a ModalEvent1"));
        };
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        let instrument = cx.instrument()?;
        require!(instrument.pitched, "needs a pitched instrument");
        require!(event.scale.len_per_period() >= 3, "scale has no two neighbours");
        require!(event.scale.degree_of(&event.pitch).is_some(), "{} is not a scale pitch", event.pitch);
        let material = Self::material(cx)?;
        require!(
            material
                .iter()
                .all(|m| [m.pitch, m.down, m.up].iter().all(|p| instrument.contains(p))),
            "{} cannot reach the neighbours of {}",
            instrument.name,
            event.pitch
        );
        let duration = Self::duration(cx, call.params());
        require!(duration >= still_attack(), "{duration} leaves no room for an attack");
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let material = Self::material(cx)?;
        let tag = solo_tag(cx)?;
        let count = (Self::duration(cx, call.params()) / still_attack()).to_integer().max(0) as usize;
        let mut notes = Vec::with_capacity(count);
        let mut state = 0;
        while notes.len() < count {
            state = call.rng().choose_weighted(&STILL_CHAIN[state]).unwrap_or(0);
            let options: &[usize] = if state == 0 { &[1, 2, 3] } else { &[1, 2] };
            let repetitions = call.rng().choose(options).copied().unwrap_or(1).min(count - notes.len());
            let part = &material[state];
            for _ in 0..repetitions {
                let steady = call.activity(7);
                let pitch = if steady {
                    part.pitch
                } else if call.activity(5) {
                    part.up
                } else {
                    part.down
                };
                let width = match (steady, state) {
                    (false, _) => "0.5",
                    (true, 0) => "1.5",
                    (true, _) => "1",
                };
                let note = Note::new(still_attack(), vec![pitch])
                    .with_volume(Dynamic::Pp)
                    .with_indicator("note-head-width", Indicator::Text(width.to_string()));
                notes.push(Event::Note(note));
            }
        }
        Ok(Output::Event(Event::stream(&tag, notes)))
    }
}

/// Places the `still` stream: late in the first event of a page, right away
/// in later ones, and always ending just before the event does.
pub struct StillEvent;

impl StillEvent {
    fn ranges(cx: &Context) -> (TimeRange, TimeRange) {
        let d = cx.duration();
        let (from, to) = if cx.index() == 0 {
            (beats(2, 5), beats(1, 2))
        } else {
            (beats(1, 100), beats(1, 10))
        };
        (
            TimeRange {
                start: d * from,
                end: d * to,
            },
            TimeRange {
                start: d * beats(19, 20),
                end: d * beats(199, 200),
            },
        )
    }

    /// `still` fills the longest slot the ranges allow.
    fn still_params(cx: &Context, params: &Params) -> Params {
        let (start_range, end_range) = Self::ranges(cx);
        params.clone().with("duration", end_range.end - start_range.start)
    }
}

impl Entry for StillEvent {
    fn name(&self) -> &str {
        "still-event"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal1
    }

    fn relevance(&self) -> i32 {
        30
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("still", "still")]
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        call.dependency("still")?
            .is_supported(cx, &Self::still_params(cx, call.params()))
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let params = Self::still_params(cx, call.params());
        let event = call.dependency("still")?.call(cx, &params)?.into_event()?;
        let (start_range, end_range) = Self::ranges(cx);
        Ok(Output::Placement(EventPlacement::new(event, start_range, end_range)?))
    }
}

/// Quarter-beat weights of a `pattern` note on the dwelling pitch and on
/// any other pitch.
const PATTERN_MAIN_WEIGHTS: [i64; 3] = [8, 7, 10];
const PATTERN_SIDE_WEIGHTS: [i64; 3] = [4, 5, 3];

/// A short figure stepping through the registers of a close chord built on
/// the dwelling pitch, for plucked or struck polyphonic instruments.
///
/// Params: `pitch` (overrides the modal event's).
pub struct Pattern;

impl Pattern {
    fn pitch(cx: &Context, params: &Params) -> Result<JustPitch, EntryError> {
        Ok(params.pitch("pitch").unwrap_or(cx.modal1()?.pitch))
    }

    /// `pitch` with its nearest registers, as many as `instrument` can
    /// sound at once.
    fn doubled(instrument: &Instrument, pitch: JustPitch) -> Vec<JustPitch> {
        let mut variants = instrument.pitch_variants(&pitch);
        variants.sort_by_key(|v| (v.octave() - pitch.octave()).abs());
        variants.truncate(instrument.max_simultaneous.max(1));
        variants.sort();
        variants
    }
}

impl Entry for Pattern {
    fn name(&self) -> &str {
        "pattern"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal1
    }

    fn relevance(&self) -> i32 {
        40
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind()).with_index(1)
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.modal1().is_ok(), "needs a ModalEvent1");
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        let instrument = cx.instrument()?;
        require!(instrument.pitched, "needs a pitched instrument");
        require!(instrument.strings.is_empty(), "{} is bowed", instrument.name);
        require!(instrument.max_simultaneous >= 2, "{} plays one pitch at a time", instrument.name);
        let pitch = Self::pitch(cx, call.params())?;
        require!(
            !instrument.pitch_variants(&pitch).is_empty(),
            "{} cannot play {pitch}",
            instrument.name
        );
        require!(cx.index() != 0, "the first event is left alone");
        require!(cx.index() % 4 != 3, "index {} closes a phrase", cx.index());
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let instrument = cx.instrument()?;
        let scale = &cx.modal1()?.scale;
        let pitch = Self::pitch(cx, call.params())?;
        let main_variants = instrument.pitch_variants(&pitch);
        let &root = main_variants
            .first()
            .ok_or_else(|| EntryError::invalid(format!("{} cannot play {pitch}", instrument.name)))?;

        let duration = cx.duration();
        let real = capped(beats(20, 16), duration);
        let (start_range, end_range) = get_ranges(real, duration, balance(0.7))?;
        let count = (real / beats(5, 16)).to_integer().max(1) as usize;

        let playable: Vec<JustPitch> = scale.pitches().iter().copied().filter(|p| instrument.contains(p)).collect();
        let chord = most_harmonic_chord(&[root], &playable, 3..=3, Some(JustPitch::new(15, 8)))
            .unwrap_or_else(|| vec![root]);
        let mut available: Vec<JustPitch> = chord.iter().flat_map(|p| instrument.pitch_variants(p)).collect();
        available.sort();
        available.dedup();
        let max_index = available.len().saturating_sub(1);
        let mut index = available.iter().position(|p| *p == root).unwrap_or(0);

        let mut chords = Vec::with_capacity(count);
        let mut weights = Vec::with_capacity(count);
        for _ in 0..count {
            index = if index == 0 {
                1
            } else if index == max_index {
                max_index - 1
            } else if call.activity(5) {
                index + 1
            } else {
                index - 1
            };
            index = index.min(max_index);
            let Some(&current) = available.get(index) else {
                break;
            };
            let is_main = main_variants.contains(&current);
            let pitches = if index == 0 && max_index > 0 {
                vec![current, available[max_index]]
            } else if index == max_index && max_index > 0 {
                vec![available[0], current]
            } else if (is_main && call.activity(6)) || call.activity(3) {
                Self::doubled(instrument, current)
            } else {
                vec![current]
            };
            let options = if is_main { &PATTERN_MAIN_WEIGHTS } else { &PATTERN_SIDE_WEIGHTS };
            weights.push(call.rng().choose(options).copied().unwrap_or(4));
            chords.push(pitches);
        }

        let notes = chords
            .into_iter()
            .zip(proportional(real, &weights))
            .map(|(pitches, d)| Event::Note(Note::new(d, pitches).with_volume(Dynamic::Pp)))
            .collect();
        let placement = EventPlacement::new(Event::stream(&instrument.name, notes), start_range, end_range)?;
        Ok(Output::Placement(placement))
    }
}
