// Clock entries.
//
// The clock is an unpitched layer ticking through the form. Its material is
// built from short cells (a sounding note followed by a rest) measured in
// sixteenths:
//
//   note            one clock stroke; `instruments` picks the strokes
//   clock           joins `events` into one sequence
//   tremolo         a long tremolo stroke and a short rest
//   tremolo-long    tremolo with longer bounds
//   tremolo-middle  tremolo with middle bounds
//   grace           a stroke with grace notes and a long rest
//   hit             a single short stroke and a rest
//
// Cells answer EmptyContext and are called through dependency slots or the
// clock grammar. `clock-modal0` plays one cell per event on unpitched
// dwelling instruments; `clock-line` realizes a grammar terminal on
// ClockContext nodes.

use super::solo_tag;
use crate::clock::ClockGrammar;
use crate::context::{Context, ContextKind};
use crate::entry::{Call, Entry, Output, OutputKind, Support};
use crate::error::EntryError;
use crate::event::{Dynamic, Event, Indicator, Note};
use crate::form::CLOCK_RANGE;
use crate::params::Params;
use crate::pitch::{Instrument, JustPitch, Orchestration};
use crate::placement::EventPlacement;
use crate::require;
use crate::time::{Beats, TimeRange, balance, beats, get_ranges, whole};
use log::debug;
use num_traits::Zero;
use std::str::FromStr;

const DEFAULT_VOLUMES: &str = "p pp mp";

fn sixteenths(n: i64) -> Beats {
    beats(n, 16)
}

fn sixteenth_range(low: i64, high: i64) -> TimeRange {
    TimeRange {
        start: sixteenths(low),
        end: sixteenths(high),
    }
}

/// The pitch standing for clock stroke `instrument`.
fn clock_pitch(instrument: i64) -> Option<JustPitch> {
    JustPitch::try_new(instrument + 1, 2)
}

/// Draw a length in sixteenths from the half-open `[min, max)` given by
/// `params` (or the defaults).
fn draw_sixteenths(
    call: &mut Call<'_>,
    keys: (&str, &str),
    defaults: (i64, i64),
) -> Result<Beats, EntryError> {
    let min = call.params().int(keys.0).unwrap_or(defaults.0);
    let max = call.params().int(keys.1).unwrap_or(defaults.1);
    if min < 0 || min >= max {
        return Err(EntryError::invalid(format!(
            "{} = {min} must be below {} = {max}",
            keys.0, keys.1
        )));
    }
    Ok(sixteenths(call.rng().range_i64(min, max)))
}

/// One clock stroke.
///
/// Params: `min-duration`/`max-duration` (sixteenths, half-open, default
/// 1..2), `instruments` (stroke numbers; none gives a rest), `volumes`
/// (space-separated dynamics, one is picked).
pub struct ClockNote;

impl Entry for ClockNote {
    fn name(&self) -> &str {
        "note"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Empty
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        Ok(Support::Supported)
    }

    fn main(&self, _cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let instruments = call.params().ints("instruments").unwrap_or(&[]).to_vec();
        let volumes = call
            .params()
            .text("volumes")
            .unwrap_or(DEFAULT_VOLUMES)
            .split_whitespace()
            .map(Dynamic::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(EntryError::invalid)?;
        let duration = draw_sixteenths(call, ("min-duration", "max-duration"), (1, 2))?;
        let Some(&first) = instruments.first() else {
            return Ok(Output::Event(Event::rest(duration)));
        };
        let volume = call.rng().choose(&volumes).copied().unwrap_or_default();
        let pitches = instruments.iter().filter_map(|&i| clock_pitch(i)).collect();
        let note = Note::new(duration, pitches)
            .with_volume(volume)
            .with_indicator("clock-instrument", Indicator::Count(first));
        Ok(Output::Event(Event::Note(note)))
    }
}

/// Joins the `events` param into one sequence.
pub struct ClockSequence;

impl Entry for ClockSequence {
    fn name(&self) -> &str {
        "clock"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Empty
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        Ok(Support::Supported)
    }

    fn main(&self, _cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let events = call.params().events("events").unwrap_or(&[]).to_vec();
        Ok(Output::Event(Event::sequential(None, events)))
    }
}

/// A stroke from the `note` slot followed by a rest, joined by `clock`.
fn stroke_and_rest(
    cx: &Context,
    call: &mut Call<'_>,
    note_params: Params,
    decorate: impl FnOnce(Note) -> Note,
    rest_defaults: (i64, i64),
) -> Result<Output, EntryError> {
    let note = match call.dependency("note")?.call(cx, &note_params)?.into_event()? {
        Event::Note(note) => Event::Note(decorate(note)),
        other => other,
    };
    let rest = draw_sixteenths(call, ("min-rest-duration", "max-rest-duration"), rest_defaults)?;
    let params = Params::new().with("events", vec![note, Event::rest(rest)]);
    call.dependency("clock")?.call(cx, &params)
}

/// Params: `min-duration`/`max-duration` of the stroke (default 12..20),
/// `min-rest-duration`/`max-rest-duration` (default 4..8), plus the `note`
/// params.
pub struct Tremolo;

impl Entry for Tremolo {
    fn name(&self) -> &str {
        "tremolo"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Empty
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("note", "note"), ("clock", "clock")]
    }

    fn duration_range(&self) -> Option<TimeRange> {
        Some(sixteenth_range(16, 28))
    }

    fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let note_params = call
            .params()
            .clone()
            .with("min-duration", call.params().int("min-duration").unwrap_or(12))
            .with("max-duration", call.params().int("max-duration").unwrap_or(20));
        stroke_and_rest(
            cx,
            call,
            note_params,
            |note| {
                note.with_indicator("tremolo", Indicator::Count(32))
                    .with_indicator("duration-line", Indicator::Flag(true))
            },
            (4, 8),
        )
    }
}

/// A tremolo with fixed bounds layered over the caller's params.
fn bounded_tremolo(
    cx: &Context,
    call: &mut Call<'_>,
    stroke: (i64, i64),
    rest: (i64, i64),
) -> Result<Output, EntryError> {
    let fixed = Params::new()
        .with("min-duration", stroke.0)
        .with("max-duration", stroke.1)
        .with("min-rest-duration", rest.0)
        .with("max-rest-duration", rest.1);
    let params = call.params().merged(&fixed);
    call.dependency("tremolo")?.call(cx, &params)
}

pub struct TremoloLong;

impl Entry for TremoloLong {
    fn name(&self) -> &str {
        "tremolo-long"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Empty
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("tremolo", "tremolo")]
    }

    fn duration_range(&self) -> Option<TimeRange> {
        Some(sixteenth_range(26, 44))
    }

    fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        bounded_tremolo(cx, call, (12, 20), (14, 24))
    }
}

pub struct TremoloMiddle;

impl Entry for TremoloMiddle {
    fn name(&self) -> &str {
        "tremolo-middle"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Empty
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("tremolo", "tremolo")]
    }

    fn duration_range(&self) -> Option<TimeRange> {
        Some(sixteenth_range(18, 32))
    }

    fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        bounded_tremolo(cx, call, (6, 12), (12, 20))
    }
}

/// Strokes 2 or 3, ornamented with two grace notes.
pub struct Grace;

impl Entry for Grace {
    fn name(&self) -> &str {
        "grace"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Empty
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("note", "note"), ("clock", "clock")]
    }

    fn duration_range(&self) -> Option<TimeRange> {
        Some(sixteenth_range(20, 26))
    }

    fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let instrument = call.rng().choose(&[2i64, 3]).copied().unwrap_or(2);
        let note_params = call
            .params()
            .clone()
            .with("instruments", vec![instrument])
            .with("min-duration", 2i64)
            .with("max-duration", 4i64);
        stroke_and_rest(
            cx,
            call,
            note_params,
            |note| note.with_indicator("grace", Indicator::Text("c3 c2".to_string())),
            (18, 22),
        )
    }
}

/// A short stroke of the `instruments` (default stroke 0).
pub struct Hit;

impl Entry for Hit {
    fn name(&self) -> &str {
        "hit"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Empty
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Event
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("note", "note"), ("clock", "clock")]
    }

    fn duration_range(&self) -> Option<TimeRange> {
        Some(sixteenth_range(13, 20))
    }

    fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let instruments = call.params().ints("instruments").unwrap_or(&[0]).to_vec();
        let note_params = call
            .params()
            .clone()
            .with("instruments", instruments)
            .with("min-duration", 1i64)
            .with("max-duration", 3i64);
        stroke_and_rest(cx, call, note_params, |note| note, (12, 17))
    }
}

const CELL_SLOTS: [(&str, &str); 4] = [
    ("tremolo-middle", "tremolo-middle"),
    ("tremolo-long", "tremolo-long"),
    ("grace", "grace"),
    ("hit", "hit"),
];

fn sample_percussion() -> Instrument {
    Instrument::unpitched("woodblock", "wb.")
}

/// One clock cell per modal event for unpitched dwellers; the cell and its
/// position inside the event follow the event index.
pub struct ClockModal0;

impl ClockModal0 {
    fn cell(slot: &str, cx: &Context, call: &Call<'_>, instruments: Vec<i64>) -> Result<Event, EntryError> {
        let params = Params::new().with("instruments", instruments);
        call.dependency(slot)?.call(cx, &params)?.into_event()
    }
}

impl Entry for ClockModal0 {
    fn name(&self) -> &str {
        "clock-modal0"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal1
    }

    fn relevance(&self) -> i32 {
        120
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        CELL_SLOTS.to_vec()
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind())
            .with_orchestration(Orchestration(vec![sample_percussion()]))
            .with_energy(60)
            .with_span(Beats::zero(), whole(5))
    }

    fn is_supported(&self, cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.modal1().is_ok(), "needs a ModalEvent1");
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        require!(!cx.instrument()?.pitched, "needs an unpitched instrument");
        require!(cx.energy() > 40, "energy {} is too low", cx.energy());
        require!(cx.duration() > sixteenths(4), "event of {} is too short", cx.duration());
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let index = cx.index();
        let (mut cell, position) = match index % 4 {
            0 => {
                let stroke = call.rng().choose(&[3i64, 4]).copied().unwrap_or(3);
                (Self::cell("hit", cx, call, vec![stroke])?, Beats::zero())
            }
            1 => {
                let stroke = if call.rng().next_f64() > 0.4 { 2 } else { 3 };
                (Self::cell("tremolo-middle", cx, call, vec![stroke])?, balance(0.2))
            }
            2 => (Self::cell("grace", cx, call, Vec::new())?, balance(0.25)),
            _ if index % 8 == 7 => {
                let stroke = if call.rng().next_f64() > 0.3 { 2 } else { 4 };
                let closing = call.rng().choose(&[2i64, 3]).copied().unwrap_or(2);
                let mut cell = Self::cell("tremolo-long", cx, call, vec![stroke])?;
                cell.concatenate(Self::cell("hit", cx, call, vec![closing])?)?;
                (cell, balance(0.85))
            }
            _ => {
                let stroke = call.rng().choose(&[2i64, 3, 4]).copied().unwrap_or(2);
                (Self::cell("hit", cx, call, vec![stroke])?, beats(1, 2))
            }
        };

        let limit = cx.duration() - sixteenths(1);
        if cell.duration() > limit {
            debug!("{}: cutting clock cell of {} to {limit}", cx.id(), cell.duration());
            cell = cell.split_at(limit)?.0;
        }
        let (start_range, end_range) = get_ranges(cell.duration(), cx.duration(), position)?;
        let event = Event::stream(&solo_tag(cx)?, vec![cell]);
        Ok(Output::Placement(EventPlacement::new(event, start_range, end_range)?))
    }
}

/// Realizes a clock grammar terminal on a ClockContext node.
///
/// Params: `terminal` (default `modal-event`), `range` (duration window,
/// default 30..60 sixteenths; cut to the node's span).
pub struct ClockLine;

impl ClockLine {
    fn window(cx: &Context, params: &Params) -> TimeRange {
        let window = params
            .range("range")
            .unwrap_or_else(|| sixteenth_range(CLOCK_RANGE.0, CLOCK_RANGE.1));
        TimeRange {
            start: window.start,
            end: window.end.min(cx.duration()),
        }
    }
}

impl Entry for ClockLine {
    fn name(&self) -> &str {
        "clock-line"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Clock
    }

    fn relevance(&self) -> i32 {
        1
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        CELL_SLOTS.to_vec()
    }

    fn sample_context(&self) -> Context {
        Context::sample(self.kind()).with_span(Beats::zero(), whole(5))
    }

    fn sample_params(&self) -> Params {
        Params::new().with("terminal", "modal-event")
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        let window = Self::window(cx, call.params());
        require!(
            window.start <= window.end,
            "a line of at least {} does not fit into {}",
            window.start,
            cx.duration()
        );
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let window = Self::window(cx, call.params());
        let terminal = call.params().text("terminal").unwrap_or("modal-event").to_string();
        let mut rng = call.rng().fork("grammar");
        let call: &Call<'_> = call;
        let line = ClockGrammar::daylight().realize_with(
            &terminal,
            window,
            &mut rng,
            |nt| call.dependency(&nt.entry).ok().and_then(|d| d.duration_range()),
            |nt| Ok(call.dependency(&nt.entry)?.call(cx, &nt.params)?.into_event()?),
        )?;
        let (start_range, end_range) = get_ranges(line.duration(), cx.duration(), Beats::zero())?;
        let event = Event::stream(&solo_tag(cx)?, vec![line]);
        Ok(Output::Placement(EventPlacement::new(event, start_range, end_range)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::default_registry;
    use crate::registry::Registry;
    use crate::resolve::{Resolver, ResolverConfig};

    fn registry() -> Registry {
        default_registry().unwrap()
    }

    fn run(resolver: &Resolver<'_>, name: &str, params: Params, key: &str) -> Output {
        let entry = resolver.registry().get(name).unwrap();
        let cx = Context::sample(ContextKind::Empty);
        resolver
            .run_dependency(entry, &cx, params, key.to_string(), 1)
            .unwrap()
    }

    #[test]
    fn note_draws_from_its_range() {
        let registry = registry();
        let resolver = Resolver::new(&registry, ResolverConfig::seeded(5));
        for i in 0..20 {
            let params = Params::new()
                .with("min-duration", 3i64)
                .with("max-duration", 6i64)
                .with("instruments", vec![2i64, 4])
                .with("volumes", "ppp");
            let Output::Event(Event::Note(note)) = run(&resolver, "note", params, &format!("n{i}")) else {
                panic!("note should produce a note");
            };
            assert!(note.duration >= sixteenths(3) && note.duration < sixteenths(6));
            assert_eq!(note.pitches, vec![JustPitch::new(3, 2), JustPitch::new(5, 2)]);
            assert_eq!(note.volume, Dynamic::Ppp);
            assert_eq!(note.indicators.get("clock-instrument"), Some(&Indicator::Count(2)));
        }
        let silent = run(&resolver, "note", Params::new(), "silent").into_event().unwrap();
        assert!(silent.is_rest());
    }

    #[test]
    fn note_rejects_empty_ranges() {
        let registry = registry();
        let resolver = Resolver::new(&registry, ResolverConfig::default());
        let entry = registry.get("note").unwrap();
        let params = Params::new().with("min-duration", 4i64).with("max-duration", 4i64);
        let cx = Context::sample(ContextKind::Empty);
        assert!(resolver.run_dependency(entry, &cx, params, "bad".into(), 1).is_err());
    }

    #[test]
    fn cells_stay_within_their_declared_ranges() {
        let registry = registry();
        for seed in 0..10 {
            let resolver = Resolver::new(&registry, ResolverConfig::seeded(seed));
            for name in ["tremolo", "tremolo-long", "tremolo-middle", "grace", "hit"] {
                let range = registry.get(name).unwrap().duration_range().unwrap();
                let cell = run(&resolver, name, Params::new(), name).into_event().unwrap();
                assert!(range.contains(cell.duration()), "{name}: {}", cell.duration());
                assert_eq!(cell.children().len(), 2);
                assert!(cell.children()[1].is_rest());
            }
        }
    }

    #[test]
    fn tremolo_strokes_carry_their_indicators() {
        let registry = registry();
        let resolver = Resolver::new(&registry, ResolverConfig::seeded(1));
        let params = Params::new().with("instruments", vec![1i64]).with("volumes", "pp p");
        let cell = run(&resolver, "tremolo-long", params, "t").into_event().unwrap();
        let Event::Note(stroke) = &cell.children()[0] else {
            panic!("first child should be the stroke");
        };
        assert_eq!(stroke.indicators.get("tremolo"), Some(&Indicator::Count(32)));
        assert!(stroke.flag("duration-line"));
        assert!(matches!(stroke.volume, Dynamic::Pp | Dynamic::P));
    }

    #[test]
    fn clock_modal0_follows_the_event_index() {
        let registry = registry();
        let resolver = Resolver::new(&registry, ResolverConfig::seeded(2));
        let base = ClockModal0.sample_context();
        for index in 0..8 {
            let cx = base.with_index(index);
            let res = resolver.resolve(&cx, &Params::new()).unwrap();
            assert_eq!(res.entry, "clock-modal0");
            let placement = res.output.into_placement().unwrap();
            assert_eq!(placement.tags(), vec!["woodblock".to_string()]);
            assert!(placement.duration() < cx.duration());
            assert!(placement.end_range.end <= cx.duration());
            if index == 0 {
                assert_eq!(placement.start_range, TimeRange::point(Beats::zero()));
            }
        }
    }

    #[test]
    fn quiet_percussion_rests() {
        let registry = registry();
        let resolver = Resolver::new(&registry, ResolverConfig::default());
        let cx = ClockModal0.sample_context().with_energy(20);
        assert_eq!(resolver.resolve(&cx, &Params::new()).unwrap().entry, "modal-1-silence");
    }

    #[test]
    fn clock_lines_fit_their_window() {
        let registry = registry();
        for seed in 0..5 {
            let resolver = Resolver::new(&registry, ResolverConfig::seeded(seed));
            let cx = ClockLine.sample_context();
            let params = Params::new()
                .with("terminal", "clock-end")
                .with("range", sixteenth_range(10, 30));
            let res = resolver.resolve(&cx, &params).unwrap();
            assert_eq!(res.entry, "clock-line");
            let placement = res.output.into_placement().unwrap();
            assert!(sixteenth_range(10, 30).contains(placement.duration()));

            let line = resolver.resolve(&cx, &ClockLine.sample_params()).unwrap();
            let duration = line.output.into_placement().unwrap().duration();
            assert!(sixteenth_range(30, 60).contains(duration), "{duration}");
        }
    }

    #[test]
    fn unknown_terminals_fail_the_line() {
        let registry = registry();
        let resolver = Resolver::new(&registry, ResolverConfig::default());
        let cx = ClockLine.sample_context();
        let params = Params::new().with("terminal", "coda");
        assert!(resolver.resolve(&cx, &params).is_err());
    }
}
