// Integration tests for entry resolution and composition.
//
// Exercises the public API end to end: a registry assembled from library
// entries plus test-local ones, selection by predicate and relevance,
// dependency calls, the composer, the clock grammar and a whole page
// through the structure tree walker. Nothing here reaches into crate
// internals.

use daylight_music::clock::ClockGrammar;
use daylight_music::context::{Context, ContextKind, Modal0Event, ModalEvent};
use daylight_music::entries::{ScaleWalk, default_registry};
use daylight_music::entry::{Call, Entry, Output, Support};
use daylight_music::error::{EntryError, RegistrationError, ResolutionError, TreeError};
use daylight_music::event::Event;
use daylight_music::form::{FormPlan, plan_page};
use daylight_music::params::Params;
use daylight_music::pitch::{JustPitch, Scale};
use daylight_music::placement::{Composer, EventPlacement, OverlapPolicy};
use daylight_music::registry::{Registry, RegistryBuilder};
use daylight_music::require;
use daylight_music::resolve::{Resolver, ResolverConfig};
use daylight_music::time::{Beats, TimeRange, beats, get_ranges, whole};
use daylight_music::tree::TreeWalker;
use daylight_prng::ContextRng;

fn p(n: i64, d: i64) -> JustPitch {
    JustPitch::new(n, d)
}

/// Plays the scale walk of its context as sixteenth notes, placed anywhere
/// in the context's span.
struct ScaleLine;

impl Entry for ScaleLine {
    fn name(&self) -> &str {
        "scale-line"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn relevance(&self) -> i32 {
        5
    }

    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        vec![("scale", "scale")]
    }

    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError> {
        call.dependency("scale")?.is_supported(cx, call.params())
    }

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
        let pitches = call
            .dependency("scale")?
            .call(cx, call.params())?
            .into_pitches()?;
        let notes: Vec<Event> = pitches
            .into_iter()
            .map(|pitch| Event::note(beats(1, 4), vec![pitch]))
            .collect();
        let tag = cx.instrument()?.name.clone();
        let line = Event::stream(&tag, notes);
        let (start_range, end_range) = get_ranges(line.duration(), cx.duration(), beats(1, 2))?;
        Ok(Output::Placement(EventPlacement::new(line, start_range, end_range)?))
    }
}

/// Fills any solo Modal0 context with silence.
struct Hush;

impl Entry for Hush {
    fn name(&self) -> &str {
        "hush"
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Modal0
    }

    fn relevance(&self) -> i32 {
        1
    }

    fn is_supported(&self, cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
        require!(cx.orchestration().len() == 1, "needs a solo orchestration");
        Ok(Support::Supported)
    }

    fn main(&self, cx: &Context, _call: &mut Call<'_>) -> Result<Output, EntryError> {
        let tag = cx.instrument()?.name.clone();
        let event = Event::stream(&tag, vec![Event::rest(cx.duration())]);
        Ok(Output::Placement(EventPlacement::fixed(
            event,
            whole(0),
            cx.duration(),
        )))
    }
}

fn small_registry() -> Registry {
    let mut builder = RegistryBuilder::new();
    builder
        .register(ScaleWalk)
        .unwrap()
        .register(ScaleLine)
        .unwrap()
        .register(Hush)
        .unwrap();
    builder.build().unwrap()
}

#[test]
fn scale_line_outranks_silence() {
    let registry = small_registry();
    let resolver = Resolver::new(&registry, ResolverConfig::seeded(1));
    let cx = Context::sample(ContextKind::Modal0);

    let candidates: Vec<&str> = resolver
        .candidates(&cx, &Params::new())
        .unwrap()
        .iter()
        .map(|e| e.name())
        .collect();
    assert_eq!(candidates, ["scale", "scale-line", "hush"]);

    let resolution = resolver.resolve(&cx, &Params::new()).unwrap();
    assert_eq!(resolution.entry, "scale-line");
    let placement = resolution.output.into_placement().unwrap();
    let pitches: Vec<JustPitch> = placement
        .event
        .leaves()
        .iter()
        .flat_map(|leaf| leaf.note.pitches.clone())
        .collect();
    assert_eq!(pitches, vec![p(1, 2), p(9, 16), p(2, 3), p(3, 4)]);
    assert_eq!(placement.duration(), whole(1));
    assert!(placement.start_range.start >= whole(0));
    assert!(placement.end_range.end <= cx.duration());
    assert!(placement.budget() >= placement.duration());
}

#[test]
fn unsupported_dependency_falls_through_to_silence() {
    let registry = small_registry();
    let resolver = Resolver::new(&registry, ResolverConfig::default());
    let scale = Scale::pentatonic([p(1, 1), p(9, 8), p(4, 3), p(3, 2), p(27, 16)]);
    let sample = Context::sample(ContextKind::Modal0);
    // Start and end on the same pitch: the walk has nowhere to go.
    let cx = Context::builder(ContextKind::Modal0, "0.1")
        .span(whole(0), whole(4))
        .orchestration(sample.orchestration().clone())
        .modal_event(ModalEvent::Modal0(Modal0Event {
            start_pitch: p(1, 1),
            end_pitch: p(1, 1),
            scale,
            clock_duration: beats(1, 4),
            is_end: false,
        }))
        .build();
    let resolution = resolver.resolve(&cx, &Params::new()).unwrap();
    assert_eq!(resolution.entry, "hush");
}

#[test]
fn missing_entry_names_the_context() {
    let registry = small_registry();
    let resolver = Resolver::new(&registry, ResolverConfig::default());
    let cx = Context::sample(ContextKind::Modal1);
    match resolver.resolve(&cx, &Params::new()) {
        Err(ResolutionError::NoSupportedEntry { context, kind }) => {
            assert_eq!(kind, ContextKind::Modal1);
            assert!(context.contains("sample"), "{context}");
        }
        other => panic!("expected NoSupportedEntry, got {other:?}"),
    }
}

#[test]
fn duplicate_names_are_rejected() {
    let mut builder = RegistryBuilder::new();
    builder.register(ScaleWalk).unwrap();
    match builder.register(ScaleWalk) {
        Err(RegistrationError::DuplicateEntryName { name, kind }) => {
            assert_eq!(name, "scale");
            assert_eq!(kind, ContextKind::Modal0);
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("duplicate registration was accepted"),
    }
}

#[test]
fn resolution_is_reproducible() {
    let registry = default_registry().unwrap();
    let cx = Context::sample(ContextKind::Modal0).with_index(1);
    let first = Resolver::new(&registry, ResolverConfig::seeded(5))
        .resolve(&cx, &Params::new())
        .unwrap();
    let second = Resolver::new(&registry, ResolverConfig::seeded(5))
        .resolve(&cx, &Params::new())
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn placements_compose_into_a_twenty_beat_stream() {
    let material = || Event::stream("v", vec![Event::note(whole(4), vec![p(1, 1)])]);
    let range = |a: i64, b: i64| TimeRange::new(whole(a), whole(b)).unwrap();
    let placements = vec![
        EventPlacement::new(material(), range(0, 1), range(9, 10)).unwrap(),
        EventPlacement::new(material(), range(10, 11), range(19, 20)).unwrap(),
    ];
    let page = Composer::new(OverlapPolicy::FavorEarlier)
        .compose(&placements, None)
        .unwrap();
    assert_eq!(page.duration(), whole(20));
    assert_eq!(page.tags(), ["v"]);
    let onsets: Vec<Beats> = page
        .leaves()
        .iter()
        .filter(|leaf| !leaf.note.is_rest())
        .map(|leaf| leaf.start)
        .collect();
    assert_eq!(onsets, vec![beats(1, 2), beats(21, 2)]);
}

#[test]
fn clock_grammar_realizes_through_the_library() {
    let registry = default_registry().unwrap();
    let resolver = Resolver::new(&registry, ResolverConfig::seeded(2));
    let cx = Context::sample(ContextKind::Empty);
    let grammar = ClockGrammar::daylight();
    let window = TimeRange::new(beats(10, 16), beats(30, 16)).unwrap();
    for seed in 0..5 {
        let mut rng = ContextRng::derive(seed, "clock-end");
        let line = grammar
            .realize("clock-end", window, &resolver, &cx, &mut rng)
            .unwrap();
        assert!(window.contains(line.duration()), "{}", line.duration());
    }
}

#[test]
fn a_page_resolves_every_node() {
    let registry = default_registry().unwrap();
    let resolver = Resolver::new(&registry, ResolverConfig::seeded(4));
    let scale = Scale::pentatonic([p(1, 1), p(9, 8), p(4, 3), p(3, 2), p(27, 16)]);
    let plan = FormPlan::default();
    let (events, tree) = plan_page(0, &scale, 4, &plan, 4).unwrap();
    let total = events.last().map(|e| e.end);
    let composed = TreeWalker::new(&resolver)
        .compose(&tree, &Composer::default(), total)
        .unwrap();
    let tags = composed.event.tags();
    for name in ["harp", "cello", "woodblock", "clock"] {
        assert!(tags.iter().any(|t| t == name), "missing {name} in {tags:?}");
    }
    if let Some(total) = total {
        assert!(composed.event.duration() >= total);
    }
}

#[test]
fn a_page_node_pinned_to_a_helper_fails() {
    let registry = default_registry().unwrap();
    let config = ResolverConfig::seeded(4).pin("ModalContext0@0.0.0", "scale");
    let resolver = Resolver::new(&registry, config);
    let scale = Scale::pentatonic([p(1, 1), p(9, 8), p(4, 3), p(3, 2), p(27, 16)]);
    let (events, tree) = plan_page(0, &scale, 4, &FormPlan::default(), 4).unwrap();
    let total = events.last().map(|e| e.end);
    match TreeWalker::new(&resolver).compose(&tree, &Composer::default(), total) {
        Err(TreeError::Resolution(ResolutionError::PinnedEntryWrongOutput {
            context,
            entry,
            found,
            ..
        })) => {
            assert_eq!(context, "ModalContext0@0.0.0");
            assert_eq!(entry, "scale");
            assert_eq!(found, "pitches");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("a node was filled by a pitch helper"),
    }
}
