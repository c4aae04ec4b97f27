// The entry contract.
//
// An entry is a named generative rule answering one context kind. It has a
// predicate (`is_supported`) and a producer (`main`), a relevance used to
// rank it against other supported entries, and named dependency slots
// through which it can call other entries. A dependency is not data: calling
// it runs the dependency's own predicate and producer on the context the
// caller passes, with its own derived random stream.
//
// Every entry declares the kind of output it produces. Only entries that
// produce placements can fill a structure-tree node; the others (pitch
// lists, chord progressions, bare clock cells) are helpers reached through
// dependency slots. The registration smoke test holds entries to their
// declaration.
//
// Predicates distinguish two outcomes at the type level:
// `Ok(Support::Unsupported(reason))` means "not applicable here" and is
// part of normal selection, while `Err(EntryError)` means the rule itself is
// broken and aborts the run.
//
// See also: `resolve.rs` (which builds `Call`s and runs entries),
// `registry.rs` (which validates the dependency slots).

use crate::activity::ActivityLevel;
use crate::context::{Context, ContextKind};
use crate::error::EntryError;
use crate::event::Event;
use crate::params::Params;
use crate::pitch::JustPitch;
use crate::placement::EventPlacement;
use crate::resolve::Resolver;
use crate::resonator::ResonatorTuple;
use crate::time::TimeRange;
use daylight_prng::ContextRng;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Outcome of a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Support {
    Supported,
    Unsupported(String),
}

impl Support {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Support::Unsupported(reason.into())
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Support::Supported)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Support::Supported => None,
            Support::Unsupported(reason) => Some(reason),
        }
    }
}

/// Guard clause for predicates: return `Unsupported` with a formatted
/// reason unless the condition holds.
///
/// ```ignore
/// require!(cx.orchestration().len() == 1, "needs a solo orchestration");
/// ```
#[macro_export]
macro_rules! require {
    ($cond:expr, $($reason:tt)+) => {
        if !$cond {
            return Ok($crate::entry::Support::Unsupported(format!($($reason)+)));
        }
    };
}

/// The shape of an entry's output, declared up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    /// `Output::Placement` or `Output::PlacementWithResonators`.
    Placement,
    Pitches,
    Chords,
    Event,
}

impl OutputKind {
    pub fn name(self) -> &'static str {
        match self {
            OutputKind::Placement => "placement",
            OutputKind::Pitches => "pitches",
            OutputKind::Chords => "chords",
            OutputKind::Event => "event",
        }
    }
}

/// A generative rule.
pub trait Entry: Send + Sync {
    /// Unique across all context kinds.
    fn name(&self) -> &str;

    fn kind(&self) -> ContextKind;

    fn relevance(&self) -> i32 {
        0
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Placement
    }

    /// Dependency slots as `(abbreviation, entry name)` pairs.
    fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    /// Skip the registration smoke test.
    fn skip_check(&self) -> bool {
        false
    }

    /// Range of durations the entry can produce (clock terminals).
    fn duration_range(&self) -> Option<TimeRange> {
        None
    }

    /// Context used for the registration smoke test.
    fn sample_context(&self) -> Context {
        Context::sample(self.kind())
    }

    fn sample_params(&self) -> Params {
        Params::new()
    }

    /// Pure predicate. Must not draw randomness or mutate anything.
    fn is_supported(&self, cx: &Context, call: &Call<'_>) -> Result<Support, EntryError>;

    fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError>;
}

/// What an entry's `main` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Output {
    Placement(EventPlacement),
    PlacementWithResonators(EventPlacement, ResonatorTuple),
    Pitches(Vec<JustPitch>),
    Chords(Vec<Vec<JustPitch>>),
    Event(Event),
}

impl Output {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Output::Placement(_) => "placement",
            Output::PlacementWithResonators(..) => "placement with resonators",
            Output::Pitches(_) => "pitches",
            Output::Chords(_) => "chords",
            Output::Event(_) => "event",
        }
    }

    pub fn kind(&self) -> OutputKind {
        match self {
            Output::Placement(_) | Output::PlacementWithResonators(..) => OutputKind::Placement,
            Output::Pitches(_) => OutputKind::Pitches,
            Output::Chords(_) => OutputKind::Chords,
            Output::Event(_) => OutputKind::Event,
        }
    }

    fn unexpected(&self, expected: &'static str) -> EntryError {
        EntryError::UnexpectedOutput {
            expected,
            found: self.kind_name(),
        }
    }

    /// The placement, dropping resonators if present.
    pub fn into_placement(self) -> Result<EventPlacement, EntryError> {
        self.into_parts().map(|(placement, _)| placement)
    }

    pub fn into_parts(self) -> Result<(EventPlacement, Option<ResonatorTuple>), EntryError> {
        match self {
            Output::Placement(p) => Ok((p, None)),
            Output::PlacementWithResonators(p, r) => Ok((p, Some(r))),
            other => Err(other.unexpected("placement")),
        }
    }

    pub fn placement(&self) -> Option<&EventPlacement> {
        match self {
            Output::Placement(p) | Output::PlacementWithResonators(p, _) => Some(p),
            _ => None,
        }
    }

    pub fn into_pitches(self) -> Result<Vec<JustPitch>, EntryError> {
        match self {
            Output::Pitches(p) => Ok(p),
            other => Err(other.unexpected("pitches")),
        }
    }

    pub fn into_chords(self) -> Result<Vec<Vec<JustPitch>>, EntryError> {
        match self {
            Output::Chords(c) => Ok(c),
            other => Err(other.unexpected("chords")),
        }
    }

    pub fn into_event(self) -> Result<Event, EntryError> {
        match self {
            Output::Event(e) => Ok(e),
            other => Err(other.unexpected("event")),
        }
    }
}

/// Everything one entry invocation gets besides the context.
pub struct Call<'a> {
    resolver: &'a Resolver<'a>,
    entry: &'a dyn Entry,
    params: Params,
    key: String,
    depth: usize,
    rng: ContextRng,
    activity: ActivityLevel,
    nested_calls: Cell<u32>,
}

impl<'a> Call<'a> {
    pub(crate) fn new(
        resolver: &'a Resolver<'a>,
        entry: &'a dyn Entry,
        params: Params,
        key: String,
        depth: usize,
    ) -> Self {
        let rng = ContextRng::derive(resolver.seed(), &key);
        let activity = ActivityLevel::new((rng.clone().next_u64() % 10) as usize);
        Call {
            resolver,
            entry,
            params,
            key,
            depth,
            rng,
            activity,
            nested_calls: Cell::new(0),
        }
    }

    pub fn entry_name(&self) -> &str {
        self.entry.name()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The invocation's PRNG key, `<context id>/<entry name>` at top level.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn rng(&mut self) -> &mut ContextRng {
        &mut self.rng
    }

    /// Density decision at `level` (0 never, 10 always).
    pub fn activity(&mut self, level: usize) -> bool {
        self.activity.call(level)
    }

    pub fn has_dependency(&self, abbreviation: &str) -> bool {
        self.resolver
            .registry()
            .dependency_of(self.entry.name(), abbreviation)
            .is_some()
    }

    /// The entry bound to the dependency slot `abbreviation`.
    pub fn dependency(&self, abbreviation: &str) -> Result<Dependency<'_>, EntryError> {
        let entry = self
            .resolver
            .registry()
            .dependency_of(self.entry.name(), abbreviation)
            .ok_or_else(|| EntryError::MissingDependency(abbreviation.to_string()))?;
        Ok(Dependency {
            resolver: self.resolver,
            entry,
            parent_key: &self.key,
            depth: self.depth + 1,
            counter: &self.nested_calls,
        })
    }
}

/// A callable handle to a dependency entry.
pub struct Dependency<'a> {
    resolver: &'a Resolver<'a>,
    entry: &'a dyn Entry,
    parent_key: &'a str,
    depth: usize,
    counter: &'a Cell<u32>,
}

impl Dependency<'_> {
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn duration_range(&self) -> Option<TimeRange> {
        self.entry.duration_range()
    }

    pub fn is_supported(&self, cx: &Context, params: &Params) -> Result<Support, EntryError> {
        let call = Call::new(
            self.resolver,
            self.entry,
            params.clone(),
            self.nested_key(),
            self.depth,
        );
        self.entry.is_supported(cx, &call)
    }

    /// Run the dependency's full predicate and producer cycle.
    pub fn call(&self, cx: &Context, params: &Params) -> Result<Output, EntryError> {
        let n = self.counter.get();
        self.counter.set(n + 1);
        let key = format!("{}>{}#{n}", self.parent_key, self.entry.name());
        self.resolver
            .run_dependency(self.entry, cx, params.clone(), key, self.depth)
            .map_err(EntryError::from)
    }

    fn nested_key(&self) -> String {
        format!("{}>{}?", self.parent_key, self.entry.name())
    }
}
