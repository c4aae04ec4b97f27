// Contexts: what an entry is asked to fill.
//
// A context describes one node of the structure tree: its time span, the
// instruments playing there, the modal event it belongs to and a few scalar
// fields (energy, index) that entry predicates inspect. Contexts are
// immutable once built and are identified by `ContextId`, the pair of kind
// and dotted tree position. Two contexts with equal ids are equal no matter
// what else they carry, and the id string is both the diary key and the
// PRNG derivation key, so the same id always replays the same decisions.

use crate::error::EntryError;
use crate::pitch::{Instrument, JustPitch, Orchestration, Scale};
use crate::time::{Beats, beats, whole};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The closed set of context kinds; each is a registry bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    /// Contexts of clock entries used as grammar terminals.
    Empty,
    /// One instrument moving from a start to an end pitch.
    Modal0,
    /// One instrument dwelling on a pitch.
    Modal1,
    /// A whole clock line.
    Clock,
}

impl ContextKind {
    pub const ALL: [ContextKind; 4] = [
        ContextKind::Empty,
        ContextKind::Modal0,
        ContextKind::Modal1,
        ContextKind::Clock,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ContextKind::Empty => "EmptyContext",
            ContextKind::Modal0 => "ModalContext0",
            ContextKind::Modal1 => "ModalContext1",
            ContextKind::Clock => "ClockContext",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContextKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContextKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown context kind '{s}'"))
    }
}

/// Stable identity of a context: kind plus dotted tree position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId {
    pub kind: ContextKind,
    pub position: String,
}

impl ContextId {
    pub fn new(kind: ContextKind, position: impl Into<String>) -> Self {
        ContextId {
            kind,
            position: position.into(),
        }
    }

    /// The id of a node nested `index` levels below this one.
    pub fn child(&self, kind: ContextKind, index: usize) -> Self {
        ContextId::new(kind, format!("{}.{index}", self.position))
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.position)
    }
}

impl FromStr for ContextId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, position) = s
            .split_once('@')
            .ok_or_else(|| format!("context id '{s}' lacks '@'"))?;
        Ok(ContextId::new(kind.parse()?, position))
    }
}

/// Movement from `start_pitch` to `end_pitch` within one scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modal0Event {
    pub start_pitch: JustPitch,
    pub end_pitch: JustPitch,
    pub scale: Scale,
    /// Length of one clock step (the pulse the modal event is laid on).
    pub clock_duration: Beats,
    /// The last movement of a page.
    pub is_end: bool,
}

/// A single sustained pitch within one scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modal1Event {
    pub pitch: JustPitch,
    pub scale: Scale,
    pub clock_duration: Beats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModalEvent {
    Modal0(Modal0Event),
    Modal1(Modal1Event),
}

impl ModalEvent {
    pub fn scale(&self) -> &Scale {
        match self {
            ModalEvent::Modal0(e) => &e.scale,
            ModalEvent::Modal1(e) => &e.scale,
        }
    }

    pub fn clock_duration(&self) -> Beats {
        match self {
            ModalEvent::Modal0(e) => e.clock_duration,
            ModalEvent::Modal1(e) => e.clock_duration,
        }
    }
}

/// The immutable descriptor handed to entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    id: ContextId,
    start: Beats,
    end: Beats,
    orchestration: Orchestration,
    modal_event: Option<ModalEvent>,
    energy: i32,
    index: usize,
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Context {
    pub fn builder(kind: ContextKind, position: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            cx: Context {
                id: ContextId::new(kind, position),
                start: Beats::zero(),
                end: Beats::zero(),
                orchestration: Orchestration::default(),
                modal_event: None,
                energy: 0,
                index: 0,
            },
        }
    }

    /// A minimal but complete context of `kind`, used to smoke-test entries
    /// at registration.
    pub fn sample(kind: ContextKind) -> Context {
        let scale = Scale::pentatonic([
            JustPitch::new(1, 1),
            JustPitch::new(9, 8),
            JustPitch::new(4, 3),
            JustPitch::new(3, 2),
            JustPitch::new(27, 16),
        ]);
        let harp = Instrument::pitched("harp", "hp.", JustPitch::new(1, 8), JustPitch::new(8, 1))
            .with_polyphony(2)
            .with_program(46);
        let builder = Context::builder(kind, "sample");
        match kind {
            ContextKind::Empty | ContextKind::Clock => builder
                .span(Beats::zero(), whole(1))
                .orchestration(Orchestration(vec![Instrument::unpitched("c0", "c0")]))
                .build(),
            ContextKind::Modal0 => builder
                .span(Beats::zero(), whole(5))
                .orchestration(Orchestration(vec![harp]))
                .modal_event(ModalEvent::Modal0(Modal0Event {
                    start_pitch: JustPitch::new(1, 1),
                    end_pitch: JustPitch::new(3, 2),
                    scale,
                    clock_duration: beats(1, 4),
                    is_end: false,
                }))
                .energy(50)
                .build(),
            ContextKind::Modal1 => builder
                .span(Beats::zero(), whole(3))
                .orchestration(Orchestration(vec![harp]))
                .modal_event(ModalEvent::Modal1(Modal1Event {
                    pitch: JustPitch::new(1, 1),
                    scale,
                    clock_duration: beats(1, 4),
                }))
                .energy(50)
                .build(),
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.id.kind
    }

    pub fn start(&self) -> Beats {
        self.start
    }

    pub fn end(&self) -> Beats {
        self.end
    }

    pub fn duration(&self) -> Beats {
        self.end - self.start
    }

    pub fn orchestration(&self) -> &Orchestration {
        &self.orchestration
    }

    pub fn modal_event(&self) -> Option<&ModalEvent> {
        self.modal_event.as_ref()
    }

    pub fn energy(&self) -> i32 {
        self.energy
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The single instrument of a solo context.
    pub fn instrument(&self) -> Result<&Instrument, EntryError> {
        self.orchestration
            .0
            .first()
            .ok_or(EntryError::MissingContextField("instrument"))
    }

    pub fn modal0(&self) -> Result<&Modal0Event, EntryError> {
        match &self.modal_event {
            Some(ModalEvent::Modal0(e)) => Ok(e),
            _ => Err(EntryError::MissingContextField("modal event 0")),
        }
    }

    pub fn modal1(&self) -> Result<&Modal1Event, EntryError> {
        match &self.modal_event {
            Some(ModalEvent::Modal1(e)) => Ok(e),
            _ => Err(EntryError::MissingContextField("modal event 1")),
        }
    }

    /// Same context with another id; used when an entry asks a dependency
    /// of a different kind to fill part of its own span.
    pub fn with_id(&self, id: ContextId) -> Context {
        Context { id, ..self.clone() }
    }

    pub fn with_span(&self, start: Beats, end: Beats) -> Context {
        Context {
            start,
            end,
            ..self.clone()
        }
    }

    pub fn with_index(&self, index: usize) -> Context {
        Context {
            index,
            ..self.clone()
        }
    }

    pub fn with_energy(&self, energy: i32) -> Context {
        Context {
            energy,
            ..self.clone()
        }
    }

    pub fn with_orchestration(&self, orchestration: Orchestration) -> Context {
        Context {
            orchestration,
            ..self.clone()
        }
    }
}

pub struct ContextBuilder {
    cx: Context,
}

impl ContextBuilder {
    /// Time bounds; an inverted span is stored as a zero-length one at `start`.
    pub fn span(mut self, start: Beats, end: Beats) -> Self {
        self.cx.start = start;
        self.cx.end = if end < start { start } else { end };
        self
    }

    pub fn orchestration(mut self, orchestration: Orchestration) -> Self {
        self.cx.orchestration = orchestration;
        self
    }

    pub fn modal_event(mut self, modal_event: ModalEvent) -> Self {
        self.cx.modal_event = Some(modal_event);
        self
    }

    pub fn energy(mut self, energy: i32) -> Self {
        self.cx.energy = energy;
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.cx.index = index;
        self
    }

    pub fn build(self) -> Context {
        self.cx
    }
}
