// Error taxonomy for the composition engine.
//
// Every fatal category halts the whole generation run: a piece with a hole
// in it is worthless, so there is no degraded mode. Errors raised while
// resolving carry the offending context identifier and, where one exists,
// the entry name, so the author knows which rule file to fix.
//
// Categories:
// - RegistrationError: load-time (duplicate names, unknown or cyclic
//   dependencies, failed smoke tests).
// - ResolutionError: generation-time (no supported entry, failing entry).
// - PlacementError: composition-time (overflowing or overlapping material).
// - EntryError: what entry code itself returns from `is_supported`/`main`.

use crate::context::ContextKind;
use crate::time::Beats;
use thiserror::Error;

/// Result alias over the umbrella [`DaylightError`].
pub type Result<T> = std::result::Result<T, DaylightError>;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("duplicate tag '{tag}' inside one simultaneous container")]
    DuplicateTag { tag: String },
    #[error("cannot split event of duration {duration} at {at}")]
    SplitOutOfRange { at: Beats, duration: Beats },
    #[error("negative duration {0}")]
    NegativeDuration(Beats),
    #[error("operation needs a sequential event, found {0}")]
    NotSequential(&'static str),
}

/// Errors produced by entry code.
///
/// `is_supported` returning an `EntryError` means the rule itself is broken;
/// "not applicable" is expressed with `Support::Unsupported` instead.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("expected {expected} output, found {found}")]
    UnexpectedOutput {
        expected: &'static str,
        found: &'static str,
    },
    #[error("no dependency slot named '{0}'")]
    MissingDependency(String),
    #[error("context has no {0}")]
    MissingContextField(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error("nested call failed: {0}")]
    Nested(Box<ResolutionError>),
    #[error("clock grammar: {0}")]
    Clock(Box<ClockError>),
}

impl EntryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        EntryError::Invalid(message.into())
    }
}

impl From<ResolutionError> for EntryError {
    fn from(err: ResolutionError) -> Self {
        EntryError::Nested(Box::new(err))
    }
}

impl From<ClockError> for EntryError {
    fn from(err: ClockError) -> Self {
        EntryError::Clock(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("an entry named '{name}' is already registered (for {kind})")]
    DuplicateEntryName { name: String, kind: ContextKind },
    #[error("entry '{entry}' depends on unknown entry '{dependency}'")]
    UnknownEntry { entry: String, dependency: String },
    #[error("cyclic entry dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    #[error("entry '{entry}' failed its registration check: {source}")]
    Validation {
        entry: String,
        #[source]
        source: Box<ResolutionError>,
    },
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no registered {kind} entry supports context {context}")]
    NoSupportedEntry { context: String, kind: ContextKind },
    #[error("entry '{entry}' pinned for {context} is not registered")]
    PinnedEntryMissing { context: String, entry: String },
    #[error("entry '{entry}' pinned for {context} does not support it: {reason}")]
    PinnedEntryUnsupported {
        context: String,
        entry: String,
        reason: String,
    },
    #[error("entry '{entry}' pinned for {context} produces {found}, not {expected}")]
    PinnedEntryWrongOutput {
        context: String,
        entry: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("dependency '{entry}' does not support {context}: {reason}")]
    DependencyUnsupported {
        context: String,
        entry: String,
        reason: String,
    },
    #[error("predicate of entry '{entry}' failed on {context}: {source}")]
    Predicate {
        context: String,
        entry: String,
        #[source]
        source: EntryError,
    },
    #[error("entry '{entry}' failed on {context}: {source}")]
    EntryFailed {
        context: String,
        entry: String,
        #[source]
        source: EntryError,
    },
    #[error("entry '{entry}' on {context} exceeded dependency depth {depth}")]
    RecursionLimit {
        context: String,
        entry: String,
        depth: usize,
    },
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("cannot fit {needed} into a slot of {total}")]
    InvalidRanges { needed: Beats, total: Beats },
    #[error("range start {start} is after its end {end}")]
    UnorderedRange { start: Beats, end: Beats },
    #[error("{origin}: material for '{tag}' lasts {duration} but the placement allows only {budget}")]
    PlacementOverflow {
        origin: String,
        tag: String,
        duration: Beats,
        budget: Beats,
    },
    #[error("'{tag}': placement from {origin} starts at {next_start} before the previous one ends at {previous_end}")]
    Overlap {
        tag: String,
        origin: String,
        previous_end: Beats,
        next_start: Beats,
    },
    #[error("{origin}: placement payload contains an untagged event")]
    UntaggedEvent { origin: String },
    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("structure tree node {0} is reachable twice (cycle or shared child)")]
    Cycle(usize),
    #[error("structure tree has no node {0}")]
    UnknownNode(usize),
    #[error("{context}: '{entry}' produced {found}, which cannot fill a structure-tree node")]
    NotPlaceable {
        context: String,
        entry: String,
        found: &'static str,
    },
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
}

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("grammar has no rule or terminal named '{0}'")]
    UnknownTerminal(String),
    #[error("no derivation of '{terminal}' lasts between {min} and {max}")]
    NoDerivation {
        terminal: String,
        min: Beats,
        max: Beats,
    },
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Entry(#[from] EntryError),
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("gatra lines need a pentatonic scale, got {0} degrees")]
    NotPentatonic(usize),
    #[error("form needs at least one modal event duration")]
    NoDurations,
    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[derive(Debug, Error)]
pub enum ResonatorError {
    #[error("resonator line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DiaryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for the binary and the top-level pipeline.
#[derive(Debug, Error)]
pub enum DaylightError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Resonator(#[from] ResonatorError),
    #[error(transparent)]
    Diary(#[from] DiaryError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
