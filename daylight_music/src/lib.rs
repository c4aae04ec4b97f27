// Daylight: context-directed algorithmic composition engine.
//
// Generates the pages of a piece for pitched and percussive instruments by
// walking a structural tree of modal events, asking a registry of
// generative rules ("entries") to fill every node, and composing the timed
// fragments they return into one nested timeline per instrument. The same
// engine drives the clock grammar (rhythmic cells built from smaller
// cells) and the per-page resonator filters.
//
// Architecture:
// - time.rs: Exact rational time (`Beats`), ranges, `get_ranges`
// - pitch.rs: Just-intonation pitches, harmonicity, scales, instruments
// - event.rs: Nested tagged event timeline (notes, sequential, simultaneous)
// - context.rs: Context kinds, stable context identifiers, modal events
// - params.rs: Typed parameter bag passed to entries
// - entry.rs: The `Entry` trait, `Support`, outputs, per-call dependency handles
// - registry.rs: Registration, dependency validation, smoke tests
// - resolve.rs: Selection by predicate and relevance, tie-breaking, invocation
// - placement.rs: Event placements and the composer merging them per tag
// - tree.rs: Structure tree arena and the pre-order walker
// - form.rs: Gatra lines, Markov walk, modal event tree for a page
// - clock.rs: Weighted clock grammar realized through clock entries
// - activity.rs: Deterministic density (Euclidean) patterns
// - resonator.rs: Resonance filters, text format, per-page speaker layouts
// - diary.rs: Persisted record of resolved outputs keyed by context id
// - entries/: The piece's rule library (modal and clock entries)
// - midi.rs: Timeline to Standard MIDI File with just-intonation bends
// - render.rs: Parallel page rendering
// - config.rs: Generation settings (JSON + CLI)
// - error.rs: Error taxonomy
// - main.rs (bin `generate`): CLI over `render.rs`
//
// The generator is deterministic given a seed. No global state: the registry
// is built once and passed by reference.

pub mod activity;
pub mod clock;
pub mod config;
pub mod context;
pub mod diary;
pub mod entries;
pub mod entry;
pub mod error;
pub mod event;
pub mod form;
pub mod midi;
pub mod params;
pub mod pitch;
pub mod placement;
pub mod registry;
pub mod render;
pub mod resolve;
pub mod resonator;
pub mod time;
pub mod tree;

pub use error::{DaylightError, Result};
