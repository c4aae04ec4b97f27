// The piece's rule library.
//
// Every entry the generator knows is registered here, in a fixed order that
// the default tie-break depends on:
//
// - modal.rs: ModalContext0 entries (scale walks, dyads, chord helpers,
//   the harp scale events, the held chord, silences) and ModalContext1
//   entries (natural harmonics, `still`, `pattern`, silence).
// - clocks.rs: EmptyContext clock cells (`note`, `clock`, `tremolo`, ...),
//   `clock-modal0` for unpitched ModalContext1 nodes and `clock-line` for
//   ClockContext nodes.
//
// Entries return placements relative to their context's start; the tree
// walker anchors them. Helper entries (`scale`, `dyad`, `scale-harp`,
// `alternating-scale-chords`, `still`, the clock cells) declare pitches,
// chords or events as their output; tree nodes skip them, so they only run
// through dependency slots.

mod clocks;
mod modal;

pub use clocks::{
    ClockLine, ClockModal0, ClockNote, ClockSequence, Grace, Hit, Tremolo, TremoloLong,
    TremoloMiddle,
};
pub use modal::{
    AlternatingScaleChords, Dyad, ExplicitSilence, Modal1Silence, ModalSilence,
    NaturalHarmonic, Pattern, ScaleEventHarp, ScaleEventOneChord, ScaleHarp, ScaleWalk, Still,
    StillEvent, TwoDyads, find_dyad, most_harmonic_chord,
};

use crate::context::Context;
use crate::entry::Output;
use crate::error::{EntryError, RegistrationError};
use crate::event::Event;
use crate::pitch::{Instrument, JustPitch};
use crate::placement::EventPlacement;
use crate::registry::{Registry, RegistryBuilder};
use crate::time::Beats;
use num_traits::Zero;

/// Frequency of 1/1 in Hz.
pub const DEFAULT_CONCERT_PITCH: f64 = 442.0;

pub fn register_all(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    builder
        .register(ScaleWalk)?
        .register(Dyad)?
        .register(ScaleHarp)?
        .register(AlternatingScaleChords)?
        .register(ScaleEventHarp)?
        .register(ScaleEventOneChord)?
        .register(TwoDyads)?
        .register(ModalSilence)?
        .register(ExplicitSilence)?
        .register(Modal1Silence)?
        .register(NaturalHarmonic)?
        .register(Still)?
        .register(StillEvent)?
        .register(Pattern)?
        .register(ClockNote)?
        .register(ClockSequence)?
        .register(Tremolo)?
        .register(TremoloLong)?
        .register(TremoloMiddle)?
        .register(Grace)?
        .register(Hit)?
        .register(ClockModal0)?
        .register(ClockLine)?;
    Ok(())
}

/// A validated registry holding the whole library.
pub fn default_registry() -> Result<Registry, RegistrationError> {
    let mut builder = RegistryBuilder::new();
    register_all(&mut builder)?;
    builder.build()
}

/// Tag of a solo context's stream.
fn solo_tag(cx: &Context) -> Result<String, EntryError> {
    Ok(cx.instrument()?.name.clone())
}

/// `real`, shortened to `duration` if it does not fit.
fn capped(real: Beats, duration: Beats) -> Beats {
    if real > duration { duration } else { real }
}

/// Split `total` into parts proportional to `weights`; the parts sum to
/// `total` exactly.
fn proportional(total: Beats, weights: &[i64]) -> Vec<Beats> {
    let sum: i64 = weights.iter().sum();
    if sum <= 0 {
        return vec![Beats::zero(); weights.len()];
    }
    weights.iter().map(|&w| total * Beats::new(w, sum)).collect()
}

/// Silence for every instrument of `cx`, filling its whole span.
fn rests(cx: &Context) -> Output {
    let duration = cx.duration();
    let streams = cx
        .orchestration()
        .iter()
        .map(|i| Event::stream(&i.name, vec![Event::rest(duration)]))
        .collect();
    Output::Placement(EventPlacement::fixed(
        Event::simultaneous(None, streams),
        Beats::zero(),
        duration,
    ))
}

/// The string instrument used by the smoke tests of string entries.
fn sample_strings() -> Instrument {
    Instrument::pitched("cello", "vc.", JustPitch::new(1, 4), JustPitch::new(4, 1))
        .with_polyphony(2)
        .with_strings(vec![
            JustPitch::new(1, 4),
            JustPitch::new(3, 8),
            JustPitch::new(9, 16),
            JustPitch::new(27, 32),
        ])
}
