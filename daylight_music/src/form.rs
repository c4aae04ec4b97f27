// Macro-form of a page: gatra lines, the Markov walk and the modal tree.
//
// A gatra is a line of four scale degrees of a pentatonic scale whose
// second and fourth tones are stressed: they must be the tonic or the
// dominant (the degree most harmonic to the tonic). Consecutive degrees
// must follow the movement table below, where the tonic can go anywhere
// and every other degree only to its neighbours or back to the tonic.
// Gatras chain into longer lines through a Markov chain whose transitions
// repeat the same movement rule across the gatra boundary.
//
// A walk of n+1 scale degrees becomes n modal events: each event moves from
// one degree to the next over a duration taken from a repeating cycle. The
// page's structure tree then holds one group node per modal event with one
// resolved child per instrument role (see `FormPlan`).

use crate::context::{ContextKind, Modal0Event, Modal1Event, ModalEvent};
use crate::error::FormError;
use crate::params::Params;
use crate::pitch::{Instrument, JustPitch, Orchestration, Scale};
use crate::resonator::pitch_function_order;
use crate::time::{Beats, TimeRange, beats, whole};
use crate::tree::{Node, StructureTree};
use daylight_prng::ContextRng;
use log::debug;
use num_traits::Zero;

pub const SCALE_SIZE: usize = 5;

/// Allowed movements between degrees of a pentatonic scale.
pub const MOVEMENTS: [&[usize]; SCALE_SIZE] = [&[1, 2, 3, 4], &[0, 2], &[0, 1, 3], &[0, 2, 4], &[0, 3]];

pub type Gatra = [usize; 4];

pub fn can_move(from: usize, to: usize) -> bool {
    MOVEMENTS.get(from).is_some_and(|targets| targets.contains(&to))
}

/// The degree most harmonic to the tonic.
pub fn dominant_degree(scale: &Scale) -> Option<usize> {
    pitch_function_order(scale).get(1).copied()
}

/// Every valid gatra of `scale`, in lexicographic order of
/// (first, second, third, fourth) with the stressed tones ordered tonic
/// first.
pub fn gatras(scale: &Scale) -> Result<Vec<Gatra>, FormError> {
    if scale.len_per_period() != SCALE_SIZE {
        return Err(FormError::NotPentatonic(scale.len_per_period()));
    }
    let dominant = dominant_degree(scale).ok_or(FormError::NotPentatonic(scale.len_per_period()))?;
    let stressed = [0, dominant];
    let mut found = Vec::new();
    for a in 0..SCALE_SIZE {
        for &b in &stressed {
            for c in 0..SCALE_SIZE {
                for &d in &stressed {
                    let line = [a, b, c, d];
                    if line.windows(2).all(|w| can_move(w[0], w[1])) {
                        found.push(line);
                    }
                }
            }
        }
    }
    Ok(found)
}

/// Markov chain over gatras.
#[derive(Debug, Clone)]
pub struct GatraChain {
    gatras: Vec<Gatra>,
    successors: Vec<Vec<usize>>,
}

impl GatraChain {
    pub fn new(gatras: Vec<Gatra>) -> Self {
        let successors = gatras
            .iter()
            .enumerate()
            .map(|(i, from)| {
                gatras
                    .iter()
                    .enumerate()
                    .filter(|(j, to)| *j != i && can_move(from[3], to[0]))
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        GatraChain { gatras, successors }
    }

    pub fn gatras(&self) -> &[Gatra] {
        &self.gatras
    }

    pub fn successors(&self, index: usize) -> &[usize] {
        self.successors.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    /// `count` scale degrees made of chained gatras; the last gatra is cut
    /// short when `count` is not a multiple of four.
    pub fn walk(&self, count: usize, rng: &mut ContextRng) -> Vec<usize> {
        let mut degrees = Vec::with_capacity(count + 4);
        if self.gatras.is_empty() {
            return degrees;
        }
        let mut current = rng.range_usize(0, self.gatras.len());
        while degrees.len() < count {
            degrees.extend_from_slice(&self.gatras[current]);
            current = match rng.choose(self.successors(current)) {
                Some(&next) => next,
                None => rng.range_usize(0, self.gatras.len()),
            };
        }
        degrees.truncate(count);
        degrees
    }
}

/// One modal event placed on the page timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FormEvent {
    pub start: Beats,
    pub end: Beats,
    pub event: Modal0Event,
}

/// Modal events moving between consecutive degrees of `walk`. Durations
/// cycle through `durations`; the last event is flagged `is_end`.
pub fn modal_events(
    scale: &Scale,
    walk: &[usize],
    durations: &[Beats],
    clock_duration: Beats,
) -> Result<Vec<FormEvent>, FormError> {
    if durations.is_empty() {
        return Err(FormError::NoDurations);
    }
    let count = walk.len().saturating_sub(1);
    let mut cursor = Beats::zero();
    let mut events = Vec::with_capacity(count);
    for (i, pair) in walk.windows(2).enumerate() {
        let duration = durations[i % durations.len()];
        events.push(FormEvent {
            start: cursor,
            end: cursor + duration,
            event: Modal0Event {
                start_pitch: scale.scale_position_to_pitch(pair[0], 0),
                end_pitch: scale.scale_position_to_pitch(pair[1], 0),
                scale: scale.clone(),
                clock_duration,
                is_end: i + 1 == count,
            },
        });
        cursor += duration;
    }
    Ok(events)
}

/// Energy of event `index` of `count`: a triangle from 20 up to 70 in the
/// middle of the page and back.
pub fn energy_arc(index: usize, count: usize) -> i32 {
    if count <= 1 {
        return 50;
    }
    let last = (count - 1) as i64;
    let distance = (2 * index as i64 - last).abs();
    (20 + 50 * (last - distance) / last) as i32
}

/// Which instruments play which role on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPlan {
    pub orchestration: Orchestration,
    /// Instruments moving with the modal events (`ModalContext0`).
    pub movers: Vec<String>,
    /// Instruments dwelling on the target pitch (`ModalContext1`).
    pub dwellers: Vec<String>,
    /// Instrument carrying the clock line (`ClockContext`).
    pub clock: Option<String>,
    pub durations: Vec<Beats>,
    pub clock_duration: Beats,
    /// Modal event indices forced into explicit silence.
    pub silent: Vec<usize>,
}

impl Default for FormPlan {
    fn default() -> Self {
        let harp = Instrument::pitched("harp", "hp.", JustPitch::new(1, 8), JustPitch::new(8, 1))
            .with_polyphony(2)
            .with_program(46);
        let cello = Instrument::pitched("cello", "vc.", JustPitch::new(1, 4), JustPitch::new(4, 1))
            .with_polyphony(2)
            .with_strings(vec![
                JustPitch::new(1, 4),
                JustPitch::new(3, 8),
                JustPitch::new(9, 16),
                JustPitch::new(27, 32),
            ])
            .with_program(42);
        let woodblock = Instrument::unpitched("woodblock", "wb.").with_program(115);
        let clock = Instrument::unpitched("clock", "cl.").with_program(116);
        FormPlan {
            orchestration: Orchestration(vec![harp, cello, woodblock, clock]),
            movers: vec!["harp".to_string()],
            dwellers: vec!["cello".to_string(), "woodblock".to_string()],
            clock: Some("clock".to_string()),
            durations: vec![whole(5), whole(7), whole(6), whole(8)],
            clock_duration: beats(1, 4),
            silent: Vec::new(),
        }
    }
}

/// Sixteenth-note bounds of the clock line of an ordinary and a closing
/// modal event.
pub const CLOCK_RANGE: (i64, i64) = (30, 60);
pub const CLOCK_END_RANGE: (i64, i64) = (10, 30);

/// The structure tree of one page.
pub fn build_tree(page: usize, events: &[FormEvent], plan: &FormPlan) -> Result<StructureTree, FormError> {
    let total = events.last().map(|e| e.end).unwrap_or_else(Beats::zero);
    let mut tree = StructureTree::new().with_root_offset(page);
    let root = tree.add_root(Node::group(Beats::zero(), total));
    for (i, form_event) in events.iter().enumerate() {
        let energy = if plan.silent.contains(&i) { -1 } else { energy_arc(i, events.len()) };
        let group = tree.add_child(
            root,
            Node::group(form_event.start, form_event.end).with_index(i).with_energy(energy),
        )?;
        let resolved = |kind, name: &str| {
            Node::resolved(kind, form_event.start, form_event.end)
                .with_orchestration(plan.orchestration.only(name))
                .with_energy(energy)
                .with_index(i)
        };
        for name in &plan.movers {
            let node = resolved(ContextKind::Modal0, name)
                .with_modal_event(ModalEvent::Modal0(form_event.event.clone()));
            tree.add_child(group, node)?;
        }
        for name in &plan.dwellers {
            let node = resolved(ContextKind::Modal1, name).with_modal_event(ModalEvent::Modal1(Modal1Event {
                pitch: form_event.event.end_pitch,
                scale: form_event.event.scale.clone(),
                clock_duration: form_event.event.clock_duration,
            }));
            tree.add_child(group, node)?;
        }
        if let Some(name) = &plan.clock {
            let (terminal, (low, high)) = if form_event.event.is_end {
                ("clock-end", CLOCK_END_RANGE)
            } else {
                ("modal-event", CLOCK_RANGE)
            };
            let range = TimeRange {
                start: beats(low, 16),
                end: beats(high, 16),
            };
            let node = resolved(ContextKind::Clock, name)
                .with_modal_event(ModalEvent::Modal0(form_event.event.clone()))
                .with_params(Params::new().with("terminal", terminal).with("range", range));
            tree.add_child(group, node)?;
        }
    }
    debug!("page {page}: {} modal events, {} tree nodes", events.len(), tree.len());
    Ok(tree)
}

/// Walk, modal events and tree of one page.
pub fn plan_page(
    page: usize,
    scale: &Scale,
    event_count: usize,
    plan: &FormPlan,
    seed: u64,
) -> Result<(Vec<FormEvent>, StructureTree), FormError> {
    let chain = GatraChain::new(gatras(scale)?);
    let mut rng = ContextRng::derive(seed, &format!("page{page}/form"));
    let walk = chain.walk(event_count + 1, &mut rng);
    let events = modal_events(scale, &walk, &plan.durations, plan.clock_duration)?;
    let tree = build_tree(page, &events, plan)?;
    Ok((events, tree))
}
