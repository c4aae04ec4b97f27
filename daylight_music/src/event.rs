// Nested, tagged event timeline.
//
// A timeline is a tree of `Event`s. Leaves are `Note`s (a rest is a note
// without pitches). `Sequential` containers play their children one after
// another; `Simultaneous` containers play them in parallel. The top of a
// finished page is a `Simultaneous` whose children are one tagged
// `Sequential` stream per instrument.
//
// Durations are exact (`Beats`), so splitting and concatenating never
// accumulates drift. Renderers only read finished timelines; all mutation
// happens while a single composition pass owns the tree.

use crate::error::TimelineError;
use crate::pitch::JustPitch;
use crate::time::Beats;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// Dynamic marking of a note.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Dynamic {
    Ppp,
    Pp,
    P,
    Mp,
    #[default]
    Mf,
    F,
    Ff,
    Fff,
}

impl Dynamic {
    pub const ALL: [Dynamic; 8] = [
        Dynamic::Ppp,
        Dynamic::Pp,
        Dynamic::P,
        Dynamic::Mp,
        Dynamic::Mf,
        Dynamic::F,
        Dynamic::Ff,
        Dynamic::Fff,
    ];

    /// MIDI velocity for this dynamic.
    pub fn velocity(self) -> u8 {
        match self {
            Dynamic::Ppp => 16,
            Dynamic::Pp => 32,
            Dynamic::P => 48,
            Dynamic::Mp => 64,
            Dynamic::Mf => 80,
            Dynamic::F => 96,
            Dynamic::Ff => 112,
            Dynamic::Fff => 127,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dynamic::Ppp => "ppp",
            Dynamic::Pp => "pp",
            Dynamic::P => "p",
            Dynamic::Mp => "mp",
            Dynamic::Mf => "mf",
            Dynamic::F => "f",
            Dynamic::Ff => "ff",
            Dynamic::Fff => "fff",
        }
    }

    /// Step `steps` marks louder (negative: softer), saturating at the ends.
    pub fn shifted(self, steps: i32) -> Dynamic {
        let index = Dynamic::ALL.iter().position(|d| *d == self).unwrap_or(4) as i32;
        let clamped = (index + steps).clamp(0, Dynamic::ALL.len() as i32 - 1);
        Dynamic::ALL[clamped as usize]
    }
}

impl FromStr for Dynamic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dynamic::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| format!("unknown dynamic '{s}'"))
    }
}

/// A named playing or notation indicator attached to a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Indicator {
    Flag(bool),
    Text(String),
    Count(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub duration: Beats,
    pub pitches: Vec<JustPitch>,
    pub volume: Dynamic,
    pub indicators: BTreeMap<String, Indicator>,
}

impl Note {
    pub fn new(duration: Beats, pitches: Vec<JustPitch>) -> Self {
        Note {
            duration,
            pitches,
            volume: Dynamic::default(),
            indicators: BTreeMap::new(),
        }
    }

    pub fn rest(duration: Beats) -> Self {
        Note::new(duration, Vec::new())
    }

    pub fn is_rest(&self) -> bool {
        self.pitches.is_empty()
    }

    pub fn with_volume(mut self, volume: Dynamic) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_indicator(mut self, name: &str, indicator: Indicator) -> Self {
        self.indicators.insert(name.to_string(), indicator);
        self
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.indicators.get(name), Some(Indicator::Flag(true)))
    }
}

/// A node of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Note(Note),
    Sequential {
        tag: Option<String>,
        children: Vec<Event>,
    },
    Simultaneous {
        tag: Option<String>,
        children: Vec<Event>,
    },
}

/// A note with its absolute start, as yielded by [`Event::leaves`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leaf<'a> {
    pub start: Beats,
    pub note: &'a Note,
    /// Innermost enclosing tag, if any.
    pub tag: Option<&'a str>,
}

impl Event {
    pub fn note(duration: Beats, pitches: Vec<JustPitch>) -> Event {
        Event::Note(Note::new(duration, pitches))
    }

    pub fn rest(duration: Beats) -> Event {
        Event::Note(Note::rest(duration))
    }

    pub fn sequential(tag: Option<&str>, children: Vec<Event>) -> Event {
        Event::Sequential {
            tag: tag.map(str::to_string),
            children,
        }
    }

    pub fn simultaneous(tag: Option<&str>, children: Vec<Event>) -> Event {
        Event::Simultaneous {
            tag: tag.map(str::to_string),
            children,
        }
    }

    /// A tagged sequential stream, the unit of one instrument's voice.
    pub fn stream(tag: &str, children: Vec<Event>) -> Event {
        Event::sequential(Some(tag), children)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::Note(_) => "note",
            Event::Sequential { .. } => "sequential",
            Event::Simultaneous { .. } => "simultaneous",
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Event::Note(_) => None,
            Event::Sequential { tag, .. } | Event::Simultaneous { tag, .. } => tag.as_deref(),
        }
    }

    pub fn children(&self) -> &[Event] {
        match self {
            Event::Note(_) => &[],
            Event::Sequential { children, .. } | Event::Simultaneous { children, .. } => children,
        }
    }

    pub fn child_by_tag(&self, tag: &str) -> Option<&Event> {
        self.children().iter().find(|c| c.tag() == Some(tag))
    }

    pub fn is_rest(&self) -> bool {
        match self {
            Event::Note(n) => n.is_rest(),
            _ => self.children().iter().all(Event::is_rest),
        }
    }

    pub fn duration(&self) -> Beats {
        match self {
            Event::Note(n) => n.duration,
            Event::Sequential { children, .. } => {
                children.iter().fold(Beats::zero(), |acc, c| acc + c.duration())
            }
            Event::Simultaneous { children, .. } => children
                .iter()
                .map(Event::duration)
                .max()
                .unwrap_or_else(Beats::zero),
        }
    }

    /// Every tag appearing anywhere in the tree, in pre-order, deduplicated.
    pub fn tags(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_tags(&mut out);
        out
    }

    fn collect_tags(&self, out: &mut Vec<String>) {
        if let Some(tag) = self.tag() {
            if !out.iter().any(|t| t == tag) {
                out.push(tag.to_string());
            }
        }
        for child in self.children() {
            child.collect_tags(out);
        }
    }

    /// Split into the parts before and after `at` (relative time).
    pub fn split_at(&self, at: Beats) -> Result<(Event, Event), TimelineError> {
        let duration = self.duration();
        if at < Beats::zero() || at > duration {
            return Err(TimelineError::SplitOutOfRange { at, duration });
        }
        match self {
            Event::Note(n) => {
                let mut left = n.clone();
                let mut right = n.clone();
                left.duration = at;
                right.duration = n.duration - at;
                Ok((Event::Note(left), Event::Note(right)))
            }
            Event::Sequential { tag, children } => {
                let mut left = Vec::new();
                let mut right = Vec::new();
                let mut cursor = Beats::zero();
                for child in children {
                    let d = child.duration();
                    if cursor + d <= at {
                        left.push(child.clone());
                    } else if cursor >= at {
                        right.push(child.clone());
                    } else {
                        let (l, r) = child.split_at(at - cursor)?;
                        left.push(l);
                        right.push(r);
                    }
                    cursor += d;
                }
                Ok((
                    Event::Sequential {
                        tag: tag.clone(),
                        children: left,
                    },
                    Event::Sequential {
                        tag: tag.clone(),
                        children: right,
                    },
                ))
            }
            Event::Simultaneous { tag, children } => {
                let mut left = Vec::with_capacity(children.len());
                let mut right = Vec::with_capacity(children.len());
                for child in children {
                    if child.duration() <= at {
                        left.push(child.clone());
                        right.push(Event::Sequential {
                            tag: child.tag().map(str::to_string),
                            children: Vec::new(),
                        });
                    } else {
                        let (l, r) = child.split_at(at)?;
                        left.push(l);
                        right.push(r);
                    }
                }
                Ok((
                    Event::Simultaneous {
                        tag: tag.clone(),
                        children: left,
                    },
                    Event::Simultaneous {
                        tag: tag.clone(),
                        children: right,
                    },
                ))
            }
        }
    }

    /// Append `other` after the end of this sequential event. A sequential
    /// `other` contributes its children; anything else is appended whole.
    pub fn concatenate(&mut self, other: Event) -> Result<(), TimelineError> {
        match self {
            Event::Sequential { children, .. } => {
                match other {
                    Event::Sequential {
                        children: mut more,
                        ..
                    } => children.append(&mut more),
                    other => children.push(other),
                }
                Ok(())
            }
            not_sequential => Err(TimelineError::NotSequential(not_sequential.kind_name())),
        }
    }

    /// The part of the event between `start` and `end`.
    pub fn cut_out(&self, start: Beats, end: Beats) -> Result<Event, TimelineError> {
        if end < start {
            return Err(TimelineError::NegativeDuration(end - start));
        }
        let (head, _) = self.split_at(end)?;
        let (_, middle) = head.split_at(start)?;
        Ok(middle)
    }

    /// Overwrite `[at, at + note.duration)` of a sequential event with `note`.
    /// The event grows if the note reaches past its end.
    pub fn squash_in(&mut self, at: Beats, note: Note) -> Result<(), TimelineError> {
        if !matches!(self, Event::Sequential { .. }) {
            return Err(TimelineError::NotSequential(self.kind_name()));
        }
        let duration = self.duration();
        let end = at + note.duration;
        let (mut left, _) = self.split_at(at)?;
        let right = if end < duration {
            Some(self.split_at(end)?.1)
        } else {
            None
        };
        left.concatenate(Event::Note(note))?;
        if let Some(right) = right {
            left.concatenate(right)?;
        }
        *self = left;
        Ok(())
    }

    /// Extend with trailing rest until the event lasts at least `duration`.
    pub fn pad_to(&mut self, duration: Beats) -> Result<(), TimelineError> {
        let missing = duration - self.duration();
        match self {
            Event::Note(_) if missing > Beats::zero() => {
                Err(TimelineError::NotSequential("note"))
            }
            Event::Note(_) => Ok(()),
            Event::Sequential { children, .. } => {
                if missing > Beats::zero() {
                    children.push(Event::rest(missing));
                }
                Ok(())
            }
            Event::Simultaneous { children, .. } => {
                for child in children.iter_mut() {
                    if let Event::Note(n) = child {
                        if n.duration < duration {
                            *child = Event::Sequential {
                                tag: None,
                                children: vec![Event::Note(n.clone())],
                            };
                        }
                    }
                    child.pad_to(duration)?;
                }
                Ok(())
            }
        }
    }

    /// Check tag uniqueness per simultaneous container and pad parallel
    /// voices to their common length, recursively.
    pub fn finalize(&mut self) -> Result<(), TimelineError> {
        match self {
            Event::Note(n) => {
                if n.duration < Beats::zero() {
                    return Err(TimelineError::NegativeDuration(n.duration));
                }
                Ok(())
            }
            Event::Sequential { children, .. } => {
                for child in children.iter_mut() {
                    child.finalize()?;
                }
                Ok(())
            }
            Event::Simultaneous { .. } => {
                let mut seen = HashSet::new();
                for tag in self.children().iter().filter_map(Event::tag) {
                    if !seen.insert(tag) {
                        return Err(TimelineError::DuplicateTag {
                            tag: tag.to_string(),
                        });
                    }
                }
                if let Event::Simultaneous { children, .. } = self {
                    for child in children.iter_mut() {
                        child.finalize()?;
                    }
                }
                let duration = self.duration();
                self.pad_to(duration)
            }
        }
    }

    /// Merge adjacent rests and drop zero-length notes, recursively.
    pub fn tidy(&mut self) {
        match self {
            Event::Note(_) => {}
            Event::Simultaneous { children, .. } => children.iter_mut().for_each(Event::tidy),
            Event::Sequential { children, .. } => {
                let mut out: Vec<Event> = Vec::with_capacity(children.len());
                for mut child in children.drain(..) {
                    child.tidy();
                    if let Event::Note(n) = &child {
                        if n.duration.is_zero() {
                            continue;
                        }
                        if n.is_rest() && n.indicators.is_empty() {
                            if let Some(Event::Note(prev)) = out.last_mut() {
                                if prev.is_rest() && prev.indicators.is_empty() {
                                    prev.duration += n.duration;
                                    continue;
                                }
                            }
                        }
                    }
                    out.push(child);
                }
                *children = out;
            }
        }
    }

    /// All notes with absolute start times, in timeline order per stream.
    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        let mut out = Vec::new();
        self.collect_leaves(Beats::zero(), None, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, start: Beats, tag: Option<&'a str>, out: &mut Vec<Leaf<'a>>) {
        let tag = self.tag().or(tag);
        match self {
            Event::Note(note) => out.push(Leaf { start, note, tag }),
            Event::Sequential { children, .. } => {
                let mut cursor = start;
                for child in children {
                    child.collect_leaves(cursor, tag, out);
                    cursor += child.duration();
                }
            }
            Event::Simultaneous { children, .. } => {
                for child in children {
                    child.collect_leaves(start, tag, out);
                }
            }
        }
    }

    /// Copy keeping only tagged children of simultaneous containers whose
    /// tag is in `tags`.
    pub fn filter_tags(&self, tags: &[&str]) -> Event {
        match self {
            Event::Note(_) => self.clone(),
            Event::Sequential { tag, children } => Event::Sequential {
                tag: tag.clone(),
                children: children.iter().map(|c| c.filter_tags(tags)).collect(),
            },
            Event::Simultaneous { tag, children } => Event::Simultaneous {
                tag: tag.clone(),
                children: children
                    .iter()
                    .filter(|c| c.tag().is_some_and(|t| tags.contains(&t)))
                    .map(|c| c.filter_tags(tags))
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{beats, whole};

    fn p(n: i64, d: i64) -> JustPitch {
        JustPitch::new(n, d)
    }

    fn melody() -> Event {
        Event::stream(
            "v",
            vec![
                Event::note(beats(1, 4), vec![p(1, 1)]),
                Event::note(beats(1, 2), vec![p(9, 8)]),
                Event::rest(beats(1, 4)),
            ],
        )
    }

    #[test]
    fn durations() {
        assert_eq!(melody().duration(), whole(1));
        let sim = Event::simultaneous(None, vec![melody(), Event::stream("w", vec![Event::rest(whole(3))])]);
        assert_eq!(sim.duration(), whole(3));
        assert_eq!(Event::sequential(None, vec![]).duration(), Beats::zero());
    }

    #[test]
    fn split_inside_a_note() {
        let (l, r) = melody().split_at(beats(1, 2)).unwrap();
        assert_eq!(l.duration(), beats(1, 2));
        assert_eq!(r.duration(), beats(1, 2));
        assert_eq!(l.children().len(), 2);
        assert_eq!(r.children().len(), 2);
        assert_eq!(l.tag(), Some("v"));
        match &r.children()[0] {
            Event::Note(n) => assert_eq!(n.pitches, vec![p(9, 8)]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn split_on_boundary_and_out_of_range() {
        let (l, r) = melody().split_at(beats(1, 4)).unwrap();
        assert_eq!(l.children().len(), 1);
        assert_eq!(r.children().len(), 2);
        assert!(matches!(
            melody().split_at(whole(2)),
            Err(TimelineError::SplitOutOfRange { .. })
        ));
    }

    #[test]
    fn cut_out_and_concatenate() {
        let middle = melody().cut_out(beats(1, 8), beats(5, 8)).unwrap();
        assert_eq!(middle.duration(), beats(1, 2));
        let mut m = melody();
        m.concatenate(melody()).unwrap();
        assert_eq!(m.duration(), whole(2));
        assert_eq!(m.children().len(), 6);
        assert!(Event::rest(whole(1)).concatenate(melody()).is_err());
    }

    #[test]
    fn squash_in_replaces_span() {
        let mut m = melody();
        m.squash_in(beats(1, 8), Note::new(beats(1, 4), vec![p(3, 2)])).unwrap();
        assert_eq!(m.duration(), whole(1));
        let starts: Vec<_> = m.leaves().iter().map(|l| l.start).collect();
        assert_eq!(starts, vec![Beats::zero(), beats(1, 8), beats(3, 8), beats(3, 4)]);

        let mut short = melody();
        short.squash_in(beats(3, 4), Note::new(beats(1, 2), vec![p(2, 1)])).unwrap();
        assert_eq!(short.duration(), beats(5, 4));
    }

    #[test]
    fn finalize_pads_and_checks_tags() {
        let mut sim = Event::simultaneous(
            None,
            vec![melody(), Event::stream("w", vec![Event::rest(whole(2))])],
        );
        sim.finalize().unwrap();
        assert!(sim.children().iter().all(|c| c.duration() == whole(2)));

        let mut dup = Event::simultaneous(None, vec![melody(), melody()]);
        assert!(matches!(dup.finalize(), Err(TimelineError::DuplicateTag { .. })));
    }

    #[test]
    fn tidy_merges_rests() {
        let mut s = Event::stream(
            "v",
            vec![
                Event::rest(beats(1, 4)),
                Event::rest(Beats::zero()),
                Event::rest(beats(1, 4)),
                Event::note(beats(1, 4), vec![p(1, 1)]),
                Event::rest(beats(1, 4)),
            ],
        );
        s.tidy();
        assert_eq!(s.children().len(), 3);
        assert_eq!(s.duration(), whole(1));
    }

    #[test]
    fn leaves_carry_tags_and_starts() {
        let sim = Event::simultaneous(None, vec![melody(), Event::stream("w", vec![Event::rest(whole(1))])]);
        let leaves = sim.leaves();
        assert_eq!(leaves.len(), 4);
        assert_eq!(leaves[2].start, beats(3, 4));
        assert_eq!(leaves[3].tag, Some("w"));
        assert_eq!(sim.tags(), vec!["v".to_string(), "w".to_string()]);
    }

    #[test]
    fn filter_tags_keeps_selected_voices() {
        let sim = Event::simultaneous(None, vec![melody(), Event::stream("w", vec![Event::rest(whole(1))])]);
        let only = sim.filter_tags(&["w"]);
        assert_eq!(only.children().len(), 1);
        assert_eq!(only.children()[0].tag(), Some("w"));
    }

    #[test]
    fn dynamics_shift_and_saturate() {
        assert_eq!(Dynamic::Mf.shifted(1), Dynamic::F);
        assert_eq!(Dynamic::Ppp.shifted(-3), Dynamic::Ppp);
        assert!(Dynamic::Pp.velocity() < Dynamic::Ff.velocity());
        assert_eq!("mp".parse::<Dynamic>(), Ok(Dynamic::Mp));
        assert!("loud".parse::<Dynamic>().is_err());
    }
}
