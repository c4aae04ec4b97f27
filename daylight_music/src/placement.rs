// Event placements and the composer.
//
// An entry does not return material at a fixed time. It returns an
// `EventPlacement`: the material plus a start range and an end range, the
// windows within which the material may begin and within which its slot
// may end. The composer turns a list of placements into one finished
// timeline:
//
// 1. Split every placement into its tagged streams and group by tag, tags
//    in order of first appearance.
// 2. Per tag, order placements by earliest permissible start (ties keep
//    input order) and resolve each to a concrete slot: start and end at the
//    midpoints of their ranges. Material keeps its own duration; the rest
//    of the slot is filled with silence. If the material does not fit
//    between the midpoints the end moves later, and if that passes the end
//    range the start moves earlier.
// 3. Fill gaps with rests and resolve overlaps per `OverlapPolicy`.
// 4. Merge adjacent rests, then pad every stream to the common length,
//    which is at least the latest permissible end of any placement.
//
// Material longer than `end_range.end - start_range.start` can never fit
// and is rejected before anything else happens.

use crate::error::PlacementError;
use crate::event::Event;
use crate::time::{Beats, TimeRange};
use log::{debug, warn};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// A sub-timeline anchored within flexible start and end windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPlacement {
    pub event: Event,
    pub start_range: TimeRange,
    pub end_range: TimeRange,
    /// Where the placement came from (a context id), for error messages.
    #[serde(default)]
    pub origin: String,
}

impl EventPlacement {
    pub fn new(
        event: Event,
        start_range: TimeRange,
        end_range: TimeRange,
    ) -> Result<Self, PlacementError> {
        let placement = EventPlacement {
            event,
            start_range,
            end_range,
            origin: String::new(),
        };
        placement.check_ranges()?;
        Ok(placement)
    }

    /// A placement with exact start and end.
    pub fn fixed(event: Event, start: Beats, end: Beats) -> Self {
        let end = if end < start { start } else { end };
        EventPlacement {
            event,
            start_range: TimeRange::point(start),
            end_range: TimeRange::point(end),
            origin: String::new(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Shift both ranges by `by`; used to anchor a placement at its
    /// context's start.
    pub fn move_by(&mut self, by: Beats) -> &mut Self {
        self.start_range = self.start_range.shifted(by);
        self.end_range = self.end_range.shifted(by);
        self
    }

    pub fn moved_by(mut self, by: Beats) -> Self {
        self.move_by(by);
        self
    }

    pub fn duration(&self) -> Beats {
        self.event.duration()
    }

    /// The longest slot the ranges permit.
    pub fn budget(&self) -> Beats {
        self.end_range.end - self.start_range.start
    }

    pub fn tags(&self) -> Vec<String> {
        self.event.tags()
    }

    /// The placement's tagged streams. The payload must be a tagged stream
    /// or a simultaneous container of tagged streams.
    pub fn split_by_tag(&self) -> Result<Vec<(String, Event)>, PlacementError> {
        let untagged = || PlacementError::UntaggedEvent {
            origin: self.origin.clone(),
        };
        match &self.event {
            Event::Simultaneous { children, .. } => children
                .iter()
                .map(|child| {
                    child
                        .tag()
                        .map(|tag| (tag.to_string(), child.clone()))
                        .ok_or_else(untagged)
                })
                .collect(),
            event @ Event::Sequential { tag: Some(tag), .. } => Ok(vec![(tag.clone(), event.clone())]),
            _ => Err(untagged()),
        }
    }

    /// Both ranges ordered, and the start range not opening after the end
    /// range closes. `Composer::compose` checks this again for placements
    /// built by hand or read from a diary.
    fn check_ranges(&self) -> Result<(), PlacementError> {
        for range in [self.start_range, self.end_range] {
            TimeRange::new(range.start, range.end)?;
        }
        TimeRange::new(self.start_range.start, self.end_range.end)?;
        Ok(())
    }

    fn check_budget(&self) -> Result<(), PlacementError> {
        let duration = self.duration();
        let budget = self.budget();
        if duration > budget {
            return Err(PlacementError::PlacementOverflow {
                origin: self.origin.clone(),
                tag: self.tags().into_iter().next().unwrap_or_default(),
                duration,
                budget,
            });
        }
        Ok(())
    }
}

/// What the composer does when a placement would start before the previous
/// one on the same tag has ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Keep the earlier material whole; push the later placement to the
    /// earlier one's end, truncating it at its own end range and dropping
    /// it if nothing is left.
    #[default]
    FavorEarlier,
    /// Fail with `PlacementError::Overlap`.
    Reject,
}

struct Slot<'a> {
    placement: &'a EventPlacement,
    material: Event,
    order: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Composer {
    pub overlap: OverlapPolicy,
}

impl Composer {
    pub fn new(overlap: OverlapPolicy) -> Self {
        Composer { overlap }
    }

    /// Merge `placements` into a simultaneous event of one sequential
    /// stream per tag, at least `total` long.
    pub fn compose(
        &self,
        placements: &[EventPlacement],
        total: Option<Beats>,
    ) -> Result<Event, PlacementError> {
        let mut by_tag: Vec<(String, Vec<Slot<'_>>)> = Vec::new();
        let mut length = total.unwrap_or_else(Beats::zero);
        for (order, placement) in placements.iter().enumerate() {
            placement.check_ranges()?;
            placement.check_budget()?;
            if placement.end_range.end > length {
                length = placement.end_range.end;
            }
            for (tag, material) in placement.split_by_tag()? {
                let slot = Slot {
                    placement,
                    material,
                    order,
                };
                match by_tag.iter_mut().find(|(t, _)| *t == tag) {
                    Some((_, slots)) => slots.push(slot),
                    None => by_tag.push((tag, vec![slot])),
                }
            }
        }

        let mut streams = Vec::with_capacity(by_tag.len());
        for (tag, mut slots) in by_tag {
            slots.sort_by(|a, b| {
                a.placement
                    .start_range
                    .start
                    .cmp(&b.placement.start_range.start)
                    .then(a.order.cmp(&b.order))
            });
            let stream = self.compose_stream(&tag, slots)?;
            if stream.duration() > length {
                length = stream.duration();
            }
            streams.push(stream);
        }
        for stream in &mut streams {
            stream.pad_to(length)?;
            stream.tidy();
        }
        debug!("composed {} placements into {} streams of {}", placements.len(), streams.len(), length);
        Ok(Event::simultaneous(None, streams))
    }

    fn compose_stream(&self, tag: &str, slots: Vec<Slot<'_>>) -> Result<Event, PlacementError> {
        let mut children: Vec<Event> = Vec::new();
        let mut cursor = Beats::zero();
        for slot in slots {
            let placement = slot.placement;
            let mut material = slot.material;
            let mut material_length = material.duration();
            let (mut start, mut end) = resolve_slot(placement, material_length);

            if start < cursor {
                match self.overlap {
                    OverlapPolicy::Reject => {
                        return Err(PlacementError::Overlap {
                            tag: tag.to_string(),
                            origin: placement.origin.clone(),
                            previous_end: cursor,
                            next_start: start,
                        });
                    }
                    OverlapPolicy::FavorEarlier => {
                        start = cursor;
                        if end < start + material_length {
                            end = start + material_length;
                        }
                        if end > placement.end_range.end {
                            end = placement.end_range.end;
                        }
                        if end <= start {
                            warn!(
                                "'{tag}': dropping placement from {} (no room after {cursor})",
                                placement.origin
                            );
                            continue;
                        }
                        if material_length > end - start {
                            warn!(
                                "'{tag}': truncating placement from {} to {}",
                                placement.origin,
                                end - start
                            );
                            material = material.split_at(end - start)?.0;
                            material_length = end - start;
                        }
                    }
                }
            }

            if start > cursor {
                children.push(Event::rest(start - cursor));
            }
            match material {
                Event::Sequential {
                    children: mut inner,
                    ..
                } => children.append(&mut inner),
                other => children.push(other),
            }
            if end > start + material_length {
                children.push(Event::rest(end - start - material_length));
            }
            cursor = end;
        }
        let mut stream = Event::stream(tag, children);
        stream.tidy();
        Ok(stream)
    }
}

/// Concrete `(start, end)` for material of `length` inside `placement`.
fn resolve_slot(placement: &EventPlacement, length: Beats) -> (Beats, Beats) {
    let mut start = placement.start_range.midpoint();
    let mut end = placement.end_range.midpoint();
    if end < start + length {
        end = start + length;
        if end > placement.end_range.end {
            end = placement.end_range.end;
            start = end - length;
        }
    }
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::JustPitch;
    use crate::time::{beats, whole};

    fn range(a: i64, b: i64) -> TimeRange {
        TimeRange::new(whole(a), whole(b)).unwrap()
    }

    fn voice(tag: &str, length: i64) -> Event {
        Event::stream(tag, vec![Event::note(whole(length), vec![JustPitch::new(1, 1)])])
    }

    fn no_zero_rests(event: &Event) -> bool {
        event.leaves().iter().all(|l| !l.note.duration.is_zero())
    }

    #[test]
    fn adjacent_placements_fill_their_span() {
        let a = EventPlacement::new(voice("v", 6), range(0, 1), range(9, 10)).unwrap();
        let b = EventPlacement::new(voice("v", 6), range(10, 11), range(19, 20)).unwrap();
        let out = Composer::default().compose(&[a, b], None).unwrap();
        assert_eq!(out.children().len(), 1);
        let stream = &out.children()[0];
        assert_eq!(stream.tag(), Some("v"));
        assert_eq!(stream.duration(), whole(20));
        assert!(no_zero_rests(stream));
        let rests = stream.children().windows(2).filter(|w| w[0].is_rest() && w[1].is_rest()).count();
        assert_eq!(rests, 0);
    }

    #[test]
    fn overflow_is_rejected() {
        let p = EventPlacement::new(voice("v", 12), range(0, 1), range(9, 10)).unwrap();
        let err = Composer::default().compose(&[p.with_origin("ModalContext0@1")], None);
        match err {
            Err(PlacementError::PlacementOverflow { origin, tag, .. }) => {
                assert_eq!(origin, "ModalContext0@1");
                assert_eq!(tag, "v");
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn long_material_extends_then_shifts() {
        // Midpoints give [1, 6.5] but the material needs 8.
        let p = EventPlacement::new(voice("v", 8), range(0, 2), range(3, 10)).unwrap();
        assert_eq!(resolve_slot(&p, whole(8)), (whole(1), whole(9)));
        let out = Composer::default().compose(&[p], None).unwrap();
        assert_eq!(out.duration(), whole(10));

        // Extending to 10 would pass the end range, so the start moves back.
        let q = EventPlacement::new(voice("v", 8), range(0, 4), range(5, 9)).unwrap();
        assert_eq!(resolve_slot(&q, whole(8)), (whole(1), whole(9)));
    }

    #[test]
    fn overlap_favors_earlier_or_rejects() {
        let a = EventPlacement::new(voice("v", 4), range(0, 0), range(4, 6)).unwrap();
        let b = EventPlacement::new(voice("v", 2), range(2, 4), range(8, 8)).unwrap();
        // a occupies [0, 5]; b would start at 3.
        let out = Composer::default().compose(&[a.clone(), b.clone()], None).unwrap();
        let starts: Vec<_> = out.leaves().iter().filter(|l| !l.note.is_rest()).map(|l| l.start).collect();
        assert_eq!(starts, vec![whole(0), whole(5)]);
        assert_eq!(out.duration(), whole(8));

        let strict = Composer::new(OverlapPolicy::Reject).compose(&[a, b], None);
        assert!(matches!(strict, Err(PlacementError::Overlap { .. })));
    }

    #[test]
    fn overlap_truncates_and_drops() {
        let a = EventPlacement::fixed(voice("v", 5), whole(0), whole(5));
        let b = EventPlacement::new(voice("v", 2), range(3, 3), range(4, 6)).unwrap();
        let out = Composer::default().compose(&[a.clone(), b], None).unwrap();
        // b pushed to 5 with only 1 beat before its end range closes.
        assert_eq!(out.duration(), whole(6));
        let last = out.leaves().last().map(|l| l.note.duration);
        assert_eq!(last, Some(whole(1)));

        let c = EventPlacement::new(voice("v", 1), range(1, 1), range(2, 3)).unwrap();
        let out = Composer::default().compose(&[a, c], None).unwrap();
        assert_eq!(out.leaves().len(), 1);
    }

    #[test]
    fn streams_are_padded_to_common_length() {
        let a = EventPlacement::fixed(voice("v", 3), whole(0), whole(3));
        let b = EventPlacement::fixed(
            Event::simultaneous(None, vec![voice("w", 1), voice("x", 2)]),
            whole(1),
            whole(3),
        );
        let out = Composer::default().compose(&[a, b], Some(whole(4))).unwrap();
        let tags: Vec<_> = out.children().iter().filter_map(Event::tag).collect();
        assert_eq!(tags, vec!["v", "w", "x"]);
        assert!(out.children().iter().all(|c| c.duration() == whole(4)));
    }

    #[test]
    fn untagged_payload_is_rejected() {
        let p = EventPlacement::fixed(Event::rest(whole(1)), whole(0), whole(1));
        assert!(matches!(
            Composer::default().compose(&[p], None),
            Err(PlacementError::UntaggedEvent { .. })
        ));
    }

    #[test]
    fn move_by_shifts_both_ranges() {
        let mut p = EventPlacement::new(voice("v", 1), range(0, 1), range(2, 3)).unwrap();
        p.move_by(beats(5, 2));
        assert_eq!(p.start_range.start, beats(5, 2));
        assert_eq!(p.end_range.end, beats(11, 2));
        assert_eq!(p.budget(), whole(3));
    }

    #[test]
    fn new_rejects_inverted_ranges() {
        let bad = TimeRange { start: whole(3), end: whole(1) };
        assert!(EventPlacement::new(voice("v", 1), bad, range(4, 5)).is_err());
        assert!(EventPlacement::new(voice("v", 1), range(4, 5), range(0, 1)).is_err());
    }

    #[test]
    fn composer_rejects_hand_built_inverted_ranges() {
        let inverted = EventPlacement {
            event: voice("v", 1),
            start_range: TimeRange { start: whole(3), end: whole(1) },
            end_range: range(4, 5),
            origin: "ModalContext1@2".to_string(),
        };
        match Composer::default().compose(&[inverted], None) {
            Err(PlacementError::UnorderedRange { start, end }) => {
                assert_eq!((start, end), (whole(3), whole(1)));
            }
            other => panic!("expected unordered range, got {other:?}"),
        }

        // Ordered ranges that open after they close are caught too.
        let mut crossed = EventPlacement::new(voice("v", 1), range(0, 1), range(2, 3)).unwrap();
        crossed.start_range = range(6, 7);
        assert!(matches!(
            Composer::default().compose(&[crossed], None),
            Err(PlacementError::UnorderedRange { .. })
        ));
    }
}
