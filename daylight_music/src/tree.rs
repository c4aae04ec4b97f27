// Structure tree and the walker that fills it.
//
// The macro-form of a page is a tree of nodes stored in an arena. Nodes with
// a context kind are resolved; nodes without one only group their
// children. The walker visits nodes in pre-order (the order they were
// added under each parent), builds one context per node, asks the resolver
// for a placement-producing entry and collects the placement. A node left
// without a placement is an error, never a silent rest. Each node moves through
// Unvisited -> ContextBuilt -> EntryResolved -> PlacementCollected exactly
// once; a node reachable twice means the arena is not a tree, which is a
// fatal configuration error.
//
// Positions are dotted child indices from the root (`"2.0.1"`), which makes
// context ids stable across runs of the same form.

use crate::context::{Context, ContextId, ContextKind, ModalEvent};
use crate::diary::{Diary, DiaryRecord};
use crate::entry::Output;
use crate::error::{TimelineError, TreeError};
use crate::event::Event;
use crate::params::Params;
use crate::pitch::Orchestration;
use crate::placement::{Composer, EventPlacement};
use crate::resolve::Resolver;
use crate::resonator::ResonatorTuple;
use crate::time::Beats;
use log::{debug, trace};
use std::collections::BTreeMap;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// `None` for purely structural nodes that are never resolved.
    pub kind: Option<ContextKind>,
    pub start: Beats,
    pub end: Beats,
    pub orchestration: Orchestration,
    pub modal_event: Option<ModalEvent>,
    pub energy: i32,
    pub index: usize,
    pub params: Params,
    children: Vec<NodeId>,
}

impl Node {
    pub fn group(start: Beats, end: Beats) -> Self {
        Node {
            kind: None,
            start,
            end,
            orchestration: Orchestration::default(),
            modal_event: None,
            energy: 0,
            index: 0,
            params: Params::new(),
            children: Vec::new(),
        }
    }

    pub fn resolved(kind: ContextKind, start: Beats, end: Beats) -> Self {
        Node {
            kind: Some(kind),
            ..Node::group(start, end)
        }
    }

    pub fn with_orchestration(mut self, orchestration: Orchestration) -> Self {
        self.orchestration = orchestration;
        self
    }

    pub fn with_modal_event(mut self, modal_event: ModalEvent) -> Self {
        self.modal_event = Some(modal_event);
        self
    }

    pub fn with_energy(mut self, energy: i32) -> Self {
        self.energy = energy;
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone, Default)]
pub struct StructureTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    root_offset: usize,
}

impl StructureTree {
    pub fn new() -> Self {
        StructureTree::default()
    }

    /// Number roots from `offset` instead of 0, so that trees of different
    /// pages produce distinct context ids.
    pub fn with_root_offset(mut self, offset: usize) -> Self {
        self.root_offset = offset;
        self
    }

    pub fn add_root(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, node: Node) -> Result<NodeId, TreeError> {
        if parent >= self.nodes.len() {
            return Err(TreeError::UnknownNode(parent));
        }
        let id = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Attach an existing node under `parent`. Nothing stops this from
    /// creating cycles; traversal reports them.
    pub fn link(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        if child >= self.nodes.len() {
            return Err(TreeError::UnknownNode(child));
        }
        self.nodes
            .get_mut(parent)
            .ok_or(TreeError::UnknownNode(parent))?
            .children
            .push(child);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `(node, dotted position)` in pre-order.
    pub fn pre_order(&self) -> Result<Vec<(NodeId, String)>, TreeError> {
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(NodeId, String)> = self
            .roots
            .iter()
            .enumerate()
            .rev()
            .map(|(i, &id)| (id, (i + self.root_offset).to_string()))
            .collect();
        while let Some((id, position)) = stack.pop() {
            let node = self.nodes.get(id).ok_or(TreeError::UnknownNode(id))?;
            if std::mem::replace(&mut seen[id], true) {
                return Err(TreeError::Cycle(id));
            }
            for (i, &child) in node.children.iter().enumerate().rev() {
                stack.push((child, format!("{position}.{i}")));
            }
            out.push((id, position));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unvisited,
    ContextBuilt,
    EntryResolved,
    PlacementCollected,
}

/// One resolved node.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub id: ContextId,
    pub entry: String,
    pub output: Output,
    pub start: Beats,
}

/// The composed page with its side data.
#[derive(Debug, Clone)]
pub struct Composed {
    pub event: Event,
    /// Resonators attached by entries, by context id.
    pub resonators: BTreeMap<String, ResonatorTuple>,
}

pub struct TreeWalker<'a, 'r> {
    resolver: &'a Resolver<'r>,
    diary: Option<&'a mut dyn Diary>,
    replay: bool,
    states: Vec<NodeState>,
}

impl<'a, 'r> TreeWalker<'a, 'r> {
    pub fn new(resolver: &'a Resolver<'r>) -> Self {
        TreeWalker {
            resolver,
            diary: None,
            replay: false,
            states: Vec::new(),
        }
    }

    /// Record every resolution in `diary`; with `replay`, reuse records
    /// already present instead of resolving again.
    pub fn with_diary(mut self, diary: &'a mut dyn Diary, replay: bool) -> Self {
        self.diary = Some(diary);
        self.replay = replay;
        self
    }

    pub fn states(&self) -> &[NodeState] {
        &self.states
    }

    fn advance(&mut self, id: NodeId, cx: &ContextId, state: NodeState) {
        trace!("{cx}: {:?} -> {state:?}", self.states[id]);
        self.states[id] = state;
    }

    /// Resolve every node with a context kind, in pre-order.
    pub fn walk(&mut self, tree: &StructureTree) -> Result<Vec<Collected>, TreeError> {
        let order = tree.pre_order()?;
        self.states = vec![NodeState::Unvisited; tree.len()];
        let mut collected = Vec::new();
        for (id, position) in order {
            let node = tree.node(id).ok_or(TreeError::UnknownNode(id))?;
            let Some(kind) = node.kind else {
                continue;
            };
            let cx = Context::builder(kind, position)
                .span(node.start, node.end)
                .orchestration(node.orchestration.clone())
                .energy(node.energy)
                .index(node.index);
            let cx = match &node.modal_event {
                Some(event) => cx.modal_event(event.clone()),
                None => cx,
            }
            .build();
            let key = cx.id().key();
            self.advance(id, cx.id(), NodeState::ContextBuilt);

            let cached = match (&self.diary, self.replay) {
                (Some(diary), true) => diary.get(&key).cloned(),
                _ => None,
            };
            let (entry, output) = match cached {
                Some(record) => {
                    debug!("{key}: replaying '{}' from diary", record.entry);
                    (record.entry, record.output)
                }
                None => {
                    let resolution = self.resolver.resolve_placement(&cx, &node.params)?;
                    if let Some(diary) = self.diary.as_deref_mut() {
                        diary.put(DiaryRecord {
                            context: key.clone(),
                            entry: resolution.entry.clone(),
                            output: resolution.output.clone(),
                        });
                    }
                    (resolution.entry, resolution.output)
                }
            };
            self.advance(id, cx.id(), NodeState::EntryResolved);
            if output.placement().is_none() {
                return Err(not_placeable(cx.id(), entry, &output));
            }
            collected.push(Collected {
                id: cx.id().clone(),
                entry,
                output,
                start: cx.start(),
            });
            self.advance(id, cx.id(), NodeState::PlacementCollected);
        }
        Ok(collected)
    }

    /// Walk the tree and compose every placement into one timeline.
    ///
    /// Placements are anchored at their context's start before composing.
    pub fn compose(
        &mut self,
        tree: &StructureTree,
        composer: &Composer,
        total: Option<Beats>,
    ) -> Result<Composed, TreeError> {
        let collected = self.walk(tree)?;
        let mut placements: Vec<EventPlacement> = Vec::new();
        let mut resonators = BTreeMap::new();
        for item in collected {
            let key = item.id.key();
            match item.output {
                Output::Placement(p) => {
                    placements.push(p.moved_by(item.start).with_origin(key));
                }
                Output::PlacementWithResonators(p, r) => {
                    placements.push(p.moved_by(item.start).with_origin(key.clone()));
                    resonators.insert(key, r);
                }
                other => return Err(not_placeable(&item.id, item.entry, &other)),
            }
        }
        let mut event = composer.compose(&placements, total)?;
        event.finalize().map_err(|e: TimelineError| TreeError::Placement(e.into()))?;
        debug!(
            "composed {} placements, {} resonator cues, length {}",
            placements.len(),
            resonators.len(),
            event.duration()
        );
        Ok(Composed { event, resonators })
    }
}

fn not_placeable(id: &ContextId, entry: String, output: &Output) -> TreeError {
    TreeError::NotPlaceable {
        context: id.to_string(),
        entry,
        found: output.kind_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diary::MemoryDiary;
    use crate::entry::{Call, Entry, Support};
    use crate::error::{EntryError, ResolutionError};
    use crate::pitch::Instrument;
    use crate::registry::{Registry, RegistryBuilder};
    use crate::resolve::ResolverConfig;
    use crate::time::whole;
    use num_traits::Zero;

    struct Fill;

    impl Entry for Fill {
        fn name(&self) -> &str {
            "fill"
        }

        fn kind(&self) -> ContextKind {
            ContextKind::Modal1
        }

        fn is_supported(&self, cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
            crate::require!(cx.instrument().is_ok(), "no instrument");
            Ok(Support::Supported)
        }

        fn main(&self, cx: &Context, call: &mut Call<'_>) -> Result<Output, EntryError> {
            let tag = cx.instrument()?.name.clone();
            let length = whole(1 + (call.rng().next_u64() % 2) as i64).min(cx.duration());
            let event = Event::stream(&tag, vec![Event::note(length, vec![crate::pitch::JustPitch::new(1, 1)])]);
            Ok(Output::Placement(EventPlacement::fixed(event, Beats::zero(), cx.duration())))
        }
    }

    fn registry() -> Registry {
        let mut builder = RegistryBuilder::new();
        builder.register(Fill).unwrap();
        builder.build().unwrap()
    }

    fn solo(name: &str) -> Orchestration {
        Orchestration(vec![Instrument::unpitched(name, name)])
    }

    fn tree() -> StructureTree {
        let mut tree = StructureTree::new();
        let root = tree.add_root(Node::group(whole(0), whole(8)));
        for (i, start) in [0, 4].into_iter().enumerate() {
            let group = tree
                .add_child(root, Node::group(whole(start), whole(start + 4)).with_index(i))
                .unwrap();
            for name in ["a", "b"] {
                tree.add_child(
                    group,
                    Node::resolved(ContextKind::Modal1, whole(start), whole(start + 4))
                        .with_orchestration(solo(name))
                        .with_index(i),
                )
                .unwrap();
            }
        }
        tree
    }

    #[test]
    fn pre_order_positions() {
        let order = tree().pre_order().unwrap();
        let positions: Vec<_> = order.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(positions, vec!["0", "0.0", "0.0.0", "0.0.1", "0.1", "0.1.0", "0.1.1"]);
    }

    #[test]
    fn root_offset_renumbers_positions() {
        let mut t = StructureTree::new().with_root_offset(4);
        let root = t.add_root(Node::group(whole(0), whole(1)));
        t.add_child(root, Node::group(whole(0), whole(1))).unwrap();
        let positions: Vec<_> = t.pre_order().unwrap().into_iter().map(|(_, p)| p).collect();
        assert_eq!(positions, vec!["4", "4.0"]);
    }

    #[test]
    fn cycles_and_shared_children_are_rejected() {
        let mut t = tree();
        t.link(2, 0).unwrap();
        assert!(matches!(t.pre_order(), Err(TreeError::Cycle(0))));
        assert!(matches!(t.link(0, 99), Err(TreeError::UnknownNode(99))));
    }

    #[test]
    fn walk_resolves_each_node_once() {
        let reg = registry();
        let resolver = Resolver::new(&reg, ResolverConfig::seeded(3));
        let mut walker = TreeWalker::new(&resolver);
        let collected = walker.walk(&tree()).unwrap();
        assert_eq!(collected.len(), 4);
        assert_eq!(collected[1].id.to_string(), "ModalContext1@0.0.1");
        // Groups stay unvisited; resolved nodes end collected.
        assert_eq!(walker.states()[0], NodeState::Unvisited);
        assert!(walker
            .states()
            .iter()
            .filter(|s| **s != NodeState::Unvisited)
            .all(|s| *s == NodeState::PlacementCollected));
    }

    #[test]
    fn compose_builds_one_stream_per_instrument() {
        let reg = registry();
        let resolver = Resolver::new(&reg, ResolverConfig::seeded(3));
        let composed = TreeWalker::new(&resolver)
            .compose(&tree(), &Composer::default(), None)
            .unwrap();
        let tags: Vec<_> = composed.event.children().iter().filter_map(Event::tag).collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(composed.event.children().iter().all(|c| c.duration() == whole(8)));
        // The second modal node's material starts at 4.
        let b_starts: Vec<_> = composed
            .event
            .leaves()
            .into_iter()
            .filter(|l| l.tag == Some("b") && !l.note.is_rest())
            .map(|l| l.start)
            .collect();
        assert_eq!(b_starts.len(), 2);
        assert_eq!(b_starts[1], whole(4));
    }

    #[test]
    fn diary_records_and_replays() {
        let reg = registry();
        let resolver = Resolver::new(&reg, ResolverConfig::seeded(3));
        let mut diary = MemoryDiary::new();
        let first = TreeWalker::new(&resolver).with_diary(&mut diary, false).walk(&tree()).unwrap();
        assert_eq!(diary.len(), 4);

        let other_seed = Resolver::new(&reg, ResolverConfig::seeded(999));
        let replayed = TreeWalker::new(&other_seed).with_diary(&mut diary, true).walk(&tree()).unwrap();
        assert_eq!(first, replayed);
    }

    #[test]
    fn replayed_non_placements_abort_the_walk() {
        let reg = registry();
        let resolver = Resolver::new(&reg, ResolverConfig::seeded(3));
        let mut diary = MemoryDiary::new();
        diary.put(DiaryRecord {
            context: "ModalContext1@0.0.1".to_string(),
            entry: "fill".to_string(),
            output: Output::Pitches(vec![crate::pitch::JustPitch::new(3, 2)]),
        });
        let err = TreeWalker::new(&resolver)
            .with_diary(&mut diary, true)
            .compose(&tree(), &Composer::default(), None)
            .unwrap_err();
        match err {
            TreeError::NotPlaceable { context, entry, found } => {
                assert_eq!(context, "ModalContext1@0.0.1");
                assert_eq!(entry, "fill");
                assert_eq!(found, "pitches");
            }
            other => panic!("expected a non-placeable node, got {other:?}"),
        }
    }

    #[test]
    fn resolution_errors_abort_the_walk() {
        let reg = registry();
        let resolver = Resolver::new(&reg, ResolverConfig::default());
        let mut t = StructureTree::new();
        t.add_root(Node::resolved(ContextKind::Modal1, whole(0), whole(1)));
        let err = TreeWalker::new(&resolver).walk(&t).unwrap_err();
        assert!(matches!(err, TreeError::Resolution(ResolutionError::NoSupportedEntry { .. })));
    }
}
