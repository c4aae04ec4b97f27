// Entry registry.
//
// Entries are registered once into a `RegistryBuilder`; `build()` checks the
// whole set and freezes it into a `Registry` that is only ever read
// afterwards (and can be shared across render threads). Building:
//
// 1. Names are unique across every context kind, so a dependency slot can
//    name its target without saying which bucket it lives in.
// 2. Every dependency slot must name a registered entry.
// 3. The dependency graph must be acyclic.
// 4. Every entry not marked `skip_check` is smoke-tested: its predicate runs
//    against its sample context, and if supported its producer runs too.
//    The result is discarded; any error aborts the build.
//
// Lookup by kind returns entries in registration order, which is what the
// default tie-break relies on.

use crate::context::ContextKind;
use crate::entry::Entry;
use crate::error::RegistrationError;
use crate::resolve::{Resolver, ResolverConfig};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<Box<dyn Entry>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        RegistryBuilder::default()
    }

    pub fn register<E: Entry + 'static>(&mut self, entry: E) -> Result<&mut Self, RegistrationError> {
        self.register_boxed(Box::new(entry))
    }

    pub fn register_boxed(&mut self, entry: Box<dyn Entry>) -> Result<&mut Self, RegistrationError> {
        if self.entries.iter().any(|e| e.name() == entry.name()) {
            return Err(RegistrationError::DuplicateEntryName {
                name: entry.name().to_string(),
                kind: entry.kind(),
            });
        }
        debug!("register '{}' for {} (relevance {})", entry.name(), entry.kind(), entry.relevance());
        self.entries.push(entry);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<Registry, RegistrationError> {
        let registry = self.link()?;
        registry.check_acyclic()?;
        let resolver = Resolver::new(&registry, ResolverConfig::default());
        for entry in registry.entries() {
            if entry.skip_check() {
                debug!("skip smoke test of '{}'", entry.name());
                continue;
            }
            resolver
                .smoke_test(entry)
                .map_err(|source| RegistrationError::Validation {
                    entry: entry.name().to_string(),
                    source: Box::new(source),
                })?;
        }
        info!("entry registry ready: {} entries", registry.len());
        Ok(registry)
    }

    fn link(self) -> Result<Registry, RegistrationError> {
        let by_name: HashMap<String, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name().to_string(), i))
            .collect();
        let mut by_kind: BTreeMap<ContextKind, Vec<usize>> = BTreeMap::new();
        let mut dependencies = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            by_kind.entry(entry.kind()).or_default().push(i);
            let mut slots = BTreeMap::new();
            for (abbreviation, target) in entry.dependencies() {
                let index = by_name
                    .get(target)
                    .copied()
                    .ok_or_else(|| RegistrationError::UnknownEntry {
                        entry: entry.name().to_string(),
                        dependency: target.to_string(),
                    })?;
                slots.insert(abbreviation.to_string(), index);
            }
            dependencies.push(slots);
        }
        Ok(Registry {
            entries: self.entries,
            by_name,
            by_kind,
            dependencies,
        })
    }
}

/// Frozen, validated set of entries.
pub struct Registry {
    entries: Vec<Box<dyn Entry>>,
    by_name: HashMap<String, usize>,
    by_kind: BTreeMap<ContextKind, Vec<usize>>,
    dependencies: Vec<BTreeMap<String, usize>>,
}

impl Registry {
    /// Entries answering `kind`, in registration order.
    pub fn lookup(&self, kind: ContextKind) -> Vec<&dyn Entry> {
        self.by_kind
            .get(&kind)
            .map(|indices| indices.iter().map(|&i| self.entries[i].as_ref()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Entry> {
        self.by_name.get(name).map(|&i| self.entries[i].as_ref())
    }

    /// The entry `name` that `requester` declared as a dependency.
    pub fn resolve_dependency(&self, requester: &str, name: &str) -> Result<&dyn Entry, RegistrationError> {
        self.get(name).ok_or_else(|| RegistrationError::UnknownEntry {
            entry: requester.to_string(),
            dependency: name.to_string(),
        })
    }

    /// The entry bound to `abbreviation` in `entry`'s dependency slots.
    pub fn dependency_of(&self, entry: &str, abbreviation: &str) -> Option<&dyn Entry> {
        let index = *self.by_name.get(entry)?;
        let target = *self.dependencies.get(index)?.get(abbreviation)?;
        Some(self.entries[target].as_ref())
    }

    /// Registration index of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = &dyn Entry> {
        self.entries.iter().map(|e| e.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_acyclic(&self) -> Result<(), RegistrationError> {
        let mut marks = vec![Mark::New; self.entries.len()];
        let mut path = Vec::new();
        for root in 0..self.entries.len() {
            self.visit(root, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Result<(), RegistrationError> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let from = path.iter().position(|&n| n == node).unwrap_or(0);
                let mut names: Vec<String> = path[from..]
                    .iter()
                    .map(|&n| self.entries[n].name().to_string())
                    .collect();
                names.push(self.entries[node].name().to_string());
                return Err(RegistrationError::CyclicDependency { path: names });
            }
            Mark::New => {}
        }
        marks[node] = Mark::Active;
        path.push(node);
        for &next in self.dependencies[node].values() {
            self.visit(next, marks, path)?;
        }
        path.pop();
        marks[node] = Mark::Done;
        Ok(())
    }
}

/// DFS state for cycle detection.
#[derive(Clone, Copy, PartialEq)]
enum Mark {
    New,
    Active,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::entry::{Call, Output, Support};
    use crate::error::EntryError;
    use crate::event::Event;
    use crate::placement::EventPlacement;
    use crate::time::whole;

    struct Stub {
        name: &'static str,
        kind: ContextKind,
        deps: Vec<(&'static str, &'static str)>,
        fail: bool,
        skip: bool,
    }

    fn stub(name: &'static str) -> Stub {
        Stub {
            name,
            kind: ContextKind::Modal0,
            deps: Vec::new(),
            fail: false,
            skip: false,
        }
    }

    impl Entry for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> ContextKind {
            self.kind
        }

        fn dependencies(&self) -> Vec<(&'static str, &'static str)> {
            self.deps.clone()
        }

        fn skip_check(&self) -> bool {
            self.skip
        }

        fn is_supported(&self, _cx: &Context, _call: &Call<'_>) -> Result<Support, EntryError> {
            Ok(Support::Supported)
        }

        fn main(&self, cx: &Context, _call: &mut Call<'_>) -> Result<Output, EntryError> {
            if self.fail {
                return Err(EntryError::invalid("broken rule"));
            }
            let event = Event::stream("v", vec![Event::rest(cx.duration())]);
            Ok(Output::Placement(EventPlacement::fixed(event, whole(0), cx.duration())))
        }
    }

    #[test]
    fn duplicate_names_are_rejected_across_kinds() {
        let mut builder = RegistryBuilder::new();
        builder.register(stub("scale")).unwrap();
        let mut other = stub("scale");
        other.kind = ContextKind::Empty;
        let err = builder.register(other).err();
        assert!(matches!(
            err,
            Some(RegistrationError::DuplicateEntryName { ref name, .. }) if name == "scale"
        ));
    }

    #[test]
    fn lookup_keeps_registration_order() {
        let mut builder = RegistryBuilder::new();
        builder.register(stub("b")).unwrap().register(stub("a")).unwrap();
        let mut empty = stub("c");
        empty.kind = ContextKind::Empty;
        builder.register(empty).unwrap();
        let registry = builder.build().unwrap();
        let names: Vec<_> = registry.lookup(ContextKind::Modal0).iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(registry.lookup(ContextKind::Clock).is_empty());
        assert_eq!(registry.position("c"), Some(2));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut builder = RegistryBuilder::new();
        let mut a = stub("a");
        a.deps = vec![("n", "note")];
        builder.register(a).unwrap();
        assert!(matches!(
            builder.build(),
            Err(RegistrationError::UnknownEntry { ref dependency, .. }) if dependency == "note"
        ));
    }

    #[test]
    fn cycles_are_rejected_with_path() {
        let mut builder = RegistryBuilder::new();
        let mut a = stub("a");
        a.deps = vec![("b", "b")];
        let mut b = stub("b");
        b.deps = vec![("c", "c")];
        let mut c = stub("c");
        c.deps = vec![("a", "a")];
        builder.register(a).unwrap().register(b).unwrap().register(c).unwrap();
        match builder.build() {
            Err(RegistrationError::CyclicDependency { path }) => {
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn smoke_test_failures_surface_at_build() {
        let mut builder = RegistryBuilder::new();
        let mut broken = stub("broken");
        broken.fail = true;
        builder.register(broken).unwrap();
        assert!(matches!(
            builder.build(),
            Err(RegistrationError::Validation { ref entry, .. }) if entry == "broken"
        ));

        let mut builder = RegistryBuilder::new();
        let mut skipped = stub("broken");
        skipped.fail = true;
        skipped.skip = true;
        builder.register(skipped).unwrap();
        assert!(builder.build().is_ok());
    }

    #[test]
    fn dependency_slots_resolve() {
        let mut builder = RegistryBuilder::new();
        let mut a = stub("a");
        a.deps = vec![("sc", "scale")];
        builder.register(stub("scale")).unwrap().register(a).unwrap();
        let registry = builder.build().unwrap();
        assert_eq!(registry.dependency_of("a", "sc").map(|e| e.name()), Some("scale"));
        assert!(registry.dependency_of("a", "xx").is_none());
        assert_eq!(registry.resolve_dependency("a", "scale").map(|e| e.name()).ok(), Some("scale"));
        match registry.resolve_dependency("a", "nope") {
            Err(err @ RegistrationError::UnknownEntry { .. }) => {
                assert_eq!(err.to_string(), "entry 'a' depends on unknown entry 'nope'");
            }
            other => panic!("expected unknown entry, got {:?}", other.map(|e| e.name().to_string())),
        }
    }
}
