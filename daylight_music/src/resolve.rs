// Entry resolution: pick one entry for a context and run it.
//
// Given a context, the resolver:
//
// 1. Honours a pin from `ResolverConfig::pinned` (context id -> entry name)
//    if one exists; a pinned entry that is missing or unsupported is fatal.
// 2. Otherwise fetches every entry registered for the context's kind, in
//    registration order, and evaluates each predicate. `Unsupported`
//    candidates are logged and skipped; a predicate error aborts. When
//    filling a structure-tree node, only entries declaring placement
//    output are considered (`resolve_placement`).
// 3. Picks the highest relevance. Ties are broken per `TieBreak`; the
//    default keeps the first-registered entry.
// 4. Runs the winner's producer and returns its output verbatim.
//
// Each invocation gets a `ContextRng` derived from the run seed and the key
// `<context id>/<entry name>`. Dependency calls made by an entry derive
// their key from the caller's key, the dependency's name and a per-call
// counter, so resolving the same context with the same seed always
// replays the same decisions no matter what was resolved before it.

use crate::context::Context;
use crate::entry::{Call, Entry, Output, OutputKind, Support};
use crate::error::{EntryError, ResolutionError};
use crate::params::Params;
use crate::registry::Registry;
use daylight_prng::ContextRng;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dependency calls may nest at most this deep.
pub const MAX_DEPTH: usize = 32;

/// How to choose among supported entries sharing the top relevance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    #[default]
    FirstRegistered,
    LastRegistered,
    /// Uniform choice with a PRNG derived from the seed and the context id.
    Seeded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub seed: u64,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Context id string to entry name.
    #[serde(default)]
    pub pinned: BTreeMap<String, String>,
}

impl ResolverConfig {
    pub fn seeded(seed: u64) -> Self {
        ResolverConfig {
            seed,
            ..ResolverConfig::default()
        }
    }

    pub fn pin(mut self, context: &str, entry: &str) -> Self {
        self.pinned.insert(context.to_string(), entry.to_string());
        self
    }
}

/// The selected entry and what it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub entry: String,
    pub output: Output,
}

pub struct Resolver<'r> {
    registry: &'r Registry,
    config: ResolverConfig,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r Registry, config: ResolverConfig) -> Self {
        Resolver { registry, config }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    fn top_key(cx: &Context, entry: &dyn Entry) -> String {
        format!("{}/{}", cx.id(), entry.name())
    }

    fn predicate(
        &self,
        entry: &'r dyn Entry,
        cx: &Context,
        params: &Params,
    ) -> Result<Support, ResolutionError> {
        let call = Call::new(self, entry, params.clone(), Self::top_key(cx, entry), 0);
        entry
            .is_supported(cx, &call)
            .map_err(|source| ResolutionError::Predicate {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                source,
            })
    }

    /// Supported entries for `cx`, in registration order.
    pub fn candidates(&self, cx: &Context, params: &Params) -> Result<Vec<&'r dyn Entry>, ResolutionError> {
        let mut supported = Vec::new();
        for entry in self.registry.lookup(cx.kind()) {
            match self.predicate(entry, cx, params)? {
                Support::Supported => supported.push(entry),
                Support::Unsupported(reason) => {
                    debug!("{}: '{}' unsupported: {reason}", cx.id(), entry.name());
                }
            }
        }
        Ok(supported)
    }

    /// The entry that will fill `cx`.
    pub fn select(&self, cx: &Context, params: &Params) -> Result<&'r dyn Entry, ResolutionError> {
        self.select_producing(cx, params, None)
    }

    /// Like `select`, but only entries declaring `wanted` output compete.
    fn select_producing(
        &self,
        cx: &Context,
        params: &Params,
        wanted: Option<OutputKind>,
    ) -> Result<&'r dyn Entry, ResolutionError> {
        if let Some(name) = self.config.pinned.get(&cx.id().key()) {
            return self.select_pinned(cx, params, name, wanted);
        }
        let mut candidates = self.candidates(cx, params)?;
        if let Some(wanted) = wanted {
            candidates.retain(|e| {
                let keep = e.output_kind() == wanted;
                if !keep {
                    trace!("{}: '{}' produces {}, skipped", cx.id(), e.name(), e.output_kind().name());
                }
                keep
            });
        }
        let Some(best) = candidates.iter().map(|e| e.relevance()).max() else {
            return Err(ResolutionError::NoSupportedEntry {
                context: cx.id().to_string(),
                kind: cx.kind(),
            });
        };
        let tied: Vec<&'r dyn Entry> = candidates
            .into_iter()
            .filter(|e| e.relevance() == best)
            .collect();
        let winner = match self.config.tie_break {
            TieBreak::FirstRegistered => tied.first(),
            TieBreak::LastRegistered => tied.last(),
            TieBreak::Seeded => {
                let mut rng = ContextRng::derive(self.config.seed, &format!("{}/tie-break", cx.id()));
                rng.choose(&tied)
            }
        };
        let winner = *winner.ok_or_else(|| ResolutionError::NoSupportedEntry {
            context: cx.id().to_string(),
            kind: cx.kind(),
        })?;
        if tied.len() > 1 {
            debug!(
                "{}: {} entries tied at relevance {best}, {:?} picked '{}'",
                cx.id(),
                tied.len(),
                self.config.tie_break,
                winner.name()
            );
        }
        debug!("{}: selected '{}' (relevance {best})", cx.id(), winner.name());
        Ok(winner)
    }

    fn select_pinned(
        &self,
        cx: &Context,
        params: &Params,
        name: &str,
        wanted: Option<OutputKind>,
    ) -> Result<&'r dyn Entry, ResolutionError> {
        let entry = self
            .registry
            .get(name)
            .filter(|e| e.kind() == cx.kind())
            .ok_or_else(|| ResolutionError::PinnedEntryMissing {
                context: cx.id().to_string(),
                entry: name.to_string(),
            })?;
        if let Some(wanted) = wanted.filter(|&w| w != entry.output_kind()) {
            return Err(ResolutionError::PinnedEntryWrongOutput {
                context: cx.id().to_string(),
                entry: name.to_string(),
                expected: wanted.name(),
                found: entry.output_kind().name(),
            });
        }
        match self.predicate(entry, cx, params)? {
            Support::Supported => {
                debug!("{}: pinned '{}'", cx.id(), name);
                Ok(entry)
            }
            Support::Unsupported(reason) => Err(ResolutionError::PinnedEntryUnsupported {
                context: cx.id().to_string(),
                entry: name.to_string(),
                reason,
            }),
        }
    }

    /// Select an entry for `cx` and run it.
    pub fn resolve(&self, cx: &Context, params: &Params) -> Result<Resolution, ResolutionError> {
        let entry = self.select(cx, params)?;
        self.run_top(entry, cx, params)
    }

    /// Select among the entries that produce placements and run the
    /// winner. This is how structure-tree nodes are filled.
    pub fn resolve_placement(&self, cx: &Context, params: &Params) -> Result<Resolution, ResolutionError> {
        let entry = self.select_producing(cx, params, Some(OutputKind::Placement))?;
        self.run_top(entry, cx, params)
    }

    fn run_top(&self, entry: &'r dyn Entry, cx: &Context, params: &Params) -> Result<Resolution, ResolutionError> {
        let mut call = Call::new(self, entry, params.clone(), Self::top_key(cx, entry), 0);
        let output = entry
            .main(cx, &mut call)
            .and_then(|output| checked_kind(entry, output))
            .map_err(|source| ResolutionError::EntryFailed {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                source,
            })?;
        trace!("{}: '{}' produced {}", cx.id(), entry.name(), output.kind_name());
        Ok(Resolution {
            entry: entry.name().to_string(),
            output,
        })
    }

    /// Run `entry` as a dependency: its predicate must hold, then its
    /// producer runs.
    pub(crate) fn run_dependency(
        &self,
        entry: &dyn Entry,
        cx: &Context,
        params: Params,
        key: String,
        depth: usize,
    ) -> Result<Output, ResolutionError> {
        if depth > MAX_DEPTH {
            return Err(ResolutionError::RecursionLimit {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                depth,
            });
        }
        let mut call = Call::new(self, entry, params, key, depth);
        let support = entry
            .is_supported(cx, &call)
            .map_err(|source| ResolutionError::Predicate {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                source,
            })?;
        if let Support::Unsupported(reason) = support {
            return Err(ResolutionError::DependencyUnsupported {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                reason,
            });
        }
        trace!("{}: dependency '{}' at depth {depth}", cx.id(), entry.name());
        entry
            .main(cx, &mut call)
            .and_then(|output| checked_kind(entry, output))
            .map_err(|source| ResolutionError::EntryFailed {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                source,
            })
    }

    /// Registration check: run `entry` once on its sample context.
    pub(crate) fn smoke_test(&self, entry: &dyn Entry) -> Result<(), ResolutionError> {
        let cx = entry.sample_context();
        let params = entry.sample_params();
        let mut call = Call::new(self, entry, params, Self::top_key(&cx, entry), 0);
        let support = entry
            .is_supported(&cx, &call)
            .map_err(|source| ResolutionError::Predicate {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                source,
            })?;
        if let Support::Unsupported(reason) = support {
            debug!("smoke test of '{}': sample unsupported ({reason})", entry.name());
            return Ok(());
        }
        entry
            .main(&cx, &mut call)
            .and_then(|output| checked_kind(entry, output))
            .map(|_| ())
            .map_err(|source| ResolutionError::EntryFailed {
                context: cx.id().to_string(),
                entry: entry.name().to_string(),
                source,
            })
    }
}

/// `output`, if it has the kind `entry` declares.
fn checked_kind(entry: &dyn Entry, output: Output) -> Result<Output, EntryError> {
    if output.kind() == entry.output_kind() {
        return Ok(output);
    }
    Err(EntryError::UnexpectedOutput {
        expected: entry.output_kind().name(),
        found: output.kind_name(),
    })
}
