// Clock grammar.
//
// A clock line is a sequence of short rhythmic cells, each produced by a
// clock entry (hit, grace, tremolo, ...). Which cells follow each other is
// described by a weighted context-free grammar: a terminal such as
// `modal-event` expands into a first sequence of non-terminals, and every
// non-terminal can be rewritten into a longer sequence. `expand` enumerates
// every distinct derivation reachable within a rewrite limit together with
// the product of the weights used.
//
// `realize` turns a terminal into actual material for a duration window: it
// discards derivations whose entries' declared duration ranges cannot hit
// the window, resolves each remaining non-terminal once through its entry,
// keeps the derivations whose total length lies in the window and picks one
// of them weighted by its rule weights.

use crate::context::Context;
use crate::error::ClockError;
use crate::event::Event;
use crate::params::{Params, Value};
use crate::resolve::Resolver;
use crate::time::{Beats, TimeRange};
use daylight_prng::ContextRng;
use log::{debug, trace};
use num_traits::Zero;
use std::collections::{BTreeSet, HashMap};

/// Rewrites applied per terminal by default.
pub const DEFAULT_LIMIT: usize = 5;

/// A grammar symbol standing for one call of a clock entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NonTerminal {
    /// Grammar-level name; two symbols with one label are the same symbol.
    pub label: String,
    pub entry: String,
    pub params: Params,
}

impl NonTerminal {
    pub fn new(label: &str, entry: &str) -> Self {
        NonTerminal {
            label: label.to_string(),
            entry: entry.to_string(),
            params: Params::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key, value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Terminal(String),
    Call(NonTerminal),
}

impl Symbol {
    pub fn label(&self) -> &str {
        match self {
            Symbol::Terminal(name) => name,
            Symbol::Call(nt) => &nt.label,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub lhs: Symbol,
    pub rhs: Vec<NonTerminal>,
    pub weight: f64,
}

impl Rule {
    pub fn new(lhs: Symbol, rhs: Vec<NonTerminal>, weight: f64) -> Self {
        Rule { lhs, rhs, weight }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub symbols: Vec<NonTerminal>,
    pub weight: f64,
}

impl Derivation {
    fn labels(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.label.clone()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClockGrammar {
    rules: Vec<Rule>,
    limit: usize,
}

impl ClockGrammar {
    pub fn new(rules: Vec<Rule>) -> Self {
        ClockGrammar {
            rules,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The grammar of the piece's clock lines.
    pub fn daylight() -> Self {
        let tremolo1 = NonTerminal::new("tremolo-1", "tremolo-long")
            .with("instruments", vec![1i64])
            .with("volumes", "pp p");
        let tremolo2 = NonTerminal::new("tremolo-2", "tremolo-middle")
            .with("instruments", vec![2i64]);
        let grace = NonTerminal::new("grace", "grace");
        let hit = |n: i64| NonTerminal::new(&format!("hit-{n}"), "hit").with("instruments", vec![n]);
        let (hit0, hit2, hit3, hit4) = (hit(0), hit(2), hit(3), hit(4));
        let call = |nt: &NonTerminal| Symbol::Call(nt.clone());
        let modal = || Symbol::Terminal("modal-event".to_string());
        let end = || Symbol::Terminal("clock-end".to_string());
        ClockGrammar::new(vec![
            Rule::new(modal(), vec![hit4.clone()], 1.0),
            Rule::new(modal(), vec![tremolo1.clone()], 1.0),
            Rule::new(end(), vec![hit0.clone()], 1.0),
            Rule::new(call(&tremolo1), vec![tremolo1.clone(), tremolo2.clone()], 0.35),
            Rule::new(call(&tremolo1), vec![tremolo1.clone(), hit2.clone()], 1.0),
            Rule::new(call(&tremolo1), vec![tremolo1.clone(), grace.clone()], 1.0),
            Rule::new(call(&hit4), vec![hit4.clone(), tremolo2.clone()], 1.0),
            Rule::new(call(&hit4), vec![hit4.clone(), grace.clone()], 1.0),
            Rule::new(call(&grace), vec![hit3.clone(), hit2.clone()], 1.0),
            Rule::new(call(&grace), vec![hit3.clone(), hit2.clone(), grace.clone()], 1.0),
            Rule::new(call(&hit2), vec![hit2.clone(), grace.clone()], 1.0),
            Rule::new(call(&hit2), vec![hit2.clone(), tremolo1.clone()], 0.5),
            Rule::new(call(&tremolo2), vec![grace.clone()], 1.0),
            Rule::new(call(&hit0), vec![hit0.clone(), tremolo2], 1.0),
        ])
    }

    /// Every distinct derivation of `start` using at most `limit` rewrites
    /// after the initial expansion, in discovery order.
    pub fn expand(&self, start: &str, limit: usize) -> Result<Vec<Derivation>, ClockError> {
        let mut frontier: Vec<Derivation> = self
            .rules
            .iter()
            .filter(|r| matches!(&r.lhs, Symbol::Terminal(name) if name == start))
            .map(|r| Derivation {
                symbols: r.rhs.clone(),
                weight: r.weight,
            })
            .collect();
        if frontier.is_empty() {
            return Err(ClockError::UnknownTerminal(start.to_string()));
        }
        let mut seen: BTreeSet<Vec<String>> = frontier.iter().map(Derivation::labels).collect();
        let mut all = frontier.clone();
        for _ in 0..limit {
            let mut next = Vec::new();
            for derivation in &frontier {
                for (i, symbol) in derivation.symbols.iter().enumerate() {
                    for rule in self.rules.iter().filter(|r| matches!(&r.lhs, Symbol::Call(nt) if nt.label == symbol.label)) {
                        let mut symbols = derivation.symbols[..i].to_vec();
                        symbols.extend(rule.rhs.iter().cloned());
                        symbols.extend(derivation.symbols[i + 1..].iter().cloned());
                        let candidate = Derivation {
                            symbols,
                            weight: derivation.weight * rule.weight,
                        };
                        if seen.insert(candidate.labels()) {
                            next.push(candidate);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            all.extend(next.iter().cloned());
            frontier = next;
        }
        trace!("'{start}' expands to {} derivations", all.len());
        Ok(all)
    }

    /// Realize `terminal` as one sequential event lasting within `window`.
    ///
    /// `bounds` gives the duration range a non-terminal can produce, if
    /// known; `resolve` produces its material. Each label is resolved at
    /// most once.
    pub fn realize_with<B, F>(
        &self,
        terminal: &str,
        window: TimeRange,
        rng: &mut ContextRng,
        bounds: B,
        mut resolve: F,
    ) -> Result<Event, ClockError>
    where
        B: Fn(&NonTerminal) -> Option<TimeRange>,
        F: FnMut(&NonTerminal) -> Result<Event, ClockError>,
    {
        let derivations = self.expand(terminal, self.limit)?;
        let reachable: Vec<&Derivation> = derivations
            .iter()
            .filter(|d| may_fit(d, window, &bounds))
            .collect();
        let mut cache: HashMap<String, Event> = HashMap::new();
        let mut fitting: Vec<(&Derivation, Beats)> = Vec::new();
        for derivation in reachable {
            let mut total = Beats::zero();
            for symbol in &derivation.symbols {
                if !cache.contains_key(&symbol.label) {
                    let material = resolve(symbol)?;
                    cache.insert(symbol.label.clone(), material);
                }
                total += cache.get(&symbol.label).map(Event::duration).unwrap_or_else(Beats::zero);
            }
            if window.contains(total) {
                fitting.push((derivation, total));
            }
        }
        let weights: Vec<f64> = fitting.iter().map(|(d, _)| d.weight).collect();
        let Some(choice) = rng.choose_weighted(&weights) else {
            return Err(ClockError::NoDerivation {
                terminal: terminal.to_string(),
                min: window.start,
                max: window.end,
            });
        };
        let (derivation, total) = fitting[choice];
        debug!(
            "'{terminal}': {} of {} derivations fit, picked [{}] lasting {total}",
            fitting.len(),
            derivations.len(),
            derivation.labels().join(" ")
        );
        let mut line = Event::sequential(None, Vec::new());
        for symbol in &derivation.symbols {
            if let Some(material) = cache.get(&symbol.label) {
                line.concatenate(material.clone())
                    .map_err(|e| ClockError::Entry(e.into()))?;
            }
        }
        Ok(line)
    }

    /// Realize `terminal` by resolving every non-terminal's entry on `cx`.
    pub fn realize(
        &self,
        terminal: &str,
        window: TimeRange,
        resolver: &Resolver<'_>,
        cx: &Context,
        rng: &mut ContextRng,
    ) -> Result<Event, ClockError> {
        let registry = resolver.registry();
        self.realize_with(
            terminal,
            window,
            rng,
            |nt| registry.get(&nt.entry).and_then(|e| e.duration_range()),
            |nt| {
                let entry = registry
                    .get(&nt.entry)
                    .ok_or_else(|| ClockError::UnknownTerminal(nt.entry.clone()))?;
                let key = format!("{}/clock>{}", cx.id(), nt.label);
                let output = resolver.run_dependency(entry, cx, nt.params.clone(), key, 1)?;
                Ok(output.into_event()?)
            },
        )
    }
}

/// Whether the declared duration ranges of `derivation`'s entries allow a
/// total inside `window`. Unknown ranges never exclude anything.
fn may_fit<B>(derivation: &Derivation, window: TimeRange, bounds: &B) -> bool
where
    B: Fn(&NonTerminal) -> Option<TimeRange>,
{
    let mut low = Beats::zero();
    let mut high = Beats::zero();
    for symbol in &derivation.symbols {
        match bounds(symbol) {
            Some(range) => {
                low += range.start;
                high += range.end;
            }
            None => return true,
        }
    }
    low <= window.end && high >= window.start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{beats, whole};

    fn nt(label: &str) -> NonTerminal {
        NonTerminal::new(label, label)
    }

    fn toy() -> ClockGrammar {
        ClockGrammar::new(vec![
            Rule::new(Symbol::Terminal("start".into()), vec![nt("a")], 1.0),
            Rule::new(Symbol::Call(nt("a")), vec![nt("a"), nt("b")], 0.5),
            Rule::new(Symbol::Call(nt("b")), vec![nt("c")], 2.0),
        ])
    }

    fn lengths(nt: &NonTerminal) -> Result<Event, ClockError> {
        let length = match nt.label.as_str() {
            "a" => whole(1),
            "b" => whole(2),
            _ => whole(3),
        };
        Ok(Event::sequential(None, vec![Event::rest(length)]))
    }

    #[test]
    fn expand_enumerates_within_the_limit() {
        let derivations = toy().expand("start", 2).unwrap();
        let labels: Vec<Vec<String>> = derivations.iter().map(Derivation::labels).collect();
        assert_eq!(labels[0], vec!["a"]);
        assert!(labels.contains(&vec!["a".to_string(), "b".to_string()]));
        assert!(labels.contains(&vec!["a".to_string(), "c".to_string()]));
        assert!(labels.contains(&vec!["a".to_string(), "b".to_string(), "b".to_string()]));
        let ac = derivations.iter().find(|d| d.labels() == ["a", "c"]).unwrap();
        assert!((ac.weight - 1.0).abs() < 1e-9);
        assert_eq!(toy().expand("start", 0).unwrap().len(), 1);
    }

    #[test]
    fn unknown_terminal() {
        assert!(matches!(toy().expand("nope", 3), Err(ClockError::UnknownTerminal(_))));
    }

    #[test]
    fn realize_respects_the_window() {
        let grammar = toy().with_limit(3);
        let mut rng = ContextRng::new(5);
        let window = TimeRange {
            start: whole(4),
            end: whole(4),
        };
        let line = grammar.realize_with("start", window, &mut rng, |_| None, lengths).unwrap();
        assert_eq!(line.duration(), whole(4));
    }

    #[test]
    fn realize_without_fitting_derivation_fails() {
        let grammar = toy().with_limit(1);
        let mut rng = ContextRng::new(5);
        let window = TimeRange {
            start: whole(50),
            end: whole(60),
        };
        let err = grammar.realize_with("start", window, &mut rng, |_| None, lengths).unwrap_err();
        assert!(matches!(err, ClockError::NoDerivation { .. }));
    }

    #[test]
    fn bounds_prune_before_resolving() {
        let grammar = toy().with_limit(1);
        let mut rng = ContextRng::new(5);
        let window = TimeRange {
            start: beats(1, 2),
            end: whole(1),
        };
        let mut resolved = Vec::new();
        let line = grammar
            .realize_with(
                "start",
                window,
                &mut rng,
                |nt| {
                    let w = if nt.label == "a" { whole(1) } else { whole(2) };
                    Some(TimeRange { start: w, end: w })
                },
                |nt| {
                    resolved.push(nt.label.clone());
                    lengths(nt)
                },
            )
            .unwrap();
        assert_eq!(line.duration(), whole(1));
        assert_eq!(resolved, vec!["a"]);
    }

    #[test]
    fn daylight_grammar_expands_both_terminals() {
        let grammar = ClockGrammar::daylight();
        let modal = grammar.expand("modal-event", 2).unwrap();
        assert!(modal.iter().any(|d| d.labels() == ["hit-4", "grace"]));
        let end = grammar.expand("clock-end", 1).unwrap();
        assert_eq!(end.len(), 2);
    }
}
