// Typed parameter bag passed to every entry call.
//
// Entries take a few optional knobs (a fixed duration, an activity level, a
// pitch to start from). Instead of open keyword arguments they receive a
// `Params` map of named `Value`s and read it with typed getters that return
// `None` for both "absent" and "wrong type".

use crate::event::Event;
use crate::pitch::JustPitch;
use crate::time::{Beats, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Beats(Beats),
    Pitch(JustPitch),
    Pitches(Vec<JustPitch>),
    Range(TimeRange),
    Ints(Vec<i64>),
    Events(Vec<Event>),
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from! {
    i64 => Int,
    f64 => Float,
    bool => Bool,
    String => Text,
    Beats => Beats,
    JustPitch => Pitch,
    Vec<JustPitch> => Pitches,
    TimeRange => Range,
    Vec<i64> => Ints,
    Vec<Event> => Events,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Ordered map of named values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// `self` overridden by every key of `other`.
    pub fn merged(&self, other: &Params) -> Params {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Floats, with integers widened.
    pub fn float(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(Value::Float(v)) => Some(*v),
            Some(Value::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn beats(&self, key: &str) -> Option<Beats> {
        match self.get(key) {
            Some(Value::Beats(v)) => Some(*v),
            Some(Value::Int(v)) => Some(Beats::from_integer(*v)),
            _ => None,
        }
    }

    pub fn pitch(&self, key: &str) -> Option<JustPitch> {
        match self.get(key) {
            Some(Value::Pitch(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn pitches(&self, key: &str) -> Option<&[JustPitch]> {
        match self.get(key) {
            Some(Value::Pitches(v)) => Some(v),
            _ => None,
        }
    }

    pub fn range(&self, key: &str) -> Option<TimeRange> {
        match self.get(key) {
            Some(Value::Range(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn ints(&self, key: &str) -> Option<&[i64]> {
        match self.get(key) {
            Some(Value::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn events(&self, key: &str) -> Option<&[Event]> {
        match self.get(key) {
            Some(Value::Events(v)) => Some(v),
            _ => None,
        }
    }

    /// Stable textual digest, used to separate PRNG streams of calls that
    /// differ only in their parameters.
    pub fn digest(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::beats;

    #[test]
    fn typed_getters() {
        let params = Params::new()
            .with("activity", 7i64)
            .with("balance", 0.5)
            .with("duration", beats(3, 16))
            .with("name", "tremolo")
            .with("pitch", JustPitch::new(3, 2));
        assert_eq!(params.int("activity"), Some(7));
        assert_eq!(params.float("activity"), Some(7.0));
        assert_eq!(params.float("balance"), Some(0.5));
        assert_eq!(params.beats("duration"), Some(beats(3, 16)));
        assert_eq!(params.text("name"), Some("tremolo"));
        assert_eq!(params.pitch("pitch"), Some(JustPitch::new(3, 2)));
        assert_eq!(params.int("name"), None);
        assert_eq!(params.int("missing"), None);
    }

    #[test]
    fn merged_prefers_other() {
        let a = Params::new().with("x", 1i64).with("y", 2i64);
        let b = Params::new().with("y", 3i64);
        let m = a.merged(&b);
        assert_eq!(m.int("x"), Some(1));
        assert_eq!(m.int("y"), Some(3));
    }

    #[test]
    fn digest_is_order_independent() {
        let a = Params::new().with("x", 1i64).with("y", true);
        let b = Params::new().with("y", true).with("x", 1i64);
        assert_eq!(a.digest(), b.digest());
    }
}
