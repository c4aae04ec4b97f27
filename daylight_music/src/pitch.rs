// Just-intonation pitch material: pitches, scales, instruments.
//
// This is the music-representation layer the engine consumes. Pitches are
// frequency ratios relative to the concert pitch (1/1), so the arithmetic is
// exact: stacking an interval multiplies ratios, removing one divides them.
// Harmonicity follows Clarence Barlow's indigestibility measure in its
// simplified (unsigned) form, which is what dyad and resonator selection
// use to rank candidate intervals.
//
// Used by context.rs (modal events carry scales and pitches), the entry
// library (scale walks, dyads) and resonator.rs (pitch-function ranking).

use num_rational::Ratio;
use num_traits::{One, Signed, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// A just-intonation pitch: a strictly positive frequency ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JustPitch(Ratio<i64>);

impl JustPitch {
    /// Panics on a non-positive ratio; use `try_new` for untrusted input.
    pub fn new(numer: i64, denom: i64) -> Self {
        Self::try_new(numer, denom).unwrap_or_else(|| panic!("invalid pitch ratio {numer}/{denom}"))
    }

    pub fn try_new(numer: i64, denom: i64) -> Option<Self> {
        if denom == 0 {
            return None;
        }
        let ratio = Ratio::new(numer, denom);
        if ratio.is_positive() { Some(JustPitch(ratio)) } else { None }
    }

    pub fn unison() -> Self {
        JustPitch(Ratio::one())
    }

    pub fn ratio(&self) -> Ratio<i64> {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(1.0)
    }

    pub fn cents(&self) -> f64 {
        1200.0 * self.as_f64().log2()
    }

    /// Frequency in Hz given the frequency of 1/1.
    pub fn frequency(&self, concert_pitch: f64) -> f64 {
        concert_pitch * self.as_f64()
    }

    /// Octave of the pitch: 0 for ratios in [1/1, 2/1), -1 below, and so on.
    pub fn octave(&self) -> i32 {
        let two = Ratio::from_integer(2);
        let mut r = self.0;
        let mut octave = 0;
        while r >= two {
            r /= two;
            octave += 1;
        }
        while r < Ratio::one() {
            r *= two;
            octave -= 1;
        }
        octave
    }

    /// Fold into the octave [1/1, 2/1).
    pub fn normalize(&self) -> Self {
        self.register(0)
    }

    /// Move the pitch class into `octave`.
    pub fn register(&self, octave: i32) -> Self {
        let shift = octave - self.octave();
        JustPitch(self.0 * pow2(shift))
    }

    /// Octave transposition by `octaves` (negative goes down).
    pub fn transpose_octaves(&self, octaves: i32) -> Self {
        JustPitch(self.0 * pow2(octaves))
    }

    /// True if both pitches are octave-equivalent.
    pub fn same_class(&self, other: &JustPitch) -> bool {
        self.normalize() == other.normalize()
    }

    /// Interval from `self` up (or down) to `other`, as a ratio.
    pub fn interval_to(&self, other: &JustPitch) -> JustPitch {
        JustPitch(other.0 / self.0)
    }

    /// Barlow's simplified harmonicity of this ratio read as an interval.
    ///
    /// 1/1 scores 1; simpler ratios score higher (3/2 > 5/4 > 7/4).
    pub fn harmonicity(&self) -> f64 {
        let total = indigestibility(self.0.numer().unsigned_abs())
            + indigestibility(self.0.denom().unsigned_abs());
        if total == 0.0 { 1.0 } else { 1.0 / total }
    }
}

impl Add for JustPitch {
    type Output = JustPitch;

    /// Stack an interval.
    fn add(self, rhs: JustPitch) -> JustPitch {
        JustPitch(self.0 * rhs.0)
    }
}

impl Sub for JustPitch {
    type Output = JustPitch;

    /// Remove an interval.
    fn sub(self, rhs: JustPitch) -> JustPitch {
        JustPitch(self.0 / rhs.0)
    }
}

impl fmt::Display for JustPitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.numer(), self.0.denom())
    }
}

impl FromStr for JustPitch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (n, d) = s.split_once('/').unwrap_or((s, "1"));
        let numer: i64 = n.trim().parse().map_err(|_| format!("bad numerator in '{s}'"))?;
        let denom: i64 = d.trim().parse().map_err(|_| format!("bad denominator in '{s}'"))?;
        JustPitch::try_new(numer, denom).ok_or_else(|| format!("'{s}' is not a positive ratio"))
    }
}

fn pow2(exp: i32) -> Ratio<i64> {
    if exp >= 0 {
        Ratio::from_integer(1i64 << exp)
    } else {
        Ratio::new(1, 1i64 << (-exp))
    }
}

/// Barlow's indigestibility: 2 * sum(e * (p - 1)^2 / p) over the prime
/// factorisation p^e of `n`.
pub fn indigestibility(mut n: u64) -> f64 {
    let mut total = 0.0;
    let mut p = 2u64;
    while n > 1 && p * p <= n {
        while n % p == 0 {
            let pf = p as f64;
            total += (pf - 1.0) * (pf - 1.0) / pf;
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        let pf = n as f64;
        total += (pf - 1.0) * (pf - 1.0) / pf;
    }
    2.0 * total
}

/// A repeating just-intonation scale bounded by an ambitus.
///
/// `degrees` are the pitch classes of one period (octave) in ascending order,
/// starting with the tonic at 1/1. Scale indices count every scale pitch
/// between `min` and `max` from the bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub tonic: JustPitch,
    pub degrees: Vec<JustPitch>,
    pitches: Vec<JustPitch>,
}

impl Scale {
    /// Build a scale from degree ratios relative to `tonic`, spanning
    /// `[min, max]`. Degrees are normalized and deduplicated.
    pub fn new(tonic: JustPitch, degrees: &[JustPitch], min: JustPitch, max: JustPitch) -> Self {
        let mut degrees: Vec<JustPitch> = degrees.iter().map(JustPitch::normalize).collect();
        degrees.sort();
        degrees.dedup();
        let mut pitches = Vec::new();
        for octave in (min.octave() - 1)..=(max.octave() + 1) {
            for degree in &degrees {
                let p = (tonic + *degree).transpose_octaves(octave - tonic.octave());
                if p >= min && p <= max {
                    pitches.push(p);
                }
            }
        }
        pitches.sort();
        pitches.dedup();
        Scale { tonic, degrees, pitches }
    }

    /// Pentatonic scale on 1/1 covering four octaves below and five above.
    pub fn pentatonic(degrees: [JustPitch; 5]) -> Self {
        Scale::new(
            JustPitch::unison(),
            &degrees,
            JustPitch::new(1, 16),
            JustPitch::new(32, 1),
        )
    }

    pub fn len_per_period(&self) -> usize {
        self.degrees.len()
    }

    pub fn pitches(&self) -> &[JustPitch] {
        &self.pitches
    }

    pub fn pitch_to_scale_index(&self, pitch: &JustPitch) -> Option<usize> {
        self.pitches.binary_search(pitch).ok()
    }

    pub fn scale_index_to_pitch(&self, index: isize) -> Option<JustPitch> {
        if index < 0 {
            return None;
        }
        self.pitches.get(index as usize).copied()
    }

    /// Pitch of scale `degree` in `octave`, relative to the tonic.
    pub fn scale_position_to_pitch(&self, degree: usize, octave: i32) -> JustPitch {
        let period = self.degrees.len().max(1);
        let extra = (degree / period) as i32;
        let class = self.degrees.get(degree % period).copied().unwrap_or_else(JustPitch::unison);
        (self.tonic + class).transpose_octaves(octave + extra)
    }

    /// Degree index of the pitch class of `pitch`, if it belongs to the scale.
    pub fn degree_of(&self, pitch: &JustPitch) -> Option<usize> {
        let class = self.tonic.interval_to(pitch).normalize();
        self.degrees.iter().position(|d| *d == class)
    }

    pub fn contains(&self, pitch: &JustPitch) -> bool {
        self.pitch_to_scale_index(pitch).is_some()
    }
}

/// A performer's instrument as seen by the entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Tag of the instrument's stream in the timeline.
    pub name: String,
    pub short_name: String,
    pub pitched: bool,
    /// Lowest and highest playable pitch (pitched instruments only).
    pub ambitus: Option<(JustPitch, JustPitch)>,
    /// Upper bound of simultaneously sounding pitches.
    pub max_simultaneous: usize,
    /// Open strings, for instruments that can play natural harmonics.
    pub strings: Vec<JustPitch>,
    pub midi_program: u8,
}

impl Instrument {
    pub fn pitched(name: &str, short_name: &str, low: JustPitch, high: JustPitch) -> Self {
        Instrument {
            name: name.to_string(),
            short_name: short_name.to_string(),
            pitched: true,
            ambitus: Some((low, high)),
            max_simultaneous: 1,
            strings: Vec::new(),
            midi_program: 0,
        }
    }

    pub fn unpitched(name: &str, short_name: &str) -> Self {
        Instrument {
            name: name.to_string(),
            short_name: short_name.to_string(),
            pitched: false,
            ambitus: None,
            max_simultaneous: 0,
            strings: Vec::new(),
            midi_program: 115,
        }
    }

    pub fn with_polyphony(mut self, max_simultaneous: usize) -> Self {
        self.max_simultaneous = max_simultaneous;
        self
    }

    pub fn with_strings(mut self, strings: Vec<JustPitch>) -> Self {
        self.strings = strings;
        self
    }

    pub fn with_program(mut self, program: u8) -> Self {
        self.midi_program = program;
        self
    }

    pub fn contains(&self, pitch: &JustPitch) -> bool {
        match self.ambitus {
            Some((low, high)) => self.pitched && *pitch >= low && *pitch <= high,
            None => false,
        }
    }

    /// Every octave register of `pitch`'s class that the instrument can
    /// play, ascending.
    pub fn pitch_variants(&self, pitch: &JustPitch) -> Vec<JustPitch> {
        let Some((low, high)) = self.ambitus else {
            return Vec::new();
        };
        (low.octave()..=high.octave())
            .map(|octave| pitch.register(octave))
            .filter(|p| self.contains(p))
            .collect()
    }

    /// Natural harmonics sounding `pitch`'s class: (sounding pitch, open
    /// string, partial number), for partials 2 to 5.
    pub fn harmonic_variants(&self, pitch: &JustPitch) -> Vec<(JustPitch, JustPitch, i64)> {
        let mut found = Vec::new();
        for string in &self.strings {
            for partial in 2..=5 {
                let sounding = *string + JustPitch::new(partial, 1);
                if sounding.same_class(pitch) {
                    found.push((sounding, *string, partial));
                }
            }
        }
        found.sort();
        found
    }
}

/// The ordered set of instruments playing at some point of the piece.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orchestration(pub Vec<Instrument>);

impl Orchestration {
    pub fn get(&self, name: &str) -> Option<&Instrument> {
        self.0.iter().find(|i| i.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.0.iter()
    }

    pub fn only(&self, name: &str) -> Orchestration {
        Orchestration(self.0.iter().filter(|i| i.name == name).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: i64, d: i64) -> JustPitch {
        JustPitch::new(n, d)
    }

    #[test]
    fn octave_and_normalize() {
        assert_eq!(p(3, 2).octave(), 0);
        assert_eq!(p(3, 1).octave(), 1);
        assert_eq!(p(3, 8).octave(), -2);
        assert_eq!(p(3, 1).normalize(), p(3, 2));
        assert_eq!(p(3, 8).normalize(), p(3, 2));
        assert_eq!(p(3, 2).register(-1), p(3, 4));
    }

    #[test]
    fn interval_arithmetic() {
        assert_eq!(p(3, 2) + p(5, 4), p(15, 8));
        assert_eq!(p(3, 2) - p(2, 1), p(3, 4));
        assert_eq!(p(1, 1).interval_to(&p(3, 2)), p(3, 2));
        assert!((p(2, 1).cents() - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn harmonicity_ranks_simple_ratios_higher() {
        assert_eq!(p(1, 1).harmonicity(), 1.0);
        assert!(p(3, 2).harmonicity() > p(5, 4).harmonicity());
        assert!(p(5, 4).harmonicity() > p(7, 4).harmonicity());
        assert!((indigestibility(2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn parse_ratios() {
        assert_eq!("3/2".parse::<JustPitch>(), Ok(p(3, 2)));
        assert_eq!("2".parse::<JustPitch>(), Ok(p(2, 1)));
        assert!("0/1".parse::<JustPitch>().is_err());
        assert!("x/2".parse::<JustPitch>().is_err());
    }

    #[test]
    fn scale_indexing() {
        let scale = Scale::new(p(1, 1), &[p(1, 1), p(9, 8), p(5, 4), p(3, 2), p(5, 3)], p(1, 1), p(4, 1));
        assert_eq!(scale.pitches().len(), 11);
        assert_eq!(scale.pitch_to_scale_index(&p(3, 2)), Some(3));
        assert_eq!(scale.scale_index_to_pitch(5), Some(p(2, 1)));
        assert_eq!(scale.scale_index_to_pitch(-1), None);
        assert_eq!(scale.scale_position_to_pitch(1, 1), p(9, 4));
        assert_eq!(scale.degree_of(&p(5, 2)), Some(2));
        assert_eq!(scale.degree_of(&p(7, 4)), None);
    }

    #[test]
    fn instrument_variants() {
        let harp = Instrument::pitched("harp", "hp", p(1, 4), p(4, 1));
        let variants = harp.pitch_variants(&p(3, 2));
        assert_eq!(variants, vec![p(3, 8), p(3, 4), p(3, 2), p(3, 1)]);
        assert!(!Instrument::unpitched("c0", "c0").contains(&p(1, 1)));
    }

    #[test]
    fn harmonic_variants_match_pitch_class() {
        let v = Instrument::pitched("v", "v", p(1, 4), p(4, 1)).with_strings(vec![p(1, 2), p(3, 4)]);
        let found = v.harmonic_variants(&p(3, 2));
        // 1/2 * 3 = 3/2 and 3/4 * 2 = 3/2, 3/4 * 4 = 3/1
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|(s, _, _)| s.same_class(&p(3, 2))));
    }
}
