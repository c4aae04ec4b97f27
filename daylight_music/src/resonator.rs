// Resonance filters for the speaker resonators.
//
// Every page of the piece gets three resonator configurations, one per
// speaker. Each configuration is a small bank of resonance filters tuned to
// pitches of the page's scale, accented by the pitch's function in the
// scale: the root loudest and longest, the pitch most harmonic to it next,
// the rest softer and shorter in order of harmonicity to that dyad.
//
// The DSP side reads a plain text file with one filter per line:
//
//     <index>, <frequency> <amplitude> <decay_rate>;
//
// where the index is 1-based. Entries can also attach `ResonatorTuple`s to
// their placements; those are exported as JSON next to the page.

use crate::error::ResonatorError;
use crate::pitch::{JustPitch, Scale};
use daylight_prng::ContextRng;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const SPEAKER_COUNT: usize = 3;

/// Per-speaker chord layouts: `(octave, pitch function)` pairs. The root
/// appears in every octave pair, function 1 in every second octave, the
/// other functions once, and the three layouts interlock.
const CHORDS: [[(i32, usize); 4]; SPEAKER_COUNT] = [
    [(-2, 0), (0, 1), (1, 0), (3, 2)],
    [(-2, 1), (-1, 0), (1, 3), (2, 0)],
    [(-1, 4), (0, 0), (2, 1), (3, 0)],
];

/// Speaker-to-chord assignments, cycled through page by page.
const CHORD_ORDERS: [[usize; SPEAKER_COUNT]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

const FUNCTION_DECIBEL: [f64; 5] = [0.0, -6.0, -14.0, -19.0, -25.0];
const FUNCTION_DECAY: [f64; 5] = [0.6, 0.25, 0.125, 0.11, 0.1];

fn octave_decibel(octave: i32) -> f64 {
    match octave {
        i32::MIN..=-2 => -12.0,
        -1 => -6.0,
        _ => 0.0,
    }
}

fn octave_decay_factor(octave: i32) -> f64 {
    match octave {
        i32::MIN..=-2 => 0.25,
        -1 => 0.5,
        0 => 0.75,
        1 | 2 => 1.0,
        _ => 0.75,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResonanceFilter {
    pub frequency: f64,
    pub amplitude: f64,
    pub decay: f64,
}

impl Default for ResonanceFilter {
    fn default() -> Self {
        ResonanceFilter {
            frequency: 440.0,
            amplitude: 1.0,
            decay: 0.5,
        }
    }
}

/// One resonator cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resonator {
    /// Absolute delay in seconds.
    pub delay: f64,
    /// Harmonizer transposition factors.
    pub pitch_factors: Vec<f64>,
    /// Pitches that excite the resonator when played.
    pub resonating_pitches: Vec<JustPitch>,
    pub filters: Vec<ResonanceFilter>,
}

impl Resonator {
    /// A resonator tuned to `pitches`, each filter 6 dB softer and shorter
    /// than the one before.
    pub fn from_pitches(delay: f64, pitches: &[JustPitch], concert_pitch: f64) -> Self {
        let filters = pitches
            .iter()
            .enumerate()
            .map(|(i, p)| ResonanceFilter {
                frequency: p.frequency(concert_pitch),
                amplitude: decibel_to_amplitude(-6.0 * i as f64),
                decay: FUNCTION_DECAY[i.min(FUNCTION_DECAY.len() - 1)],
            })
            .collect();
        Resonator {
            delay,
            pitch_factors: vec![1.0],
            resonating_pitches: pitches.to_vec(),
            filters,
        }
    }
}

/// All resonators playing during one cue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResonatorTuple(pub Vec<Resonator>);

pub fn decibel_to_amplitude(decibel: f64) -> f64 {
    10f64.powf(decibel / 20.0)
}

/// Scale degrees ordered by function: the root, the degree most harmonic
/// to it, then the others by their summed harmonicity to that dyad.
pub fn pitch_function_order(scale: &Scale) -> Vec<usize> {
    let degree_count = scale.len_per_period();
    if degree_count == 0 {
        return Vec::new();
    }
    let root = scale.scale_position_to_pitch(0, 0);
    let harmonicity = |a: JustPitch, b: JustPitch| (a - b).normalize().harmonicity();
    let mut others: Vec<(usize, JustPitch)> = (1..degree_count)
        .map(|n| (n, scale.scale_position_to_pitch(n, 0)))
        .collect();
    let mut order = vec![0];
    let champion = others
        .iter()
        .enumerate()
        .fold(None::<(usize, f64)>, |best, (i, (_, p))| {
            let f = harmonicity(root, *p);
            match best {
                Some((_, bf)) if bf >= f => best,
                _ => Some((i, f)),
            }
        });
    let Some((champion, _)) = champion else {
        return order;
    };
    let (partner_degree, partner) = others.remove(champion);
    order.push(partner_degree);
    let mut rest: Vec<(usize, f64)> = others
        .into_iter()
        .map(|(n, p)| (n, harmonicity(p, root) + harmonicity(p, partner)))
        .collect();
    rest.sort_by(|a, b| b.1.total_cmp(&a.1));
    order.extend(rest.into_iter().map(|(n, _)| n));
    order
}

/// The filter banks of the three speakers for page `page`.
pub fn make_speaker_resonators(
    scale: &Scale,
    page: usize,
    concert_pitch: f64,
    rng: &mut ContextRng,
) -> Vec<Vec<ResonanceFilter>> {
    let order = pitch_function_order(scale);
    if order.is_empty() {
        return vec![Vec::new(); SPEAKER_COUNT];
    }
    let chord_order = CHORD_ORDERS[page % CHORD_ORDERS.len()];
    chord_order
        .iter()
        .map(|&chord_index| {
            CHORDS[chord_index]
                .iter()
                .map(|&(octave, function)| {
                    let degree = order[function % order.len()];
                    let pitch = scale.scale_position_to_pitch(degree, octave);
                    let function = function.min(FUNCTION_DECIBEL.len() - 1);
                    ResonanceFilter {
                        frequency: pitch.frequency(concert_pitch),
                        amplitude: decibel_to_amplitude(
                            FUNCTION_DECIBEL[function] + octave_decibel(octave),
                        ),
                        decay: FUNCTION_DECAY[function]
                            * rng.range_f64(0.9, 1.1)
                            * octave_decay_factor(octave),
                    }
                })
                .collect()
        })
        .collect()
}

/// Render filters in the DSP text format.
pub fn filters_to_text(filters: &[ResonanceFilter]) -> String {
    let mut out = String::new();
    for (i, f) in filters.iter().enumerate() {
        let _ = writeln!(out, "{}, {} {} {};", i + 1, f.frequency, f.amplitude, f.decay);
    }
    out
}

/// Parse the DSP text format. Blank lines are ignored; indices must count
/// up from 1.
pub fn parse_filters(text: &str) -> Result<Vec<ResonanceFilter>, ResonatorError> {
    let mut filters = Vec::new();
    for (line_index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let parse_error = |message: &str| ResonatorError::Parse {
            line: line_index + 1,
            message: message.to_string(),
        };
        let body = line
            .strip_suffix(';')
            .ok_or_else(|| parse_error("missing ';'"))?;
        let (index, values) = body
            .split_once(',')
            .ok_or_else(|| parse_error("missing ','"))?;
        let index: usize = index
            .trim()
            .parse()
            .map_err(|_| parse_error("bad index"))?;
        if index != filters.len() + 1 {
            return Err(parse_error("indices must count up from 1"));
        }
        let numbers: Vec<f64> = values
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| parse_error("bad number"))?;
        let [frequency, amplitude, decay] = numbers[..] else {
            return Err(parse_error("expected frequency, amplitude and decay"));
        };
        filters.push(ResonanceFilter {
            frequency,
            amplitude,
            decay,
        });
    }
    Ok(filters)
}

/// Write `r_<page>_<speaker>.txt` for each speaker into `dir`.
pub fn write_page_resonators(
    dir: &Path,
    page: usize,
    speakers: &[Vec<ResonanceFilter>],
) -> Result<Vec<PathBuf>, ResonatorError> {
    let mut paths = Vec::with_capacity(speakers.len());
    for (speaker, filters) in speakers.iter().enumerate() {
        let path = dir.join(format!("r_{page}_{speaker}.txt"));
        std::fs::write(&path, filters_to_text(filters))?;
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: i64, d: i64) -> JustPitch {
        JustPitch::new(n, d)
    }

    fn scale() -> Scale {
        Scale::pentatonic([p(1, 1), p(9, 8), p(4, 3), p(3, 2), p(27, 16)])
    }

    #[test]
    fn function_order_puts_fifth_after_root() {
        let order = pitch_function_order(&scale());
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], 0);
        // 1/1 over 4/3 folds to a fifth, the simplest interval available.
        assert_eq!(order[1], 2);
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn decibels() {
        assert_eq!(decibel_to_amplitude(0.0), 1.0);
        assert!((decibel_to_amplitude(-6.0) - 0.501).abs() < 1e-3);
    }

    #[test]
    fn speakers_interlock() {
        let mut rng = ContextRng::new(100);
        let speakers = make_speaker_resonators(&scale(), 0, 442.0, &mut rng);
        assert_eq!(speakers.len(), SPEAKER_COUNT);
        assert!(speakers.iter().all(|s| s.len() == 4));
        // Page 0 gives speaker 0 the first chord: root two octaves down.
        assert!((speakers[0][0].frequency - 442.0 / 4.0).abs() < 1e-9);
        assert!((speakers[0][0].amplitude - decibel_to_amplitude(-12.0)).abs() < 1e-12);
        let decay = speakers[0][0].decay;
        assert!((0.6 * 0.9 * 0.25..=0.6 * 1.1 * 0.25).contains(&decay));

        let mut rng = ContextRng::new(100);
        let page1 = make_speaker_resonators(&scale(), 1, 442.0, &mut rng);
        assert_eq!(page1[0][0].frequency, speakers[0][0].frequency);
        assert_eq!(page1[1][0].frequency, speakers[2][0].frequency);
    }

    #[test]
    fn text_format_roundtrip() {
        let filters = vec![
            ResonanceFilter {
                frequency: 110.5,
                amplitude: 0.25,
                decay: 0.15,
            },
            ResonanceFilter::default(),
        ];
        let text = filters_to_text(&filters);
        assert!(text.starts_with("1, 110.5 0.25 0.15;\n"));
        assert_eq!(parse_filters(&text).unwrap(), filters);
    }

    #[test]
    fn parse_errors_name_the_line() {
        let err = parse_filters("1, 440 1 0.5;\n3, 220 1 0.5;\n").unwrap_err();
        assert!(matches!(err, ResonatorError::Parse { line: 2, .. }));
        assert!(parse_filters("1, 440 1;").is_err());
        assert!(parse_filters("1, 440 1 0.5").is_err());
    }

    #[test]
    fn write_page_files() {
        let dir = tempfile::tempdir().unwrap();
        let speakers = vec![vec![ResonanceFilter::default()]; SPEAKER_COUNT];
        let paths = write_page_resonators(dir.path(), 4, &speakers).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths[2].ends_with("r_4_2.txt"));
        let text = std::fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(parse_filters(&text).unwrap().len(), 1);
    }
}
