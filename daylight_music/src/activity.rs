// Deterministic density decisions.
//
// `ActivityLevel` answers "should this happen now?" for a level from 0
// (never) to 10 (always). Level n answers yes exactly n times in every run
// of ten calls at that level, spread evenly by a Euclidean pattern. The
// pattern is rotated between runs so repeated use does not lock onto the
// same grid positions. No randomness is involved; the rotation offset is
// the only seed.

/// Evenly distribute `hits` onsets over `steps` (Bresenham form of
/// Bjorklund's algorithm). The first step is an onset whenever `hits > 0`.
pub fn euclidean(hits: usize, steps: usize) -> Vec<bool> {
    if steps == 0 {
        return Vec::new();
    }
    let hits = hits.min(steps);
    (0..steps).map(|i| (i * hits) % steps < hits).collect()
}

const STEPS: usize = 10;
const ROTATION_STRIDE: usize = 3;

#[derive(Debug, Clone)]
pub struct ActivityLevel {
    offset: usize,
    counters: [usize; STEPS + 1],
}

impl ActivityLevel {
    pub fn new(offset: usize) -> Self {
        ActivityLevel {
            offset,
            counters: [0; STEPS + 1],
        }
    }

    /// Next decision for `level` (values above 10 act as 10).
    pub fn call(&mut self, level: usize) -> bool {
        let level = level.min(STEPS);
        let count = self.counters[level];
        self.counters[level] += 1;
        let cycle = count / STEPS;
        let rotation = (self.offset + cycle * ROTATION_STRIDE) % STEPS;
        let step = (count % STEPS + rotation) % STEPS;
        euclidean(level, STEPS)[step]
    }
}

impl Default for ActivityLevel {
    fn default() -> Self {
        ActivityLevel::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_counts_and_spacing() {
        assert_eq!(euclidean(0, 4), vec![false; 4]);
        assert_eq!(euclidean(4, 4), vec![true; 4]);
        assert_eq!(euclidean(2, 4), vec![true, false, true, false]);
        let tresillo = euclidean(3, 8);
        assert_eq!(tresillo.iter().filter(|b| **b).count(), 3);
        assert!(tresillo[0]);
        assert!(euclidean(3, 0).is_empty());
    }

    #[test]
    fn levels_hit_exactly_n_in_ten() {
        for level in 0..=10 {
            let mut a = ActivityLevel::new(4);
            for _ in 0..5 {
                let hits = (0..10).filter(|_| a.call(level)).count();
                assert_eq!(hits, level);
            }
        }
    }

    #[test]
    fn same_offset_same_answers() {
        let mut a = ActivityLevel::new(2);
        let mut b = ActivityLevel::new(2);
        for i in 0..100 {
            assert_eq!(a.call(i % 11), b.call(i % 11));
        }
    }

    #[test]
    fn oversized_levels_saturate() {
        let mut a = ActivityLevel::default();
        assert!((0..20).all(|_| a.call(42)));
    }
}
