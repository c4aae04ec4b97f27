// Generation settings.
//
// Everything the `generate` binary can tune lives in `GenerationConfig`,
// loaded from an optional JSON file and then overridden by command-line
// flags. The engine never reads the environment: the binary builds a config
// and passes the pieces (resolver settings, composer policy, form plan) down.
//
// Output is a pure function of the config. Two runs with the same config
// write byte-identical files, whatever the number of render threads.
//
// See also: `render.rs` which consumes the config, `main.rs` for the flags.

use crate::entries::DEFAULT_CONCERT_PITCH;
use crate::error::{DaylightError, Result};
use crate::pitch::{JustPitch, Scale};
use crate::placement::OverlapPolicy;
use crate::resolve::{ResolverConfig, TieBreak};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Root seed; every PRNG stream of the run derives from it.
    pub seed: u64,
    pub pages: usize,
    /// Modal events per page.
    pub events: usize,
    pub tie_break: TieBreak,
    pub overlap: OverlapPolicy,
    /// Frequency of 1/1 in Hz.
    pub concert_pitch: f64,
    /// Quarter notes per minute in the MIDI files.
    pub tempo: u16,
    pub out: PathBuf,
    /// JSON diary of every resolution; replayed when it already exists.
    pub diary: Option<PathBuf>,
    /// The five degrees of the pentatonic scale, as ratios (`"9/8"`).
    pub scale: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            seed: 0,
            pages: 1,
            events: 8,
            tie_break: TieBreak::FirstRegistered,
            overlap: OverlapPolicy::FavorEarlier,
            concert_pitch: DEFAULT_CONCERT_PITCH,
            tempo: 60,
            out: PathBuf::from("out"),
            diary: None,
            scale: ["1/1", "9/8", "4/3", "3/2", "27/16"].map(String::from).to_vec(),
        }
    }
}

impl GenerationConfig {
    /// Read a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(GenerationConfig::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The config named by `--config` (if any), overridden by the other
    /// flags in `args`.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = match parse_flag::<PathBuf>(args, "--config") {
            Some(path) => GenerationConfig::load(&path)?,
            None => GenerationConfig::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &[String]) {
        if let Some(seed) = parse_flag(args, "--seed") {
            self.seed = seed;
        }
        if let Some(pages) = parse_flag(args, "--pages") {
            self.pages = pages;
        }
        if let Some(events) = parse_flag(args, "--events") {
            self.events = events;
        }
        if let Some(tempo) = parse_flag(args, "--tempo") {
            self.tempo = tempo;
        }
        if let Some(out) = parse_flag(args, "--out") {
            self.out = out;
        }
        if let Some(diary) = parse_flag(args, "--diary") {
            self.diary = Some(diary);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.events == 0 {
            return Err(DaylightError::Config("a page needs at least one modal event".into()));
        }
        if self.tempo == 0 {
            return Err(DaylightError::Config("tempo must be positive".into()));
        }
        if self.concert_pitch.is_nan() || self.concert_pitch <= 0.0 {
            return Err(DaylightError::Config(format!(
                "concert pitch {} is not a frequency",
                self.concert_pitch
            )));
        }
        self.scale().map(|_| ())
    }

    pub fn scale(&self) -> Result<Scale> {
        let degrees = self
            .scale
            .iter()
            .map(|d| JustPitch::from_str(d).map_err(|e| DaylightError::Config(format!("scale degree '{d}': {e}"))))
            .collect::<Result<Vec<_>>>()?;
        let degrees: [JustPitch; 5] = degrees
            .try_into()
            .map_err(|d: Vec<JustPitch>| DaylightError::Config(format!("the scale needs 5 degrees, got {}", d.len())))?;
        Ok(Scale::pentatonic(degrees))
    }

    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            seed: self.seed,
            tie_break: self.tie_break,
            ..ResolverConfig::default()
        }
    }
}

/// The value following `flag` in `args`, if present and parseable.
pub fn parse_flag<T: FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
