// Page generation and parallel rendering.
//
// A page is independent of every other page: its form walk, its contexts and
// all PRNG streams derive from the root seed and the page number only. Pages
// therefore render on rayon's pool, one page per task, each writing its own
// files:
//
//   page_<n>.mid             the composed page
//   r_<n>_<speaker>.txt      speaker resonator filters (DSP text format)
//   page_<n>_cues.json       resonator cues attached by entries
//
// Resolutions are journaled per page into a private diary and merged into
// the run's JSON diary (if configured) once every page has finished, in page
// order. An existing diary is replayed instead of resolving again.
//
// See also: `config.rs` for the settings, `form.rs` for the page plan,
// `tree.rs` for the walker.

use crate::config::GenerationConfig;
use crate::diary::{JsonDiary, MemoryDiary};
use crate::error::Result;
use crate::form::{FormEvent, FormPlan, plan_page};
use crate::midi::{MidiSettings, write_midi};
use crate::pitch::Scale;
use crate::placement::Composer;
use crate::registry::Registry;
use crate::resolve::Resolver;
use crate::resonator::{ResonanceFilter, make_speaker_resonators, write_page_resonators};
use crate::tree::{Composed, TreeWalker};
use daylight_prng::ContextRng;
use log::info;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Everything generated for one page.
#[derive(Debug)]
pub struct Page {
    pub index: usize,
    pub events: Vec<FormEvent>,
    pub composed: Composed,
    pub speakers: Vec<Vec<ResonanceFilter>>,
    /// Resolutions made (or replayed) for this page.
    pub diary: MemoryDiary,
}

/// Plan, resolve and compose page `index`. With `replay`, recorded
/// resolutions are reused.
pub fn generate_page(
    registry: &Registry,
    config: &GenerationConfig,
    plan: &FormPlan,
    scale: &Scale,
    index: usize,
    replay: Option<&MemoryDiary>,
) -> Result<Page> {
    let (events, tree) = plan_page(index, scale, config.events, plan, config.seed)?;
    let total = events.last().map(|e| e.end);
    let resolver = Resolver::new(registry, config.resolver());
    let mut diary = replay.cloned().unwrap_or_default();
    let composed = TreeWalker::new(&resolver)
        .with_diary(&mut diary, replay.is_some())
        .compose(&tree, &Composer::new(config.overlap), total)?;
    let mut rng = ContextRng::derive(config.seed, &format!("page{index}/resonators"));
    let speakers = make_speaker_resonators(scale, index, config.concert_pitch, &mut rng);
    Ok(Page {
        index,
        events,
        composed,
        speakers,
        diary,
    })
}

/// Write the files of `page` into `dir`.
pub fn write_page(page: &Page, dir: &Path, plan: &FormPlan, config: &GenerationConfig) -> Result<Vec<PathBuf>> {
    let midi_path = dir.join(format!("page_{}.mid", page.index));
    let settings = MidiSettings {
        tempo: config.tempo,
        concert_pitch: config.concert_pitch,
    };
    write_midi(&page.composed.event, &plan.orchestration, settings, &midi_path)?;

    let mut paths = vec![midi_path];
    paths.extend(write_page_resonators(dir, page.index, &page.speakers)?);

    let cues_path = dir.join(format!("page_{}_cues.json", page.index));
    std::fs::write(&cues_path, serde_json::to_string_pretty(&page.composed.resonators)?)?;
    paths.push(cues_path);
    Ok(paths)
}

/// Generate and write every page of `config`; returns the written files in
/// page order.
pub fn render_pages(registry: &Registry, config: &GenerationConfig) -> Result<Vec<PathBuf>> {
    let scale = config.scale()?;
    let plan = FormPlan::default();
    std::fs::create_dir_all(&config.out)?;
    let mut journal = config.diary.as_deref().map(JsonDiary::load).transpose()?;
    let replay = journal.as_ref().filter(|j| !j.is_empty()).map(JsonDiary::memory);

    let rendered: Vec<Result<(Vec<PathBuf>, MemoryDiary)>> = (0..config.pages)
        .into_par_iter()
        .map(|index| {
            let page = generate_page(registry, config, &plan, &scale, index, replay)?;
            let paths = write_page(&page, &config.out, &plan, config)?;
            info!(
                "page {index}: {} modal events, {} beats, {} files",
                page.events.len(),
                page.composed.event.duration(),
                paths.len()
            );
            Ok((paths, page.diary))
        })
        .collect();

    let mut files = Vec::new();
    let mut diaries = Vec::with_capacity(rendered.len());
    for result in rendered {
        let (paths, diary) = result?;
        files.extend(paths);
        diaries.push(diary);
    }
    if let Some(journal) = journal.as_mut() {
        for diary in diaries {
            journal.merge(diary);
        }
        journal.save()?;
        info!("diary holds {} resolutions", journal.len());
    }
    Ok(files)
}
