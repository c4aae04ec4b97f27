// Daylight page generator: CLI entry point.
//
// Plans each page's modal form, resolves every context of the structure tree
// against the default entry registry, composes the results and writes MIDI,
// speaker resonators and resonator cues per page.
//
// Usage:
//   cargo run -p daylight_music --bin generate -- [--config daylight.json]
//     [--seed N] [--pages N] [--events N] [--tempo BPM] [--out DIR]
//     [--diary diary.json]
//
// Flags override values from the config file. Set RUST_LOG=debug to see
// every resolution.

use daylight_music::config::GenerationConfig;
use daylight_music::entries::default_registry;
use daylight_music::render::render_pages;
use env_logger::Env;
use log::{error, info};

fn run(args: &[String]) -> daylight_music::Result<()> {
    let config = GenerationConfig::from_args(args)?;
    let registry = default_registry()?;
    info!(
        "seed {}: {} pages of {} modal events, {} entries registered",
        config.seed,
        config.pages,
        config.events,
        registry.len()
    );
    let files = render_pages(&registry, &config)?;
    info!("wrote {} files to {}", files.len(), config.out.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}
