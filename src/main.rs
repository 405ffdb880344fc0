mod analysis;
mod audio;
mod cache;
mod cli;
mod config;
mod planner;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use analysis::{onset, TrackAnalysis};
use cli::Cli;
use planner::{populate, CommandSink, EditBatch, PopulateOptions};

/// Command sink for the CLI path: there is no document to mutate, so the
/// forward batch is only logged.
#[derive(Default)]
struct LoggingSink;

impl CommandSink for LoggingSink {
    fn submit(&mut self, forward: EditBatch, _backward: EditBatch) {
        log::info!("command: {} ({} edits)", forward.label, forward.edits.len());
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect autocue.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = std::path::PathBuf::from("autocue.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("autocue").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.window == 42 { cli.window = cfg.analysis.window; }
            if cli.band_offset == 0 { cli.band_offset = cfg.analysis.band_offset; }
            if cli.band_count == 16 { cli.band_count = cfg.analysis.band_count; }
            if cli.cue_length == 500.0 { cli.cue_length = cfg.cues.length_ms; }
            if cli.lead_in == 0.0 { cli.lead_in = cfg.cues.lead_in_ms; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("autocue - onset-driven cue placement");
    log::info!("Input: {}", input.display());
    log::info!(
        "Window: {}, bands: [{}, {})",
        cli.window,
        cli.band_offset,
        cli.band_offset + cli.band_count
    );

    // 1. Decode audio
    log::info!("Decoding audio...");
    let source = audio::decode::decode_audio(input)?;

    // 2. Run the analysis pipeline (sample, spectral, and subband caches)
    let track = TrackAnalysis::new(Box::new(source), cli.window)?;
    let duration_ms = track.duration_ms();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg} ({elapsed})")
            .unwrap(),
    );
    spinner.set_message("Analyzing audio...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let series = track.contrast_series()?;
    spinner.finish_with_message("Analysis complete");

    // 3. Detect onset candidates over the selected band range
    let candidates = onset::detect(&series, cli.band_offset, cli.band_count, duration_ms);
    log::info!("{} onset candidates above threshold", candidates.len());

    // 4. Populate a fresh track, strongest onsets first
    let options = PopulateOptions {
        length_ms: cli.cue_length,
        lead_in_ms: cli.lead_in,
        max_cues: cli.max_cues,
    };
    let mut sink = LoggingSink::default();
    let mut next_id = 1;
    let mut cues = populate(&[], &candidates, &options, &mut next_id, &mut sink);
    cues.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));

    // 5. Print placements
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&cues)?);
    } else {
        println!("{:<6} {:>12} {:>12} {:>10}", "cue", "start", "length", "lead-in");
        for cue in &cues {
            println!(
                "{:<6} {:>10.1}ms {:>10.1}ms {:>8.1}ms",
                cue.id.0, cue.start_ms, cue.length_ms, cue.lead_in_ms
            );
        }
    }

    log::info!(
        "Done: {} cues placed over {:.1}s",
        cues.len(),
        duration_ms / 1000.0
    );
    Ok(())
}
