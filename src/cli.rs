use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "autocue", about = "Onset-driven cue marker placement for audio-synced shows")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: Option<PathBuf>,

    /// Config file path (defaults to autocue.toml / user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sliding window size for the subband contrast transform
    #[arg(long, default_value_t = crate::analysis::DEFAULT_WINDOW)]
    pub window: usize,

    /// First subband of the detection range
    #[arg(long, default_value_t = 0)]
    pub band_offset: usize,

    /// Number of subbands to aggregate for onset detection
    #[arg(long, default_value_t = 16)]
    pub band_count: usize,

    /// Length of each placed cue in milliseconds
    #[arg(long, default_value_t = 500.0)]
    pub cue_length: f64,

    /// Lead-in before each cue's start in milliseconds
    #[arg(long, default_value_t = 0.0)]
    pub lead_in: f64,

    /// Cap on the number of cues to place
    #[arg(long)]
    pub max_cues: Option<usize>,

    /// Print placed cues as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
