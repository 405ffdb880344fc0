use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub cues: CueConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_band_offset")]
    pub band_offset: usize,
    #[serde(default = "default_band_count")]
    pub band_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct CueConfig {
    #[serde(default = "default_cue_length")]
    pub length_ms: f64,
    #[serde(default = "default_lead_in")]
    pub lead_in_ms: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            band_offset: default_band_offset(),
            band_count: default_band_count(),
        }
    }
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            length_ms: default_cue_length(),
            lead_in_ms: default_lead_in(),
        }
    }
}

fn default_window() -> usize { 42 }
fn default_band_offset() -> usize { 0 }
fn default_band_count() -> usize { 16 }
fn default_cue_length() -> f64 { 500.0 }
fn default_lead_in() -> f64 { 0.0 }

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}
