// src/rustlib/src/config/mod.rs
use crate::error::Result;
use crate::processing::overflow::DEFAULT_OVERFLOW_SAMPLES;
use crate::processing::spike_channel::{SpikeChannelType, ThresholdDirection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_THRESHOLD: f32 = -50.0;
pub const DEFAULT_PRE_PEAK_SAMPLES: usize = 8;
pub const DEFAULT_POST_PEAK_SAMPLES: usize = 32;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            block_size: default_block_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct FiltersConfig {
    #[serde(default)]
    pub bandpass_filters: Vec<BandpassFilterConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BandpassFilterConfig {
    pub id: String,
    pub f_low: f64,
    pub f_high: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectorConfig {
    #[serde(default = "default_overflow_samples")]
    pub overflow_samples: usize,
    #[serde(default)]
    pub spike_channels: Vec<SpikeChannelConfig>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            overflow_samples: default_overflow_samples(),
            spike_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpikeChannelConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub channel_type: SpikeChannelType,
    pub source_channels: Vec<usize>,
    #[serde(default = "default_pre_peak_samples")]
    pub pre_peak_samples: usize,
    #[serde(default = "default_post_peak_samples")]
    pub post_peak_samples: usize,
    #[serde(default = "default_true")]
    pub send_full_waveform: bool,
    /// One per source channel. Empty means every channel uses the default.
    #[serde(default)]
    pub thresholds: Vec<f32>,
    #[serde(default)]
    pub detection_enabled: Vec<bool>,
    #[serde(default)]
    pub direction: ThresholdDirection,
}

impl SpikeChannelConfig {
    /// Default geometry and thresholds for a group of source channels.
    pub fn new(channel_type: SpikeChannelType, source_channels: Vec<usize>) -> Self {
        Self {
            name: None,
            description: None,
            channel_type,
            source_channels,
            pre_peak_samples: DEFAULT_PRE_PEAK_SAMPLES,
            post_peak_samples: DEFAULT_POST_PEAK_SAMPLES,
            send_full_waveform: true,
            thresholds: Vec::new(),
            detection_enabled: Vec::new(),
            direction: ThresholdDirection::default(),
        }
    }
}

fn default_block_size() -> usize {
    1024
}

fn default_overflow_samples() -> usize {
    DEFAULT_OVERFLOW_SAMPLES
}

fn default_pre_peak_samples() -> usize {
    DEFAULT_PRE_PEAK_SAMPLES
}

fn default_post_peak_samples() -> usize {
    DEFAULT_POST_PEAK_SAMPLES
}

fn default_true() -> bool {
    true
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&config_str)?)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}
