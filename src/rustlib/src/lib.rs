pub mod bindings;
pub mod config;
pub mod error;
pub mod local;
pub mod processing;
pub mod sources;
pub mod utils;

pub use config::{load_config, save_config, Config, SpikeChannelConfig};
pub use error::{Result, SpikeError};
pub use processing::detector::SpikeDetector;
pub use processing::spike::{Spike, SpikeSink};
pub use processing::spike_channel::{SpikeChannel, SpikeChannelId, SpikeChannelType, ThresholdDirection};
pub use processing::{DataStream, StreamBlock, StreamProcessor};
