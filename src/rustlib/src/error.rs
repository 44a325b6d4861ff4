use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpikeError {
    #[error("{channel_type} spike channel needs {expected} source channels, got {found}")]
    ChannelCountMismatch {
        channel_type: String,
        expected: usize,
        found: usize,
    },

    #[error("Source channel {0} does not belong to any data stream")]
    UnknownSourceChannel(usize),

    #[error("Spike channel '{0}' groups channels from more than one stream")]
    MixedStreams(String),

    #[error("Unknown spike channel id: {0}")]
    UnknownSpikeChannel(u32),

    #[error("Channel index {index} out of range for a group of {count}")]
    ChannelIndexOutOfRange { index: usize, count: usize },

    #[error("Invalid waveform window: {0}")]
    InvalidWindow(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid recording: {0}")]
    InvalidRecording(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SpikeError>;
