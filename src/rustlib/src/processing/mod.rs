pub mod accessor;
pub mod detector;
pub mod filters;
pub mod overflow;
pub mod sample_buffer;
pub mod signal_processor;
pub mod spike;
pub mod spike_channel;

use crate::error::Result;
use sample_buffer::SampleBuffer;
use serde::{Deserialize, Serialize};
use spike::SpikeSink;

// STREAMS ---------------------------------------------------------------------

/// One continuous multi-channel source with its own clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStream {
    pub id: u16,
    pub name: String,
    pub sample_rate: f32,
    /// Global indexes of this stream's channels in the shared sample buffer.
    pub channels: Vec<usize>,
}

impl DataStream {
    pub fn new(id: u16, name: &str, sample_rate: f32, channels: Vec<usize>) -> Self {
        Self {
            id,
            name: name.to_string(),
            sample_rate,
            channels,
        }
    }
}

/// What one stream delivered in the current processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBlock {
    pub stream_id: u16,
    pub num_samples: usize,
    /// Timestamp of the first sample of this block.
    pub source_timestamp: i64,
}

/// Total input channel count implied by a set of streams.
pub fn total_channel_count(streams: &[DataStream]) -> usize {
    streams
        .iter()
        .flat_map(|s| s.channels.iter())
        .map(|&c| c + 1)
        .max()
        .unwrap_or(0)
}

// PROCESSOR INTERFACE ---------------------------------------------------------

pub trait StreamProcessor: Send {
    fn name(&self) -> &str;

    /// Called whenever the set of streams or channels changes, never while
    /// acquisition is running.
    fn update_settings(&mut self, streams: &[DataStream]) -> Result<()>;

    /// Runs one cycle. Blocks must arrive in order for each stream.
    fn process(
        &mut self,
        buffer: &mut SampleBuffer,
        blocks: &[StreamBlock],
        sink: &mut dyn SpikeSink,
    );

    fn start_acquisition(&mut self) {}

    fn stop_acquisition(&mut self);
}
