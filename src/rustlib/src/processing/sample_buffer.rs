/// Channel-major block of `f32` samples.
///
/// All channels share one sample length. Streams may fill fewer samples than
/// that length; the number actually delivered travels in the stream block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    num_samples: usize,
}

impl SampleBuffer {
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_samples]; num_channels],
            num_samples,
        }
    }

    /// Builds a buffer from per-channel vectors. Shorter channels are zero
    /// padded to the longest one.
    pub fn from_channels(mut channels: Vec<Vec<f32>>) -> Self {
        let num_samples = channels.iter().map(Vec::len).max().unwrap_or(0);
        for channel in &mut channels {
            channel.resize(num_samples, 0.0);
        }
        Self {
            channels,
            num_samples,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Resizes both dimensions and zeroes every sample.
    pub fn set_size(&mut self, num_channels: usize, num_samples: usize) {
        self.channels.resize_with(num_channels, Vec::new);
        for channel in &mut self.channels {
            channel.clear();
            channel.resize(num_samples, 0.0);
        }
        self.num_samples = num_samples;
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.channels[channel]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        &mut self.channels[channel]
    }

    pub fn get(&self, channel: usize, index: usize) -> Option<f32> {
        self.channels.get(channel)?.get(index).copied()
    }
}
