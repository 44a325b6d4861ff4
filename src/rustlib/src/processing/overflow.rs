use super::sample_buffer::SampleBuffer;

pub const DEFAULT_OVERFLOW_SAMPLES: usize = 200;

// OVERFLOW BUFFER -------------------------------------------------------------

/// Per-channel history of the most recent samples of the logical stream.
///
/// Slot `capacity - 1` always holds the sample just before the current buffer
/// starts, so a signed index `-k` reads `k` samples back in time.
#[derive(Debug, Clone)]
pub struct OverflowBuffer {
    samples: SampleBuffer,
    capacity: usize,
}

impl OverflowBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: SampleBuffer::new(0, capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_channels(&self) -> usize {
        self.samples.num_channels()
    }

    /// Sizes the channel dimension. History is zeroed; capacity is kept.
    pub fn set_num_channels(&mut self, num_channels: usize) {
        self.samples.set_size(num_channels, self.capacity);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Reads the retained history. Only `-capacity..0` is valid here, the
    /// non-negative range belongs to the current buffer.
    pub fn read(&self, channel: usize, index: i64) -> Option<f32> {
        if index >= 0 || index < -(self.capacity as i64) {
            return None;
        }
        let slot = (self.capacity as i64 + index) as usize;
        self.samples.get(channel, slot)
    }

    /// Keeps the newest `capacity` samples of each listed channel once a
    /// buffer of `num_samples` has been fully processed.
    pub fn store(&mut self, buffer: &SampleBuffer, channels: &[usize], num_samples: usize) {
        let capacity = self.capacity;
        let num_samples = num_samples.min(buffer.num_samples());
        for &channel in channels {
            if channel >= self.samples.num_channels() || channel >= buffer.num_channels() {
                log::warn!("overflow store skipped unknown channel {}", channel);
                continue;
            }
            let source = &buffer.channel(channel)[..num_samples];
            let history = self.samples.channel_mut(channel);

            if num_samples >= capacity {
                history.copy_from_slice(&source[num_samples - capacity..]);
            } else {
                history.copy_within(num_samples.., 0);
                history[capacity - num_samples..].copy_from_slice(source);
            }
        }
    }
}
