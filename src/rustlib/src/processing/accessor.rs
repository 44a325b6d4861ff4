use super::overflow::OverflowBuffer;
use super::sample_buffer::SampleBuffer;

/// Treats the overflow history and the current buffer as one continuous
/// stream addressed by signed sample index.
pub struct SampleAccessor<'a> {
    buffer: &'a SampleBuffer,
    overflow: &'a OverflowBuffer,
    num_samples: usize,
}

impl<'a> SampleAccessor<'a> {
    pub fn new(buffer: &'a SampleBuffer, overflow: &'a OverflowBuffer, num_samples: usize) -> Self {
        Self {
            buffer,
            overflow,
            num_samples: num_samples.min(buffer.num_samples()),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn try_sample(&self, channel: usize, index: i64) -> Option<f32> {
        if index < 0 {
            self.overflow.read(channel, index)
        } else if (index as usize) < self.num_samples {
            self.buffer.get(channel, index as usize)
        } else {
            None
        }
    }

    /// Index must lie in `[-capacity, num_samples)`. Anything else means the
    /// scan cursor arithmetic is wrong.
    pub fn sample(&self, channel: usize, index: i64) -> f32 {
        match self.try_sample(channel, index) {
            Some(value) => value,
            None => {
                debug_assert!(
                    false,
                    "sample index {} outside [-{}, {}) on channel {}",
                    index,
                    self.overflow.capacity(),
                    self.num_samples,
                    channel
                );
                log::error!(
                    "sample index {} out of range on channel {}, clamping",
                    index,
                    channel
                );
                let lowest = -(self.overflow.capacity() as i64);
                let highest = self.num_samples as i64 - 1;
                let clamped = index.clamp(lowest, highest.max(lowest));
                self.try_sample(channel, clamped).unwrap_or(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (SampleBuffer, OverflowBuffer) {
        let mut overflow = OverflowBuffer::new(3);
        overflow.set_num_channels(1);
        overflow.store(&SampleBuffer::from_channels(vec![vec![-3.0, -2.0, -1.0]]), &[0], 3);
        let buffer = SampleBuffer::from_channels(vec![vec![10.0, 11.0, 12.0, 13.0]]);
        (buffer, overflow)
    }

    #[test]
    fn test_dispatch_by_sign() {
        let (buffer, overflow) = setup();
        let accessor = SampleAccessor::new(&buffer, &overflow, 4);

        assert_eq!(accessor.try_sample(0, -3), Some(-3.0));
        assert_eq!(accessor.try_sample(0, -1), Some(-1.0));
        assert_eq!(accessor.try_sample(0, 0), Some(10.0));
        assert_eq!(accessor.try_sample(0, 3), Some(13.0));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let (buffer, overflow) = setup();
        let accessor = SampleAccessor::new(&buffer, &overflow, 2);

        assert_eq!(accessor.try_sample(0, -4), None);
        assert_eq!(accessor.try_sample(0, 2), None);
        assert_eq!(accessor.try_sample(1, 0), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside")]
    fn test_out_of_range_is_fatal_in_debug() {
        let (buffer, overflow) = setup();
        let accessor = SampleAccessor::new(&buffer, &overflow, 4);
        accessor.sample(0, 4);
    }
}
