use super::spike_channel::SpikeChannelId;

/// A detected spike. Waveforms of every member channel share the same peak.
#[derive(Debug, Clone, PartialEq)]
pub struct Spike {
    channel_id: SpikeChannelId,
    stream_id: u16,
    timestamp: i64,
    peak_index: i64,
    trigger_channel: usize,
    thresholds: Vec<f32>,
    samples_per_channel: usize,
    pre_peak_samples: usize,
    waveform: Vec<f32>,
}

impl Spike {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel_id: SpikeChannelId,
        stream_id: u16,
        timestamp: i64,
        peak_index: i64,
        trigger_channel: usize,
        thresholds: Vec<f32>,
        samples_per_channel: usize,
        pre_peak_samples: usize,
        waveform: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(waveform.len(), thresholds.len() * samples_per_channel);
        debug_assert!(pre_peak_samples < samples_per_channel);
        Self {
            channel_id,
            stream_id,
            timestamp,
            peak_index,
            trigger_channel,
            thresholds,
            samples_per_channel,
            pre_peak_samples,
            waveform,
        }
    }

    pub fn channel_id(&self) -> SpikeChannelId {
        self.channel_id
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    /// Absolute sample timestamp of the peak.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Peak position relative to the start of the buffer it was found in.
    /// Negative when the peak sat in the previous buffer.
    pub fn peak_index(&self) -> i64 {
        self.peak_index
    }

    /// Member channel whose threshold crossing triggered the group.
    pub fn trigger_channel(&self) -> usize {
        self.trigger_channel
    }

    /// Thresholds in effect when the spike was detected.
    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    pub fn num_channels(&self) -> usize {
        self.thresholds.len()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    /// Position of the peak inside each channel waveform.
    pub fn pre_peak_samples(&self) -> usize {
        self.pre_peak_samples
    }

    /// Sample at the peak on member `channel`.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= self.num_channels()`.
    pub fn peak_amplitude(&self, channel: usize) -> f32 {
        self.channel_waveform(channel)[self.pre_peak_samples]
    }

    /// # Panics
    ///
    /// Panics if `channel >= self.num_channels()`.
    pub fn channel_waveform(&self, channel: usize) -> &[f32] {
        let start = channel * self.samples_per_channel;
        &self.waveform[start..start + self.samples_per_channel]
    }

    /// All member waveforms, channel-major.
    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }
}

// SINKS -----------------------------------------------------------------------

/// Downstream consumer of detected spikes.
pub trait SpikeSink {
    fn add_spike(&mut self, spike: Spike);
}

impl SpikeSink for Vec<Spike> {
    fn add_spike(&mut self, spike: Spike) {
        self.push(spike);
    }
}

/// Forwards every spike to a closure.
pub struct CallbackSink<F: FnMut(Spike)>(pub F);

impl<F: FnMut(Spike)> SpikeSink for CallbackSink<F> {
    fn add_spike(&mut self, spike: Spike) {
        (self.0)(spike)
    }
}

/// Sink that only counts, for processors that never emit.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CountingSink {
    pub count: usize,
}

#[cfg(test)]
impl SpikeSink for CountingSink {
    fn add_spike(&mut self, _spike: Spike) {
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_waveform_slices() {
        let spike = Spike::new(
            SpikeChannelId(3),
            0,
            1000,
            12,
            1,
            vec![-50.0, -60.0],
            3,
            1,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        );

        assert_eq!(spike.num_channels(), 2);
        assert_eq!(spike.channel_waveform(0), &[1.0, 2.0, 3.0]);
        assert_eq!(spike.channel_waveform(1), &[4.0, 5.0, 6.0]);
        assert_eq!(spike.peak_amplitude(1), 5.0);
    }

    #[test]
    fn test_callback_sink_forwards() {
        let mut seen = Vec::new();
        {
            let mut sink = CallbackSink(|spike: Spike| seen.push(spike.timestamp()));
            sink.add_spike(Spike::new(SpikeChannelId(0), 0, 7, 7, 0, vec![0.0], 1, 0, vec![0.0]));
        }
        assert_eq!(seen, vec![7]);
    }
}
