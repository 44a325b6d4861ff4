use crate::config::BandpassFilterConfig;
use crate::error::{Result, SpikeError};
use crate::processing::sample_buffer::SampleBuffer;
use crate::processing::spike::SpikeSink;
use crate::processing::{total_channel_count, DataStream, StreamBlock, StreamProcessor};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterType {
    HighPass,
    LowPass,
}

#[derive(Debug, Clone)]
struct SecondOrderFilter {
    a: [f64; 3],
    b: [f64; 3],
    x: [f64; 2],
    y: [f64; 2],
}

impl SecondOrderFilter {
    fn new(f0: f64, fs: f64, filter_type: FilterType) -> Self {
        let q = (2.0f64).sqrt() / 2.0; // Butterworth
        let omega = 2.0 * std::f64::consts::PI * f0 / fs;
        let alpha = f64::sin(omega) / (2.0 * q);
        let cos_omega = f64::cos(omega);

        let (b0, b1, b2) = match filter_type {
            FilterType::HighPass => (
                (1.0 + cos_omega) / 2.0,
                -(1.0 + cos_omega),
                (1.0 + cos_omega) / 2.0,
            ),
            FilterType::LowPass => (
                (1.0 - cos_omega) / 2.0,
                1.0 - cos_omega,
                (1.0 - cos_omega) / 2.0,
            ),
        };

        SecondOrderFilter {
            a: [1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha],
            b: [b0, b1, b2],
            x: [0.0, 0.0],
            y: [0.0, 0.0],
        }
    }

    fn calculate_output(&mut self, input: f64) -> f64 {
        let output = (self.b[0] / self.a[0]) * input
            + (self.b[1] / self.a[0]) * self.x[0]
            + (self.b[2] / self.a[0]) * self.x[1]
            - (self.a[1] / self.a[0]) * self.y[0]
            - (self.a[2] / self.a[0]) * self.y[1];

        // Update internal sample history
        self.x[1] = self.x[0];
        self.x[0] = input;
        self.y[1] = self.y[0];
        self.y[0] = output;

        output
    }

    fn reset(&mut self) {
        self.x = [0.0, 0.0];
        self.y = [0.0, 0.0];
    }
}

/// High-pass then low-pass section for one input channel.
#[derive(Debug, Clone)]
struct ChannelFilter {
    high_pass: SecondOrderFilter,
    low_pass: SecondOrderFilter,
}

impl ChannelFilter {
    fn new(f_low: f64, f_high: f64, fs: f64) -> Self {
        Self {
            high_pass: SecondOrderFilter::new(f_low, fs, FilterType::HighPass),
            low_pass: SecondOrderFilter::new(f_high, fs, FilterType::LowPass),
        }
    }

    fn filter_sample(&mut self, sample: f32) -> f32 {
        let high_pass_output = self.high_pass.calculate_output(sample as f64);
        self.low_pass.calculate_output(high_pass_output) as f32
    }
}

/// Butterworth bandpass applied in place to every channel of every stream.
pub struct BandPassFilter {
    config: BandpassFilterConfig,
    channels: Vec<Option<ChannelFilter>>,
    stream_channels: BTreeMap<u16, Vec<usize>>,
}

impl BandPassFilter {
    pub fn new(config: BandpassFilterConfig) -> Result<Self> {
        if !(config.f_low > 0.0 && config.f_low < config.f_high) {
            return Err(SpikeError::InvalidParameter(format!(
                "filter '{}' needs 0 < f_low < f_high, got {} and {}",
                config.id, config.f_low, config.f_high
            )));
        }
        Ok(Self {
            config,
            channels: Vec::new(),
            stream_channels: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }
}

impl StreamProcessor for BandPassFilter {
    fn name(&self) -> &str {
        &self.config.id
    }

    fn update_settings(&mut self, streams: &[DataStream]) -> Result<()> {
        let mut channels = vec![None; total_channel_count(streams)];
        for stream in streams {
            let nyquist = stream.sample_rate as f64 / 2.0;
            if self.config.f_high >= nyquist {
                return Err(SpikeError::InvalidParameter(format!(
                    "filter '{}' upper cutoff {} Hz is above Nyquist for stream '{}' ({} Hz)",
                    self.config.id, self.config.f_high, stream.name, nyquist
                )));
            }
            for &channel in &stream.channels {
                channels[channel] = Some(ChannelFilter::new(
                    self.config.f_low,
                    self.config.f_high,
                    stream.sample_rate as f64,
                ));
            }
        }
        self.channels = channels;
        self.stream_channels = streams
            .iter()
            .map(|s| (s.id, s.channels.clone()))
            .collect();
        Ok(())
    }

    fn process(
        &mut self,
        buffer: &mut SampleBuffer,
        blocks: &[StreamBlock],
        _sink: &mut dyn SpikeSink,
    ) {
        for block in blocks {
            let Some(channels) = self.stream_channels.get(&block.stream_id) else {
                continue;
            };
            let num_samples = block.num_samples.min(buffer.num_samples());
            for &channel in channels {
                let Some(Some(filter)) = self.channels.get_mut(channel) else {
                    continue;
                };
                if channel >= buffer.num_channels() {
                    continue;
                }
                for sample in &mut buffer.channel_mut(channel)[..num_samples] {
                    *sample = filter.filter_sample(*sample);
                }
            }
        }
    }

    fn stop_acquisition(&mut self) {
        for filter in self.channels.iter_mut().flatten() {
            filter.high_pass.reset();
            filter.low_pass.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::spike::CountingSink;

    fn filter(f_low: f64, f_high: f64) -> Result<BandPassFilter> {
        BandPassFilter::new(BandpassFilterConfig {
            id: "spike_band".to_string(),
            f_low,
            f_high,
        })
    }

    fn run(filter: &mut BandPassFilter, signal: Vec<f32>) -> Vec<f32> {
        let len = signal.len();
        let mut buffer = SampleBuffer::from_channels(vec![signal]);
        let blocks = [StreamBlock {
            stream_id: 0,
            num_samples: len,
            source_timestamp: 0,
        }];
        filter.process(&mut buffer, &blocks, &mut CountingSink::default());
        buffer.channel(0).to_vec()
    }

    #[test]
    fn test_rejects_inverted_band() {
        assert!(filter(6000.0, 300.0).is_err());
        assert!(filter(0.0, 300.0).is_err());
    }

    #[test]
    fn test_rejects_cutoff_above_nyquist() {
        let mut bandpass = filter(300.0, 6000.0).unwrap();
        let streams = vec![DataStream::new(0, "slow", 10000.0, vec![0])];
        assert!(bandpass.update_settings(&streams).is_err());
    }

    #[test]
    fn test_removes_dc_offset() {
        let mut bandpass = filter(300.0, 6000.0).unwrap();
        bandpass
            .update_settings(&[DataStream::new(0, "probe", 30000.0, vec![0])])
            .unwrap();

        let output = run(&mut bandpass, vec![100.0; 3000]);

        assert!(output[2999].abs() < 1.0);
    }

    #[test]
    fn test_stop_clears_history() {
        let mut bandpass = filter(300.0, 6000.0).unwrap();
        bandpass
            .update_settings(&[DataStream::new(0, "probe", 30000.0, vec![0])])
            .unwrap();

        let first = run(&mut bandpass, vec![1.0, 0.0, 0.0, 0.0]);
        bandpass.stop_acquisition();
        let second = run(&mut bandpass, vec![1.0, 0.0, 0.0, 0.0]);

        assert_eq!(first, second);
    }
}
