use std::path::Path;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::config::Config;
use crate::error::{Result, SpikeError};
use crate::processing::detector::SpikeDetector;
use crate::processing::filters::bandpass::BandPassFilter;
use crate::processing::sample_buffer::SampleBuffer;
use crate::processing::signal_processor::{SignalProcessor, SignalProcessorConfig};
use crate::processing::spike::{Spike, SpikeSink};
use crate::processing::{total_channel_count, DataStream};
use crate::sources::binary::BinaryFileSource;
use crate::sources::BufferSource;

/// Outcome of running one recording through a processing chain.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSummary {
    pub source: String,
    pub chunks: u64,
    pub samples: u64,
    pub spikes: usize,
    pub elapsed: Duration,
}

/// Bandpass filters in configured order, then the spike detector.
pub fn build_signal_processor(config: &Config, streams: &[DataStream]) -> Result<SignalProcessor> {
    let mut processor = SignalProcessor::new(SignalProcessorConfig {
        verbose: config.processor.verbose,
    });

    for filter_config in &config.filters.bandpass_filters {
        processor.add_processor(Box::new(BandPassFilter::new(filter_config.clone())?));
    }
    processor.add_processor(Box::new(SpikeDetector::from_config(&config.detector, streams)?));

    processor.update_settings(streams)?;
    log::debug!("Processing chain: {:?}", processor.processor_names());
    Ok(processor)
}

struct CountingForwarder<'a> {
    inner: &'a mut dyn SpikeSink,
    count: usize,
}

impl SpikeSink for CountingForwarder<'_> {
    fn add_spike(&mut self, spike: Spike) {
        self.count += 1;
        self.inner.add_spike(spike);
    }
}

/// Feeds `source` through `processor` until the source runs dry.
pub fn run_detection(
    source: &mut dyn BufferSource,
    processor: &mut SignalProcessor,
    block_size: usize,
    sink: &mut dyn SpikeSink,
) -> Result<DetectionSummary> {
    if block_size == 0 {
        return Err(SpikeError::InvalidParameter(
            "block size must be at least one sample".to_string(),
        ));
    }

    let stream = source.stream();
    let mut buffer = SampleBuffer::new(total_channel_count(std::slice::from_ref(&stream)), block_size);
    let mut forwarder = CountingForwarder {
        inner: sink,
        count: 0,
    };

    let start_time = Instant::now();
    let mut chunks = 0u64;
    let mut samples = 0u64;

    processor.start_acquisition();
    loop {
        let block = match source.read_block(&mut buffer, block_size) {
            Ok(block) => block,
            Err(e) => {
                processor.stop_acquisition();
                return Err(e);
            }
        };
        if block.num_samples == 0 {
            break;
        }

        let chunk_start = Instant::now();
        processor.run_chunk(&mut buffer, &[block], &mut forwarder);
        chunks += 1;
        samples += block.num_samples as u64;

        log::debug!(
            "Processed chunk {} of '{}' in {:?} - index: {} - spikes: {}",
            chunks,
            stream.name,
            chunk_start.elapsed(),
            samples,
            forwarder.count
        );
    }
    processor.stop_acquisition();

    let summary = DetectionSummary {
        source: stream.name,
        chunks,
        samples,
        spikes: forwarder.count,
        elapsed: start_time.elapsed(),
    };
    log::info!(
        "'{}': {} spikes in {} samples ({:?})",
        summary.source,
        summary.spikes,
        summary.samples,
        summary.elapsed
    );
    Ok(summary)
}

/// Runs one record of a binary recording with a fresh chain.
pub fn detect_record(
    path: &Path,
    config: &Config,
    record: usize,
) -> Result<(DetectionSummary, Vec<Spike>)> {
    let mut source = BinaryFileSource::open(path)?;
    source.update_active_record(record)?;

    let mut processor = build_signal_processor(config, &[source.stream()])?;
    let mut spikes = Vec::new();
    let summary = run_detection(
        &mut source,
        &mut processor,
        config.processor.block_size,
        &mut spikes,
    )?;
    Ok((summary, spikes))
}

/// Every record of a binary recording, one chain per record, in parallel.
/// Results come back in record order.
pub fn detect_all_records(path: &Path, config: &Config) -> Result<Vec<(DetectionSummary, Vec<Spike>)>> {
    let num_records = BinaryFileSource::open(path)?.num_records();
    (0..num_records)
        .into_par_iter()
        .map(|record| detect_record(path, config, record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandpassFilterConfig, SpikeChannelConfig};
    use crate::processing::spike_channel::SpikeChannelType;
    use crate::processing::StreamBlock;

    struct VecSource {
        data: Vec<f32>,
        position: usize,
    }

    impl BufferSource for VecSource {
        fn stream(&self) -> DataStream {
            DataStream::new(0, "vec", 30000.0, vec![0])
        }

        fn read_block(&mut self, buffer: &mut SampleBuffer, max_samples: usize) -> Result<StreamBlock> {
            let count = max_samples.min(self.data.len() - self.position);
            buffer.channel_mut(0)[..count]
                .copy_from_slice(&self.data[self.position..self.position + count]);
            let block = StreamBlock {
                stream_id: 0,
                num_samples: count,
                source_timestamp: self.position as i64,
            };
            self.position += count;
            Ok(block)
        }
    }

    fn single_channel_config() -> Config {
        let mut config = Config::default();
        config
            .detector
            .spike_channels
            .push(SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]));
        config
    }

    #[test]
    fn test_chain_order() {
        let mut config = single_channel_config();
        config.filters.bandpass_filters.push(BandpassFilterConfig {
            id: "spike_band".to_string(),
            f_low: 300.0,
            f_high: 6000.0,
        });
        let streams = [DataStream::new(0, "vec", 30000.0, vec![0])];

        let processor = build_signal_processor(&config, &streams).unwrap();
        assert_eq!(processor.processor_names(), vec!["spike_band", "Spike Detector"]);
    }

    #[test]
    fn test_run_detection_counts_spikes() {
        let mut data = vec![0.0; 5000];
        for &peak in &[1000usize, 3000] {
            data[peak - 1] = -70.0;
            data[peak] = -100.0;
            data[peak + 1] = -40.0;
        }
        let mut source = VecSource { data, position: 0 };
        let config = single_channel_config();
        let mut processor = build_signal_processor(&config, &[source.stream()]).unwrap();

        let mut spikes = Vec::new();
        let summary = run_detection(&mut source, &mut processor, 1024, &mut spikes).unwrap();

        assert_eq!(summary.chunks, 5);
        assert_eq!(summary.samples, 5000);
        assert_eq!(summary.spikes, 2);
        let timestamps: Vec<i64> = spikes.iter().map(|s| s.timestamp()).collect();
        assert_eq!(timestamps, vec![1000, 3000]);
        assert!(!processor.is_acquiring());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let mut source = VecSource {
            data: vec![0.0; 10],
            position: 0,
        };
        let mut processor = build_signal_processor(&single_channel_config(), &[source.stream()]).unwrap();
        assert!(run_detection(&mut source, &mut processor, 0, &mut Vec::new()).is_err());
    }
}
