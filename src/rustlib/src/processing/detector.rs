use super::accessor::SampleAccessor;
use super::overflow::OverflowBuffer;
use super::sample_buffer::SampleBuffer;
use super::spike::{Spike, SpikeSink};
use super::spike_channel::{SpikeChannel, SpikeChannelId};
use super::{total_channel_count, DataStream, StreamBlock, StreamProcessor};
use crate::config::{DetectorConfig, SpikeChannelConfig};
use crate::error::{Result, SpikeError};
use std::collections::BTreeMap;

const MIN_OVERFLOW_SAMPLES: usize = 4;

// -----------------------------------------------------------------------------
// SPIKE DETECTOR
// -----------------------------------------------------------------------------

/// Threshold spike detector with cross-buffer continuity.
///
/// Spike channels live in an arena keyed by [`SpikeChannelId`]. Each one keeps
/// a resume cursor so a scan picks up where the previous buffer left off, and
/// the overflow buffer lets waveforms reach back into the previous buffer.
pub struct SpikeDetector {
    name: String,
    overflow: OverflowBuffer,
    streams: BTreeMap<u16, DataStream>,
    channel_streams: Vec<Option<u16>>,
    spike_channels: BTreeMap<SpikeChannelId, SpikeChannel>,
    next_id: u32,
    total_spikes: u64,
}

impl SpikeDetector {
    pub fn new(overflow_samples: usize) -> Result<Self> {
        if overflow_samples < MIN_OVERFLOW_SAMPLES {
            return Err(SpikeError::InvalidParameter(format!(
                "overflow buffer needs at least {} samples, got {}",
                MIN_OVERFLOW_SAMPLES, overflow_samples
            )));
        }
        Ok(Self {
            name: "Spike Detector".to_string(),
            overflow: OverflowBuffer::new(overflow_samples),
            streams: BTreeMap::new(),
            channel_streams: Vec::new(),
            spike_channels: BTreeMap::new(),
            next_id: 0,
            total_spikes: 0,
        })
    }

    /// Builds a detector for known streams. Any malformed spike channel
    /// rejects the whole configuration.
    pub fn from_config(config: &DetectorConfig, streams: &[DataStream]) -> Result<Self> {
        let mut detector = Self::new(config.overflow_samples)?;
        detector.update_settings(streams)?;
        for channel in &config.spike_channels {
            detector.add_spike_channel(channel)?;
        }
        Ok(detector)
    }

    pub fn overflow(&self) -> &OverflowBuffer {
        &self.overflow
    }

    /// Samples held back at the end of each buffer so a peak found near the
    /// scan limit still has its post-peak samples in the same buffer.
    pub fn reserved_tail(&self) -> usize {
        self.overflow.capacity() / 2
    }

    pub fn total_spikes(&self) -> u64 {
        self.total_spikes
    }

    pub fn update_settings(&mut self, streams: &[DataStream]) -> Result<()> {
        let total = total_channel_count(streams);
        let mut channel_streams = vec![None; total];
        for stream in streams {
            for &channel in &stream.channels {
                if let Some(other) = channel_streams[channel] {
                    return Err(SpikeError::InvalidParameter(format!(
                        "channel {} claimed by streams {} and {}",
                        channel, other, stream.id
                    )));
                }
                channel_streams[channel] = Some(stream.id);
            }
        }

        self.channel_streams = channel_streams;
        self.streams = streams.iter().map(|s| (s.id, s.clone())).collect();
        self.overflow.set_num_channels(total);

        let mut resolved = Vec::new();
        let mut rejected = Vec::new();
        for (&id, channel) in &self.spike_channels {
            match self.resolve_stream(channel.source_channels(), channel.name()) {
                Ok(stream_id) => resolved.push((id, stream_id)),
                Err(e) => {
                    log::warn!("removing spike channel '{}': {}", channel.name(), e);
                    rejected.push(id);
                }
            }
        }
        for id in rejected {
            self.spike_channels.remove(&id);
        }
        for (id, stream_id) in resolved {
            if let Some(channel) = self.spike_channels.get_mut(&id) {
                channel.set_stream_id(stream_id);
            }
        }

        log::debug!(
            "{}: {} streams, {} input channels, {} spike channels",
            self.name,
            self.streams.len(),
            total,
            self.spike_channels.len()
        );
        Ok(())
    }

    pub fn add_spike_channel(&mut self, config: &SpikeChannelConfig) -> Result<SpikeChannelId> {
        let mut channel = SpikeChannel::new(config, 0)?;
        let stream_id = self.resolve_stream(channel.source_channels(), channel.name())?;
        channel.set_stream_id(stream_id);
        self.check_window(&channel)?;

        let id = SpikeChannelId(self.next_id);
        self.next_id += 1;
        log::info!(
            "added {} '{}' on stream {} as spike channel {}",
            channel.identifier(),
            channel.name(),
            stream_id,
            id
        );
        self.spike_channels.insert(id, channel);
        Ok(id)
    }

    pub fn remove_spike_channel(&mut self, id: SpikeChannelId) -> Result<SpikeChannel> {
        self.spike_channels
            .remove(&id)
            .ok_or(SpikeError::UnknownSpikeChannel(id.0))
    }

    pub fn spike_channel(&self, id: SpikeChannelId) -> Option<&SpikeChannel> {
        self.spike_channels.get(&id)
    }

    pub fn spike_channel_mut(&mut self, id: SpikeChannelId) -> Option<&mut SpikeChannel> {
        self.spike_channels.get_mut(&id)
    }

    pub fn spike_channels(&self) -> impl Iterator<Item = (SpikeChannelId, &SpikeChannel)> {
        self.spike_channels.iter().map(|(&id, channel)| (id, channel))
    }

    pub fn num_spike_channels(&self) -> usize {
        self.spike_channels.len()
    }

    pub fn spike_channels_for_stream(&self, stream_id: u16) -> Vec<SpikeChannelId> {
        self.spike_channels
            .iter()
            .filter(|(_, channel)| channel.stream_id() == stream_id)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Current settings, including thresholds changed while running.
    pub fn to_config(&self) -> DetectorConfig {
        DetectorConfig {
            overflow_samples: self.overflow.capacity(),
            spike_channels: self
                .spike_channels
                .values()
                .map(SpikeChannel::to_config)
                .collect(),
        }
    }

    /// Scans one cycle and returns the number of spikes emitted.
    pub fn process_block(
        &mut self,
        buffer: &SampleBuffer,
        blocks: &[StreamBlock],
        sink: &mut dyn SpikeSink,
    ) -> usize {
        let capacity = self.overflow.capacity();
        let mut emitted = 0;

        for block in blocks {
            let num_samples = block.num_samples;
            if num_samples == 0 {
                continue;
            }
            if num_samples > buffer.num_samples() {
                log::error!(
                    "stream {} reported {} samples but the buffer holds {}, skipping cycle",
                    block.stream_id,
                    num_samples,
                    buffer.num_samples()
                );
                continue;
            }
            let Some(stream) = self.streams.get(&block.stream_id) else {
                log::warn!("block for unknown stream {}", block.stream_id);
                continue;
            };
            if let Some(&missing) = stream.channels.iter().find(|&&c| c >= buffer.num_channels()) {
                log::error!(
                    "stream {} uses channel {} but the buffer holds {} channels, skipping cycle",
                    block.stream_id,
                    missing,
                    buffer.num_channels()
                );
                continue;
            }

            let accessor = SampleAccessor::new(buffer, &self.overflow, num_samples);
            for (&id, channel) in self
                .spike_channels
                .iter_mut()
                .filter(|(_, channel)| channel.stream_id() == block.stream_id)
            {
                emitted += scan_spike_channel(id, channel, &accessor, block, capacity, sink);
            }

            // Every read for this stream is done, so the tail can be replaced
            self.overflow.store(buffer, &stream.channels, num_samples);
        }

        self.total_spikes += emitted as u64;
        emitted
    }

    pub fn stop_acquisition(&mut self) {
        for channel in self.spike_channels.values_mut() {
            channel.reset();
        }
        self.overflow.clear();
    }

    fn resolve_stream(&self, source_channels: &[usize], name: &str) -> Result<u16> {
        let mut stream_id = None;
        for &channel in source_channels {
            let id = self
                .channel_streams
                .get(channel)
                .copied()
                .flatten()
                .ok_or(SpikeError::UnknownSourceChannel(channel))?;
            match stream_id {
                Some(existing) if existing != id => {
                    return Err(SpikeError::MixedStreams(name.to_string()))
                }
                _ => stream_id = Some(id),
            }
        }
        stream_id.ok_or_else(|| {
            SpikeError::InvalidParameter(format!("spike channel '{}' has no source channels", name))
        })
    }

    fn check_window(&self, channel: &SpikeChannel) -> Result<()> {
        let capacity = self.overflow.capacity();
        let reserved = self.reserved_tail();

        if channel.pre_peak_samples() + reserved > capacity {
            return Err(SpikeError::InvalidWindow(format!(
                "{} pre-peak samples do not fit a {} sample overflow buffer (at most {})",
                channel.pre_peak_samples(),
                capacity,
                capacity - reserved
            )));
        }
        if 2 * channel.post_peak_samples() >= reserved {
            return Err(SpikeError::InvalidWindow(format!(
                "{} post-peak samples do not fit a {} sample overflow buffer (at most {})",
                channel.post_peak_samples(),
                capacity,
                (reserved.saturating_sub(1)) / 2
            )));
        }
        Ok(())
    }
}

// SCANNER ---------------------------------------------------------------------

fn scan_spike_channel(
    id: SpikeChannelId,
    channel: &mut SpikeChannel,
    accessor: &SampleAccessor<'_>,
    block: &StreamBlock,
    capacity: usize,
    sink: &mut dyn SpikeSink,
) -> usize {
    let num_samples = accessor.num_samples() as i64;
    let reserved = (capacity / 2) as i64;
    let post = channel.post_peak_samples() as i64;
    let direction = channel.direction();
    let mut emitted = 0;

    // Resume one sample early so the boundary sample is seen again
    let mut sample_index = channel.last_buffer_index - 1;
    let mut skipped_waveform = false;

    while sample_index < num_samples - reserved {
        sample_index += 1;
        skipped_waveform = false;

        for member in 0..channel.num_channels() {
            if !channel.is_detection_enabled(member) {
                continue;
            }
            let source = channel.source_channels()[member];
            let threshold = channel.thresholds()[member];

            if !direction.crosses(accessor.sample(source, sample_index), threshold) {
                continue;
            }

            // find the peak
            let crossing = sample_index;
            let mut peak = crossing;
            while peak < crossing + post
                && direction.continues(accessor.sample(source, peak), accessor.sample(source, peak + 1))
            {
                peak += 1;
            }

            sink.add_spike(extract_spike(id, channel, accessor, block, peak, member));
            emitted += 1;

            // skip the rest of this waveform
            sample_index = peak + post;
            skipped_waveform = true;
            break;
        }
    }

    // After a spike the next unexamined sample is peak + post + 1, otherwise
    // the last examined sample is seen again on the next call.
    let next_index = if skipped_waveform {
        sample_index + 1 - num_samples
    } else {
        sample_index - num_samples
    };
    debug_assert!(next_index >= -reserved);
    channel.last_buffer_index = next_index;
    channel.use_overflow_buffer = accessor.num_samples() > capacity;
    emitted
}

fn extract_spike(
    id: SpikeChannelId,
    channel: &SpikeChannel,
    accessor: &SampleAccessor<'_>,
    block: &StreamBlock,
    peak: i64,
    trigger_channel: usize,
) -> Spike {
    let length = channel.waveform_length();
    let start = peak - channel.pre_peak_samples() as i64;

    let mut waveform = Vec::with_capacity(length * channel.num_channels());
    for &source in channel.source_channels() {
        waveform.extend((0..length as i64).map(|offset| accessor.sample(source, start + offset)));
    }

    Spike::new(
        id,
        block.stream_id,
        block.source_timestamp + peak,
        peak,
        trigger_channel,
        channel.thresholds().to_vec(),
        length,
        channel.pre_peak_samples(),
        waveform,
    )
}

// -----------------------------------------------------------------------------
// STREAM PROCESSOR
// -----------------------------------------------------------------------------

impl StreamProcessor for SpikeDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_settings(&mut self, streams: &[DataStream]) -> Result<()> {
        SpikeDetector::update_settings(self, streams)
    }

    fn process(
        &mut self,
        buffer: &mut SampleBuffer,
        blocks: &[StreamBlock],
        sink: &mut dyn SpikeSink,
    ) {
        self.process_block(buffer, blocks, sink);
    }

    fn stop_acquisition(&mut self) {
        SpikeDetector::stop_acquisition(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::spike_channel::SpikeChannelType;

    fn single_stream(num_channels: usize) -> Vec<DataStream> {
        vec![DataStream::new(0, "probe", 30000.0, (0..num_channels).collect())]
    }

    #[test]
    fn test_unknown_source_channel_rejected() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(2)).unwrap();

        let config = SpikeChannelConfig::new(SpikeChannelType::Stereotrode, vec![1, 2]);
        assert!(matches!(
            detector.add_spike_channel(&config),
            Err(SpikeError::UnknownSourceChannel(2))
        ));
        assert_eq!(detector.num_spike_channels(), 0);
    }

    #[test]
    fn test_mixed_streams_rejected() {
        let streams = vec![
            DataStream::new(0, "a", 30000.0, vec![0, 1]),
            DataStream::new(1, "b", 30000.0, vec![2, 3]),
        ];
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&streams).unwrap();

        let config = SpikeChannelConfig::new(SpikeChannelType::Stereotrode, vec![1, 2]);
        assert!(matches!(
            detector.add_spike_channel(&config),
            Err(SpikeError::MixedStreams(_))
        ));
    }

    #[test]
    fn test_window_must_fit_overflow() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(1)).unwrap();

        let mut config = SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]);
        config.post_peak_samples = 50;
        assert!(matches!(
            detector.add_spike_channel(&config),
            Err(SpikeError::InvalidWindow(_))
        ));

        config.post_peak_samples = 49;
        config.pre_peak_samples = 101;
        assert!(detector.add_spike_channel(&config).is_err());

        config.pre_peak_samples = 100;
        assert!(detector.add_spike_channel(&config).is_ok());
    }

    #[test]
    fn test_tiny_overflow_rejected() {
        assert!(SpikeDetector::new(2).is_err());
    }

    #[test]
    fn test_settings_update_drops_unresolvable_channels() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(4)).unwrap();
        let keep = detector
            .add_spike_channel(&SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]))
            .unwrap();
        let drop = detector
            .add_spike_channel(&SpikeChannelConfig::new(SpikeChannelType::Single, vec![3]))
            .unwrap();

        detector.update_settings(&single_stream(2)).unwrap();

        assert!(detector.spike_channel(keep).is_some());
        assert!(detector.spike_channel(drop).is_none());
        assert_eq!(detector.overflow().num_channels(), 2);
    }

    #[test]
    fn test_ids_stay_stable_after_removal() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(3)).unwrap();
        let ids: Vec<_> = (0..3)
            .map(|c| {
                detector
                    .add_spike_channel(&SpikeChannelConfig::new(SpikeChannelType::Single, vec![c]))
                    .unwrap()
            })
            .collect();

        detector.remove_spike_channel(ids[1]).unwrap();

        assert_eq!(detector.spike_channel(ids[2]).unwrap().source_channels(), &[2]);
        assert_eq!(detector.spike_channels_for_stream(0), vec![ids[0], ids[2]]);
        assert!(detector.remove_spike_channel(ids[1]).is_err());
    }

    #[test]
    fn test_zero_length_block_is_noop() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(1)).unwrap();
        let id = detector
            .add_spike_channel(&SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]))
            .unwrap();

        let buffer = SampleBuffer::new(1, 1000);
        let mut spikes: Vec<Spike> = Vec::new();
        let blocks = [StreamBlock {
            stream_id: 0,
            num_samples: 0,
            source_timestamp: 0,
        }];
        assert_eq!(detector.process_block(&buffer, &blocks, &mut spikes), 0);

        let channel = detector.spike_channel(id).unwrap();
        assert_eq!(channel.last_buffer_index(), 0);
        assert!(!channel.use_overflow_buffer());
    }

    #[test]
    fn test_to_config_round_trips_live_thresholds() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(2)).unwrap();
        let id = detector
            .add_spike_channel(&SpikeChannelConfig::new(SpikeChannelType::Stereotrode, vec![0, 1]))
            .unwrap();
        detector
            .spike_channel_mut(id)
            .unwrap()
            .set_threshold(1, -72.5)
            .unwrap();

        let config = detector.to_config();
        let rebuilt = SpikeDetector::from_config(&config, &single_stream(2)).unwrap();

        let (_, channel) = rebuilt.spike_channels().next().unwrap();
        assert_eq!(channel.thresholds(), &[-50.0, -72.5]);
    }

    #[test]
    fn test_short_blocks_keep_cursor_inside_overflow() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(1)).unwrap();
        let id = detector
            .add_spike_channel(&SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]))
            .unwrap();

        let buffer = SampleBuffer::new(1, 30);
        let mut spikes: Vec<Spike> = Vec::new();
        for i in 0..20 {
            let block = StreamBlock {
                stream_id: 0,
                num_samples: 30,
                source_timestamp: i * 30,
            };
            detector.process_block(&buffer, &[block], &mut spikes);
            assert!(detector.spike_channel(id).unwrap().last_buffer_index() >= -100);
        }
        assert!(spikes.is_empty());
    }

    #[test]
    fn test_buffer_missing_stream_channels_skips_cycle() {
        let mut detector = SpikeDetector::new(200).unwrap();
        detector.update_settings(&single_stream(2)).unwrap();
        let id = detector
            .add_spike_channel(&SpikeChannelConfig::new(SpikeChannelType::Stereotrode, vec![0, 1]))
            .unwrap();

        let buffer = SampleBuffer::new(1, 1000);
        let mut spikes: Vec<Spike> = Vec::new();
        let blocks = [StreamBlock {
            stream_id: 0,
            num_samples: 1000,
            source_timestamp: 0,
        }];
        let emitted = detector.process_block(&buffer, &blocks, &mut spikes);

        assert_eq!(emitted, 0);
        assert!(spikes.is_empty());
        let channel = detector.spike_channel(id).unwrap();
        assert_eq!(channel.last_buffer_index(), 0);
        assert!(!channel.use_overflow_buffer());
    }
}
