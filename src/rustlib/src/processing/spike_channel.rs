use crate::config::{SpikeChannelConfig, DEFAULT_THRESHOLD};
use crate::error::{Result, SpikeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle into the detector's spike channel arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpikeChannelId(pub u32);

impl fmt::Display for SpikeChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikeChannelType {
    Single,
    #[serde(alias = "stereo")]
    Stereotrode,
    Tetrode,
}

impl SpikeChannelType {
    pub fn expected_channel_count(&self) -> usize {
        match self {
            SpikeChannelType::Single => 1,
            SpikeChannelType::Stereotrode => 2,
            SpikeChannelType::Tetrode => 4,
        }
    }

    pub fn identifier(&self) -> &'static str {
        match self {
            SpikeChannelType::Single => "spikesource.single",
            SpikeChannelType::Stereotrode => "spikesource.stereotrode",
            SpikeChannelType::Tetrode => "spikesource.tetrode",
        }
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            SpikeChannelType::Single => "Electrode",
            SpikeChannelType::Stereotrode => "Stereotrode",
            SpikeChannelType::Tetrode => "Tetrode",
        }
    }

    pub fn from_channel_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(SpikeChannelType::Single),
            2 => Some(SpikeChannelType::Stereotrode),
            4 => Some(SpikeChannelType::Tetrode),
            _ => None,
        }
    }
}

impl fmt::Display for SpikeChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name_prefix())
    }
}

/// Which side of the threshold counts as a spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Negative-going spikes: the sample falls below the threshold.
    #[default]
    Falling,
    Rising,
}

impl ThresholdDirection {
    #[inline]
    pub fn crosses(&self, sample: f32, threshold: f32) -> bool {
        match self {
            ThresholdDirection::Falling => sample < threshold,
            ThresholdDirection::Rising => sample > threshold,
        }
    }

    /// True while the signal keeps moving away from baseline.
    #[inline]
    pub fn continues(&self, current: f32, next: f32) -> bool {
        match self {
            ThresholdDirection::Falling => current > next,
            ThresholdDirection::Rising => current < next,
        }
    }
}

// SPIKE CHANNEL ---------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpikeChannel {
    name: String,
    description: String,
    channel_type: SpikeChannelType,
    stream_id: u16,
    source_channels: Vec<usize>,
    pre_peak_samples: usize,
    post_peak_samples: usize,
    send_full_waveform: bool,
    configured_pre_peak: usize,
    configured_post_peak: usize,
    thresholds: Vec<f32>,
    detection_enabled: Vec<bool>,
    direction: ThresholdDirection,

    pub(crate) last_buffer_index: i64,
    pub(crate) use_overflow_buffer: bool,
}

impl SpikeChannel {
    pub fn new(config: &SpikeChannelConfig, stream_id: u16) -> Result<Self> {
        let count = config.source_channels.len();
        let expected = config.channel_type.expected_channel_count();
        if count != expected {
            return Err(SpikeError::ChannelCountMismatch {
                channel_type: config.channel_type.to_string(),
                expected,
                found: count,
            });
        }

        let thresholds = match config.thresholds.len() {
            0 => vec![DEFAULT_THRESHOLD; count],
            n if n == count => config.thresholds.clone(),
            n => {
                return Err(SpikeError::InvalidParameter(format!(
                    "{} thresholds given for {} source channels",
                    n, count
                )))
            }
        };

        let detection_enabled = match config.detection_enabled.len() {
            0 => vec![true; count],
            n if n == count => config.detection_enabled.clone(),
            n => {
                return Err(SpikeError::InvalidParameter(format!(
                    "{} detection flags given for {} source channels",
                    n, count
                )))
            }
        };

        if thresholds.iter().any(|t| !t.is_finite()) {
            return Err(SpikeError::InvalidParameter(
                "thresholds must be finite".to_string(),
            ));
        }

        // Without the full waveform only the peak and the sample after it are sent
        let (pre_peak_samples, post_peak_samples) = if config.send_full_waveform {
            (config.pre_peak_samples, config.post_peak_samples)
        } else {
            (0, 1)
        };

        let name = config.name.clone().unwrap_or_else(|| {
            let channels: Vec<String> = config
                .source_channels
                .iter()
                .map(|c| (c + 1).to_string())
                .collect();
            format!("{} {}", config.channel_type, channels.join(","))
        });

        Ok(Self {
            name,
            description: config
                .description
                .clone()
                .unwrap_or_else(|| format!("{} spike source", config.channel_type)),
            channel_type: config.channel_type,
            stream_id,
            source_channels: config.source_channels.clone(),
            pre_peak_samples,
            post_peak_samples,
            send_full_waveform: config.send_full_waveform,
            configured_pre_peak: config.pre_peak_samples,
            configured_post_peak: config.post_peak_samples,
            thresholds,
            detection_enabled,
            direction: config.direction,
            last_buffer_index: 0,
            use_overflow_buffer: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn channel_type(&self) -> SpikeChannelType {
        self.channel_type
    }

    pub fn identifier(&self) -> &'static str {
        self.channel_type.identifier()
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub(crate) fn set_stream_id(&mut self, stream_id: u16) {
        self.stream_id = stream_id;
    }

    pub fn num_channels(&self) -> usize {
        self.source_channels.len()
    }

    pub fn source_channels(&self) -> &[usize] {
        &self.source_channels
    }

    pub fn pre_peak_samples(&self) -> usize {
        self.pre_peak_samples
    }

    pub fn post_peak_samples(&self) -> usize {
        self.post_peak_samples
    }

    /// Samples per member channel in an emitted waveform.
    pub fn waveform_length(&self) -> usize {
        self.pre_peak_samples + self.post_peak_samples + 1
    }

    pub fn direction(&self) -> ThresholdDirection {
        self.direction
    }

    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    pub fn threshold(&self, channel: usize) -> Option<f32> {
        self.thresholds.get(channel).copied()
    }

    pub fn set_threshold(&mut self, channel: usize, threshold: f32) -> Result<()> {
        let count = self.num_channels();
        let slot = self
            .thresholds
            .get_mut(channel)
            .ok_or(SpikeError::ChannelIndexOutOfRange {
                index: channel,
                count,
            })?;
        *slot = threshold;
        Ok(())
    }

    /// Locked thresholds: every member gets the same value.
    pub fn set_all_thresholds(&mut self, threshold: f32) {
        self.thresholds.fill(threshold);
    }

    pub fn is_detection_enabled(&self, channel: usize) -> bool {
        self.detection_enabled.get(channel).copied().unwrap_or(false)
    }

    pub fn set_detection_enabled(&mut self, channel: usize, enabled: bool) -> Result<()> {
        let count = self.num_channels();
        let slot = self
            .detection_enabled
            .get_mut(channel)
            .ok_or(SpikeError::ChannelIndexOutOfRange {
                index: channel,
                count,
            })?;
        *slot = enabled;
        Ok(())
    }

    /// Resume cursor relative to the start of the next buffer.
    pub fn last_buffer_index(&self) -> i64 {
        self.last_buffer_index
    }

    pub fn use_overflow_buffer(&self) -> bool {
        self.use_overflow_buffer
    }

    /// Drops scan state so a new acquisition starts from the buffer head.
    pub fn reset(&mut self) {
        self.last_buffer_index = 0;
        self.use_overflow_buffer = false;
    }

    pub fn to_config(&self) -> SpikeChannelConfig {
        SpikeChannelConfig {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            channel_type: self.channel_type,
            source_channels: self.source_channels.clone(),
            pre_peak_samples: self.configured_pre_peak,
            post_peak_samples: self.configured_post_peak,
            send_full_waveform: self.send_full_waveform,
            thresholds: self.thresholds.clone(),
            detection_enabled: self.detection_enabled.clone(),
            direction: self.direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_count_must_match_type() {
        let config = SpikeChannelConfig::new(SpikeChannelType::Tetrode, vec![0, 1, 2]);
        let err = SpikeChannel::new(&config, 0).unwrap_err();
        assert!(matches!(
            err,
            SpikeError::ChannelCountMismatch {
                expected: 4,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_defaults_fill_thresholds_and_flags() {
        let config = SpikeChannelConfig::new(SpikeChannelType::Stereotrode, vec![4, 5]);
        let channel = SpikeChannel::new(&config, 1).unwrap();

        assert_eq!(channel.thresholds(), &[-50.0, -50.0]);
        assert!(channel.is_detection_enabled(0));
        assert!(channel.is_detection_enabled(1));
        assert!(!channel.is_detection_enabled(2));
        assert_eq!(channel.name(), "Stereotrode 5,6");
        assert_eq!(channel.identifier(), "spikesource.stereotrode");
        assert_eq!(channel.waveform_length(), 8 + 32 + 1);
    }

    #[test]
    fn test_threshold_list_length_checked() {
        let mut config = SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]);
        config.thresholds = vec![-30.0, -40.0];
        assert!(SpikeChannel::new(&config, 0).is_err());
    }

    #[test]
    fn test_peak_only_geometry() {
        let mut config = SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]);
        config.send_full_waveform = false;
        let channel = SpikeChannel::new(&config, 0).unwrap();

        assert_eq!(channel.pre_peak_samples(), 0);
        assert_eq!(channel.post_peak_samples(), 1);
        assert_eq!(channel.to_config().pre_peak_samples, 8);
    }

    #[test]
    fn test_live_threshold_changes() {
        let config = SpikeChannelConfig::new(SpikeChannelType::Tetrode, vec![0, 1, 2, 3]);
        let mut channel = SpikeChannel::new(&config, 0).unwrap();

        channel.set_threshold(2, -80.0).unwrap();
        assert_eq!(channel.threshold(2), Some(-80.0));
        assert!(channel.set_threshold(4, -80.0).is_err());

        channel.set_all_thresholds(-25.0);
        assert!(channel.thresholds().iter().all(|&t| t == -25.0));
        assert_eq!(channel.to_config().thresholds, vec![-25.0; 4]);
    }

    #[test]
    fn test_reset_clears_scan_state() {
        let config = SpikeChannelConfig::new(SpikeChannelType::Single, vec![0]);
        let mut channel = SpikeChannel::new(&config, 0).unwrap();
        channel.last_buffer_index = -117;
        channel.use_overflow_buffer = true;

        channel.reset();

        assert_eq!(channel.last_buffer_index(), 0);
        assert!(!channel.use_overflow_buffer());
    }

    #[test]
    fn test_direction_policies() {
        assert!(ThresholdDirection::Falling.crosses(-60.0, -50.0));
        assert!(!ThresholdDirection::Falling.crosses(-50.0, -50.0));
        assert!(ThresholdDirection::Rising.crosses(60.0, 50.0));
        assert!(ThresholdDirection::Falling.continues(-60.0, -70.0));
        assert!(ThresholdDirection::Rising.continues(60.0, 70.0));
    }
}
