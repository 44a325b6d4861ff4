use crate::config::{SpikeChannelConfig, DEFAULT_POST_PEAK_SAMPLES, DEFAULT_PRE_PEAK_SAMPLES, DEFAULT_THRESHOLD};
use crate::error::SpikeError;
use crate::processing::detector::SpikeDetector;
use crate::processing::overflow::DEFAULT_OVERFLOW_SAMPLES;
use crate::processing::sample_buffer::SampleBuffer;
use crate::processing::spike::Spike;
use crate::processing::spike_channel::{SpikeChannelId, SpikeChannelType, ThresholdDirection};
use crate::processing::{DataStream, StreamBlock};

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

impl From<SpikeError> for PyErr {
    fn from(err: SpikeError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// Single-stream spike detector driven from Python, one chunk at a time.
#[pyclass(name = "SpikeDetector")]
pub struct PySpikeDetector {
    detector: SpikeDetector,
    num_channels: usize,
    timestamp: i64,
}

#[pymethods]
impl PySpikeDetector {
    #[new]
    #[pyo3(signature = (num_channels, sample_rate, overflow_samples = DEFAULT_OVERFLOW_SAMPLES))]
    pub fn new(num_channels: usize, sample_rate: f32, overflow_samples: usize) -> PyResult<Self> {
        let mut detector = SpikeDetector::new(overflow_samples)?;
        let stream = DataStream::new(0, "python", sample_rate, (0..num_channels).collect());
        detector.update_settings(&[stream])?;
        Ok(PySpikeDetector {
            detector,
            num_channels,
            timestamp: 0,
        })
    }

    /// Groups `channels` into a spike channel and returns its id.
    #[pyo3(signature = (
        channels,
        threshold = DEFAULT_THRESHOLD,
        pre_peak_samples = DEFAULT_PRE_PEAK_SAMPLES,
        post_peak_samples = DEFAULT_POST_PEAK_SAMPLES,
        rising = false
    ))]
    pub fn add_spike_channel(
        &mut self,
        channels: Vec<usize>,
        threshold: f32,
        pre_peak_samples: usize,
        post_peak_samples: usize,
        rising: bool,
    ) -> PyResult<u32> {
        let channel_type = SpikeChannelType::from_channel_count(channels.len()).ok_or_else(|| {
            PyValueError::new_err(format!("no spike channel type groups {} channels", channels.len()))
        })?;
        let mut config = SpikeChannelConfig::new(channel_type, channels);
        config.thresholds = vec![threshold; config.source_channels.len()];
        config.pre_peak_samples = pre_peak_samples;
        config.post_peak_samples = post_peak_samples;
        if rising {
            config.direction = ThresholdDirection::Rising;
        }
        Ok(self.detector.add_spike_channel(&config)?.0)
    }

    pub fn set_threshold(&mut self, spike_channel: u32, channel: usize, threshold: f32) -> PyResult<()> {
        let spike_channel = self
            .detector
            .spike_channel_mut(SpikeChannelId(spike_channel))
            .ok_or(SpikeError::UnknownSpikeChannel(spike_channel))?;
        spike_channel.set_threshold(channel, threshold)?;
        Ok(())
    }

    /// `data` is one list of samples per input channel. Returns one dict per
    /// detected spike.
    pub fn process_chunk<'py>(
        &mut self,
        py: Python<'py>,
        data: Vec<Vec<f32>>,
    ) -> PyResult<Vec<Bound<'py, PyDict>>> {
        if data.len() != self.num_channels {
            return Err(PyValueError::new_err(format!(
                "expected {} channels, got {}",
                self.num_channels,
                data.len()
            )));
        }
        let num_samples = data.first().map_or(0, Vec::len);
        if data.iter().any(|c| c.len() != num_samples) {
            return Err(PyValueError::new_err("channels differ in length"));
        }

        let buffer = SampleBuffer::from_channels(data);
        let block = StreamBlock {
            stream_id: 0,
            num_samples,
            source_timestamp: self.timestamp,
        };
        let mut spikes: Vec<Spike> = Vec::new();
        self.detector.process_block(&buffer, &[block], &mut spikes);
        self.timestamp += num_samples as i64;

        spikes
            .iter()
            .map(|spike| {
                let dict = PyDict::new_bound(py);
                dict.set_item("spike_channel", spike.channel_id().0)?;
                dict.set_item("timestamp", spike.timestamp())?;
                dict.set_item("trigger_channel", spike.trigger_channel())?;
                let waveforms: Vec<Vec<f32>> = (0..spike.num_channels())
                    .map(|c| spike.channel_waveform(c).to_vec())
                    .collect();
                dict.set_item("waveforms", waveforms)?;
                Ok(dict)
            })
            .collect()
    }

    pub fn stop_acquisition(&mut self) {
        self.detector.stop_acquisition();
        self.timestamp = 0;
    }

    #[getter]
    pub fn total_spikes(&self) -> u64 {
        self.detector.total_spikes()
    }
}

/// A Python module implemented in Rust.
#[pymodule]
pub fn spike_detector(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySpikeDetector>()?;
    Ok(())
}
