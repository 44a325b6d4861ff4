use crate::config::SpikeChannelConfig;
use crate::processing::detector::SpikeDetector;
use crate::processing::sample_buffer::SampleBuffer;
use crate::processing::spike::{Spike, SpikeSink};
use crate::processing::spike_channel::SpikeChannelType;
use crate::processing::{DataStream, StreamBlock};

use std::os::raw::c_void;

/// Spike handed to the host. `waveform` holds `num_channels *
/// samples_per_channel` values, channel after channel, and is only valid
/// for the duration of the callback.
#[repr(C)]
pub struct SpikeEventFFI {
    pub spike_channel: u32,
    pub timestamp: i64,
    pub trigger_channel: u32,
    pub num_channels: u32,
    pub samples_per_channel: u32,
    pub waveform: *const f32,
}

pub type SpikeCallback = extern "C" fn(event: *const SpikeEventFFI, user_data: *mut c_void);

pub struct SpikeDetectorFFI {
    detector: SpikeDetector,
    buffer: SampleBuffer,
    num_channels: usize,
    timestamp: i64,
    callback: Option<SpikeCallback>,
    user_data: *mut c_void,
}

struct CallbackForwarder {
    callback: Option<SpikeCallback>,
    user_data: *mut c_void,
    count: usize,
}

impl SpikeSink for CallbackForwarder {
    fn add_spike(&mut self, spike: Spike) {
        self.count += 1;
        if let Some(callback) = self.callback {
            let event = SpikeEventFFI {
                spike_channel: spike.channel_id().0,
                timestamp: spike.timestamp(),
                trigger_channel: spike.trigger_channel() as u32,
                num_channels: spike.num_channels() as u32,
                samples_per_channel: spike.samples_per_channel() as u32,
                waveform: spike.waveform().as_ptr(),
            };
            callback(&event, self.user_data);
        }
    }
}

fn detector_mut<'a>(processor_ptr: *mut c_void) -> Option<&'a mut SpikeDetectorFFI> {
    if processor_ptr.is_null() {
        return None;
    }
    Some(unsafe { &mut *(processor_ptr as *mut SpikeDetectorFFI) })
}

/// Returns null when the overflow size is rejected.
#[no_mangle]
pub extern "C" fn create_spike_detector(
    num_channels: usize,
    sample_rate: f32,
    overflow_samples: usize,
) -> *mut c_void {
    let mut detector = match SpikeDetector::new(overflow_samples) {
        Ok(detector) => detector,
        Err(e) => {
            log::error!("create_spike_detector: {}", e);
            return std::ptr::null_mut();
        }
    };
    let stream = DataStream::new(0, "host", sample_rate, (0..num_channels).collect());
    if let Err(e) = detector.update_settings(&[stream]) {
        log::error!("create_spike_detector: {}", e);
        return std::ptr::null_mut();
    }

    let boxed = Box::new(SpikeDetectorFFI {
        detector,
        buffer: SampleBuffer::new(num_channels, 0),
        num_channels,
        timestamp: 0,
        callback: None,
        user_data: std::ptr::null_mut(),
    });
    Box::into_raw(boxed) as *mut c_void
}

#[no_mangle]
pub extern "C" fn delete_spike_detector(processor_ptr: *mut c_void) {
    if !processor_ptr.is_null() {
        unsafe {
            drop(Box::from_raw(processor_ptr as *mut SpikeDetectorFFI));
        }
    }
}

/// Groups `count` input channels with one shared threshold. Returns the new
/// spike channel id, or -1 if the group is rejected.
#[no_mangle]
pub extern "C" fn add_spike_channel(
    processor_ptr: *mut c_void,
    channels: *const usize,
    count: usize,
    threshold: f32,
    pre_peak_samples: usize,
    post_peak_samples: usize,
) -> i64 {
    let Some(processor) = detector_mut(processor_ptr) else {
        return -1;
    };
    if channels.is_null() {
        return -1;
    }
    let channels = unsafe { std::slice::from_raw_parts(channels, count) }.to_vec();
    let Some(channel_type) = SpikeChannelType::from_channel_count(count) else {
        log::error!("add_spike_channel: no spike channel type groups {} channels", count);
        return -1;
    };

    let mut config = SpikeChannelConfig::new(channel_type, channels);
    config.thresholds = vec![threshold; count];
    config.pre_peak_samples = pre_peak_samples;
    config.post_peak_samples = post_peak_samples;

    match processor.detector.add_spike_channel(&config) {
        Ok(id) => id.0 as i64,
        Err(e) => {
            log::error!("add_spike_channel: {}", e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn set_spike_callback(
    processor_ptr: *mut c_void,
    callback: Option<SpikeCallback>,
    user_data: *mut c_void,
) {
    if let Some(processor) = detector_mut(processor_ptr) {
        processor.callback = callback;
        processor.user_data = user_data;
    }
}

/// `data` holds `num_samples` values per input channel, channel after
/// channel. Returns the number of spikes reported, or -1 on bad input.
#[no_mangle]
pub extern "C" fn process_spike_block(
    processor_ptr: *mut c_void,
    data: *const f32,
    num_samples: usize,
) -> i64 {
    let Some(processor) = detector_mut(processor_ptr) else {
        return -1;
    };
    if data.is_null() && num_samples > 0 {
        return -1;
    }
    let data = if num_samples == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(data, num_samples * processor.num_channels) }
    };

    if processor.buffer.num_samples() != num_samples {
        processor.buffer.set_size(processor.num_channels, num_samples);
    }
    for channel in 0..processor.num_channels {
        processor
            .buffer
            .channel_mut(channel)
            .copy_from_slice(&data[channel * num_samples..(channel + 1) * num_samples]);
    }

    let block = StreamBlock {
        stream_id: 0,
        num_samples,
        source_timestamp: processor.timestamp,
    };
    let mut forwarder = CallbackForwarder {
        callback: processor.callback,
        user_data: processor.user_data,
        count: 0,
    };
    processor
        .detector
        .process_block(&processor.buffer, &[block], &mut forwarder);
    processor.timestamp += num_samples as i64;
    forwarder.count as i64
}

#[no_mangle]
pub extern "C" fn stop_spike_acquisition(processor_ptr: *mut c_void) {
    if let Some(processor) = detector_mut(processor_ptr) {
        processor.detector.stop_acquisition();
        processor.timestamp = 0;
    }
}
