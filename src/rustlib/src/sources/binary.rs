//! Reader for recordings stored in the Open Ephys binary format: a
//! `structure.oebin` JSON descriptor next to `continuous/` and `events/`
//! folders holding interleaved int16 samples and `.npy` side files.

use super::{mmap_file, npy, BufferSource};
use crate::error::{Result, SpikeError};
use crate::processing::sample_buffer::SampleBuffer;
use crate::processing::{DataStream, StreamBlock};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STRUCTURE_FILE: &str = "structure.oebin";
pub const CONTINUOUS_DATA_FILE: &str = "continuous.dat";
pub const TIMESTAMPS_FILE: &str = "timestamps.npy";

const BYTES_PER_SAMPLE: u64 = 2;

// STRUCTURE FILE --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureFile {
    #[serde(rename = "GUI version", default, skip_serializing_if = "Option::is_none")]
    pub gui_version: Option<String>,
    #[serde(default)]
    pub continuous: Vec<ContinuousEntry>,
    #[serde(default)]
    pub events: Vec<EventEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousEntry {
    pub folder_name: String,
    pub sample_rate: f64,
    pub num_channels: usize,
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub channel_name: String,
    pub bit_volts: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub folder_name: String,
}

fn trim_folder(folder_name: &str) -> &str {
    folder_name.trim_end_matches('/')
}

// RECORD METADATA -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedChannelInfo {
    pub name: String,
    pub bit_volts: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordInfo {
    pub name: String,
    pub sample_rate: f32,
    pub num_samples: u64,
    pub start_timestamp: i64,
    pub channels: Vec<RecordedChannelInfo>,
    data_file: PathBuf,
}

impl RecordInfo {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }
}

/// TTL events of one event folder. `channels` holds the line number
/// (1-based as stored on disk).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventInfo {
    pub channels: Vec<u16>,
    pub channel_states: Vec<bool>,
    pub timestamps: Vec<i64>,
}

/// Event delivered to the playback consumer, with a 0-based line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlEvent {
    pub line: u16,
    pub state: bool,
    pub timestamp: i64,
}

// SOURCE ----------------------------------------------------------------------

pub struct BinaryFileSource {
    root_path: PathBuf,
    records: Vec<RecordInfo>,
    events: Vec<EventInfo>,
    active_record: usize,
    data: Option<Mmap>,
    sample_position: u64,
    scratch: Vec<i16>,
}

impl BinaryFileSource {
    /// Opens `structure.oebin` (or the directory containing it).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let structure_path = if path.is_dir() {
            path.join(STRUCTURE_FILE)
        } else {
            path.to_path_buf()
        };

        let text = fs::read_to_string(&structure_path)?;
        let structure: StructureFile = serde_json::from_str(&text)?;

        if structure.gui_version.is_none() {
            return Err(SpikeError::InvalidRecording(format!(
                "{} has no GUI version",
                structure_path.display()
            )));
        }
        if structure.continuous.is_empty() {
            return Err(SpikeError::InvalidRecording(format!(
                "{} lists no continuous data",
                structure_path.display()
            )));
        }

        let root_path = structure_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let records = read_record_info(&root_path, &structure.continuous);
        if records.is_empty() {
            return Err(SpikeError::InvalidRecording(format!(
                "no readable continuous records under {}",
                root_path.display()
            )));
        }

        let events = match records.first() {
            Some(first) => read_event_info(&root_path, &structure.events, first.start_timestamp),
            None => Vec::new(),
        };

        log::info!(
            "Opened {} with {} record(s) and {} event folder(s)",
            structure_path.display(),
            records.len(),
            events.len()
        );

        let mut source = Self {
            root_path,
            records,
            events,
            active_record: 0,
            data: None,
            sample_position: 0,
            scratch: Vec::new(),
        };
        source.update_active_record(0)?;
        Ok(source)
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    pub fn record_info(&self, index: usize) -> Option<&RecordInfo> {
        self.records.get(index)
    }

    pub fn active_record(&self) -> &RecordInfo {
        &self.records[self.active_record]
    }

    pub fn event_info(&self) -> &[EventInfo] {
        &self.events
    }

    pub fn sample_position(&self) -> u64 {
        self.sample_position
    }

    /// Maps the record's data file and rewinds to its first sample.
    pub fn update_active_record(&mut self, index: usize) -> Result<()> {
        let record = self.records.get(index).ok_or_else(|| {
            SpikeError::InvalidParameter(format!(
                "record {} requested, recording has {}",
                index,
                self.records.len()
            ))
        })?;

        let data = mmap_file(&record.data_file)?;
        log::debug!(
            "Active record {} ({}): {} samples x {} channels",
            index,
            record.name,
            record.num_samples,
            record.num_channels()
        );

        self.data = Some(data);
        self.active_record = index;
        self.sample_position = 0;
        Ok(())
    }

    /// Moves the read position, wrapping around the record length.
    pub fn seek_to(&mut self, sample: u64) {
        let num_samples = self.active_record().num_samples;
        self.sample_position = if num_samples == 0 {
            0
        } else {
            sample % num_samples
        };
    }

    /// Copies up to `num_samples` interleaved frames into `out` and advances
    /// the read position. Returns the number of frames read.
    pub fn read_data(&mut self, out: &mut Vec<i16>, num_samples: usize) -> usize {
        let record = &self.records[self.active_record];
        let num_channels = record.num_channels();
        let available = record.num_samples.saturating_sub(self.sample_position);
        let to_read = (num_samples as u64).min(available) as usize;

        out.clear();
        let Some(data) = self.data.as_ref() else {
            return 0;
        };

        let frame_bytes = num_channels * BYTES_PER_SAMPLE as usize;
        let start = self.sample_position as usize * frame_bytes;
        let end = start + to_read * frame_bytes;
        out.extend(
            data[start..end]
                .chunks_exact(BYTES_PER_SAMPLE as usize)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );

        self.sample_position += to_read as u64;
        to_read
    }

    /// De-interleaves one channel from `input`, converting counts to
    /// microvolts.
    pub fn process_channel_data(
        &self,
        input: &[i16],
        output: &mut [f32],
        channel: usize,
        num_samples: usize,
    ) {
        let record = self.active_record();
        let num_channels = record.num_channels();
        let bit_volts = record
            .channels
            .get(channel)
            .map(|c| c.bit_volts)
            .unwrap_or(1.0);

        for (i, value) in output.iter_mut().take(num_samples).enumerate() {
            *value = input[num_channels * i + channel] as f32 * bit_volts;
        }
    }

    /// Events whose time falls in `[start, stop]`, with times mapped onto the
    /// current playback loop.
    pub fn events_in_range(&self, start: i64, stop: i64) -> Vec<TtlEvent> {
        let num_samples = self.active_record().num_samples as i64;
        if num_samples == 0 {
            return Vec::new();
        }

        let local_start = start.rem_euclid(num_samples);
        let local_stop = stop.rem_euclid(num_samples);
        let loop_offset = start.div_euclid(num_samples) * num_samples;

        let mut found = Vec::new();
        for info in &self.events {
            for ((&line, &state), &timestamp) in info
                .channels
                .iter()
                .zip(&info.channel_states)
                .zip(&info.timestamps)
            {
                if timestamp >= local_start && timestamp <= local_stop {
                    found.push(TtlEvent {
                        line: line.saturating_sub(1),
                        state,
                        timestamp: timestamp + loop_offset,
                    });
                }
            }
        }
        found
    }
}

impl BufferSource for BinaryFileSource {
    fn stream(&self) -> DataStream {
        let record = self.active_record();
        DataStream::new(
            self.active_record as u16,
            &record.name,
            record.sample_rate,
            (0..record.num_channels()).collect(),
        )
    }

    fn read_block(&mut self, buffer: &mut SampleBuffer, max_samples: usize) -> Result<StreamBlock> {
        let num_channels = self.active_record().num_channels();
        if buffer.num_channels() < num_channels || buffer.num_samples() < max_samples {
            return Err(SpikeError::InvalidParameter(format!(
                "buffer of {} x {} cannot hold {} x {}",
                buffer.num_channels(),
                buffer.num_samples(),
                num_channels,
                max_samples
            )));
        }

        let first_sample = self.sample_position;
        let mut scratch = std::mem::take(&mut self.scratch);
        let read = self.read_data(&mut scratch, max_samples);
        for channel in 0..num_channels {
            self.process_channel_data(&scratch, buffer.channel_mut(channel), channel, read);
        }
        self.scratch = scratch;

        Ok(StreamBlock {
            stream_id: self.active_record as u16,
            num_samples: read,
            source_timestamp: self.active_record().start_timestamp + first_sample as i64,
        })
    }
}

// METADATA LOADING ------------------------------------------------------------

fn read_record_info(root_path: &Path, entries: &[ContinuousEntry]) -> Vec<RecordInfo> {
    let mut records = Vec::new();

    for entry in entries {
        let folder = trim_folder(&entry.folder_name);
        if entry.channels.is_empty() || entry.num_channels == 0 {
            log::warn!("Skipping continuous entry '{}': no channels", folder);
            continue;
        }
        if entry.channels.len() < entry.num_channels {
            log::warn!(
                "Skipping continuous entry '{}': {} channels declared, {} described",
                folder,
                entry.num_channels,
                entry.channels.len()
            );
            continue;
        }

        let record_dir = root_path.join("continuous").join(folder);
        let data_file = record_dir.join(CONTINUOUS_DATA_FILE);
        let file_size = match fs::metadata(&data_file) {
            Ok(meta) => meta.len(),
            Err(_) => {
                log::warn!("Skipping continuous entry '{}': {} missing", folder, data_file.display());
                continue;
            }
        };

        let timestamps_file = record_dir.join(TIMESTAMPS_FILE);
        let start_timestamp = if timestamps_file.exists() {
            match npy::read_i64(&timestamps_file) {
                Ok(timestamps) => timestamps.first().copied().unwrap_or(0),
                Err(e) => {
                    log::warn!("Skipping continuous entry '{}': {}", folder, e);
                    continue;
                }
            }
        } else {
            0
        };

        records.push(RecordInfo {
            name: folder.to_string(),
            sample_rate: entry.sample_rate as f32,
            num_samples: file_size / entry.num_channels as u64 / BYTES_PER_SAMPLE,
            start_timestamp,
            channels: entry
                .channels
                .iter()
                .take(entry.num_channels)
                .map(|c| RecordedChannelInfo {
                    name: c.channel_name.clone(),
                    bit_volts: c.bit_volts as f32,
                })
                .collect(),
            data_file,
        });
    }

    records
}

fn read_event_info(root_path: &Path, entries: &[EventEntry], start_timestamp: i64) -> Vec<EventInfo> {
    let mut events = Vec::new();

    for entry in entries {
        let event_dir = root_path.join("events").join(trim_folder(&entry.folder_name));
        let states_file = event_dir.join("states.npy");
        let samples_file = event_dir.join("samples.npy");
        if !states_file.exists() || !samples_file.exists() {
            log::debug!("No TTL data in {}", event_dir.display());
            continue;
        }

        let loaded = npy::read_i16(&states_file)
            .and_then(|states| npy::read_i64(&samples_file).map(|samples| (states, samples)));
        let (states, samples) = match loaded {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("Ignoring events in {}: {}", event_dir.display(), e);
                continue;
            }
        };

        let mut info = EventInfo::default();
        for (state, sample) in states.iter().zip(&samples) {
            info.channels.push(state.unsigned_abs());
            info.channel_states.push(*state > 0);
            info.timestamps.push(sample - start_timestamp);
        }
        events.push(info);
    }

    events
}
