use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use crate::error::{Result, SpikeError};
use crate::sources::binary::{
    ChannelEntry, ContinuousEntry, EventEntry, StructureFile, CONTINUOUS_DATA_FILE, STRUCTURE_FILE,
    TIMESTAMPS_FILE,
};
use crate::sources::npy;

// -----------------------------------------------------------------------------
// SETUP FOR THE SIMULATED SIGNALS
// -----------------------------------------------------------------------------

const BACKGROUND_I_FREQ: f64 = 0.5;
const BACKGROUND_II_FREQ: f64 = 8.0;
const BACKGROUND_AMPLITUDE: f64 = 4.0;

/// Negative-going extracellular spike, sample offsets -2..=4 around the peak.
const SPIKE_TEMPLATE: [f64; 7] = [-0.3, -0.7, -1.0, -0.6, -0.2, 0.15, 0.05];
const TEMPLATE_PEAK: usize = 2;

/// Amplitude falloff across the members of a channel group.
const MEMBER_SCALE: [f64; 4] = [1.0, 0.8, 0.6, 0.45];

/// Spikes are kept this far from both ends of a record so every one of them
/// is fully scanned, including the tail the detector holds back.
const EDGE_MARGIN: usize = 400;

const SYNC_PULSE_SECONDS: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub sample_rate: f32,
    pub duration_s: f32,
    pub num_records: usize,
    /// Channels per group; groups are laid out side by side.
    pub group_size: usize,
    pub num_groups: usize,
    pub spike_rate_hz: f32,
    /// Peak amplitude in microvolts on the first member of a group.
    pub spike_amplitude: f32,
    pub noise_amplitude: f32,
    pub bit_volts: f32,
    /// Smallest spacing between two spikes of the same group, in samples.
    pub min_interval: usize,
    pub start_timestamp: i64,
    pub seed: u64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            sample_rate: 30000.0,
            duration_s: 2.0,
            num_records: 1,
            group_size: 4,
            num_groups: 1,
            spike_rate_hz: 20.0,
            spike_amplitude: 120.0,
            noise_amplitude: 10.0,
            bit_volts: 0.195,
            min_interval: 120,
            start_timestamp: 0,
            seed: 42,
        }
    }
}

impl SimulationParams {
    pub fn num_channels(&self) -> usize {
        self.group_size * self.num_groups
    }

    pub fn num_samples(&self) -> usize {
        (self.duration_s as f64 * self.sample_rate as f64).round() as usize
    }

    fn validate(&self) -> Result<()> {
        if self.group_size == 0 || self.group_size > MEMBER_SCALE.len() {
            return Err(SpikeError::InvalidParameter(format!(
                "group size must be between 1 and {}, got {}",
                MEMBER_SCALE.len(),
                self.group_size
            )));
        }
        if self.num_groups == 0 || self.num_records == 0 {
            return Err(SpikeError::InvalidParameter(
                "simulation needs at least one group and one record".to_string(),
            ));
        }
        if self.sample_rate <= 0.0 || self.bit_volts <= 0.0 || self.min_interval == 0 {
            return Err(SpikeError::InvalidParameter(
                "sample rate, bit volts and minimum interval must be positive".to_string(),
            ));
        }
        if self.num_samples() <= 2 * EDGE_MARGIN {
            return Err(SpikeError::InvalidParameter(format!(
                "{} s is too short to hold any spikes",
                self.duration_s
            )));
        }
        Ok(())
    }
}

/// Ground truth for one injected spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedSpike {
    pub record: usize,
    pub group: usize,
    /// Sample index of the peak inside its record.
    pub sample: usize,
    pub timestamp: i64,
}

pub fn record_folder(record: usize) -> String {
    format!("Simulated-{}.0", 100 + record)
}

// -----------------------------------------------------------------------------
// SIMULATING DATA
// -----------------------------------------------------------------------------

/// Writes a synthetic binary recording into `dir` and returns the injected
/// spikes, sorted by record then sample.
pub fn simulate_recording<P: AsRef<Path>>(
    params: &SimulationParams,
    dir: P,
) -> Result<Vec<SimulatedSpike>> {
    params.validate()?;
    let dir = dir.as_ref();
    let mut rng = StdRng::seed_from_u64(params.seed);

    let mut structure = StructureFile {
        gui_version: Some("0.6.0".to_string()),
        continuous: Vec::new(),
        events: Vec::new(),
    };
    let mut truth = Vec::new();

    for record in 0..params.num_records {
        let folder = record_folder(record);
        let spikes = simulate_record(params, record, dir, &folder, &mut rng)?;
        log::info!(
            "Simulated record {} with {} spikes on {} channels",
            folder,
            spikes.len(),
            params.num_channels()
        );
        truth.extend(spikes);

        structure.continuous.push(ContinuousEntry {
            folder_name: format!("{}/", folder),
            sample_rate: params.sample_rate as f64,
            num_channels: params.num_channels(),
            channels: (1..=params.num_channels())
                .map(|c| ChannelEntry {
                    channel_name: format!("CH{}", c),
                    bit_volts: params.bit_volts as f64,
                })
                .collect(),
        });
        structure.events.push(EventEntry {
            folder_name: format!("{}/TTL_1/", folder),
        });
    }

    fs::write(dir.join(STRUCTURE_FILE), serde_json::to_string_pretty(&structure)?)?;
    Ok(truth)
}

fn simulate_record(
    params: &SimulationParams,
    record: usize,
    dir: &Path,
    folder: &str,
    rng: &mut StdRng,
) -> Result<Vec<SimulatedSpike>> {
    let num_samples = params.num_samples();
    let num_channels = params.num_channels();
    let sample_rate = params.sample_rate as f64;
    let start_timestamp = params.start_timestamp + (record * num_samples) as i64;

    // background: slow sines plus uniform noise, as microvolts
    let noise = params.noise_amplitude as f64;
    let mut signal = vec![0.0f64; num_samples * num_channels];
    for i in 0..num_samples {
        let time = i as f64 / sample_rate;
        let background = BACKGROUND_AMPLITUDE
            * ((2.0 * PI * BACKGROUND_I_FREQ * time).sin()
                + 0.5 * (2.0 * PI * BACKGROUND_II_FREQ * time).sin());
        for c in 0..num_channels {
            let random_signal = if noise > 0.0 {
                rng.gen_range(-noise..noise)
            } else {
                0.0
            };
            signal[i * num_channels + c] = background + random_signal;
        }
    }

    // spikes, one train per group
    let mean_interval = (sample_rate / params.spike_rate_hz.max(f32::EPSILON) as f64).max(1.0);
    let max_extra = (2.0 * mean_interval) as usize;
    let mut spikes = Vec::new();
    for group in 0..params.num_groups {
        let mut peak = EDGE_MARGIN + rng.gen_range(0..=max_extra);
        while peak < num_samples - EDGE_MARGIN {
            for member in 0..params.group_size {
                let channel = group * params.group_size + member;
                let amplitude = params.spike_amplitude as f64 * MEMBER_SCALE[member];
                for (offset, factor) in SPIKE_TEMPLATE.iter().enumerate() {
                    let i = peak + offset - TEMPLATE_PEAK;
                    signal[i * num_channels + channel] += amplitude * factor;
                }
            }
            spikes.push(SimulatedSpike {
                record,
                group,
                sample: peak,
                timestamp: start_timestamp + peak as i64,
            });
            peak += params.min_interval + rng.gen_range(0..=max_extra);
        }
    }
    spikes.sort_by_key(|s| (s.sample, s.group));

    let record_dir = dir.join("continuous").join(folder);
    fs::create_dir_all(&record_dir)?;
    let bit_volts = params.bit_volts as f64;
    let bytes: Vec<u8> = signal
        .iter()
        .map(|v| (v / bit_volts).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
        .flat_map(i16::to_le_bytes)
        .collect();
    fs::write(record_dir.join(CONTINUOUS_DATA_FILE), bytes)?;

    let timestamps: Vec<i64> = (0..num_samples as i64).map(|i| start_timestamp + i).collect();
    npy::write_i64(&record_dir.join(TIMESTAMPS_FILE), &timestamps)?;

    // once-a-second sync pulse on TTL line 1
    let pulse_length = (SYNC_PULSE_SECONDS * sample_rate).max(1.0) as i64;
    let mut states = Vec::new();
    let mut samples = Vec::new();
    let mut onset = 0i64;
    while onset + pulse_length < num_samples as i64 {
        states.extend([1i16, -1]);
        samples.extend([start_timestamp + onset, start_timestamp + onset + pulse_length]);
        onset += sample_rate as i64;
    }
    let event_dir = dir.join("events").join(folder).join("TTL_1");
    fs::create_dir_all(&event_dir)?;
    npy::write_i16(&event_dir.join("states.npy"), &states)?;
    npy::write_i64(&event_dir.join("samples.npy"), &samples)?;

    Ok(spikes)
}
