use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, SpikeError};
use crate::processing::spike::{Spike, SpikeSink};

const HEADER: [&str; 7] = [
    "source",
    "spike_channel",
    "stream",
    "timestamp",
    "trigger_channel",
    "peak_amplitudes",
    "waveform",
];

/// Writes one CSV row per spike. Waveform samples of all member channels are
/// joined with `;`, channel after channel.
pub struct CsvSpikeWriter<W: Write> {
    writer: csv::Writer<W>,
    source: String,
    written: usize,
    error: Option<SpikeError>,
}

impl CsvSpikeWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write> CsvSpikeWriter<W> {
    pub fn from_writer(inner: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(HEADER)?;
        Ok(Self {
            writer,
            source: String::new(),
            written: 0,
            error: None,
        })
    }

    /// Label written in the `source` column of the following rows.
    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_string();
    }

    fn write_spike(&mut self, spike: &Spike) -> Result<()> {
        let peaks = (0..spike.num_channels())
            .map(|c| format!("{:.3}", spike.peak_amplitude(c)))
            .collect::<Vec<_>>()
            .join(";");
        let waveform = spike
            .waveform()
            .iter()
            .map(|v| format!("{:.3}", v))
            .collect::<Vec<_>>()
            .join(";");

        self.writer.write_record(&[
            self.source.clone(),
            spike.channel_id().to_string(),
            spike.stream_id().to_string(),
            spike.timestamp().to_string(),
            spike.trigger_channel().to_string(),
            peaks,
            waveform,
        ])?;
        Ok(())
    }

    /// Flushes and reports the first write error, if any occurred.
    pub fn finish(mut self) -> Result<usize> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()?;
        Ok(self.written)
    }
}

impl<W: Write> SpikeSink for CsvSpikeWriter<W> {
    fn add_spike(&mut self, spike: Spike) {
        if self.error.is_some() {
            return;
        }
        match self.write_spike(&spike) {
            Ok(()) => self.written += 1,
            Err(e) => {
                log::error!("Failed to write spike at {}: {}", spike.timestamp(), e);
                self.error = Some(e);
            }
        }
    }
}
