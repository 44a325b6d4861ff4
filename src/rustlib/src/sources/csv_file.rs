use super::BufferSource;
use crate::error::{Result, SpikeError};
use crate::processing::sample_buffer::SampleBuffer;
use crate::processing::{DataStream, StreamBlock};
use std::fs::File;
use std::path::Path;

/// Signal table held in memory: one column per channel, one row per sample.
pub struct CsvSignalSource {
    name: String,
    sample_rate: f32,
    channel_names: Vec<String>,
    data: Vec<Vec<f32>>,
    position: usize,
}

fn read_signals_from_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<f32>>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(File::open(path)?);

    let mut names = Vec::new();
    let mut data: Vec<Vec<f32>> = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let parsed: std::result::Result<Vec<f32>, _> =
            record.iter().map(|v| v.parse::<f32>()).collect();

        let values = match parsed {
            Ok(values) => values,
            // a non-numeric first row names the channels
            Err(_) if row == 0 => {
                names = record.iter().map(str::to_string).collect();
                continue;
            }
            Err(e) => {
                return Err(SpikeError::InvalidParameter(format!(
                    "{} row {}: {}",
                    path.display(),
                    row + 1,
                    e
                )))
            }
        };

        if data.is_empty() {
            data = vec![Vec::new(); values.len()];
        }
        if values.len() != data.len() {
            return Err(SpikeError::InvalidParameter(format!(
                "{} row {}: expected {} columns, found {}",
                path.display(),
                row + 1,
                data.len(),
                values.len()
            )));
        }
        for (index, value) in values.into_iter().enumerate() {
            data[index].push(value);
        }
    }

    if names.is_empty() {
        names = (1..=data.len()).map(|c| format!("CH{}", c)).collect();
    }
    Ok((names, data))
}

impl CsvSignalSource {
    pub fn open<P: AsRef<Path>>(path: P, sample_rate: f32) -> Result<Self> {
        let path = path.as_ref();
        if sample_rate <= 0.0 {
            return Err(SpikeError::InvalidParameter(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }

        let (channel_names, data) = read_signals_from_csv(path)?;
        if data.is_empty() {
            return Err(SpikeError::InvalidParameter(format!(
                "{} holds no samples",
                path.display()
            )));
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "csv".to_string());
        log::info!(
            "Loaded {}: {} channels x {} samples",
            path.display(),
            data.len(),
            data[0].len()
        );

        Ok(Self {
            name,
            sample_rate,
            channel_names,
            data,
            position: 0,
        })
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn num_samples(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }
}

impl BufferSource for CsvSignalSource {
    fn stream(&self) -> DataStream {
        DataStream::new(0, &self.name, self.sample_rate, (0..self.data.len()).collect())
    }

    fn read_block(&mut self, buffer: &mut SampleBuffer, max_samples: usize) -> Result<StreamBlock> {
        if buffer.num_channels() < self.data.len() || buffer.num_samples() < max_samples {
            return Err(SpikeError::InvalidParameter(format!(
                "buffer of {} x {} cannot hold {} x {}",
                buffer.num_channels(),
                buffer.num_samples(),
                self.data.len(),
                max_samples
            )));
        }

        let start = self.position;
        let count = max_samples.min(self.num_samples() - start);
        for (channel, samples) in self.data.iter().enumerate() {
            buffer.channel_mut(channel)[..count].copy_from_slice(&samples[start..start + count]);
        }
        self.position += count;

        Ok(StreamBlock {
            stream_id: 0,
            num_samples: count,
            source_timestamp: start as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_header_row_names_channels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "left, right").unwrap();
        writeln!(file, "1.0, -1.0").unwrap();
        writeln!(file, "2.0, -2.0").unwrap();
        writeln!(file, "3.0, -3.0").unwrap();

        let mut source = CsvSignalSource::open(file.path(), 1000.0).unwrap();
        assert_eq!(source.channel_names(), &["left", "right"]);
        assert_eq!(source.stream().channels, vec![0, 1]);

        let mut buffer = SampleBuffer::new(2, 2);
        let first = source.read_block(&mut buffer, 2).unwrap();
        assert_eq!(first.num_samples, 2);
        assert_eq!(buffer.channel(1), &[-1.0, -2.0]);

        let second = source.read_block(&mut buffer, 2).unwrap();
        assert_eq!(second.num_samples, 1);
        assert_eq!(second.source_timestamp, 2);
        assert_eq!(buffer.channel(0)[0], 3.0);
    }

    #[test]
    fn test_headerless_file_gets_default_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.5").unwrap();
        writeln!(file, "0.25").unwrap();

        let source = CsvSignalSource::open(file.path(), 500.0).unwrap();
        assert_eq!(source.channel_names(), &["CH1"]);
        assert_eq!(source.num_samples(), 2);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1,2").unwrap();
        writeln!(file, "3").unwrap();

        assert!(CsvSignalSource::open(file.path(), 500.0).is_err());
    }
}
