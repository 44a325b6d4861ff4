pub mod binary;
pub mod csv_file;
pub mod npy;

use crate::error::Result;
use crate::processing::sample_buffer::SampleBuffer;
use crate::processing::{DataStream, StreamBlock};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Upstream source delivering one stream block per processing cycle.
pub trait BufferSource {
    fn stream(&self) -> DataStream;

    /// Fills up to `max_samples` of every stream channel. A block with zero
    /// samples means the source is exhausted.
    fn read_block(&mut self, buffer: &mut SampleBuffer, max_samples: usize) -> Result<StreamBlock>;
}

/// Open a file and map it into memory (read-only)
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}
