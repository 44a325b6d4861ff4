use super::sample_buffer::SampleBuffer;
use super::spike::SpikeSink;
use super::{DataStream, StreamBlock, StreamProcessor};
use crate::error::Result;
use std::time::Instant;

// -----------------------------------------------------------------------------
// RUST CORE LOGIC
// -----------------------------------------------------------------------------

// SIGNAL PROCESSOR COMPONENT ----------------------------------------------------------

pub struct SignalProcessorConfig {
    pub verbose: bool,
}

/// Ordered chain of processors sharing one sample buffer per cycle.
pub struct SignalProcessor {
    pub index: u64,
    config: SignalProcessorConfig,
    processors: Vec<Box<dyn StreamProcessor>>,
    acquiring: bool,
}

impl SignalProcessor {
    pub fn new(config: SignalProcessorConfig) -> Self {
        SignalProcessor {
            index: 0,
            config,
            processors: Vec::new(),
            acquiring: false,
        }
    }

    pub fn add_processor(&mut self, processor: Box<dyn StreamProcessor>) {
        self.processors.push(processor);
    }

    pub fn processor_names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    pub fn update_settings(&mut self, streams: &[DataStream]) -> Result<()> {
        for processor in &mut self.processors {
            processor.update_settings(streams)?;
        }
        Ok(())
    }

    pub fn start_acquisition(&mut self) {
        for processor in &mut self.processors {
            processor.start_acquisition();
        }
        self.index = 0;
        self.acquiring = true;
    }

    pub fn stop_acquisition(&mut self) {
        for processor in &mut self.processors {
            processor.stop_acquisition();
        }
        self.acquiring = false;
    }

    /// Runs every processor over one cycle, in chain order.
    pub fn run_chunk(
        &mut self,
        buffer: &mut SampleBuffer,
        blocks: &[StreamBlock],
        sink: &mut dyn SpikeSink,
    ) {
        let start = Instant::now();

        for processor in &mut self.processors {
            processor.process(buffer, blocks, sink);
        }

        if self.config.verbose {
            log::trace!("chunk {} took {:?}", self.index, start.elapsed());
        }
        self.index += 1;
    }
}
