pub mod process_file;
pub mod simulate;
pub mod spike_writer;
