use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};

use spike_detector::config::{
    load_config, save_config, BandpassFilterConfig, Config, SpikeChannelConfig,
};
use spike_detector::error::Result;
use spike_detector::local::process_file::{
    build_signal_processor, detect_all_records, detect_record, run_detection, DetectionSummary,
};
use spike_detector::local::simulate::{simulate_recording, SimulationParams};
use spike_detector::local::spike_writer::CsvSpikeWriter;
use spike_detector::processing::spike::{Spike, SpikeSink};
use spike_detector::processing::spike_channel::{SpikeChannel, SpikeChannelType};
use spike_detector::sources::csv_file::CsvSignalSource;
use spike_detector::sources::BufferSource;
use spike_detector::utils::log::init_logger;

#[derive(Parser)]
#[command(
    name = "spikedetect",
    version,
    about = "Threshold spike detection on multi-channel extracellular recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Append log records to logs/<NAME> instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Detect spikes in a binary recording or a CSV signal table
    Detect(DetectArgs),
    /// Write a synthetic binary recording with known spike times
    Simulate(SimulateArgs),
    /// Write a starter configuration for one channel group
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct DetectArgs {
    /// structure.oebin (or its directory), or a .csv file
    #[arg(long)]
    input: PathBuf,

    /// YAML configuration
    #[arg(long)]
    config: PathBuf,

    /// Record of a binary recording to process
    #[arg(long, default_value_t = 0, conflicts_with = "all_records")]
    record: usize,

    /// Process every record of a binary recording in parallel
    #[arg(long)]
    all_records: bool,

    /// Sample rate of CSV input, in Hz
    #[arg(long, default_value_t = 30000.0)]
    sample_rate: f32,

    /// Write detected spikes to this CSV file
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct SimulateArgs {
    /// Directory receiving structure.oebin and the data folders
    #[arg(long)]
    output: PathBuf,

    #[arg(long, default_value_t = 2.0)]
    duration: f32,

    #[arg(long, default_value_t = 30000.0)]
    sample_rate: f32,

    #[arg(long, default_value_t = 1)]
    records: usize,

    #[arg(long, default_value_t = 1)]
    groups: usize,

    #[arg(long, default_value_t = 4)]
    group_size: usize,

    /// Mean firing rate per group, in Hz
    #[arg(long, default_value_t = 20.0)]
    rate: f32,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write the injected spike times to this CSV file
    #[arg(long)]
    truth: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum GroupKind {
    Single,
    Stereotrode,
    Tetrode,
}

impl From<GroupKind> for SpikeChannelType {
    fn from(kind: GroupKind) -> Self {
        match kind {
            GroupKind::Single => SpikeChannelType::Single,
            GroupKind::Stereotrode => SpikeChannelType::Stereotrode,
            GroupKind::Tetrode => SpikeChannelType::Tetrode,
        }
    }
}

#[derive(Args)]
struct InitConfigArgs {
    #[arg(long)]
    output: PathBuf,

    #[arg(long = "type", value_enum, default_value = "tetrode")]
    group: GroupKind,

    /// 0-based input channels, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = vec![0, 1, 2, 3])]
    channels: Vec<usize>,

    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Add a bandpass filter as LOW,HIGH in Hz
    #[arg(long, value_delimiter = ',', num_args = 2)]
    bandpass: Option<Vec<f64>>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("{} {}", "Failed to set up logging:".red(), e);
    }

    let result = match cli.command {
        Command::Detect(args) => detect(args),
        Command::Simulate(args) => simulate(args),
        Command::InitConfig(args) => init_config(args),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn detect(args: DetectArgs) -> Result<()> {
    let config = load_config(&args.config)?;

    let results: Vec<(DetectionSummary, Vec<Spike>)> = if is_csv(&args.input) {
        let mut source = CsvSignalSource::open(&args.input, args.sample_rate)?;
        let mut processor = build_signal_processor(&config, &[source.stream()])?;
        let mut spikes = Vec::new();
        let summary = run_detection(
            &mut source,
            &mut processor,
            config.processor.block_size,
            &mut spikes,
        )?;
        vec![(summary, spikes)]
    } else if args.all_records {
        detect_all_records(&args.input, &config)?
    } else {
        vec![detect_record(&args.input, &config, args.record)?]
    };

    for (summary, _) in &results {
        println!(
            "{} {} spikes in {} samples ({} chunks, {:.2?})",
            format!("{}:", summary.source).cyan().bold(),
            summary.spikes.to_string().green().bold(),
            summary.samples,
            summary.chunks,
            summary.elapsed
        );
    }

    if let Some(output) = &args.output {
        let mut writer = CsvSpikeWriter::create(output)?;
        for (summary, spikes) in results {
            writer.set_source(&summary.source);
            for spike in spikes {
                writer.add_spike(spike);
            }
        }
        let written = writer.finish()?;
        println!("Wrote {} spikes to {}", written, output.display().to_string().yellow());
    }
    Ok(())
}

fn simulate(args: SimulateArgs) -> Result<()> {
    let params = SimulationParams {
        sample_rate: args.sample_rate,
        duration_s: args.duration,
        num_records: args.records,
        group_size: args.group_size,
        num_groups: args.groups,
        spike_rate_hz: args.rate,
        seed: args.seed,
        ..Default::default()
    };

    std::fs::create_dir_all(&args.output)?;
    let truth = simulate_recording(&params, &args.output)?;

    if let Some(path) = &args.truth {
        let mut writer = csv::Writer::from_path(path)?;
        for spike in &truth {
            writer.serialize(spike)?;
        }
        writer.flush()?;
    }

    println!(
        "Simulated {} record(s), {} channels, {} spikes in {}",
        params.num_records,
        params.num_channels(),
        truth.len().to_string().green().bold(),
        args.output.display().to_string().yellow()
    );
    Ok(())
}

fn init_config(args: InitConfigArgs) -> Result<()> {
    let mut channel = SpikeChannelConfig::new(args.group.into(), args.channels);
    if let Some(threshold) = args.threshold {
        channel.thresholds = vec![threshold; channel.source_channels.len()];
    }

    // reject a group that the detector would refuse later
    SpikeChannel::new(&channel, 0)?;

    let mut config = Config::default();
    if let Some([f_low, f_high]) = args.bandpass.as_deref() {
        config.filters.bandpass_filters.push(BandpassFilterConfig {
            id: "spike_band".to_string(),
            f_low: *f_low,
            f_high: *f_high,
        });
    }
    config.detector.spike_channels.push(channel);

    save_config(&config, &args.output)?;
    println!("Wrote configuration to {}", args.output.display().to_string().yellow());
    Ok(())
}
