use spike_detector::config::{Config, SpikeChannelConfig};
use spike_detector::local::process_file::{detect_all_records, detect_record};
use spike_detector::local::simulate::{record_folder, simulate_recording, SimulatedSpike, SimulationParams};
use spike_detector::processing::spike::Spike;
use spike_detector::processing::spike_channel::{SpikeChannelId, SpikeChannelType};
use spike_detector::sources::binary::{BinaryFileSource, TtlEvent, STRUCTURE_FILE};
use spike_detector::sources::BufferSource;

fn tetrode_config(num_groups: usize) -> Config {
    let mut config = Config::default();
    for group in 0..num_groups {
        config.detector.spike_channels.push(SpikeChannelConfig::new(
            SpikeChannelType::Tetrode,
            (group * 4..group * 4 + 4).collect(),
        ));
    }
    config
}

fn truth_for(truth: &[SimulatedSpike], record: usize, group: usize) -> Vec<i64> {
    truth
        .iter()
        .filter(|s| s.record == record && s.group == group)
        .map(|s| s.timestamp)
        .collect()
}

fn found_for(spikes: &[Spike], group: usize) -> Vec<i64> {
    spikes
        .iter()
        .filter(|s| s.channel_id() == SpikeChannelId(group as u32))
        .map(Spike::timestamp)
        .collect()
}

#[test]
fn detects_every_simulated_spike() {
    let dir = tempfile::tempdir().unwrap();
    let params = SimulationParams {
        duration_s: 1.0,
        num_groups: 2,
        ..Default::default()
    };
    let truth = simulate_recording(&params, dir.path()).unwrap();

    let (summary, spikes) =
        detect_record(&dir.path().join(STRUCTURE_FILE), &tetrode_config(2), 0).unwrap();

    assert_eq!(summary.samples, 30000);
    assert_eq!(summary.spikes, truth.len());
    for group in 0..2 {
        assert_eq!(found_for(&spikes, group), truth_for(&truth, 0, group));
    }
    assert!(spikes.iter().all(|s| s.trigger_channel() == 0));
}

#[test]
fn all_records_come_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let params = SimulationParams {
        duration_s: 0.3,
        num_records: 3,
        start_timestamp: 1000,
        ..Default::default()
    };
    let truth = simulate_recording(&params, dir.path()).unwrap();

    let results = detect_all_records(dir.path(), &tetrode_config(1)).unwrap();

    assert_eq!(results.len(), 3);
    for (record, (summary, spikes)) in results.iter().enumerate() {
        assert_eq!(summary.source, record_folder(record));
        assert_eq!(found_for(spikes, 0), truth_for(&truth, record, 0));
    }
}

#[test]
fn records_report_their_own_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let params = SimulationParams {
        duration_s: 0.2,
        num_records: 2,
        start_timestamp: 500,
        ..Default::default()
    };
    simulate_recording(&params, dir.path()).unwrap();

    let mut source = BinaryFileSource::open(dir.path()).unwrap();
    assert_eq!(source.num_records(), 2);
    assert_eq!(source.record_info(1).unwrap().start_timestamp, 500 + 6000);
    assert_eq!(source.record_info(0).unwrap().channels.len(), 4);

    source.update_active_record(1).unwrap();
    let stream = source.stream();
    assert_eq!(stream.id, 1);
    assert_eq!(stream.sample_rate, 30000.0);
}

#[test]
fn sync_pulses_are_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let params = SimulationParams {
        duration_s: 2.0,
        start_timestamp: 250,
        ..Default::default()
    };
    simulate_recording(&params, dir.path()).unwrap();

    let source = BinaryFileSource::open(dir.path()).unwrap();
    assert_eq!(
        source.events_in_range(0, 1000),
        vec![
            TtlEvent {
                line: 0,
                state: true,
                timestamp: 0,
            },
            TtlEvent {
                line: 0,
                state: false,
                timestamp: 300,
            },
        ]
    );
    // third playback loop maps onto the second pulse
    let looped = source.events_in_range(2 * 60000 + 29000, 2 * 60000 + 30100);
    assert_eq!(looped.len(), 1);
    assert_eq!(looped[0].timestamp, 2 * 60000 + 30000);
}
