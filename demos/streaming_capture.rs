// Streaming capture against the simulated device
//
// This example drives a full capture run without hardware: a scripted device
// fills three rotating segments, a consumer thread drains the hand-off queue
// and the run ends via autostop.

use scopestream_rs::{
    cancellation, run_streaming_capture, CaptureConfig, ChannelConfig, ChannelId, Coupling,
    PollData, PollStatus, QueueSink, SimulatedDevice, TimeUnit, VoltageRange,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("ScopeStream Streaming Capture Example");
    println!("=====================================\n");

    let channels = vec![
        ChannelConfig::enabled(VoltageRange::V5, Coupling::Dc),
        ChannelConfig::enabled(VoltageRange::Mv500, Coupling::Ac),
    ];
    let ids: Vec<ChannelId> = (0..channels.len()).map(ChannelId).collect();

    // Script three segments' worth of polls, a trigger in the second and an
    // autostop at the end.
    let capacity = 10_000;
    let mut device = SimulatedDevice::new();
    device.push(PollStatus::Data(PollData::new(&ids, capacity, 0)));
    device.push(PollStatus::BuffersExhausted { auto_stopped: false });
    device.push(PollStatus::Data(
        PollData::new(&ids, capacity, 0).with_trigger(1_234),
    ));
    device.push(PollStatus::BuffersExhausted { auto_stopped: false });
    device.push(PollStatus::Data(
        PollData::new(&ids, 4_000, 0).with_auto_stop(),
    ));

    let mut config = CaptureConfig::new(channels);
    config.segment_capacity = capacity;
    config.segment_count = 3;
    config.sample_interval = 1;
    config.time_unit = TimeUnit::Microseconds;
    config.total_samples = Some(24_000);
    config.auto_stop = true;

    // Bounded hand-off queue: a slow consumer never stalls the poll loop.
    let (mut sink, segments) = QueueSink::bounded(4);
    let consumer = std::thread::spawn(move || {
        for delivery in segments {
            let mv_per_count = delivery.metadata.scales[0].millivolts_per_count;
            println!(
                "   segment {}: {} samples, interval {:.1e} s, {:.3} mV/count",
                delivery.segment.segment_id,
                delivery.segment.sample_count(),
                delivery.metadata.sample_interval_seconds,
                mv_per_count,
            );
        }
    });

    let (_handle, token) = cancellation();
    println!("Capturing...");
    let summary = run_streaming_capture(&mut device, &config, Some(&mut sink), &token)?;
    drop(sink);
    consumer.join().expect("consumer thread panicked");

    println!("\nRun finished: {}", summary.stop_reason);
    for (channel, samples) in &summary.samples_captured {
        println!("   channel {channel}: {samples} samples");
    }
    if let Some(index) = summary.trigger_index {
        println!("   trigger at absolute sample index {index}");
    }
    println!("   {} segments delivered", summary.segments_delivered);

    Ok(())
}
