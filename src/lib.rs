//! # ScopeStream RS
//!
//! A streaming capture engine for polled oscilloscope-class acquisition
//! devices: continuous multi-channel sampling into a bounded, rotating set
//! of memory segments, with trigger and overflow bookkeeping and hand-off of
//! completed segments to a downstream consumer.
//!
//! The device itself sits behind the [`StreamingDevice`] trait. Opening the
//! unit, configuring ranges and coupling, and querying ADC limits stay with
//! the caller; this crate drives the four calls of the streaming protocol —
//! bind buffers, start the continuous run, poll for the latest samples,
//! stop — and owns the segment lifecycle around them.
//!
//! ## Features
//!
//! - **Segment rotation**: fixed-capacity per-channel buffers recycled in
//!   rotation order, with replace-then-add buffer registration on every pass
//! - **Polling cadence**: inter-poll delay derived from the granted sample
//!   interval and a configurable segment fill fraction
//! - **Trigger/overflow tracking**: first trigger fixes the absolute index
//!   for the run; per-channel overflow flags are sticky
//! - **Non-stalling hand-off**: completed segments go to a [`SegmentSink`],
//!   optionally through a bounded queue ([`QueueSink`]) feeding a consumer
//!   thread
//! - **Cooperative cancellation**: the inter-poll sleep wakes early on a
//!   [`CancelHandle`] request
//!
//! ## Example
//!
//! ```rust,no_run
//! use scopestream_rs::{
//!     cancellation, run_streaming_capture, CaptureConfig, ChannelConfig, Coupling,
//!     QueueSink, SimulatedDevice, VoltageRange,
//! };
//!
//! let mut device = SimulatedDevice::new(); // or any StreamingDevice impl
//! let config = CaptureConfig::new(vec![
//!     ChannelConfig::enabled(VoltageRange::V5, Coupling::Dc),
//!     ChannelConfig::enabled(VoltageRange::Mv500, Coupling::Ac),
//! ]);
//!
//! let (mut sink, segments) = QueueSink::bounded(8);
//! let consumer = std::thread::spawn(move || {
//!     for delivery in segments {
//!         println!(
//!             "segment {}: {} samples",
//!             delivery.segment.segment_id,
//!             delivery.segment.sample_count()
//!         );
//!     }
//! });
//!
//! let (handle, token) = cancellation();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(2));
//!     handle.cancel();
//! });
//!
//! let summary = run_streaming_capture(&mut device, &config, Some(&mut sink), &token)?;
//! println!("stopped: {}", summary.stop_reason);
//! drop(sink);
//! consumer.join().expect("consumer thread panicked");
//! # Ok::<(), scopestream_rs::CaptureError>(())
//! ```

pub mod buffer_registrar;
pub mod cancel;
pub mod capture;
pub mod device;
pub mod rotation;
pub mod run_tracker;
pub mod segment_pool;
pub mod sim_device;
pub mod sink;
pub mod streaming_poller;

// Re-export the main types for convenience
pub use capture::{
    run_streaming_capture, CaptureConfig, CaptureError, CaptureSummary, ConfigError, StopReason,
};

pub use device::{
    BufferAction, BufferBinding, ChannelConfig, ChannelId, Coupling, DeviceCall, DeviceError,
    DownsampleMode, PollData, PollStatus, StreamingDevice, StreamingRequest, TimeUnit,
    VoltageRange,
};

pub use buffer_registrar::{BufferRegistrar, RegistrationPhase};

pub use cancel::{cancellation, CancelHandle, CancelToken};

pub use rotation::{RotationController, RunState};

pub use run_tracker::RunTracker;

pub use segment_pool::{AllocationError, Segment, SegmentPool};

pub use sim_device::SimulatedDevice;

pub use sink::{
    CaptureMetadata, ChannelScale, CompletedSegment, DeliveredSegment, MemorySink, QueueSink,
    SegmentSink, SinkError,
};

pub use streaming_poller::{StreamingPoller, DEFAULT_FILL_FRACTION};
