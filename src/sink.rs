use crate::device::ChannelId;
use crate::segment_pool::Segment;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;

/// Millivolts represented by one ADC count on a channel, derived from its
/// configured range and the device's ADC limits. Applying it is the
/// consumer's business.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelScale {
    pub channel: ChannelId,
    pub millivolts_per_count: f64,
}

/// Run-constant context delivered alongside every segment.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMetadata {
    /// Sample interval the device actually granted, in seconds.
    pub sample_interval_seconds: f64,
    pub scales: Vec<ChannelScale>,
}

/// Per-channel slice of a completed segment, detached from the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub channel: ChannelId,
    pub samples: Vec<i16>,
    pub overflow: bool,
}

/// Snapshot of a segment handed to the consumer. Taking the snapshot leaves
/// the pool slot intact; it is recycled only once delivery succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSegment {
    pub segment_id: usize,
    pub start_index: usize,
    pub channels: Vec<ChannelData>,
    pub trigger_offset: Option<u64>,
}

impl CompletedSegment {
    pub(crate) fn snapshot(segment: &Segment) -> Self {
        Self {
            segment_id: segment.id(),
            start_index: segment.start_index(),
            channels: segment
                .channels()
                .iter()
                .map(|buffer| ChannelData {
                    channel: buffer.channel(),
                    samples: buffer.samples().to_vec(),
                    overflow: buffer.overflow(),
                })
                .collect(),
            trigger_offset: segment.trigger_offset(),
        }
    }

    /// Largest per-channel sample count.
    pub fn sample_count(&self) -> usize {
        self.channels
            .iter()
            .map(|data| data.samples.len())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink cannot accept a segment right now")]
    Full,

    #[error("sink consumer is gone")]
    Closed,
}

/// Downstream consumer of completed segments.
///
/// `deliver` must not block the poll cadence; a sink that cannot accept the
/// segment returns [`SinkError::Full`] and the engine treats the slot as
/// undrained.
pub trait SegmentSink {
    fn deliver(
        &mut self,
        segment: CompletedSegment,
        metadata: &CaptureMetadata,
    ) -> Result<(), SinkError>;

    /// Like [`Self::deliver`], but may wait up to `timeout` for the consumer
    /// to make room. Used once per rotation as a last attempt before the run
    /// stops for lack of buffer space.
    fn deliver_timeout(
        &mut self,
        segment: CompletedSegment,
        metadata: &CaptureMetadata,
        _timeout: Duration,
    ) -> Result<(), SinkError> {
        self.deliver(segment, metadata)
    }
}

/// A delivered segment together with its run context, as seen by the
/// consumer side of a [`QueueSink`].
#[derive(Debug, Clone)]
pub struct DeliveredSegment {
    pub segment: CompletedSegment,
    pub metadata: CaptureMetadata,
}

/// Bounded hand-off queue decoupling a consumer thread from the poll loop.
/// A slow consumer fills the queue and the engine sees [`SinkError::Full`]
/// instead of stalling.
#[derive(Debug)]
pub struct QueueSink {
    tx: Sender<DeliveredSegment>,
}

impl QueueSink {
    /// Create the sink plus the receiver for the consumer thread.
    pub fn bounded(capacity: usize) -> (Self, Receiver<DeliveredSegment>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl SegmentSink for QueueSink {
    fn deliver(
        &mut self,
        segment: CompletedSegment,
        metadata: &CaptureMetadata,
    ) -> Result<(), SinkError> {
        self.tx
            .try_send(DeliveredSegment {
                segment,
                metadata: metadata.clone(),
            })
            .map_err(|error| match error {
                TrySendError::Full(_) => SinkError::Full,
                TrySendError::Disconnected(_) => SinkError::Closed,
            })
    }

    fn deliver_timeout(
        &mut self,
        segment: CompletedSegment,
        metadata: &CaptureMetadata,
        timeout: Duration,
    ) -> Result<(), SinkError> {
        self.tx
            .send_timeout(
                DeliveredSegment {
                    segment,
                    metadata: metadata.clone(),
                },
                timeout,
            )
            .map_err(|error| match error {
                crossbeam_channel::SendTimeoutError::Timeout(_) => SinkError::Full,
                crossbeam_channel::SendTimeoutError::Disconnected(_) => SinkError::Closed,
            })
    }
}

/// Collects every delivered segment in memory. Handy for tests and short
/// captures.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub delivered: Vec<DeliveredSegment>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentSink for MemorySink {
    fn deliver(
        &mut self,
        segment: CompletedSegment,
        metadata: &CaptureMetadata,
    ) -> Result<(), SinkError> {
        self.delivered.push(DeliveredSegment {
            segment,
            metadata: metadata.clone(),
        });
        Ok(())
    }
}
