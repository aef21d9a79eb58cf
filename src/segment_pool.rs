use crate::device::{ChannelId, PollData};

/// The pool could not reserve memory for its buffers. Fatal; the run never
/// starts.
#[derive(Debug, thiserror::Error)]
#[error("failed to reserve {bytes} bytes for segment buffers")]
pub struct AllocationError {
    pub bytes: usize,
    #[source]
    source: std::collections::TryReserveError,
}

/// A poll reported more samples than the active segment has room for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("segment {segment} channel {channel}: poll wrote up to index {end} but capacity is {capacity}")]
pub struct SegmentOverrun {
    pub segment: usize,
    pub channel: ChannelId,
    pub end: usize,
    pub capacity: usize,
}

/// One channel's buffer within a segment.
#[derive(Debug)]
pub struct ChannelBuffer {
    channel: ChannelId,
    samples: Vec<i16>,
    filled: usize,
    overflow: bool,
}

impl ChannelBuffer {
    fn new(channel: ChannelId, capacity: usize) -> Result<Self, AllocationError> {
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(capacity)
            .map_err(|source| AllocationError {
                bytes: capacity * std::mem::size_of::<i16>(),
                source,
            })?;
        samples.resize(capacity, 0);
        Ok(Self {
            channel,
            samples,
            filled: 0,
            overflow: false,
        })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Input exceeded the representable range at some point while this
    /// buffer was active. Sticky for the segment's lifetime.
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// The captured portion of the buffer.
    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.filled]
    }
}

/// One rotating per-channel buffer block. Capacity is fixed at pool creation
/// and never exceeded.
#[derive(Debug)]
pub struct Segment {
    id: usize,
    channels: Vec<ChannelBuffer>,
    start_index: usize,
    trigger_offset: Option<u64>,
}

impl Segment {
    fn new(id: usize, channels: &[ChannelId], capacity: usize) -> Result<Self, AllocationError> {
        Ok(Self {
            id,
            channels: channels
                .iter()
                .map(|&channel| ChannelBuffer::new(channel, capacity))
                .collect::<Result<_, _>>()?,
            start_index: 0,
            trigger_offset: None,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn channels(&self) -> &[ChannelBuffer] {
        &self.channels
    }

    pub fn capacity(&self) -> usize {
        self.channels.first().map_or(0, ChannelBuffer::capacity)
    }

    /// Highest filled count across channels.
    pub fn filled(&self) -> usize {
        self.channels
            .iter()
            .map(ChannelBuffer::filled)
            .max()
            .unwrap_or(0)
    }

    /// Index within the buffers where this segment's first poll landed.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Trigger position local to this segment, if one fired while it was
    /// active.
    pub fn trigger_offset(&self) -> Option<u64> {
        self.trigger_offset
    }

    pub fn is_empty(&self) -> bool {
        self.filled() == 0
    }

    /// Fold one poll's bookkeeping into the segment. The device has already
    /// written the samples; this advances fill counts and sticky flags.
    pub fn absorb(&mut self, data: &PollData) -> Result<(), SegmentOverrun> {
        if self.is_empty() {
            self.start_index = data.start_index;
        }
        for poll in &data.channels {
            let Some(buffer) = self
                .channels
                .iter_mut()
                .find(|buffer| buffer.channel == poll.channel)
            else {
                log::warn!(
                    "segment {}: poll reported unknown channel {}",
                    self.id,
                    poll.channel
                );
                continue;
            };
            let end = data.start_index + poll.sample_count;
            if end > buffer.capacity() {
                return Err(SegmentOverrun {
                    segment: self.id,
                    channel: poll.channel,
                    end,
                    capacity: buffer.capacity(),
                });
            }
            buffer.filled = buffer.filled.max(end);
            buffer.overflow |= poll.overflow;
        }
        if data.triggered && self.trigger_offset.is_none() {
            self.trigger_offset = Some(data.trigger_offset);
        }
        Ok(())
    }

    /// Make the slot reusable after the sink drained it. Stale samples past
    /// the new fill count are never exposed, so the buffers are not rezeroed.
    pub fn recycle(&mut self) {
        for buffer in &mut self.channels {
            buffer.filled = 0;
            buffer.overflow = false;
        }
        self.start_index = 0;
        self.trigger_offset = None;
    }
}

/// Preallocated, fixed-capacity set of segments for one run.
#[derive(Debug)]
pub struct SegmentPool {
    segments: Vec<Segment>,
}

impl SegmentPool {
    /// Preallocate `segment_count` segments with one zero-initialized buffer
    /// of `capacity` samples per channel.
    pub fn allocate(
        channels: &[ChannelId],
        capacity: usize,
        segment_count: usize,
    ) -> Result<Self, AllocationError> {
        let segments = (0..segment_count)
            .map(|id| Segment::new(id, channels, capacity))
            .collect::<Result<_, _>>()?;
        log::debug!(
            "allocated {segment_count} segments x {} channels x {capacity} samples",
            channels.len()
        );
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, index: usize) -> &Segment {
        &self.segments[index]
    }

    pub fn segment_mut(&mut self, index: usize) -> &mut Segment {
        &mut self.segments[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(n: usize) -> Vec<ChannelId> {
        (0..n).map(ChannelId).collect()
    }

    #[test]
    fn buffers_start_zeroed_and_empty() {
        let pool = SegmentPool::allocate(&channels(2), 16, 3).unwrap();
        assert_eq!(pool.len(), 3);
        let segment = pool.segment(0);
        assert_eq!(segment.capacity(), 16);
        assert!(segment.is_empty());
        for buffer in segment.channels() {
            assert!(buffer.samples().is_empty());
            assert!(!buffer.overflow());
        }
    }

    #[test]
    fn absorb_advances_fill_counts() {
        let ids = channels(2);
        let mut pool = SegmentPool::allocate(&ids, 100, 2).unwrap();
        let segment = pool.segment_mut(0);

        segment.absorb(&PollData::new(&ids, 40, 0)).unwrap();
        assert_eq!(segment.filled(), 40);
        segment.absorb(&PollData::new(&ids, 30, 40)).unwrap();
        assert_eq!(segment.filled(), 70);
        assert_eq!(segment.start_index(), 0);
    }

    #[test]
    fn absorb_rejects_overrun() {
        let ids = channels(1);
        let mut pool = SegmentPool::allocate(&ids, 50, 2).unwrap();
        let err = pool
            .segment_mut(0)
            .absorb(&PollData::new(&ids, 60, 0))
            .unwrap_err();
        assert_eq!(err.end, 60);
        assert_eq!(err.capacity, 50);
    }

    #[test]
    fn overflow_is_sticky_within_segment() {
        let ids = channels(2);
        let mut pool = SegmentPool::allocate(&ids, 100, 2).unwrap();
        let segment = pool.segment_mut(0);

        segment
            .absorb(&PollData::new(&ids, 10, 0).with_overflow(ChannelId(1)))
            .unwrap();
        segment.absorb(&PollData::new(&ids, 10, 10)).unwrap();

        assert!(!segment.channels()[0].overflow());
        assert!(segment.channels()[1].overflow());
    }

    #[test]
    fn first_trigger_offset_is_kept() {
        let ids = channels(1);
        let mut pool = SegmentPool::allocate(&ids, 100, 2).unwrap();
        let segment = pool.segment_mut(0);

        segment
            .absorb(&PollData::new(&ids, 10, 0).with_trigger(5))
            .unwrap();
        segment
            .absorb(&PollData::new(&ids, 10, 10).with_trigger(7))
            .unwrap();
        assert_eq!(segment.trigger_offset(), Some(5));
    }

    #[test]
    fn recycle_clears_bookkeeping() {
        let ids = channels(1);
        let mut pool = SegmentPool::allocate(&ids, 100, 2).unwrap();
        let segment = pool.segment_mut(0);

        segment
            .absorb(&PollData::new(&ids, 10, 0).with_trigger(3).with_overflow(ChannelId(0)))
            .unwrap();
        segment.recycle();

        assert!(segment.is_empty());
        assert_eq!(segment.trigger_offset(), None);
        assert!(!segment.channels()[0].overflow());
    }
}
