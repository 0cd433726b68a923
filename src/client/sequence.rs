//! Event sequence tracking
//!
//! The gateway numbers sequenced events per connection starting at 1,
//! incrementing by exactly one. The tracker observes each incoming seq
//! and reports gaps so callers can refetch state; events are delivered
//! either way, the gap is advisory.

/// A detected discontinuity in the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqGap {
    /// The seq we expected next (last observed + 1)
    pub expected: u64,
    /// The seq that actually arrived
    pub received: u64,
}

/// Tracks the last observed sequence number for the current connection
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Option<u64>,
}

impl SequenceTracker {
    /// Create a tracker with no observed history
    pub fn new() -> Self {
        SequenceTracker { last: None }
    }

    /// Observe a sequenced event. Returns a gap descriptor when the seq
    /// jumped forward past `last + 1`. The first observation on a fresh
    /// connection never gaps, and stale or duplicate seqs are ignored
    /// (the tracker only ever moves forward).
    pub fn observe(&mut self, seq: u64) -> Option<SeqGap> {
        let gap = match self.last {
            Some(last) if seq > last + 1 => Some(SeqGap {
                expected: last + 1,
                received: seq,
            }),
            _ => None,
        };
        if self.last.map_or(true, |last| seq > last) {
            self.last = Some(seq);
        }
        gap
    }

    /// Forget all history. Called on every successful handshake so each
    /// connection's numbering starts fresh.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// The last seq observed on this connection, if any
    pub fn last(&self) -> Option<u64> {
        self.last
    }
}
