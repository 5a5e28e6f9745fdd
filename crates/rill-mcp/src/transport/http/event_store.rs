//! SSE Event Store
//!
//! Per-(session, stream) bounded ring of emitted SSE events, keyed by
//! strictly increasing event ids. A client that reconnects with
//! `Last-Event-ID` replays everything after that id; an id that is
//! unknown or already evicted is a replay gap and the stream must be
//! closed so the client falls back to a fresh subscription.
//!
//! Only the owning session mutates a store; replay is read-only.

// Layer 1: Standard library imports
use std::collections::VecDeque;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use dashmap::DashMap;

// Layer 3: Internal module imports
use crate::protocol::RequestId;
use crate::transport::TransportError;

/// Identifies one SSE stream within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    /// The POST stream bound to the initiating request's id
    Request(RequestId),
    /// The session's standalone GET stream
    Standalone,
}

/// Format a per-stream sequence number as a wire event id
pub fn format_event_id(sequence: u64) -> String {
    format!("ev-{sequence:04}")
}

/// Parse a wire event id back to its sequence number
pub fn parse_event_id(id: &str) -> Option<u64> {
    id.strip_prefix("ev-")?.parse().ok()
}

#[derive(Debug, Default)]
struct StreamBuffer {
    /// Sequence of the next appended event (starts at 1)
    next_sequence: u64,
    /// Retained `(sequence, bytes)` pairs, oldest first
    events: VecDeque<(u64, Bytes)>,
}

/// Bounded per-stream event rings for one session
#[derive(Debug)]
pub struct SseEventStore {
    streams: DashMap<StreamKey, StreamBuffer>,
    capacity: usize,
}

impl SseEventStore {
    /// Create a store retaining up to `capacity` events per stream
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an event and return its id
    ///
    /// Ids are unique per (session, stream) and strictly increasing.
    pub fn append(&self, key: &StreamKey, data: Bytes) -> String {
        let mut buffer = self.streams.entry(key.clone()).or_default();
        buffer.next_sequence += 1;
        let sequence = buffer.next_sequence;
        buffer.events.push_back((sequence, data));
        while buffer.events.len() > self.capacity {
            buffer.events.pop_front();
        }
        format_event_id(sequence)
    }

    /// Replay every event after `last_event_id`, oldest first
    ///
    /// # Errors
    ///
    /// Returns a transport error when the id does not parse, names an
    /// unknown stream position, or the position was evicted from the
    /// ring; the caller must close the stream so the client falls back
    /// to a fresh subscription.
    pub fn replay_after(
        &self,
        key: &StreamKey,
        last_event_id: &str,
    ) -> Result<Vec<(String, Bytes)>, TransportError> {
        let Some(last_sequence) = parse_event_id(last_event_id) else {
            return Err(TransportError::other(format!(
                "unparseable event id: {last_event_id:?}"
            )));
        };

        let Some(buffer) = self.streams.get(key) else {
            return Err(TransportError::other(format!(
                "no stream to resume for event id {last_event_id}"
            )));
        };

        if last_sequence > buffer.next_sequence {
            return Err(TransportError::other(format!(
                "event id {last_event_id} is ahead of the stream"
            )));
        }
        let oldest_retained = buffer.events.front().map(|(seq, _)| *seq);
        if let Some(oldest) = oldest_retained {
            if last_sequence + 1 < oldest {
                return Err(TransportError::other(format!(
                    "event id {last_event_id} was evicted, replay gap"
                )));
            }
        } else if last_sequence < buffer.next_sequence {
            return Err(TransportError::other(format!(
                "event id {last_event_id} was evicted, replay gap"
            )));
        }

        Ok(buffer
            .events
            .iter()
            .filter(|(sequence, _)| *sequence > last_sequence)
            .map(|(sequence, data)| (format_event_id(*sequence), data.clone()))
            .collect())
    }

    /// Drop a stream's retained events on close
    pub fn forget(&self, key: &StreamKey) {
        self.streams.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SseEventStore {
        SseEventStore::new(8)
    }

    #[test]
    fn ids_are_monotonic_and_zero_padded() {
        let store = store();
        let key = StreamKey::Standalone;
        assert_eq!(store.append(&key, Bytes::from_static(b"a")), "ev-0001");
        assert_eq!(store.append(&key, Bytes::from_static(b"b")), "ev-0002");
        assert_eq!(store.append(&key, Bytes::from_static(b"c")), "ev-0003");
    }

    #[test]
    fn streams_have_independent_sequences() {
        let store = store();
        let standalone = StreamKey::Standalone;
        let request = StreamKey::Request(RequestId::new_number(1));

        assert_eq!(store.append(&standalone, Bytes::from_static(b"a")), "ev-0001");
        assert_eq!(store.append(&request, Bytes::from_static(b"b")), "ev-0001");
        assert_eq!(store.append(&standalone, Bytes::from_static(b"c")), "ev-0002");
    }

    #[test]
    fn replay_returns_exactly_the_suffix() {
        let store = store();
        let key = StreamKey::Standalone;
        for payload in [&b"e1"[..], b"e2", b"e3"] {
            store.append(&key, Bytes::copy_from_slice(payload));
        }

        let replayed = store.replay_after(&key, "ev-0002").unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].0, "ev-0003");
        assert_eq!(replayed[0].1, Bytes::from_static(b"e3"));

        // Replaying from the newest id yields nothing but succeeds
        assert!(store.replay_after(&key, "ev-0003").unwrap().is_empty());
    }

    #[test]
    fn unknown_or_evicted_ids_are_replay_gaps() {
        let store = SseEventStore::new(2);
        let key = StreamKey::Standalone;
        for payload in [&b"e1"[..], b"e2", b"e3", b"e4"] {
            store.append(&key, Bytes::copy_from_slice(payload));
        }

        // ev-0001 fell out of the ring of capacity 2
        assert!(store.replay_after(&key, "ev-0001").is_err());
        // ahead of the stream
        assert!(store.replay_after(&key, "ev-0099").is_err());
        // not an event id at all
        assert!(store.replay_after(&key, "bogus").is_err());
        // unknown stream
        assert!(store
            .replay_after(&StreamKey::Request(RequestId::new_number(9)), "ev-0001")
            .is_err());
    }

    #[test]
    fn forget_drops_history() {
        let store = store();
        let key = StreamKey::Standalone;
        store.append(&key, Bytes::from_static(b"x"));
        store.forget(&key);
        assert!(store.replay_after(&key, "ev-0001").is_err());
    }
}
