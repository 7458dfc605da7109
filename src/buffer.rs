//! Staging area for engine events whose analysis id is not yet registered.
//!
//! The start RPC and the event channel are not sequenced with respect to each
//! other, so progress for a fresh job can arrive before its id is known. Such
//! events are queued here per id and replayed once the job is registered. A
//! queue that is never claimed (the submission failed after the engine had
//! already started emitting) is dropped once its deadline passes.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::models::EngineEvent;

#[derive(Debug)]
struct BufferedQueue {
    events: Vec<EngineEvent>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct EventBuffer {
    ttl: Duration,
    queues: HashMap<String, BufferedQueue>,
}

impl EventBuffer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            queues: HashMap::new(),
        }
    }

    /// Appends `event` to the queue of its analysis id.
    ///
    /// The deletion deadline is armed by the first event of a queue; later
    /// appends keep it, so an orphaned queue lives at most `ttl`.
    pub fn buffer(&mut self, event: EngineEvent, now: Instant) {
        self.purge_expired(now);

        let ttl = self.ttl;
        let analysis_id = event.analysis_id.clone();
        let queue = self
            .queues
            .entry(analysis_id.clone())
            .or_insert_with(|| BufferedQueue {
                events: Vec::new(),
                expires_at: now + ttl,
            });
        queue.events.push(event);

        debug!(
            job_id = %analysis_id,
            queued = queue.events.len(),
            "Buffered event for unregistered analysis"
        );
    }

    /// Removes and returns every buffered event for `analysis_id` in arrival order.
    pub fn drain(&mut self, analysis_id: &str, now: Instant) -> Vec<EngineEvent> {
        self.purge_expired(now);
        self.queues
            .remove(analysis_id)
            .map(|queue| queue.events)
            .unwrap_or_default()
    }

    /// Drops every queue whose deadline has passed. Returns the number of
    /// events released.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let mut released = 0;
        self.queues.retain(|analysis_id, queue| {
            if queue.expires_at > now {
                return true;
            }
            info!(
                job_id = %analysis_id,
                events = queue.events.len(),
                "Dropping unclaimed buffered events"
            );
            released += queue.events.len();
            false
        });
        released
    }

    pub fn contains(&self, analysis_id: &str) -> bool {
        self.queues.contains_key(analysis_id)
    }

    pub fn queued(&self, analysis_id: &str) -> usize {
        self.queues
            .get(analysis_id)
            .map(|queue| queue.events.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngineEvent;

    const TTL: Duration = Duration::from_secs(30);

    #[test]
    fn drain_returns_events_in_arrival_order() {
        let t0 = Instant::now();
        let mut buffer = EventBuffer::new(TTL);
        buffer.buffer(EngineEvent::running("J1", 10.0, "Loading"), t0);
        buffer.buffer(EngineEvent::running("J2", 5.0, "Loading"), t0);
        buffer.buffer(EngineEvent::running("J1", 40.0, "Filtering"), t0);

        let drained = buffer.drain("J1", t0);
        let progress: Vec<_> = drained.iter().filter_map(|e| e.progress).collect();
        assert_eq!(progress, vec![10.0, 40.0]);

        assert!(!buffer.contains("J1"));
        assert!(buffer.contains("J2"));
        assert!(buffer.drain("J1", t0).is_empty());
    }

    #[test]
    fn unclaimed_queue_expires_after_ttl() {
        let t0 = Instant::now();
        let mut buffer = EventBuffer::new(TTL);
        buffer.buffer(EngineEvent::running("orphan", 10.0, "Loading"), t0);

        assert_eq!(buffer.purge_expired(t0 + Duration::from_secs(29)), 0);
        assert!(buffer.contains("orphan"));

        assert_eq!(buffer.purge_expired(t0 + TTL), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn later_appends_do_not_extend_the_deadline() {
        let t0 = Instant::now();
        let mut buffer = EventBuffer::new(TTL);
        buffer.buffer(EngineEvent::running("J1", 10.0, "Loading"), t0);
        buffer.buffer(
            EngineEvent::running("J1", 20.0, "Loading"),
            t0 + Duration::from_secs(20),
        );

        let drained = buffer.drain("J1", t0 + Duration::from_secs(31));
        assert!(drained.is_empty());
    }

    #[test]
    fn expired_queues_are_purged_on_access() {
        let t0 = Instant::now();
        let mut buffer = EventBuffer::new(TTL);
        buffer.buffer(EngineEvent::running("stale", 1.0, "Loading"), t0);
        buffer.buffer(
            EngineEvent::running("fresh", 1.0, "Loading"),
            t0 + Duration::from_secs(45),
        );

        assert!(!buffer.contains("stale"));
        assert!(buffer.contains("fresh"));
    }
}
