//! In-memory ingestion stream for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::stream::{IngestionStream, StreamMessage};

#[derive(Debug, Error)]
pub enum InMemoryStreamError {
    /// Internal lock poisoning.
    #[error("stream lock poisoned")]
    Poisoned,

    #[error("no such consumer group: {0}")]
    NoSuchGroup(String),
}

/// A message moved aside because it can never be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub original_message_id: String,
    pub payload: Option<String>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    id: String,
    payload: Option<String>,
}

#[derive(Debug)]
struct Pending {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next never-delivered entry.
    next: usize,
    /// Delivered but unacknowledged entries, keyed by entry index.
    pending: BTreeMap<usize, Pending>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    groups: HashMap<String, GroupState>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory consumer-group log.
///
/// - Entries are never trimmed
/// - Pending entries idle for at least `claim_idle` are handed to the next reader
/// - `read_group` blocks on a condition variable until an append or `block` elapses
#[derive(Debug)]
pub struct InMemoryIngestionStream {
    inner: Mutex<Inner>,
    appended: Condvar,
    claim_idle: Duration,
}

impl Default for InMemoryIngestionStream {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            appended: Condvar::new(),
            claim_idle: Duration::from_secs(60),
        }
    }
}

impl InMemoryIngestionStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending entries become claimable after `idle` (zero: on the next read).
    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    /// Append an entry with an arbitrary (possibly absent) payload field.
    pub fn append_raw(&self, payload: Option<String>) -> Result<String, InMemoryStreamError> {
        let mut inner = self.lock()?;
        let id = format!("{}-0", inner.entries.len() + 1);
        inner.entries.push(Entry {
            id: id.clone(),
            payload,
        });
        drop(inner);

        self.appended.notify_all();
        Ok(id)
    }

    /// Number of delivered-but-unacknowledged messages in `group`.
    pub fn pending_count(&self, group: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|inner| inner.groups.get(group).map(|g| g.pending.len()))
            .unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock()
            .map(|inner| inner.dead_letters.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, InMemoryStreamError> {
        self.inner.lock().map_err(|_| InMemoryStreamError::Poisoned)
    }

    fn claim_idle(&self, inner: &mut Inner, group: &str, consumer: &str, count: usize) -> Vec<StreamMessage> {
        let Inner { entries, groups, .. } = inner;
        let Some(state) = groups.get_mut(group) else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        for (idx, pending) in state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) < self.claim_idle {
                continue;
            }
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.deliveries += 1;

            let entry = &entries[*idx];
            claimed.push(StreamMessage {
                id: entry.id.clone(),
                payload: entry.payload.clone(),
                deliveries: pending.deliveries,
            });
        }
        claimed
    }

    fn read_new(inner: &mut Inner, group: &str, consumer: &str, count: usize) -> Vec<StreamMessage> {
        let Inner { entries, groups, .. } = inner;
        let Some(state) = groups.get_mut(group) else {
            return Vec::new();
        };

        let now = Instant::now();
        let end = (state.next + count).min(entries.len());
        let mut fresh = Vec::with_capacity(end.saturating_sub(state.next));
        for idx in state.next..end {
            state.pending.insert(
                idx,
                Pending {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
            fresh.push(StreamMessage {
                id: entries[idx].id.clone(),
                payload: entries[idx].payload.clone(),
                deliveries: 1,
            });
        }
        state.next = end;
        fresh
    }
}

impl IngestionStream for InMemoryIngestionStream {
    type Error = InMemoryStreamError;

    fn ensure_group(&self, group: &str) -> Result<(), Self::Error> {
        let mut inner = self.lock()?;
        inner.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    fn append(&self, payload: &str) -> Result<String, Self::Error> {
        self.append_raw(Some(payload.to_string()))
    }

    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, Self::Error> {
        let mut inner = self.lock()?;
        if !inner.groups.contains_key(group) {
            return Err(InMemoryStreamError::NoSuchGroup(group.to_string()));
        }

        let claimed = self.claim_idle(&mut inner, group, consumer, count);
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        let fresh = Self::read_new(&mut inner, group, consumer, count);
        if !fresh.is_empty() || block.is_zero() {
            return Ok(fresh);
        }

        let (mut inner, _) = self
            .appended
            .wait_timeout(inner, block)
            .map_err(|_| InMemoryStreamError::Poisoned)?;
        Ok(Self::read_new(&mut inner, group, consumer, count))
    }

    fn ack(&self, group: &str, ids: &[String]) -> Result<(), Self::Error> {
        let mut inner = self.lock()?;
        let Inner { entries, groups, .. } = &mut *inner;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| InMemoryStreamError::NoSuchGroup(group.to_string()))?;

        for id in ids {
            if let Some(idx) = entries.iter().position(|e| &e.id == id) {
                state.pending.remove(&idx);
            }
        }
        Ok(())
    }

    fn dead_letter(&self, message: &StreamMessage, reason: &str) -> Result<(), Self::Error> {
        let mut inner = self.lock()?;
        inner.dead_letters.push(DeadLetter {
            original_message_id: message.id.clone(),
            payload: message.payload.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(msgs: &[StreamMessage]) -> Vec<&str> {
        msgs.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn ensure_group_is_idempotent() {
        let stream = InMemoryIngestionStream::new();
        stream.ensure_group("g").unwrap();
        stream.append("{}").unwrap();
        stream.read_group("g", "c1", 10, Duration::ZERO).unwrap();

        // Re-creating must not reset the group's offset.
        stream.ensure_group("g").unwrap();
        assert!(stream.read_group("g", "c1", 10, Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn reading_an_unknown_group_fails() {
        let stream = InMemoryIngestionStream::new();
        assert!(matches!(
            stream.read_group("missing", "c", 1, Duration::ZERO),
            Err(InMemoryStreamError::NoSuchGroup(_))
        ));
    }

    #[test]
    fn group_starts_at_origin_and_respects_count() {
        let stream = InMemoryIngestionStream::new();
        for _ in 0..3 {
            stream.append("{}").unwrap();
        }
        stream.ensure_group("g").unwrap();

        let first = stream.read_group("g", "c", 2, Duration::ZERO).unwrap();
        let second = stream.read_group("g", "c", 2, Duration::ZERO).unwrap();
        assert_eq!(ids(&first), vec!["1-0", "2-0"]);
        assert_eq!(ids(&second), vec!["3-0"]);
        assert_eq!(stream.pending_count("g"), 3);
    }

    #[test]
    fn each_message_goes_to_one_consumer_of_a_group() {
        let stream = InMemoryIngestionStream::new();
        stream.ensure_group("g").unwrap();
        stream.append("{}").unwrap();

        assert_eq!(stream.read_group("g", "c1", 10, Duration::ZERO).unwrap().len(), 1);
        assert!(stream.read_group("g", "c2", 10, Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn unacked_messages_are_reclaimed_after_idle_threshold() {
        let stream = InMemoryIngestionStream::new().with_claim_idle(Duration::ZERO);
        stream.ensure_group("g").unwrap();
        stream.append("{}").unwrap();

        let first = stream.read_group("g", "c1", 10, Duration::ZERO).unwrap();
        assert_eq!(first[0].deliveries, 1);

        let again = stream.read_group("g", "c2", 10, Duration::ZERO).unwrap();
        assert_eq!(ids(&again), vec!["1-0"]);
        assert_eq!(again[0].deliveries, 2);

        stream.ack("g", &[again[0].id.clone()]).unwrap();
        assert_eq!(stream.pending_count("g"), 0);
        assert!(stream.read_group("g", "c1", 10, Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn fresh_pending_messages_are_not_reclaimed() {
        let stream = InMemoryIngestionStream::new();
        stream.ensure_group("g").unwrap();
        stream.append("{}").unwrap();

        stream.read_group("g", "c1", 10, Duration::ZERO).unwrap();
        assert!(stream.read_group("g", "c2", 10, Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn blocking_read_times_out_empty() {
        let stream = InMemoryIngestionStream::new();
        stream.ensure_group("g").unwrap();

        let started = Instant::now();
        let msgs = stream.read_group("g", "c", 10, Duration::from_millis(20)).unwrap();
        assert!(msgs.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn dead_letters_keep_original_id_and_reason() {
        let stream = InMemoryIngestionStream::new();
        let id = stream.append_raw(None).unwrap();
        let msg = StreamMessage {
            id: id.clone(),
            payload: None,
            deliveries: 1,
        };

        stream.dead_letter(&msg, "payload field missing or empty").unwrap();
        let dlq = stream.dead_letters();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].original_message_id, id);
        assert_eq!(dlq[0].reason, "payload field missing or empty");
    }
}
