//! Append-only event log.
//!
//! Events live in an arena keyed by `(resource_id, timestamp, sequence)`, so
//! each resource's stream can be replayed in order. There is no update or
//! delete path. Writes are best-effort: a rejected event is reported through
//! tracing and never fails the mutation that produced it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::error;

use fleet_core::{Event, EventType, HostEventData, HostId, HostStatus};

/// Errors returned by [`EventLog::append`].
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("invalid {event_type:?} event for resource '{resource_id}': payload does not match resource type")]
    Invalid {
        resource_id: String,
        event_type: EventType,
    },
}

type EventKey = (String, DateTime<Utc>, u64);

#[derive(Default)]
struct Arena {
    next_seq: u64,
    records: BTreeMap<EventKey, Event>,
}

/// In-memory arena of immutable events.
#[derive(Default)]
pub struct EventLog {
    arena: RwLock<Arena>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, rejecting payloads that do not match their resource type.
    pub async fn append(&self, event: Event) -> Result<(), EventLogError> {
        if !event.is_valid() {
            return Err(EventLogError::Invalid {
                resource_id: event.resource_id,
                event_type: event.event_type,
            });
        }

        let mut arena = self.arena.write().await;
        let seq = arena.next_seq;
        arena.next_seq += 1;
        let key = (event.resource_id.clone(), event.timestamp, seq);
        arena.records.insert(key, event);
        Ok(())
    }

    /// Append an event, logging instead of returning a failure.
    pub async fn record(&self, event: Event) {
        let resource_id = event.resource_id.clone();
        if let Err(e) = self.append(event).await {
            error!(resource_id = %resource_id, error = %e, "Error logging event");
        }
    }

    /// Append a host event with the given type and payload.
    pub async fn log_host_event(&self, host_id: &HostId, event_type: EventType, data: HostEventData) {
        self.record(Event::host(host_id, event_type, data)).await;
    }

    /// Record a status change; nothing is written when the status did not change.
    pub async fn log_host_status_changed(
        &self,
        host_id: &HostId,
        old_status: HostStatus,
        new_status: HostStatus,
    ) {
        if let Some(event) = Event::host_status_changed(host_id, old_status, new_status) {
            self.record(event).await;
        }
    }

    /// All events for one resource, oldest first.
    pub async fn for_resource(&self, resource_id: &str) -> Vec<Event> {
        let arena = self.arena.read().await;
        let start = (resource_id.to_string(), DateTime::<Utc>::MIN_UTC, 0);
        let end = (resource_id.to_string(), DateTime::<Utc>::MAX_UTC, u64::MAX);
        arena
            .records
            .range(start..=end)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Total number of events stored.
    pub async fn len(&self) -> usize {
        self.arena.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{ResourceType, TaskId};

    #[tokio::test]
    async fn test_status_changed_written_only_on_change() {
        let log = EventLog::new();
        let id = HostId::new("h1");

        log.log_host_status_changed(&id, HostStatus::Running, HostStatus::Running)
            .await;
        assert!(log.is_empty().await);

        log.log_host_status_changed(&id, HostStatus::Running, HostStatus::Decommissioned)
            .await;
        let events = log.for_resource("h1").await;
        assert_eq!(events.len(), 1);
        let data = events[0].host_data().unwrap();
        assert_eq!(data.old_status, Some(HostStatus::Running));
        assert_eq!(data.new_status, Some(HostStatus::Decommissioned));
    }

    #[tokio::test]
    async fn test_streams_are_per_resource_and_ordered() {
        let log = EventLog::new();
        let h1 = HostId::new("h1");
        let h2 = HostId::new("h2");

        log.record(Event::host_created(&h1)).await;
        log.record(Event::host_created(&h2)).await;
        log.record(Event::host_provisioned(&h1)).await;

        let events = log.for_resource("h1").await;
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::HostCreated, EventType::HostProvisioned]);
        assert_eq!(log.for_resource("h2").await.len(), 1);
        assert_eq!(log.len().await, 3);
    }

    #[tokio::test]
    async fn test_invalid_event_rejected_but_record_does_not_fail() {
        let log = EventLog::new();
        let mut event = Event::task(
            &TaskId::new("t1"),
            EventType::TaskSystemInfo,
            serde_json::json!({"cpus": 4}),
        );
        event.resource_type = ResourceType::Host;

        assert!(log.append(event.clone()).await.is_err());
        log.record(event).await;
        assert!(log.is_empty().await);
    }
}
