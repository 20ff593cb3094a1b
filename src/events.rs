//! Event sourcing layer. Every transition and accepted command becomes a
//! durable record, and the same records feed the live status publishers.

use crate::recipes::Beverage;
use crate::resources::Resources;
use crate::store::EventStore;
use crate::types::{ErrorKind, MachineState};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

pub const EVENT_SYSTEM_STARTED: &str = "system_started";
pub const EVENT_STATE_CHANGED: &str = "state_changed";

/// One row of machine history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub previous_state: Option<MachineState>,
    pub new_state: MachineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Full resource picture at a point in time, written beside the events so
/// consumers do not have to replay to answer "how much water is left".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub state: MachineState,
    pub resources: Resources,
}

/// Outbound event notification, the live mirror of an [`EventRecord`].
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub state: MachineState,
    pub data: Value,
}

/// Outbound status document.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub state: MachineState,
    pub selected_beverage: Option<Beverage>,
    pub error_type: Option<ErrorKind>,
    pub resources: Resources,
    pub available_beverages: Vec<Beverage>,
}

/// Where live status and event messages go. Publishing is best effort,
/// sinks must not fail the controller.
pub trait StatusSink: Send {
    fn publish_status(&mut self, status: &StatusSnapshot);
    fn publish_event(&mut self, event: &EventMessage);
}

#[derive(Debug, Clone)]
enum PendingRecord {
    Event(EventRecord),
    Snapshot(SnapshotRecord),
}

// How many records survive a store outage before the oldest get dropped
const PENDING_CAP: usize = 256;

/// Assigns sequence numbers and writes through to the store. When the
/// store fails the recorder degrades to an in-memory queue and retries
/// on the next write, so a transient disk problem never stops the
/// machine.
pub struct EventRecorder {
    store: Box<dyn EventStore>,
    pending: VecDeque<PendingRecord>,
    next_event_seq: u64,
    next_snapshot_seq: u64,
    dropped: u64,
}

impl EventRecorder {
    pub fn new(store: Box<dyn EventStore>) -> Self {
        Self {
            store,
            pending: VecDeque::new(),
            next_event_seq: 0,
            next_snapshot_seq: 0,
            dropped: 0,
        }
    }

    /// Record one event and hand back the stamped record for publishing.
    pub fn record(
        &mut self,
        event_type: &str,
        previous_state: Option<MachineState>,
        new_state: MachineState,
        payload: Option<Value>,
    ) -> EventRecord {
        self.next_event_seq += 1;
        let record = EventRecord {
            seq: self.next_event_seq,
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            previous_state,
            new_state,
            payload,
        };
        self.push(PendingRecord::Event(record.clone()));
        record
    }

    pub fn snapshot(&mut self, state: MachineState, resources: &Resources) -> SnapshotRecord {
        self.next_snapshot_seq += 1;
        let record = SnapshotRecord {
            seq: self.next_snapshot_seq,
            timestamp: Utc::now(),
            state,
            resources: *resources,
        };
        self.push(PendingRecord::Snapshot(record.clone()));
        record
    }

    /// Records buffered during a store outage.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records lost to the buffer cap during a store outage.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Push out anything buffered and flush the store. Fails if the store
    /// is still refusing writes.
    pub fn flush(&mut self) -> Result<()> {
        self.drain_pending();
        if !self.pending.is_empty() {
            bail!("{} records still unwritten", self.pending.len());
        }
        self.store.flush()
    }

    fn push(&mut self, record: PendingRecord) {
        // Retry the backlog first so the store sees records in order
        self.drain_pending();

        if self.pending.is_empty() {
            match self.write(&record) {
                Ok(()) => return,
                Err(err) => warn!("event store write failed, buffering: {:#}", err),
            }
        }
        self.buffer(record);
    }

    fn drain_pending(&mut self) {
        while let Some(record) = self.pending.pop_front() {
            if let Err(err) = self.write(&record) {
                debug!("event store still unavailable: {:#}", err);
                self.pending.push_front(record);
                break;
            }
        }
    }

    fn buffer(&mut self, record: PendingRecord) {
        if self.pending.len() >= PENDING_CAP {
            self.pending.pop_front();
            self.dropped += 1;
            warn!("pending event buffer full, dropped oldest ({} so far)", self.dropped);
        }
        self.pending.push_back(record);
    }

    fn write(&mut self, record: &PendingRecord) -> Result<()> {
        match record {
            PendingRecord::Event(event) => self.store.append_event(event),
            PendingRecord::Snapshot(snapshot) => self.store.append_snapshot(snapshot),
        }
    }
}

/// Rebuild the state trajectory from recorded history. Command records
/// carry state too but only transitions move the needle.
pub fn replay_states(records: &[EventRecord]) -> Vec<MachineState> {
    records
        .iter()
        .filter(|record| {
            record.event_type == EVENT_SYSTEM_STARTED || record.event_type == EVENT_STATE_CHANGED
        })
        .map(|record| record.new_state)
        .collect()
}
