//! Durable-log seam for coordinator decisions.
//!
//! When a log is configured, every authoritative-state mutation is appended
//! before the client sees an acknowledgment, and replaying the record
//! sequence reconstructs the in-memory state. The backend is external; the
//! in-memory implementation here backs tests and single-node use.

use crate::common::{Result, ServerId};
use crate::coordinator::server_list::ServerEntry;
use crate::coordinator::tablet_map::Tablet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Opaque handle to an appended record.
pub type EntryId = u64;

#[async_trait]
pub trait DurableLog: Send + Sync {
    async fn append(&self, record: &LogRecord) -> Result<EntryId>;
    async fn invalidate(&self, entry_id: EntryId) -> Result<()>;
}

/// One logged coordinator decision. Membership records carry the server
/// list version current at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogRecord {
    ServerAdded { entry: ServerEntry, version: u64 },
    ServerCrashed { server_id: ServerId, version: u64 },
    ServerRemoved { server_id: ServerId, version: u64 },
    TableCreated { name: String, table_id: u64 },
    TableDropped { name: String, table_id: u64 },
    TabletAssigned { tablet: Tablet },
    TabletsRemoved { table_id: u64 },
    TabletsRecovering { server_id: ServerId },
    TabletReassigned { tablet: Tablet },
}

/// In-memory log.
#[derive(Default)]
pub struct MemLog {
    records: Mutex<Vec<(EntryId, LogRecord)>>,
    next_id: AtomicU64,
}

impl MemLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the live records in append order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl DurableLog for MemLog {
    async fn append(&self, record: &LogRecord) -> Result<EntryId> {
        let entry_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .push((entry_id, record.clone()));
        Ok(entry_id)
    }

    async fn invalidate(&self, entry_id: EntryId) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != entry_id);
        Ok(())
    }
}
