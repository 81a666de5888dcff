//! Per-master recovery plans.
//!
//! Every master carries a will: an ordered set of its tablets with partition
//! assignments that pre-compute how a recovery of that master would be split
//! across survivors. The store owns each will exclusively from enlistment
//! until the will is detached on crash and handed to the recovery engine.

use crate::common::{Error, Result, ServerId};
use crate::proto;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct WillEntry {
    pub table_id: u64,
    pub start_key: u64,
    pub end_key: u64,
    pub partition_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Will {
    entries: Vec<WillEntry>,
}

impl Will {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[WillEntry] {
        &self.entries
    }

    pub fn max_partition_id(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.partition_id)
    }

    /// Entries grouped by partition, ascending partition id.
    pub fn by_partition(&self) -> Vec<(u64, Vec<WillEntry>)> {
        let mut partitions: Vec<(u64, Vec<WillEntry>)> = Vec::new();
        for entry in &self.entries {
            match partitions.iter_mut().find(|(id, _)| *id == entry.partition_id) {
                Some((_, members)) => members.push(entry.clone()),
                None => partitions.push((entry.partition_id, vec![entry.clone()])),
            }
        }
        partitions.sort_by_key(|(id, _)| *id);
        partitions
    }

    pub fn serialize(&self) -> proto::Tablets {
        proto::Tablets {
            tablet: self
                .entries
                .iter()
                .map(|e| proto::Tablet {
                    table_id: e.table_id,
                    start_key: e.start_key,
                    end_key: e.end_key,
                    state: proto::TabletState::Normal as i32,
                    server_id: 0,
                    service_locator: String::new(),
                    partition_id: e.partition_id,
                })
                .collect(),
        }
    }
}

#[derive(Default)]
pub struct WillStore {
    wills: HashMap<ServerId, Will>,
}

impl WillStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give a freshly enlisted master an empty will.
    pub fn attach_empty(&mut self, master: ServerId) {
        self.wills.entry(master).or_default();
    }

    pub fn contains(&self, master: ServerId) -> bool {
        self.wills.contains_key(&master)
    }

    pub fn get(&self, master: ServerId) -> Option<&Will> {
        self.wills.get(&master)
    }

    /// Record a tablet in a master's will. An empty tablet is free to go
    /// anywhere, so it joins the highest existing partition (0 when the
    /// will is empty). Returns the partition assigned.
    pub fn append_tablet(
        &mut self,
        master: ServerId,
        table_id: u64,
        start_key: u64,
        end_key: u64,
    ) -> Result<u64> {
        let will = self
            .wills
            .get_mut(&master)
            .ok_or(Error::NoSuchServer(master))?;
        let partition_id = will.max_partition_id();
        will.entries.push(WillEntry {
            table_id,
            start_key,
            end_key,
            partition_id,
        });
        Ok(partition_id)
    }

    /// Transfer ownership of a crashed master's will to the caller.
    pub fn read_and_detach(&mut self, master: ServerId) -> Result<Will> {
        self.wills
            .remove(&master)
            .ok_or(Error::NoSuchServer(master))
    }

    /// Scrub a dropped table from every will.
    pub fn remove_table(&mut self, table_id: u64) {
        for will in self.wills.values_mut() {
            will.entries.retain(|e| e.table_id != table_id);
        }
    }
}
