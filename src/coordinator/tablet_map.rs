//! The tablet map and the table directory.
//!
//! The tablet map is the authoritative assignment of key ranges to masters.
//! For every table, the union of its tablet ranges tiles the whole keyspace
//! `[0, u64::MAX]` with no overlap and no gap. The map is a set; internal
//! order carries no meaning.

use crate::common::{Error, Result, ServerId};
use crate::proto;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// End of the keyspace, inclusive.
pub const KEY_SPACE_END: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabletState {
    Normal,
    Recovering,
}

impl TabletState {
    fn to_proto(self) -> proto::TabletState {
        match self {
            TabletState::Normal => proto::TabletState::Normal,
            TabletState::Recovering => proto::TabletState::Recovering,
        }
    }
}

/// One contiguous key range of one table, owned by one master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tablet {
    pub table_id: u64,
    pub start_key: u64,
    pub end_key: u64,
    pub state: TabletState,
    pub server_id: ServerId,
    /// Denormalized copy of the owner's locator, kept for clients.
    pub service_locator: String,
}

impl Tablet {
    pub fn serialize(&self) -> proto::Tablet {
        proto::Tablet {
            table_id: self.table_id,
            start_key: self.start_key,
            end_key: self.end_key,
            state: self.state.to_proto() as i32,
            server_id: self.server_id.as_u64(),
            service_locator: self.service_locator.clone(),
            partition_id: 0,
        }
    }
}

#[derive(Default)]
pub struct TabletMap {
    tablets: Vec<Tablet>,
}

impl TabletMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tablets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tablets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tablet> {
        self.tablets.iter()
    }

    pub fn insert(&mut self, tablet: Tablet) {
        self.tablets.push(tablet);
    }

    /// Drop every tablet of `table_id`, returning the removed tablets.
    pub fn remove_table(&mut self, table_id: u64) -> Vec<Tablet> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.tablets.len() {
            if self.tablets[i].table_id == table_id {
                removed.push(self.tablets.swap_remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Mark every tablet owned by `owner` as recovering. Returns how many
    /// were marked.
    pub fn set_recovering(&mut self, owner: ServerId) -> usize {
        let mut marked = 0;
        for tablet in &mut self.tablets {
            if tablet.server_id == owner {
                tablet.state = TabletState::Recovering;
                marked += 1;
            }
        }
        marked
    }

    /// Hand the tablet identified by `(table_id, start_key, end_key)` to a
    /// new owner and return it to normal service. Returns false when no
    /// such tablet exists or it is already in normal service under that
    /// owner (a duplicate completion notice).
    pub fn reassign(
        &mut self,
        table_id: u64,
        start_key: u64,
        end_key: u64,
        new_owner: ServerId,
        locator: &str,
    ) -> bool {
        for tablet in &mut self.tablets {
            if tablet.table_id == table_id
                && tablet.start_key == start_key
                && tablet.end_key == end_key
            {
                if tablet.server_id == new_owner && tablet.state == TabletState::Normal {
                    return false;
                }
                tablet.server_id = new_owner;
                tablet.service_locator = locator.to_string();
                tablet.state = TabletState::Normal;
                return true;
            }
        }
        false
    }

    pub fn any_recovering_owned_by(&self, owner: ServerId) -> bool {
        self.tablets
            .iter()
            .any(|t| t.server_id == owner && t.state == TabletState::Recovering)
    }

    pub fn owners_of_table(&self, table_id: u64) -> Vec<ServerId> {
        let mut owners = Vec::new();
        for tablet in &self.tablets {
            if tablet.table_id == table_id && !owners.contains(&tablet.server_id) {
                owners.push(tablet.server_id);
            }
        }
        owners
    }

    pub fn serialize(&self) -> proto::Tablets {
        proto::Tablets {
            tablet: self.tablets.iter().map(Tablet::serialize).collect(),
        }
    }

    /// Serialize only the tablets owned by `owner`; this is what a master
    /// receives as its own view of the map.
    pub fn serialize_for(&self, owner: ServerId) -> proto::Tablets {
        proto::Tablets {
            tablet: self
                .tablets
                .iter()
                .filter(|t| t.server_id == owner)
                .map(Tablet::serialize)
                .collect(),
        }
    }

    /// Does `table_id`'s tablet set tile `[0, u64::MAX]` exactly, with no
    /// overlap and no gap?
    pub fn covers_keyspace(&self, table_id: u64) -> bool {
        let mut ranges: Vec<(u64, u64)> = self
            .tablets
            .iter()
            .filter(|t| t.table_id == table_id)
            .map(|t| (t.start_key, t.end_key))
            .collect();
        if ranges.is_empty() {
            return false;
        }
        ranges.sort_unstable();
        if ranges[0].0 != 0 {
            return false;
        }
        for window in ranges.windows(2) {
            let (_, prev_end) = window[0];
            let (next_start, _) = window[1];
            if prev_end == KEY_SPACE_END || next_start != prev_end + 1 {
                return false;
            }
        }
        ranges.last().unwrap().1 == KEY_SPACE_END
    }
}

/// Name to table-id catalog. Names are unique; ids are never reused.
#[derive(Default)]
pub struct TableDirectory {
    tables: HashMap<String, u64>,
    next_table_id: u64,
}

impl TableDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Allocate a fresh id for `name`. The caller checks for duplicates.
    pub fn create(&mut self, name: &str) -> u64 {
        let table_id = self.next_table_id;
        self.next_table_id += 1;
        self.tables.insert(name.to_string(), table_id);
        table_id
    }

    pub fn open(&self, name: &str) -> Result<u64> {
        self.tables
            .get(name)
            .copied()
            .ok_or_else(|| Error::TableDoesNotExist(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Option<u64> {
        self.tables.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.tables.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Reinstall a name/id pair during durable-log replay.
    pub(crate) fn restore(&mut self, name: &str, table_id: u64) {
        self.tables.insert(name.to_string(), table_id);
        self.next_table_id = self.next_table_id.max(table_id + 1);
    }
}
