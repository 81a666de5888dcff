//! The cluster coordinator.
//!
//! The coordinator is the single authority for cluster state:
//! - membership: which servers exist, what they provide, whether they live
//! - placement: which master serves which tablet of which table
//! - recovery plans: the per-master wills that pre-split a failover
//! - failure handling: down-hints, recovery initiation, slot reclamation

pub mod durable_log;
pub mod master_client;
pub mod recovery;
pub mod server;
pub mod server_list;
pub mod tablet_map;
pub mod tracker;
pub mod updater;
pub mod will;

pub use server::{Coordinator, Responder};
pub use server_list::{MembershipUpdate, Recipient, ServerEntry, ServerList};
pub use tablet_map::{Tablet, TabletMap, TabletState, TableDirectory, KEY_SPACE_END};
pub use tracker::{ServerChangeEvent, ServerDetails, ServerTracker};
pub use will::{Will, WillStore};
