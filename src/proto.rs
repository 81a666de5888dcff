//! Wire-format messages exchanged with cluster members.
//!
//! The schemas here are the coordinator's public contract: membership deltas
//! and full server lists pushed to members, tablet maps pushed to masters,
//! and the bodies of the client-facing RPCs. All messages are plain protobuf
//! encodings framed by the envelope in [`crate::rpc`].

/// State of a tablet as published in the tablet map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum TabletState {
    Normal = 0,
    Recovering = 1,
}

/// One cluster member as seen by the rest of the cluster.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerListEntry {
    #[prost(uint32, tag = "1")]
    pub services: u32,
    #[prost(uint64, tag = "2")]
    pub server_id: u64,
    #[prost(string, tag = "3")]
    pub service_locator: String,
    #[prost(uint32, tag = "4")]
    pub expected_read_mbytes_per_sec: u32,
    #[prost(uint32, tag = "5")]
    pub status: u32,
}

/// A full server list or a delta of one, tagged with the coordinator's
/// membership version.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerList {
    #[prost(message, repeated, tag = "1")]
    pub server: Vec<ServerListEntry>,
    #[prost(uint64, tag = "2")]
    pub version_number: u64,
}

/// One contiguous key range of one table.
///
/// `partition_id` is meaningful only inside a will; the public tablet map
/// leaves it zero.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Tablet {
    #[prost(uint64, tag = "1")]
    pub table_id: u64,
    #[prost(uint64, tag = "2")]
    pub start_key: u64,
    #[prost(uint64, tag = "3")]
    pub end_key: u64,
    #[prost(enumeration = "TabletState", tag = "4")]
    pub state: i32,
    #[prost(uint64, tag = "5")]
    pub server_id: u64,
    #[prost(string, tag = "6")]
    pub service_locator: String,
    #[prost(uint64, tag = "7")]
    pub partition_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Tablets {
    #[prost(message, repeated, tag = "1")]
    pub tablet: Vec<Tablet>,
}

// Request and response bodies. RPCs whose body is a bare ServerList or
// Tablets message reuse those types directly; empty bodies are zero bytes.

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateTableRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropTableRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OpenTableRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OpenTableResponse {
    #[prost(uint64, tag = "1")]
    pub table_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnlistServerRequest {
    #[prost(uint32, tag = "1")]
    pub services: u32,
    #[prost(uint32, tag = "2")]
    pub expected_read_mbytes_per_sec: u32,
    #[prost(string, tag = "3")]
    pub service_locator: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnlistServerResponse {
    #[prost(uint64, tag = "1")]
    pub server_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetServerListRequest {
    #[prost(uint32, tag = "1")]
    pub service_mask: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HintServerDownRequest {
    #[prost(string, tag = "1")]
    pub service_locator: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TabletsRecoveredRequest {
    #[prost(uint64, tag = "1")]
    pub crashed_id: u64,
    #[prost(uint64, tag = "2")]
    pub recovery_master_id: u64,
    #[prost(message, repeated, tag = "3")]
    pub tablet: Vec<Tablet>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateServerListResponse {
    #[prost(bool, tag = "1")]
    pub lost_updates: bool,
}

/// Order sent to a recovery master: take over one partition of a crashed
/// master's will, reading replicas from the given backups.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StartRecoveryRequest {
    #[prost(uint64, tag = "1")]
    pub crashed_id: u64,
    #[prost(uint64, tag = "2")]
    pub partition_id: u64,
    #[prost(message, repeated, tag = "3")]
    pub tablet: Vec<Tablet>,
    #[prost(message, repeated, tag = "4")]
    pub backup: Vec<ServerListEntry>,
}
