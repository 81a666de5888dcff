//! Typed clients for coordinator-outbound RPCs.
//!
//! Thin wrappers over a transport session: encode the request body, send the
//! frame, surface non-OK statuses as errors, decode the reply.

use crate::common::{Result, ServerId};
use crate::proto;
use crate::rpc::{self, RpcType};
use crate::transport::Session;
use prost::Message;
use std::sync::Arc;

/// Client for the master-facing management RPCs.
pub struct MasterClient {
    session: Arc<dyn Session>,
}

impl MasterClient {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Replace the master's view of the tablets it serves.
    pub async fn set_tablets(&self, tablets: &proto::Tablets) -> Result<()> {
        let reply = self
            .session
            .send_request(rpc::encode_request(RpcType::SetTablets, tablets))
            .await?;
        rpc::decode_response(reply)?;
        Ok(())
    }

    /// Order the master to recover one partition of a crashed master's
    /// will from the given backups.
    pub async fn start_recovery(
        &self,
        crashed_id: ServerId,
        partition_id: u64,
        tablets: Vec<proto::Tablet>,
        backups: &proto::ServerList,
    ) -> Result<()> {
        let request = proto::StartRecoveryRequest {
            crashed_id: crashed_id.as_u64(),
            partition_id,
            tablet: tablets,
            backup: backups.server.clone(),
        };
        let reply = self
            .session
            .send_request(rpc::encode_request(RpcType::StartRecovery, &request))
            .await?;
        rpc::decode_response(reply)?;
        Ok(())
    }
}

/// Client for the membership-update RPCs served by every member that
/// advertises MEMBERSHIP.
pub struct MembershipClient {
    session: Arc<dyn Session>,
}

impl MembershipClient {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Apply a server list delta. The reply says whether the recipient has
    /// missed earlier updates and needs the whole list instead.
    pub async fn update_server_list(
        &self,
        update: &proto::ServerList,
    ) -> Result<proto::UpdateServerListResponse> {
        let reply = self
            .session
            .send_request(rpc::encode_request(RpcType::UpdateServerList, update))
            .await?;
        let body = rpc::decode_response(reply)?;
        Ok(proto::UpdateServerListResponse::decode(body)?)
    }

    /// Replace the recipient's server list wholesale.
    pub async fn set_server_list(&self, list: &proto::ServerList) -> Result<()> {
        let reply = self
            .session
            .send_request(rpc::encode_request(RpcType::SetServerList, list))
            .await?;
        rpc::decode_response(reply)?;
        Ok(())
    }
}
