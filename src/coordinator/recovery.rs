//! Recovery engine seam.
//!
//! The coordinator only initiates recovery: on a master crash it hands the
//! detached will plus the surviving master and backup lists to the engine.
//! Execution happens on the recovery masters; completion flows back in
//! through TabletsRecovered RPCs.

use crate::common::{Error, Result, ServerId};
use crate::coordinator::master_client::MasterClient;
use crate::coordinator::will::Will;
use crate::proto;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait RecoveryEngine: Send + Sync {
    /// Begin recovering `crashed_id`. Returns once the recovery has been
    /// dispatched, not once it completes.
    async fn start(
        &self,
        crashed_id: ServerId,
        will: Will,
        masters: proto::ServerList,
        backups: proto::ServerList,
    ) -> Result<()>;
}

/// Splits the will by partition and orders one surviving master per
/// partition, round-robin, to take it over.
pub struct PartitionedRecovery {
    transport: Arc<dyn Transport>,
}

impl PartitionedRecovery {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl RecoveryEngine for PartitionedRecovery {
    async fn start(
        &self,
        crashed_id: ServerId,
        will: Will,
        masters: proto::ServerList,
        backups: proto::ServerList,
    ) -> Result<()> {
        let partitions = will.by_partition();
        if partitions.is_empty() {
            tracing::debug!("will of {} is empty, nothing to recover", crashed_id);
            return Ok(());
        }
        if masters.server.is_empty() {
            return Err(Error::Retry);
        }

        for (i, (partition_id, entries)) in partitions.iter().enumerate() {
            let target = &masters.server[i % masters.server.len()];
            let tablets = entries
                .iter()
                .map(|e| proto::Tablet {
                    table_id: e.table_id,
                    start_key: e.start_key,
                    end_key: e.end_key,
                    state: proto::TabletState::Recovering as i32,
                    server_id: crashed_id.as_u64(),
                    service_locator: String::new(),
                    partition_id: e.partition_id,
                })
                .collect();
            let session = self.transport.get_session(&target.service_locator).await?;
            MasterClient::new(session)
                .start_recovery(crashed_id, *partition_id, tablets, &backups)
                .await?;
            tracing::debug!(
                "partition {} of {} assigned to {}",
                partition_id,
                crashed_id,
                target.service_locator
            );
        }
        tracing::info!(
            "recovery of {} dispatched: {} partitions across {} masters, {} backups",
            crashed_id,
            partitions.len(),
            masters.server.len(),
            backups.server.len()
        );
        Ok(())
    }
}

/// One recorded invocation of the engine.
#[derive(Debug, Clone)]
pub struct RecoveryStart {
    pub crashed_id: ServerId,
    pub will: Will,
    pub masters: proto::ServerList,
    pub backups: proto::ServerList,
}

/// Engine double that records invocations instead of dispatching.
#[derive(Default)]
pub struct RecordingRecovery {
    starts: std::sync::Mutex<Vec<RecoveryStart>>,
}

impl RecordingRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> Vec<RecoveryStart> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecoveryEngine for RecordingRecovery {
    async fn start(
        &self,
        crashed_id: ServerId,
        will: Will,
        masters: proto::ServerList,
        backups: proto::ServerList,
    ) -> Result<()> {
        self.starts.lock().unwrap().push(RecoveryStart {
            crashed_id,
            will,
            masters,
            backups,
        });
        Ok(())
    }
}
