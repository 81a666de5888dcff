//! Membership broadcast worker.
//!
//! Mutations stage deltas on the server list; the coordinator hands the
//! packaged updates to this dispatcher, whose worker task delivers them to
//! every recipient in queue order. A recipient that reports lost updates is
//! promoted to a full-list push; one that stays unreachable past the retry
//! limit is routed back into the coordinator as a down-hint.

use crate::common::ServerId;
use crate::coordinator::master_client::MembershipClient;
use crate::coordinator::server_list::MembershipUpdate;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Msg {
    Update(MembershipUpdate),
    Sync(oneshot::Sender<()>),
    Halt,
}

pub struct UpdateDispatcher {
    tx: mpsc::UnboundedSender<Msg>,
    worker: Option<JoinHandle<()>>,
}

impl UpdateDispatcher {
    pub fn start(
        transport: Arc<dyn Transport>,
        hint_tx: mpsc::UnboundedSender<String>,
        retry_limit: usize,
        retry_delay: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, transport, hint_tx, retry_limit, retry_delay));
        Self {
            tx,
            worker: Some(worker),
        }
    }

    pub fn enqueue(&self, update: MembershipUpdate) {
        let _ = self.tx.send(Msg::Update(update));
    }

    /// Barrier: resolves once every update enqueued before it has been
    /// delivered (or given up on).
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Msg::Sync(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Drain the queue, then stop the worker.
    pub async fn halt(&mut self) {
        let _ = self.tx.send(Msg::Halt);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    /// Stop immediately, abandoning queued updates.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for UpdateDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Msg>,
    transport: Arc<dyn Transport>,
    hint_tx: mpsc::UnboundedSender<String>,
    retry_limit: usize,
    retry_delay: Duration,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Msg::Update(update) => {
                for recipient in &update.recipients {
                    deliver_with_retries(
                        transport.as_ref(),
                        &hint_tx,
                        recipient.server_id,
                        &recipient.service_locator,
                        &update,
                        retry_limit,
                        retry_delay,
                    )
                    .await;
                }
            }
            Msg::Sync(done) => {
                let _ = done.send(());
            }
            Msg::Halt => break,
        }
    }
}

async fn deliver_with_retries(
    transport: &dyn Transport,
    hint_tx: &mpsc::UnboundedSender<String>,
    server_id: ServerId,
    locator: &str,
    update: &MembershipUpdate,
    retry_limit: usize,
    retry_delay: Duration,
) {
    for attempt in 0..retry_limit {
        match deliver(transport, server_id, locator, update).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!(
                    "membership update v{} to {} failed (attempt {}): {}",
                    update.version,
                    locator,
                    attempt + 1,
                    e
                );
                if attempt + 1 < retry_limit {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
    // Out of retries; the member is presumed gone.
    let _ = hint_tx.send(locator.to_string());
}

async fn deliver(
    transport: &dyn Transport,
    server_id: ServerId,
    locator: &str,
    update: &MembershipUpdate,
) -> crate::Result<()> {
    let session = transport.get_session(locator).await?;
    let client = MembershipClient::new(session);
    let reply = client.update_server_list(&update.update).await?;
    if reply.lost_updates {
        tracing::info!(
            "server {} lost updates, sending whole list (v{})",
            server_id,
            update.version
        );
        client.set_server_list(&update.full_list).await?;
    } else {
        tracing::debug!("membership update v{} sent to {}", update.version, server_id);
    }
    Ok(())
}
