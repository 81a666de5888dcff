//! The coordinator: RPC dispatch and the authoritative state machine.
//!
//! All state lives in one task. Connection tasks decode frames and forward
//! `(request, responder)` pairs over a channel; the coordinator loop
//! dispatches exactly one handler at a time, so no handler ever observes
//! another's intermediate state. The two sanctioned staging areas for work
//! that outlives a handler are the will store and the membership update
//! queue.

use crate::common::{CoordinatorConfig, Error, Result, ServerId, ServiceMask};
use crate::coordinator::durable_log::{DurableLog, LogRecord};
use crate::coordinator::master_client::MasterClient;
use crate::coordinator::recovery::RecoveryEngine;
use crate::coordinator::server_list::ServerList;
use crate::coordinator::tablet_map::{Tablet, TabletMap, TabletState, TableDirectory, KEY_SPACE_END};
use crate::coordinator::tracker::ServerTracker;
use crate::coordinator::updater::UpdateDispatcher;
use crate::coordinator::will::WillStore;
use crate::proto;
use crate::rpc::{self, Request, Response};
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// One-shot capability to answer the request currently being handled.
///
/// The dispatcher replies on handler return; a handler that must answer
/// early (hintServerDown, to avoid deadlocking against the very master it
/// is about to recover) consumes the responder itself and must not touch
/// the request again.
pub struct Responder {
    tx: Option<oneshot::Sender<Bytes>>,
}

impl Responder {
    pub fn new(tx: oneshot::Sender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A responder with nowhere to reply; used for internally generated
    /// requests.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn respond(&mut self, response: &Response) {
        self.send(response.encode());
    }

    pub fn respond_error(&mut self, err: &Error) {
        self.send(rpc::encode_error(err));
    }

    fn send(&mut self, payload: Bytes) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(payload);
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    transport: Arc<dyn Transport>,
    recovery: Arc<dyn RecoveryEngine>,
    durable_log: Option<Arc<dyn DurableLog>>,
    server_list: ServerList,
    tablet_map: TabletMap,
    tables: TableDirectory,
    wills: WillStore,
    updater: UpdateDispatcher,
    hint_tx: mpsc::UnboundedSender<String>,
    hint_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        recovery: Arc<dyn RecoveryEngine>,
        durable_log: Option<Arc<dyn DurableLog>>,
    ) -> Self {
        let (hint_tx, hint_rx) = mpsc::unbounded_channel();
        let updater = UpdateDispatcher::start(
            transport.clone(),
            hint_tx.clone(),
            config.update_retry_limit,
            config.update_retry_delay(),
        );
        Self {
            config,
            transport,
            recovery,
            durable_log,
            server_list: ServerList::new(),
            tablet_map: TabletMap::new(),
            tables: TableDirectory::new(),
            wills: WillStore::new(),
            updater,
            hint_tx,
            hint_rx: Some(hint_rx),
        }
    }

    pub fn server_list(&self) -> &ServerList {
        &self.server_list
    }

    pub fn tablet_map(&self) -> &TabletMap {
        &self.tablet_map
    }

    pub fn wills(&self) -> &WillStore {
        &self.wills
    }

    pub fn register_tracker(&mut self, tracker: &Arc<dyn ServerTracker>) {
        self.server_list.register_tracker(tracker);
    }

    /// Await delivery of every membership update staged so far.
    pub async fn sync_updates(&self) {
        self.updater.sync().await;
    }

    /// Pop the next internally queued down-hint, if any. The serve loop
    /// normally consumes these; tests drive them by hand.
    pub fn try_next_hint(&mut self) -> Option<String> {
        self.hint_rx.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Serve RPCs until a fatal error.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        tracing::info!("starting coordinator on {}", self.config.bind_addr);
        let (rpc_tx, mut rpc_rx) = mpsc::unbounded_channel::<(Request, Responder)>();
        let mut hint_rx = self.hint_rx.take().expect("serve() called twice");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!("connection from {}", peer);
                    tokio::spawn(handle_connection(stream, rpc_tx.clone()));
                }
                Some((request, responder)) = rpc_rx.recv() => {
                    self.dispatch(request, responder).await?;
                }
                Some(locator) = hint_rx.recv() => {
                    let mut responder = Responder::detached();
                    if let Err(e) = self.hint_server_down(&locator, &mut responder).await {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        tracing::warn!("internal down hint for {} failed: {}", locator, e);
                    }
                }
            }
        }
    }

    /// Route one request to its handler and reply. Only fatal errors
    /// propagate; everything else is answered with its status code.
    pub async fn dispatch(&mut self, request: Request, mut responder: Responder) -> Result<()> {
        let result = match request {
            Request::Ping => Ok(Response::Ping),
            Request::CreateTable { name } => self.create_table(&name).await,
            Request::DropTable { name } => self.drop_table(&name).await,
            Request::OpenTable { name } => self.open_table(&name),
            Request::EnlistServer {
                services,
                locator,
                read_mbytes_per_sec,
            } => self.enlist_server(&locator, services, read_mbytes_per_sec).await,
            Request::GetServerList { filter } => {
                Ok(Response::ServerList(self.server_list.serialize(filter)))
            }
            Request::GetBackupList => Ok(Response::ServerList(
                self.server_list.serialize(ServiceMask::BACKUP),
            )),
            Request::GetTabletMap => Ok(Response::TabletMap(self.tablet_map.serialize())),
            Request::HintServerDown { locator } => {
                self.hint_server_down(&locator, &mut responder).await
            }
            Request::TabletsRecovered {
                crashed_id,
                recovery_master_id,
                tablets,
            } => {
                self.tablets_recovered(crashed_id, recovery_master_id, tablets)
                    .await
            }
        };
        let result = result.and_then(|response| {
            self.check_invariants()?;
            Ok(response)
        });
        match result {
            Ok(response) => {
                responder.respond(&response);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("{}", e);
                responder.respond_error(&e);
                Err(e)
            }
            Err(e) => {
                tracing::debug!("request failed: {}", e);
                responder.respond_error(&e);
                Ok(())
            }
        }
    }

    /// Admit a server into the cluster.
    pub async fn enlist_server(
        &mut self,
        locator: &str,
        services: ServiceMask,
        read_mbytes_per_sec: u32,
    ) -> Result<Response> {
        let id = self.server_list.add(locator, services, read_mbytes_per_sec);
        if services.contains(ServiceMask::MASTER) {
            self.wills.attach_empty(id);
        }
        if let Some(log) = &self.durable_log {
            let entry = self.server_list.lookup(id)?.clone();
            let entry_id = log
                .append(&LogRecord::ServerAdded {
                    entry,
                    version: self.server_list.version(),
                })
                .await?;
            self.server_list.set_persisted_entry_id(id, entry_id)?;
        }
        // The newcomer must not receive its own birth announcement.
        self.send_membership_update(Some(id));
        tracing::info!("enlisted {} ({}) at {}", id, services, locator);
        Ok(Response::EnlistServer { server_id: id })
    }

    /// Create a table backed by one tablet covering the whole keyspace.
    /// Needs at least one UP master; a duplicate name succeeds untouched.
    pub async fn create_table(&mut self, name: &str) -> Result<Response> {
        let master_index = self.server_list.next_master_index(0).ok_or(Error::Retry)?;
        if self.tables.contains(name) {
            return Ok(Response::CreateTable);
        }
        let (master_id, master_locator) = {
            let entry = self.server_list.get(master_index).unwrap();
            (entry.server_id, entry.service_locator.clone())
        };

        let table_id = self.tables.create(name);
        let tablet = Tablet {
            table_id,
            start_key: 0,
            end_key: KEY_SPACE_END,
            state: TabletState::Normal,
            server_id: master_id,
            service_locator: master_locator,
        };
        self.tablet_map.insert(tablet.clone());
        let partition_id = self
            .wills
            .append_tablet(master_id, table_id, 0, KEY_SPACE_END)?;

        if let Some(log) = &self.durable_log {
            log.append(&LogRecord::TableCreated {
                name: name.to_string(),
                table_id,
            })
            .await?;
            log.append(&LogRecord::TabletAssigned { tablet }).await?;
        }

        self.push_tablets(master_id).await;
        tracing::info!("created table '{}' with id {}", name, table_id);
        tracing::debug!(
            "assigned to {} (will partition {}), {} tablets in the map",
            master_id,
            partition_id,
            self.tablet_map.len()
        );
        Ok(Response::CreateTable)
    }

    /// Drop a table and every tablet of it. Unknown names succeed.
    pub async fn drop_table(&mut self, name: &str) -> Result<Response> {
        let Some(table_id) = self.tables.remove(name) else {
            return Ok(Response::DropTable);
        };
        let removed = self.tablet_map.remove_table(table_id);
        self.wills.remove_table(table_id);

        if let Some(log) = &self.durable_log {
            log.append(&LogRecord::TableDropped {
                name: name.to_string(),
                table_id,
            })
            .await?;
            log.append(&LogRecord::TabletsRemoved { table_id }).await?;
        }

        // Every master that owned a piece gets its pruned view.
        let mut owners: Vec<ServerId> = Vec::new();
        for tablet in &removed {
            if !owners.contains(&tablet.server_id) {
                owners.push(tablet.server_id);
            }
        }
        for owner in owners {
            self.push_tablets(owner).await;
        }

        tracing::info!("dropped table '{}' with id {}", name, table_id);
        tracing::debug!("{} tablets in the map", self.tablet_map.len());
        Ok(Response::DropTable)
    }

    pub fn open_table(&self, name: &str) -> Result<Response> {
        let table_id = self.tables.open(name)?;
        Ok(Response::OpenTable { table_id })
    }

    /// Act on a report that the server at `locator` is down. The reply goes
    /// out before any recovery work starts. Hints about unknown locators
    /// succeed silently, so duplicates are harmless.
    pub async fn hint_server_down(
        &mut self,
        locator: &str,
        responder: &mut Responder,
    ) -> Result<Response> {
        responder.respond(&Response::HintServerDown);
        // The request is answered; nothing below may touch it.

        tracing::debug!("hint server down: {}", locator);
        let Some(id) = self.server_list.find_up_by_locator(locator) else {
            tracing::debug!("no up server at {}, ignoring hint", locator);
            return Ok(Response::HintServerDown);
        };
        let services = self.server_list.lookup(id)?.services;

        self.server_list.crashed(id)?;
        if let Some(log) = &self.durable_log {
            log.append(&LogRecord::ServerCrashed {
                server_id: id,
                version: self.server_list.version(),
            })
            .await?;
        }
        self.send_membership_update(None);

        if services.contains(ServiceMask::MASTER) {
            let marked = self.tablet_map.set_recovering(id);
            if let Some(log) = &self.durable_log {
                log.append(&LogRecord::TabletsRecovering { server_id: id })
                    .await?;
            }
            let will = self.wills.read_and_detach(id)?;
            let masters = self.server_list.up_servers(ServiceMask::MASTER);
            let backups = self.server_list.up_servers(ServiceMask::BACKUP);
            tracing::info!(
                "master {} crashed: recovering {} tablets with {} masters and {} backups",
                id,
                marked,
                masters.server.len(),
                backups.server.len()
            );
            if let Err(e) = self.recovery.start(id, will, masters, backups).await {
                tracing::error!("recovery of {} failed to start: {}", id, e);
            }
            if marked == 0 {
                // Nothing to recover; the slot can be released right away.
                self.finish_recovery(id).await?;
            }
        } else if services.contains(ServiceMask::BACKUP) {
            // Masters learn of the lost backup from the membership delta
            // and re-replicate on their own.
            tracing::info!("backup {} at {} crashed", id, locator);
        }
        Ok(Response::HintServerDown)
    }

    /// Ingest a recovery master's completion notice: the listed tablets now
    /// live on `recovery_master_id`. Once no recovering tablet of the
    /// crashed master remains, its slot is released.
    pub async fn tablets_recovered(
        &mut self,
        crashed_id: ServerId,
        recovery_master_id: ServerId,
        tablets: Vec<proto::Tablet>,
    ) -> Result<Response> {
        let new_locator = self
            .server_list
            .lookup(recovery_master_id)?
            .service_locator
            .clone();
        for tablet in &tablets {
            let moved = self.tablet_map.reassign(
                tablet.table_id,
                tablet.start_key,
                tablet.end_key,
                recovery_master_id,
                &new_locator,
            );
            if !moved {
                tracing::warn!(
                    "recovered tablet ({}, [{}, {}]) is unknown or already reassigned, ignoring",
                    tablet.table_id,
                    tablet.start_key,
                    tablet.end_key
                );
                continue;
            }
            self.wills.append_tablet(
                recovery_master_id,
                tablet.table_id,
                tablet.start_key,
                tablet.end_key,
            )?;
            if let Some(log) = &self.durable_log {
                let record = Tablet {
                    table_id: tablet.table_id,
                    start_key: tablet.start_key,
                    end_key: tablet.end_key,
                    state: TabletState::Normal,
                    server_id: recovery_master_id,
                    service_locator: new_locator.clone(),
                };
                log.append(&LogRecord::TabletReassigned { tablet: record })
                    .await?;
            }
        }
        self.push_tablets(recovery_master_id).await;

        let crash_pending = self.server_list.status_of(crashed_id)
            == Some(crate::common::ServerStatus::Crashed);
        if crash_pending && !self.tablet_map.any_recovering_owned_by(crashed_id) {
            self.finish_recovery(crashed_id).await?;
        }
        Ok(Response::TabletsRecovered)
    }

    async fn finish_recovery(&mut self, crashed_id: ServerId) -> Result<()> {
        let persisted = self.server_list.persisted_entry_id(crashed_id)?;
        self.server_list.remove(crashed_id)?;
        if let Some(log) = &self.durable_log {
            log.append(&LogRecord::ServerRemoved {
                server_id: crashed_id,
                version: self.server_list.version(),
            })
            .await?;
            if let Some(entry_id) = persisted {
                log.invalidate(entry_id).await?;
            }
        }
        self.send_membership_update(None);
        tracing::info!("recovery of master {} complete, slot released", crashed_id);
        Ok(())
    }

    fn send_membership_update(&mut self, exclude: Option<ServerId>) {
        if let Some(update) = self.server_list.take_update(exclude) {
            self.updater.enqueue(update);
        }
    }

    /// Push a master's view of the tablet map to it. Failures are consumed:
    /// logged and converted to a down-hint, never rolled back.
    async fn push_tablets(&mut self, master_id: ServerId) {
        let Ok(entry) = self.server_list.lookup(master_id) else {
            return;
        };
        let locator = entry.service_locator.clone();
        let tablets = self.tablet_map.serialize_for(master_id);
        let result = async {
            let session = self.transport.get_session(&locator).await?;
            MasterClient::new(session).set_tablets(&tablets).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("tablet map push to {} at {} failed: {}", master_id, locator, e);
            let _ = self.hint_tx.send(locator);
        }
    }

    /// Verify the cross-structure invariants that must hold between
    /// handlers. A violation means the authoritative state is corrupt and
    /// the coordinator must stop.
    fn check_invariants(&self) -> Result<()> {
        for (name, table_id) in self.tables.iter() {
            if !self.tablet_map.covers_keyspace(table_id) {
                return Err(Error::Fatal(format!(
                    "table '{}' ({}) does not tile the keyspace",
                    name, table_id
                )));
            }
        }
        for tablet in self.tablet_map.iter() {
            if self.server_list.status_of(tablet.server_id).is_none() {
                return Err(Error::Fatal(format!(
                    "tablet ({}, [{}, {}]) owned by vacated server {}",
                    tablet.table_id, tablet.start_key, tablet.end_key, tablet.server_id
                )));
            }
            if self.tables.iter().all(|(_, id)| id != tablet.table_id) {
                return Err(Error::Fatal(format!(
                    "tablet of unknown table {}",
                    tablet.table_id
                )));
            }
        }
        Ok(())
    }

    /// Rebuild in-memory state from a durable-log record sequence.
    pub fn replay<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = LogRecord>,
    {
        for record in records {
            match record {
                LogRecord::ServerAdded { entry, version } => {
                    let id = entry.server_id;
                    let is_master = entry.is_master();
                    self.server_list.apply_replayed_add(entry, version);
                    if is_master {
                        self.wills.attach_empty(id);
                    }
                }
                LogRecord::ServerCrashed { server_id, version } => {
                    let was_master = self
                        .server_list
                        .lookup(server_id)
                        .map(|e| e.is_master())
                        .unwrap_or(false);
                    self.server_list.apply_replayed_crashed(server_id, version);
                    if was_master {
                        let _ = self.wills.read_and_detach(server_id);
                    }
                }
                LogRecord::ServerRemoved { server_id, version } => {
                    self.server_list.apply_replayed_removed(server_id, version);
                }
                LogRecord::TableCreated { name, table_id } => {
                    self.tables.restore(&name, table_id);
                }
                LogRecord::TableDropped { name, .. } => {
                    self.tables.remove(&name);
                }
                LogRecord::TabletAssigned { tablet } => {
                    let _ = self.wills.append_tablet(
                        tablet.server_id,
                        tablet.table_id,
                        tablet.start_key,
                        tablet.end_key,
                    );
                    self.tablet_map.insert(tablet);
                }
                LogRecord::TabletsRemoved { table_id } => {
                    self.tablet_map.remove_table(table_id);
                    self.wills.remove_table(table_id);
                }
                LogRecord::TabletsRecovering { server_id } => {
                    self.tablet_map.set_recovering(server_id);
                }
                LogRecord::TabletReassigned { tablet } => {
                    self.tablet_map.reassign(
                        tablet.table_id,
                        tablet.start_key,
                        tablet.end_key,
                        tablet.server_id,
                        &tablet.service_locator,
                    );
                    let _ = self.wills.append_tablet(
                        tablet.server_id,
                        tablet.table_id,
                        tablet.start_key,
                        tablet.end_key,
                    );
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    rpc_tx: mpsc::UnboundedSender<(Request, Responder)>,
) {
    loop {
        let frame = match rpc::read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("connection read failed: {}", e);
                return;
            }
        };
        let reply = match Request::decode(frame) {
            Ok(request) => {
                let (tx, rx) = oneshot::channel();
                if rpc_tx.send((request, Responder::new(tx))).is_err() {
                    return;
                }
                match rx.await {
                    Ok(payload) => payload,
                    // The coordinator went away mid-request.
                    Err(_) => rpc::encode_error(&Error::Fatal("coordinator stopped".into())),
                }
            }
            Err(e) => rpc::encode_error(&e),
        };
        if let Err(e) = rpc::write_frame(&mut stream, &reply).await {
            tracing::debug!("connection write failed: {}", e);
            return;
        }
    }
}
