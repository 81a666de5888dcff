//! Membership broadcast behavior: recipient filtering, exclusion of the
//! newcomer, lost-update promotion, and unreachable recipients turning into
//! down-hints.

use std::sync::Arc;
use tabletkv::common::{ServerStatus, ServiceMask};
use tabletkv::coordinator::recovery::RecordingRecovery;
use tabletkv::coordinator::server::Responder;
use tabletkv::proto;
use tabletkv::rpc::{Response, RpcType};
use tabletkv::transport::MockTransport;
use tabletkv::{Coordinator, CoordinatorConfig};

fn new_coordinator() -> (Coordinator, MockTransport) {
    let transport = MockTransport::new();
    let mut config = CoordinatorConfig::default();
    config.update_retry_limit = 2;
    config.update_retry_delay_ms = 1;
    let coordinator = Coordinator::new(
        config,
        Arc::new(transport.clone()),
        Arc::new(RecordingRecovery::new()),
        None,
    );
    (coordinator, transport)
}

async fn enlist(coordinator: &mut Coordinator, locator: &str, services: ServiceMask) {
    match coordinator.enlist_server(locator, services, 0).await.unwrap() {
        Response::EnlistServer { .. } => {}
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_newcomer_excluded_from_own_announcement() {
    let (mut coordinator, transport) = new_coordinator();

    // s1 does not speak the membership protocol; s2 does, but the only
    // update staged while it is up announces s2 itself.
    enlist(&mut coordinator, "mock:h=s1", ServiceMask::MASTER).await;
    enlist(&mut coordinator, "mock:h=s2", ServiceMask::MEMBERSHIP).await;
    coordinator.sync_updates().await;

    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_members_receive_later_updates() {
    let (mut coordinator, transport) = new_coordinator();

    enlist(&mut coordinator, "mock:h=s1", ServiceMask::MEMBERSHIP).await;
    enlist(&mut coordinator, "mock:h=m1", ServiceMask::MASTER).await;
    coordinator.sync_updates().await;

    let sent = transport.sent_to("mock:h=s1");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].rpc_type, RpcType::UpdateServerList);
}

#[tokio::test]
async fn test_crash_is_broadcast() {
    let (mut coordinator, transport) = new_coordinator();

    enlist(&mut coordinator, "mock:h=s1", ServiceMask::MEMBERSHIP).await;
    enlist(&mut coordinator, "mock:h=b1", ServiceMask::BACKUP).await;
    coordinator.sync_updates().await;
    transport.clear_sent();

    let mut responder = Responder::detached();
    coordinator
        .hint_server_down("mock:h=b1", &mut responder)
        .await
        .unwrap();
    coordinator.sync_updates().await;

    let sent = transport.sent_to("mock:h=s1");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].rpc_type, RpcType::UpdateServerList);
}

#[tokio::test]
async fn test_lost_updates_gets_whole_list() {
    let (mut coordinator, transport) = new_coordinator();

    enlist(&mut coordinator, "mock:h=s1", ServiceMask::MEMBERSHIP).await;
    coordinator.sync_updates().await;

    transport.queue_ok(&proto::UpdateServerListResponse { lost_updates: true });
    enlist(&mut coordinator, "mock:h=m1", ServiceMask::MASTER).await;
    coordinator.sync_updates().await;

    let sent = transport.sent_to("mock:h=s1");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].rpc_type, RpcType::UpdateServerList);
    assert_eq!(sent[1].rpc_type, RpcType::SetServerList);
}

#[tokio::test]
async fn test_unreachable_member_is_hinted_down_and_crashed() {
    let (mut coordinator, transport) = new_coordinator();

    enlist(&mut coordinator, "mock:h=flaky", ServiceMask::MEMBERSHIP).await;
    transport.set_unreachable("mock:h=flaky");

    // This update cannot be delivered; the updater burns its retries and
    // reports the member.
    enlist(&mut coordinator, "mock:h=m1", ServiceMask::MASTER).await;
    coordinator.sync_updates().await;

    let locator = coordinator.try_next_hint().expect("expected a down-hint");
    assert_eq!(locator, "mock:h=flaky");

    // The serve loop would feed the hint back in; do it by hand.
    let flaky = coordinator
        .server_list()
        .find_up_by_locator("mock:h=flaky")
        .unwrap();
    let mut responder = Responder::detached();
    coordinator
        .hint_server_down(&locator, &mut responder)
        .await
        .unwrap();
    assert_eq!(
        coordinator.server_list().status_of(flaky),
        Some(ServerStatus::Crashed)
    );
}
