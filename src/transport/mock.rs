//! Transport double for tests.
//!
//! Records every outbound request and answers from a queue of canned
//! responses; when the queue is empty it replies with an empty-body success,
//! which decodes as the default value of any response message.

use crate::common::{Error, Result};
use crate::rpc::{self, RpcType};
use crate::transport::{Session, Transport};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use prost::Message;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// One recorded outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub locator: String,
    pub rpc_type: RpcType,
}

#[derive(Default)]
struct MockInner {
    sends: Mutex<Vec<SentRequest>>,
    replies: Mutex<VecDeque<Bytes>>,
    unreachable: Mutex<HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full response payload (status word plus body) for the next
    /// outbound request.
    pub fn queue_reply(&self, payload: Bytes) {
        self.inner.replies.lock().unwrap().push_back(payload);
    }

    /// Queue a successful response with the given body.
    pub fn queue_ok<M: Message>(&self, body: &M) {
        self.queue_reply(rpc::encode_response(crate::common::status::OK, Some(body)));
    }

    /// Make every `get_session` for `locator` fail.
    pub fn set_unreachable(&self, locator: &str) {
        self.inner
            .unreachable
            .lock()
            .unwrap()
            .insert(locator.to_string());
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.inner.sends.lock().unwrap().clone()
    }

    pub fn sent_to(&self, locator: &str) -> Vec<SentRequest> {
        self.sent()
            .into_iter()
            .filter(|s| s.locator == locator)
            .collect()
    }

    pub fn clear_sent(&self) {
        self.inner.sends.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get_session(&self, locator: &str) -> Result<Arc<dyn Session>> {
        if self.inner.unreachable.lock().unwrap().contains(locator) {
            return Err(Error::TransportFailure(format!(
                "{} is unreachable",
                locator
            )));
        }
        Ok(Arc::new(MockSession {
            locator: locator.to_string(),
            inner: self.inner.clone(),
        }))
    }
}

struct MockSession {
    locator: String,
    inner: Arc<MockInner>,
}

#[async_trait]
impl Session for MockSession {
    async fn send_request(&self, mut request: Bytes) -> Result<Bytes> {
        if request.len() < 4 {
            return Err(Error::Other("truncated request header".into()));
        }
        let raw = request.get_u32_le();
        let rpc_type = RpcType::from_u32(raw)
            .ok_or_else(|| Error::Other(format!("mock received unknown rpc type {}", raw)))?;
        self.inner.sends.lock().unwrap().push(SentRequest {
            locator: self.locator.clone(),
            rpc_type,
        });
        let canned = self.inner.replies.lock().unwrap().pop_front();
        Ok(canned.unwrap_or_else(|| {
            rpc::encode_response(crate::common::status::OK, None::<&crate::proto::Tablets>)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto;

    #[tokio::test]
    async fn test_records_and_replies() {
        let transport = MockTransport::new();
        let session = transport.get_session("mock:h=m1").await.unwrap();

        let reply = session
            .send_request(rpc::encode_request_empty(RpcType::SetTablets))
            .await
            .unwrap();
        let body = rpc::decode_response(reply).unwrap();
        assert!(body.is_empty());

        assert_eq!(
            transport.sent(),
            vec![SentRequest {
                locator: "mock:h=m1".to_string(),
                rpc_type: RpcType::SetTablets,
            }]
        );
    }

    #[tokio::test]
    async fn test_canned_reply_order() {
        let transport = MockTransport::new();
        transport.queue_ok(&proto::UpdateServerListResponse { lost_updates: true });

        let session = transport.get_session("mock:h=s1").await.unwrap();
        let reply = session
            .send_request(rpc::encode_request_empty(RpcType::UpdateServerList))
            .await
            .unwrap();
        let body = rpc::decode_response(reply).unwrap();
        let decoded = proto::UpdateServerListResponse::decode(body).unwrap();
        assert!(decoded.lost_updates);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let transport = MockTransport::new();
        transport.set_unreachable("mock:h=gone");
        assert!(transport.get_session("mock:h=gone").await.is_err());
    }
}
