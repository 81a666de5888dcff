//! Transport abstraction between the coordinator and cluster members.
//!
//! The coordinator never talks to a socket directly; it asks its transport
//! for a session to a service locator and sends framed request payloads
//! through it. Real and mock implementations are interchangeable.

use crate::common::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub mod mock;
pub mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or reuse) a session to the server at `locator`.
    async fn get_session(&self, locator: &str) -> Result<Arc<dyn Session>>;
}

#[async_trait]
pub trait Session: Send + Sync {
    /// Send one request payload and await the response payload.
    async fn send_request(&self, request: Bytes) -> Result<Bytes>;
}
