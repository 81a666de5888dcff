//! Framed TCP transport

use crate::common::{Error, Result};
use crate::rpc;
use crate::transport::{Session, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Transport that dials a fresh framed TCP connection per session.
///
/// Locators look like `tcp:127.0.0.1:7071`; a bare `host:port` is accepted
/// as well.
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn parse_locator(locator: &str) -> Result<&str> {
    if let Some(rest) = locator.strip_prefix("tcp:") {
        return Ok(rest);
    }
    if locator.parse::<std::net::SocketAddr>().is_ok() {
        return Ok(locator);
    }
    Err(Error::TransportFailure(format!(
        "unsupported service locator: {}",
        locator
    )))
}

#[async_trait]
impl Transport for TcpTransport {
    async fn get_session(&self, locator: &str) -> Result<Arc<dyn Session>> {
        let addr = parse_locator(locator)?;
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::TransportFailure(format!("connect to {} timed out", locator)))?
            .map_err(|e| Error::TransportFailure(format!("connect to {}: {}", locator, e)))?;
        Ok(Arc::new(TcpSession {
            locator: locator.to_string(),
            stream: Mutex::new(stream),
            timeout: self.timeout,
        }))
    }
}

pub struct TcpSession {
    locator: String,
    stream: Mutex<TcpStream>,
    timeout: Duration,
}

#[async_trait]
impl Session for TcpSession {
    async fn send_request(&self, request: Bytes) -> Result<Bytes> {
        let mut stream = self.stream.lock().await;
        let exchange = async {
            rpc::write_frame(&mut *stream, &request).await?;
            rpc::read_frame(&mut *stream).await
        };
        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::TransportFailure(format!("request to {} timed out", self.locator)))?
            .map_err(|e| Error::TransportFailure(format!("request to {}: {}", self.locator, e)))?;
        reply.ok_or_else(|| {
            Error::TransportFailure(format!("connection to {} closed mid-request", self.locator))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locator() {
        assert_eq!(parse_locator("tcp:127.0.0.1:7071").unwrap(), "127.0.0.1:7071");
        assert_eq!(parse_locator("127.0.0.1:7071").unwrap(), "127.0.0.1:7071");
        assert!(parse_locator("mock:h=m1").is_err());
        assert!(parse_locator("http://x:1").is_err());
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Some(frame) = rpc::read_frame(&mut stream).await.unwrap() {
                rpc::write_frame(&mut stream, &frame).await.unwrap();
            }
        });

        let transport = TcpTransport::new(Duration::from_secs(5));
        let session = transport
            .get_session(&format!("tcp:{}", addr))
            .await
            .unwrap();
        let reply = session.send_request(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(&reply[..], b"ping");
    }
}
