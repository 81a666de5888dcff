//! RPC envelope: framing, request types, and typed decode/dispatch.
//!
//! Every message on the wire is a little-endian `u32` length followed by the
//! payload. A request payload starts with a `u32` RpcType discriminant; a
//! response payload starts with a `u32` status code. Bodies are protobuf
//! messages from [`crate::proto`].

use crate::common::{status, Error, Result, ServerId, ServiceMask};
use crate::proto;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Tablet maps and server lists are small;
/// anything beyond this is a protocol error, not a big cluster.
pub const MAX_FRAME_LEN: usize = 8 << 20;

/// Discriminants of every RPC in the protocol, including the
/// coordinator-outbound calls served by masters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RpcType {
    Ping = 1,
    CreateTable = 2,
    DropTable = 3,
    OpenTable = 4,
    EnlistServer = 5,
    GetServerList = 6,
    GetBackupList = 7,
    GetTabletMap = 8,
    HintServerDown = 9,
    TabletsRecovered = 10,
    SetTablets = 11,
    UpdateServerList = 12,
    SetServerList = 13,
    StartRecovery = 14,
}

impl RpcType {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(RpcType::Ping),
            2 => Some(RpcType::CreateTable),
            3 => Some(RpcType::DropTable),
            4 => Some(RpcType::OpenTable),
            5 => Some(RpcType::EnlistServer),
            6 => Some(RpcType::GetServerList),
            7 => Some(RpcType::GetBackupList),
            8 => Some(RpcType::GetTabletMap),
            9 => Some(RpcType::HintServerDown),
            10 => Some(RpcType::TabletsRecovered),
            11 => Some(RpcType::SetTablets),
            12 => Some(RpcType::UpdateServerList),
            13 => Some(RpcType::SetServerList),
            14 => Some(RpcType::StartRecovery),
            _ => None,
        }
    }
}

/// A decoded client request, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    CreateTable {
        name: String,
    },
    DropTable {
        name: String,
    },
    OpenTable {
        name: String,
    },
    EnlistServer {
        services: ServiceMask,
        locator: String,
        read_mbytes_per_sec: u32,
    },
    GetServerList {
        filter: ServiceMask,
    },
    GetBackupList,
    GetTabletMap,
    HintServerDown {
        locator: String,
    },
    TabletsRecovered {
        crashed_id: ServerId,
        recovery_master_id: ServerId,
        tablets: Vec<proto::Tablet>,
    },
}

impl Request {
    /// Decode a request payload. Unknown or coordinator-outbound
    /// discriminants fail with `UnimplementedRequest`.
    pub fn decode(mut payload: Bytes) -> Result<Request> {
        if payload.len() < 4 {
            return Err(Error::Other("truncated request header".into()));
        }
        let raw = payload.get_u32_le();
        let ty = RpcType::from_u32(raw).ok_or(Error::UnimplementedRequest(raw))?;
        match ty {
            RpcType::Ping => Ok(Request::Ping),
            RpcType::CreateTable => {
                let body = proto::CreateTableRequest::decode(payload)?;
                Ok(Request::CreateTable { name: body.name })
            }
            RpcType::DropTable => {
                let body = proto::DropTableRequest::decode(payload)?;
                Ok(Request::DropTable { name: body.name })
            }
            RpcType::OpenTable => {
                let body = proto::OpenTableRequest::decode(payload)?;
                Ok(Request::OpenTable { name: body.name })
            }
            RpcType::EnlistServer => {
                let body = proto::EnlistServerRequest::decode(payload)?;
                Ok(Request::EnlistServer {
                    services: ServiceMask::from_bits_truncate(body.services),
                    locator: body.service_locator,
                    read_mbytes_per_sec: body.expected_read_mbytes_per_sec,
                })
            }
            RpcType::GetServerList => {
                let body = proto::GetServerListRequest::decode(payload)?;
                Ok(Request::GetServerList {
                    filter: ServiceMask::from_bits_truncate(body.service_mask),
                })
            }
            RpcType::GetBackupList => Ok(Request::GetBackupList),
            RpcType::GetTabletMap => Ok(Request::GetTabletMap),
            RpcType::HintServerDown => {
                let body = proto::HintServerDownRequest::decode(payload)?;
                Ok(Request::HintServerDown {
                    locator: body.service_locator,
                })
            }
            RpcType::TabletsRecovered => {
                let body = proto::TabletsRecoveredRequest::decode(payload)?;
                Ok(Request::TabletsRecovered {
                    crashed_id: ServerId::from_u64(body.crashed_id),
                    recovery_master_id: ServerId::from_u64(body.recovery_master_id),
                    tablets: body.tablet,
                })
            }
            // Served by masters, not by the coordinator.
            RpcType::SetTablets
            | RpcType::UpdateServerList
            | RpcType::SetServerList
            | RpcType::StartRecovery => Err(Error::UnimplementedRequest(raw)),
        }
    }
}

/// A handler's reply, encoded on the way out.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ping,
    CreateTable,
    DropTable,
    OpenTable { table_id: u64 },
    EnlistServer { server_id: ServerId },
    ServerList(proto::ServerList),
    TabletMap(proto::Tablets),
    HintServerDown,
    TabletsRecovered,
}

impl Response {
    pub fn encode(&self) -> Bytes {
        match self {
            Response::Ping
            | Response::CreateTable
            | Response::DropTable
            | Response::HintServerDown
            | Response::TabletsRecovered => encode_response(status::OK, None::<&proto::Tablets>),
            Response::OpenTable { table_id } => encode_response(
                status::OK,
                Some(&proto::OpenTableResponse {
                    table_id: *table_id,
                }),
            ),
            Response::EnlistServer { server_id } => encode_response(
                status::OK,
                Some(&proto::EnlistServerResponse {
                    server_id: server_id.as_u64(),
                }),
            ),
            Response::ServerList(list) => encode_response(status::OK, Some(list)),
            Response::TabletMap(map) => encode_response(status::OK, Some(map)),
        }
    }
}

/// Encode a request payload: discriminant plus body.
pub fn encode_request<M: Message>(ty: RpcType, body: &M) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + body.encoded_len());
    buf.put_u32_le(ty as u32);
    body.encode(&mut buf).expect("BytesMut grows on demand");
    buf.freeze()
}

/// Encode a request with an empty body.
pub fn encode_request_empty(ty: RpcType) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32_le(ty as u32);
    buf.freeze()
}

/// Encode a response payload: status code plus optional body.
pub fn encode_response<M: Message>(code: u32, body: Option<&M>) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + body.map_or(0, |b| b.encoded_len()));
    buf.put_u32_le(code);
    if let Some(body) = body {
        body.encode(&mut buf).expect("BytesMut grows on demand");
    }
    buf.freeze()
}

/// Encode an error reply carrying the error's stable status code.
pub fn encode_error(err: &Error) -> Bytes {
    encode_response(err.status_code(), None::<&proto::Tablets>)
}

/// Client side: strip the status word, surfacing non-OK codes as errors,
/// and return the body bytes.
pub fn decode_response(mut payload: Bytes) -> Result<Bytes> {
    if payload.len() < 4 {
        return Err(Error::Other("truncated response header".into()));
    }
    let code = payload.get_u32_le();
    if code != status::OK {
        return Err(Error::from_status(code));
    }
    Ok(payload)
}

/// Read one length-prefixed frame. Returns `None` on clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Other(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
