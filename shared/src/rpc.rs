//! Framed request/response transport shared by nodes and the tracker
//!
//! Each remote call opens one TCP connection, writes a single request frame
//! and reads a single response frame. A frame is a big-endian `u32` length
//! followed by a bincode payload. Every call is bounded by a timeout so that
//! an unresponsive peer surfaces as an error instead of a hung task.

use bincode::{deserialize, serialize};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest payload accepted on either side of a connection.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Call to {0} timed out")]
    Timeout(SocketAddr),

    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Remote error: {0}")]
    Remote(String),
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serialize(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(payload.len()));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(len));
    }
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(deserialize(&buffer)?)
}

/// Sends one request to `addr` and waits for its response.
pub async fn call<Req, Resp>(
    addr: SocketAddr,
    request: &Req,
    timeout: Duration,
) -> Result<Resp, RpcError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Call to {} gave up after {:?}", addr, timeout);
            Err(RpcError::Timeout(addr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PeerRequest, PeerResponse};
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_frame_roundtrip_in_memory() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = PeerRequest::ReceiveId {
            id: "ab".to_string(),
        };
        assert_ok!(write_frame(&mut client, &request).await);

        let received: PeerRequest = assert_ok!(read_frame(&mut server).await);
        match received {
            PeerRequest::ReceiveId { id } => assert_eq!(id, "ab"),
            _ => panic!("Wrong request type received"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_u32((MAX_FRAME_LEN + 1) as u32).await.unwrap();
        let result: Result<PeerRequest, _> = read_frame(&mut server).await;

        match assert_err!(result) {
            RpcError::FrameTooLarge(len) => assert_eq!(len, MAX_FRAME_LEN + 1),
            other => panic!("Unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_call_against_echo_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request: PeerRequest = read_frame(&mut stream).await.unwrap();
            let response = match request {
                PeerRequest::Ping => PeerResponse::Pong(crate::PONG.to_string()),
                _ => PeerResponse::Error("unsupported".to_string()),
            };
            write_frame(&mut stream, &response).await.unwrap();
        });

        let response: PeerResponse =
            assert_ok!(call(addr, &PeerRequest::Ping, Duration::from_secs(1)).await);
        match response {
            PeerResponse::Pong(reply) => assert_eq!(reply, "pong"),
            _ => panic!("Wrong response type"),
        }
    }

    #[tokio::test]
    async fn test_call_times_out_on_silent_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept and hold the connection without ever answering.
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let result: Result<PeerResponse, _> =
            call(addr, &PeerRequest::Ping, Duration::from_millis(100)).await;
        match assert_err!(result) {
            RpcError::Timeout(timed_out) => assert_eq!(timed_out, addr),
            other => panic!("Unexpected error: {}", other),
        }
    }
}
