//! 전송 엔드포인트
//!
//! 목적지/세션당 하나의 순서 보장 바이트 스트림 위에서 프레임 단위로 읽고 씀

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::info;

use crate::packet::{Decoded, FrameCodec};
use crate::{Error, Result, SenderConfig};

/// 프레임을 주고받을 수 있는 양방향 바이트 스트림
pub trait Endpoint: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Endpoint for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 엔드포인트 위의 프레임 스트림
///
/// 읽기는 `Framed` 내부 버퍼에 쌓이므로 `next()`가 중간에 취소되어도
/// 스트림 동기화가 깨지지 않음. 송신은 `SinkExt::send` (flush 포함).
pub type FrameStream<S> = Framed<S, FrameCodec>;

pub fn frame_stream<S: Endpoint>(io: S, max_payload_len: usize) -> FrameStream<S> {
    Framed::new(io, FrameCodec::new(max_payload_len))
}

/// 프레임 하나 수신
///
/// 프레임 경계 전에 스트림이 닫히면 `ConnectionClosed`.
pub async fn recv_frame<S: Endpoint>(stream: &mut FrameStream<S>) -> Result<Decoded> {
    stream.next().await.ok_or(Error::ConnectionClosed)?
}

/// 목적지 하나에 연결
pub async fn connect(addr: &str, config: &SenderConfig) -> Result<TcpStream> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Connect {
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| Error::Connect {
            addr: addr.to_string(),
            source,
        })?;

    // 작은 프레임을 하나씩 주고받으므로 Nagle 비활성
    stream.set_nodelay(true)?;
    info!("목적지 연결: {}", addr);
    Ok(stream)
}

/// 모든 목적지에 연결
///
/// 하나라도 실패하면 전송을 시작하지 않음
pub async fn connect_all(config: &SenderConfig) -> Result<Vec<(String, TcpStream)>> {
    let mut streams = Vec::with_capacity(config.destinations.len());
    for addr in &config.destinations {
        let stream = connect(addr, config).await?;
        streams.push((addr.clone(), stream));
    }
    Ok(streams)
}
