//! 파일 전송 드라이버
//!
//! 파일을 MSS 단위로 잘라 순서대로 전달하고 마지막에 빈 세그먼트로 종료를 알림

use std::path::Path;
use std::time::Instant;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::sender::{Destination, Sender};
use crate::stats::TransferReport;
use crate::transport::{self, Endpoint};
use crate::{Error, Result, SenderConfig};

/// 다음 세그먼트 읽기 (최대 `mss` 바이트, EOF면 빈 값)
pub async fn read_segment<R>(reader: &mut R, mss: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut segment = Vec::with_capacity(mss);
    reader.take(mss as u64).read_to_end(&mut segment).await?;
    Ok(Bytes::from(segment))
}

/// 스트림 내용을 모든 목적지에 전송
///
/// 활성 목적지가 모두 실패하면 중단. 결과는 목적지별 성공/실패를 담은 리포트.
pub async fn send_stream<R, S>(
    mut sender: Sender<S>,
    reader: &mut R,
    mss: usize,
) -> Result<TransferReport>
where
    R: AsyncRead + Unpin,
    S: Endpoint,
{
    let start_time = Instant::now();
    let mut file_size = 0u64;
    let mut data_segments = 0u64;

    loop {
        let segment = read_segment(reader, mss).await?;
        if segment.is_empty() {
            break;
        }

        let len = segment.len();
        let report = sender.deliver_segment(segment).await?;
        file_size += len as u64;
        data_segments += 1;
        debug!(
            "세그먼트 {} 전달: {} bytes, {} 라운드",
            data_segments, len, report.rounds
        );

        if sender.active_count() == 0 {
            warn!("모든 목적지 실패, 전송 중단");
            break;
        }
    }

    if sender.active_count() > 0 {
        // 종료 세그먼트
        sender.deliver_segment(Bytes::new()).await?;
    }
    sender.close().await;

    let total_destinations = sender.total_destinations();
    let (destinations, failures) = sender.into_parts();
    let completed = destinations.iter().map(|d| d.summary()).collect();

    Ok(TransferReport {
        start_time,
        finished_at: Instant::now(),
        file_size,
        data_segments,
        total_destinations,
        completed,
        failures,
    })
}

/// 파일을 모든 목적지에 전송
pub async fn send_file<S: Endpoint>(
    sender: Sender<S>,
    path: &Path,
    mss: usize,
) -> Result<TransferReport> {
    let mut file = File::open(path).await?;
    info!("파일 전송 시작: {:?}, MSS {} bytes", path, mss);
    send_stream(sender, &mut file, mss).await
}

/// 설정된 목적지에 연결해 송신자 생성
pub async fn connect_sender(config: &SenderConfig) -> Result<Sender<TcpStream>> {
    let streams = transport::connect_all(config).await?;
    let destinations = streams
        .into_iter()
        .enumerate()
        .map(|(id, (peer, stream))| Destination::new(id, peer, stream, config.max_payload_len))
        .collect();
    Ok(Sender::new(destinations, config.ack_timeout))
}

/// 설정 검증, 연결, 전송까지 한 번에 수행
///
/// 모든 목적지가 종료 세그먼트까지 완료해야 `Ok`.
/// `deadline`이 지나면 진행 중인 목적지 태스크를 모두 중단하고 연결을 닫음.
pub async fn run_transfer(config: &SenderConfig, path: &Path) -> Result<TransferReport> {
    config.validate()?;
    let sender = connect_sender(config).await?;

    // 기한 초과로 future가 drop되면 송신자와 연결도 함께 정리됨
    let transfer = send_file(sender, path, config.mss);
    let report = match config.deadline {
        Some(deadline) => tokio::time::timeout(deadline, transfer)
            .await
            .map_err(|_| Error::DeadlineExceeded(deadline))??,
        None => transfer.await?,
    };

    info!("전송 완료: {}", report.summary());
    report.into_result()
}
