//! 수신자
//!
//! - 연결마다 세션 태스크 하나
//! - 체크섬 검증 후 파일에 순서대로 기록
//! - 손실 시뮬레이션 (ACK 없이 프레임 폐기)

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::SinkExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::validate_probability;
use crate::packet::Frame;
use crate::stats::SessionStats;
use crate::transport::{self, Endpoint, FrameStream};
use crate::{ReceiverConfig, Result};

/// 손실 시뮬레이터
#[derive(Debug)]
pub struct LossSimulator {
    probability: f64,
    rng: StdRng,
}

impl LossSimulator {
    /// 새 시뮬레이터 생성 (seed가 없으면 엔트로피 사용)
    pub fn new(probability: f64, seed: Option<u64>) -> Result<Self> {
        validate_probability(probability)?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { probability, rng })
    }

    /// 손실 없음
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// [0, 1) 균등 난수가 확률보다 작으면 폐기
    pub fn should_drop(&mut self) -> bool {
        if self.probability <= 0.0 {
            return false;
        }
        self.rng.gen::<f64>() < self.probability
    }
}

/// 세션 처리 루프
///
/// 종료 세그먼트를 처리하면 `Ok`. 체크섬 불일치나 연결 끊김은 세션 종료 에러.
/// 재전송 요청은 하지 않음 (재전송은 송신측 타임아웃 담당).
pub async fn handle_session<S, W>(
    stream: &mut FrameStream<S>,
    sink: &mut W,
    loss: &mut LossSimulator,
    stats: &mut SessionStats,
) -> Result<()>
where
    S: Endpoint,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = transport::recv_frame(stream).await?.into_valid()?;
        stats.frames_received += 1;

        if loss.should_drop() {
            stats.frames_dropped += 1;
            debug!("프레임 폐기 (손실 시뮬레이션): seq={}", frame.sequence_number);
            continue;
        }

        let ack = Frame::ack(frame.sequence_number.wrapping_add(1));

        if frame.is_end_of_transfer() {
            sink.flush().await?;
            stream.send(ack).await?;
            stats.end_of_transfer = true;
            debug!("전송 종료 프레임 수신: seq={}", frame.sequence_number);
            return Ok(());
        }

        // 중복 세그먼트(ACK 손실 후 재전송)도 그대로 기록됨
        sink.write_all(&frame.payload).await?;
        sink.flush().await?;
        stats.segment_sizes.push(frame.payload_len());
        stats.bytes_written += frame.payload_len() as u64;

        stream.send(ack).await?;
        debug!(
            "세그먼트 기록: seq={}, {} bytes",
            frame.sequence_number,
            frame.payload_len()
        );
    }
}

/// 세션 종료 리포트
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: u64,
    pub peer: SocketAddr,
    pub output_path: PathBuf,
    pub stats: SessionStats,
    pub outcome: Result<()>,
}

impl SessionReport {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_ok() && self.stats.end_of_transfer
    }
}

/// 세션 리포트 수신기 타입
pub type SessionReports = mpsc::Receiver<SessionReport>;

/// 세션별 출력 경로
///
/// 첫 세션은 설정된 경로, 이후 세션은 `<path>.<session_id>`
pub fn session_output_path(base: &Path, session_id: u64) -> PathBuf {
    if session_id == 0 {
        return base.to_path_buf();
    }
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{}", session_id));
    PathBuf::from(name)
}

/// 세션 하나 실행 (파일/소켓 정리 포함)
async fn run_session(
    session_id: u64,
    socket: TcpStream,
    peer: SocketAddr,
    config: Arc<ReceiverConfig>,
) -> SessionReport {
    let output_path = session_output_path(&config.output_path, session_id);
    let mut stats = SessionStats::default();

    let outcome = serve_session(session_id, socket, &output_path, &config, &mut stats).await;

    SessionReport {
        session_id,
        peer,
        output_path,
        stats,
        outcome,
    }
}

async fn serve_session(
    session_id: u64,
    socket: TcpStream,
    output_path: &Path,
    config: &ReceiverConfig,
    stats: &mut SessionStats,
) -> Result<()> {
    let seed = config.seed.map(|seed| seed.wrapping_add(session_id));
    let mut loss = LossSimulator::new(config.loss_probability, seed)?;
    let mut sink = File::create(output_path).await?;
    let mut stream = transport::frame_stream(socket, config.max_payload_len);

    info!(
        "세션 {} 시작: {:?}, 손실 확률 {:.2}",
        session_id,
        output_path,
        loss.probability()
    );

    let result = handle_session(&mut stream, &mut sink, &mut loss, stats).await;

    // 에러 경로에서도 기록된 데이터는 반영
    if let Err(e) = sink.flush().await {
        warn!("세션 {} 파일 flush 실패: {}", session_id, e);
    }
    if let Err(e) = stream.close().await {
        debug!("세션 {} 소켓 종료 에러: {}", session_id, e);
    }

    result
}

/// 수신 서버 (accept 루프)
pub struct Receiver {
    listener: TcpListener,
    config: Arc<ReceiverConfig>,
    reports_tx: mpsc::Sender<SessionReport>,
}

impl Receiver {
    /// 설정 검증 후 바인드
    pub async fn bind(config: ReceiverConfig) -> Result<(Self, SessionReports)> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr).await?;
        let (reports_tx, reports_rx) = mpsc::channel(config.report_capacity);

        info!(
            "SAWFTP Receiver started on {}, output: {:?}, loss: {:.2}",
            listener.local_addr()?,
            config.output_path,
            config.loss_probability
        );

        let receiver = Self {
            listener,
            config: Arc::new(config),
            reports_tx,
        };
        Ok((receiver, reports_rx))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 무기한 실행
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// `shutdown`이 완료될 때까지 연결 수락
    ///
    /// 종료 시 남은 세션은 중단되고 각 세션의 파일/소켓은 닫힘
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut sessions = JoinSet::new();
        let mut next_session_id = 0u64;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("수신 서버 종료 요청, 활성 세션 {}개 중단", sessions.len());
                    break;
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("연결 수락 실패: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!("TCP_NODELAY 설정 실패: {}", e);
                    }

                    let session_id = next_session_id;
                    next_session_id += 1;
                    info!("새 연결: {} (세션 {})", peer, session_id);

                    let config = self.config.clone();
                    let reports_tx = self.reports_tx.clone();
                    sessions.spawn(async move {
                        let report = run_session(session_id, socket, peer, config).await;
                        log_report(&report);
                        if reports_tx.try_send(report).is_err() {
                            debug!("세션 {} 리포트 버림 (채널 가득 참 또는 닫힘)", session_id);
                        }
                    });
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("세션 태스크 실패: {}", e);
                    }
                }
            }
        }

        sessions.shutdown().await;
        Ok(())
    }
}

fn log_report(report: &SessionReport) {
    match &report.outcome {
        Ok(()) => info!(
            "세션 {} 완료: {} 세그먼트, {} bytes, 폐기 {}",
            report.session_id,
            report.stats.segments_written(),
            report.stats.bytes_written,
            report.stats.frames_dropped
        ),
        Err(e) => warn!(
            "세션 {} 비정상 종료 ({} bytes 기록): {}",
            report.session_id, report.stats.bytes_written, e
        ),
    }
}
