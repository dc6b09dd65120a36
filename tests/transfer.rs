//! 루프백 TCP 종단 간 전송 테스트

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use sawftp::receiver::handle_session;
use sawftp::transfer::send_stream;
use sawftp::transport::frame_stream;
use sawftp::{
    run_transfer, Destination, Error, LossSimulator, Receiver, ReceiverConfig, Sender,
    SenderConfig, SessionReports, SessionStats, DEFAULT_MAX_PAYLOAD_LEN,
};

struct TestReceiver {
    addr: SocketAddr,
    output: PathBuf,
    reports: SessionReports,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<sawftp::Result<()>>,
}

impl TestReceiver {
    async fn start(dir: &Path, name: &str, loss: f64, seed: Option<u64>) -> Self {
        let output = dir.join(name);
        let config = ReceiverConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)), &output)
            .with_loss(loss, seed);

        let (receiver, reports) = Receiver::bind(config).await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(receiver.run_until(async {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            output,
            reports,
            stop,
            handle,
        }
    }

    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap().unwrap();
    }
}

fn write_source(dir: &Path, len: usize) -> (PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
    let path = dir.join("source.bin");
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

#[tokio::test]
async fn test_two_destinations_without_loss() {
    let dir = tempfile::tempdir().unwrap();
    let (source, data) = write_source(dir.path(), 2500);

    let mut first = TestReceiver::start(dir.path(), "first.bin", 0.0, None).await;
    let mut second = TestReceiver::start(dir.path(), "second.bin", 0.0, None).await;

    let mut config = SenderConfig::new(vec![first.addr.to_string(), second.addr.to_string()]);
    config.mss = 1000;

    let report = run_transfer(&config, &source).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.file_size, 2500);
    assert_eq!(report.data_segments, 3);
    for dest in &report.completed {
        // 데이터 3개 + 종료 1개
        assert_eq!(dest.expected_ack_sequence, 4);
        assert_eq!(dest.stats.segments_acked, 4);
        assert_eq!(dest.stats.bytes_acked, 2500);
    }

    for receiver in [&mut first, &mut second] {
        let session = receiver.reports.recv().await.unwrap();
        assert!(session.is_complete());
        assert_eq!(session.stats.segment_sizes, vec![1000, 1000, 500]);
        assert!(session.stats.end_of_transfer);
        assert_eq!(std::fs::read(&receiver.output).unwrap(), data);
    }

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_lossy_destination_completes_with_retransmissions() {
    let dir = tempfile::tempdir().unwrap();
    let (source, data) = write_source(dir.path(), 2500);

    let mut lossy = TestReceiver::start(dir.path(), "lossy.bin", 0.5, Some(2024)).await;

    let mut config = SenderConfig::new(vec![lossy.addr.to_string()]);
    config.mss = 1000;
    config.ack_timeout = Duration::from_millis(200);

    let report = run_transfer(&config, &source).await.unwrap();
    let session = lossy.reports.recv().await.unwrap();

    assert!(session.is_complete());
    assert_eq!(std::fs::read(&lossy.output).unwrap(), data);

    // 폐기된 프레임마다 최소 한 번 재전송 (느린 ACK도 타임아웃 후 재전송됨)
    let stats = &report.completed[0].stats;
    assert!(stats.retransmissions >= session.stats.frames_dropped);
    assert!(session.stats.frames_received >= session.stats.frames_dropped);

    lossy.shutdown().await;
}

#[tokio::test]
async fn test_deadline_aborts_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let (source, _) = write_source(dir.path(), 100);

    // 모든 프레임을 버리는 목적지
    let black_hole = TestReceiver::start(dir.path(), "never.bin", 1.0, Some(1)).await;

    let mut config = SenderConfig::new(vec![black_hole.addr.to_string()]);
    config.ack_timeout = Duration::from_millis(20);
    config.deadline = Some(Duration::from_millis(300));

    assert!(matches!(
        run_transfer(&config, &source).await,
        Err(Error::DeadlineExceeded(_))
    ));

    black_hole.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_destination_rejected_before_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let (source, _) = write_source(dir.path(), 100);

    let mut reachable = TestReceiver::start(dir.path(), "reachable.bin", 0.0, None).await;
    let unreachable = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let config = SenderConfig::new(vec![
        reachable.addr.to_string(),
        unreachable.to_string(),
    ]);

    assert!(matches!(
        run_transfer(&config, &source).await,
        Err(Error::Connect { .. })
    ));

    // 데이터 프레임 없이 연결만 닫힘
    let session = reachable.reports.recv().await.unwrap();
    assert!(matches!(session.outcome, Err(Error::ConnectionClosed)));
    assert_eq!(session.stats.frames_received, 0);

    reachable.shutdown().await;
}

#[tokio::test]
async fn test_attempts_per_segment_follow_loss_rate() {
    const SEGMENTS: usize = 200;
    const MSS: usize = 100;
    const LOSS: f64 = 0.5;

    let data: Vec<u8> = (0..SEGMENTS * MSS).map(|i| (i % 241) as u8).collect();
    let (local, remote) = tokio::io::duplex(64 * 1024);

    let session = tokio::spawn(async move {
        let mut stream = frame_stream(remote, DEFAULT_MAX_PAYLOAD_LEN);
        let mut sink = Vec::new();
        let mut loss = LossSimulator::new(LOSS, Some(2024)).unwrap();
        let mut stats = SessionStats::default();
        let result = handle_session(&mut stream, &mut sink, &mut loss, &mut stats).await;
        (sink, stats, result)
    });

    let sender = Sender::new(
        vec![Destination::new(0, "lossy", local, DEFAULT_MAX_PAYLOAD_LEN)],
        Duration::from_millis(20),
    );
    let report = send_stream(sender, &mut &data[..], MSS).await.unwrap();
    let (sink, session_stats, result) = session.await.unwrap();

    assert!(result.is_ok());
    assert!(report.is_complete());
    assert_eq!(sink, data);

    // 세그먼트당 시도 횟수 기대값 1 / (1 - p) = 2
    let stats = &report.completed[0].stats;
    assert_eq!(stats.segments_acked, SEGMENTS as u64 + 1);
    let attempts = stats.attempts_per_segment();
    assert!((1.6..=2.4).contains(&attempts), "attempts/segment {}", attempts);

    let drop_rate = session_stats.drop_rate();
    assert!((0.4..=0.6).contains(&drop_rate), "drop rate {}", drop_rate);
    assert!(stats.retransmissions >= session_stats.frames_dropped);
}
