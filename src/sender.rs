//! 송신자 (ARQ 엔진)
//!
//! - 목적지별 stop-and-wait
//! - 라운드마다 미확인 목적지에만 동시 재전송
//! - 모든 목적지가 ACK해야 다음 세그먼트로 진행

use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::packet::{Decoded, Frame};
use crate::stats::{DestinationStats, DestinationSummary};
use crate::transport::{self, Endpoint, FrameStream};
use crate::{Error, Result, ACK_TYPE_TAG};

/// 한 번의 송신-대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    /// 유효 ACK 수신 (새 expected 값)
    Acked(u32),

    /// 타임아웃 내 ACK 없음
    TimedOut,

    /// 체크섬 불일치 ACK
    Corrupted,
}

/// 목적지 상태
///
/// 엔드포인트와 시퀀스 카운터는 이 목적지만 소유함
#[derive(Debug)]
pub struct Destination<S> {
    id: usize,
    peer: String,
    stream: FrameStream<S>,
    expected_ack_sequence: u32,
    stats: DestinationStats,
}

impl<S: Endpoint> Destination<S> {
    pub fn new(id: usize, peer: impl Into<String>, endpoint: S, max_payload_len: usize) -> Self {
        Self {
            id,
            peer: peer.into(),
            stream: transport::frame_stream(endpoint, max_payload_len),
            expected_ack_sequence: 0,
            stats: DestinationStats::default(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 다음 프레임에 실을 시퀀스 번호
    pub fn expected_ack_sequence(&self) -> u32 {
        self.expected_ack_sequence
    }

    pub fn stats(&self) -> &DestinationStats {
        &self.stats
    }

    pub fn summary(&self) -> DestinationSummary {
        DestinationSummary {
            id: self.id,
            peer: self.peer.clone(),
            expected_ack_sequence: self.expected_ack_sequence,
            stats: self.stats.clone(),
        }
    }

    /// 엔드포인트 쓰기 방향 종료
    pub async fn close(&mut self) -> Result<()> {
        self.stream.close().await
    }

    /// 프레임 송신 후 ACK 대기 (한 번)
    ///
    /// 송신과 대기 모두 `ack_timeout` 안에 끝나야 함.
    /// 상대가 읽지 않아 송신이 막혀도 타임아웃으로 처리.
    async fn attempt(&mut self, payload: Bytes, ack_timeout: Duration) -> Result<AttemptOutcome> {
        let deadline = Instant::now() + ack_timeout;
        let payload_len = payload.len();
        let frame = Frame::new(self.expected_ack_sequence, ACK_TYPE_TAG, payload);

        match tokio::time::timeout_at(deadline, self.stream.send(frame)).await {
            Ok(sent) => sent?,
            Err(_) => {
                debug!("[{}] 송신 타임아웃", self.peer);
                return Ok(AttemptOutcome::TimedOut);
            }
        }
        self.stats.frames_sent += 1;

        let expected_reply = self.expected_ack_sequence.wrapping_add(1);

        loop {
            let next = transport::recv_frame(&mut self.stream);
            let reply = match tokio::time::timeout_at(deadline, next).await {
                Ok(reply) => reply?,
                Err(_) => return Ok(AttemptOutcome::TimedOut),
            };

            match reply {
                Decoded::Valid(ack) if ack.sequence_number == expected_reply => {
                    self.expected_ack_sequence = ack.sequence_number;
                    self.stats.segments_acked += 1;
                    self.stats.bytes_acked += payload_len as u64;
                    return Ok(AttemptOutcome::Acked(ack.sequence_number));
                }
                Decoded::Valid(ack) => {
                    // 이전 시도에 대한 늦은 ACK
                    self.stats.stale_acks += 1;
                    debug!(
                        "[{}] 늦은 ACK 무시: seq={}, 기대값={}",
                        self.peer, ack.sequence_number, expected_reply
                    );
                }
                Decoded::Invalid {
                    sequence_number, ..
                } => {
                    debug!("[{}] 손상된 ACK: seq={}", self.peer, sequence_number);
                    return Ok(AttemptOutcome::Corrupted);
                }
            }
        }
    }
}

/// 전송 경로가 끊긴 목적지
#[derive(Debug)]
pub struct DestinationFailure {
    pub id: usize,
    pub peer: String,
    pub error: Error,
    pub stats: DestinationStats,
}

/// 세그먼트 하나의 전달 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentReport {
    /// 라운드 수
    pub rounds: u32,

    /// ACK 받은 목적지 수
    pub acked: usize,

    /// 이 세그먼트 중 실패한 목적지 수
    pub failed: usize,
}

struct RoundTask<S> {
    id: usize,
    peer: String,
    handle: JoinHandle<(Destination<S>, Result<AttemptOutcome>)>,
}

/// 한 라운드의 목적지 태스크들
///
/// drop되면 남은 태스크를 모두 중단 (호출자 취소 시 정리)
struct RoundTasks<S> {
    tasks: Vec<RoundTask<S>>,
}

impl<S> Drop for RoundTasks<S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.handle.abort();
        }
    }
}

/// 다중 목적지 stop-and-wait 송신자
pub struct Sender<S> {
    ack_timeout: Duration,
    destinations: Vec<Destination<S>>,
    failures: Vec<DestinationFailure>,
    total_destinations: usize,
}

impl<S: Endpoint> Sender<S> {
    pub fn new(destinations: Vec<Destination<S>>, ack_timeout: Duration) -> Self {
        let total_destinations = destinations.len();
        Self {
            ack_timeout,
            destinations,
            failures: Vec::new(),
            total_destinations,
        }
    }

    /// 아직 살아있는 목적지
    pub fn destinations(&self) -> &[Destination<S>] {
        &self.destinations
    }

    pub fn failures(&self) -> &[DestinationFailure] {
        &self.failures
    }

    pub fn active_count(&self) -> usize {
        self.destinations.len()
    }

    pub fn total_destinations(&self) -> usize {
        self.total_destinations
    }

    /// 세그먼트 하나를 모든 목적지에 전달
    ///
    /// 라운드마다 아직 ACK하지 않은 목적지에 같은 payload와 같은 시퀀스 번호로
    /// 동시에 송신하고 ACK를 기다림. 재시도 횟수 제한은 없음.
    /// 유효 ACK는 시퀀스 번호가 `expected + 1`인 응답뿐이고, 다른 시퀀스의
    /// 응답은 무시한 채 시도 기한까지 계속 기다림.
    /// 전송 경로가 끊긴 목적지는 실패로 기록되고 나머지는 계속 진행.
    pub async fn deliver_segment(&mut self, payload: Bytes) -> Result<SegmentReport> {
        if self.destinations.is_empty() {
            return Err(Error::NoActiveDestinations);
        }

        let mut pending = std::mem::take(&mut self.destinations);
        let mut satisfied: Vec<Destination<S>> = Vec::with_capacity(pending.len());
        let mut report = SegmentReport {
            rounds: 0,
            acked: 0,
            failed: 0,
        };

        while !pending.is_empty() {
            report.rounds += 1;

            let mut round = RoundTasks {
                tasks: Vec::with_capacity(pending.len()),
            };
            for mut dest in pending.drain(..) {
                if report.rounds > 1 {
                    dest.stats.retransmissions += 1;
                }
                let id = dest.id;
                let peer = dest.peer.clone();
                let payload = payload.clone();
                let ack_timeout = self.ack_timeout;

                let handle = tokio::spawn(async move {
                    let outcome = dest.attempt(payload, ack_timeout).await;
                    (dest, outcome)
                });
                round.tasks.push(RoundTask { id, peer, handle });
            }

            for task in round.tasks.iter_mut() {
                match (&mut task.handle).await {
                    Ok((dest, Ok(AttemptOutcome::Acked(seq)))) => {
                        debug!("[{}] ACK 수신: seq={}, round={}", dest.peer, seq, report.rounds);
                        satisfied.push(dest);
                    }
                    Ok((mut dest, Ok(AttemptOutcome::TimedOut))) => {
                        dest.stats.timeouts += 1;
                        debug!("[{}] ACK 타임아웃, 재전송 예정", dest.peer);
                        pending.push(dest);
                    }
                    Ok((mut dest, Ok(AttemptOutcome::Corrupted))) => {
                        dest.stats.corrupted_acks += 1;
                        pending.push(dest);
                    }
                    Ok((dest, Err(error))) => {
                        warn!("[{}] 목적지 실패: {}", dest.peer, error);
                        report.failed += 1;
                        self.failures.push(DestinationFailure {
                            id: dest.id,
                            peer: dest.peer.clone(),
                            error,
                            stats: dest.stats.clone(),
                        });
                    }
                    Err(join_error) => {
                        warn!("[{}] 목적지 태스크 실패: {}", task.peer, join_error);
                        report.failed += 1;
                        self.failures.push(DestinationFailure {
                            id: task.id,
                            peer: task.peer.clone(),
                            error: Error::TaskFailed(join_error.to_string()),
                            stats: DestinationStats::default(),
                        });
                    }
                }
            }
        }

        report.acked = satisfied.len();
        satisfied.sort_by_key(|dest| dest.id);
        self.destinations = satisfied;

        Ok(report)
    }

    /// 모든 엔드포인트 종료
    pub async fn close(&mut self) {
        for dest in &mut self.destinations {
            if let Err(e) = dest.close().await {
                warn!("[{}] 종료 에러: {}", dest.peer, e);
            }
        }
        info!(
            "송신 종료: {}/{} 목적지 완료",
            self.destinations.len(),
            self.total_destinations
        );
    }

    pub fn into_parts(self) -> (Vec<Destination<S>>, Vec<DestinationFailure>) {
        (self.destinations, self.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_MAX_PAYLOAD_LEN;
    use std::collections::HashMap;
    use tokio::io::DuplexStream;

    const ACK_TIMEOUT: Duration = Duration::from_millis(30);

    /// 테스트용 수신 피어 동작
    #[derive(Clone, Copy)]
    enum Script {
        /// 시퀀스 번호마다 처음 n개 프레임을 버림
        DropFirst(usize),
        /// 첫 응답으로 손상된 ACK를 보냄
        CorruptFirstAck,
        /// 올바른 ACK 전에 늦은 ACK를 먼저 보냄
        StaleThenAck,
    }

    /// 받은 프레임을 모두 기록하는 피어
    async fn scripted_peer(io: DuplexStream, script: Script) -> Vec<Frame> {
        let mut stream = transport::frame_stream(io, DEFAULT_MAX_PAYLOAD_LEN);
        let mut seen = Vec::new();
        let mut arrivals: HashMap<u32, usize> = HashMap::new();

        loop {
            let frame = match transport::recv_frame(&mut stream).await {
                Ok(decoded) => decoded.into_valid().unwrap(),
                Err(Error::ConnectionClosed) => break,
                Err(e) => panic!("peer read error: {}", e),
            };
            seen.push(frame.clone());

            let count = arrivals.entry(frame.sequence_number).or_insert(0);
            *count += 1;
            let next = frame.sequence_number.wrapping_add(1);

            match script {
                Script::DropFirst(n) if *count <= n => continue,
                Script::CorruptFirstAck if *count == 1 => {
                    let corrupted = Frame {
                        sequence_number: next,
                        checksum: 0x1234,
                        type_tag: ACK_TYPE_TAG,
                        payload: Bytes::from_static(b"xx"),
                    };
                    stream.send(corrupted).await.unwrap();
                    continue;
                }
                Script::StaleThenAck => {
                    stream
                        .send(Frame::ack(frame.sequence_number))
                        .await
                        .unwrap();
                }
                _ => {}
            }

            stream.send(Frame::ack(next)).await.unwrap();
            if frame.is_end_of_transfer() {
                break;
            }
        }

        seen
    }

    fn setup(scripts: &[Script]) -> (Sender<DuplexStream>, Vec<JoinHandle<Vec<Frame>>>) {
        let mut destinations = Vec::new();
        let mut peers = Vec::new();

        for (id, script) in scripts.iter().enumerate() {
            let (local, remote) = tokio::io::duplex(64 * 1024);
            destinations.push(Destination::new(
                id,
                format!("peer-{}", id),
                local,
                DEFAULT_MAX_PAYLOAD_LEN,
            ));
            peers.push(tokio::spawn(scripted_peer(remote, *script)));
        }

        (Sender::new(destinations, ACK_TIMEOUT), peers)
    }

    #[tokio::test]
    async fn test_single_round_when_all_ack() {
        let (mut sender, peers) = setup(&[Script::DropFirst(0); 3]);

        let report = sender
            .deliver_segment(Bytes::from_static(b"segment"))
            .await
            .unwrap();
        assert_eq!(report.rounds, 1);
        assert_eq!(report.acked, 3);

        for dest in sender.destinations() {
            assert_eq!(dest.stats().frames_sent, 1);
            assert_eq!(dest.stats().retransmissions, 0);
            assert_eq!(dest.expected_ack_sequence(), 1);
        }

        sender.deliver_segment(Bytes::new()).await.unwrap();
        for peer in peers {
            let frames = peer.await.unwrap();
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0].payload.as_ref(), b"segment");
            assert!(frames[1].is_end_of_transfer());
        }
    }

    #[tokio::test]
    async fn test_retransmits_identical_frame_until_acked() {
        const K: usize = 3;
        let (mut sender, mut peers) = setup(&[Script::DropFirst(K)]);

        let report = sender
            .deliver_segment(Bytes::from_static(b"lossy"))
            .await
            .unwrap();
        assert_eq!(report.rounds, K as u32 + 1);

        let dest = &sender.destinations()[0];
        assert_eq!(dest.stats().retransmissions, K as u64);
        assert_eq!(dest.stats().timeouts, K as u64);
        assert_eq!(dest.expected_ack_sequence(), 1);

        sender.close().await;
        let frames = peers.remove(0).await.unwrap();
        assert_eq!(frames.len(), K + 1);
        for frame in &frames {
            assert_eq!(frame.sequence_number, 0);
            assert_eq!(frame.payload.as_ref(), b"lossy");
        }
    }

    #[tokio::test]
    async fn test_slow_destination_does_not_stall_fast_one() {
        let (mut sender, peers) = setup(&[Script::DropFirst(2), Script::DropFirst(0)]);

        for payload in [&b"one"[..], b"two", b"three"] {
            let report = sender
                .deliver_segment(Bytes::copy_from_slice(payload))
                .await
                .unwrap();
            assert_eq!(report.rounds, 3);
        }

        let slow = &sender.destinations()[0];
        let fast = &sender.destinations()[1];
        assert_eq!(slow.expected_ack_sequence(), 3);
        assert_eq!(fast.expected_ack_sequence(), 3);
        assert_eq!(slow.stats().frames_sent, 9);
        assert_eq!(fast.stats().frames_sent, 3);
        assert_eq!(fast.stats().retransmissions, 0);

        sender.close().await;
        for peer in peers {
            peer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_corrupted_ack_triggers_retry() {
        let (mut sender, _peers) = setup(&[Script::CorruptFirstAck]);

        let report = sender
            .deliver_segment(Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(report.rounds, 2);

        let stats = sender.destinations()[0].stats();
        assert_eq!(stats.corrupted_acks, 1);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(sender.destinations()[0].expected_ack_sequence(), 1);
    }

    #[tokio::test]
    async fn test_stale_ack_is_skipped_within_attempt() {
        let (mut sender, _peers) = setup(&[Script::StaleThenAck]);

        let report = sender
            .deliver_segment(Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(report.rounds, 1);

        let stats = sender.destinations()[0].stats();
        assert_eq!(stats.stale_acks, 1);
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(sender.destinations()[0].expected_ack_sequence(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_destination_fails_alone() {
        let (local, remote) = tokio::io::duplex(1024);
        drop(remote);
        let (healthy, peer) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(scripted_peer(peer, Script::DropFirst(0)));

        let mut sender = Sender::new(
            vec![
                Destination::new(0, "gone", local, DEFAULT_MAX_PAYLOAD_LEN),
                Destination::new(1, "healthy", healthy, DEFAULT_MAX_PAYLOAD_LEN),
            ],
            ACK_TIMEOUT,
        );

        let report = sender
            .deliver_segment(Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert_eq!(report.acked, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(sender.active_count(), 1);
        assert_eq!(sender.failures()[0].peer, "gone");

        sender.deliver_segment(Bytes::new()).await.unwrap();
        assert_eq!(peer.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_blocked_send_is_bounded_by_ack_timeout() {
        // 상대가 전혀 읽지 않는 작은 버퍼
        let (local, _remote) = tokio::io::duplex(16);
        let mut dest = Destination::new(0, "stuck", local, DEFAULT_MAX_PAYLOAD_LEN);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            dest.attempt(Bytes::from(vec![7u8; 4096]), ACK_TIMEOUT),
        )
        .await
        .expect("attempt blocked past the ack timeout")
        .unwrap();

        assert_eq!(outcome, AttemptOutcome::TimedOut);
        assert_eq!(dest.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_no_destinations() {
        let mut sender: Sender<DuplexStream> = Sender::new(Vec::new(), ACK_TIMEOUT);
        assert!(matches!(
            sender.deliver_segment(Bytes::new()).await,
            Err(Error::NoActiveDestinations)
        ));
    }
}
