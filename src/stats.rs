//! 전송 통계

use std::time::{Duration, Instant};

use crate::sender::DestinationFailure;
use crate::{Error, Result};

/// 목적지별 송신 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationStats {
    /// 송신한 프레임 수 (재전송 포함)
    pub frames_sent: u64,

    /// 재전송 횟수
    pub retransmissions: u64,

    /// ACK 타임아웃 횟수
    pub timeouts: u64,

    /// 체크섬 불일치 ACK 수
    pub corrupted_acks: u64,

    /// 이전 시도에 대한 늦은 ACK 수
    pub stale_acks: u64,

    /// ACK 받은 세그먼트 수 (종료 세그먼트 포함)
    pub segments_acked: u64,

    /// ACK 받은 payload 바이트
    pub bytes_acked: u64,
}

impl DestinationStats {
    /// 재전송 비율
    pub fn retransmission_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.frames_sent as f64
    }

    /// 세그먼트당 평균 시도 횟수
    pub fn attempts_per_segment(&self) -> f64 {
        if self.segments_acked == 0 {
            return 0.0;
        }
        self.frames_sent as f64 / self.segments_acked as f64
    }
}

/// 수신 세션 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// 수신한 유효 프레임 수
    pub frames_received: u64,

    /// 손실 시뮬레이션으로 버린 프레임 수
    pub frames_dropped: u64,

    /// 파일에 기록한 데이터 세그먼트 크기 (도착 순서)
    pub segment_sizes: Vec<usize>,

    /// 파일에 기록한 바이트
    pub bytes_written: u64,

    /// 종료 세그먼트 수신 여부
    pub end_of_transfer: bool,
}

impl SessionStats {
    pub fn segments_written(&self) -> usize {
        self.segment_sizes.len()
    }

    /// 실측 손실률
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_received;
        if total == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / total as f64
    }
}

/// 목적지별 최종 결과
#[derive(Debug, Clone)]
pub struct DestinationSummary {
    pub id: usize,
    pub peer: String,
    pub expected_ack_sequence: u32,
    pub stats: DestinationStats,
}

/// 파일 전송 결과
#[derive(Debug)]
pub struct TransferReport {
    /// 시작 시간
    pub start_time: Instant,

    /// 종료 시간
    pub finished_at: Instant,

    /// 원본 파일 크기
    pub file_size: u64,

    /// 데이터 세그먼트 수 (종료 세그먼트 제외)
    pub data_segments: u64,

    /// 전체 목적지 수
    pub total_destinations: usize,

    /// 완료한 목적지
    pub completed: Vec<DestinationSummary>,

    /// 실패한 목적지
    pub failures: Vec<DestinationFailure>,
}

impl TransferReport {
    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.finished_at.duration_since(self.start_time)
    }

    /// 모든 목적지가 종료 세그먼트까지 완료했는지
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.completed.len() == self.total_destinations
    }

    /// 목적지당 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.file_size as f64 / elapsed
    }

    /// 전체 재전송 횟수
    pub fn total_retransmissions(&self) -> u64 {
        self.completed
            .iter()
            .map(|d| d.stats.retransmissions)
            .chain(self.failures.iter().map(|f| f.stats.retransmissions))
            .sum()
    }

    /// 미완료 목적지가 있으면 에러로 변환
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::TransferIncomplete {
                failed: self.total_destinations - self.completed.len(),
                total: self.total_destinations,
            })
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {} | Segments: {} | Destinations: {}/{} | Retransmissions: {} | Throughput: {:.2} KB/s",
            self.elapsed().as_secs_f64(),
            self.file_size,
            self.data_segments,
            self.completed.len(),
            self.total_destinations,
            self.total_retransmissions(),
            self.throughput() / 1_000.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: usize, retransmissions: u64) -> DestinationSummary {
        DestinationSummary {
            id,
            peer: format!("peer-{}", id),
            expected_ack_sequence: 4,
            stats: DestinationStats {
                frames_sent: 4 + retransmissions,
                retransmissions,
                segments_acked: 4,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_destination_rates() {
        let stats = summary(0, 4).stats;
        assert_eq!(stats.attempts_per_segment(), 2.0);
        assert_eq!(stats.retransmission_rate(), 0.5);
        assert_eq!(DestinationStats::default().attempts_per_segment(), 0.0);
    }

    #[test]
    fn test_report_completion() {
        let now = Instant::now();
        let report = TransferReport {
            start_time: now,
            finished_at: now,
            file_size: 2500,
            data_segments: 3,
            total_destinations: 2,
            completed: vec![summary(0, 1), summary(1, 2)],
            failures: Vec::new(),
        };
        assert!(report.is_complete());
        assert_eq!(report.total_retransmissions(), 3);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_report_incomplete() {
        let now = Instant::now();
        let report = TransferReport {
            start_time: now,
            finished_at: now,
            file_size: 10,
            data_segments: 1,
            total_destinations: 2,
            completed: vec![summary(0, 0)],
            failures: Vec::new(),
        };
        assert!(matches!(
            report.into_result(),
            Err(Error::TransferIncomplete { failed: 1, total: 2 })
        ));
    }
}
