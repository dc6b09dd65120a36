//! 에러 타입 정의

use std::time::Duration;

use thiserror::Error;

/// SAWFTP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("연결 실패: {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("체크섬 불일치: seq={sequence_number}, header {expected:04X}, computed {computed:04X}")]
    ChecksumMismatch {
        sequence_number: u32,
        expected: u16,
        computed: u16,
    },

    #[error("프레임 크기 초과: {len} bytes (최대 {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("유효하지 않은 손실 확률: {0} (0 또는 (0, 1] 범위여야 함)")]
    InvalidProbability(f64),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("활성 목적지 없음")]
    NoActiveDestinations,

    #[error("전송 기한 초과: {0:?}")]
    DeadlineExceeded(Duration),

    #[error("전송 미완료: {failed}/{total} 목적지 실패")]
    TransferIncomplete { failed: usize, total: usize },

    #[error("태스크 실패: {0}")]
    TaskFailed(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
