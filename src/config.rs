//! 프로토콜 설정

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_MAX_PAYLOAD_LEN, DEFAULT_MSS, DEFAULT_PORT,
};

/// 송신측 설정
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// 목적지 주소 목록 (`host:port`)
    pub destinations: Vec<String>,

    /// 최대 세그먼트 크기 (바이트)
    pub mss: usize,

    /// 시도당 ACK 대기 타임아웃
    pub ack_timeout: Duration,

    /// 목적지 연결 타임아웃
    pub connect_timeout: Duration,

    /// 전체 전송 기한 (None이면 무제한)
    pub deadline: Option<Duration>,

    /// 수신 프레임 payload 최대 크기
    pub max_payload_len: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            mss: DEFAULT_MSS,
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            connect_timeout: Duration::from_secs(5),
            deadline: None,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl SenderConfig {
    /// 목적지 주소 목록으로 설정 생성
    pub fn new(destinations: Vec<String>) -> Self {
        Self {
            destinations,
            ..Self::default()
        }
    }

    /// 호스트 목록으로 설정 생성
    ///
    /// n번째 호스트는 `base_port + n` 포트로 연결
    pub fn from_hosts<S: AsRef<str>>(hosts: &[S], base_port: u16) -> Result<Self> {
        let mut destinations = Vec::with_capacity(hosts.len());
        for (n, host) in hosts.iter().enumerate() {
            let port = u16::try_from(n)
                .ok()
                .and_then(|n| base_port.checked_add(n))
                .ok_or_else(|| {
                    Error::InvalidConfig(format!("포트 범위 초과: {} + {}", base_port, n))
                })?;
            destinations.push(format!("{}:{}", host.as_ref(), port));
        }
        Ok(Self::new(destinations))
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network(destinations: Vec<String>) -> Self {
        Self {
            destinations,
            mss: 512,
            ack_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(15),
            ..Self::default()
        }
    }

    /// 전송 시작 전 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(Error::InvalidConfig("목적지가 하나 이상 필요".into()));
        }
        if self.mss == 0 {
            return Err(Error::InvalidConfig("mss는 0보다 커야 함".into()));
        }
        if self.mss > self.max_payload_len {
            return Err(Error::InvalidConfig(format!(
                "mss {} 가 최대 payload {} 초과",
                self.mss, self.max_payload_len
            )));
        }
        if self.ack_timeout.is_zero() {
            return Err(Error::InvalidConfig("ack_timeout은 0보다 커야 함".into()));
        }
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConfig("deadline은 0보다 커야 함".into()));
        }
        Ok(())
    }
}

/// 수신측 설정
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// 리슨 주소
    pub listen_addr: SocketAddr,

    /// 수신 파일 경로
    pub output_path: PathBuf,

    /// 손실 시뮬레이션 확률 (0이면 비활성)
    pub loss_probability: f64,

    /// 손실 시뮬레이션 시드 (None이면 엔트로피 사용)
    pub seed: Option<u64>,

    /// 수신 프레임 payload 최대 크기
    pub max_payload_len: usize,

    /// 세션 리포트 채널 용량
    pub report_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            output_path: PathBuf::from("received.bin"),
            loss_probability: 0.0,
            seed: None,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            report_capacity: 64,
        }
    }
}

impl ReceiverConfig {
    /// 새 설정 생성
    pub fn new(listen_addr: SocketAddr, output_path: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    /// 손실 확률 설정
    pub fn with_loss(mut self, probability: f64, seed: Option<u64>) -> Self {
        self.loss_probability = probability;
        self.seed = seed;
        self
    }

    /// 리슨 시작 전 설정 검증
    pub fn validate(&self) -> Result<()> {
        validate_probability(self.loss_probability)?;
        if self.max_payload_len == 0 {
            return Err(Error::InvalidConfig("max_payload_len은 0보다 커야 함".into()));
        }
        if self.report_capacity == 0 {
            return Err(Error::InvalidConfig("report_capacity는 0보다 커야 함".into()));
        }
        Ok(())
    }
}

/// 손실 확률 검증: 0(비활성) 또는 (0, 1]
pub fn validate_probability(p: f64) -> Result<()> {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidProbability(p));
    }
    Ok(())
}
