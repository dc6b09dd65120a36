//! # SAWFTP (Stop-And-Wait File Transfer Protocol)
//!
//! 체크섬 기반 stop-and-wait 파일 전송 프로토콜 (다중 목적지 fan-out)
//!
//! ## 핵심 특징
//! - **고정 12바이트 헤더**: seq(4) + checksum(2) + type(2) + len(4), big-endian
//! - **1의 보수 체크섬**: payload만 검증 (헤더는 검증 대상 아님)
//! - **Stop-and-wait**: 목적지당 in-flight 프레임 최대 1개
//! - **라운드 기반 재전송**: 아직 ACK 받지 못한 목적지에만 재전송
//! - **손실 시뮬레이션**: 수신측에서 확률적으로 프레임 폐기
//!
//! ## 데이터 흐름
//!
//! ```text
//! transfer -> Sender -> packet -> FrameStream -> (TCP) -> FrameStream -> packet -> Receiver -> 파일
//! ```

pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod transfer;
pub mod transport;

pub use config::{ReceiverConfig, SenderConfig};
pub use error::{Error, Result};
pub use packet::{Decoded, Frame, FrameCodec};
pub use receiver::{LossSimulator, Receiver, SessionReport, SessionReports};
pub use sender::{Destination, DestinationFailure, SegmentReport, Sender};
pub use stats::{DestinationStats, DestinationSummary, SessionStats, TransferReport};
pub use transfer::{run_transfer, send_file};
pub use transport::{Endpoint, FrameStream};

/// 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 12;

/// ACK/제어 프레임 타입 태그
///
/// 데이터 프레임에도 동일한 값이 실림
pub const ACK_TYPE_TAG: u16 = 0b1010_1010_1010_1010;

/// 기본 포트 (목적지 n은 `DEFAULT_PORT + n`)
pub const DEFAULT_PORT: u16 = 7735;

/// 기본 최대 세그먼트 크기 (바이트)
pub const DEFAULT_MSS: usize = 1024;

/// 기본 ACK 대기 타임아웃 (밀리초)
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1000;

/// 프레임 payload 최대 크기 기본값 (16MB)
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;
