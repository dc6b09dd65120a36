//! 프레임 코덱
//!
//! 와이어 포맷 (big-endian):
//!
//! ```text
//! 0       4         6          8              12
//! +-------+---------+----------+--------------+-------------
//! |  seq  | checksum| type_tag | payload_len  | payload ...
//! +-------+---------+----------+--------------+-------------
//! ```
//!
//! 체크섬은 payload만 대상으로 함. 헤더 손상은 검출되지 않음.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::{Error, Result, ACK_TYPE_TAG, DEFAULT_MAX_PAYLOAD_LEN, HEADER_SIZE};

/// 1의 보수 합 (end-around carry, 반전 전 값)
///
/// 홀수 길이는 마지막에 0 바이트를 붙여 16비트 워드로 계산
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);

    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum as u16
}

/// 헤더에 기록할 체크섬 (합의 반전)
pub fn checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// 수신측 체크섬 검증: header + 재계산 합 == 0xFFFF
pub fn verify_checksum(header_checksum: u16, payload: &[u8]) -> bool {
    u32::from(header_checksum) + u32::from(ones_complement_sum(payload)) == 0xFFFF
}

/// 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 시퀀스 번호
    pub sequence_number: u32,

    /// 헤더에 실린 체크섬
    pub checksum: u16,

    /// 타입 태그
    pub type_tag: u16,

    /// payload
    pub payload: Bytes,
}

impl Frame {
    /// 데이터 프레임 생성 (체크섬 계산 포함)
    pub fn new(sequence_number: u32, type_tag: u16, payload: Bytes) -> Self {
        Self {
            sequence_number,
            checksum: checksum(&payload),
            type_tag,
            payload,
        }
    }

    /// ACK 프레임 생성 (빈 payload)
    pub fn ack(sequence_number: u32) -> Self {
        Self::new(sequence_number, ACK_TYPE_TAG, Bytes::new())
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// 전송 종료 신호 여부 (payload 길이 0)
    pub fn is_end_of_transfer(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_ack_tagged(&self) -> bool {
        self.type_tag == ACK_TYPE_TAG
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        put_frame(self, &mut buf);
        buf.freeze()
    }
}

fn put_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + frame.payload.len());
    dst.put_u32(frame.sequence_number);
    dst.put_u16(frame.checksum);
    dst.put_u16(frame.type_tag);
    dst.put_u32(frame.payload.len() as u32);
    dst.put_slice(&frame.payload);
}

/// payload, 시퀀스 번호, 타입 태그로 프레임 바이트 생성
pub fn encode(payload: &[u8], sequence_number: u32, type_tag: u16) -> Bytes {
    Frame::new(sequence_number, type_tag, Bytes::copy_from_slice(payload)).to_bytes()
}

/// 디코드 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// 체크섬 검증 통과
    Valid(Frame),

    /// 체크섬 불일치 (프레임은 스트림에서 소비됨)
    Invalid {
        sequence_number: u32,
        expected: u16,
        computed: u16,
    },
}

impl Decoded {
    /// 유효 프레임이면 반환, 아니면 체크섬 에러
    pub fn into_valid(self) -> Result<Frame> {
        match self {
            Decoded::Valid(frame) => Ok(frame),
            Decoded::Invalid {
                sequence_number,
                expected,
                computed,
            } => Err(Error::ChecksumMismatch {
                sequence_number,
                expected,
                computed,
            }),
        }
    }
}

/// 스트림 프레이밍 코덱
///
/// 헤더의 길이 필드로 프레임 경계를 찾음. `max_payload_len`을 넘는 길이는
/// 손상된 헤더로 보고 `FrameTooLarge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    pub fn new(max_payload_len: usize) -> Self {
        Self { max_payload_len }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Decoded;
    type Error = Error;

    /// 프레임이 아직 다 도착하지 않았으면 `Ok(None)`, 버퍼는 그대로 둠.
    /// 완성된 프레임은 체크섬 결과와 관계없이 버퍼에서 제거됨.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        if payload_len > self.max_payload_len {
            return Err(Error::FrameTooLarge {
                len: payload_len,
                max: self.max_payload_len,
            });
        }

        let frame_len = HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        let mut header = buf.split_to(HEADER_SIZE);
        let sequence_number = header.get_u32();
        let header_checksum = header.get_u16();
        let type_tag = header.get_u16();
        let payload = buf.split_to(payload_len).freeze();

        if !verify_checksum(header_checksum, &payload) {
            return Ok(Some(Decoded::Invalid {
                sequence_number,
                expected: header_checksum,
                computed: ones_complement_sum(&payload),
            }));
        }

        Ok(Some(Decoded::Valid(Frame {
            sequence_number,
            checksum: header_checksum,
            type_tag,
            payload,
        })))
    }

    /// 스트림 종료 시 남은 불완전한 프레임은 버리고 종료로 처리
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>> {
        if let Some(decoded) = self.decode(buf)? {
            return Ok(Some(decoded));
        }
        if !buf.is_empty() {
            debug!("불완전한 프레임 {} bytes 버림", buf.len());
            buf.clear();
        }
        Ok(None)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        put_frame(&frame, dst);
        Ok(())
    }
}
