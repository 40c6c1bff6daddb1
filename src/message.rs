//! 프로토콜 와이어 메시지 정의
//!
//! 요청/데이터/ACK/NACK/에러/목록을 태그드 enum 하나로 통합하고
//! 디코딩 시점에 검증한다. 구분자 문자열 파싱은 쓰지 않는다.

use serde::{Deserialize, Serialize};

use crate::catalog::FileDescriptor;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::{MAGIC_NUMBER, PROTOCOL_VERSION};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// 바이트 범위 다운로드 요청
    Request = 1,

    /// 데이터 패킷
    Data = 2,

    /// 수신 확인
    Ack = 3,

    /// 손상 통보 (같은 시퀀스 재전송 요구)
    Nack = 4,

    /// 치명적 에러 통보
    Error = 5,

    /// 파일 목록 요청
    List = 6,

    /// 파일 목록 응답
    Catalog = 7,
}

/// 메시지 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// 메시지 타입
    pub msg_type: MessageType,

    /// 페이로드 길이 (헤더 제외)
    pub payload_len: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, payload_len: u32) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            msg_type,
            payload_len,
        }
    }
}

/// 다운로드 요청 (요청자 → 응답자)
///
/// 같은 요청을 반복 전송해도 안전하다 (멱등). 응답자는 같은 바이트를
/// 다시 보낸다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// 파일 이름
    pub name: String,

    /// 파일 내 시작 오프셋 (바이트)
    pub offset: u64,

    /// 요청 길이 (바이트)
    pub length: u64,

    /// 첫 패킷에 부여할 시퀀스 번호 (보통 0, 재요청 시에도 같은 값)
    pub seq: u64,

    /// 청크 ID
    pub chunk_id: u32,
}

/// 응답자측 치명적 에러 사유
///
/// 재시도해도 해소되지 않는 조건만 여기로 온다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    /// 파일이 서버에 없음
    FileNotFound,

    /// 요청 범위가 파일 크기를 벗어남
    InvalidRange,

    /// 서버 내부 에러
    InternalError,
}

/// 통합 와이어 메시지
#[derive(Debug, Clone)]
pub enum WireMessage {
    Request(DownloadRequest),
    Data(Packet),
    Ack { chunk_id: u32, seq: u64 },
    Nack { chunk_id: u32, seq: u64 },
    Error(ErrorReason),
    List,
    Catalog(Vec<FileDescriptor>),
}

impl WireMessage {
    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        match self {
            WireMessage::Request(_) => MessageType::Request,
            WireMessage::Data(_) => MessageType::Data,
            WireMessage::Ack { .. } => MessageType::Ack,
            WireMessage::Nack { .. } => MessageType::Nack,
            WireMessage::Error(_) => MessageType::Error,
            WireMessage::List => MessageType::List,
            WireMessage::Catalog(_) => MessageType::Catalog,
        }
    }

    /// 메시지를 바이트로 직렬화
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            WireMessage::Request(req) => bincode::serialize(req)?,
            WireMessage::Data(packet) => packet.to_bytes()?,
            WireMessage::Ack { chunk_id, seq } => bincode::serialize(&(*chunk_id, *seq))?,
            WireMessage::Nack { chunk_id, seq } => bincode::serialize(&(*chunk_id, *seq))?,
            WireMessage::Error(reason) => bincode::serialize(reason)?,
            WireMessage::List => Vec::new(),
            WireMessage::Catalog(entries) => bincode::serialize(entries)?,
        };

        let header = MessageHeader::new(self.msg_type(), payload.len() as u32);
        let header_bytes = bincode::serialize(&header)?;

        let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// 바이트에서 메시지 역직렬화 (디코딩 시점 검증)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header: MessageHeader =
            bincode::deserialize(bytes).map_err(|e| Error::MalformedPacket {
                reason: format!("메시지 헤더 파싱 실패: {e}"),
            })?;

        if header.magic != MAGIC_NUMBER {
            return Err(Error::MalformedPacket {
                reason: format!("매직 넘버 불일치: {:08X}", header.magic),
            });
        }
        if header.version != PROTOCOL_VERSION {
            return Err(Error::MalformedPacket {
                reason: format!("지원하지 않는 버전: {}", header.version),
            });
        }

        // bincode는 가변 길이이므로 헤더 크기를 다시 계산해서 페이로드 시작점 확인
        let header_size = bincode::serialized_size(&header)? as usize;
        let payload = bytes.get(header_size..).ok_or_else(|| Error::MalformedPacket {
            reason: "페이로드 없음".into(),
        })?;

        if payload.len() < header.payload_len as usize {
            return Err(Error::MalformedPacket {
                reason: "페이로드가 선언된 길이보다 짧음".into(),
            });
        }
        let payload = &payload[..header.payload_len as usize];

        let msg = match header.msg_type {
            MessageType::Request => {
                WireMessage::Request(bincode::deserialize(payload).map_err(|e| malformed("요청", e))?)
            }
            MessageType::Data => WireMessage::Data(Packet::from_bytes(payload)?),
            MessageType::Ack => {
                let (chunk_id, seq) =
                    bincode::deserialize(payload).map_err(|e| malformed("ACK", e))?;
                WireMessage::Ack { chunk_id, seq }
            }
            MessageType::Nack => {
                let (chunk_id, seq) =
                    bincode::deserialize(payload).map_err(|e| malformed("NACK", e))?;
                WireMessage::Nack { chunk_id, seq }
            }
            MessageType::Error => {
                WireMessage::Error(bincode::deserialize(payload).map_err(|e| malformed("에러", e))?)
            }
            MessageType::List => WireMessage::List,
            MessageType::Catalog => WireMessage::Catalog(
                bincode::deserialize(payload).map_err(|e| malformed("카탈로그", e))?,
            ),
        };
        Ok(msg)
    }
}

fn malformed(what: &str, e: bincode::Error) -> Error {
    Error::MalformedPacket {
        reason: format!("{what} 파싱 실패: {e}"),
    }
}
