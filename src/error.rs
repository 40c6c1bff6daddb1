//! 에러 타입 정의

use thiserror::Error;

use crate::message::ErrorReason;

/// CFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("손상된 패킷: {reason}")]
    MalformedPacket { reason: String },

    #[error("체크섬 불일치: chunk={chunk_id}, seq={seq}")]
    ChecksumMismatch { chunk_id: u32, seq: u64 },

    #[error("재시도 한도 초과: chunk={chunk_id}, seq={seq}, attempts={attempts}")]
    RetriesExhausted {
        chunk_id: u32,
        seq: u64,
        attempts: u32,
    },

    #[error("파일 없음: {name}")]
    FileNotFound { name: String },

    #[error("유효하지 않은 범위: offset={offset}, length={length}, size={size}")]
    InvalidRange { offset: u64, length: u64, size: u64 },

    #[error("서버 에러 통보: {reason:?}")]
    RemoteFault { reason: ErrorReason },

    #[error("파일 무결성 검증 실패: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("전송 취소됨")]
    Cancelled,

    #[error("카탈로그 응답 없음: {attempts}회 시도")]
    CatalogUnavailable { attempts: u32 },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
