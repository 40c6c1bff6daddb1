//! # CFT (Chunked File Transfer)
//!
//! UDP 기반 stop-and-wait 청크 병렬 파일 다운로드 프로토콜
//!
//! ## 핵심 특징
//! - **청크 병렬화**: 파일을 N개 연속 범위로 분할, 청크마다 독립 전송
//! - **Stop-and-wait**: 패킷 단위 ACK/NACK + 타임아웃 + 재시도 한도
//! - **엔드포인트 분리**: 청크마다 전용 UDP 소켓, ACK 혼선 없음
//! - **2단계 무결성**: 패킷별 체크섬 + 조립 후 파일 전체 체크섬
//! - **명시적 실패**: 모든 대기는 타임아웃과 재시도 한도로 종결
//! - **원자적 완료**: 검증 통과 후에만 최종 이름으로 교체

pub mod catalog;
pub mod channel;
pub mod checksum;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod packet;
pub mod server;
pub mod stats;
pub mod transfer;

pub use catalog::{fetch_catalog, Catalog, FileDescriptor};
pub use channel::{CancelFlag, ChannelState, ReliableChannel};
pub use checksum::ChecksumKind;
pub use chunk::{partition, ChunkId, ChunkPlan, ChunkResult};
pub use config::Config;
pub use coordinator::{TransferCoordinator, TransferOutcome};
pub use error::{Error, Result};
pub use message::{DownloadRequest, ErrorReason, MessageType, WireMessage};
pub use packet::{Packet, PacketHeader};
pub use server::FileServer;
pub use stats::{ChunkStats, ServerStats, TransferStats};
pub use transfer::ChunkTransfer;

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 매직 넘버 (패킷 식별용)
pub const MAGIC_NUMBER: u32 = 0x43465450; // "CFTP"

/// 기본 청크 수 (= 동시 전송 수)
pub const DEFAULT_CHUNK_COUNT: u32 = 4;

/// 기본 최대 패킷 페이로드 (바이트)
pub const DEFAULT_MAX_PAYLOAD: usize = 1400;

/// 기본 패킷당 재시도 한도
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// 데이터그램 하나에 담을 수 있는 페이로드 상한 (바이트)
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_000;
