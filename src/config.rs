//! 프로토콜 설정

use crate::checksum::ChecksumKind;
use crate::error::{Error, Result};
use crate::{
    DEFAULT_CHUNK_COUNT, DEFAULT_MAX_PAYLOAD, DEFAULT_MAX_RETRIES, MAX_DATAGRAM_PAYLOAD,
};

/// CFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 파일 분할 청크 수 (= 동시 전송 수)
    pub chunk_count: u32,

    /// 패킷 최대 페이로드 (바이트)
    pub max_payload: usize,

    /// 패킷당 최대 재시도 횟수
    pub max_retries: u32,

    /// ACK 대기 타임아웃 (밀리초, 송신측)
    pub ack_timeout_ms: u64,

    /// 데이터 패킷 대기 타임아웃 (밀리초, 수신측)
    pub recv_timeout_ms: u64,

    /// 카탈로그 요청 재시도 간격 (밀리초)
    pub catalog_retry_ms: u64,

    /// 카탈로그 요청 최대 재시도
    pub catalog_max_retries: u32,

    /// 체크섬 모드
    pub checksum: ChecksumKind,

    /// 수신 버퍼 크기 (바이트)
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_count: DEFAULT_CHUNK_COUNT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_retries: DEFAULT_MAX_RETRIES,
            ack_timeout_ms: 2000,            // 2초
            recv_timeout_ms: 2000,           // 2초
            catalog_retry_ms: 500,           // 0.5초 간격
            catalog_max_retries: 20,
            checksum: ChecksumKind::Sha256,
            recv_buffer_size: 64 * 1024,     // 64KB
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 청크 바이트 길이를 패킷 수로 환산
    pub fn packets_for(&self, length: u64) -> u32 {
        ((length + self.max_payload as u64 - 1) / self.max_payload as u64) as u32
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_count == 0 {
            return Err(Error::InvalidConfig("chunk_count는 1 이상이어야 함".into()));
        }
        if self.max_payload == 0 || self.max_payload > MAX_DATAGRAM_PAYLOAD {
            return Err(Error::InvalidConfig(format!(
                "max_payload는 1 ~ {MAX_DATAGRAM_PAYLOAD} 범위여야 함"
            )));
        }
        if self.ack_timeout_ms == 0 || self.recv_timeout_ms == 0 {
            return Err(Error::InvalidConfig("타임아웃은 0일 수 없음".into()));
        }
        if self.recv_buffer_size < self.max_payload + 512 {
            return Err(Error::InvalidConfig(
                "recv_buffer_size가 max_payload + 헤더 여유보다 작음".into(),
            ));
        }
        Ok(())
    }

    /// 손실 많은 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            chunk_count: 4,
            max_payload: 1000,               // 작은 패킷
            max_retries: 30,
            ack_timeout_ms: 3000,
            recv_timeout_ms: 3000,
            catalog_retry_ms: 1000,
            catalog_max_retries: 30,
            checksum: ChecksumKind::Sha256,
            recv_buffer_size: 64 * 1024,
        }
    }

    /// 루프백/테스트용 설정 (짧은 타임아웃)
    pub fn local_loopback() -> Self {
        Self {
            chunk_count: 4,
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_retries: 5,
            ack_timeout_ms: 300,
            recv_timeout_ms: 300,
            catalog_retry_ms: 100,
            catalog_max_retries: 10,
            checksum: ChecksumKind::Sha256,
            recv_buffer_size: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::lossy_network().validate().is_ok());
        assert!(Config::local_loopback().validate().is_ok());
    }

    #[test]
    fn test_invalid_rejected() {
        let mut config = Config::default();
        config.chunk_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_payload = MAX_DATAGRAM_PAYLOAD + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ack_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_packets_for() {
        let mut config = Config::default();
        config.max_payload = 256;

        assert_eq!(config.packets_for(1024), 4);
        assert_eq!(config.packets_for(1025), 5);
        assert_eq!(config.packets_for(1), 1);
        assert_eq!(config.packets_for(0), 0);
    }
}
