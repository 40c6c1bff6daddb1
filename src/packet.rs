//! 데이터 패킷 정의와 인코딩
//!
//! 패킷은 청크 내 stop-and-wait 전송의 단위다.
//! `[u16 헤더 길이][bincode 헤더][페이로드]` 형태의 자체 구분 인코딩으로,
//! 디코딩에 외부 길이 정보가 필요 없다.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumKind;
use crate::error::{Error, Result};

/// 패킷 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketHeader {
    /// 청크 ID
    pub chunk_id: u32,

    /// 청크 내 시퀀스 번호 (0부터 단조 증가)
    pub seq: u64,

    /// 이 청크의 총 패킷 수
    pub total_packets: u32,

    /// 페이로드 체크섬 (hex)
    pub checksum: String,

    /// 페이로드 길이
    pub payload_len: u16,
}

/// 데이터 패킷
#[derive(Debug, Clone)]
pub struct Packet {
    /// 패킷 헤더
    pub header: PacketHeader,

    /// 실제 데이터
    pub payload: Bytes,
}

impl Packet {
    /// 새 패킷 생성 (페이로드 체크섬 자동 계산)
    pub fn new(
        chunk_id: u32,
        seq: u64,
        total_packets: u32,
        payload: Bytes,
        checksum: ChecksumKind,
    ) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        let digest = checksum.digest(&payload);

        Self {
            header: PacketHeader {
                chunk_id,
                seq,
                total_packets,
                checksum: digest,
                payload_len: payload.len() as u16,
            },
            payload,
        }
    }

    /// 패킷을 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header_bytes = bincode::serialize(&self.header)?;
        let header_len = header_bytes.len() as u16;

        let mut buf = Vec::with_capacity(2 + header_bytes.len() + self.payload.len());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// 바이트에서 패킷 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::MalformedPacket {
                reason: "헤더 길이 프리픽스 없음".into(),
            });
        }

        let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 2 + header_len {
            return Err(Error::MalformedPacket {
                reason: "헤더 잘림".into(),
            });
        }

        let header: PacketHeader =
            bincode::deserialize(&bytes[2..2 + header_len]).map_err(|e| Error::MalformedPacket {
                reason: format!("헤더 파싱 실패: {e}"),
            })?;

        let payload_bytes = &bytes[2 + header_len..];
        if payload_bytes.len() < header.payload_len as usize {
            return Err(Error::MalformedPacket {
                reason: "페이로드가 선언된 길이보다 짧음".into(),
            });
        }

        let payload = Bytes::copy_from_slice(&payload_bytes[..header.payload_len as usize]);
        Ok(Self { header, payload })
    }

    /// 페이로드 체크섬 검증
    pub fn verify(&self, checksum: ChecksumKind) -> bool {
        checksum.digest(&self.payload) == self.header.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_roundtrip() {
        let packet = Packet::new(
            3,
            7,
            16,
            Bytes::from_static(b"payload bytes"),
            ChecksumKind::Sha256,
        );

        let bytes = packet.to_bytes().unwrap();
        let restored = Packet::from_bytes(&bytes).unwrap();

        assert_eq!(restored.header.chunk_id, 3);
        assert_eq!(restored.header.seq, 7);
        assert_eq!(restored.header.total_packets, 16);
        assert_eq!(restored.header.checksum, packet.header.checksum);
        assert_eq!(restored.payload, packet.payload);
        assert!(restored.verify(ChecksumKind::Sha256));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let packet = Packet::new(0, 0, 1, Bytes::from_static(b"x"), ChecksumKind::Crc32);
        let bytes = packet.to_bytes().unwrap();

        assert!(matches!(
            Packet::from_bytes(&bytes[..1]),
            Err(Error::MalformedPacket { .. })
        ));
        assert!(matches!(
            Packet::from_bytes(&bytes[..8]),
            Err(Error::MalformedPacket { .. })
        ));
    }

    #[test]
    fn test_short_payload_rejected() {
        let packet = Packet::new(0, 0, 1, Bytes::from_static(b"abcdef"), ChecksumKind::Sha256);
        let bytes = packet.to_bytes().unwrap();

        // 선언된 payload_len보다 짧게 자르면 거부
        assert!(matches!(
            Packet::from_bytes(&bytes[..bytes.len() - 3]),
            Err(Error::MalformedPacket { .. })
        ));
    }

    #[test]
    fn test_verify_detects_bit_flip() {
        let packet = Packet::new(1, 2, 4, Bytes::from_static(b"dddd"), ChecksumKind::Sha256);
        let mut bytes = packet.to_bytes().unwrap();

        // 페이로드 마지막 바이트의 비트 하나 반전
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let corrupted = Packet::from_bytes(&bytes).unwrap();
        assert!(!corrupted.verify(ChecksumKind::Sha256));
    }
}
