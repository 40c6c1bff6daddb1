//! 전송 통계

use std::time::{Duration, Instant};

/// 채널/청크 단위 통계
///
/// 요청자측은 수신 계열, 응답자측은 송신 계열 필드를 채운다.
#[derive(Debug, Clone, Default)]
pub struct ChunkStats {
    /// 송신 패킷 수 (재전송 포함)
    pub packets_sent: u64,

    /// 순서대로 확정된 수신 패킷 수
    pub packets_received: u64,

    /// 확정된 수신 바이트
    pub bytes_received: u64,

    /// ACK까지 확인된 송신 바이트
    pub bytes_sent: u64,

    /// 재전송 횟수
    pub retries: u64,

    /// 중복/순서 불일치로 버린 패킷 수
    pub duplicate_packets: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    /// 보낸 NACK 수
    pub nacks_sent: u64,
}

/// 파일 전송 전체 통계
///
/// 조정자가 청크별 통계를 병합해서 만든다.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 완료된 청크 수
    pub chunks_completed: u64,

    /// 실패한 청크 수
    pub chunks_failed: u64,

    /// 병합된 채널 통계
    pub channel: ChunkStats,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            chunks_completed: 0,
            chunks_failed: 0,
            channel: ChunkStats::default(),
        }
    }

    /// 청크 통계 병합
    pub fn merge_chunk(&mut self, chunk: &ChunkStats) {
        self.channel.packets_sent += chunk.packets_sent;
        self.channel.packets_received += chunk.packets_received;
        self.channel.bytes_received += chunk.bytes_received;
        self.channel.bytes_sent += chunk.bytes_sent;
        self.channel.retries += chunk.retries;
        self.channel.duplicate_packets += chunk.duplicate_packets;
        self.channel.acks_sent += chunk.acks_sent;
        self.channel.nacks_sent += chunk.nacks_sent;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 수신 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.channel.bytes_received as f64 / secs
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "{:.2}s | chunks {}/{} | {} bytes | {:.2} MB/s | retries {} | dups {} | nacks {}",
            self.elapsed().as_secs_f64(),
            self.chunks_completed,
            self.chunks_completed + self.chunks_failed,
            self.channel.bytes_received,
            self.throughput() / 1_000_000.0,
            self.channel.retries,
            self.channel.duplicate_packets,
            self.channel.nacks_sent,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 서버측 집계 통계
#[derive(Debug, Clone)]
pub struct ServerStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 목록 요청 수
    pub list_requests: u64,

    /// 완료한 범위 응답 수
    pub requests_served: u64,

    /// 검증 실패로 거부한 요청 수
    pub rejected_requests: u64,

    /// 송신 중 실패한 응답 수
    pub failed_requests: u64,

    /// 송신 패킷 수 (재전송 포함)
    pub packets_sent: u64,

    /// 재전송 횟수
    pub retransmissions: u64,

    /// ACK까지 확인된 송신 바이트
    pub bytes_sent: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            list_requests: 0,
            requests_served: 0,
            rejected_requests: 0,
            failed_requests: 0,
            packets_sent: 0,
            retransmissions: 0,
            bytes_sent: 0,
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "{:.2}s | served {} | rejected {} | failed {} | packets {} | retrans {} | {} bytes",
            self.start_time.elapsed().as_secs_f64(),
            self.requests_served,
            self.rejected_requests,
            self.failed_requests,
            self.packets_sent,
            self.retransmissions,
            self.bytes_sent,
        )
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_chunk_accumulates() {
        let mut stats = TransferStats::new();
        let chunk = ChunkStats {
            packets_received: 4,
            bytes_received: 1024,
            acks_sent: 4,
            duplicate_packets: 1,
            ..ChunkStats::default()
        };

        stats.merge_chunk(&chunk);
        stats.merge_chunk(&chunk);

        assert_eq!(stats.channel.packets_received, 8);
        assert_eq!(stats.channel.bytes_received, 2048);
        assert_eq!(stats.channel.acks_sent, 8);
        assert_eq!(stats.channel.duplicate_packets, 2);
    }
}
