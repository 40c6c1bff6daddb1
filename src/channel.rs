//! 신뢰 채널 (stop-and-wait)
//!
//! 하나의 UDP 엔드포인트 위에서 요청자-응답자 한 쌍을 잇는 논리 연결.
//! 한 번에 미확인 패킷 하나만 허용한다:
//! - 송신: 전송 → ACK 대기 → 타임아웃/NACK 시 동일 패킷 재전송
//! - 수신: 기대 시퀀스만 수용 후 ACK, 손상이면 NACK, 중복이면 마지막 ACK 재전송
//!
//! 모든 대기는 타임아웃과 재시도 한도로 종결된다. 무한 블로킹 경로는 없다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::WireMessage;
use crate::packet::Packet;
use crate::stats::ChunkStats;

/// 협조적 취소 플래그
///
/// 재시도/타임아웃 경계마다 검사된다. 소켓이나 태스크를 강제로 끊지 않는다.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// 취소 신호
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// 취소 여부
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 채널 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// 유휴
    Idle,

    /// ACK 대기 중
    AwaitingAck,

    /// 마지막 패킷 확인됨
    Acked,

    /// 재전송 중
    Retrying,

    /// 재시도 한도 초과
    Failed,
}

/// ACK 대기 결과
enum AckOutcome {
    Acked,
    Nacked,
    TimedOut,
}

/// 신뢰 채널
///
/// 소켓을 단독 소유한다. 성공/실패/취소 어느 경로로 끝나도
/// drop으로 엔드포인트가 해제된다.
pub struct ReliableChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    /// 첫 유효 데이터 패킷의 발신지로 피어가 고정되었는지 여부
    locked: bool,
    state: ChannelState,
    config: Config,
    cancel: CancelFlag,
    stats: ChunkStats,
    recv_buf: Vec<u8>,
}

impl ReliableChannel {
    /// 기존 소켓으로 채널 생성
    pub fn new(socket: UdpSocket, peer: SocketAddr, config: Config, cancel: CancelFlag) -> Self {
        let recv_buf = vec![0u8; config.recv_buffer_size];
        Self {
            socket,
            peer,
            locked: false,
            state: ChannelState::Idle,
            config,
            cancel,
            stats: ChunkStats::default(),
            recv_buf,
        }
    }

    /// 임시 포트에 바인딩된 채널 생성
    pub async fn connect(peer: SocketAddr, config: Config, cancel: CancelFlag) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self::new(socket, peer, config, cancel))
    }

    /// 현재 상태
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// 지금까지의 채널 통계
    pub fn stats(&self) -> &ChunkStats {
        &self.stats
    }

    /// 통계 소유권 회수
    pub fn into_stats(self) -> ChunkStats {
        self.stats
    }

    /// 로컬 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 제어 메시지 전송 (요청 등, 확인 대기 없음)
    pub async fn send_message(&self, msg: &WireMessage) -> Result<()> {
        self.socket.send_to(&msg.encode()?, self.peer).await?;
        Ok(())
    }

    /// 패킷 하나를 전송하고 ACK를 확인할 때까지 재시도 (송신측)
    ///
    /// 타임아웃과 NACK 모두 동일 패킷의 재전송으로 이어진다. NACK에서
    /// 시퀀스를 전진시키면 조립 결과에 구멍이 생기므로 전진은 ACK에서만 한다.
    pub async fn send_and_confirm(&mut self, packet: &Packet) -> Result<()> {
        let encoded = WireMessage::Data(packet.clone()).encode()?;
        let chunk_id = packet.header.chunk_id;
        let seq = packet.header.seq;
        let ack_timeout = Duration::from_millis(self.config.ack_timeout_ms);

        for attempt in 0..=self.config.max_retries {
            self.cancel.check()?;

            if attempt == 0 {
                self.state = ChannelState::AwaitingAck;
            } else {
                self.state = ChannelState::Retrying;
                self.stats.retries += 1;
                debug!(
                    "패킷 재전송: chunk={}, seq={}, attempt={}/{}",
                    chunk_id, seq, attempt, self.config.max_retries
                );
            }

            self.socket.send_to(&encoded, self.peer).await?;
            self.stats.packets_sent += 1;

            match self.await_ack(chunk_id, seq, ack_timeout).await? {
                AckOutcome::Acked => {
                    self.state = ChannelState::Acked;
                    self.stats.bytes_sent += packet.payload.len() as u64;
                    trace!("ACK 수신: chunk={}, seq={}", chunk_id, seq);
                    return Ok(());
                }
                AckOutcome::Nacked => {
                    debug!("NACK 수신: chunk={}, seq={}", chunk_id, seq);
                }
                AckOutcome::TimedOut => {}
            }
        }

        self.state = ChannelState::Failed;
        Err(Error::RetriesExhausted {
            chunk_id,
            seq,
            attempts: self.config.max_retries,
        })
    }

    /// 타임아웃 안에서 매칭되는 ACK/NACK 대기
    async fn await_ack(
        &mut self,
        chunk_id: u32,
        seq: u64,
        ack_timeout: Duration,
    ) -> Result<AckOutcome> {
        let deadline = tokio::time::Instant::now() + ack_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(AckOutcome::TimedOut);
            }

            let (len, addr) = match timeout(remaining, self.socket.recv_from(&mut self.recv_buf)).await
            {
                Ok(result) => result?,
                Err(_) => return Ok(AckOutcome::TimedOut),
            };

            if addr != self.peer {
                trace!("피어가 아닌 주소의 데이터그램 무시: {}", addr);
                continue;
            }

            match WireMessage::decode(&self.recv_buf[..len]) {
                Ok(WireMessage::Ack { chunk_id: c, seq: s }) if c == chunk_id && s == seq => {
                    return Ok(AckOutcome::Acked);
                }
                Ok(WireMessage::Ack { seq: s, .. }) => {
                    // 과거 ACK의 중복 도착
                    trace!("매칭되지 않는 ACK 무시: seq={}", s);
                }
                Ok(WireMessage::Nack { chunk_id: c, seq: s }) if c == chunk_id && s == seq => {
                    return Ok(AckOutcome::Nacked);
                }
                Ok(_) => {}
                Err(e) => {
                    trace!("ACK 대기 중 손상 데이터그램 무시: {}", e);
                }
            }
        }
    }

    /// 기대 시퀀스의 패킷 하나를 수신하고 ACK (수신측)
    ///
    /// - 디코딩 실패: 버린다. 송신측 타임아웃이 재전송을 유도한다.
    /// - 체크섬 불일치: NACK 전송, 같은 시퀀스를 계속 기다린다.
    /// - 중복/선행 시퀀스: 마지막 ACK만 재전송하고 전진하지 않는다.
    /// - `request`가 있으면 피어 고정 전의 타임아웃마다 재전송한다 (멱등 요청).
    pub async fn recv_sequenced(
        &mut self,
        chunk_id: u32,
        expected_seq: u64,
        request: Option<&WireMessage>,
    ) -> Result<Packet> {
        let recv_timeout = Duration::from_millis(self.config.recv_timeout_ms);
        let request_bytes = request.map(|m| m.encode()).transpose()?;
        let mut waits = 0u32;

        loop {
            self.cancel.check()?;

            let (len, addr) = match timeout(recv_timeout, self.socket.recv_from(&mut self.recv_buf))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    waits += 1;
                    if waits > self.config.max_retries {
                        self.state = ChannelState::Failed;
                        return Err(Error::RetriesExhausted {
                            chunk_id,
                            seq: expected_seq,
                            attempts: waits - 1,
                        });
                    }
                    debug!(
                        "패킷 대기 타임아웃: chunk={}, seq={} ({}/{})",
                        chunk_id, expected_seq, waits, self.config.max_retries
                    );
                    if !self.locked {
                        if let Some(bytes) = &request_bytes {
                            self.socket.send_to(bytes, self.peer).await?;
                        }
                    }
                    continue;
                }
            };

            if self.locked && addr != self.peer {
                trace!("고정된 피어가 아닌 주소 무시: {}", addr);
                continue;
            }

            let msg = match WireMessage::decode(&self.recv_buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("손상 데이터그램 버림: {}", e);
                    continue;
                }
            };

            match msg {
                WireMessage::Data(packet) => {
                    if packet.header.chunk_id != chunk_id {
                        trace!("다른 청크의 패킷 무시: chunk={}", packet.header.chunk_id);
                        continue;
                    }

                    if !self.locked {
                        // 첫 유효 패킷의 발신지가 이 청크의 응답자 엔드포인트
                        self.peer = addr;
                        self.locked = true;
                    }

                    if let Err(e) = self.verify_payload(&packet) {
                        warn!("{} — NACK 전송", e);
                        self.stats.nacks_sent += 1;
                        self.send_control(WireMessage::Nack {
                            chunk_id,
                            seq: packet.header.seq,
                        })
                        .await?;
                        continue;
                    }

                    if packet.header.seq == expected_seq {
                        self.send_control(WireMessage::Ack {
                            chunk_id,
                            seq: expected_seq,
                        })
                        .await?;
                        self.state = ChannelState::Acked;
                        self.stats.acks_sent += 1;
                        self.stats.packets_received += 1;
                        self.stats.bytes_received += packet.payload.len() as u64;
                        return Ok(packet);
                    }

                    // 시퀀스 불일치 (중복 또는 선행 도착): 수용하지 않고
                    // 마지막 ACK만 다시 알려 송신측을 수렴시킨다
                    self.stats.duplicate_packets += 1;
                    trace!(
                        "시퀀스 불일치: expected={}, got={}",
                        expected_seq,
                        packet.header.seq
                    );
                    if expected_seq > 0 {
                        self.send_control(WireMessage::Ack {
                            chunk_id,
                            seq: expected_seq - 1,
                        })
                        .await?;
                        self.stats.acks_sent += 1;
                    }

                    waits += 1;
                    if waits > self.config.max_retries {
                        self.state = ChannelState::Failed;
                        return Err(Error::RetriesExhausted {
                            chunk_id,
                            seq: expected_seq,
                            attempts: waits - 1,
                        });
                    }
                }
                WireMessage::Error(reason) => {
                    self.state = ChannelState::Failed;
                    return Err(Error::RemoteFault { reason });
                }
                other => {
                    trace!("수신측이 처리하지 않는 메시지 무시: {:?}", other.msg_type());
                }
            }
        }
    }

    fn verify_payload(&self, packet: &Packet) -> Result<()> {
        if packet.verify(self.config.checksum) {
            Ok(())
        } else {
            Err(Error::ChecksumMismatch {
                chunk_id: packet.header.chunk_id,
                seq: packet.header.seq,
            })
        }
    }

    async fn send_control(&self, msg: WireMessage) -> Result<()> {
        self.socket.send_to(&msg.encode()?, self.peer).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumKind;
    use bytes::Bytes;

    fn test_config(max_retries: u32, timeout_ms: u64) -> Config {
        Config {
            max_retries,
            ack_timeout_ms: timeout_ms,
            recv_timeout_ms: timeout_ms,
            ..Config::default()
        }
    }

    async fn bound_pair() -> (UdpSocket, UdpSocket, SocketAddr, SocketAddr) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let aa = a.local_addr().unwrap();
        let ba = b.local_addr().unwrap();
        (a, b, aa, ba)
    }

    fn data_packet(seq: u64, payload: &[u8]) -> Packet {
        Packet::new(7, seq, 4, Bytes::copy_from_slice(payload), ChecksumKind::Sha256)
    }

    async fn recv_data(socket: &UdpSocket, buf: &mut [u8]) -> (Packet, SocketAddr) {
        loop {
            let (len, addr) = socket.recv_from(buf).await.unwrap();
            if let Ok(WireMessage::Data(packet)) = WireMessage::decode(&buf[..len]) {
                return (packet, addr);
            }
        }
    }

    #[tokio::test]
    async fn test_send_and_confirm_acked() {
        let (a, b, _aa, ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, ba, test_config(3, 1000), CancelFlag::new());

        let acker = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (packet, addr) = recv_data(&b, &mut buf).await;
            let ack = WireMessage::Ack {
                chunk_id: packet.header.chunk_id,
                seq: packet.header.seq,
            };
            b.send_to(&ack.encode().unwrap(), addr).await.unwrap();
            packet.header.seq
        });

        channel.send_and_confirm(&data_packet(0, b"hello")).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Acked);
        assert_eq!(acker.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_loss_retransmits_same_packet() {
        let (a, b, _aa, ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, ba, test_config(5, 200), CancelFlag::new());

        // 처음 두 전송은 무시 (손실 시뮬레이션), 세 번째에 ACK
        let acker = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            for i in 0..3 {
                let (packet, addr) = recv_data(&b, &mut buf).await;
                seen.push(packet.header.seq);
                if i == 2 {
                    let ack = WireMessage::Ack {
                        chunk_id: packet.header.chunk_id,
                        seq: packet.header.seq,
                    };
                    b.send_to(&ack.encode().unwrap(), addr).await.unwrap();
                }
            }
            seen
        });

        channel.send_and_confirm(&data_packet(3, b"retry me")).await.unwrap();

        // 동일 시퀀스가 세 번 전송되었어야 한다
        assert_eq!(acker.await.unwrap(), vec![3, 3, 3]);
        assert_eq!(channel.stats().retries, 2);
        assert_eq!(channel.state(), ChannelState::Acked);
    }

    #[tokio::test]
    async fn test_retries_exhausted_on_silence() {
        let (a, _b, _aa, ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, ba, test_config(2, 100), CancelFlag::new());

        let err = channel.send_and_confirm(&data_packet(0, b"x")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::RetriesExhausted { chunk_id: 7, seq: 0, attempts: 2 }
        ));
        assert_eq!(channel.state(), ChannelState::Failed);
    }

    #[tokio::test]
    async fn test_nack_resends_same_sequence() {
        let (a, b, _aa, ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, ba, test_config(3, 1000), CancelFlag::new());

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (first, addr) = recv_data(&b, &mut buf).await;
            let nack = WireMessage::Nack {
                chunk_id: first.header.chunk_id,
                seq: first.header.seq,
            };
            b.send_to(&nack.encode().unwrap(), addr).await.unwrap();

            let (second, addr) = recv_data(&b, &mut buf).await;
            let ack = WireMessage::Ack {
                chunk_id: second.header.chunk_id,
                seq: second.header.seq,
            };
            b.send_to(&ack.encode().unwrap(), addr).await.unwrap();

            (first.header.seq, second.header.seq)
        });

        channel.send_and_confirm(&data_packet(5, b"nack me")).await.unwrap();

        // NACK 후에도 시퀀스는 전진하지 않는다
        assert_eq!(responder.await.unwrap(), (5, 5));
    }

    #[tokio::test]
    async fn test_recv_sequenced_acks_expected_packet() {
        let (a, b, aa, _ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, "127.0.0.1:9".parse().unwrap(), test_config(3, 1000), CancelFlag::new());

        let sender = tokio::spawn(async move {
            let packet = data_packet(0, b"first");
            b.send_to(&WireMessage::Data(packet).encode().unwrap(), aa)
                .await
                .unwrap();

            let mut buf = vec![0u8; 4096];
            let (len, _) = b.recv_from(&mut buf).await.unwrap();
            WireMessage::decode(&buf[..len]).unwrap()
        });

        let packet = channel.recv_sequenced(7, 0, None).await.unwrap();
        assert_eq!(packet.header.seq, 0);
        assert_eq!(packet.payload.as_ref(), b"first");

        match sender.await.unwrap() {
            WireMessage::Ack { chunk_id: 7, seq: 0 } => {}
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_not_accepted_early() {
        let (a, b, aa, _ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, "127.0.0.1:9".parse().unwrap(), test_config(5, 1000), CancelFlag::new());

        let sender = tokio::spawn(async move {
            let p0 = data_packet(0, b"AAAA");
            let p1 = data_packet(1, b"BBBB");
            let mut buf = vec![0u8; 4096];

            // 시퀀스 1을 먼저, 그 다음 0을 전송
            b.send_to(&WireMessage::Data(p1.clone()).encode().unwrap(), aa)
                .await
                .unwrap();
            b.send_to(&WireMessage::Data(p0).encode().unwrap(), aa)
                .await
                .unwrap();

            // ACK 0을 기다린 다음에야 1을 재전송
            loop {
                let (len, _) = b.recv_from(&mut buf).await.unwrap();
                if let Ok(WireMessage::Ack { seq: 0, .. }) = WireMessage::decode(&buf[..len]) {
                    break;
                }
            }
            b.send_to(&WireMessage::Data(p1).encode().unwrap(), aa)
                .await
                .unwrap();

            loop {
                let (len, _) = b.recv_from(&mut buf).await.unwrap();
                if let Ok(WireMessage::Ack { seq: 1, .. }) = WireMessage::decode(&buf[..len]) {
                    break;
                }
            }
        });

        // 선행 도착한 시퀀스 1은 수용되지 않고, 0부터 순서대로 받는다
        let first = channel.recv_sequenced(7, 0, None).await.unwrap();
        assert_eq!(first.payload.as_ref(), b"AAAA");
        assert!(channel.stats().duplicate_packets >= 1);

        let second = channel.recv_sequenced(7, 1, None).await.unwrap();
        assert_eq!(second.payload.as_ref(), b"BBBB");

        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupted_packet_triggers_nack() {
        let (a, b, aa, _ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, "127.0.0.1:9".parse().unwrap(), test_config(3, 1000), CancelFlag::new());

        let sender = tokio::spawn(async move {
            // 페이로드 비트 하나를 반전시킨 손상 패킷
            let good = data_packet(0, b"dddd");
            let mut corrupt_bytes = WireMessage::Data(good.clone()).encode().unwrap();
            let last = corrupt_bytes.len() - 1;
            corrupt_bytes[last] ^= 0x01;
            b.send_to(&corrupt_bytes, aa).await.unwrap();

            // NACK이 와야 재전송한다
            let mut buf = vec![0u8; 4096];
            let nack_seq = loop {
                let (len, _) = b.recv_from(&mut buf).await.unwrap();
                if let Ok(WireMessage::Nack { seq, .. }) = WireMessage::decode(&buf[..len]) {
                    break seq;
                }
            };
            b.send_to(&WireMessage::Data(good).encode().unwrap(), aa)
                .await
                .unwrap();
            nack_seq
        });

        let packet = channel.recv_sequenced(7, 0, None).await.unwrap();
        assert_eq!(packet.payload.as_ref(), b"dddd");
        assert_eq!(channel.stats().nacks_sent, 1);

        // NACK은 손상된 바로 그 시퀀스를 가리킨다
        assert_eq!(sender.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let (a, _b, _aa, ba) = bound_pair().await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut channel = ReliableChannel::new(a, ba, test_config(3, 1000), cancel);
        let err = channel.send_and_confirm(&data_packet(0, b"x")).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_recv_timeout_exhausts() {
        let (a, _b, _aa, ba) = bound_pair().await;
        let mut channel = ReliableChannel::new(a, ba, test_config(2, 80), CancelFlag::new());

        let err = channel.recv_sequenced(1, 0, None).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { chunk_id: 1, seq: 0, .. }));
    }
}
