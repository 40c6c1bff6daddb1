//! 파일 서버 (응답자측)
//!
//! 메인 소켓은 List/Request만 받는다. 검증을 통과한 요청마다 전용
//! 소켓을 가진 응답자 태스크를 띄워, 요청된 바이트 범위를 패킷으로
//! 나눠 stop-and-wait으로 송신한다. 요청별 엔드포인트 분리로 동시
//! 청크들의 ACK가 섞이지 않는다.

use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::channel::{CancelFlag, ReliableChannel};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{DownloadRequest, ErrorReason, WireMessage};
use crate::packet::Packet;
use crate::stats::{ChunkStats, ServerStats};

/// 파일 서버
pub struct FileServer {
    socket: Arc<UdpSocket>,
    root: PathBuf,
    catalog: Arc<Catalog>,
    config: Config,
    stats: Arc<RwLock<ServerStats>>,
    cancel: CancelFlag,
}

impl FileServer {
    /// 디렉터리를 스캔하고 주소에 바인딩
    pub async fn bind(addr: SocketAddr, root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        config.validate()?;
        let root = root.into();
        let catalog = Catalog::scan_dir(&root, config.checksum)?;
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        info!(
            "CFT Server listening on {} ({}개 파일)",
            socket.local_addr()?,
            catalog.len()
        );

        Ok(Self {
            socket,
            root,
            catalog: Arc::new(catalog),
            config,
            stats: Arc::new(RwLock::new(ServerStats::new())),
            cancel: CancelFlag::new(),
        })
    }

    /// 바인딩된 로컬 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 카탈로그 스냅샷
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// 취소 플래그 핸들
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> ServerStats {
        self.stats.read().clone()
    }

    /// 요청 수신 루프 (취소 플래그로 종료)
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        while !self.cancel.is_cancelled() {
            let (len, addr) = match tokio::time::timeout(
                Duration::from_millis(250),
                self.socket.recv_from(&mut buf),
            )
            .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("수신 에러: {}", e);
                    continue;
                }
                // 타임아웃: 취소 플래그 재확인
                Err(_) => continue,
            };

            match WireMessage::decode(&buf[..len]) {
                Ok(WireMessage::List) => {
                    debug!("목록 요청: {}", addr);
                    let reply = WireMessage::Catalog(self.catalog.to_entries());
                    if let Err(e) = self.socket.send_to(&reply.encode()?, addr).await {
                        warn!("목록 응답 실패: {}", e);
                    }
                    self.stats.write().list_requests += 1;
                }
                Ok(WireMessage::Request(req)) => {
                    self.handle_request(req, addr);
                }
                Ok(other) => {
                    debug!("서버가 처리하지 않는 메시지: {:?}", other.msg_type());
                }
                Err(e) => debug!("손상 데이터그램 버림: {} ({})", e, addr),
            }
        }

        info!("CFT Server 종료");
        Ok(())
    }

    /// 요청을 검증하고 응답자 태스크 생성
    fn handle_request(&self, req: DownloadRequest, addr: SocketAddr) {
        debug!(
            "다운로드 요청: {} chunk={} offset={} length={} ({})",
            req.name, req.chunk_id, req.offset, req.length, addr
        );

        // 재시도로 해소되지 않는 조건은 즉시 에러 통보
        let reject = match self.catalog.get(&req.name) {
            None => Some(ErrorReason::FileNotFound),
            Some(desc) => {
                let out_of_range = req
                    .offset
                    .checked_add(req.length)
                    .map_or(true, |end| end > desc.size);
                if req.length == 0 || out_of_range {
                    Some(ErrorReason::InvalidRange)
                } else {
                    None
                }
            }
        };

        if let Some(reason) = reject {
            warn!("요청 거부: {} chunk={} — {:?}", req.name, req.chunk_id, reason);
            let socket = self.socket.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Ok(bytes) = WireMessage::Error(reason).encode() {
                    let _ = socket.send_to(&bytes, addr).await;
                }
                stats.write().rejected_requests += 1;
            });
            return;
        }

        let path = self.root.join(&req.name);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let stats = self.stats.clone();
        let main_socket = self.socket.clone();

        tokio::spawn(async move {
            match serve_range(&path, &req, addr, config, cancel).await {
                Ok(chunk_stats) => {
                    let mut s = stats.write();
                    s.requests_served += 1;
                    s.packets_sent += chunk_stats.packets_sent;
                    s.retransmissions += chunk_stats.retries;
                    s.bytes_sent += chunk_stats.bytes_sent;
                }
                Err(Error::Cancelled) => {
                    debug!("응답 취소: {} chunk={}", req.name, req.chunk_id);
                }
                Err(e) => {
                    warn!("응답 실패: {} chunk={} — {}", req.name, req.chunk_id, e);
                    stats.write().failed_requests += 1;

                    // 파일을 읽다 실패한 경우만 내부 에러 통보
                    if matches!(e, Error::Io(_)) {
                        if let Ok(bytes) = WireMessage::Error(ErrorReason::InternalError).encode() {
                            let _ = main_socket.send_to(&bytes, addr).await;
                        }
                    }
                }
            }
        });
    }
}

/// 요청된 바이트 범위를 패킷으로 나눠 stop-and-wait으로 송신
///
/// 범위 검증은 호출자가 이미 끝냈다. 여기서는 정확히 그 범위만 읽는다.
async fn serve_range(
    path: &Path,
    req: &DownloadRequest,
    peer: SocketAddr,
    config: Config,
    cancel: CancelFlag,
) -> Result<ChunkStats> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(req.offset))?;
    let mut data = vec![0u8; req.length as usize];
    file.read_exact(&mut data)?;

    let total_packets = ((data.len() + config.max_payload - 1) / config.max_payload) as u32;

    // 청크 전용 엔드포인트
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut channel = ReliableChannel::new(socket, peer, config.clone(), cancel);

    debug!(
        "청크 송신 시작: {} chunk={} packets={} ({})",
        req.name, req.chunk_id, total_packets, peer
    );

    for (i, slice) in data.chunks(config.max_payload).enumerate() {
        let packet = Packet::new(
            req.chunk_id,
            req.seq + i as u64,
            total_packets,
            Bytes::copy_from_slice(slice),
            config.checksum,
        );
        channel.send_and_confirm(&packet).await?;
    }

    debug!("청크 송신 완료: {} chunk={} ({})", req.name, req.chunk_id, peer);
    Ok(channel.into_stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fetch_catalog;

    async fn spawn_test_server(root: &Path, config: Config) -> (SocketAddr, CancelFlag) {
        let server = FileServer::bind("127.0.0.1:0".parse().unwrap(), root, config)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = server.cancel_flag();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        (addr, cancel)
    }

    #[tokio::test]
    async fn test_list_returns_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"aaaa").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"bbbbbbbb").unwrap();

        let config = Config::default();
        let (addr, cancel) = spawn_test_server(dir.path(), config.clone()).await;

        let catalog = fetch_catalog(addr, &config).await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a.bin").unwrap().size, 4);
        assert_eq!(catalog.get("b.bin").unwrap().size, 8);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("small.bin"), b"0123456789").unwrap();

        let config = Config::local_loopback();
        let (addr, cancel) = spawn_test_server(dir.path(), config.clone()).await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let req = WireMessage::Request(DownloadRequest {
            name: "small.bin".into(),
            offset: 8,
            length: 100, // 파일 끝을 넘는 범위
            seq: 0,
            chunk_id: 0,
        });
        socket.send_to(&req.encode().unwrap(), addr).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        assert!(matches!(
            WireMessage::decode(&buf[..len]).unwrap(),
            WireMessage::Error(ErrorReason::InvalidRange)
        ));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_serve_range_sends_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("data.bin"), &data).unwrap();

        let mut config = Config::default();
        config.max_payload = 256;
        let (addr, cancel) = spawn_test_server(dir.path(), config.clone()).await;

        // 중간 범위 하나를 직접 요청해서 수신
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut channel = ReliableChannel::new(socket, addr, config.clone(), CancelFlag::new());
        let request = WireMessage::Request(DownloadRequest {
            name: "data.bin".into(),
            offset: 100,
            length: 600,
            seq: 0,
            chunk_id: 1,
        });
        channel.send_message(&request).await.unwrap();

        let mut received = Vec::new();
        let mut seq = 0u64;
        loop {
            let packet = channel.recv_sequenced(1, seq, None).await.unwrap();
            let total = packet.header.total_packets;
            received.extend_from_slice(&packet.payload);
            seq += 1;
            if seq >= total as u64 {
                break;
            }
        }

        assert_eq!(seq, 3); // ceil(600 / 256)
        assert_eq!(received, &data[100..700]);

        cancel.cancel();
    }
}
