//! 청크 전송 (요청자측)
//!
//! 청크 하나 = 신뢰 채널 하나 = UDP 엔드포인트 하나.
//! 시퀀스 0..total-1을 순서대로 수신해 버퍼에 이어붙이고, 마지막 패킷이
//! 확인된 뒤에만 임시 파일에 기록한다. 실패하면 부분 데이터는 버린다.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use crate::channel::{CancelFlag, ReliableChannel};
use crate::chunk::{ChunkPlan, ChunkResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{DownloadRequest, ErrorReason, WireMessage};
use crate::stats::ChunkStats;

/// 청크 임시 파일 경로 (`(파일명, 청크 ID)`로 결정적)
pub fn part_path(output_dir: &Path, name: &str, chunk_id: u32) -> PathBuf {
    output_dir.join(format!("{name}.part{chunk_id}"))
}

/// 청크 하나의 전송 드라이버
pub struct ChunkTransfer {
    name: String,
    file_size: u64,
    plan: ChunkPlan,
    server_addr: SocketAddr,
    output_dir: PathBuf,
    config: Config,
    cancel: CancelFlag,
}

impl ChunkTransfer {
    pub fn new(
        name: String,
        file_size: u64,
        plan: ChunkPlan,
        server_addr: SocketAddr,
        output_dir: PathBuf,
        config: Config,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            name,
            file_size,
            plan,
            server_addr,
            output_dir,
            config,
            cancel,
        }
    }

    /// 청크 ID
    pub fn chunk_id(&self) -> u32 {
        self.plan.chunk_id
    }

    /// 청크를 내려받아 임시 파일에 기록
    ///
    /// 어떤 경로로 실패하든 부분 데이터는 남기지 않는다.
    pub async fn fetch(&self) -> Result<(ChunkResult, ChunkStats)> {
        let path = part_path(&self.output_dir, &self.name, self.plan.chunk_id);

        match self.fetch_inner(&path).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if path.exists() {
                    let _ = std::fs::remove_file(&path);
                }
                Err(e)
            }
        }
    }

    async fn fetch_inner(&self, path: &Path) -> Result<(ChunkResult, ChunkStats)> {
        // 빈 청크는 네트워크 왕복 없이 즉시 완료
        if self.plan.length == 0 {
            std::fs::write(path, b"")?;
            return Ok((
                ChunkResult {
                    chunk_id: self.plan.chunk_id,
                    data: Bytes::new(),
                    verified: true,
                },
                ChunkStats::default(),
            ));
        }

        let mut channel =
            ReliableChannel::connect(self.server_addr, self.config.clone(), self.cancel.clone())
                .await?;

        let request = WireMessage::Request(DownloadRequest {
            name: self.name.clone(),
            offset: self.plan.offset,
            length: self.plan.length,
            seq: 0,
            chunk_id: self.plan.chunk_id,
        });
        channel.send_message(&request).await?;
        debug!(
            "청크 요청 전송: {} chunk={} offset={} length={}",
            self.name, self.plan.chunk_id, self.plan.offset, self.plan.length
        );

        let mut buffer = BytesMut::with_capacity(self.plan.length as usize);
        let mut total_packets: Option<u32> = None;
        let mut seq = 0u64;

        loop {
            // 첫 패킷이 오기 전에는 타임아웃마다 요청을 재전송한다 (멱등)
            let prod = if total_packets.is_none() {
                Some(&request)
            } else {
                None
            };

            let packet = self
                .recv_next(&mut channel, seq, prod)
                .await?;

            if packet.header.total_packets == 0
                || packet.header.total_packets as u64 > self.plan.length
            {
                return Err(Error::MalformedPacket {
                    reason: format!("유효하지 않은 총 패킷 수: {}", packet.header.total_packets),
                });
            }

            match total_packets {
                None => total_packets = Some(packet.header.total_packets),
                Some(t) if t != packet.header.total_packets => {
                    return Err(Error::MalformedPacket {
                        reason: format!("총 패킷 수 변동: {} → {}", t, packet.header.total_packets),
                    });
                }
                Some(_) => {}
            }

            if buffer.len() + packet.payload.len() > self.plan.length as usize {
                return Err(Error::MalformedPacket {
                    reason: "선언된 청크 길이 초과".into(),
                });
            }
            buffer.extend_from_slice(&packet.payload);

            seq += 1;
            if let Some(t) = total_packets {
                if seq >= t as u64 {
                    break;
                }
            }
        }

        if buffer.len() as u64 != self.plan.length {
            return Err(Error::MalformedPacket {
                reason: format!(
                    "수신 길이 불일치: expected {}, got {}",
                    self.plan.length,
                    buffer.len()
                ),
            });
        }

        // 마지막 패킷까지 확인된 뒤에만 기록한다
        std::fs::write(path, &buffer)?;
        info!(
            "청크 완료: {} chunk={} ({} bytes, {} packets)",
            self.name,
            self.plan.chunk_id,
            buffer.len(),
            seq
        );

        Ok((
            ChunkResult {
                chunk_id: self.plan.chunk_id,
                data: buffer.freeze(),
                verified: true,
            },
            channel.into_stats(),
        ))
    }

    async fn recv_next(
        &self,
        channel: &mut ReliableChannel,
        seq: u64,
        prod: Option<&WireMessage>,
    ) -> Result<crate::packet::Packet> {
        channel
            .recv_sequenced(self.plan.chunk_id, seq, prod)
            .await
            .map_err(|e| self.map_remote(e))
    }

    /// 응답자의 에러 통보를 문맥 있는 에러로 변환
    fn map_remote(&self, e: Error) -> Error {
        match e {
            Error::RemoteFault {
                reason: ErrorReason::FileNotFound,
            } => Error::FileNotFound {
                name: self.name.clone(),
            },
            Error::RemoteFault {
                reason: ErrorReason::InvalidRange,
            } => Error::InvalidRange {
                offset: self.plan.offset,
                length: self.plan.length,
                size: self.file_size,
            },
            other => other,
        }
    }
}
