//! 전송 조정자
//!
//! 파일 하나의 다운로드 전체를 지휘한다:
//! 분할 → 청크별 병렬 전송 → 전부 완료 대기 → 오프셋 순 조립 →
//! 파일 전체 체크섬 검증 → 원자적 이름 교체.
//!
//! 청크 진행 상황은 공유 맵이 아니라 완료 채널의 종결 메시지로만 전달된다.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::catalog::FileDescriptor;
use crate::channel::CancelFlag;
use crate::chunk::{partition, ChunkPlan};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::stats::{ChunkStats, TransferStats};
use crate::transfer::{part_path, ChunkTransfer};

/// 전송 한 건의 결과
///
/// 실패한 청크 ID 목록과 최초의 치명적 에러를 함께 보고한다.
#[derive(Debug)]
pub struct TransferOutcome {
    /// 전체 성공 여부
    pub success: bool,

    /// 실패한 청크 ID (오름차순)
    pub failed_chunks: Vec<u32>,

    /// 최초의 치명적 에러
    pub error: Option<Error>,

    /// 병합된 전송 통계
    pub stats: TransferStats,
}

/// 청크 태스크의 종결 보고
struct ChunkOutcome {
    chunk_id: u32,
    result: Result<ChunkStats>,
}

/// 전송 조정자
pub struct TransferCoordinator {
    server_addr: SocketAddr,
    output_dir: PathBuf,
    config: Config,
    cancel: CancelFlag,
}

impl TransferCoordinator {
    pub fn new(
        server_addr: SocketAddr,
        output_dir: impl Into<PathBuf>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            server_addr,
            output_dir: output_dir.into(),
            config,
            cancel: CancelFlag::new(),
        })
    }

    /// 취소 플래그 핸들
    ///
    /// 호출자가 신호하면 진행 중인 모든 청크가 다음 재시도/타임아웃
    /// 경계에서 중단된다.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// 파일 하나 전송
    ///
    /// 부분 성공은 없다: 청크 하나라도 실패하면 전체 실패이고 임시
    /// 파일은 모두 제거된다. 검증에 실패한 출력은 절대 남기지 않는다.
    pub async fn transfer(&self, descriptor: &FileDescriptor) -> TransferOutcome {
        let plans = partition(descriptor.size, self.config.chunk_count);
        let mut stats = TransferStats::new();

        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            return TransferOutcome {
                success: false,
                failed_chunks: Vec::new(),
                error: Some(e.into()),
                stats,
            };
        }

        info!(
            "전송 시작: {} ({} bytes, {} chunks)",
            descriptor.name,
            descriptor.size,
            plans.len()
        );

        let (tx, mut rx) = mpsc::channel::<ChunkOutcome>(plans.len());

        for plan in &plans {
            let transfer = ChunkTransfer::new(
                descriptor.name.clone(),
                descriptor.size,
                *plan,
                self.server_addr,
                self.output_dir.clone(),
                self.config.clone(),
                self.cancel.clone(),
            );
            let chunk_id = plan.chunk_id;
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = transfer.fetch().await.map(|(_, stats)| stats);
                let _ = tx.send(ChunkOutcome { chunk_id, result }).await;
            });
        }
        drop(tx);

        let mut failed: Vec<u32> = Vec::new();
        let mut first_error: Option<Error> = None;

        while let Some(outcome) = rx.recv().await {
            match outcome.result {
                Ok(chunk_stats) => {
                    stats.merge_chunk(&chunk_stats);
                    stats.chunks_completed += 1;
                    debug!("청크 보고 수신: {} (성공)", outcome.chunk_id);
                }
                Err(e) => {
                    warn!("청크 실패: {} — {}", outcome.chunk_id, e);
                    failed.push(outcome.chunk_id);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        failed.sort_unstable();
        stats.chunks_failed = failed.len() as u64;

        if self.cancel.is_cancelled() && first_error.is_none() {
            first_error = Some(Error::Cancelled);
        }

        if !failed.is_empty() || first_error.is_some() {
            self.cleanup_temp(&descriptor.name, &plans);
            return TransferOutcome {
                success: false,
                failed_chunks: failed,
                error: first_error,
                stats,
            };
        }

        match self.assemble(descriptor, &plans) {
            Ok(()) => {
                info!("전송 완료: {} — {}", descriptor.name, stats.summary());
                TransferOutcome {
                    success: true,
                    failed_chunks: Vec::new(),
                    error: None,
                    stats,
                }
            }
            Err(e) => {
                warn!("조립/검증 실패: {} — {}", descriptor.name, e);
                self.cleanup_temp(&descriptor.name, &plans);
                TransferOutcome {
                    success: false,
                    failed_chunks: Vec::new(),
                    error: Some(e),
                    stats,
                }
            }
        }
    }

    /// 청크 임시 파일을 오프셋 순서로 이어붙이고, 검증 후 최종 이름으로 교체
    ///
    /// 기존 출력 파일은 검증이 끝난 rename 시점 전까지 건드리지 않는다.
    fn assemble(&self, descriptor: &FileDescriptor, plans: &[ChunkPlan]) -> Result<()> {
        let partial = self.output_dir.join(format!("{}.partial", descriptor.name));
        let final_path = self.output_dir.join(&descriptor.name);

        {
            let mut out = std::fs::File::create(&partial)?;
            for plan in plans {
                let part = part_path(&self.output_dir, &descriptor.name, plan.chunk_id);
                let mut input = std::fs::File::open(&part)?;
                std::io::copy(&mut input, &mut out)?;
                std::fs::remove_file(&part)?;
            }
            out.sync_all()?;
        }

        let actual = self.config.checksum.digest_file(&partial)?;
        if let Some(expected) = &descriptor.checksum {
            if &actual != expected {
                // 손상된 출력을 남기지 않는다
                let _ = std::fs::remove_file(&partial);
                return Err(Error::IntegrityFailure {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        debug!("파일 체크섬 확인: {} = {}", descriptor.name, actual);

        std::fs::rename(&partial, &final_path)?;
        Ok(())
    }

    /// 임시 파일 정리 (실패/취소 경로)
    fn cleanup_temp(&self, name: &str, plans: &[ChunkPlan]) {
        for plan in plans {
            let part = part_path(&self.output_dir, name, plan.chunk_id);
            if part.exists() {
                let _ = std::fs::remove_file(&part);
            }
        }
        let partial = self.output_dir.join(format!("{name}.partial"));
        if partial.exists() {
            let _ = std::fs::remove_file(&partial);
        }
    }
}
