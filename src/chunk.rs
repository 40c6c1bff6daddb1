//! 청크 계획과 결과
//!
//! 청크는 파일의 연속된 바이트 범위이자 신뢰 전송의 단위다.
//! 범위는 겹치지 않고, 길이 합은 파일 크기와 정확히 일치한다.

use bytes::Bytes;

/// 청크 ID (파일 내 인덱스, 0부터)
pub type ChunkId = u32;

/// 청크 계획 (분할 후 불변)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// 청크 ID
    pub chunk_id: ChunkId,

    /// 파일 내 시작 오프셋
    pub offset: u64,

    /// 바이트 길이
    pub length: u64,
}

/// 파일 크기를 `chunk_count`개의 연속 범위로 분할
///
/// 균등 분할 후 나머지는 마지막 청크가 흡수한다.
/// `chunk_count`가 0이면 1로 취급한다.
pub fn partition(size: u64, chunk_count: u32) -> Vec<ChunkPlan> {
    let count = chunk_count.max(1);
    let base = size / count as u64;
    let remainder = size % count as u64;

    (0..count)
        .map(|i| {
            let length = if i == count - 1 { base + remainder } else { base };
            ChunkPlan {
                chunk_id: i,
                offset: i as u64 * base,
                length,
            }
        })
        .collect()
}

/// 완성된 청크
///
/// 마지막 패킷까지 확인된 뒤에만 생성되고, 이후 변경되지 않는다.
/// 조립 단계에서 정확히 한 번 소비된다.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    /// 청크 ID
    pub chunk_id: ChunkId,

    /// 조립된 바이트
    pub data: Bytes,

    /// 패킷별 체크섬 검증 통과 여부
    pub verified: bool,
}
