//! 파일 카탈로그
//!
//! 파일 이름 → (크기, 전체 체크섬) 스냅샷. 전송 요청마다 한 번 읽고,
//! 이후에는 불변으로 취급한다. 전역 상태는 두지 않는다.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::checksum::ChecksumKind;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::WireMessage;

/// 파일 기술자
///
/// 카탈로그 항목이자 전송 한 건의 메타데이터. 와이어 인코딩에 그대로 쓰인다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// 파일 이름
    pub name: String,

    /// 크기 (바이트)
    pub size: u64,

    /// 파일 전체 체크섬 (hex, 없을 수 있음)
    pub checksum: Option<String>,
}

/// 읽기 전용 카탈로그 스냅샷
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<String, FileDescriptor>,
}

impl Catalog {
    /// 항목 목록으로 카탈로그 구성
    pub fn from_entries(entries: Vec<FileDescriptor>) -> Self {
        Self {
            entries: entries.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// 디렉터리를 스캔해서 카탈로그 구성 (서버측)
    ///
    /// 하위 디렉터리는 건너뛴다. 파일마다 전체 체크섬을 스트리밍으로 계산한다.
    pub fn scan_dir(dir: &Path, checksum: ChecksumKind) -> Result<Self> {
        let mut entries = HashMap::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => {
                    warn!("UTF-8이 아닌 파일명 건너뜀: {:?}", entry.path());
                    continue;
                }
            };

            let size = entry.metadata()?.len();
            let digest = checksum.digest_file(&entry.path())?;
            debug!("카탈로그 등록: {} ({} bytes)", name, size);

            entries.insert(
                name.clone(),
                FileDescriptor {
                    name,
                    size,
                    checksum: Some(digest),
                },
            );
        }

        Ok(Self { entries })
    }

    /// 이름으로 항목 조회
    pub fn get(&self, name: &str) -> Option<&FileDescriptor> {
        self.entries.get(name)
    }

    /// 항목 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 이름순 정렬된 항목 목록 (와이어 전송용)
    pub fn to_entries(&self) -> Vec<FileDescriptor> {
        let mut list: Vec<_> = self.entries.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// 서버에서 카탈로그 가져오기 (List/Catalog 교환)
///
/// 응답이 올 때까지 한정된 횟수로 재요청한다.
pub async fn fetch_catalog(server_addr: SocketAddr, config: &Config) -> Result<Catalog> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let request = WireMessage::List.encode()?;
    let mut buf = vec![0u8; config.recv_buffer_size];

    for attempt in 0..config.catalog_max_retries {
        socket.send_to(&request, server_addr).await?;
        if attempt > 0 {
            debug!("카탈로그 재요청 ({}/{})", attempt, config.catalog_max_retries);
        }

        match timeout(
            Duration::from_millis(config.catalog_retry_ms),
            socket.recv_from(&mut buf),
        )
        .await
        {
            Ok(Ok((len, _))) => match WireMessage::decode(&buf[..len]) {
                Ok(WireMessage::Catalog(entries)) => {
                    info!("카탈로그 수신: {}개 파일", entries.len());
                    return Ok(Catalog::from_entries(entries));
                }
                Ok(_) => {
                    // 목록 응답이 아닌 메시지는 무시
                }
                Err(e) => debug!("카탈로그 응답 파싱 실패: {}", e),
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                // 타임아웃, 재요청
            }
        }
    }

    Err(Error::CatalogUnavailable {
        attempts: config.catalog_max_retries,
    })
}
