//! CFT 클라이언트 (요청자) - Chunked File Transfer
//!
//! stop-and-wait ACK 기반 청크 병렬 다운로드 프로토콜 클라이언트
//! - 입력 목록의 파일을 서버 카탈로그와 대조 후 내려받음
//! - 청크마다 전용 UDP 엔드포인트로 병렬 수신
//! - 패킷별 체크섬 + 파일 전체 체크섬 검증
//!
//! 사용법:
//!   cargo run --release --bin cft-client -- [OPTIONS]
//!
//! 예시:
//!   # input.txt 목록의 파일 내려받기
//!   cargo run --release --bin cft-client -- --server 127.0.0.1:9000 --output downloads
//!
//!   # 청크 8개로 병렬화
//!   cargo run --release --bin cft-client -- -s 192.168.1.100:9000 --chunks 8

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cft::{fetch_catalog, ChecksumKind, Config, TransferCoordinator};

/// 클라이언트 설정
struct ClientArgs {
    server_addr: SocketAddr,
    input: PathBuf,
    output_dir: PathBuf,
    config: Config,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9000".parse().unwrap(),
            input: PathBuf::from("input.txt"),
            output_dir: PathBuf::from("downloads"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--input" | "-i" => {
                if i + 1 < args.len() {
                    parsed.input = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--chunks" => {
                if i + 1 < args.len() {
                    parsed.config.chunk_count = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    parsed.config.max_retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--timeout-ms" => {
                if i + 1 < args.len() {
                    let ms: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.config.ack_timeout_ms = ms;
                    parsed.config.recv_timeout_ms = ms;
                    i += 1;
                }
            }
            "--crc32" => {
                parsed.config.checksum = ChecksumKind::Crc32;
            }
            "--help" | "-h" => {
                println!(
                    r#"CFT Client - Chunked File Transfer 클라이언트

stop-and-wait ACK 기반 청크 병렬 다운로드 프로토콜 클라이언트
- 입력 목록의 파일을 카탈로그와 대조 후 내려받음
- 청크마다 전용 UDP 엔드포인트로 병렬 수신

사용법:
  cargo run --release --bin cft-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>   서버 주소 (기본: 127.0.0.1:9000)
  -i, --input <PATH>    파일 이름 목록, 한 줄에 하나 (기본: input.txt)
  -o, --output <PATH>   저장 디렉터리 (기본: downloads)
  --chunks <N>          청크 수 = 병렬도 (기본: 4)
  --retries <N>         패킷당 재시도 한도 (기본: 15)
  --timeout-ms <MS>     ACK/패킷 대기 타임아웃 (기본: 2000)
  --crc32               체크섬을 CRC32 degraded 모드로 (기본: SHA-256)
  -h, --help            이 도움말 출력

예시:
  # 기본 실행
  cargo run --release --bin cft-client -- --server 127.0.0.1:9000

  # 청크 8개 + 긴 타임아웃
  cargo run --release --bin cft-client -- -s 10.0.0.5:9000 --chunks 8 --timeout-ms 5000
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    info!("CFT Client starting...");
    info!("Server address: {}", args.server_addr);
    info!("Output dir: {:?}", args.output_dir);
    info!("Chunks: {}", args.config.chunk_count);

    // 내려받을 파일 목록
    let names: Vec<String> = match std::fs::read_to_string(&args.input) {
        Ok(content) => content
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        Err(_) => {
            warn!("입력 파일 없음: {:?}", args.input);
            Vec::new()
        }
    };

    if names.is_empty() {
        warn!("내려받을 파일이 없습니다");
        return Ok(());
    }

    // 카탈로그는 전송 요청마다 한 번만 읽는다
    let catalog = fetch_catalog(args.server_addr, &args.config).await?;
    info!("카탈로그: {}개 파일", catalog.len());

    let coordinator =
        TransferCoordinator::new(args.server_addr, &args.output_dir, args.config.clone())?;

    let mut failed = 0usize;
    for name in &names {
        let Some(descriptor) = catalog.get(name) else {
            warn!("서버에 없는 파일: {}", name);
            failed += 1;
            continue;
        };

        let outcome = coordinator.transfer(descriptor).await;
        if outcome.success {
            info!("완료: {} — {}", name, outcome.stats.summary());
        } else {
            failed += 1;
            match &outcome.error {
                Some(e) => warn!(
                    "실패: {} — {} (failed chunks: {:?})",
                    name, e, outcome.failed_chunks
                ),
                None => warn!("실패: {}", name),
            }
        }
    }

    if failed > 0 {
        warn!("{}개 파일 전송 실패", failed);
        std::process::exit(1);
    }

    info!("모든 전송 완료");
    Ok(())
}
