//! CFT 서버 (응답자) - Chunked File Transfer
//!
//! stop-and-wait ACK 기반 청크 병렬 다운로드 프로토콜 서버
//! - 디렉터리를 스캔해 파일 카탈로그(이름/크기/체크섬) 제공
//! - 청크 요청마다 전용 엔드포인트로 stop-and-wait 송신
//!
//! 사용법:
//!   cargo run --release --bin cft-server -- [OPTIONS]
//!
//! 예시:
//!   # files/ 디렉터리 서비스
//!   cargo run --release --bin cft-server -- --bind 0.0.0.0:9000 --dir files
//!
//!   # 작은 패킷 + 넉넉한 재시도 (불안정 네트워크)
//!   cargo run --release --bin cft-server -- -d files --payload 1000 --retries 30

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cft::{ChecksumKind, Config, FileServer};

/// 서버 설정
struct ServerArgs {
    bind_addr: SocketAddr,
    dir: PathBuf,
    config: Config,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().unwrap(),
            dir: PathBuf::from("files"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    parsed.dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--payload" => {
                if i + 1 < args.len() {
                    parsed.config.max_payload = args[i + 1].parse().expect("유효한 숫자 필요");
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
                    r#"CFT Server - Chunked File Transfer 서버

stop-and-wait ACK 기반 청크 병렬 다운로드 프로토콜 서버
- 디렉터리 스캔 후 파일 카탈로그 제공
- 청크 요청마다 전용 엔드포인트로 송신

사용법:
  cargo run --release --bin cft-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>     바인드 주소 (기본: 0.0.0.0:9000)
  -d, --dir <PATH>      서비스할 파일 디렉터리 (기본: files)
  --payload <BYTES>     패킷 최대 페이로드 (기본: 1400)
  --retries <N>         패킷당 재시도 한도 (기본: 15)
  --timeout-ms <MS>     ACK/패킷 대기 타임아웃 (기본: 2000)
  --crc32               체크섬을 CRC32 degraded 모드로 (기본: SHA-256)
  -h, --help            이 도움말 출력

예시:
  # 기본 실행
  cargo run --release --bin cft-server -- --dir files

  # 불안정 네트워크용
  cargo run --release --bin cft-server -- -d files --payload 1000 --retries 30
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

    info!("CFT Server starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Serving dir: {:?}", args.dir);
    info!("Max payload: {} bytes", args.config.max_payload);
    info!("Max retries: {}", args.config.max_retries);

    if !args.dir.exists() {
        std::fs::create_dir_all(&args.dir)?;
        info!("디렉터리 생성: {:?}", args.dir);
    }

    let server = FileServer::bind(args.bind_addr, &args.dir, args.config).await?;

    for desc in server.catalog().to_entries() {
        info!("  {} ({} bytes)", desc.name, desc.size);
    }

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("종료 신호 수신");
            server.cancel_flag().cancel();
            info!("Server stats: {}", server.stats().summary());
        }
    }

    Ok(())
}
