//! 루프백 전송 데모 (서버 + 클라이언트 한 프로세스)
//!
//! 테스트 파일을 만들고 같은 프로세스에서 서버를 띄운 뒤,
//! 조정자로 내려받아 바이트 단위로 검증한다.
//!
//! 사용법:
//!   cargo run --release --example loopback_transfer -- [OPTIONS]
//!
//! 옵션:
//!   --size <MB>       테스트 파일 크기 (기본: 4)
//!   --chunks <N>      청크 수 (기본: 4)
//!   --payload <B>     패킷 페이로드 (기본: 1400)

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cft::{fetch_catalog, Config, FileServer, TransferCoordinator};

/// 테스트용 텍스트 데이터 생성
fn generate_test_text(size_mb: usize) -> Vec<u8> {
    let target_size = size_mb * 1024 * 1024;
    let mut data = Vec::with_capacity(target_size);

    let patterns = [
        "The quick brown fox jumps over the lazy dog. ",
        "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ",
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ",
        "가나다라마바사아자차카타파하 ",
        "Hello, World! This is CFT protocol test data. ",
    ];

    let mut line_num = 0u64;
    while data.len() < target_size {
        let line = format!(
            "[{:08}] {}\n",
            line_num,
            patterns[line_num as usize % patterns.len()]
        );
        data.extend_from_slice(line.as_bytes());
        line_num += 1;
    }

    data.truncate(target_size);
    data
}

fn parse_flag(args: &[String], flag: &str) -> Option<usize> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    let size_mb = parse_flag(&args, "--size").unwrap_or(4);
    let chunks = parse_flag(&args, "--chunks").unwrap_or(4) as u32;
    let payload = parse_flag(&args, "--payload").unwrap_or(1400);

    let mut config = Config::default();
    config.chunk_count = chunks;
    config.max_payload = payload;

    info!("Loopback transfer demo");
    info!("  File size: {} MB", size_mb);
    info!("  Chunks: {}", chunks);
    info!("  Payload: {} bytes", payload);

    // 서버측 파일 준비
    let server_dir = tempfile::tempdir()?;
    let client_dir = tempfile::tempdir()?;
    let data = generate_test_text(size_mb);
    std::fs::write(server_dir.path().join("demo.bin"), &data)?;

    // 서버 기동
    let server = FileServer::bind("127.0.0.1:0".parse()?, server_dir.path(), config.clone()).await?;
    let server_addr = server.local_addr()?;
    let server_cancel = server.cancel_flag();
    let server_task = tokio::spawn(async move {
        let _ = server.run().await;
    });

    // 카탈로그 조회 후 전송
    let catalog = fetch_catalog(server_addr, &config).await?;
    let descriptor = catalog
        .get("demo.bin")
        .expect("카탈로그에 demo.bin이 있어야 함")
        .clone();

    let coordinator = TransferCoordinator::new(server_addr, client_dir.path(), config)?;
    let outcome = coordinator.transfer(&descriptor).await;

    if !outcome.success {
        if let Some(e) = &outcome.error {
            eprintln!("전송 실패: {e} (chunks {:?})", outcome.failed_chunks);
        }
        std::process::exit(1);
    }

    // 바이트 단위 검증
    let received = std::fs::read(client_dir.path().join("demo.bin"))?;
    assert_eq!(received.len(), data.len(), "크기 불일치");
    assert_eq!(received, data, "내용 불일치");

    info!("Transfer verified!");
    info!("  {}", outcome.stats.summary());

    server_cancel.cancel();
    let _ = server_task.await;
    Ok(())
}
