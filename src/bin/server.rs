//! SAWFTP 서버 (수신자)
//!
//! 연결마다 세션을 띄워 수신 프레임을 검증하고 파일에 기록
//! 손실 확률을 주면 해당 비율로 프레임을 ACK 없이 버림
//!
//! 사용법:
//!   cargo run --release --bin sawftp-server -- [OPTIONS]
//!
//! 예시:
//!   # 7735 포트, 10% 손실 시뮬레이션
//!   cargo run --release --bin sawftp-server -- -p 7735 -o received.bin --loss 0.1

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use sawftp::{Error, Receiver, ReceiverConfig, DEFAULT_PORT};

const HELP: &str = r#"SAWFTP Server - Stop-And-Wait File Transfer 수신자

사용법:
  cargo run --release --bin sawftp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:7735)
  -p, --port <PORT>        바인드 포트 (0.0.0.0:<PORT>)
  -o, --output <PATH>      수신 파일 경로 (기본: received.bin)
  -l, --loss <P>           손실 시뮬레이션 확률, 0 < P <= 1 (기본: 0 = 비활성)
  --seed <N>               손실 시뮬레이션 시드
  -h, --help               이 도움말 출력
"#;

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, Error> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidConfig(format!("{} 값 필요", flag)))
}

fn parse_args() -> Result<ReceiverConfig, Error> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ReceiverConfig::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bind" | "-b" => {
                let raw = value(&args, i, flag)?;
                config.listen_addr = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("유효한 주소 필요: {}", raw)))?;
                i += 1;
            }
            "--port" | "-p" => {
                let raw = value(&args, i, flag)?;
                let port: u16 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("유효한 포트 필요: {}", raw)))?;
                config.listen_addr = SocketAddr::from(([0, 0, 0, 0], port));
                i += 1;
            }
            "--output" | "-o" => {
                config.output_path = PathBuf::from(value(&args, i, flag)?);
                i += 1;
            }
            "--loss" | "-l" => {
                let raw = value(&args, i, flag)?;
                config.loss_probability = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("유효한 확률 필요: {}", raw)))?;
                i += 1;
            }
            "--seed" => {
                let raw = value(&args, i, flag)?;
                config.seed = Some(
                    raw.parse()
                        .map_err(|_| Error::InvalidConfig(format!("유효한 숫자 필요: {}", raw)))?,
                );
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", HELP);
                std::process::exit(0);
            }
            other => {
                return Err(Error::InvalidConfig(format!("알 수 없는 옵션: {}", other)));
            }
        }
        i += 1;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args()?;

    info!("SAWFTP Server starting...");
    info!("Bind address: {}", config.listen_addr);
    info!("Output: {:?}", config.output_path);
    info!("Loss probability: {:.2}", config.loss_probability);

    let (receiver, mut reports) = Receiver::bind(config).await?;

    // 세션 리포트 소비 (채널이 가득 차지 않도록)
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            info!(
                "세션 {} ({}) -> {:?}: 완료={}, 세그먼트 {}, 폐기 {} ({:.1}%)",
                report.session_id,
                report.peer,
                report.output_path,
                report.is_complete(),
                report.stats.segments_written(),
                report.stats.frames_dropped,
                report.stats.drop_rate() * 100.0
            );
        }
    });

    receiver
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("SAWFTP Server stopped");
    Ok(())
}
