//! SAWFTP 클라이언트 (송신자)
//!
//! 파일을 MSS 단위로 잘라 여러 서버에 stop-and-wait로 전송
//!
//! 사용법:
//!   cargo run --release --bin sawftp-client -- [OPTIONS]
//!
//! 예시:
//!   # 두 서버 (7735, 7736 포트)로 전송
//!   cargo run --release --bin sawftp-client -- -s host1 -s host2 -p 7735 -f data.bin --mss 1000

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use sawftp::{run_transfer, Error, SenderConfig, DEFAULT_PORT};

const HELP: &str = r#"SAWFTP Client - Stop-And-Wait File Transfer 송신자

사용법:
  cargo run --release --bin sawftp-client -- [OPTIONS]

옵션:
  -s, --server <HOST>      서버 호스트 (여러 번 지정 가능, n번째는 port + n 포트)
  -p, --port <PORT>        서버 기본 포트 (기본: 7735)
  -d, --dest <ADDR>        host:port 형식의 목적지 직접 지정 (여러 번 가능)
  -f, --file <PATH>        전송할 파일 경로
  --mss <BYTES>            최대 세그먼트 크기 (기본: 1024)
  --timeout-ms <MS>        ACK 대기 타임아웃 (기본: 1000)
  --deadline-secs <SECS>   전체 전송 기한 (기본: 없음)
  --unstable               불안정한 네트워크용 설정 (MSS 512, 타임아웃 3초)
                           이후에 오는 옵션이 우선함
  -h, --help               이 도움말 출력
"#;

/// 클라이언트 설정
struct ClientConfig {
    servers: Vec<String>,
    port: u16,
    file_path: Option<PathBuf>,
    config: SenderConfig,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, Error> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidConfig(format!("{} 값 필요", flag)))
}

fn number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, Error> {
    raw.parse()
        .map_err(|_| Error::InvalidConfig(format!("{}: 유효한 숫자 필요 ({})", flag, raw)))
}

fn parse_args() -> Result<ClientConfig, Error> {
    let args: Vec<String> = std::env::args().collect();
    let mut client = ClientConfig {
        servers: Vec::new(),
        port: DEFAULT_PORT,
        file_path: None,
        config: SenderConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--server" | "-s" => {
                client.servers.push(value(&args, i, flag)?.to_string());
                i += 1;
            }
            "--port" | "-p" => {
                client.port = number(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--dest" | "-d" => {
                client
                    .config
                    .destinations
                    .push(value(&args, i, flag)?.to_string());
                i += 1;
            }
            "--file" | "-f" => {
                client.file_path = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--mss" => {
                client.config.mss = number(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--timeout-ms" => {
                let ms: u64 = number(value(&args, i, flag)?, flag)?;
                client.config.ack_timeout = Duration::from_millis(ms);
                i += 1;
            }
            "--deadline-secs" => {
                let secs: u64 = number(value(&args, i, flag)?, flag)?;
                client.config.deadline = Some(Duration::from_secs(secs));
                i += 1;
            }
            "--unstable" => {
                let destinations = std::mem::take(&mut client.config.destinations);
                client.config = SenderConfig::unstable_network(destinations);
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

    if !client.servers.is_empty() {
        let from_hosts = SenderConfig::from_hosts(client.servers.as_slice(), client.port)?;
        client.config.destinations.extend(from_hosts.destinations);
    }

    Ok(client)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let client = parse_args()?;
    let file_path = client
        .file_path
        .ok_or_else(|| Error::InvalidConfig("--file 필요".into()))?;
    let config = client.config;
    config.validate()?;

    info!("SAWFTP Client starting...");
    info!("Destinations: {:?}", config.destinations);
    info!("MSS: {} bytes", config.mss);
    info!("ACK timeout: {:?}", config.ack_timeout);

    let report = run_transfer(&config, &file_path).await?;

    for dest in &report.completed {
        info!(
            "  [{}] {}: {} 세그먼트, 재전송 {}, 타임아웃 {}",
            dest.id,
            dest.peer,
            dest.stats.segments_acked,
            dest.stats.retransmissions,
            dest.stats.timeouts
        );
    }
    info!("{}", report.summary());

    Ok(())
}
