//! TFTP 서버
//!
//! 디렉터리 하나를 루트로 서빙. 전송마다 새 소켓을 열어 독립 태스크로 처리.
//!
//! 사용법:
//!   cargo run --release --bin tftp-server -- [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리를 6900 포트로 서빙
//!   cargo run --release --bin tftp-server
//!
//!   # 특정 디렉터리, blksize 상한 1428
//!   cargo run --release --bin tftp-server -- --dir /srv/tftp --max-blksize 1428

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tftp::{Config, Server, DEFAULT_PORT};

type BoxError = Box<dyn std::error::Error>;

/// 서버 실행 설정
struct ServerArgs {
    dir: PathBuf,
    address: IpAddr,
    port: u16,
    config: Config,
}

impl ServerArgs {
    fn defaults() -> Result<Self, BoxError> {
        Ok(Self {
            dir: std::env::current_dir()?,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            config: Config::default(),
        })
    }

    fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, BoxError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값 필요", flag).into())
}

fn parse_args() -> Result<ServerArgs, BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ServerArgs::defaults()?;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--dir" | "-d" => {
                parsed.dir = PathBuf::from(value(&args, i, flag)?);
                i += 1;
            }
            "--port" | "-p" => {
                parsed.port = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--address" | "-a" => {
                parsed.address = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--max-blksize" => {
                parsed.config.max_block_size = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--timeout-ms" => {
                parsed.config.timeout_ms = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--retransmit-ms" => {
                parsed.config.retransmit_ms = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"TFTP Server - lockstep TFTP (RFC 1350 + blksize)

사용법:
  cargo run --release --bin tftp-server -- [OPTIONS]

옵션:
  -d, --dir <DIR>          서빙 디렉터리 (기본: 현재 디렉터리)
  -p, --port <PORT>        리슨 포트 (기본: 6900)
  -a, --address <IP>       리슨 주소 (기본: 0.0.0.0)
  --max-blksize <N>        협상 가능한 최대 블록 크기 (기본: 65464)
  --timeout-ms <MS>        전송 데드라인 (기본: 20000)
  --retransmit-ms <MS>     재전송 간격 (기본: 5000)
  -h, --help               이 도움말 출력

로그 레벨은 RUST_LOG로 조정 (예: RUST_LOG=tftp=debug)
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other).into()),
        }
        i += 1;
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;

    info!("TFTP Server starting...");
    info!("Root: {:?}", args.dir);
    info!("Max blksize: {}", args.config.max_block_size);
    info!(
        "Timeout: {}ms, retransmit: {}ms",
        args.config.timeout_ms, args.config.retransmit_ms
    );

    Server::new(args.dir.clone(), args.config.clone())
        .serve(args.bind_addr())
        .await?;

    Ok(())
}
