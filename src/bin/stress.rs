//! TFTP 부하 테스트
//!
//! 동시 클라이언트 태스크 여러 개로 서버에 읽기/쓰기를 반복하고 전체 대역폭을 측정.
//!
//! 사용법:
//!   cargo run --release --bin tftp-stress -- [OPTIONS]
//!
//! 예시:
//!   # 8개 태스크가 testfile을 10번씩 읽기
//!   cargo run --release --bin tftp-stress -- --threads 8 --loops 10
//!
//!   # 1MB 업로드, blksize 1428
//!   cargo run --release --bin tftp-stress -- --upload 1048576 --blocksize 1428

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::RngCore;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tftp::{Client, Config, TransferStats, DEFAULT_BLOCK_SIZE};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 부하 테스트 설정
struct StressArgs {
    procs: usize,
    threads: usize,
    loops: usize,
    server: SocketAddr,
    file: String,
    upload: usize,
    block_size: u16,
    reuse_port: bool,
}

impl Default for StressArgs {
    fn default() -> Self {
        Self {
            procs: 1,
            threads: 1,
            loops: 1,
            server: SocketAddr::from(([127, 0, 0, 1], tftp::DEFAULT_PORT)),
            file: "testfile".to_string(),
            upload: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            reuse_port: false,
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, BoxError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값 필요", flag).into())
}

fn parse_args() -> Result<StressArgs, BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = StressArgs::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--procs" => {
                parsed.procs = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--threads" | "-t" => {
                parsed.threads = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--loops" | "-l" => {
                parsed.loops = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--serv" | "-s" => {
                parsed.server = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--file" | "-f" => {
                parsed.file = value(&args, i, flag)?.to_string();
                i += 1;
            }
            "--upload" | "-u" => {
                parsed.upload = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--blocksize" | "-b" => {
                parsed.block_size = value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--reuseport" => {
                parsed.reuse_port = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"TFTP Stress - 동시 전송 부하 테스트

사용법:
  cargo run --release --bin tftp-stress -- [OPTIONS]

옵션:
  --procs <N>             런타임 워커 스레드 수 (기본: 1)
  -t, --threads <N>       동시 클라이언트 태스크 수 (기본: 1)
  -l, --loops <N>         태스크당 전송 횟수 (기본: 1)
  -s, --serv <ADDR>       서버 주소 (기본: 127.0.0.1:6900)
  -f, --file <NAME>       읽기 테스트 파일 이름 (기본: testfile)
  -u, --upload <BYTES>    0보다 크면 이 크기의 랜덤 데이터로 쓰기 테스트
  -b, --blocksize <N>     요청할 blksize (기본: 512, 옵션 없음)
  --reuseport             클라이언트 소켓에 SO_REUSEPORT 설정
  -h, --help              이 도움말 출력
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

/// 전체 결과 집계
#[derive(Default)]
struct Totals {
    bytes: u64,
    transfers: u64,
    retransmits: u64,
    failures: u64,
    /// 첫 다운로드의 CRC32 (이후 다운로드와 비교)
    reference_crc: Option<u32>,
    crc_mismatches: u64,
}

impl Totals {
    fn record(&mut self, stats: &TransferStats) {
        self.bytes += stats.total_bytes;
        self.transfers += 1;
        self.retransmits += stats.retransmits;
    }

    fn check_crc(&mut self, crc: u32) -> bool {
        match self.reference_crc {
            None => {
                self.reference_crc = Some(crc);
                true
            }
            Some(reference) if reference == crc => true,
            Some(_) => {
                self.crc_mismatches += 1;
                false
            }
        }
    }
}

async fn bench_reads(client: Client, file: String, loops: usize, totals: Arc<Mutex<Totals>>) {
    for _ in 0..loops {
        match client.get_bytes(&file).await {
            Ok((data, stats)) => {
                let crc = crc32fast::hash(&data);
                let mut totals = totals.lock();
                totals.record(&stats);
                if !totals.check_crc(crc) {
                    warn!("CRC 불일치: {} ({} bytes, crc={:08x})", file, data.len(), crc);
                }
            }
            Err(e) => {
                warn!("읽기 실패 {}: {}", file, e);
                totals.lock().failures += 1;
            }
        }
    }
}

async fn bench_writes(
    client: Client,
    task: usize,
    loops: usize,
    payload: Arc<Vec<u8>>,
    totals: Arc<Mutex<Totals>>,
) {
    for j in 0..loops {
        let name = format!("file{}-{}", task, j);
        match client.put_bytes(&name, &payload).await {
            Ok(stats) => totals.lock().record(&stats),
            Err(e) => {
                warn!("쓰기 실패 {}: {}", name, e);
                totals.lock().failures += 1;
            }
        }
    }
}

async fn run(args: StressArgs) -> Result<(), BoxError> {
    let mut config = Config::new().with_block_size(args.block_size);
    config.reuse_port = args.reuse_port;
    let client = Client::new(args.server, config);

    println!("File: '{}'", args.file);
    println!("Server: '{}'", args.server);

    let totals = Arc::new(Mutex::new(Totals::default()));
    let payload = if args.upload > 0 {
        let mut data = vec![0u8; args.upload];
        rand::thread_rng().fill_bytes(&mut data);
        Some(Arc::new(data))
    } else {
        None
    };

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(args.threads);
    for task in 0..args.threads {
        let client = client.clone();
        let totals = totals.clone();
        tasks.push(match &payload {
            Some(payload) => tokio::spawn(bench_writes(
                client,
                task,
                args.loops,
                payload.clone(),
                totals,
            )),
            None => tokio::spawn(bench_reads(client, args.file.clone(), args.loops, totals)),
        });
    }

    for task in tasks {
        task.await?;
    }
    let took = start.elapsed();

    let totals = totals.lock();
    println!("Total Transferred: {}", totals.bytes);
    println!(
        "Overall Bandwidth: {:.0} Bps",
        totals.bytes as f64 / took.as_secs_f64().max(f64::EPSILON)
    );
    println!("Transfers: {} ok, {} failed", totals.transfers, totals.failures);
    println!("Retransmits: {}", totals.retransmits);
    if let Some(crc) = totals.reference_crc {
        println!("CRC32: {:08x} ({} mismatches)", crc, totals.crc_mismatches);
    }
    info!("Stress run finished in {:.2}s", took.as_secs_f64());

    Ok(())
}

fn main() -> Result<(), BoxError> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;

    // --procs = 런타임 워커 스레드 수
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.procs.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(run(args))
}
