use std::path::Path;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use clap::Parser;
use rfsb::backend::FileServerBackend;
use serde::Serialize;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(author, version, about = "RFSB 句柄缓存基准测试", long_about = None)]
struct Args {
    /// 测试文件大小（字节）
    #[arg(long, default_value = "1048576")]
    file_size: usize,

    /// 单块大小（字节）
    #[arg(long, default_value = "256")]
    chunk_size: usize,

    /// 完整读取遍数
    #[arg(short, long, default_value = "10")]
    rounds: usize,

    /// 以 JSON 输出结果
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct BenchmarkResult {
    strategy: String,
    duration_ms: f64,
    chunks: usize,
    chunks_per_sec: f64,
    mb_per_sec: f64,
}

impl BenchmarkResult {
    fn new(strategy: &str, duration: Duration, chunks: usize, bytes: usize) -> Self {
        let secs = duration.as_secs_f64();
        Self {
            strategy: strategy.to_string(),
            duration_ms: secs * 1000.0,
            chunks,
            chunks_per_sec: chunks as f64 / secs,
            mb_per_sec: (bytes as f64 / 1_048_576.0) / secs,
        }
    }

    fn print(&self) {
        println!(
            "  {:<10} {:>10.3} ms | {:>10.1} 块/s | {:>8.2} MB/s",
            self.strategy, self.duration_ms, self.chunks_per_sec, self.mb_per_sec
        );
    }
}

/// 以分块方式把文件完整读 rounds 遍，返回块数与总字节数
fn run_rounds(
    backend: &FileServerBackend,
    path: &Path,
    chunk_size: usize,
    rounds: usize,
) -> Result<(usize, usize)> {
    let mut chunks = 0;
    let mut bytes = 0;

    for _ in 0..rounds {
        let mut offset = 0u64;
        loop {
            let chunk = backend
                .read(path, offset, chunk_size)
                .map_err(|e| anyhow::anyhow!("读取失败: {} (code={})", e, e.code()))?;
            chunks += 1;
            bytes += chunk.len();
            offset += chunk.len() as u64;
            if chunk.len() < chunk_size {
                break;
            }
        }
    }

    Ok((chunks, bytes))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let dir = tempfile::tempdir().context("创建临时目录失败")?;
    let path = dir.path().join("bench.dat");
    std::fs::write(&path, vec![b'x'; args.file_size]).context("写测试文件失败")?;

    println!("🚀 RFSB 句柄缓存基准测试");
    println!(
        "  文件大小: {} 字节, 块大小: {} 字节, 轮数: {}",
        args.file_size, args.chunk_size, args.rounds
    );

    let mut results = Vec::new();

    // 缓存策略：在运行时上下文中构造后端，首次读取时选中句柄缓存
    let rt = Runtime::new().context("创建 tokio 运行时失败")?;
    {
        let _guard = rt.enter();
        let backend = FileServerBackend::new();

        let start = Instant::now();
        let (chunks, bytes) = run_rounds(&backend, &path, args.chunk_size, args.rounds)?;
        results.push(BenchmarkResult::new("cached", start.elapsed(), chunks, bytes));
    }

    // 直接 I/O 策略：没有运行时上下文，构造缓存失败后自动退化
    {
        let backend = FileServerBackend::new();

        let start = Instant::now();
        let (chunks, bytes) = run_rounds(&backend, &path, args.chunk_size, args.rounds)?;
        results.push(BenchmarkResult::new("direct", start.elapsed(), chunks, bytes));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("\n📊 结果:");
        for result in &results {
            result.print();
        }
        if results[1].duration_ms > 0.0 {
            println!(
                "\n  缓存相对直接 I/O 提速: {:.2}x",
                results[1].duration_ms / results[0].duration_ms
            );
        }
    }

    Ok(())
}
