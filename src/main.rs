use std::io::Write;
use std::path::PathBuf;
use clap::{Parser, Subcommand};
use rfsb::backend::FileServerBackend;
use rfsb::fs::{FLAG_DIRECTORY, FLAG_FILE};
use tracing_subscriber::{fmt, EnvFilter};
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(author, version, about = "文件块服务后端调试工具", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 查询文件元数据
    Info {
        /// 目标路径
        path: PathBuf,
    },
    /// 按块读取文件内容并写到标准输出
    Read {
        /// 目标路径
        path: PathBuf,

        /// 起始偏移（字节）
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// 单块大小（字节）
        #[arg(short, long, default_value = "256")]
        size: usize,

        /// 连续读取后续块直到文件结束
        #[arg(long)]
        follow: bool,
    },
}

#[tokio::main]
async fn main() {
    // 初始化日志系统
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let backend = FileServerBackend::new();

    match args.command {
        Command::Info { path } => match backend.get_info(&path) {
            Ok(info) => {
                let kind = if info.flags & FLAG_DIRECTORY != 0 {
                    "目录"
                } else if info.flags & FLAG_FILE != 0 {
                    "文件"
                } else {
                    "其他"
                };
                println!("大小: {} 字节, 类型: {} (flags=0x{:02x})", info.size, kind, info.flags);
            }
            Err(e) => {
                error!("获取元数据失败: {} (code={})", e, e.code());
                std::process::exit(1);
            }
        },
        Command::Read {
            path,
            mut offset,
            size,
            follow,
        } => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();

            loop {
                match backend.read(&path, offset, size) {
                    Ok(chunk) => {
                        if let Err(e) = out.write_all(&chunk) {
                            error!("写标准输出失败: {}", e);
                            std::process::exit(1);
                        }
                        let short = chunk.len() < size;
                        offset += chunk.len() as u64;
                        if !follow || short {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("读取失败: {} (code={})", e, e.code());
                        std::process::exit(1);
                    }
                }
            }

            if let Some(stats) = backend.cache_stats() {
                debug!("{}", stats);
            }
        }
    }
}
