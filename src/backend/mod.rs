use std::os::fd::{IntoRawFd, RawFd};
use std::path::Path;
use std::sync::OnceLock;
use rustix::fs::OFlags;
use tracing::{debug, warn};
use crate::cache::{CacheStats, FileHandleCache};
use crate::config::CacheConfig;
use crate::error::{Result, ServeError};
use crate::fs::{self, FileInfo};
use crate::posix;

/// 不缓存的兜底实现：每次真实打开、真实关闭，无记忆、无老化
pub struct DirectHandles;

impl DirectHandles {
    pub fn open(&self, path: &Path, flags: OFlags) -> Result<RawFd> {
        let fd = posix::open_file(path, flags)?;
        Ok(fd.into_raw_fd())
    }

    pub fn close(&self, fd: RawFd, _done: bool) -> Result<()> {
        posix::close_fd(fd)?;
        Ok(())
    }
}

/// 实例的句柄策略：首次使用时二选一，此后终身不变
pub enum HandleStrategy {
    Cached(FileHandleCache),
    Direct(DirectHandles),
}

impl HandleStrategy {
    /// 优先构造真实缓存；构造失败时永久退化为直接 I/O
    fn select(config: CacheConfig) -> Self {
        match FileHandleCache::new(config) {
            Ok(cache) => HandleStrategy::Cached(cache),
            Err(err) => {
                warn!("句柄缓存创建失败，本实例退化为直接 I/O: {}", err);
                HandleStrategy::Direct(DirectHandles)
            }
        }
    }

    pub fn open(&self, path: &Path, flags: OFlags) -> Result<RawFd> {
        match self {
            HandleStrategy::Cached(cache) => cache.open(path, flags),
            HandleStrategy::Direct(direct) => direct.open(path, flags),
        }
    }

    pub fn close(&self, fd: RawFd, done: bool) -> Result<()> {
        match self {
            HandleStrategy::Cached(cache) => cache.close(fd, done),
            HandleStrategy::Direct(direct) => direct.close(fd, done),
        }
    }
}

/// 面向外部协议引擎的文件服务后端
///
/// 暴露元数据查询与分块读取两个操作。读取路径在首次调用时选定
/// 句柄策略（缓存或直接 I/O），之后对实例终身固定。
pub struct FileServerBackend {
    config: CacheConfig,
    strategy: OnceLock<HandleStrategy>,
}

impl FileServerBackend {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            strategy: OnceLock::new(),
        }
    }

    fn strategy(&self) -> &HandleStrategy {
        self.strategy
            .get_or_init(|| HandleStrategy::select(self.config.clone()))
    }

    /// 查询路径的大小与类型标志
    pub fn get_info(&self, path: &Path) -> Result<FileInfo> {
        fs::query_info(path)
    }

    /// 从绝对偏移处读取最多 size 字节
    ///
    /// 打开、定位、读取中的任何失败都把 errno 原样上抛；只要打开
    /// 成功，句柄一定通过策略关闭。短读说明本次传输到此为止，随
    /// done=true 强制淘汰对应条目；整块读满则保持条目温热，等待
    /// 下一个块请求。
    pub fn read(&self, path: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
        if path.as_os_str().is_empty() {
            return Err(ServeError::InvalidArgument("空路径".to_string()));
        }

        let strategy = self.strategy();
        let fd = strategy.open(path, OFlags::RDONLY)?;

        let mut buf = vec![0u8; size];
        let outcome = posix::read_at(fd, offset, &mut buf);

        let done = match &outcome {
            Ok(len) => *len < size,
            Err(_) => true,
        };
        if let Err(err) = strategy.close(fd, done) {
            debug!("read: fd={} 关闭失败: {}", fd, err);
        }

        let len = outcome?;
        buf.truncate(len);
        Ok(buf)
    }

    /// 活动策略为缓存时返回统计信息
    pub fn cache_stats(&self) -> Option<CacheStats> {
        match self.strategy.get() {
            Some(HandleStrategy::Cached(cache)) => Some(cache.stats()),
            _ => None,
        }
    }
}

impl Default for FileServerBackend {
    fn default() -> Self {
        Self::new()
    }
}
