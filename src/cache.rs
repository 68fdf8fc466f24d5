use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use rustix::fs::OFlags;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;
use tracing::debug;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::posix;

/// 缓存键：(路径, 打开标志位)。同一路径不同打开方式独立缓存。
type CacheKey = (PathBuf, u32);

/// 缓存条目：持有一个打开的描述符及其最近访问时间
struct CacheEntry {
    fd: OwnedFd,
    /// None 表示已被显式标记为立即过期
    last_access: Option<Instant>,
}

impl CacheEntry {
    fn new(fd: OwnedFd) -> Self {
        Self {
            fd,
            last_access: Some(Instant::now()),
        }
    }

    fn touch(&mut self) {
        self.last_access = Some(Instant::now());
    }

    fn expire(&mut self) {
        self.last_access = None;
    }

    fn expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        match self.last_access {
            None => true,
            Some(at) => now.duration_since(at) > idle_timeout,
        }
    }
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    idle_timeout: Duration,
    max_entries: usize,
}

impl CacheInner {
    /// 清除所有过期条目，返回清理数量
    ///
    /// 条目被移除时描述符随 drop 关闭；这里的关闭失败无从归因到
    /// 任何调用方，直接吞掉。
    fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let idle_timeout = self.idle_timeout;
        self.entries
            .retain(|_, entry| !entry.expired(now, idle_timeout));
        before - self.entries.len()
    }

    /// 淘汰最近访问时间最早的条目，为新条目腾位
    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone())
        {
            debug!("缓存已满，淘汰最旧条目: {:?}", oldest.0);
            self.entries.remove(&oldest);
        }
    }
}

/// 文件句柄缓存
///
/// 把 (路径, 打开方式) 映射到一个存活的 OS 描述符，让同一文件的
/// 连续分块读取复用一次打开。条目空闲超时后由 close 触发的回收或
/// 周期回收任务关闭。
pub struct FileHandleCache {
    inner: Arc<Mutex<CacheInner>>,
    sweeper: JoinHandle<()>,
}

impl FileHandleCache {
    /// 创建缓存并启动周期回收任务
    ///
    /// 周期回收需要一个可达的 tokio 运行时来驱动；拿不到运行时句柄
    /// 时构造失败，由上层退化为不缓存的直接 I/O。
    pub fn new(config: CacheConfig) -> std::result::Result<Self, TryCurrentError> {
        let handle = Handle::try_current()?;

        let inner = Arc::new(Mutex::new(CacheInner {
            entries: HashMap::new(),
            idle_timeout: config.idle_timeout,
            max_entries: config.max_entries,
        }));

        // 正常情况下消费者读到最后一块会以 done=true 收尾；中途放弃的
        // 传输留下的悬挂条目由周期回收兜底
        let sweep_inner = Arc::clone(&inner);
        let sweeper = handle.spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = {
                    let mut inner = sweep_inner.lock().unwrap();
                    inner.sweep_expired(Instant::now())
                };
                if removed > 0 {
                    debug!("周期回收: 清理 {} 个过期句柄", removed);
                }
            }
        });

        Ok(Self { inner, sweeper })
    }

    /// 查找或打开 (path, flags) 对应的描述符
    ///
    /// 命中时刷新最近访问时间并复用描述符；未命中时真正打开一次，
    /// 打开失败原样返回 errno，不建条目。
    pub fn open(&self, path: &Path, flags: OFlags) -> Result<RawFd> {
        let mut inner = self.inner.lock().unwrap();
        let key = (path.to_path_buf(), flags.bits());

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.touch();
            debug!("缓存命中: {:?}", path);
            return Ok(entry.fd.as_raw_fd());
        }

        let fd = posix::open_file(path, flags)?;

        if inner.entries.len() >= inner.max_entries {
            inner.evict_oldest();
        }

        let raw = fd.as_raw_fd();
        inner.entries.insert(key, CacheEntry::new(fd));
        debug!("缓存未命中，已打开并缓存: {:?} (fd={})", path, raw);
        Ok(raw)
    }

    /// 关闭一个由 open 返回的描述符
    ///
    /// fd 不在缓存中（从未被缓存或已被回收）时直接走 OS close；
    /// 在缓存中时按 done 标记立即过期，然后对整个集合做一次回收。
    /// 回收本身的结果不影响返回值。
    pub fn close(&self, fd: RawFd, done: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        let key = inner
            .entries
            .iter()
            .find(|(_, entry)| entry.fd.as_raw_fd() == fd)
            .map(|(key, _)| key.clone());

        let key = match key {
            Some(key) => key,
            None => {
                drop(inner);
                debug!("close: fd={} 未缓存，直接关闭", fd);
                posix::close_fd(fd)?;
                return Ok(());
            }
        };

        if done {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.expire();
            }
        }

        inner.sweep_expired(Instant::now());
        Ok(())
    }

    /// 回收入口：清除所有过期条目，返回清理数量
    ///
    /// 周期回收任务跑的就是同一逻辑；暴露出来便于宿主在自己的
    /// 定时器里额外触发。
    pub fn sweep(&self) -> usize {
        self.inner.lock().unwrap().sweep_expired(Instant::now())
    }

    /// 缓存统计信息
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired = inner
            .entries
            .values()
            .filter(|entry| entry.expired(now, inner.idle_timeout))
            .count();

        CacheStats {
            total: inner.entries.len(),
            expired,
        }
    }
}

impl Drop for FileHandleCache {
    fn drop(&mut self) {
        // 先停掉周期回收任务，再同步强制关闭所有剩余句柄
        self.sweeper.abort();
        let mut inner = self.inner.lock().unwrap();
        let remaining = inner.entries.len();
        inner.entries.clear();
        if remaining > 0 {
            debug!("缓存销毁，强制关闭 {} 个句柄", remaining);
        }
    }
}

/// 缓存统计信息
#[derive(Debug)]
pub struct CacheStats {
    pub total: usize,
    pub expired: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "缓存统计: 总计={}, 已过期={}", self.total, self.expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;
    use std::thread;
    use tempfile::TempDir;

    fn quick_config() -> CacheConfig {
        // 缩短空闲超时便于测试；周期回收间隔拉长，避免干扰手动触发的回收
        CacheConfig::new(Duration::from_millis(50), Duration::from_secs(600), 64)
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_hit_returns_same_fd_and_refreshes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let cache = FileHandleCache::new(CacheConfig::default()).unwrap();
        let key = (path.clone(), OFlags::RDONLY.bits());

        let fd1 = cache.open(&path, OFlags::RDONLY).unwrap();
        let first_access = cache.inner.lock().unwrap().entries[&key].last_access;

        thread::sleep(Duration::from_millis(10));

        // 超时之内的第二次 open 必须命中，返回同一个底层描述符
        let fd2 = cache.open(&path, OFlags::RDONLY).unwrap();
        assert_eq!(fd1, fd2);
        assert_eq!(cache.stats().total, 1);

        // 命中必须严格推进最近访问时间
        let second_access = cache.inner.lock().unwrap().entries[&key].last_access;
        assert!(second_access.unwrap() > first_access.unwrap());
    }

    #[tokio::test]
    async fn test_open_failure_creates_no_entry() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let cache = FileHandleCache::new(CacheConfig::default()).unwrap();

        let err = cache.open(&missing, OFlags::RDONLY).unwrap_err();
        assert_eq!(err.code(), libc::ENOENT);
        assert_eq!(cache.stats().total, 0);
    }

    #[tokio::test]
    async fn test_done_close_evicts_immediately() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let cache = FileHandleCache::new(CacheConfig::default()).unwrap();

        let fd = cache.open(&path, OFlags::RDONLY).unwrap();
        cache.close(fd, true).unwrap();
        assert_eq!(cache.stats().total, 0);

        // 条目已不存在，下一次 open 重新走真实打开
        cache.open(&path, OFlags::RDONLY).unwrap();
        assert_eq!(cache.stats().total, 1);
    }

    #[tokio::test]
    async fn test_close_without_done_keeps_entry_warm() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let cache = FileHandleCache::new(CacheConfig::default()).unwrap();

        let fd = cache.open(&path, OFlags::RDONLY).unwrap();
        cache.close(fd, false).unwrap();
        assert_eq!(cache.stats().total, 1);
    }

    #[tokio::test]
    async fn test_close_unknown_fd_delegates_to_os() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let cache = FileHandleCache::new(CacheConfig::default()).unwrap();

        // 从未进入缓存的 fd：直接走 OS close
        let fd = posix::open_file(&path, OFlags::RDONLY)
            .unwrap()
            .into_raw_fd();
        cache.close(fd, true).unwrap();
        assert_eq!(cache.stats().total, 0);

        // 同一个 fd 的第二次 close 同样按未缓存处理，错误由 OS 裁决，不会崩溃
        let err = cache.close(fd, true).unwrap_err();
        assert_eq!(err.code(), libc::EBADF);
    }

    #[tokio::test]
    async fn test_idle_entries_reclaimed_by_sweep() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", b"aa");
        let b = write_file(&dir, "b.txt", b"bb");
        let cache = FileHandleCache::new(quick_config()).unwrap();

        cache.open(&a, OFlags::RDONLY).unwrap();
        cache.open(&b, OFlags::RDONLY).unwrap();
        assert_eq!(cache.stats().total, 2);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.stats().total, 0);
    }

    #[tokio::test]
    async fn test_close_sweeps_other_expired_entries() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", b"aa");
        let b = write_file(&dir, "b.txt", b"bb");
        let c = write_file(&dir, "c.txt", b"cc");
        let cache = FileHandleCache::new(quick_config()).unwrap();

        cache.open(&a, OFlags::RDONLY).unwrap();
        cache.open(&b, OFlags::RDONLY).unwrap();
        thread::sleep(Duration::from_millis(120));

        // close 触发的回收顺带清掉 a、b，c 自己保持温热
        let fd_c = cache.open(&c, OFlags::RDONLY).unwrap();
        cache.close(fd_c, false).unwrap();
        assert_eq!(cache.stats().total, 1);
    }

    #[tokio::test]
    async fn test_stale_entry_still_hits_before_sweep() {
        // 已过期但尚未被回收的条目依旧可以命中并被刷新
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let cache = FileHandleCache::new(quick_config()).unwrap();

        let fd1 = cache.open(&path, OFlags::RDONLY).unwrap();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.stats().expired, 1);

        let fd2 = cache.open(&path, OFlags::RDONLY).unwrap();
        assert_eq!(fd1, fd2);
        assert_eq!(cache.stats().expired, 0);
    }

    #[tokio::test]
    async fn test_distinct_modes_cached_independently() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let cache = FileHandleCache::new(CacheConfig::default()).unwrap();

        let fd_ro = cache.open(&path, OFlags::RDONLY).unwrap();
        let fd_rw = cache.open(&path, OFlags::RDWR).unwrap();
        assert_ne!(fd_ro, fd_rw);
        assert_eq!(cache.stats().total, 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_entry() {
        let dir = TempDir::new().unwrap();
        let f1 = write_file(&dir, "f1.txt", b"1");
        let f2 = write_file(&dir, "f2.txt", b"2");
        let f3 = write_file(&dir, "f3.txt", b"3");
        let config = CacheConfig::new(Duration::from_secs(7), Duration::from_secs(600), 2);
        let cache = FileHandleCache::new(config).unwrap();

        cache.open(&f1, OFlags::RDONLY).unwrap();
        thread::sleep(Duration::from_millis(5));
        cache.open(&f2, OFlags::RDONLY).unwrap();
        thread::sleep(Duration::from_millis(5));
        cache.open(&f3, OFlags::RDONLY).unwrap();

        assert_eq!(cache.stats().total, 2);
        let inner = cache.inner.lock().unwrap();
        assert!(!inner.entries.contains_key(&(f1, OFlags::RDONLY.bits())));
    }

    #[tokio::test]
    async fn test_periodic_sweeper_reclaims_abandoned_entries() {
        // 不调用 close，模拟半途放弃传输的消费者
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let config = CacheConfig::new(
            Duration::from_millis(30),
            Duration::from_millis(100),
            64,
        );
        let cache = FileHandleCache::new(config).unwrap();

        cache.open(&path, OFlags::RDONLY).unwrap();
        assert_eq!(cache.stats().total, 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.stats().total, 0);
    }

    #[tokio::test]
    async fn test_drop_closes_remaining_handles() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");
        let cache = FileHandleCache::new(CacheConfig::default()).unwrap();

        let fd = cache.open(&path, OFlags::RDONLY).unwrap();
        drop(cache);

        // 析构已强制关闭句柄，再关一次必然报 EBADF
        assert!(posix::close_fd(fd).is_err());
    }

    #[test]
    fn test_construction_requires_runtime() {
        // 拿不到运行时句柄时构造失败，由上层退化为直接 I/O
        assert!(FileHandleCache::new(CacheConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_stats_counts_expired_entries() {
        let dir = TempDir::new().unwrap();
        let f1 = write_file(&dir, "f1.txt", b"1");
        let f2 = write_file(&dir, "f2.txt", b"2");
        let cache = FileHandleCache::new(quick_config()).unwrap();

        cache.open(&f1, OFlags::RDONLY).unwrap();
        thread::sleep(Duration::from_millis(120));
        cache.open(&f2, OFlags::RDONLY).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.expired, 1);
    }
}
