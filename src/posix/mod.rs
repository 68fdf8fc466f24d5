use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::path::Path;
use rustix::fs::{Mode, OFlags, RawMode, SeekFrom, Stat};
use rustix::io::Errno;

/// 默认的文件创建权限（0o666），预留给带写能力的扩展，读路径不使用
pub const DEFAULT_CREATE_MODE: RawMode = 0o666;

/// 打开文件，返回拥有所有权的描述符
pub fn open_file(path: &Path, flags: OFlags) -> rustix::io::Result<OwnedFd> {
    rustix::fs::open(path, flags, Mode::from_bits_truncate(DEFAULT_CREATE_MODE))
}

/// 按原始 fd 关闭描述符，出错时上报 errno
pub fn close_fd(fd: RawFd) -> rustix::io::Result<()> {
    if unsafe { libc::close(fd) } < 0 {
        let code = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EIO);
        Err(Errno::from_raw_os_error(code))
    } else {
        Ok(())
    }
}

/// 定位到绝对偏移后读取，返回实际读到的字节数
///
/// 调用方保证 fd 在本次调用期间保持打开。
pub fn read_at(fd: RawFd, offset: u64, buf: &mut [u8]) -> rustix::io::Result<usize> {
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    rustix::fs::seek(fd, SeekFrom::Start(offset))?;
    rustix::io::read(fd, buf)
}

/// 单次 stat 调用
pub fn stat_path(path: &Path) -> rustix::io::Result<Stat> {
    rustix::fs::stat(path)
}
