use std::path::Path;
use rustix::fs::{FileType, RawMode};
use crate::error::{Result, ServeError};
use crate::posix;

/// 类型标志位，与外部协议引擎的条目类型枚举保持线上兼容
pub const FLAG_FILE: u8 = 1;
pub const FLAG_DIRECTORY: u8 = 2;
pub const FLAG_READABLE: u8 = 8;

/// 元数据查询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub flags: u8,
}

/// 查询路径的大小与类型标志
///
/// 空路径直接返回 InvalidArgument，不触发任何文件系统访问。
/// READABLE 恒置位，不检查权限位；目录判断优先于普通文件。
pub fn query_info(path: &Path) -> Result<FileInfo> {
    if path.as_os_str().is_empty() {
        return Err(ServeError::InvalidArgument("空路径".to_string()));
    }

    let stat = posix::stat_path(path)?;

    let mut flags = FLAG_READABLE;
    match FileType::from_raw_mode(stat.st_mode as RawMode) {
        FileType::Directory => flags |= FLAG_DIRECTORY,
        FileType::RegularFile => flags |= FLAG_FILE,
        _ => {}
    }

    Ok(FileInfo {
        size: stat.st_size as u64,
        flags,
    })
}
