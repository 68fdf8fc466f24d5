use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("OS error: {0}")]
    Os(i32),
}

impl ServeError {
    /// 返回给协议引擎的数字错误码（errno 原样透传，不做重映射）
    pub fn code(&self) -> i32 {
        match self {
            ServeError::InvalidArgument(_) => libc::EINVAL,
            ServeError::Os(code) => *code,
        }
    }
}

impl From<rustix::io::Errno> for ServeError {
    fn from(errno: rustix::io::Errno) -> Self {
        ServeError::Os(errno.raw_os_error())
    }
}

impl From<std::io::Error> for ServeError {
    fn from(err: std::io::Error) -> Self {
        ServeError::Os(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

pub type Result<T> = std::result::Result<T, ServeError>;
