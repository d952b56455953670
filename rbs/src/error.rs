//! Error types for rbs
//! rbs 错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("IO: {0}")]
  Io(#[from] std::io::Error),

  #[error("{0}")]
  Codec(#[from] rbs_codec::Error),

  #[error("generation {0} header corrupt")]
  HeadCorrupt(u32),

  #[error("generation {0} has wrong file type")]
  InvalidType(u32),

  #[error("generation {gen_id} version {major}.{minor} unsupported")]
  BadVersion { gen_id: u32, major: u32, minor: u32 },

  #[error("generation {0} signature unset")]
  InvalidSign(u32),

  #[error("generation {0} out of space")]
  OutOfSpace(u32),

  #[error("database {0} does not match its attach entry")]
  DbMismatch(String),

  #[error("database {0} not attached")]
  NotAttached(String),

  #[error("invalid snapshot: {0}")]
  InvalidRbs(String),

  #[error("no snapshot covers the target time")]
  NoRbsFound,

  #[error("database {0} corrupted")]
  DbCorrupt(String),

  #[error("database {0} in unexpected state for revert")]
  BadDbState(String),

  #[error("checkpoint copying logs is past the target time")]
  CopyLogsState,

  #[error("missing log {0}")]
  MissingLogs(String),

  #[error("cannot determine log divergence: {0}")]
  CannotDetermineDivergence(String),

  #[error("log diverged: {0}")]
  LogDivergence(String),

  #[error("cancelled")]
  Cancelled,

  #[error("out of memory")]
  OutOfMemory,

  #[error("required log range too large")]
  RangeTooLarge,

  #[error("invalid conf: {0}")]
  InvalidConf(&'static str),
}

impl Error {
  /// Header failed validation; the caller may start a new chain instead
  /// 头部校验失败；调用方可改为开启新链
  #[inline]
  pub fn is_head_invalid(&self) -> bool {
    matches!(
      self,
      Self::HeadCorrupt(_) | Self::InvalidType(_) | Self::BadVersion { .. } | Self::InvalidSign(_)
    )
  }
}

impl From<std::collections::TryReserveError> for Error {
  fn from(_: std::collections::TryReserveError) -> Self {
    Self::OutOfMemory
  }
}

pub type Result<T> = std::result::Result<T, Error>;
