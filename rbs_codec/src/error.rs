//! Codec errors
//! 编解码错误

use std::fmt;

use thiserror::Error;

/// Why a segment or record was rejected
/// 段或记录被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
  BadChecksum,
  BadSegmentNumber,
  RecordTooLong,
  FragBeginTooLong,
  FragContinueTooLong,
  UnknownRecType,
  Truncated,
}

impl fmt::Display for Reason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("log corrupt: {reason} at segment {seg}")]
  Corrupt { reason: Reason, seg: u32 },

  #[error("lz4: {0}")]
  Lz4(#[from] lz4_flex::block::DecompressError),

  #[error("zstd: {0}")]
  Zstd(#[from] std::io::Error),

  #[error("unknown codec: {0}")]
  UnknownCodec(u8),

  #[error("unknown db state: {0}")]
  UnknownDbState(u8),

  #[error("db name too long: {0} bytes")]
  NameTooLong(usize),

  #[error("attach table full")]
  AttachFull,
}

impl Error {
  #[inline]
  pub fn corrupt(reason: Reason, seg: u32) -> Self {
    log::error!("log corrupt: {reason} at segment {seg}");
    Self::Corrupt { reason, seg }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
