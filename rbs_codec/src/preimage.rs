//! Page pre-image codec: dehydrate trailing zeros, then compress
//! 页前像编解码：去除尾部零后压缩
//!
//! Flags: bit 0 dehydrated, bits 1..=2 codec.
//! 标志：bit 0 已脱水，bit 1..=2 压缩算法

use std::io::Read;

use crate::error::{Error, Result};

/// Trailing zeros were stripped
/// 已去除尾部零
pub const DEHYDRATED: u8 = 1;

const CODEC_SHIFT: u8 = 1;
const CODEC_MASK: u8 = 0b11;

/// Fraction of the page the zero tail must cover to be worth stripping
/// 尾部零至少占页的比例才去除
const DEHYDRATE_DIV: usize = 16;

/// 压缩算法 Compression codec
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Codec {
  None = 0,
  #[default]
  Lz4 = 1,
  Zstd = 2,
}

impl Codec {
  /// 从 u8 转换 Convert from u8
  #[inline]
  pub fn from_u8(v: u8) -> Result<Self> {
    match v {
      0 => Ok(Self::None),
      1 => Ok(Self::Lz4),
      2 => Ok(Self::Zstd),
      _ => Err(Error::UnknownCodec(v)),
    }
  }

  /// Codec recorded in page flags
  /// 页标志中记录的压缩算法
  #[inline]
  pub fn of_flags(flags: u8) -> Result<Self> {
    Self::from_u8((flags >> CODEC_SHIFT) & CODEC_MASK)
  }

  #[inline]
  fn flag(self) -> u8 {
    (self as u8) << CODEC_SHIFT
  }

  /// 压缩 Compress, None when the codec fails
  fn enc(self, src: &[u8]) -> Option<Vec<u8>> {
    match self {
      Self::None => None,
      Self::Lz4 => Some(lz4_flex::compress_prepend_size(src)),
      Self::Zstd => zstd::encode_all(src, 3).ok(),
    }
  }

  /// 解压 Decompress
  fn dec(self, src: &[u8]) -> Result<Vec<u8>> {
    match self {
      Self::None => Ok(src.to_vec()),
      Self::Lz4 => Ok(lz4_flex::decompress_size_prepended(src)?),
      Self::Zstd => {
        let mut out = Vec::new();
        zstd::Decoder::new(src)?.read_to_end(&mut out)?;
        Ok(out)
      }
    }
  }
}

/// Length of the page without its zero tail
/// 去掉尾部零后的长度
#[inline]
fn trimmed_len(page: &[u8]) -> usize {
  page.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1)
}

/// Encode a pre-image. A page shorter than `page_size` is taken as already
/// dehydrated and only compressed.
/// 编码页前像。短于 `page_size` 的页视为已脱水，只做压缩
pub fn capture(page: &[u8], page_size: usize, codec: Codec) -> (u8, Vec<u8>) {
  let mut flags = 0u8;
  let mut body = page;
  if page.len() == page_size {
    let keep = trimmed_len(page);
    if page.len() - keep >= page_size / DEHYDRATE_DIV {
      body = &page[..keep];
      flags |= DEHYDRATED;
    }
  }
  if let Some(packed) = codec.enc(body)
    && packed.len() < body.len()
  {
    return (flags | codec.flag(), packed);
  }
  (flags, body.to_vec())
}

/// Reverse [`capture`]: decompress, then rehydrate to `page_size`
/// [`capture`] 的逆操作：先解压，再补零到 `page_size`
pub fn restore(payload: &[u8], flags: u8, page_size: usize) -> Result<Vec<u8>> {
  let mut page = Codec::of_flags(flags)?.dec(payload)?;
  if flags & DEHYDRATED != 0 && page.len() < page_size {
    page.resize(page_size, 0);
  }
  Ok(page)
}
