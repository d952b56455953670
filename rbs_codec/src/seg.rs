//! Segment header and segment geometry
//! 段头与段几何

use zerocopy::{
  FromBytes, IntoBytes,
  little_endian::{U32, U64},
};

use crate::{
  Reason,
  disk::SegDisk,
  error::{Error, Result},
  head::HEAD_AREA,
};

/// Segment header size
/// 段头大小
pub const SEG_HEAD: usize = size_of::<SegDisk>();

/// Bytes of the crc field inside the header
/// 段头中校验字段的范围
const CRC_RANGE: std::ops::Range<usize> = 4..8;

/// Decoded segment header
/// 解码后的段头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegHead {
  pub ordinal: u32,
  pub crc: u32,
  pub time: u64,
}

/// File offset of segment `seg` (ordinals start at 1)
/// 段 `seg` 的文件偏移（序号从 1 开始）
#[inline]
pub fn seg_off(seg: u32, seg_size: usize) -> u64 {
  HEAD_AREA + (seg as u64 - 1) * seg_size as u64
}

/// Segment holding file offset `off`
/// 文件偏移 `off` 所在的段
#[inline]
pub fn seg_of(off: u64, seg_size: usize) -> u32 {
  (off.saturating_sub(HEAD_AREA) / seg_size as u64) as u32 + 1
}

/// crc32 of the segment with the crc field skipped
/// 跳过校验字段计算段的 crc32
pub fn seg_crc(seg: &[u8]) -> u32 {
  let mut h = crc32fast::Hasher::new();
  h.update(&seg[..CRC_RANGE.start]);
  h.update(&seg[CRC_RANGE.end..]);
  h.finalize()
}

/// Fill in the header of a complete segment
/// 填写完整段的段头
pub fn seal(seg: &mut [u8], ordinal: u32, time: u64) {
  let head = SegDisk {
    ordinal: U32::new(ordinal),
    crc: U32::ZERO,
    time: U64::new(time),
  };
  seg[..SEG_HEAD].copy_from_slice(head.as_bytes());
  let crc = seg_crc(seg);
  seg[CRC_RANGE].copy_from_slice(&crc.to_le_bytes());
}

/// Read the header without checking
/// 读取段头不做校验
pub fn head(seg: &[u8]) -> SegHead {
  match SegDisk::read_from_prefix(seg) {
    Ok((d, _)) => SegHead {
      ordinal: d.ordinal.get(),
      crc: d.crc.get(),
      time: d.time.get(),
    },
    Err(_) => SegHead {
      ordinal: 0,
      crc: 0,
      time: 0,
    },
  }
}

/// Check checksum, then that the ordinal matches the position
/// 先校验和，再检查序号与位置一致
pub fn verify(seg: &[u8], ordinal: u32) -> Result<SegHead> {
  if seg.len() < SEG_HEAD {
    return Err(Error::corrupt(Reason::Truncated, ordinal));
  }
  let h = head(seg);
  let crc = seg_crc(seg);
  if crc != h.crc {
    log::error!("segment {ordinal} crc expected {:#x} actual {crc:#x}", h.crc);
    return Err(Error::corrupt(Reason::BadChecksum, ordinal));
  }
  if h.ordinal != ordinal {
    log::error!("segment {ordinal} claims ordinal {}", h.ordinal);
    return Err(Error::corrupt(Reason::BadSegmentNumber, ordinal));
  }
  Ok(h)
}
