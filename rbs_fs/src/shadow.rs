//! Shadowed fixed-size header slots
//! 双份影子头部槽位
//!
//! Layout: `[slot 0: primary][slot 1: shadow]`, each slot is
//! `payload | crc32(payload) | zero pad`. Writes go shadow first, verified
//! by reading back, then primary, so a torn write always leaves one intact copy.
//! 布局：主槽 + 影子槽，每槽为 载荷 | crc32 | 零填充。
//! 先写影子再写主槽，撕裂写入总能保留一份完整副本

use std::io;

use compio::BufResult;
use compio_fs::File;
use log::warn;

use crate::fs::{read_at, write_at};

/// Trailing checksum size
/// 尾部校验和大小
pub const CRC_SIZE: usize = 4;

fn build(slot: usize, payload: &[u8]) -> io::Result<Vec<u8>> {
  if payload.len() + CRC_SIZE > slot {
    return Err(io::Error::new(
      io::ErrorKind::InvalidInput,
      format!("header payload {} exceeds slot {slot}", payload.len()),
    ));
  }
  let mut buf = vec![0u8; slot];
  buf[..payload.len()].copy_from_slice(payload);
  let crc = crc32fast::hash(payload);
  buf[payload.len()..payload.len() + CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
  Ok(buf)
}

fn check(buf: &[u8], len: usize) -> bool {
  let crc = crc32fast::hash(&buf[..len]);
  buf[len..len + CRC_SIZE] == crc.to_le_bytes()
}

/// Write payload to both slots, syncing after each. The shadow is read back
/// before the primary is touched.
/// 将载荷写入两个槽位，每次写后同步。写主槽前先回读校验影子槽
pub async fn write(file: &mut File, slot: usize, payload: &[u8]) -> io::Result<()> {
  let buf = build(slot, payload)?;
  let BufResult(res, buf) = write_at(file, buf, slot as u64).await;
  res?;
  file.sync_data().await?;
  if read_at(file, slot as u64, slot).await? != buf {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      "header shadow slot read back differs",
    ));
  }
  write_at(file, buf, 0).await.0?;
  file.sync_data().await
}

/// Read `len` payload bytes, primary first then shadow; None if both are bad
/// 读取 `len` 字节载荷，先主槽后影子；两者都损坏返回 None
pub async fn read(file: &File, slot: usize, len: usize) -> io::Result<Option<Vec<u8>>> {
  for (i, name) in [(0usize, "primary"), (1, "shadow")] {
    match read_at(file, (i * slot) as u64, len + CRC_SIZE).await {
      Ok(mut buf) if check(&buf, len) => {
        if i == 1 {
          warn!("header primary slot bad, using shadow");
        }
        buf.truncate(len);
        return Ok(Some(buf));
      }
      Ok(_) => warn!("header {name} slot checksum mismatch"),
      Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
        warn!("header {name} slot truncated")
      }
      Err(e) => return Err(e),
    }
  }
  Ok(None)
}
