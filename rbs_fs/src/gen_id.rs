//! Generation id encoding/decoding
//! 代号 id 编码/解码
//!
//! Generations are written as 8 upper-case hex digits after a prefix,
//! e.g. `RBSedb0000002A`.
//! 代号以前缀加 8 位大写十六进制表示

use std::{io, path::Path};

use crate::visit::{missing_ok, walk_depth};

/// Hex digits in an encoded generation
/// 编码后代号的十六进制位数
pub const GEN_DIGITS: usize = 8;

/// Encode generation as 8 upper-case hex digits
/// 将代号编码为 8 位大写十六进制
#[inline(always)]
pub fn encode_gen(gen_id: u32) -> String {
  format!("{gen_id:08X}")
}

/// Decode `<prefix><8 hex>` to generation, None if the name does not match
/// 解码 `<前缀><8位十六进制>`，不匹配返回 None
pub fn decode_gen(name: &str, prefix: &str) -> Option<u32> {
  let hex = name.strip_prefix(prefix)?;
  if hex.len() != GEN_DIGITS
    || !hex
      .bytes()
      .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
  {
    return None;
  }
  u32::from_str_radix(hex, 16).ok()
}

/// Scan `dir` for sub-directories named `<prefix><8 hex>`, return (min, max)
/// 扫描 `dir` 下名为 `<前缀><8位十六进制>` 的子目录，返回 (最小, 最大)
///
/// Missing dir yields None.
/// 目录不存在返回 None
pub fn gen_range(dir: &Path, prefix: &str) -> io::Result<Option<(u32, u32)>> {
  let mut range: Option<(u32, u32)> = None;
  missing_ok(walk_depth(dir, 1, &mut |path, meta| {
    if !meta.is_dir() {
      return Ok(());
    }
    let Some(g) = path
      .file_name()
      .and_then(|n| n.to_str())
      .and_then(|n| decode_gen(n, prefix))
    else {
      return Ok(());
    };
    range = Some(match range {
      Some((lo, hi)) => (lo.min(g), hi.max(g)),
      None => (g, g),
    });
    Ok(())
  }))?;
  Ok(range)
}
