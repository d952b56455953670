//! Transaction log range copied alongside a generation
//! 随代号一起复制的事务日志范围

use std::path::Path;

use log::{info, warn};
use rbs_codec::GenHead;
use rbs_fs::fs::{copy_file, same_content};

use crate::{Cfg, Error, Result};

/// Copy logs `min..=max` from `src` to `dst`. A missing archive of `max` is
/// replaced by the current log when `copy_current` is on; other missing
/// archives are skipped. Returns how many files were copied.
/// 从 `src` 复制日志 `min..=max` 到 `dst`。`max` 的归档缺失且允许时改用当前日志；
/// 其他缺失的归档跳过。返回复制的文件数
pub(crate) async fn copy_logs(
  cfg: &Cfg,
  src: &Path,
  dst: &Path,
  min: u32,
  max: u32,
  overwrite: bool,
  copy_current: bool,
) -> Result<u32> {
  if min == 0 || max < min {
    return Ok(0);
  }
  let mut copied = 0;
  for lgen in min..=max {
    let to = cfg.archive_log(dst, lgen);
    let mut from = cfg.archive_log(src, lgen);
    if !from.exists() {
      let cur = cfg.current_log(src);
      if lgen == max && copy_current && cur.exists() {
        from = cur;
      } else {
        warn!("rbs log {} missing, skipped", from.display());
        continue;
      }
    }
    if copy_file(&from, &to, overwrite).await? {
      copied += 1;
    }
  }
  info!(
    "rbs copied {copied} logs {min}..={max} from {} to {}",
    src.display(),
    dst.display()
  );
  Ok(copied)
}

/// Verify every log a generation needs was copied. With `divergence`, the
/// newest copied log must also match the live archive byte for byte.
/// 校验代号所需日志均已复制。`divergence` 时最新复制的日志还须与在线归档逐字节一致
pub(crate) async fn check_logs(cfg: &Cfg, head: &GenHead, divergence: bool) -> Result<()> {
  if !head.logs_copied {
    return Err(Error::MissingLogs(format!(
      "generation {} has no copied logs",
      head.gen_id
    )));
  }
  let (min, max) = (head.log_min, head.log_max);
  if min == 0 {
    return Ok(());
  }
  let dir = cfg.gen_log_dir(head.gen_id);
  for lgen in min..=max {
    let p = cfg.archive_log(&dir, lgen);
    if !p.exists() {
      return Err(Error::MissingLogs(p.display().to_string()));
    }
  }
  if divergence {
    let live = cfg.archive_log(&cfg.log_dir, max);
    if !live.exists() {
      return Err(Error::CannotDetermineDivergence(live.display().to_string()));
    }
    if !same_content(&cfg.archive_log(&dir, max), &live).await? {
      return Err(Error::LogDivergence(live.display().to_string()));
    }
  }
  Ok(())
}
