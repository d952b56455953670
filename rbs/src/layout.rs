//! On-disk names
//! 磁盘文件命名
//!
//! ```text
//! <root>/RBS<base><gen>/<base><gen>.rbs
//! <root>/RBS<base><gen>/logs/<base><lgen>.log
//! <root>/RBS<base>.chk
//! <root>/<base>.RBSRC.RAW[.Prev]
//! ```

use std::path::{Path, PathBuf};

use rbs_fs::encode_gen;

use crate::{Cfg, Result};

pub const DIR_PREFIX: &str = "RBS";
pub const EXT: &str = "rbs";
pub const LOG_SUBDIR: &str = "logs";
pub const LOG_EXT: &str = "log";
pub const CKP_EXT: &str = "chk";
pub const TRACE_SUFFIX: &str = "RBSRC.RAW";
pub const TRACE_PREV: &str = "Prev";

impl Cfg {
  /// Prefix of generation dirs
  /// 代号目录前缀
  #[inline]
  pub fn prefix(&self) -> String {
    format!("{DIR_PREFIX}{}", self.base)
  }

  #[inline]
  pub fn gen_dir(&self, gen_id: u32) -> PathBuf {
    self.root.join(format!("{}{}", self.prefix(), encode_gen(gen_id)))
  }

  #[inline]
  pub fn gen_file(&self, gen_id: u32) -> PathBuf {
    self
      .gen_dir(gen_id)
      .join(format!("{}{}.{EXT}", self.base, encode_gen(gen_id)))
  }

  /// Copied transaction logs of a generation
  /// 代号复制的事务日志目录
  #[inline]
  pub fn gen_log_dir(&self, gen_id: u32) -> PathBuf {
    self.gen_dir(gen_id).join(LOG_SUBDIR)
  }

  /// Revert checkpoint
  /// 回滚检查点
  #[inline]
  pub fn ckp_path(&self) -> PathBuf {
    self.root.join(format!("{}.{CKP_EXT}", self.prefix()))
  }

  /// Host checkpoint, removed after a revert
  /// 宿主检查点，回滚后删除
  #[inline]
  pub fn sys_ckp_path(&self) -> PathBuf {
    self.sys_dir.join(format!("{}.{CKP_EXT}", self.base))
  }

  #[inline]
  pub fn trace_path(&self) -> PathBuf {
    self.root.join(format!("{}.{TRACE_SUFFIX}", self.base))
  }

  #[inline]
  pub fn trace_prev_path(&self) -> PathBuf {
    self
      .root
      .join(format!("{}.{TRACE_SUFFIX}.{TRACE_PREV}", self.base))
  }

  /// Archived transaction log `lgen` in `dir`
  /// `dir` 中归档的事务日志 `lgen`
  #[inline]
  pub fn archive_log(&self, dir: &Path, lgen: u32) -> PathBuf {
    dir.join(format!("{}{}.{LOG_EXT}", self.base, encode_gen(lgen)))
  }

  /// Current transaction log in `dir`
  /// `dir` 中当前事务日志
  #[inline]
  pub fn current_log(&self, dir: &Path) -> PathBuf {
    dir.join(format!("{}.{LOG_EXT}", self.base))
  }

  /// Lowest and highest generation on disk
  /// 磁盘上最低与最高代号
  #[inline]
  pub fn gen_range(&self) -> Result<Option<(u32, u32)>> {
    Ok(rbs_fs::gen_range(&self.root, &self.prefix())?)
  }
}
