//! Revert checkpoint value and log position
//! 回滚检查点与日志位置

use zerocopy::{
  FromBytes, FromZeros, IntoBytes,
  little_endian::{U32, U64},
};

use crate::{
  Reason,
  disk::CkpDisk,
  error::{Error, Result},
};

/// Encoded checkpoint length
/// 编码后检查点长度
pub const CKP_LEN: usize = size_of::<CkpDisk>();

/// File type tag of the checkpoint file
/// 检查点文件类型标记
pub const FILE_TYPE_CKP: u8 = 0x43;

/// Position in the log, ordered by generation then segment
/// 日志位置，先按代号再按段排序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos {
  pub gen_id: u32,
  pub seg: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CkpState {
  #[default]
  None = 0,
  InProgress = 1,
  CopyingLogs = 2,
  Completed = 3,
}

impl CkpState {
  #[inline]
  pub fn from_u8(v: u8) -> Self {
    match v {
      1 => Self::InProgress,
      2 => Self::CopyingLogs,
      3 => Self::Completed,
      _ => Self::None,
    }
  }
}

/// Durable progress of a revert
/// 回滚的持久化进度
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertCkp {
  pub file_type: u8,
  pub create: u64,
  pub state: CkpState,
  /// Last generation started
  /// 最近开始应用的代号
  pub pos: Pos,
  /// Creation time of the generation at `pos`
  /// `pos` 所在代号的创建时间
  pub tm_create_current: u64,
  pub sec_in_revert: u64,
  pub pages_reverted: u64,
  /// Log range of all touched databases at revert start
  /// 回滚开始时所有相关数据库的日志范围
  pub log_min_start: u32,
  pub log_max_start: u32,
  pub tm_execute_begin: u64,
}

impl RevertCkp {
  pub fn encode(&self) -> Vec<u8> {
    let mut d = CkpDisk::new_zeroed();
    d.file_type = self.file_type;
    d.state = self.state as u8;
    d.create = U64::new(self.create);
    d.pos_gen = U32::new(self.pos.gen_id);
    d.pos_seg = U32::new(self.pos.seg);
    d.tm_create_current = U64::new(self.tm_create_current);
    d.sec_in_revert = U64::new(self.sec_in_revert);
    d.pages_reverted = U64::new(self.pages_reverted);
    d.log_min_start = U32::new(self.log_min_start);
    d.log_max_start = U32::new(self.log_max_start);
    d.tm_execute_begin = U64::new(self.tm_execute_begin);
    d.as_bytes().to_vec()
  }

  pub fn decode(buf: &[u8]) -> Result<Self> {
    let d = CkpDisk::read_from_prefix(buf)
      .map_err(|_| Error::corrupt(Reason::Truncated, 0))?
      .0;
    Ok(Self {
      file_type: d.file_type,
      create: d.create.get(),
      state: CkpState::from_u8(d.state),
      pos: Pos {
        gen_id: d.pos_gen.get(),
        seg: d.pos_seg.get(),
      },
      tm_create_current: d.tm_create_current.get(),
      sec_in_revert: d.sec_in_revert.get(),
      pages_reverted: d.pages_reverted.get(),
      log_min_start: d.log_min_start.get(),
      log_max_start: d.log_max_start.get(),
      tm_execute_begin: d.tm_execute_begin.get(),
    })
  }
}
