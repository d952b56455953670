//! Database header value as carried in `DbHdr` records
//! `DbHdr` 记录携带的数据库头部

use zerocopy::{
  FromBytes, FromZeros, IntoBytes,
  little_endian::{U32, U64},
};

use crate::{
  Reason,
  disk::DbHeadDisk,
  error::{Error, Result},
  head::Sign,
};

/// Encoded database header length
/// 编码后数据库头部长度
pub const DB_HEAD_LEN: usize = size_of::<DbHeadDisk>();

/// Database lifecycle state
/// 数据库生命周期状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum DbState {
  #[default]
  JustCreated = 1,
  DirtyShutdown = 2,
  CleanShutdown = 3,
  DirtyAndPatched = 4,
  RevertInProgress = 5,
}

impl DbState {
  #[inline]
  pub fn from_u8(v: u8) -> Result<Self> {
    Ok(match v {
      1 => Self::JustCreated,
      2 => Self::DirtyShutdown,
      3 => Self::CleanShutdown,
      4 => Self::DirtyAndPatched,
      5 => Self::RevertInProgress,
      _ => return Err(Error::UnknownDbState(v)),
    })
  }

  /// Open without a clean shutdown
  /// 未干净关闭
  #[inline]
  pub fn is_dirty(self) -> bool {
    matches!(self, Self::DirtyShutdown | Self::DirtyAndPatched)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbHead {
  pub state: DbState,
  pub page_size: u32,
  /// Current dbtime of the database
  /// 数据库当前 dbtime
  pub dbtime: u64,
  /// Transaction log range needed for recovery
  /// 恢复所需的事务日志范围
  pub gen_min_required: u32,
  pub gen_max_required: u32,
  pub gen_last_consistent: u32,
  pub gen_max_committed: u32,
  pub sign_db: Sign,
  pub sign_db_hdr_flush: Sign,
  pub sign_rbs_hdr_flush: Sign,
  pub revert_count: u32,
  pub revert_page_count: u64,
  pub revert_from: u64,
  pub revert_to: u64,
  pub commit_before_revert: u32,
}

impl DbHead {
  pub fn encode(&self) -> Vec<u8> {
    let mut d = DbHeadDisk::new_zeroed();
    d.state = self.state as u8;
    d.page_size = U32::new(self.page_size);
    d.dbtime = U64::new(self.dbtime);
    d.gen_min_required = U32::new(self.gen_min_required);
    d.gen_max_required = U32::new(self.gen_max_required);
    d.gen_last_consistent = U32::new(self.gen_last_consistent);
    d.gen_max_committed = U32::new(self.gen_max_committed);
    d.sign_db = self.sign_db.to_disk();
    d.sign_db_hdr_flush = self.sign_db_hdr_flush.to_disk();
    d.sign_rbs_hdr_flush = self.sign_rbs_hdr_flush.to_disk();
    d.revert_count = U32::new(self.revert_count);
    d.revert_page_count = U64::new(self.revert_page_count);
    d.revert_from = U64::new(self.revert_from);
    d.revert_to = U64::new(self.revert_to);
    d.commit_before_revert = U32::new(self.commit_before_revert);
    d.as_bytes().to_vec()
  }

  pub fn decode(buf: &[u8]) -> Result<Self> {
    let d = DbHeadDisk::read_from_prefix(buf)
      .map_err(|_| Error::corrupt(Reason::Truncated, 0))?
      .0;
    Ok(Self {
      state: DbState::from_u8(d.state)?,
      page_size: d.page_size.get(),
      dbtime: d.dbtime.get(),
      gen_min_required: d.gen_min_required.get(),
      gen_max_required: d.gen_max_required.get(),
      gen_last_consistent: d.gen_last_consistent.get(),
      gen_max_committed: d.gen_max_committed.get(),
      sign_db: Sign::from_disk(&d.sign_db),
      sign_db_hdr_flush: Sign::from_disk(&d.sign_db_hdr_flush),
      sign_rbs_hdr_flush: Sign::from_disk(&d.sign_rbs_hdr_flush),
      revert_count: d.revert_count.get(),
      revert_page_count: d.revert_page_count.get(),
      revert_from: d.revert_from.get(),
      revert_to: d.revert_to.get(),
      commit_before_revert: d.commit_before_revert.get(),
    })
  }
}
