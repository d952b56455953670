//! Disk format structures
//! 磁盘格式结构体

use zerocopy::{
  FromBytes, Immutable, IntoBytes, KnownLayout,
  little_endian::{U16, U32, U64},
};

use crate::head::{ATTACH_MAX, NAME_MAX};

/// Rotating signature on disk
/// 磁盘上的轮换签名
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Clone, Copy)]
#[repr(C)]
pub(crate) struct SignDisk {
  pub id: U64,
  pub time: U64,
}

/// Segment header: ordinal, crc, time
/// 段头：序号、校验、时间
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct SegDisk {
  pub ordinal: U32,
  pub crc: U32,
  pub time: U64,
}

/// Record prefix: kind + total length
/// 记录前缀：类型 + 总长度
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct RecPrefix {
  pub kind: u8,
  pub len: U16,
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Clone, Copy)]
#[repr(C)]
pub(crate) struct AttachDisk {
  pub present: u8,
  pub name_len: u8,
  pub gen_min: U32,
  pub gen_max: U32,
  pub dbtime_dirtied: U64,
  pub dbtime_prev_dirtied: U64,
  pub sign_db: SignDisk,
  pub sign_db_hdr_flush: SignDisk,
  pub name: [u8; NAME_MAX],
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct HeadDisk {
  pub file_type: u8,
  pub logs_copied: u8,
  pub invalid: u8,
  pub ver_major: U32,
  pub ver_minor: U32,
  pub page_size: U32,
  pub seg_size: U32,
  pub logical_size: U64,
  pub gen_id: U32,
  pub log_min: U32,
  pub log_max: U32,
  pub create: U64,
  pub prev_create: U64,
  pub attach_tm: U64,
  pub detach_tm: U64,
  pub flush_tm: U64,
  pub sign: SignDisk,
  pub attach: [AttachDisk; ATTACH_MAX],
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct DbHeadDisk {
  pub state: u8,
  pub page_size: U32,
  pub dbtime: U64,
  pub gen_min_required: U32,
  pub gen_max_required: U32,
  pub gen_last_consistent: U32,
  pub gen_max_committed: U32,
  pub sign_db: SignDisk,
  pub sign_db_hdr_flush: SignDisk,
  pub sign_rbs_hdr_flush: SignDisk,
  pub revert_count: U32,
  pub revert_page_count: U64,
  pub revert_from: U64,
  pub revert_to: U64,
  pub commit_before_revert: U32,
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct CkpDisk {
  pub file_type: u8,
  pub state: u8,
  pub create: U64,
  pub pos_gen: U32,
  pub pos_seg: U32,
  pub tm_create_current: U64,
  pub sec_in_revert: U64,
  pub pages_reverted: U64,
  pub log_min_start: U32,
  pub log_max_start: U32,
  pub tm_execute_begin: U64,
}
