//! Generation header and attach table
//! 代号头部与附加表
//!
//! Stored in two shadowed slots of [`HEAD_SLOT`] bytes at the start of the file.
//! 存于文件开头两个 [`HEAD_SLOT`] 字节的影子槽位

use zerocopy::{
  FromBytes, FromZeros, IntoBytes,
  little_endian::{U32, U64},
};

use crate::{
  Reason,
  disk::{AttachDisk, HeadDisk, SignDisk},
  error::{Error, Result},
};

/// One header slot
/// 单个头部槽位
pub const HEAD_SLOT: usize = 8192;

/// Primary + shadow slot, segments start here
/// 主槽 + 影子槽，段从此处开始
pub const HEAD_AREA: u64 = 2 * HEAD_SLOT as u64;

/// Encoded header length
/// 编码后头部长度
pub const HEAD_LEN: usize = size_of::<HeadDisk>();

/// File type tag of a generation file
/// 代号文件类型标记
pub const FILE_TYPE_RBS: u8 = 0x52;

pub const VER_MAJOR: u32 = 1;
pub const VER_MINOR: u32 = 0;

/// Databases per generation
/// 每个代号的数据库数量上限
pub const ATTACH_MAX: usize = 16;

/// Longest database path in bytes
/// 数据库路径最大字节数
pub const NAME_MAX: usize = 255;

/// Rotating signature, all zero means unset
/// 轮换签名，全零表示未设置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Sign {
  pub id: u64,
  pub time: u64,
}

impl Sign {
  #[inline]
  pub fn is_set(&self) -> bool {
    self.id != 0 || self.time != 0
  }

  #[inline]
  pub(crate) fn to_disk(self) -> SignDisk {
    SignDisk {
      id: U64::new(self.id),
      time: U64::new(self.time),
    }
  }

  #[inline]
  pub(crate) fn from_disk(d: &SignDisk) -> Self {
    Self {
      id: d.id.get(),
      time: d.time.get(),
    }
  }
}

/// Per-database entry of a generation
/// 代号中每个数据库的条目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachInfo {
  /// Database file path
  /// 数据库文件路径
  pub name: String,
  /// Required transaction log range at attach
  /// 附加时所需事务日志范围
  pub gen_min: u32,
  pub gen_max: u32,
  /// dbtime when first dirtied in this generation
  /// 本代号中首次变脏时的 dbtime
  pub dbtime_dirtied: u64,
  /// Carried from the previous generation
  /// 从上一代号继承
  pub dbtime_prev_dirtied: u64,
  pub sign_db: Sign,
  pub sign_db_hdr_flush: Sign,
}

impl AttachInfo {
  fn to_disk(&self) -> Result<AttachDisk> {
    let name = self.name.as_bytes();
    if name.len() > NAME_MAX {
      return Err(Error::NameTooLong(name.len()));
    }
    let mut d = AttachDisk::new_zeroed();
    d.present = 1;
    d.name_len = name.len() as u8;
    d.name[..name.len()].copy_from_slice(name);
    d.gen_min = U32::new(self.gen_min);
    d.gen_max = U32::new(self.gen_max);
    d.dbtime_dirtied = U64::new(self.dbtime_dirtied);
    d.dbtime_prev_dirtied = U64::new(self.dbtime_prev_dirtied);
    d.sign_db = self.sign_db.to_disk();
    d.sign_db_hdr_flush = self.sign_db_hdr_flush.to_disk();
    Ok(d)
  }

  fn from_disk(d: &AttachDisk) -> Self {
    let len = (d.name_len as usize).min(NAME_MAX);
    Self {
      name: String::from_utf8_lossy(&d.name[..len]).into_owned(),
      gen_min: d.gen_min.get(),
      gen_max: d.gen_max.get(),
      dbtime_dirtied: d.dbtime_dirtied.get(),
      dbtime_prev_dirtied: d.dbtime_prev_dirtied.get(),
      sign_db: Sign::from_disk(&d.sign_db),
      sign_db_hdr_flush: Sign::from_disk(&d.sign_db_hdr_flush),
    }
  }
}

/// Generation header. Times are unix milliseconds, 0 means unset.
/// 代号头部。时间为 unix 毫秒，0 表示未设置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenHead {
  pub file_type: u8,
  pub ver_major: u32,
  pub ver_minor: u32,
  pub page_size: u32,
  pub seg_size: u32,
  /// Bytes durably flushed, header area included
  /// 已持久化的字节数，包括头部区域
  pub logical_size: u64,
  pub gen_id: u32,
  pub create: u64,
  /// Creation time of the previous generation, 0 for a chain root
  /// 上一代号的创建时间，链根为 0
  pub prev_create: u64,
  pub attach_tm: u64,
  pub detach_tm: u64,
  pub flush_tm: u64,
  pub sign: Sign,
  pub logs_copied: bool,
  pub log_min: u32,
  pub log_max: u32,
  pub invalid: bool,
  /// Index is the dbid used by records
  /// 下标即记录中使用的 dbid
  pub attach: Vec<AttachInfo>,
}

impl GenHead {
  /// Find entry by database path
  /// 按数据库路径查找条目
  #[inline]
  pub fn find(&self, name: &str) -> Option<usize> {
    self.attach.iter().position(|a| a.name == name)
  }

  /// Append entry, return its dbid
  /// 追加条目，返回其 dbid
  pub fn push(&mut self, info: AttachInfo) -> Result<u8> {
    if self.attach.len() >= ATTACH_MAX {
      return Err(Error::AttachFull);
    }
    if info.name.len() > NAME_MAX {
      return Err(Error::NameTooLong(info.name.len()));
    }
    self.attach.push(info);
    Ok((self.attach.len() - 1) as u8)
  }

  pub fn encode(&self) -> Result<Vec<u8>> {
    if self.attach.len() > ATTACH_MAX {
      return Err(Error::AttachFull);
    }
    let mut d = HeadDisk::new_zeroed();
    d.file_type = self.file_type;
    d.logs_copied = self.logs_copied as u8;
    d.invalid = self.invalid as u8;
    d.ver_major = U32::new(self.ver_major);
    d.ver_minor = U32::new(self.ver_minor);
    d.page_size = U32::new(self.page_size);
    d.seg_size = U32::new(self.seg_size);
    d.logical_size = U64::new(self.logical_size);
    d.gen_id = U32::new(self.gen_id);
    d.log_min = U32::new(self.log_min);
    d.log_max = U32::new(self.log_max);
    d.create = U64::new(self.create);
    d.prev_create = U64::new(self.prev_create);
    d.attach_tm = U64::new(self.attach_tm);
    d.detach_tm = U64::new(self.detach_tm);
    d.flush_tm = U64::new(self.flush_tm);
    d.sign = self.sign.to_disk();
    for (slot, a) in d.attach.iter_mut().zip(&self.attach) {
      *slot = a.to_disk()?;
    }
    Ok(d.as_bytes().to_vec())
  }

  pub fn decode(buf: &[u8]) -> Result<Self> {
    let d = HeadDisk::read_from_prefix(buf)
      .map_err(|_| Error::corrupt(Reason::Truncated, 0))?
      .0;
    Ok(Self {
      file_type: d.file_type,
      ver_major: d.ver_major.get(),
      ver_minor: d.ver_minor.get(),
      page_size: d.page_size.get(),
      seg_size: d.seg_size.get(),
      logical_size: d.logical_size.get(),
      gen_id: d.gen_id.get(),
      create: d.create.get(),
      prev_create: d.prev_create.get(),
      attach_tm: d.attach_tm.get(),
      detach_tm: d.detach_tm.get(),
      flush_tm: d.flush_tm.get(),
      sign: Sign::from_disk(&d.sign),
      logs_copied: d.logs_copied != 0,
      log_min: d.log_min.get(),
      log_max: d.log_max.get(),
      invalid: d.invalid != 0,
      attach: d
        .attach
        .iter()
        .take_while(|a| a.present != 0)
        .map(AttachInfo::from_disk)
        .collect(),
    })
  }
}

const _: () = assert!(HEAD_LEN + 4 <= HEAD_SLOT);
