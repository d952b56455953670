//! Record shapes
//! 记录格式
//!
//! Every record but `Nop` starts with `kind: u8, len: u16` where `len` counts
//! the whole record. A zero byte is `Nop`: the rest of the segment is padding.
//! 除 Nop 外每条记录以 kind + len 开头，len 为整条记录长度。
//! 零字节为 Nop：段的剩余部分是填充

use zerocopy::{FromBytes, IntoBytes, little_endian::U16};

use crate::{
  Reason,
  db_head::DbHead,
  disk::RecPrefix,
  error::{Error, Result},
};

pub const KIND_NOP: u8 = 0;
pub const KIND_DB_HDR: u8 = 1;
pub const KIND_DB_ATTACH: u8 = 2;
pub const KIND_DB_PAGE: u8 = 3;
pub const KIND_DB_NEW_PAGE: u8 = 4;
pub const KIND_FRAG_BEGIN: u8 = 5;
pub const KIND_FRAG_CONTINUE: u8 = 6;

/// kind + len
pub const PREFIX: usize = size_of::<RecPrefix>();

/// FragBegin header: prefix + total length
/// FragBegin 头部：前缀 + 总长度
pub const FRAG_BEGIN_HEAD: usize = PREFIX + 4;

/// FragContinue header
/// FragContinue 头部
pub const FRAG_CONTINUE_HEAD: usize = PREFIX;

/// DbPage header: prefix + dbid + pgno + flags
/// DbPage 头部
pub const DB_PAGE_HEAD: usize = PREFIX + 1 + 4 + 1;

/// Largest whole record
/// 单条记录最大长度
pub const REC_MAX: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rec {
  /// Database header at attach time
  /// 附加时的数据库头部
  DbHdr { dbid: u8, head: DbHead },
  /// Binds dbid to a database path
  /// 将 dbid 绑定到数据库路径
  DbAttach { dbid: u8, name: String },
  /// Page pre-image, `flags` from [`crate::preimage::capture`]
  /// 页前像
  DbPage {
    dbid: u8,
    pgno: u32,
    flags: u8,
    data: Vec<u8>,
  },
  /// Freshly allocated page, no pre-image
  /// 新分配的页，无前像
  DbNewPage { dbid: u8, pgno: u32 },
}

#[inline]
fn put_prefix(out: &mut Vec<u8>, kind: u8) {
  out.extend_from_slice(
    RecPrefix {
      kind,
      len: U16::ZERO,
    }
    .as_bytes(),
  );
}

/// Read `(kind, len)` at the start of `buf`
/// 读取 `buf` 开头的 (kind, len)
#[inline]
pub fn prefix(buf: &[u8]) -> Option<(u8, usize)> {
  RecPrefix::read_from_prefix(buf)
    .ok()
    .map(|(p, _)| (p.kind, p.len.get() as usize))
}

/// Encode FragBegin / FragContinue header into `out`
/// 将 FragBegin / FragContinue 头部写入 `out`
pub fn frag_head(out: &mut [u8], total: Option<usize>, len: usize) {
  let kind = if total.is_some() {
    KIND_FRAG_BEGIN
  } else {
    KIND_FRAG_CONTINUE
  };
  out[0] = kind;
  out[1..PREFIX].copy_from_slice(&(len as u16).to_le_bytes());
  if let Some(total) = total {
    out[PREFIX..FRAG_BEGIN_HEAD].copy_from_slice(&(total as u32).to_le_bytes());
  }
}

impl Rec {
  #[inline]
  pub fn kind(&self) -> u8 {
    match self {
      Self::DbHdr { .. } => KIND_DB_HDR,
      Self::DbAttach { .. } => KIND_DB_ATTACH,
      Self::DbPage { .. } => KIND_DB_PAGE,
      Self::DbNewPage { .. } => KIND_DB_NEW_PAGE,
    }
  }

  #[inline]
  pub fn dbid(&self) -> u8 {
    match self {
      Self::DbHdr { dbid, .. }
      | Self::DbAttach { dbid, .. }
      | Self::DbPage { dbid, .. }
      | Self::DbNewPage { dbid, .. } => *dbid,
    }
  }

  /// Encode the whole record, prefix included
  /// 编码整条记录，包含前缀
  pub fn encode(&self) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    put_prefix(&mut out, self.kind());
    out.push(self.dbid());
    match self {
      Self::DbHdr { head, .. } => out.extend_from_slice(&head.encode()),
      Self::DbAttach { name, .. } => {
        if name.len() > crate::head::NAME_MAX {
          return Err(Error::NameTooLong(name.len()));
        }
        out.extend_from_slice(name.as_bytes())
      }
      Self::DbPage {
        pgno, flags, data, ..
      } => {
        out.extend_from_slice(&pgno.to_le_bytes());
        out.push(*flags);
        out.extend_from_slice(data);
      }
      Self::DbNewPage { pgno, .. } => out.extend_from_slice(&pgno.to_le_bytes()),
    }
    if out.len() > REC_MAX {
      return Err(Error::Corrupt {
        reason: Reason::RecordTooLong,
        seg: 0,
      });
    }
    let len = (out.len() as u16).to_le_bytes();
    out[1..PREFIX].copy_from_slice(&len);
    Ok(out)
  }

  /// Decode one whole record; `seg` is only used for error reports
  /// 解码一条完整记录；`seg` 仅用于错误报告
  pub fn decode(buf: &[u8], seg: u32) -> Result<Self> {
    let Some((kind, len)) = prefix(buf) else {
      return Err(Error::corrupt(Reason::Truncated, seg));
    };
    if len != buf.len() {
      return Err(Error::corrupt(Reason::RecordTooLong, seg));
    }
    let need = match kind {
      KIND_DB_HDR => PREFIX + 1 + crate::db_head::DB_HEAD_LEN,
      KIND_DB_ATTACH => PREFIX + 1,
      KIND_DB_PAGE => DB_PAGE_HEAD,
      KIND_DB_NEW_PAGE => PREFIX + 5,
      _ => return Err(Error::corrupt(Reason::UnknownRecType, seg)),
    };
    if len < need {
      return Err(Error::corrupt(Reason::Truncated, seg));
    }
    let dbid = buf[PREFIX];
    let body = &buf[PREFIX + 1..];
    let pgno = || u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    Ok(match kind {
      KIND_DB_HDR => Self::DbHdr {
        dbid,
        head: DbHead::decode(body)?,
      },
      KIND_DB_ATTACH => Self::DbAttach {
        dbid,
        name: String::from_utf8_lossy(body).into_owned(),
      },
      KIND_DB_PAGE => Self::DbPage {
        dbid,
        pgno: pgno(),
        flags: body[4],
        data: body[5..].to_vec(),
      },
      _ => Self::DbNewPage { dbid, pgno: pgno() },
    })
  }
}
