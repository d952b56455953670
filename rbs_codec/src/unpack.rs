//! Segment reader: validates segments and reassembles fragments
//! 段读取器：校验段并重组分片
//!
//! Fed with chunks of whole segments in order. A fragment left open at the
//! end of a chunk carries over to the next one.
//! 按顺序送入由完整段组成的块。块末尾未完成的分片延续到下一块

use log::warn;

use crate::{
  Reason,
  error::{Error, Result},
  rec::{
    FRAG_BEGIN_HEAD, FRAG_CONTINUE_HEAD, KIND_FRAG_BEGIN, KIND_FRAG_CONTINUE, KIND_NOP, PREFIX,
    Rec, prefix,
  },
  seg::{SEG_HEAD, verify},
};

#[derive(Debug)]
struct Frag {
  buf: Vec<u8>,
  left: usize,
  /// Segment of the FragBegin
  /// FragBegin 所在段
  seg: u32,
}

#[derive(Debug)]
pub struct Unpack {
  seg_size: usize,
  first: u32,
  chunk: Vec<u8>,
  off: usize,
  frag: Option<Frag>,
}

impl Unpack {
  pub fn new(seg_size: usize) -> Self {
    Self {
      seg_size,
      first: 1,
      chunk: Vec::new(),
      off: 0,
      frag: None,
    }
  }

  /// Start on a new chunk whose first segment is `first`
  /// 开始读取首段为 `first` 的新块
  pub fn load(&mut self, first: u32, chunk: Vec<u8>) {
    self.first = first;
    self.chunk = chunk;
    self.off = 0;
  }

  /// A fragmented record is still open
  /// 仍有未完成的分片记录
  #[inline]
  pub fn in_frag(&self) -> bool {
    self.frag.is_some()
  }

  /// Give back the chunk buffer for reuse
  /// 归还块缓冲区以便复用
  #[inline]
  pub fn take_chunk(&mut self) -> Vec<u8> {
    std::mem::take(&mut self.chunk)
  }

  /// Next record with the segment it starts in; None when the chunk is used up
  /// 下一条记录及其起始段；块读完返回 None
  pub fn next(&mut self) -> Result<Option<(Rec, u32)>> {
    let seg_size = self.seg_size;
    loop {
      if self.off >= self.chunk.len() {
        return Ok(None);
      }
      let so = self.off % seg_size;
      let seg = self.first + (self.off / seg_size) as u32;
      if so == 0 {
        let end = (self.off + seg_size).min(self.chunk.len());
        verify(&self.chunk[self.off..end], seg)?;
        self.off += SEG_HEAD;
        continue;
      }
      let kind = self.chunk[self.off];
      if kind == KIND_NOP {
        self.off += seg_size - so;
        continue;
      }
      let len = match prefix(&self.chunk[self.off..]) {
        Some((_, len)) if so + PREFIX <= seg_size => len,
        _ => return Err(Error::corrupt(Reason::RecordTooLong, seg)),
      };
      if len < PREFIX || so + len > seg_size {
        return Err(Error::corrupt(Reason::RecordTooLong, seg));
      }
      // A fragment whose tail was never flushed is followed by whatever was
      // appended after reopening, always at a segment start
      if kind != KIND_FRAG_CONTINUE
        && so == SEG_HEAD
        && let Some(orphan) = self.frag.take()
      {
        warn!(
          "drop unfinished record from segment {}, {} bytes missing",
          orphan.seg, orphan.left
        );
      }
      let start = self.off;
      self.off += len;
      let body = &self.chunk[start..start + len];
      match kind {
        KIND_FRAG_BEGIN => {
          if len < FRAG_BEGIN_HEAD || self.frag.is_some() {
            return Err(Error::corrupt(Reason::FragBeginTooLong, seg));
          }
          let total =
            u32::from_le_bytes([body[3], body[4], body[5], body[6]]) as usize;
          let part = &body[FRAG_BEGIN_HEAD..];
          if total <= part.len() {
            return Err(Error::corrupt(Reason::FragBeginTooLong, seg));
          }
          let mut buf = Vec::with_capacity(total);
          buf.extend_from_slice(part);
          self.frag = Some(Frag {
            buf,
            left: total - part.len(),
            seg,
          });
        }
        KIND_FRAG_CONTINUE => {
          let part = &body[FRAG_CONTINUE_HEAD..];
          let Some(frag) = self.frag.as_mut() else {
            return Err(Error::corrupt(Reason::FragContinueTooLong, seg));
          };
          if frag.left < part.len() {
            return Err(Error::corrupt(Reason::FragContinueTooLong, seg));
          }
          frag.buf.extend_from_slice(part);
          frag.left -= part.len();
          if frag.left == 0
            && let Some(frag) = self.frag.take()
          {
            return Ok(Some((Rec::decode(&frag.buf, frag.seg)?, frag.seg)));
          }
        }
        _ => {
          if self.frag.is_some() {
            return Err(Error::corrupt(Reason::Truncated, seg));
          }
          return Ok(Some((Rec::decode(body, seg)?, seg)));
        }
      }
    }
  }
}
