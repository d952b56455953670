//! Active buffer: packs records into sealed segments
//! 活动缓冲区：将记录打包进已封口的段
//!
//! A record that fits the room left in the segment is copied whole. Otherwise
//! a `FragBegin` takes what fits and `FragContinue` records carry the rest, each
//! at the start of a fresh segment. A segment is closed (zero tail, header
//! sealed) once its room drops to a `FragBegin` header or less.
//! 放得下的记录整条复制，否则 FragBegin 装入能放下的部分，
//! 其余由每段开头的 FragContinue 承载。段剩余空间不超过 FragBegin 头部时封口

use crate::{
  rec::{FRAG_BEGIN_HEAD, FRAG_CONTINUE_HEAD, frag_head},
  seg::{SEG_HEAD, seal},
};

#[derive(Debug)]
pub struct SegBuf {
  seg_size: usize,
  /// Ordinal of the first segment
  /// 首段序号
  first: u32,
  data: Vec<u8>,
  /// Next free byte in `data`
  /// `data` 中下一个空闲字节
  off: usize,
}

impl SegBuf {
  pub fn new(first: u32, segs: usize, seg_size: usize) -> Self {
    Self {
      seg_size,
      first,
      data: vec![0; segs * seg_size],
      off: SEG_HEAD,
    }
  }

  #[inline]
  pub fn first(&self) -> u32 {
    self.first
  }

  #[inline]
  pub fn segs(&self) -> u32 {
    (self.data.len() / self.seg_size) as u32
  }

  /// Segment the next byte goes to
  /// 下一个字节所在段
  #[inline]
  pub fn cur_seg(&self) -> u32 {
    self.seg_at(self.off.min(self.data.len() - 1))
  }

  /// No room left for anything
  /// 没有剩余空间
  #[inline]
  pub fn is_full(&self) -> bool {
    self.off >= self.data.len()
  }

  /// Nothing packed yet
  /// 尚未写入任何记录
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.off == SEG_HEAD
  }

  #[inline]
  fn seg_at(&self, off: usize) -> u32 {
    self.first + (off / self.seg_size) as u32
  }

  /// Zero the tail of the current segment, seal it and move to the next one
  /// 清零当前段尾部，封口并移到下一段
  fn close(&mut self, now: u64) {
    let start = (self.off - 1) / self.seg_size * self.seg_size;
    let end = start + self.seg_size;
    self.data[self.off..end].fill(0);
    let ordinal = self.seg_at(start);
    seal(&mut self.data[start..end], ordinal, now);
    self.off = if end >= self.data.len() {
      self.data.len()
    } else {
      end + SEG_HEAD
    };
  }

  #[inline]
  fn room(&self) -> usize {
    self.seg_size - self.off % self.seg_size
  }

  fn copy(&mut self, src: &[u8]) {
    self.data[self.off..self.off + src.len()].copy_from_slice(src);
    self.off += src.len();
  }

  /// Pack `rec[done..]`, return bytes of `rec` placed so far and the segment
  /// holding the last byte placed. Stops early when the buffer fills up.
  /// 打包 `rec[done..]`，返回已放置字节数与最后一个字节所在段。缓冲区满时提前返回
  pub fn put(&mut self, rec: &[u8], mut done: usize, now: u64) -> (usize, u32) {
    let mut last = self.seg_at(self.off);
    while done < rec.len() && !self.is_full() {
      let room = self.room();
      last = self.seg_at(self.off);
      if done == 0 {
        if rec.len() <= room {
          self.copy(rec);
          done = rec.len();
        } else if room > FRAG_BEGIN_HEAD {
          let n = room - FRAG_BEGIN_HEAD;
          let mut head = [0u8; FRAG_BEGIN_HEAD];
          frag_head(&mut head, Some(rec.len()), room);
          self.copy(&head);
          self.copy(&rec[..n]);
          done = n;
        } else {
          self.close(now);
          continue;
        }
      } else {
        let n = (rec.len() - done).min(room - FRAG_CONTINUE_HEAD);
        let mut head = [0u8; FRAG_CONTINUE_HEAD];
        frag_head(&mut head, None, FRAG_CONTINUE_HEAD + n);
        self.copy(&head);
        self.copy(&rec[done..done + n]);
        done += n;
      }
      if self.room() <= FRAG_BEGIN_HEAD || self.off % self.seg_size == 0 {
        self.close(now);
      }
    }
    (done, last)
  }

  /// Close a partly filled segment, return bytes ready to write.
  /// 0 when nothing was packed.
  /// 封口未满的段，返回可写字节数。无内容时为 0
  pub fn seal_tail(&mut self, now: u64) -> usize {
    if self.is_full() {
      return self.data.len();
    }
    if self.off % self.seg_size == SEG_HEAD {
      return self.off - SEG_HEAD;
    }
    self.close(now);
    if self.is_full() {
      self.data.len()
    } else {
      self.off - SEG_HEAD
    }
  }

  /// Bytes of the packed segments
  /// 已打包段的字节
  #[inline]
  pub fn bytes(&self, valid: usize) -> &[u8] {
    &self.data[..valid]
  }

  #[inline]
  pub fn into_data(mut self, valid: usize) -> Vec<u8> {
    self.data.truncate(valid);
    self.data
  }
}
