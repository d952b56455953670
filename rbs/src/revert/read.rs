//! Sequential record reader over one generation file
//! 单个代号文件的顺序记录读取器

use compio_fs::File;
use rbs_codec::{
  GenHead, Rec, Reason, Unpack,
  head::HEAD_AREA,
  seg::{seg_of, seg_off},
};
use rbs_fs::fs;

use crate::Result;

/// Segments read per chunk / 每块读取的段数
const CHUNK_SEGS: u32 = 64;

pub struct GenReader<'a> {
  file: &'a File,
  seg_size: usize,
  next: u32,
  end: u32,
  unpack: Unpack,
}

impl<'a> GenReader<'a> {
  /// Reader over the durably flushed part of the generation
  /// 读取代号中已持久化的部分
  pub fn new(file: &'a File, head: &GenHead) -> Self {
    let seg_size = head.seg_size as usize;
    Self {
      file,
      seg_size,
      next: seg_of(HEAD_AREA, seg_size),
      end: seg_of(head.logical_size.max(HEAD_AREA), seg_size),
      unpack: Unpack::new(seg_size),
    }
  }

  pub async fn next(&mut self) -> Result<Option<(Rec, u32)>> {
    loop {
      if let Some(r) = self.unpack.next()? {
        return Ok(Some(r));
      }
      if self.next >= self.end {
        if self.unpack.in_frag() {
          return Err(rbs_codec::Error::corrupt(Reason::Truncated, self.end).into());
        }
        return Ok(None);
      }
      let n = CHUNK_SEGS.min(self.end - self.next);
      let chunk = fs::read_at(
        self.file,
        seg_off(self.next, self.seg_size),
        n as usize * self.seg_size,
      )
      .await?;
      self.unpack.load(self.next, chunk);
      self.next += n;
    }
  }
}
