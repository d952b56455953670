//! Revert trace: one line per page written back, size-rotated
//! 回滚跟踪：每个写回的页一行，按大小轮换

use std::{io::Write, path::PathBuf};

use compio::BufResult;
use compio_fs::File;
use rbs_fs::fs;

use crate::{Cfg, Result};

pub struct Trace {
  path: PathBuf,
  prev: PathBuf,
  max: u64,
  file: File,
  len: u64,
  buf: Vec<u8>,
}

fn remove(path: &PathBuf) -> std::io::Result<()> {
  match std::fs::remove_file(path) {
    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
    _ => Ok(()),
  }
}

impl Trace {
  /// Open for appending; `fresh` drops traces of earlier reverts
  /// 以追加方式打开；`fresh` 时删除之前回滚的跟踪
  pub async fn open(cfg: &Cfg, fresh: bool) -> Result<Self> {
    let path = cfg.trace_path();
    let prev = cfg.trace_prev_path();
    if fresh {
      remove(&path)?;
      remove(&prev)?;
    }
    let file = fs::open_read_write_create(&path).await?;
    let len = fs::file_len(&file).await?;
    Ok(Self {
      path,
      prev,
      max: cfg.trace_max,
      file,
      len,
      buf: Vec::new(),
    })
  }

  #[inline]
  pub fn line(&mut self, line: std::fmt::Arguments<'_>) {
    let _ = self.buf.write_fmt(line);
    self.buf.push(b'\n');
  }

  #[inline]
  pub fn page(&mut self, pgno: u32, dbtime: u64) {
    self.line(format_args!("Pg {pgno},{dbtime}"));
  }

  pub async fn flush(&mut self) -> Result<()> {
    if self.buf.is_empty() {
      return Ok(());
    }
    if self.len > 0 && self.len + self.buf.len() as u64 > self.max {
      remove(&self.prev)?;
      std::fs::rename(&self.path, &self.prev)?;
      self.file = fs::open_read_write_create(&self.path).await?;
      self.len = 0;
    }
    let buf = std::mem::take(&mut self.buf);
    let n = buf.len() as u64;
    let BufResult(res, mut back) = fs::write_at(&mut self.file, buf, self.len).await;
    res?;
    self.len += n;
    back.clear();
    self.buf = back;
    Ok(())
  }
}
