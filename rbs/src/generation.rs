//! One open generation: active buffer, write queue and durable watermarks
//! 一个打开的代号：活动缓冲区、写队列与持久化水位
//!
//! Captures only borrow `buf` for a memory copy. Full buffers are queued and
//! drained in order by a single background task holding the `io` lock; the
//! header's logical size only moves after the bytes are synced.
//! 捕获仅在内存复制期间借用 `buf`。满缓冲区入队，由持有 `io` 锁的单个后台任务按序写出；
//! 头部逻辑大小只在数据同步后推进

use std::{
  cell::{Cell, RefCell},
  collections::VecDeque,
  fs,
  path::{Path, PathBuf},
  rc::Rc,
};

use compio::BufResult;
use compio_fs::File;
use futures::lock::Mutex;
use log::{debug, error, info, warn};
use rbs_codec::{
  AttachInfo, GenHead, Pos, SegBuf, Sign,
  head::{FILE_TYPE_RBS, HEAD_AREA, HEAD_LEN, HEAD_SLOT, VER_MAJOR, VER_MINOR},
  rec::FRAG_BEGIN_HEAD,
  seg::{SEG_HEAD, seg_of, seg_off},
};
use rbs_fs::{fs as rfs, shadow};

use crate::{Cfg, Error, Result, now_ms};

/// Minimum gap between two space usage reports
/// 两次空间使用报告的最小间隔
const SPACE_LOG_MS: u64 = 3_600_000;

/// A retired buffer waiting to be written
/// 等待写出的已退役缓冲区
#[derive(Debug)]
struct Queued {
  first: u32,
  data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Buf {
  active: Option<SegBuf>,
  queue: VecDeque<Queued>,
  /// First segment not yet handed to a retired buffer
  /// 尚未分配给已退役缓冲区的首个段
  next_active: u32,
  write_ing: bool,
}

/// State behind the write lock
/// 写锁保护的状态
struct Io {
  file: File,
  head: GenHead,
  next_write: u32,
  next_flush: u32,
  file_len: u64,
}

impl Io {
  /// Shadow-write the header
  /// 影子写入头部
  async fn write_head(&mut self) -> Result<()> {
    let bin = self.head.encode()?;
    shadow::write(&mut self.file, HEAD_SLOT, &bin).await?;
    Ok(())
  }
}

/// New rotating signature
/// 新的轮换签名
#[inline]
pub(crate) fn new_sign(now: u64) -> Sign {
  Sign {
    id: ider::id(),
    time: now,
  }
}

/// Check type, version and signature of a decoded header
/// 检查已解码头部的类型、版本与签名
pub(crate) fn check_head(head: &GenHead, gen_id: u32) -> Result<()> {
  if head.file_type != FILE_TYPE_RBS {
    return Err(Error::InvalidType(gen_id));
  }
  if head.ver_major != VER_MAJOR || head.ver_minor > VER_MINOR {
    return Err(Error::BadVersion {
      gen_id,
      major: head.ver_major,
      minor: head.ver_minor,
    });
  }
  if !head.sign.is_set() {
    return Err(Error::InvalidSign(gen_id));
  }
  let seg = head.seg_size as usize;
  if head.gen_id != gen_id
    || !seg.is_power_of_two()
    || !(512..=65536).contains(&seg)
    || head.logical_size < HEAD_AREA
  {
    return Err(Error::HeadCorrupt(gen_id));
  }
  Ok(())
}

/// Read and validate the header of the generation file at `path`
/// 读取并校验 `path` 处代号文件的头部
pub(crate) async fn read_head(file: &File, gen_id: u32) -> Result<GenHead> {
  let Some(buf) = shadow::read(file, HEAD_SLOT, HEAD_LEN).await? else {
    return Err(Error::HeadCorrupt(gen_id));
  };
  let head = GenHead::decode(&buf).map_err(|_| Error::HeadCorrupt(gen_id))?;
  check_head(&head, gen_id)?;
  Ok(head)
}

/// Open a generation read-only and load its header
/// 只读打开代号并加载头部
pub(crate) async fn open_head(cfg: &Cfg, gen_id: u32) -> Result<(File, GenHead)> {
  let file = rfs::open_read(cfg.gen_file(gen_id)).await?;
  let head = read_head(&file, gen_id).await?;
  Ok((file, head))
}

pub(crate) struct Gen {
  pub gen_id: u32,
  pub create: u64,
  pub prev_create: u64,
  path: PathBuf,
  seg_size: usize,
  buf_segs: usize,
  extend: u64,
  max_segs: u32,
  sign: Cell<Sign>,
  /// Attach table names, index is dbid
  /// 附加表名称，下标为 dbid
  names: RefCell<Vec<String>>,
  buf: RefCell<Buf>,
  io: Mutex<Io>,
  space_log: Cell<(u64, u64)>,
}

impl Gen {
  fn new(cfg: &Cfg, path: PathBuf, file: File, head: GenHead, file_len: u64) -> Rc<Self> {
    let next = seg_of(head.logical_size, head.seg_size as usize);
    Rc::new(Self {
      gen_id: head.gen_id,
      create: head.create,
      prev_create: head.prev_create,
      path,
      seg_size: head.seg_size as usize,
      buf_segs: cfg.buf_segs,
      extend: cfg.extend,
      max_segs: cfg.max_segs,
      sign: Cell::new(head.sign),
      names: RefCell::new(head.attach.iter().map(|a| a.name.clone()).collect()),
      buf: RefCell::new(Buf {
        next_active: next,
        ..Default::default()
      }),
      space_log: Cell::new((0, head.logical_size)),
      io: Mutex::new(Io {
        file,
        head,
        next_write: next,
        next_flush: next,
        file_len,
      }),
    })
  }

  /// Load an existing generation for appending
  /// 加载已有代号以继续追加
  pub async fn load(cfg: &Cfg, gen_id: u32) -> Result<Rc<Self>> {
    let path = cfg.gen_file(gen_id);
    let file = rfs::open_read_write(&path).await?;
    let head = read_head(&file, gen_id).await?;
    let file_len = rfs::file_len(&file).await?;
    fs::create_dir_all(cfg.gen_log_dir(gen_id))?;
    info!(
      "rbs load generation {gen_id}, logical size {}",
      head.logical_size
    );
    Ok(Self::new(cfg, path, file, head, file_len))
  }

  /// Create a new generation; whatever was created is removed on failure
  /// 创建新代号；失败时删除已创建的内容
  pub async fn create(
    cfg: &Cfg,
    gen_id: u32,
    prev_create: u64,
    attach: Vec<AttachInfo>,
  ) -> Result<Rc<Self>> {
    let dir = cfg.gen_dir(gen_id);
    let new_dir = !dir.exists();
    fs::create_dir_all(&dir)?;
    let path = cfg.gen_file(gen_id);
    match Self::create_in(cfg, &path, gen_id, prev_create, attach).await {
      Ok(g) => {
        info!("rbs create generation {gen_id}, prev create {prev_create}");
        Ok(g)
      }
      Err(e) => {
        warn!("rbs create generation {gen_id}: {e}");
        if new_dir {
          let _ = rbs_fs::rm_dir(&dir);
        } else if !matches!(&e, Error::Io(io) if io.kind() == std::io::ErrorKind::AlreadyExists) {
          let _ = fs::remove_file(&path);
        }
        Err(e)
      }
    }
  }

  async fn create_in(
    cfg: &Cfg,
    path: &Path,
    gen_id: u32,
    prev_create: u64,
    attach: Vec<AttachInfo>,
  ) -> Result<Rc<Self>> {
    let mut file = rfs::create_new(path).await?;
    let now = now_ms();
    let head = GenHead {
      file_type: FILE_TYPE_RBS,
      ver_major: VER_MAJOR,
      ver_minor: VER_MINOR,
      page_size: cfg.page_size as u32,
      seg_size: cfg.seg_size as u32,
      logical_size: HEAD_AREA,
      gen_id,
      create: now,
      prev_create,
      attach_tm: if attach.is_empty() { 0 } else { now },
      sign: new_sign(now),
      attach,
      ..Default::default()
    };
    shadow::write(&mut file, HEAD_SLOT, &head.encode()?).await?;
    fs::create_dir_all(cfg.gen_log_dir(gen_id))?;
    Ok(Self::new(cfg, path.to_path_buf(), file, head, HEAD_AREA))
  }

  #[inline]
  pub fn sign(&self) -> Sign {
    self.sign.get()
  }

  #[inline]
  pub fn dbid(&self, name: &str) -> Option<u8> {
    self
      .names
      .borrow()
      .iter()
      .position(|n| n == name)
      .map(|i| i as u8)
  }

  #[inline]
  pub fn next_active(&self) -> u32 {
    self.buf.borrow().next_active
  }

  /// Copy of the in-memory header
  /// 内存头部的副本
  pub async fn head(&self) -> GenHead {
    self.io.lock().await.head.clone()
  }

  /// Mutate the header under the write lock, then persist it
  /// 在写锁下修改头部并持久化
  pub async fn update_head<R>(&self, f: impl FnOnce(&mut GenHead) -> Result<R>) -> Result<R> {
    let mut io = self.io.lock().await;
    let r = f(&mut io.head)?;
    io.write_head().await?;
    self.sign.set(io.head.sign);
    *self.names.borrow_mut() = io.head.attach.iter().map(|a| a.name.clone()).collect();
    Ok(r)
  }

  fn retire(&self, b: &mut Buf, buf: SegBuf, valid: usize) {
    let first = buf.first();
    b.next_active = first + (valid / self.seg_size) as u32;
    b.queue.push_back(Queued {
      first,
      data: buf.into_data(valid),
    });
  }

  /// Append an encoded record, return the segment holding its last byte
  /// 追加已编码记录，返回其最后一个字节所在段
  pub fn append(self: &Rc<Self>, rec: &[u8]) -> Result<Pos> {
    let now = now_ms();
    let mut guard = self.buf.borrow_mut();
    let b = &mut *guard;
    // Refuse up front so a record is never left half written
    let per_seg = (self.seg_size - SEG_HEAD - FRAG_BEGIN_HEAD) as u64;
    let need = rec.len() as u64 / per_seg + 2;
    let (cur, end) = match &b.active {
      Some(a) => (a.cur_seg() as u64, (a.first() + a.segs()) as u64),
      None => (b.next_active as u64, b.next_active as u64),
    };
    let last = cur + need - 1;
    let top = if last < end {
      end - 1
    } else {
      let segs = self.buf_segs as u64;
      end + (last - end + 1).div_ceil(segs) * segs - 1
    };
    if top > self.max_segs as u64 {
      error!("rbs generation {} out of space at segment {cur}", self.gen_id);
      return Err(Error::OutOfSpace(self.gen_id));
    }
    let mut done = 0;
    let mut queued = false;
    let seg = loop {
      let (next, segs, size) = (b.next_active, self.buf_segs, self.seg_size);
      let act = b.active.get_or_insert_with(|| SegBuf::new(next, segs, size));
      let (d, last) = act.put(rec, done, now);
      done = d;
      if act.is_full()
        && let Some(full) = b.active.take()
      {
        let valid = full.segs() as usize * self.seg_size;
        self.retire(b, full, valid);
        queued = true;
      }
      if done == rec.len() {
        break last;
      }
    };
    if queued && !b.write_ing {
      b.write_ing = true;
      drop(guard);
      self.spawn_write();
    }
    Ok(Pos {
      gen_id: self.gen_id,
      seg,
    })
  }

  fn spawn_write(self: &Rc<Self>) {
    let this = self.clone();
    compio::runtime::spawn(async move {
      let mut io = this.io.lock().await;
      if let Err(e) = this.drain(&mut io).await {
        error!("rbs generation {} write error: {e}", this.gen_id);
      }
    })
    .detach();
  }

  fn requeue(&self, q: Queued) {
    self.buf.borrow_mut().queue.push_front(q);
  }

  /// Write queued buffers in order; a failed buffer stays queued and the
  /// next retired buffer starts a new writer
  /// 按序写出队列中的缓冲区；失败的缓冲区留在队列中，下一个退役缓冲区会启动新的写任务
  async fn drain(&self, io: &mut Io) -> Result<()> {
    let r = self.write_queue(io).await;
    if r.is_err() {
      self.buf.borrow_mut().write_ing = false;
    }
    r
  }

  async fn write_queue(&self, io: &mut Io) -> Result<()> {
    loop {
      let q = {
        let mut b = self.buf.borrow_mut();
        match b.queue.pop_front() {
          Some(q) => q,
          None => {
            b.write_ing = false;
            return Ok(());
          }
        }
      };
      debug_assert_eq!(q.first, io.next_write);
      let off = seg_off(q.first, self.seg_size);
      let end = off + q.data.len() as u64;
      if end > io.file_len {
        let len = end.max(io.file_len + self.extend);
        if let Err(e) = rbs_fs::extend_to(&self.path, len) {
          self.requeue(q);
          return Err(e.into());
        }
        io.file_len = len;
      }
      let segs = (q.data.len() / self.seg_size) as u32;
      let BufResult(res, data) = rfs::write_at(&mut io.file, q.data, off).await;
      if let Err(e) = res {
        self.requeue(Queued {
          first: q.first,
          data,
        });
        return Err(e.into());
      }
      io.next_write = q.first + segs;
      debug!(
        "rbs generation {} written to segment {}",
        self.gen_id, io.next_write
      );
      if io.next_write - io.next_flush >= 2 * self.buf_segs as u32 {
        self.flush(io).await?;
      }
    }
  }

  /// Sync written segments and advance the header's logical size
  /// 同步已写段并推进头部逻辑大小
  async fn flush(&self, io: &mut Io) -> Result<()> {
    if io.next_flush >= io.next_write {
      return Ok(());
    }
    io.file.sync_data().await?;
    let now = now_ms();
    io.head.logical_size = seg_off(io.next_write, self.seg_size);
    io.head.flush_tm = now;
    io.write_head().await?;
    io.next_flush = io.next_write;
    debug!(
      "rbs generation {} flushed to segment {}",
      self.gen_id, io.next_flush
    );
    let (at, size) = self.space_log.get();
    if now.saturating_sub(at) >= SPACE_LOG_MS {
      info!(
        "rbs generation {} size {} bytes, +{} since last report",
        self.gen_id,
        io.head.logical_size,
        io.head.logical_size.saturating_sub(size)
      );
      self.space_log.set((now, io.head.logical_size));
    }
    Ok(())
  }

  /// Seal the active buffer, write everything queued and flush
  /// 封口活动缓冲区，写出所有排队数据并刷盘
  pub async fn flush_all(&self) -> Result<()> {
    {
      let mut guard = self.buf.borrow_mut();
      let b = &mut *guard;
      if let Some(mut act) = b.active.take() {
        let valid = act.seal_tail(now_ms());
        if valid > 0 {
          self.retire(b, act, valid);
        }
      }
    }
    let mut io = self.io.lock().await;
    self.drain(&mut io).await?;
    self.flush(&mut io).await
  }
}
