//! Retention cleaner / 保留期清理器
//!
//! Removes the oldest generation while it is below the first valid
//! generation, unreadable, too old, or the disk is short on space. The
//! newest generation is never removed.
//! 最旧代号低于首个有效代号、不可读、过旧或磁盘空间不足时删除。最新代号永不删除

use std::{
  cell::{Cell, RefCell},
  io::ErrorKind,
  rc::{Rc, Weak},
  time::Duration,
};

use log::{error, info, warn};
use rbs_fs::{dir_size, fs::free_space, rm_dir};

use crate::{Cfg, Error, Result, generation::open_head, now_ms};

/// Longest single wait, so a stop is noticed quickly
/// 单次最长等待，以便及时察觉停止
const WAIT_STEP: Duration = Duration::from_secs(1);

/// Cleaning statistics / 清理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStat {
  /// Generations removed / 删除的代号数
  pub removed: u32,
  /// Bytes reclaimed / 回收的字节数
  pub freed: u64,
}

impl PassStat {
  /// Merge stats / 合并统计
  pub fn merge(&mut self, other: &PassStat) {
    self.removed += other.removed;
    self.freed += other.freed;
  }
}

struct Inner {
  cfg: Cfg,
  /// Shared with the capture side, which raises it on a chain break
  /// 与捕获侧共享，链断裂时由其提升
  floor: Rc<Cell<u32>>,
  floor_done: Cell<bool>,
  stop: Cell<bool>,
  passes: Cell<u32>,
  stat: RefCell<PassStat>,
}

#[derive(Clone)]
pub struct Cleaner {
  inner: Rc<Inner>,
}

/// Background loop / 后台循环
async fn timer(weak: Weak<Inner>) {
  loop {
    let mut waited = Duration::ZERO;
    loop {
      let Some(inner) = weak.upgrade() else {
        return;
      };
      if inner.stop.get() {
        return;
      }
      let interval = Duration::from_secs(inner.cfg.clean_interval_sec);
      if waited >= interval {
        break;
      }
      let step = WAIT_STEP.min(interval - waited);
      drop(inner);
      compio::time::sleep(step).await;
      waited += step;
    }

    let Some(inner) = weak.upgrade() else {
      return;
    };
    if let Err(e) = pass(&inner).await {
      error!("rbs clean pass error: {e}");
    }
    let n = inner.passes.get() + 1;
    inner.passes.set(n);
    let max = inner.cfg.max_passes;
    if max > 0 && n >= max {
      inner.stop.set(true);
    }
  }
}

impl Cleaner {
  pub fn new(cfg: Cfg, floor: Rc<Cell<u32>>) -> Self {
    Self {
      inner: Rc::new(Inner {
        cfg,
        floor,
        floor_done: Cell::new(false),
        stop: Cell::new(false),
        passes: Cell::new(0),
        stat: RefCell::new(PassStat::default()),
      }),
    }
  }

  /// Spawn the background loop / 启动后台循环
  pub fn start(&self) {
    compio::runtime::spawn(timer(Rc::downgrade(&self.inner))).detach();
  }

  /// Ask the loop to exit at its next check
  /// 请求循环在下次检查时退出
  #[inline]
  pub fn stop(&self) {
    self.inner.stop.set(true);
  }

  #[inline]
  pub fn is_stopped(&self) -> bool {
    self.inner.stop.get()
  }

  /// Passes run by the background loop
  /// 后台循环已运行的轮数
  #[inline]
  pub fn passes(&self) -> u32 {
    self.inner.passes.get()
  }

  /// Totals over all passes / 所有轮次的累计
  #[inline]
  pub fn stat(&self) -> PassStat {
    *self.inner.stat.borrow()
  }

  /// Lowest generation the cleaner must keep
  /// 清理器必须保留的最低代号
  pub async fn first_valid_gen(&self) -> Result<u32> {
    first_valid_gen(&self.inner).await
  }

  /// Run one pass now / 立即运行一轮
  pub async fn pass(&self) -> Result<PassStat> {
    pass(&self.inner).await
  }
}

/// Walk the chain newest to oldest until a root or a broken link
/// 从新到旧遍历链，直到链根或断链
async fn first_valid_gen(inner: &Inner) -> Result<u32> {
  if inner.floor_done.get() {
    return Ok(inner.floor.get());
  }
  let cfg = &inner.cfg;
  let Some((min, max)) = cfg.gen_range()? else {
    return Ok(inner.floor.get());
  };
  let mut first = min;
  let mut expect = None;
  for g in (min..=max).rev() {
    match open_head(cfg, g).await {
      Ok((_, head)) => {
        if let Some(create) = expect
          && head.create != create
        {
          warn!("rbs generation {g} does not link to generation {}", g + 1);
          first = g + 1;
          break;
        }
        if head.prev_create == 0 {
          first = g;
          break;
        }
        expect = Some(head.prev_create);
      }
      Err(e) => {
        warn!("rbs generation {g} unreadable: {e}");
        first = g + 1;
        break;
      }
    }
  }
  let floor = inner.floor.get().max(first);
  inner.floor.set(floor);
  inner.floor_done.set(true);
  info!("rbs first valid generation {floor}");
  Ok(floor)
}

async fn pass(inner: &Inner) -> Result<PassStat> {
  let cfg = &inner.cfg;
  let mut stat = PassStat::default();
  if !cfg.root.exists() {
    return Ok(stat);
  }
  let floor = first_valid_gen(inner).await?;
  let mut free = free_space(&cfg.root)?;
  let mut total = dir_size(&cfg.root)?;
  let now = now_ms();

  loop {
    if inner.stop.get() {
      break;
    }
    let Some((min, max)) = cfg.gen_range()? else {
      if !cfg.enabled {
        inner.stop.set(true);
      }
      break;
    };
    if min == max {
      break;
    }
    let reason = if min < floor {
      "InvalidRBS"
    } else {
      match open_head(cfg, min).await {
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => "RBSFileMissing",
        Err(Error::InvalidSign(_)) => "InvalidRBS",
        Err(e) => {
          warn!("rbs generation {min} header: {e}");
          "CorruptHeader"
        }
        Ok((_, head)) => {
          if cfg.max_age_sec > 0 && now.saturating_sub(head.create) > cfg.max_age_sec * 1000 {
            "Scavenged"
          } else if free < cfg.low_disk && total > cfg.max_space_low_disk {
            "LowDiskSpace"
          } else {
            break;
          }
        }
      }
    };
    let dir = cfg.gen_dir(min);
    let size = dir_size(&dir)?;
    rm_dir(&dir)?;
    total = total.saturating_sub(size);
    free += size;
    stat.removed += 1;
    stat.freed += size;
    info!("rbs removed generation {min} ({reason}), {size} bytes freed");
  }

  inner.stat.borrow_mut().merge(&stat);
  Ok(stat)
}
