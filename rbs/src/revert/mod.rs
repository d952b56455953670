//! Point-in-time revert / 按时间点回滚
//!
//! Generations are applied newest to oldest. Within one generation the
//! earliest pre-image of a page wins, so after the oldest generation every
//! touched page holds its image from when that generation was created.
//! 代号从新到旧应用。同一代号内页的最早前像生效，
//! 应用完最旧代号后每个涉及的页都回到该代号创建时的内容

mod apply;
mod ckp;
mod finish;
mod read;
mod trace;

use std::{
  cell::Cell,
  collections::HashMap,
  rc::Rc,
};

use log::{info, warn};
use rbs_codec::{CkpState, DbHead, RevertCkp};

use crate::{
  Cfg, Conf, Error, Result,
  db::{DbOpen, RevertDb, consistent},
  generation::open_head,
  logs::check_logs,
};

use self::{ckp::CkpFile, trace::Trace};

/// Summary of a finished revert / 回滚完成摘要
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertInfo {
  /// When the revert started, unix ms / 回滚开始时间
  pub from: u64,
  /// Point in time reverted to / 回滚到的时间点
  pub to: u64,
  pub seconds: u64,
  pub pages: u64,
  /// Log range of the touched databases at start
  /// 开始时相关数据库的日志范围
  pub log_start: u32,
  pub log_end: u32,
}

/// Cancels a running revert between batches
/// 在批次之间取消正在运行的回滚
#[derive(Debug, Clone, Default)]
pub struct RevertHandle {
  cancel: Rc<Cell<bool>>,
}

impl RevertHandle {
  #[inline]
  pub fn cancel(&self) {
    self.cancel.set(true);
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool {
    self.cancel.get()
  }
}

/// Pages already captured in the current pass, one bit per page
/// 本轮已捕获的页，每页一位
#[derive(Debug, Default)]
pub(crate) struct PageSet(HashMap<u32, u64>);

impl PageSet {
  /// Mark `pgno`, false if it was marked already
  /// 标记 `pgno`，已标记时返回 false
  #[inline]
  pub fn insert(&mut self, pgno: u32) -> bool {
    let word = self.0.entry(pgno >> 6).or_default();
    let bit = 1u64 << (pgno & 63);
    let fresh = *word & bit == 0;
    *word |= bit;
    fresh
  }

  #[inline]
  pub fn clear(&mut self) {
    self.0.clear();
  }
}

/// One database touched by the revert
/// 回滚涉及的一个数据库
pub(crate) struct DbCtx<D> {
  pub path: String,
  pub db: D,
  /// Live header when the revert began
  /// 回滚开始时的在线头部
  pub head: DbHead,
  /// Expected dbtime_dirtied of the next older generation
  /// 下一个更旧代号应有的 dbtime_dirtied
  prev_dirtied: u64,
  /// Header captured by the oldest applied generation
  /// 最旧应用代号捕获的头部
  pub restored: Option<DbHead>,
  pub seen: PageSet,
  pub pages: Vec<(u32, Vec<u8>)>,
  pub reverted: u64,
}

pub struct Revert<O: DbOpen> {
  cfg: Cfg,
  target: u64,
  min: u32,
  max: u32,
  cache_pages: usize,
  delete_logs: bool,
  ckp: RevertCkp,
  ctxs: Vec<DbCtx<O::Db>>,
  cancel: Rc<Cell<bool>>,
  cached: usize,
  /// Seconds spent by earlier runs / 之前运行已花费的秒数
  sec_base: u64,
  began: u64,
  ckp_file: Option<CkpFile>,
  trace: Option<Trace>,
  /// Keeps the opener alive for databases it shares state with
  /// 保持打开器存活，供共享状态的数据库使用
  _opener: O,
}

impl<O: DbOpen> Revert<O> {
  /// Resolve the generations to apply for `target` and open every database
  /// they touched. Returns the actual point in time reached, the creation
  /// time of the oldest generation applied.
  /// 解析回滚到 `target` 所需的代号并打开其涉及的所有数据库。
  /// 返回实际到达的时间点，即最旧应用代号的创建时间
  pub async fn begin(
    conf: &[Conf],
    target: u64,
    cache_pages: usize,
    delete_logs: bool,
    opener: O,
  ) -> Result<(u64, Self)> {
    let cfg = Cfg::new(conf)?;
    let ckp = ckp::load(&cfg).await?;
    let mut target = target;
    let resume = !matches!(ckp.state, CkpState::None | CkpState::Completed);
    if resume {
      if ckp.state == CkpState::CopyingLogs && ckp.tm_create_current > target {
        return Err(Error::CopyLogsState);
      }
      if ckp.tm_create_current < target {
        warn!(
          "rbs revert resumes at {}, target {target} clamped",
          ckp.tm_create_current
        );
        target = ckp.tm_create_current;
      }
    }

    let Some((lo, hi)) = cfg.gen_range()? else {
      return Err(Error::NoRbsFound);
    };
    let mut ctxs: Vec<DbCtx<O::Db>> = Vec::new();
    let mut expect = None;
    let mut found = None;
    for g in (lo..=hi).rev() {
      let (_, head) = open_head(&cfg, g).await?;
      if let Some(create) = expect
        && head.create != create
      {
        return Err(Error::InvalidRbs(format!(
          "generation {g} does not link to generation {}",
          g + 1
        )));
      }
      for info in &head.attach {
        match ctxs.iter_mut().find(|c| c.path == info.name) {
          Some(c) => {
            if c.prev_dirtied != info.dbtime_dirtied {
              return Err(Error::InvalidRbs(format!(
                "dbtime chain of {} broken at generation {g}",
                info.name
              )));
            }
            c.prev_dirtied = info.dbtime_prev_dirtied;
          }
          None => {
            let mut db = opener.open(&info.name).await?;
            let live = db
              .read_head()
              .await
              .map_err(|_| Error::DbCorrupt(info.name.clone()))?;
            if !consistent(info, &live, head.sign) {
              return Err(Error::InvalidRbs(format!(
                "{} does not match generation {g}",
                info.name
              )));
            }
            ctxs.push(DbCtx {
              path: info.name.clone(),
              db,
              head: live,
              prev_dirtied: info.dbtime_prev_dirtied,
              restored: None,
              seen: PageSet::default(),
              pages: Vec::new(),
              reverted: 0,
            });
          }
        }
      }
      if head.create <= target {
        found = Some((g, head));
        break;
      }
      if head.prev_create == 0 {
        return Err(Error::InvalidRbs(format!(
          "chain starts at generation {g}, after the target"
        )));
      }
      expect = Some(head.prev_create);
    }
    let Some((min, min_head)) = found else {
      return Err(Error::NoRbsFound);
    };
    let max = if resume && ckp.pos.gen_id >= min {
      ckp.pos.gen_id.min(hi)
    } else {
      hi
    };
    if ckp.state != CkpState::CopyingLogs {
      check_logs(&cfg, &min_head, !delete_logs).await?;
    }
    info!(
      "rbs revert to {} applies generations {max}..={min}, {} databases",
      min_head.create,
      ctxs.len()
    );

    let actual = min_head.create;
    Ok((
      actual,
      Self {
        cfg,
        target: actual,
        min,
        max,
        cache_pages: cache_pages.max(1),
        delete_logs,
        ckp,
        ctxs,
        cancel: Rc::default(),
        cached: 0,
        sec_base: 0,
        began: 0,
        ckp_file: None,
        trace: None,
        _opener: opener,
      },
    ))
  }

  #[inline]
  pub fn handle(&self) -> RevertHandle {
    RevertHandle {
      cancel: self.cancel.clone(),
    }
  }

  /// Generations to apply, newest first / 要应用的代号，从新到旧
  #[inline]
  pub fn range(&self) -> (u32, u32) {
    (self.min, self.max)
  }

  #[inline]
  fn check_cancel(&self) -> Result<()> {
    if self.cancel.get() {
      warn!("rbs revert cancelled");
      return Err(Error::Cancelled);
    }
    Ok(())
  }

  async fn save_ckp(&mut self) -> Result<()> {
    self.ckp.sec_in_revert = self.sec_base + crate::now_ms().saturating_sub(self.began) / 1000;
    if let Some(f) = &mut self.ckp_file {
      f.save(&self.ckp).await?;
    }
    Ok(())
  }

  /// Run the revert; resumes from the checkpoint when one was found
  /// 执行回滚；存在检查点时从中恢复
  pub async fn execute(mut self) -> Result<RevertInfo> {
    let now = crate::now_ms();
    let fresh = matches!(self.ckp.state, CkpState::None | CkpState::Completed);
    self.began = now;
    self.ckp_file = Some(CkpFile::open(&self.cfg).await?);
    self.trace = Some(Trace::open(&self.cfg, fresh).await?);
    if fresh {
      let log_min = self
        .ctxs
        .iter()
        .map(|c| c.head.gen_min_required)
        .filter(|g| *g > 0)
        .min()
        .or_else(|| self.ctxs.iter().map(|c| c.head.gen_last_consistent).min())
        .unwrap_or(0);
      let log_max = self
        .ctxs
        .iter()
        .map(|c| c.head.gen_max_required.max(c.head.gen_last_consistent))
        .max()
        .unwrap_or(0);
      self.ckp = RevertCkp {
        file_type: rbs_codec::ckp::FILE_TYPE_CKP,
        create: now,
        state: CkpState::InProgress,
        log_min_start: log_min,
        log_max_start: log_max,
        tm_execute_begin: now,
        ..Default::default()
      };
    } else {
      self.sec_base = self.ckp.sec_in_revert;
      info!("rbs revert resumed at {:?}", self.ckp.pos);
    }
    if let Some(t) = &mut self.trace {
      t.line(format_args!(
        "Begin {now} target {} generations {}..={}",
        self.target, self.max, self.min
      ));
    }

    if self.ckp.state == CkpState::CopyingLogs {
      self.apply_gen(self.min, true).await?;
    } else {
      self.mark_dbs(now).await?;
      for g in (self.min..=self.max).rev() {
        self.check_cancel()?;
        self.apply_gen(g, false).await?;
      }
    }
    self.finish().await
  }

  /// Put every database into revert state; a resumed revert only checks it
  /// 将所有数据库置为回滚状态；恢复时只做检查
  async fn mark_dbs(&mut self, now: u64) -> Result<()> {
    let resume = self.ckp.pos.gen_id != 0;
    for c in &mut self.ctxs {
      if c.head.state == rbs_codec::DbState::RevertInProgress {
        continue;
      }
      if resume {
        return Err(Error::BadDbState(c.path.clone()));
      }
      c.head.state = rbs_codec::DbState::RevertInProgress;
      c.head.revert_count += 1;
      c.head.revert_from = now;
      c.head.revert_to = self.target;
      c.head.revert_page_count = 0;
      c.db.write_head(&c.head).await?;
      c.db.sync().await?;
    }
    Ok(())
  }
}
