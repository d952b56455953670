//! Snapshot manager: owns the open generation, rolls it, captures pre-images
//! 快照管理器：持有当前代号、负责轮转与前像捕获

use std::{
  cell::{Cell, RefCell},
  fs,
  rc::Rc,
};

use futures::lock::Mutex;
use log::{info, warn};
use rbs_codec::{
  AttachInfo, DbHead, DbState, GenHead, Pos, Rec, Sign, head::ATTACH_MAX, preimage,
};

use crate::{
  Cfg, Cleaner, Conf, Error, Result,
  db::{Host, LiveDb, RestoreDb, consistent},
  generation::Gen,
  logs::copy_logs,
  now_ms,
};

/// Restore map used to infer entries and the required log range
/// 用于推断条目与所需日志范围的恢复映射
struct Restore {
  dbs: Vec<RestoreDb>,
  low: u32,
  high: u32,
}

struct Inner {
  cfg: Cfg,
  host: Rc<dyn Host>,
  cur: RefCell<Rc<Gen>>,
  invalid: Cell<bool>,
  restore: Option<Restore>,
  roll_lock: Mutex<()>,
  /// Serializes lookup, push and capture of attach entries
  /// 串行化附加条目的查找、追加与捕获
  attach_lock: Mutex<()>,
  floor: Rc<Cell<u32>>,
  cleaner: Cleaner,
}

/// Revert snapshot log of one database instance
/// 单个数据库实例的回滚快照日志
#[derive(Clone)]
pub struct Rbs(Rc<Inner>);

fn attach_info(path: &str, head: &DbHead, prev_dirtied: u64) -> AttachInfo {
  AttachInfo {
    name: path.to_owned(),
    gen_min: head.gen_min_required,
    gen_max: head.gen_max_required,
    dbtime_dirtied: 0,
    dbtime_prev_dirtied: prev_dirtied,
    sign_db: head.sign_db,
    sign_db_hdr_flush: head.sign_db_hdr_flush,
  }
}

/// Mark which database a dbid refers to and snapshot its header
/// 标记 dbid 对应的数据库并快照其头部
fn capture_attach(cur: &Rc<Gen>, dbid: u8, path: &str, head: &DbHead) -> Result<()> {
  cur.append(
    &Rec::DbAttach {
      dbid,
      name: path.to_owned(),
    }
    .encode()?,
  )?;
  cur.append(
    &Rec::DbHdr {
      dbid,
      head: head.clone(),
    }
    .encode()?,
  )?;
  Ok(())
}

/// Load the newest generation or start one
/// 加载最新代号或新建一个
async fn init(cfg: &Cfg, floor: &Cell<u32>, create_ok: bool) -> Result<Rc<Gen>> {
  fs::create_dir_all(&cfg.root)?;
  let cur = match cfg.gen_range()? {
    None => {
      if !create_ok {
        return Err(Error::RangeTooLarge);
      }
      Gen::create(cfg, 1, 0, Vec::new()).await?
    }
    Some((_, max)) => {
      let loaded = match Gen::load(cfg, max).await {
        Ok(cur) => {
          if cur.head().await.invalid {
            warn!("rbs generation {max} was invalidated");
            None
          } else {
            Some(cur)
          }
        }
        Err(e) if e.is_head_invalid() => {
          warn!("rbs generation {max} rejected: {e}");
          None
        }
        Err(e) => return Err(e),
      };
      match loaded {
        Some(cur) => cur,
        None => {
          if !create_ok {
            return Err(Error::RangeTooLarge);
          }
          floor.set(floor.get().max(max + 1));
          Gen::create(cfg, max + 1, 0, Vec::new()).await?
        }
      }
    }
  };
  if cur.next_active() > cfg.max_segs {
    return Err(Error::OutOfSpace(cur.gen_id));
  }
  if cur.prev_create == 0 {
    floor.set(floor.get().max(cur.gen_id));
  }
  Ok(cur)
}

impl Rbs {
  fn new(
    cfg: Cfg,
    host: Rc<dyn Host>,
    cur: Rc<Gen>,
    floor: Rc<Cell<u32>>,
    restore: Option<Restore>,
  ) -> Self {
    let cleaner = Cleaner::new(cfg.clone(), floor.clone());
    Self(Rc::new(Inner {
      cfg,
      host,
      cur: RefCell::new(cur),
      invalid: Cell::new(false),
      restore,
      roll_lock: Mutex::new(()),
      attach_lock: Mutex::new(()),
      floor,
      cleaner,
    }))
  }

  fn start_cleaner(&self) {
    if self.0.cfg.clean_enable {
      self.0.cleaner.start();
    }
  }

  /// Open the snapshot log, loading the newest generation or creating one
  /// 打开快照日志，加载最新代号或创建新代号
  pub async fn open(conf: &[Conf], host: Rc<dyn Host>) -> Result<Self> {
    let cfg = Cfg::new(conf)?;
    let floor = Rc::new(Cell::new(0));
    let cur = init(&cfg, &floor, true).await?;
    let rbs = Self::new(cfg, host, cur, floor, None);
    rbs.copy_required_logs(false).await?;
    rbs.start_cleaner();
    Ok(rbs)
  }

  /// Open while the host restores from backup. Entries and the required log
  /// range come from `dbs`. Returns `None` when a generation would be
  /// needed but `high - low` exceeds the configured limit.
  /// 宿主从备份恢复时打开。条目与所需日志范围来自 `dbs`。
  /// 需要新代号但 `high - low` 超过限制时返回 `None`
  pub async fn open_from_restore(
    conf: &[Conf],
    host: Rc<dyn Host>,
    dbs: Vec<RestoreDb>,
    low: u32,
    high: u32,
  ) -> Result<Option<Self>> {
    let cfg = Cfg::new(conf)?;
    let create_ok = high.saturating_sub(low) <= cfg.max_required_range;
    let floor = Rc::new(Cell::new(0));
    let cur = match init(&cfg, &floor, create_ok).await {
      Ok(cur) => cur,
      Err(Error::RangeTooLarge) => {
        warn!("rbs restore range {low}..={high} too large");
        return Ok(None);
      }
      Err(e) => return Err(e),
    };
    let rbs = Self::new(cfg, host, cur, floor, Some(Restore { dbs, low, high }));
    if rbs.attach_restored().await? {
      rbs.copy_required_logs(true).await?;
    } else {
      rbs.roll(false, true).await?;
    }
    rbs.start_cleaner();
    Ok(Some(rbs))
  }

  /// Attach every restored database; false on a mismatch
  /// 附加所有恢复的数据库；不一致时返回 false
  async fn attach_restored(&self) -> Result<bool> {
    let Some(restore) = &self.0.restore else {
      return Ok(true);
    };
    let cur = self.cur();
    for d in &restore.dbs {
      let head = cur.head().await;
      match head.find(&d.path) {
        Some(i) => {
          if !consistent(&head.attach[i], &d.head, head.sign) {
            warn!("rbs restored database {} does not match generation {}", d.path, cur.gen_id);
            return Ok(false);
          }
        }
        None => {
          let info = attach_info(&d.path, &d.head, 0);
          let dbid = cur.update_head(|h| Ok(h.push(info)?)).await?;
          capture_attach(&cur, dbid, &d.path, &d.head)?;
        }
      }
    }
    cur.flush_all().await?;
    Ok(true)
  }

  #[inline]
  fn cur(&self) -> Rc<Gen> {
    self.0.cur.borrow().clone()
  }

  #[inline]
  pub fn cfg(&self) -> &Cfg {
    &self.0.cfg
  }

  /// Current generation number / 当前代号
  #[inline]
  pub fn gen_id(&self) -> u32 {
    self.cur().gen_id
  }

  /// Copy of the current generation header
  /// 当前代号头部的副本
  pub async fn head(&self) -> GenHead {
    self.cur().head().await
  }

  #[inline]
  pub fn is_invalid(&self) -> bool {
    self.0.invalid.get()
  }

  /// Lowest generation the cleaner keeps
  /// 清理器保留的最低代号
  #[inline]
  pub fn floor(&self) -> u32 {
    self.0.floor.get()
  }

  #[inline]
  pub fn cleaner(&self) -> &Cleaner {
    &self.0.cleaner
  }

  /// dbid of `db`, attaching it through the host on first use.
  /// `None` once the snapshot is invalid.
  /// `db` 的 dbid，首次使用时经宿主附加。快照失效后为 `None`
  async fn dbid(&self, db: &str) -> Result<Option<u8>> {
    if let Some(id) = self.cur().dbid(db) {
      return Ok(Some(id));
    }
    let Some(live) = self.0.host.db(db) else {
      return Err(Error::NotAttached(db.to_owned()));
    };
    {
      let _lock = self.0.attach_lock.lock().await;
      if self.cur().dbid(db).is_none() {
        self.attach(&live).await?;
      }
    }
    if self.is_invalid() {
      return Ok(None);
    }
    self
      .cur()
      .dbid(db)
      .map(Some)
      .ok_or_else(|| Error::NotAttached(db.to_owned()))
  }

  /// Capture the pre-image of a page about to be modified. Returns the
  /// position the record ends at, or the default position when the
  /// snapshot is invalid.
  /// 捕获即将修改的页的前像。返回记录结束的位置；快照失效时返回默认位置
  pub async fn capture_page_preimage(&self, db: &str, pgno: u32, page: &[u8]) -> Result<Pos> {
    if self.is_invalid() {
      return Ok(Pos::default());
    }
    let Some(dbid) = self.dbid(db).await? else {
      return Ok(Pos::default());
    };
    let (flags, data) = preimage::capture(page, self.0.cfg.page_size, self.0.cfg.codec);
    let rec = Rec::DbPage {
      dbid,
      pgno,
      flags,
      data,
    }
    .encode()?;
    self.cur().append(&rec)
  }

  /// Record that a page was freshly allocated
  /// 记录页为新分配
  pub async fn capture_new_page(&self, db: &str, pgno: u32) -> Result<Pos> {
    if self.is_invalid() {
      return Ok(Pos::default());
    }
    let Some(dbid) = self.dbid(db).await? else {
      return Ok(Pos::default());
    };
    self.cur().append(&Rec::DbNewPage { dbid, pgno }.encode()?)
  }

  /// Attach a database to the current generation
  /// 将数据库附加到当前代号
  pub async fn record_db_attach(&self, db: &LiveDb) -> Result<()> {
    let _lock = self.0.attach_lock.lock().await;
    self.attach(db).await
  }

  async fn attach(&self, db: &LiveDb) -> Result<()> {
    if self.is_invalid() {
      return Ok(());
    }
    let cur = self.cur();
    let head = cur.head().await;
    if let Some(i) = head.find(&db.path) {
      if consistent(&head.attach[i], &db.head, head.sign) {
        return Ok(());
      }
      warn!("rbs database {} does not match generation {}", db.path, cur.gen_id);
      return Err(Error::DbMismatch(db.path.clone()));
    }
    if !matches!(db.head.state, DbState::JustCreated | DbState::CleanShutdown) {
      warn!(
        "rbs database {} attached in state {:?}, snapshot invalidated",
        db.path, db.head.state
      );
      return self.invalidate().await;
    }
    let prev_dirtied = self.prev_dirtied(&cur, &db.path).await;
    let info = attach_info(&db.path, &db.head, prev_dirtied);
    let now = now_ms();
    let dbid = cur
      .update_head(|h| {
        if let Some(i) = h.find(&info.name) {
          return Ok(i as u8);
        }
        let id = h.push(info)?;
        h.attach_tm = now;
        Ok(id)
      })
      .await?;
    capture_attach(&cur, dbid, &db.path, &db.head)?;
    cur.flush_all().await?;
    info!("rbs attached {} to generation {} as {dbid}", db.path, cur.gen_id);
    Ok(())
  }

  /// dbtime dirtied recorded for `path` by the previous generation in the chain
  /// 链中上一代号为 `path` 记录的 dbtime dirtied
  async fn prev_dirtied(&self, cur: &Gen, path: &str) -> u64 {
    if cur.prev_create == 0 || cur.gen_id < 2 {
      return 0;
    }
    match crate::generation::open_head(&self.0.cfg, cur.gen_id - 1).await {
      Ok((_, prev)) if prev.create == cur.prev_create => prev
        .find(path)
        .map_or(0, |i| prev.attach[i].dbtime_dirtied),
      _ => 0,
    }
  }

  /// Write out and sync everything captured so far
  /// 写出并同步已捕获的全部数据
  pub async fn flush_all(&self) -> Result<()> {
    self.cur().flush_all().await
  }

  /// The current generation is older than the roll period
  /// 当前代号已超过轮转周期
  pub fn should_roll(&self) -> bool {
    now_ms().saturating_sub(self.cur().create) >= self.0.cfg.roll_sec * 1000
  }

  /// Close the current generation and open the next. With `prev_valid` off
  /// the new generation starts a chain. With `infer` the entries and log
  /// range come from the restore map instead of the live databases.
  /// 关闭当前代号并打开下一个。`prev_valid` 为假时新代号开启新链。
  /// `infer` 时条目与日志范围来自恢复映射而非在线数据库
  pub async fn roll(&self, prev_valid: bool, infer: bool) -> Result<()> {
    let lock = self.0.roll_lock.lock().await;
    let old = self.cur();
    if prev_valid {
      old.flush_all().await?;
    }
    let old_head = old.head().await;

    let dbs: Vec<(String, DbHead)> = match (&self.0.restore, infer) {
      (Some(r), true) => r.dbs.iter().map(|d| (d.path.clone(), d.head.clone())).collect(),
      _ => self
        .0
        .host
        .dbs()
        .into_iter()
        .map(|d| (d.path, d.head))
        .collect(),
    };
    if dbs.len() > ATTACH_MAX {
      warn!(
        "rbs roll: {} databases, only the first {ATTACH_MAX} are attached",
        dbs.len()
      );
    }
    let dbs = &dbs[..dbs.len().min(ATTACH_MAX)];
    let attach = dbs
      .iter()
      .map(|(path, head)| {
        let prev = if prev_valid {
          old_head
            .find(path)
            .map_or(0, |i| old_head.attach[i].dbtime_dirtied)
        } else {
          0
        };
        attach_info(path, head, prev)
      })
      .collect();

    let prev_create = if prev_valid { old.create } else { 0 };
    let cur = Gen::create(&self.0.cfg, old.gen_id + 1, prev_create, attach).await?;
    if !prev_valid {
      self.0.floor.set(self.0.floor.get().max(cur.gen_id));
    }
    *self.0.cur.borrow_mut() = cur.clone();
    self.0.invalid.set(false);
    if prev_valid {
      old.flush_all().await?;
    }

    for (dbid, (path, head)) in dbs.iter().enumerate() {
      capture_attach(&cur, dbid as u8, path, head)?;
    }
    cur.flush_all().await?;
    info!(
      "rbs rolled generation {} -> {}, chained {prev_valid}",
      old.gen_id, cur.gen_id
    );
    drop(lock);
    self.copy_required_logs(infer).await
  }

  /// Fix the log range the current generation needs. Sticky once set.
  /// 确定当前代号所需的日志范围。设置后不再改变
  pub async fn set_required_logs(&self, infer: bool) -> Result<()> {
    let cur = self.cur();
    let head = cur.head().await;
    if head.logs_copied || head.log_min > 0 {
      return Ok(());
    }
    let (min, max) = match (&self.0.restore, infer) {
      (Some(r), true) => (r.low, r.high),
      _ => {
        let dirty: Vec<_> = self
          .0
          .host
          .dbs()
          .into_iter()
          .filter(|d| d.head.state.is_dirty())
          .collect();
        let min = dirty.iter().map(|d| d.head.gen_min_required).filter(|g| *g > 0).min();
        let max = dirty.iter().map(|d| d.head.gen_max_required).max();
        match (min, max) {
          (Some(min), Some(max)) if max >= min => (min, max),
          _ => (0, 0),
        }
      }
    };
    cur
      .update_head(|h| {
        h.log_min = min;
        h.log_max = max;
        Ok(())
      })
      .await
  }

  /// Copy the required log range into the generation's log dir once
  /// 将所需日志范围复制到代号日志目录，只做一次
  pub async fn copy_required_logs(&self, infer: bool) -> Result<()> {
    let cur = self.cur();
    if cur.head().await.logs_copied {
      return Ok(());
    }
    self.set_required_logs(infer).await?;
    let head = cur.head().await;
    let cfg = &self.0.cfg;
    copy_logs(
      cfg,
      &cfg.log_dir,
      &cfg.gen_log_dir(cur.gen_id),
      head.log_min,
      head.log_max,
      false,
      true,
    )
    .await?;
    cur
      .update_head(|h| {
        h.logs_copied = true;
        Ok(())
      })
      .await
  }

  /// Stop capturing into the current generation. The header loses its
  /// signature so the generation is never used for a revert.
  /// 停止向当前代号捕获。头部签名被清除，该代号不再用于回滚
  pub async fn invalidate(&self) -> Result<()> {
    if self.0.invalid.replace(true) {
      return Ok(());
    }
    let cur = self.cur();
    cur.flush_all().await?;
    let now = now_ms();
    cur
      .update_head(|h| {
        h.invalid = true;
        h.sign = Sign::default();
        h.detach_tm = now;
        Ok(())
      })
      .await?;
    warn!("rbs generation {} invalidated", cur.gen_id);
    Ok(())
  }

  /// dbtime at which `path` was first dirtied in this generation
  /// `path` 在本代号中首次变脏时的 dbtime
  pub async fn dbtime_dirtied(&self, path: &str) -> Option<u64> {
    let head = self.cur().head().await;
    head.find(path).map(|i| head.attach[i].dbtime_dirtied)
  }

  pub async fn set_dbtime_dirtied(&self, path: &str, dbtime: u64) -> Result<()> {
    self
      .cur()
      .update_head(|h| match h.find(path) {
        Some(i) => {
          h.attach[i].dbtime_dirtied = dbtime;
          Ok(())
        }
        None => Err(Error::NotAttached(path.to_owned())),
      })
      .await
  }

  /// Signature the host stores in a database header it flushes; unset
  /// while the snapshot is invalid
  /// 宿主刷新数据库头部时写入的签名；快照失效时为未设置
  pub fn sign_for_db_head_flush(&self) -> Sign {
    if self.is_invalid() {
      Sign::default()
    } else {
      self.cur().sign()
    }
  }

  /// Stop the cleaner and flush / 停止清理器并刷盘
  pub async fn close(&self) -> Result<()> {
    self.0.cleaner.stop();
    if self.is_invalid() {
      return Ok(());
    }
    self.cur().flush_all().await
  }
}
