//! Revert: range resolution, apply order, resume, cancel, logs
//! 回滚：范围解析、应用顺序、恢复、取消、日志

mod common;

use std::fs;

use aok::{OK, Void};
use common::*;
use rbs::{
  Conf, DbState, Error, FileDb, FileOpen, Rbs, Revert, RevertDb,
};
use rbs_codec::Reason;
use tempfile::TempDir;

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

const P7_V0: (u64, u8) = (10, 0xA0);
const P7_V1: (u64, u8) = (20, 0xA1);
const P7_V2: (u64, u8) = (30, 0xA2);
const P3_V0: (u64, u8) = (11, 0x30);
const P3_V1: (u64, u8) = (21, 0x31);
const P9: (u64, u8) = (31, 0x99);

fn pg(v: (u64, u8)) -> Vec<u8> {
  page(v.0, v.1)
}

struct Setup {
  tmp: TempDir,
  conf: Vec<Conf>,
  path: String,
  t1: u64,
  t2: u64,
}

/// Two chained generations:
/// gen 1 captures page 7 (v0) and page 3 (v0),
/// gen 2 captures page 7 (v1) and the allocation of page 9.
/// 两个相连代号：代号 1 捕获页 7 与页 3 的 v0，代号 2 捕获页 7 的 v1 与页 9 的分配
async fn setup(host_state: DbState) -> rbs::Result<Setup> {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let (live, mut db) = new_db(tmp.path(), "a.db", 1).await?;
  write(&mut db, 7, &pg(P7_V0)).await?;
  write(&mut db, 3, &pg(P3_V0)).await?;
  let host = TestHost::new(vec![live.clone()]);
  let path = live.path.clone();

  let rbs = Rbs::open(&conf, host.clone()).await?;
  rbs.record_db_attach(&live).await?;
  let t1 = rbs.head().await.create;
  rbs.capture_page_preimage(&path, 7, &pg(P7_V0)).await?;
  write(&mut db, 7, &pg(P7_V1)).await?;
  rbs.capture_page_preimage(&path, 3, &pg(P3_V0)).await?;
  write(&mut db, 3, &pg(P3_V1)).await?;
  rbs.set_dbtime_dirtied(&path, 20).await?;

  host.set_head(&path, |h| h.state = host_state);
  pause().await;
  rbs.roll(true, false).await?;
  let t2 = rbs.head().await.create;
  rbs.capture_page_preimage(&path, 7, &pg(P7_V1)).await?;
  write(&mut db, 7, &pg(P7_V2)).await?;
  rbs.capture_new_page(&path, 9).await?;
  write(&mut db, 9, &pg(P9)).await?;
  rbs.close().await?;
  db.sync().await?;

  Ok(Setup {
    tmp,
    conf,
    path,
    t1,
    t2,
  })
}

async fn read(path: &str, pgno: u32) -> rbs::Result<Vec<u8>> {
  FileDb::open(path).await?.read_page(pgno).await
}

async fn new_page(path: &str, pgno: u32) -> rbs::Result<Vec<u8>> {
  Ok(FileDb::open(path).await?.new_page(pgno, PAGE))
}

#[compio::test]
async fn revert_newest_generation() -> Void {
  let s = setup(DbState::CleanShutdown).await?;
  let open = FileOpen::default();
  let (actual, rv) = Revert::begin(&s.conf, s.t2 + 5, 16, false, open.clone()).await?;
  assert_eq!(actual, s.t2);
  assert_eq!(rv.range(), (2, 2));
  let info = rv.execute().await?;
  assert_eq!(info.to, s.t2);
  assert_eq!(info.pages, 2);

  assert_eq!(read(&s.path, 7).await?, reverted(pg(P7_V1)));
  assert_eq!(read(&s.path, 9).await?, new_page(&s.path, 9).await?);
  // untouched in gen 2
  // 代号 2 中未改动
  assert_eq!(read(&s.path, 3).await?, pg(P3_V1));

  let head = FileDb::open(&s.path).await?.read_head().await?;
  assert_eq!(head.state, DbState::CleanShutdown);
  assert_eq!(head.revert_count, 1);
  assert_eq!(head.revert_to, s.t2);
  assert_eq!(head.revert_page_count, 2);
  let map = open.map(&s.path).ok_or_else(|| std::io::Error::other("no map"))?;
  assert!(map.cleaned);

  let root = root(s.tmp.path());
  assert!(!root.join("RBSedb.chk").exists());
  let trace = fs::read_to_string(root.join("edb.RBSRC.RAW"))?;
  assert!(trace.contains(&format!("Pg 7,{}", P7_V1.0)));
  OK
}

#[compio::test]
async fn revert_oldest_generation_wins() -> Void {
  let s = setup(DbState::CleanShutdown).await?;
  let (actual, rv) = Revert::begin(&s.conf, s.t2 - 1, 1, false, FileOpen::default()).await?;
  assert_eq!(actual, s.t1);
  assert_eq!(rv.range(), (1, 2));
  let info = rv.execute().await?;
  assert_eq!(info.pages, 4);

  assert_eq!(read(&s.path, 7).await?, reverted(pg(P7_V0)));
  assert_eq!(read(&s.path, 3).await?, reverted(pg(P3_V0)));
  assert_eq!(read(&s.path, 9).await?, new_page(&s.path, 9).await?);
  OK
}

#[compio::test]
async fn target_before_chain() -> Void {
  let s = setup(DbState::CleanShutdown).await?;
  let r = Revert::begin(&s.conf, s.t1 - 1, 16, false, FileOpen::default()).await;
  assert!(matches!(r, Err(Error::InvalidRbs(_))));
  OK
}

#[compio::test]
async fn nothing_to_revert() -> Void {
  let tmp = tempfile::tempdir()?;
  let r = Revert::begin(&conf(tmp.path()), 1, 16, false, FileOpen::default()).await;
  assert!(matches!(r, Err(Error::NoRbsFound)));
  OK
}

#[compio::test]
async fn corrupt_generation_then_resume() -> Void {
  let s = setup(DbState::CleanShutdown).await?;
  let file = root(s.tmp.path()).join("RBSedb00000001/edb00000001.rbs");
  let good = fs::read(&file)?;
  let mut bad = good.clone();
  bad[16384 + 100] ^= 0xFF;
  fs::write(&file, bad)?;

  let (_, rv) = Revert::begin(&s.conf, s.t1, 16, false, FileOpen::default()).await?;
  let r = rv.execute().await;
  assert!(matches!(
    r,
    Err(Error::Codec(rbs_codec::Error::Corrupt {
      reason: Reason::BadChecksum,
      seg: 1
    }))
  ));
  // gen 2 was applied, nothing from gen 1 was written
  // 代号 2 已应用，代号 1 未写入任何页
  assert_eq!(read(&s.path, 7).await?, reverted(pg(P7_V1)));
  assert_eq!(read(&s.path, 3).await?, pg(P3_V1));
  let head = FileDb::open(&s.path).await?.read_head().await?;
  assert_eq!(head.state, DbState::RevertInProgress);
  assert!(root(s.tmp.path()).join("RBSedb.chk").exists());

  fs::write(&file, good)?;
  let (actual, rv) = Revert::begin(&s.conf, s.t1, 16, false, FileOpen::default()).await?;
  assert_eq!(actual, s.t1);
  assert_eq!(rv.range(), (1, 1));
  rv.execute().await?;

  assert_eq!(read(&s.path, 7).await?, reverted(pg(P7_V0)));
  assert_eq!(read(&s.path, 3).await?, reverted(pg(P3_V0)));
  assert_eq!(read(&s.path, 9).await?, new_page(&s.path, 9).await?);
  let head = FileDb::open(&s.path).await?.read_head().await?;
  assert_eq!(head.state, DbState::CleanShutdown);
  assert_eq!(head.revert_count, 1);
  assert!(!root(s.tmp.path()).join("RBSedb.chk").exists());
  OK
}

#[compio::test]
async fn cancel_then_rerun() -> Void {
  let s = setup(DbState::CleanShutdown).await?;
  let (_, rv) = Revert::begin(&s.conf, s.t1, 16, false, FileOpen::default()).await?;
  let handle = rv.handle();
  handle.cancel();
  assert!(matches!(rv.execute().await, Err(Error::Cancelled)));
  assert_eq!(read(&s.path, 7).await?, pg(P7_V2));

  let (_, rv) = Revert::begin(&s.conf, s.t1, 16, false, FileOpen::default()).await?;
  rv.execute().await?;
  assert_eq!(read(&s.path, 7).await?, reverted(pg(P7_V0)));
  let head = FileDb::open(&s.path).await?.read_head().await?;
  assert_eq!(head.revert_count, 1);
  OK
}

/// Dirty database at roll: gen 2 copies logs 1..=2
/// 轮转时数据库为脏：代号 2 复制日志 1..=2
async fn setup_logs() -> rbs::Result<Setup> {
  let tmp = tempfile::tempdir()?;
  let logs = log_dir(tmp.path());
  fs::create_dir_all(&logs)?;
  fs::write(logs.join("edb00000001.log"), b"one")?;
  fs::write(logs.join("edb00000002.log"), b"two")?;
  let conf = conf(tmp.path());
  let (mut live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let rbs = Rbs::open(&conf, TestHost::new(vec![])).await?;
  rbs.record_db_attach(&live).await?;
  let t1 = rbs.head().await.create;
  rbs.close().await?;
  drop(rbs);

  live.head.state = DbState::DirtyShutdown;
  live.head.gen_min_required = 1;
  live.head.gen_max_required = 2;
  let rbs = Rbs::open(&conf, TestHost::new(vec![live.clone()])).await?;
  pause().await;
  rbs.roll(true, false).await?;
  let t2 = rbs.head().await.create;
  rbs.close().await?;
  Ok(Setup {
    tmp,
    conf,
    path: live.path,
    t1,
    t2,
  })
}

#[compio::test]
async fn log_divergence() -> Void {
  let s = setup_logs().await?;
  let logs = log_dir(s.tmp.path());
  fs::write(logs.join("edb00000002.log"), b"two, then more")?;
  let r = Revert::begin(&s.conf, s.t2, 16, false, FileOpen::default()).await;
  assert!(matches!(r, Err(Error::LogDivergence(_))));

  fs::remove_file(logs.join("edb00000002.log"))?;
  let r = Revert::begin(&s.conf, s.t2, 16, false, FileOpen::default()).await;
  assert!(matches!(r, Err(Error::CannotDetermineDivergence(_))));
  assert!(s.t1 < s.t2);
  OK
}

#[compio::test]
async fn delete_logs_copies_back() -> Void {
  let s = setup_logs().await?;
  let logs = log_dir(s.tmp.path());
  fs::write(logs.join("edb00000002.log"), b"two, then more")?;
  fs::write(logs.join("edb00000003.log"), b"three")?;
  fs::write(logs.join("edb.chk"), b"host checkpoint")?;

  let open = FileOpen::default();
  let (_, rv) = Revert::begin(&s.conf, s.t2, 16, true, open.clone()).await?;
  let info = rv.execute().await?;
  assert_eq!(info.pages, 0);

  assert_eq!(fs::read(logs.join("edb00000001.log"))?, b"one");
  assert_eq!(fs::read(logs.join("edb00000002.log"))?, b"two");
  assert!(!logs.join("edb00000003.log").exists());
  assert!(!logs.join("edb.chk").exists());

  let head = FileDb::open(&s.path).await?.read_head().await?;
  assert_eq!(head.state, DbState::DirtyShutdown);
  assert_eq!((head.gen_min_required, head.gen_max_required), (1, 2));
  let map = open.map(&s.path).ok_or_else(|| std::io::Error::other("no map"))?;
  assert_eq!(map.required, (1, 2));
  assert!(map.sections_flushed > 0);
  OK
}

#[compio::test]
async fn first_pages_do_not_overlap() -> Void {
  let tmp = tempfile::tempdir()?;
  let (live, mut db) = new_db(tmp.path(), "a.db", 1).await?;
  write(&mut db, 0, &page(1, 0x01)).await?;
  write(&mut db, 1, &page(2, 0x02)).await?;
  db.sync().await?;
  assert_eq!(read(&live.path, 0).await?, page(1, 0x01));
  assert_eq!(read(&live.path, 1).await?, page(2, 0x02));
  OK
}
