//! Capture side: generations, attach, roll, logs
//! 捕获侧：代号、附加、轮转、日志

mod common;

use std::fs;

use aok::{OK, Void};
use common::*;
use rbs::{Conf, DbState, Error, Pos, Rbs, RestoreDb};

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

#[compio::test]
async fn open_creates_then_loads() -> Void {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let host = TestHost::new(vec![]);

  let rbs = Rbs::open(&conf, host.clone()).await?;
  assert_eq!(rbs.gen_id(), 1);
  let head = rbs.head().await;
  assert_eq!(head.prev_create, 0);
  assert!(head.sign.is_set());
  assert_eq!(rbs.floor(), 1);
  assert!(root(tmp.path()).join("RBSedb00000001/edb00000001.rbs").exists());
  assert!(root(tmp.path()).join("RBSedb00000001/logs").is_dir());
  rbs.close().await?;

  let again = Rbs::open(&conf, host).await?;
  assert_eq!(again.gen_id(), 1);
  assert_eq!(again.head().await.create, head.create);
  OK
}

#[compio::test]
async fn capture_survives_reopen() -> Void {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let host = TestHost::new(vec![live.clone()]);

  let rbs = Rbs::open(&conf, host.clone()).await?;
  // attached lazily through the host
  // 经宿主延迟附加
  let p1 = rbs.capture_page_preimage(&live.path, 3, &page(5, 0x11)).await?;
  let p2 = rbs.capture_page_preimage(&live.path, 4, &noise(PAGE, 7)).await?;
  let p3 = rbs.capture_new_page(&live.path, 9).await?;
  assert!(p1 <= p2 && p2 <= p3);
  assert_eq!(p3.gen_id, 1);
  rbs.flush_all().await?;
  let size = rbs.head().await.logical_size;
  assert!(size > rbs_codec::head::HEAD_AREA);
  assert_eq!(rbs.head().await.attach.len(), 1);
  rbs.close().await?;

  let rbs = Rbs::open(&conf, host).await?;
  assert_eq!(rbs.head().await.logical_size, size);
  let p4 = rbs.capture_new_page(&live.path, 10).await?;
  assert!(p4 > p3);
  OK
}

#[compio::test]
async fn unknown_db_not_attached() -> Void {
  let tmp = tempfile::tempdir()?;
  let rbs = Rbs::open(&conf(tmp.path()), TestHost::new(vec![])).await?;
  let r = rbs.capture_new_page("nowhere.db", 1).await;
  assert!(matches!(r, Err(Error::NotAttached(_))));
  OK
}

#[compio::test]
async fn attach_checks_consistency() -> Void {
  let tmp = tempfile::tempdir()?;
  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let rbs = Rbs::open(&conf(tmp.path()), TestHost::new(vec![])).await?;
  rbs.record_db_attach(&live).await?;
  // same database again is fine
  // 同一数据库再次附加无妨
  rbs.record_db_attach(&live).await?;

  let mut other = live.clone();
  other.head.sign_db.id = 999;
  assert!(matches!(
    rbs.record_db_attach(&other).await,
    Err(Error::DbMismatch(_))
  ));

  // a newer header flush is accepted once it carries the snapshot signature
  // 更新的头部刷新只要带有快照签名即被接受
  let mut flushed = live.clone();
  flushed.head.sign_db_hdr_flush.id = 12345;
  flushed.head.sign_rbs_hdr_flush = rbs.sign_for_db_head_flush();
  rbs.record_db_attach(&flushed).await?;
  OK
}

#[compio::test]
async fn dirty_attach_invalidates() -> Void {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let (mut live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  live.head.state = DbState::DirtyShutdown;
  let host = TestHost::new(vec![live.clone()]);

  let rbs = Rbs::open(&conf, host.clone()).await?;
  let pos = rbs.capture_page_preimage(&live.path, 1, &page(1, 1)).await?;
  assert_eq!(pos, Pos::default());
  assert!(rbs.is_invalid());
  assert!(!rbs.sign_for_db_head_flush().is_set());
  rbs.close().await?;

  // the invalid generation starts a new chain on the next open
  // 下次打开时失效代号使新链开始
  let rbs = Rbs::open(&conf, host).await?;
  assert_eq!(rbs.gen_id(), 2);
  assert_eq!(rbs.head().await.prev_create, 0);
  assert_eq!(rbs.floor(), 2);
  OK
}

#[compio::test]
async fn corrupt_head_starts_new_chain() -> Void {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let host = TestHost::new(vec![]);
  Rbs::open(&conf, host.clone()).await?.close().await?;

  let file = root(tmp.path()).join("RBSedb00000001/edb00000001.rbs");
  let mut bin = fs::read(&file)?;
  bin[..16384].fill(0xFF);
  fs::write(&file, bin)?;

  let rbs = Rbs::open(&conf, host).await?;
  assert_eq!(rbs.gen_id(), 2);
  assert_eq!(rbs.floor(), 2);
  OK
}

#[compio::test]
async fn roll_links_and_copies_logs() -> Void {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let logs = log_dir(tmp.path());
  fs::write(logs.join("edb00000001.log"), b"log one")?;
  fs::write(logs.join("edb00000002.log"), b"log two")?;
  fs::write(logs.join("edb.log"), b"log current")?;

  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let host = TestHost::new(vec![live.clone()]);
  let rbs = Rbs::open(&conf, host.clone()).await?;
  rbs.record_db_attach(&live).await?;
  rbs.set_dbtime_dirtied(&live.path, 42).await?;
  assert_eq!(rbs.dbtime_dirtied(&live.path).await, Some(42));
  let first = rbs.head().await;
  assert!(!rbs.should_roll());

  host.set_head(&live.path, |h| {
    h.state = DbState::DirtyShutdown;
    h.gen_min_required = 1;
    h.gen_max_required = 3;
  });
  pause().await;
  rbs.roll(true, false).await?;

  assert_eq!(rbs.gen_id(), 2);
  let head = rbs.head().await;
  assert_eq!(head.prev_create, first.create);
  assert_ne!(head.sign, first.sign);
  assert_eq!(head.attach.len(), 1);
  assert_eq!(head.attach[0].dbtime_prev_dirtied, 42);
  assert!(head.logs_copied);
  assert_eq!((head.log_min, head.log_max), (1, 3));

  let copied = root(tmp.path()).join("RBSedb00000002/logs");
  assert_eq!(fs::read(copied.join("edb00000001.log"))?, b"log one");
  assert_eq!(fs::read(copied.join("edb00000002.log"))?, b"log two");
  assert_eq!(fs::read(copied.join("edb00000003.log"))?, b"log current");

  // sticky: a second call copies nothing
  // 已设置：再次调用不复制
  fs::remove_file(copied.join("edb00000001.log"))?;
  rbs.copy_required_logs(false).await?;
  assert!(!copied.join("edb00000001.log").exists());
  OK
}

#[compio::test]
async fn roll_without_link_moves_floor() -> Void {
  let tmp = tempfile::tempdir()?;
  let rbs = Rbs::open(&conf(tmp.path()), TestHost::new(vec![])).await?;
  pause().await;
  rbs.roll(true, false).await?;
  assert_eq!(rbs.floor(), 1);
  pause().await;
  rbs.roll(false, false).await?;
  assert_eq!(rbs.gen_id(), 3);
  assert_eq!(rbs.head().await.prev_create, 0);
  assert_eq!(rbs.floor(), 3);
  OK
}

#[compio::test]
async fn out_of_space() -> Void {
  let tmp = tempfile::tempdir()?;
  let mut conf = conf(tmp.path());
  conf.push(Conf::MaxSegs(8));
  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let rbs = Rbs::open(&conf, TestHost::new(vec![live.clone()])).await?;
  rbs.record_db_attach(&live).await?;

  // short pages are stored as is when they do not compress
  // 无法压缩的短页原样保存
  let mut err = None;
  let mut ok = 0;
  for i in 0..16 {
    match rbs.capture_page_preimage(&live.path, i, &noise(1000, i as u64 + 1)).await {
      Ok(pos) => {
        assert!(pos.seg <= 8);
        ok += 1;
      }
      Err(e) => {
        err = Some(e);
        break;
      }
    }
  }
  assert!(ok > 0);
  assert!(matches!(err, Some(Error::OutOfSpace(1))));
  // what was accepted is still readable after a flush
  // 已接受的内容刷盘后仍可读取
  rbs.flush_all().await?;
  assert!(rbs.head().await.logical_size <= rbs_codec::seg::seg_off(9, 512));
  OK
}

#[compio::test]
async fn restore_map() -> Void {
  let tmp = tempfile::tempdir()?;
  let mut conf = conf(tmp.path());
  conf.push(Conf::MaxRequiredRange(4));
  let logs = log_dir(tmp.path());
  for g in 5..=7 {
    fs::write(logs.join(format!("edb0000000{g}.log")), format!("log {g}"))?;
  }
  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let restored = vec![RestoreDb {
    path: live.path.clone(),
    head: live.head.clone(),
    gen_min: 5,
    gen_max: 7,
  }];

  let none = Rbs::open_from_restore(&conf, TestHost::new(vec![]), restored.clone(), 1, 9).await?;
  assert!(none.is_none());

  let Some(rbs) = Rbs::open_from_restore(&conf, TestHost::new(vec![]), restored, 5, 7).await? else {
    panic!("restore refused");
  };
  let head = rbs.head().await;
  assert_eq!(head.attach.len(), 1);
  assert_eq!(head.attach[0].name, live.path);
  assert!(head.logs_copied);
  assert_eq!((head.log_min, head.log_max), (5, 7));
  let copied = root(tmp.path()).join("RBSedb00000001/logs");
  assert_eq!(fs::read(copied.join("edb00000007.log"))?, b"log 7");
  OK
}

#[compio::test]
async fn restore_mismatch_rolls() -> Void {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let rbs = Rbs::open(&conf, TestHost::new(vec![])).await?;
  rbs.record_db_attach(&live).await?;
  rbs.close().await?;
  drop(rbs);

  let mut head = live.head.clone();
  head.sign_db.id = 77;
  let restored = vec![RestoreDb {
    path: live.path.clone(),
    head,
    gen_min: 0,
    gen_max: 0,
  }];
  let rbs = Rbs::open_from_restore(&conf, TestHost::new(vec![]), restored, 0, 0)
    .await?
    .ok_or_else(|| std::io::Error::other("restore refused"))?;
  assert_eq!(rbs.gen_id(), 2);
  let head = rbs.head().await;
  assert_eq!(head.prev_create, 0);
  assert_eq!(head.attach[0].sign_db.id, 77);
  assert_eq!(rbs.floor(), 2);
  OK
}

#[test]
fn conf_checks() {
  assert!(matches!(rbs::Cfg::new(&[]), Err(Error::InvalidConf(_))));
  let bad = [Conf::LogDir("x".into()), Conf::SegSize(1000)];
  assert!(matches!(rbs::Cfg::new(&bad), Err(Error::InvalidConf(_))));
  let bad = [Conf::LogDir("x".into()), Conf::PageSize(65536)];
  assert!(matches!(rbs::Cfg::new(&bad), Err(Error::InvalidConf(_))));
  let bad = [Conf::LogDir("x".into()), Conf::CleanIntervalSec(0)];
  assert!(matches!(rbs::Cfg::new(&bad), Err(Error::InvalidConf(_))));
  let Ok(cfg) = rbs::Cfg::new(&[Conf::LogDir("x".into()), Conf::BufSegs(2)]) else {
    panic!("valid conf rejected");
  };
  assert_eq!(cfg.root, std::path::PathBuf::from("x"));
  assert_eq!(cfg.extend, 2 * 4096);
}

#[compio::test]
async fn concurrent_first_capture_attaches_once() -> Void {
  let tmp = tempfile::tempdir()?;
  let (a, _da) = new_db(tmp.path(), "a.db", 1).await?;
  let (b, _db) = new_db(tmp.path(), "b.db", 2).await?;
  let host = TestHost::new(vec![a.clone()]);
  let rbs = Rbs::open(&conf(tmp.path()), host.clone()).await?;
  rbs.record_db_attach(&a).await?;
  pause().await;
  rbs.roll(true, false).await?;

  host.0.borrow_mut().push(b.clone());
  let pg1 = page(1, 0x01);
  let pg2 = page(2, 0x02);
  let (p1, p2) = futures::join!(
    rbs.capture_page_preimage(&b.path, 1, &pg1),
    rbs.capture_page_preimage(&b.path, 2, &pg2),
  );
  assert_eq!(p1?.gen_id, 2);
  assert_eq!(p2?.gen_id, 2);
  let head = rbs.head().await;
  assert_eq!(head.attach.iter().filter(|x| x.name == b.path).count(), 1);
  assert_eq!(head.attach.len(), 2);
  OK
}

/// Header of generation 1 as it is on disk
/// 磁盘上第 1 代的头部
async fn disk_head(dir: &std::path::Path) -> rbs::Result<(rbs::GenHead, Vec<u8>)> {
  let path = root(dir).join("RBSedb00000001/edb00000001.rbs");
  let file = rbs_fs::fs::open_read(&path).await?;
  let Some(bin) =
    rbs_fs::shadow::read(&file, rbs_codec::head::HEAD_SLOT, rbs_codec::head::HEAD_LEN).await?
  else {
    return Err(Error::HeadCorrupt(1));
  };
  Ok((rbs::GenHead::decode(&bin)?, fs::read(&path)?))
}

/// Every record between the header area and the logical size
/// 头部区域到逻辑大小之间的全部记录
fn records(head: &rbs::GenHead, bin: &[u8]) -> rbs::Result<Vec<(rbs_codec::Rec, u32)>> {
  let start = rbs_codec::head::HEAD_AREA as usize;
  let mut r = rbs_codec::Unpack::new(head.seg_size as usize);
  r.load(1, bin[start..head.logical_size as usize].to_vec());
  let mut li = Vec::new();
  while let Some(x) = r.next()? {
    li.push(x);
  }
  Ok(li)
}

#[compio::test]
async fn header_never_ahead_of_written_segments() -> Void {
  let tmp = tempfile::tempdir()?;
  let conf = conf(tmp.path());
  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let host = TestHost::new(vec![live.clone()]);
  let rbs = Rbs::open(&conf, host.clone()).await?;
  rbs.record_db_attach(&live).await?;
  let attached = rbs.head().await.logical_size;

  // several buffers of 4 segments each, never flushed by the caller
  // 多个 4 段缓冲区，调用方从不刷盘
  let mut last = Pos::default();
  for i in 0..6 {
    last = rbs.capture_page_preimage(&live.path, i, &noise(PAGE, i as u64 + 1)).await?;
  }
  for _ in 0..5 {
    pause().await;
  }

  let (head, bin) = disk_head(tmp.path()).await?;
  assert!(head.logical_size > attached);
  assert!(head.logical_size as usize <= bin.len());
  assert!(head.logical_size <= rbs_codec::seg::seg_off(last.seg + 1, 512));
  let seen = records(&head, &bin)?;
  assert!(!seen.is_empty());
  assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
  drop(rbs);
  for _ in 0..3 {
    pause().await;
  }

  // reopen from what the header vouches for and keep appending
  // 从头部确认的位置重新打开并继续追加
  let (head, _) = disk_head(tmp.path()).await?;
  let rbs = Rbs::open(&conf, host).await?;
  assert_eq!(rbs.head().await.logical_size, head.logical_size);
  rbs.capture_new_page(&live.path, 77).await?;
  rbs.close().await?;
  let (head, bin) = disk_head(tmp.path()).await?;
  let seen = records(&head, &bin)?;
  assert_eq!(
    seen.last().map(|x| &x.0),
    Some(&rbs_codec::Rec::DbNewPage { dbid: 0, pgno: 77 })
  );
  OK
}

#[compio::test]
async fn writer_restarts_after_failed_write() -> Void {
  let tmp = tempfile::tempdir()?;
  let mut conf = conf(tmp.path());
  conf.push(Conf::ExtendSize(2048));
  let (live, _db) = new_db(tmp.path(), "a.db", 1).await?;
  let rbs = Rbs::open(&conf, TestHost::new(vec![live.clone()])).await?;
  rbs.record_db_attach(&live).await?;
  let attached = rbs.head().await.logical_size;

  // growing the file fails while it is moved away
  // 文件被移走时扩展失败
  let file = root(tmp.path()).join("RBSedb00000001/edb00000001.rbs");
  let moved = file.with_extension("moved");
  fs::rename(&file, &moved)?;
  rbs.capture_page_preimage(&live.path, 1, &noise(PAGE, 1)).await?;
  pause().await;
  assert_eq!(rbs.head().await.logical_size, attached);
  fs::rename(&moved, &file)?;

  // the next full buffer starts a writer that drains the backlog
  // 下一个满缓冲区启动写任务，写出积压数据
  for i in 2..5 {
    rbs.capture_page_preimage(&live.path, i, &noise(PAGE, i as u64)).await?;
  }
  for _ in 0..5 {
    pause().await;
  }
  assert!(rbs.head().await.logical_size > attached);
  rbs.flush_all().await?;
  let (head, bin) = disk_head(tmp.path()).await?;
  assert_eq!(records(&head, &bin)?.len(), 2 + 4);
  OK
}
