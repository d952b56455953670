//! Shared test helpers / 共享测试辅助

#![allow(dead_code)]

use std::{
  cell::RefCell,
  path::{Path, PathBuf},
  rc::Rc,
};

use rbs::{Conf, DbHead, DbState, FileDb, FlushType, Host, LiveDb, RevertDb, Sign, file_db::stamp};

pub const PAGE: usize = 4096;

/// Host whose database list tests can edit
/// 测试可修改数据库列表的宿主
#[derive(Default)]
pub struct TestHost(pub RefCell<Vec<LiveDb>>);

impl TestHost {
  pub fn new(dbs: Vec<LiveDb>) -> Rc<Self> {
    Rc::new(Self(RefCell::new(dbs)))
  }

  pub fn set_head(&self, path: &str, f: impl FnOnce(&mut DbHead)) {
    if let Some(d) = self.0.borrow_mut().iter_mut().find(|d| d.path == path) {
      f(&mut d.head);
    }
  }
}

impl Host for TestHost {
  fn dbs(&self) -> Vec<LiveDb> {
    self.0.borrow().clone()
  }
}

pub fn log_dir(dir: &Path) -> PathBuf {
  dir.join("log")
}

pub fn root(dir: &Path) -> PathBuf {
  dir.join("rbs")
}

pub fn conf(dir: &Path) -> Vec<Conf> {
  let _ = std::fs::create_dir_all(log_dir(dir));
  vec![
    Conf::LogDir(log_dir(dir)),
    Conf::Root(root(dir)),
    Conf::SegSize(512),
    Conf::BufSegs(4),
    Conf::PageSize(PAGE),
  ]
}

pub fn db_head(state: DbState, id: u64) -> DbHead {
  DbHead {
    state,
    page_size: PAGE as u32,
    dbtime: 1,
    sign_db: Sign { id, time: 1 },
    sign_db_hdr_flush: Sign { id: id + 100, time: 2 },
    ..Default::default()
  }
}

/// Create a database file, return the host's view of it
/// 创建数据库文件，返回宿主视角的描述
pub async fn new_db(dir: &Path, name: &str, id: u64) -> rbs::Result<(LiveDb, FileDb)> {
  let path = dir.join(name);
  let head = db_head(DbState::CleanShutdown, id);
  let db = FileDb::create(&path, &head).await?;
  Ok((
    LiveDb {
      path: path.to_string_lossy().into_owned(),
      head,
    },
    db,
  ))
}

/// Page filled with `fill`, stamped with `dbtime`
/// 以 `fill` 填充并写入 `dbtime` 的页
pub fn page(dbtime: u64, fill: u8) -> Vec<u8> {
  let mut p = vec![fill; PAGE];
  stamp(&mut p, dbtime, FlushType::Rock);
  p
}

/// What a pre-image looks like once written back
/// 前像写回后的样子
pub fn reverted(mut p: Vec<u8>) -> Vec<u8> {
  p[8] = FlushType::Unknown as u8;
  p
}

/// Bytes that lz4 cannot shrink
/// lz4 无法压缩的字节
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
  let mut x = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
  (0..len)
    .map(|_| {
      x ^= x << 13;
      x ^= x >> 7;
      x ^= x << 17;
      x as u8
    })
    .collect()
}

pub async fn write(db: &mut FileDb, pgno: u32, p: &[u8]) -> rbs::Result<()> {
  db.write_page(pgno, p.to_vec()).await
}

pub async fn pause() {
  compio::time::sleep(std::time::Duration::from_millis(20)).await;
}
