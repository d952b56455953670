//! Seams to the host database engine
//! 与宿主数据库引擎的接口

use std::future::Future;

use rbs_codec::{AttachInfo, DbHead, Sign};

use crate::Result;

/// Live database as the host sees it
/// 宿主视角下的在线数据库
#[derive(Debug, Clone)]
pub struct LiveDb {
  pub path: String,
  pub head: DbHead,
}

/// Database entry of a restore map
/// 恢复映射中的数据库条目
#[derive(Debug, Clone)]
pub struct RestoreDb {
  pub path: String,
  pub head: DbHead,
  /// Logs already required by the restored database, 0 if none
  /// 恢复后数据库已需要的日志，0 表示无
  pub gen_min: u32,
  pub gen_max: u32,
}

/// Capture-side host: lists attached databases
/// 捕获侧宿主：列出已附加的数据库
pub trait Host {
  fn dbs(&self) -> Vec<LiveDb>;

  fn db(&self, path: &str) -> Option<LiveDb> {
    self.dbs().into_iter().find(|d| d.path == path)
  }
}

/// On-disk flush state of a page
/// 页的落盘状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FlushType {
  #[default]
  Unknown = 0,
  Rock = 1,
  Paper = 2,
  Scissors = 3,
}

impl FlushType {
  #[inline]
  pub fn from_u8(v: u8) -> Self {
    match v {
      1 => Self::Rock,
      2 => Self::Paper,
      3 => Self::Scissors,
      _ => Self::Unknown,
    }
  }
}

/// Per-page flush-state service of a database
/// 数据库的页落盘状态服务
pub trait FlushMap {
  fn flush_type(&self, pgno: u32) -> FlushType;

  fn set_flush_type(&mut self, pgno: u32, ty: FlushType, dbtime: u64);

  fn set_required_gen(&mut self, min: u32, max: u32);

  fn flush_all_sections(&mut self) -> impl Future<Output = Result<()>>;

  fn clean(&mut self) -> impl Future<Output = Result<()>>;
}

/// Database opened for revert
/// 为回滚打开的数据库
pub trait RevertDb {
  type Map: FlushMap;

  fn read_head(&mut self) -> impl Future<Output = Result<DbHead>>;

  fn write_head(&mut self, head: &DbHead) -> impl Future<Output = Result<()>>;

  /// Write page `pgno`, growing the file when needed
  /// 写入页 `pgno`，必要时扩展文件
  fn write_page(&mut self, pgno: u32, page: Vec<u8>) -> impl Future<Output = Result<()>>;

  fn sync(&mut self) -> impl Future<Output = Result<()>>;

  /// Reset the flush state stamped in a pre-image before it is written back
  /// 写回前重置前像中的落盘状态
  fn prepare_page(&self, pgno: u32, page: &mut [u8]);

  /// Template of a freshly allocated page
  /// 新分配页的模板
  fn new_page(&self, pgno: u32, page_size: usize) -> Vec<u8>;

  fn page_dbtime(&self, page: &[u8]) -> u64;

  fn flush_map(&mut self) -> &mut Self::Map;
}

/// Opens databases by path for revert
/// 按路径打开数据库用于回滚
pub trait DbOpen {
  type Db: RevertDb;

  fn open(&self, path: &str) -> impl Future<Output = Result<Self::Db>>;
}

/// Database agrees with an attach entry: same database signature, and either
/// the header-flush signature or the snapshot signature it last saw matches
/// 数据库与附加条目一致：数据库签名相同，且头部刷新签名或其最后看到的快照签名匹配
pub fn consistent(info: &AttachInfo, head: &DbHead, rbs_sign: Sign) -> bool {
  info.sign_db == head.sign_db
    && ((head.sign_db_hdr_flush.is_set() && head.sign_db_hdr_flush == info.sign_db_hdr_flush)
      || (head.sign_rbs_hdr_flush.is_set() && head.sign_rbs_hdr_flush == rbs_sign))
}
