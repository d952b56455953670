//! File-backed database for revert
//! 基于文件的回滚数据库
//!
//! `[head slot][shadow slot][page 1][page 2]...`; a page starts with its
//! dbtime (u64 LE) and flush type byte.
//! 头部槽 + 影子槽 + 页序列；页以 dbtime (u64 LE) 和落盘类型字节开头

use std::{
  cell::RefCell,
  collections::HashMap,
  path::{Path, PathBuf},
  rc::Rc,
};

use compio::BufResult;
use compio_fs::File;
use rbs_codec::{DbHead, db_head::DB_HEAD_LEN};
use rbs_fs::{fs, shadow};

use crate::{
  Error, Result,
  db::{DbOpen, FlushMap, FlushType, RevertDb},
};

/// One database header slot
/// 数据库头部槽位
pub const DB_HEAD_SLOT: usize = 4096;

/// Pages start here
/// 页从此处开始
pub const DB_HEAD_AREA: u64 = 2 * DB_HEAD_SLOT as u64;

const FLUSH_TYPE_AT: usize = 8;
const NEW_MARK_AT: usize = 9;

/// Stamp dbtime and flush type into a page
/// 将 dbtime 与落盘类型写入页
#[inline]
pub fn stamp(page: &mut [u8], dbtime: u64, ty: FlushType) {
  page[..8].copy_from_slice(&dbtime.to_le_bytes());
  page[FLUSH_TYPE_AT] = ty as u8;
}

/// Flush type stamped in a page
/// 页中记录的落盘类型
#[inline]
pub fn page_flush_type(page: &[u8]) -> FlushType {
  page.get(FLUSH_TYPE_AT).map_or(FlushType::Unknown, |b| FlushType::from_u8(*b))
}

/// Flush map state kept in memory
/// 内存中的落盘状态
#[derive(Debug, Clone, Default)]
pub struct MapState {
  pub pages: HashMap<u32, (FlushType, u64)>,
  pub required: (u32, u32),
  pub sections_flushed: u32,
  pub cleaned: bool,
}

type Maps = Rc<RefCell<HashMap<String, MapState>>>;

/// Flush map of one database, shared with its [`FileOpen`]
/// 单个数据库的落盘状态，与 [`FileOpen`] 共享
#[derive(Debug)]
pub struct MemFlushMap {
  maps: Maps,
  path: String,
}

impl MemFlushMap {
  fn with<R>(&self, f: impl FnOnce(&mut MapState) -> R) -> R {
    let mut maps = self.maps.borrow_mut();
    f(maps.entry(self.path.clone()).or_default())
  }
}

impl FlushMap for MemFlushMap {
  fn flush_type(&self, pgno: u32) -> FlushType {
    self.with(|m| m.pages.get(&pgno).map_or(FlushType::Unknown, |p| p.0))
  }

  fn set_flush_type(&mut self, pgno: u32, ty: FlushType, dbtime: u64) {
    self.with(|m| {
      m.pages.insert(pgno, (ty, dbtime));
    })
  }

  fn set_required_gen(&mut self, min: u32, max: u32) {
    self.with(|m| m.required = (min, max))
  }

  async fn flush_all_sections(&mut self) -> Result<()> {
    self.with(|m| m.sections_flushed += 1);
    Ok(())
  }

  async fn clean(&mut self) -> Result<()> {
    self.with(|m| {
      m.pages.clear();
      m.cleaned = true;
    });
    Ok(())
  }
}

/// Database file with a shadowed [`DbHead`] and fixed-size pages
/// 带影子 [`DbHead`] 与定长页的数据库文件
#[derive(Debug)]
pub struct FileDb {
  path: PathBuf,
  file: File,
  page_size: usize,
  map: MemFlushMap,
}

impl FileDb {
  /// Create a new database file
  /// 创建新的数据库文件
  pub async fn create(path: impl AsRef<Path>, head: &DbHead) -> Result<Self> {
    let path = path.as_ref();
    let mut file = fs::create_new(path).await?;
    shadow::write(&mut file, DB_HEAD_SLOT, &head.encode()).await?;
    Ok(Self::new(path, file, head.page_size as usize, Maps::default()))
  }

  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path.as_ref(), Maps::default()).await
  }

  async fn open_with(path: &Path, maps: Maps) -> Result<Self> {
    let file = fs::open_read_write(path).await?;
    let head = read_head(&file, path).await?;
    Ok(Self::new(path, file, head.page_size as usize, maps))
  }

  fn new(path: &Path, file: File, page_size: usize, maps: Maps) -> Self {
    Self {
      path: path.to_path_buf(),
      file,
      page_size,
      map: MemFlushMap {
        maps,
        path: path.to_string_lossy().into_owned(),
      },
    }
  }

  #[inline]
  pub fn page_size(&self) -> usize {
    self.page_size
  }

  /// Page `pgno` lives at `DB_HEAD_AREA + pgno * page_size`
  /// 页 `pgno` 位于 `DB_HEAD_AREA + pgno * page_size`
  #[inline]
  fn page_off(&self, pgno: u32) -> u64 {
    DB_HEAD_AREA + pgno as u64 * self.page_size as u64
  }

  /// Read page `pgno`, zeros past the end of file
  /// 读取页 `pgno`，超出文件末尾返回零
  pub async fn read_page(&self, pgno: u32) -> Result<Vec<u8>> {
    let off = self.page_off(pgno);
    if off + self.page_size as u64 > fs::file_len(&self.file).await? {
      return Ok(vec![0; self.page_size]);
    }
    Ok(fs::read_at(&self.file, off, self.page_size).await?)
  }
}

async fn read_head(file: &File, path: &Path) -> Result<DbHead> {
  match shadow::read(file, DB_HEAD_SLOT, DB_HEAD_LEN).await? {
    Some(buf) => Ok(DbHead::decode(&buf)?),
    None => Err(Error::DbCorrupt(path.to_string_lossy().into_owned())),
  }
}

impl RevertDb for FileDb {
  type Map = MemFlushMap;

  async fn read_head(&mut self) -> Result<DbHead> {
    read_head(&self.file, &self.path).await
  }

  async fn write_head(&mut self, head: &DbHead) -> Result<()> {
    Ok(shadow::write(&mut self.file, DB_HEAD_SLOT, &head.encode()).await?)
  }

  async fn write_page(&mut self, pgno: u32, mut page: Vec<u8>) -> Result<()> {
    page.resize(self.page_size, 0);
    let off = self.page_off(pgno);
    let end = off + self.page_size as u64;
    if end > fs::file_len(&self.file).await? {
      rbs_fs::extend_to(&self.path, end)?;
    }
    let BufResult(res, _) = fs::write_at(&mut self.file, page, off).await;
    Ok(res?)
  }

  async fn sync(&mut self) -> Result<()> {
    Ok(self.file.sync_all().await?)
  }

  fn prepare_page(&self, _pgno: u32, page: &mut [u8]) {
    if page.len() > FLUSH_TYPE_AT {
      page[FLUSH_TYPE_AT] = FlushType::Unknown as u8;
    }
  }

  fn new_page(&self, pgno: u32, page_size: usize) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    page[NEW_MARK_AT..NEW_MARK_AT + 4].copy_from_slice(&pgno.to_le_bytes());
    page
  }

  fn page_dbtime(&self, page: &[u8]) -> u64 {
    page
      .get(..8)
      .and_then(|b| b.try_into().ok())
      .map_or(0, u64::from_le_bytes)
  }

  fn flush_map(&mut self) -> &mut MemFlushMap {
    &mut self.map
  }
}

/// Opens [`FileDb`]s; flush maps of everything opened stay readable here
/// 打开 [`FileDb`]；所有已打开数据库的落盘状态可在此读取
#[derive(Debug, Clone, Default)]
pub struct FileOpen {
  maps: Maps,
}

impl FileOpen {
  /// Flush map state recorded for `path`
  /// `path` 记录的落盘状态
  pub fn map(&self, path: &str) -> Option<MapState> {
    self.maps.borrow().get(path).cloned()
  }
}

impl DbOpen for FileOpen {
  type Db = FileDb;

  async fn open(&self, path: &str) -> Result<FileDb> {
    FileDb::open_with(Path::new(path), self.maps.clone()).await
  }
}
