//! Configuration
//! 配置

use std::path::PathBuf;

use rbs_codec::{Codec, rec::{DB_PAGE_HEAD, REC_MAX}};

use crate::error::{Error, Result};

/// Options, later ones win
/// 配置项，后出现的覆盖前面的
#[derive(Clone, Debug)]
pub enum Conf {
  /// Snapshot root, defaults to the log dir
  /// 快照根目录，默认为日志目录
  Root(PathBuf),
  /// Live transaction log dir
  /// 事务日志目录
  LogDir(PathBuf),
  /// Host checkpoint dir, defaults to the log dir
  /// 宿主检查点目录，默认为日志目录
  SysDir(PathBuf),
  BaseName(String),
  /// Power of two in 512..=65536
  /// 512..=65536 之间的 2 的幂
  SegSize(usize),
  /// Segments per write buffer
  /// 每个写缓冲区的段数
  BufSegs(usize),
  /// File growth step, raised to one buffer at least
  /// 文件增长步长，至少为一个缓冲区
  ExtendSize(u64),
  /// Database page size
  /// 数据库页大小
  PageSize(usize),
  Codec(Codec),
  /// Segments a generation may hold
  /// 单个代号可容纳的段数
  MaxSegs(u32),
  /// Generation age that asks for a roll
  /// 需要轮转的代号年龄
  RollSec(u64),
  CleanEnable(bool),
  CleanIntervalSec(u64),
  /// 0 disables the age rule
  /// 0 表示不按年龄清理
  MaxAgeSec(u64),
  LowDiskBytes(u64),
  MaxSpaceLowDisk(u64),
  /// Cleaner passes before it exits, 0 is unbounded
  /// 清理器退出前的轮数，0 表示无限
  MaxPasses(u32),
  /// Capture enabled
  /// 是否启用捕获
  Enabled(bool),
  /// Widest restore log range that may start a generation
  /// 允许创建代号的最大恢复日志范围
  MaxRequiredRange(u32),
  /// Revert trace rotation size
  /// 回滚跟踪文件轮换大小
  TraceMax(u64),
}

pub const DEFAULT_BASE: &str = "edb";
pub const DEFAULT_SEG_SIZE: usize = 4096;
pub const DEFAULT_BUF_SEGS: usize = 256;
pub const DEFAULT_PAGE_SIZE: usize = 32768;
pub const DEFAULT_MAX_SEGS: u32 = 1 << 24;
pub const DEFAULT_ROLL_SEC: u64 = 86400;
pub const DEFAULT_CLEAN_INTERVAL_SEC: u64 = 300;
pub const DEFAULT_MAX_REQUIRED_RANGE: u32 = 64;
pub const DEFAULT_TRACE_MAX: u64 = 50 << 20;

/// Resolved configuration
/// 解析后的配置
#[derive(Clone, Debug)]
pub struct Cfg {
  pub root: PathBuf,
  pub log_dir: PathBuf,
  pub sys_dir: PathBuf,
  pub base: String,
  pub seg_size: usize,
  pub buf_segs: usize,
  pub extend: u64,
  pub page_size: usize,
  pub codec: Codec,
  pub max_segs: u32,
  pub roll_sec: u64,
  pub clean_enable: bool,
  pub clean_interval_sec: u64,
  pub max_age_sec: u64,
  pub low_disk: u64,
  pub max_space_low_disk: u64,
  pub max_passes: u32,
  pub enabled: bool,
  pub max_required_range: u32,
  pub trace_max: u64,
}

impl Cfg {
  pub fn new(conf: &[Conf]) -> Result<Self> {
    let mut root = None;
    let mut log_dir = None;
    let mut sys_dir = None;
    let mut base = DEFAULT_BASE.to_owned();
    let mut seg_size = DEFAULT_SEG_SIZE;
    let mut buf_segs = DEFAULT_BUF_SEGS;
    let mut extend = 0;
    let mut page_size = DEFAULT_PAGE_SIZE;
    let mut codec = Codec::default();
    let mut max_segs = DEFAULT_MAX_SEGS;
    let mut roll_sec = DEFAULT_ROLL_SEC;
    let mut clean_enable = false;
    let mut clean_interval_sec = DEFAULT_CLEAN_INTERVAL_SEC;
    let mut max_age_sec = 0;
    let mut low_disk = 0;
    let mut max_space_low_disk = 0;
    let mut max_passes = 0;
    let mut enabled = true;
    let mut max_required_range = DEFAULT_MAX_REQUIRED_RANGE;
    let mut trace_max = DEFAULT_TRACE_MAX;

    for c in conf {
      match c {
        Conf::Root(p) => root = Some(p.clone()),
        Conf::LogDir(p) => log_dir = Some(p.clone()),
        Conf::SysDir(p) => sys_dir = Some(p.clone()),
        Conf::BaseName(s) => base = s.clone(),
        Conf::SegSize(n) => seg_size = *n,
        Conf::BufSegs(n) => buf_segs = *n,
        Conf::ExtendSize(n) => extend = *n,
        Conf::PageSize(n) => page_size = *n,
        Conf::Codec(c) => codec = *c,
        Conf::MaxSegs(n) => max_segs = *n,
        Conf::RollSec(n) => roll_sec = *n,
        Conf::CleanEnable(b) => clean_enable = *b,
        Conf::CleanIntervalSec(n) => clean_interval_sec = *n,
        Conf::MaxAgeSec(n) => max_age_sec = *n,
        Conf::LowDiskBytes(n) => low_disk = *n,
        Conf::MaxSpaceLowDisk(n) => max_space_low_disk = *n,
        Conf::MaxPasses(n) => max_passes = *n,
        Conf::Enabled(b) => enabled = *b,
        Conf::MaxRequiredRange(n) => max_required_range = *n,
        Conf::TraceMax(n) => trace_max = *n,
      }
    }

    let Some(log_dir) = log_dir else {
      return Err(Error::InvalidConf("LogDir is required"));
    };
    if !seg_size.is_power_of_two() || !(512..=65536).contains(&seg_size) {
      return Err(Error::InvalidConf("SegSize must be a power of two in 512..=65536"));
    }
    if !page_size.is_power_of_two() || page_size < 512 || page_size + DB_PAGE_HEAD > REC_MAX {
      return Err(Error::InvalidConf("PageSize must be a power of two in 512..=32768"));
    }
    if buf_segs == 0 {
      return Err(Error::InvalidConf("BufSegs must be positive"));
    }
    if clean_interval_sec == 0 {
      return Err(Error::InvalidConf("CleanIntervalSec must be positive"));
    }
    if base.is_empty() {
      return Err(Error::InvalidConf("BaseName is empty"));
    }
    let buf_bytes = (seg_size * buf_segs) as u64;

    Ok(Self {
      root: root.unwrap_or_else(|| log_dir.clone()),
      sys_dir: sys_dir.unwrap_or_else(|| log_dir.clone()),
      log_dir,
      base,
      seg_size,
      buf_segs,
      extend: extend.max(buf_bytes),
      page_size,
      codec,
      max_segs,
      roll_sec,
      clean_enable,
      clean_interval_sec,
      max_age_sec,
      low_disk,
      max_space_low_disk,
      max_passes,
      enabled,
      max_required_range,
      trace_max,
    })
  }
}
