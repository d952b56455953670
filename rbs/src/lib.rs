#![cfg_attr(docsrs, feature(doc_cfg))]

//! rbs - Revert snapshot log
//! 回滚快照日志
//!
//! Before a database page is first modified its pre-image is appended to the
//! current generation. Generations roll over time and are linked by creation
//! time; a revert walks them newest to oldest and writes the pre-images back.
//! 数据库页首次修改前，其前像被追加到当前代号。代号随时间轮转并以创建时间相连；
//! 回滚从新到旧遍历代号并写回前像

pub mod cleaner;
pub mod conf;
pub mod db;
pub mod error;
pub mod file_db;
mod generation;
mod layout;
mod logs;
pub mod revert;
mod snap;

pub use cleaner::{Cleaner, PassStat};
pub use conf::{Cfg, Conf};
pub use db::{DbOpen, FlushMap, FlushType, Host, LiveDb, RestoreDb, RevertDb};
pub use error::{Error, Result};
pub use file_db::{FileDb, FileOpen};
pub use layout::{CKP_EXT, DIR_PREFIX, EXT, LOG_EXT, LOG_SUBDIR};
pub use rbs_codec::{Codec, DbHead, DbState, GenHead, Pos, Sign};
pub use revert::{Revert, RevertHandle, RevertInfo};
pub use snap::Rbs;

/// Wall clock in unix milliseconds
/// unix 毫秒时间
#[inline]
pub(crate) fn now_ms() -> u64 {
  coarsetime::Clock::now_since_epoch().as_millis()
}
