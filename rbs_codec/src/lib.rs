#![cfg_attr(docsrs, feature(doc_cfg))]

//! rbs_codec - Wire formats of the revert snapshot log
//! 回滚快照日志的磁盘格式
//!
//! A generation file is `[header slot][shadow slot][segment 1][segment 2]...`.
//! Each segment starts with a [`SegHead`] and holds packed records; a record
//! too big for the space left is split into `FragBegin` + `FragContinue`.
//! 代号文件为 头部槽 + 影子槽 + 段序列。每段以段头开始，装载紧凑记录；
//! 放不下的记录拆分为 FragBegin + FragContinue

pub mod ckp;
pub mod db_head;
mod disk;
pub mod error;
pub mod head;
pub mod pack;
pub mod preimage;
pub mod rec;
pub mod seg;
pub mod unpack;

pub use ckp::{CkpState, Pos, RevertCkp};
pub use db_head::{DbHead, DbState};
pub use error::{Error, Reason, Result};
pub use head::{AttachInfo, GenHead, Sign};
pub use pack::SegBuf;
pub use preimage::Codec;
pub use rec::Rec;
pub use seg::SegHead;
pub use unpack::Unpack;
