#![cfg_attr(docsrs, feature(doc_cfg))]

//! rbs_fs - File operations for the revert snapshot log
//! 回滚快照日志的文件操作

pub mod fs;
pub mod gen_id;
pub mod shadow;
pub mod visit;

pub use fs::{atomic_write, copy_file, extend_to, file_len, read_at, write_at};
pub use gen_id::{decode_gen, encode_gen, gen_range};
pub use visit::{dir_size, rm_dir, rm_ext};
