//! Revert checkpoint file / 回滚检查点文件

use std::io::ErrorKind;

use compio_fs::File;
use log::warn;
use rbs_codec::{
  RevertCkp,
  ckp::{CKP_LEN, FILE_TYPE_CKP},
};
use rbs_fs::{fs, shadow};

use crate::{Cfg, Result};

/// One checkpoint slot / 检查点槽位
pub const CKP_SLOT: usize = 512;

const _: () = assert!(CKP_LEN + shadow::CRC_SIZE <= CKP_SLOT);

/// Load the checkpoint; a missing or unreadable file gives a fresh one
/// 加载检查点；文件缺失或不可读时返回空检查点
pub async fn load(cfg: &Cfg) -> Result<RevertCkp> {
  let path = cfg.ckp_path();
  let file = match fs::open_read(&path).await {
    Ok(f) => f,
    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RevertCkp::default()),
    Err(e) => return Err(e.into()),
  };
  let ckp = match shadow::read(&file, CKP_SLOT, CKP_LEN).await? {
    Some(buf) => match RevertCkp::decode(&buf) {
      Ok(ckp) if ckp.file_type == FILE_TYPE_CKP => Some(ckp),
      _ => None,
    },
    None => None,
  };
  Ok(ckp.unwrap_or_else(|| {
    warn!("rbs revert checkpoint {} unreadable, ignored", path.display());
    RevertCkp::default()
  }))
}

/// Checkpoint file kept open for the whole revert
/// 回滚期间保持打开的检查点文件
pub struct CkpFile {
  file: File,
}

impl CkpFile {
  pub async fn open(cfg: &Cfg) -> Result<Self> {
    Ok(Self {
      file: fs::open_read_write_create(cfg.ckp_path()).await?,
    })
  }

  pub async fn save(&mut self, ckp: &RevertCkp) -> Result<()> {
    shadow::write(&mut self.file, CKP_SLOT, &ckp.encode()).await?;
    Ok(())
  }
}

/// Delete the checkpoint after a completed revert
/// 回滚完成后删除检查点
pub fn remove(cfg: &Cfg) -> Result<()> {
  match std::fs::remove_file(cfg.ckp_path()) {
    Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
    _ => Ok(()),
  }
}
