//! Bookkeeping after the oldest generation is applied
//! 应用完最旧代号后的收尾工作

use std::io::ErrorKind;

use log::info;
use rbs_codec::{CkpState, DbState};

use super::{Revert, RevertInfo, ckp};
use crate::{
  Result,
  db::{DbOpen, FlushMap, RevertDb},
  generation::open_head,
  layout::LOG_EXT,
  logs::{check_logs, copy_logs},
  now_ms,
};

impl<O: DbOpen> Revert<O> {
  /// Copy the logs back, restore database headers, drop the checkpoint
  /// 复制回日志、恢复数据库头部、删除检查点
  pub(super) async fn finish(mut self) -> Result<RevertInfo> {
    let cfg = self.cfg.clone();
    let (_, min_head) = open_head(&cfg, self.min).await?;
    check_logs(&cfg, &min_head, false).await?;

    if self.ckp.state != CkpState::CopyingLogs {
      if self.delete_logs {
        let n = rbs_fs::rm_ext(&cfg.log_dir, LOG_EXT)?;
        info!("rbs revert deleted {n} logs in {}", cfg.log_dir.display());
      }
      self.ckp.state = CkpState::CopyingLogs;
      self.save_ckp().await?;
    }
    copy_logs(
      &cfg,
      &cfg.gen_log_dir(self.min),
      &cfg.log_dir,
      min_head.log_min,
      min_head.log_max,
      false,
      false,
    )
    .await?;
    match std::fs::remove_file(cfg.sys_ckp_path()) {
      Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
      _ => {}
    }

    for c in &mut self.ctxs {
      let mut head = c.restored.take().unwrap_or_else(|| c.head.clone());
      head.revert_count = c.head.revert_count;
      head.revert_from = c.head.revert_from;
      head.revert_to = c.head.revert_to;
      head.revert_page_count = c.head.revert_page_count + c.reverted;
      head.commit_before_revert = c.head.gen_max_committed;
      if head.state == DbState::RevertInProgress {
        head.state = DbState::DirtyShutdown;
      }
      let map = c.db.flush_map();
      if head.state == DbState::CleanShutdown {
        map.clean().await?;
      } else {
        map.set_required_gen(head.gen_min_required.max(1), head.gen_max_required.max(1));
        map.flush_all_sections().await?;
      }
      c.db.write_head(&head).await?;
      c.db.sync().await?;
      info!(
        "rbs revert restored {} to state {:?}, {} pages",
        c.path, head.state, c.reverted
      );
    }

    self.ckp.state = CkpState::Completed;
    self.save_ckp().await?;
    let info = RevertInfo {
      from: self.ckp.tm_execute_begin,
      to: self.target,
      seconds: self.ckp.sec_in_revert,
      pages: self.ckp.pages_reverted,
      log_start: self.ckp.log_min_start,
      log_end: self.ckp.log_max_start,
    };
    if let Some(t) = &mut self.trace {
      t.line(format_args!(
        "End {} pages {} seconds {}",
        now_ms(),
        info.pages,
        info.seconds
      ));
      t.flush().await?;
    }
    drop(self.ckp_file.take());
    ckp::remove(&cfg)?;
    info!(
      "rbs revert to {} done, {} pages in {}s",
      info.to, info.pages, info.seconds
    );
    Ok(info)
  }
}
