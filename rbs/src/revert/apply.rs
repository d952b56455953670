//! Applying one generation / 应用单个代号

use log::{debug, info};
use rbs_codec::{CkpState, Pos, Rec, preimage};

use super::{Revert, read::GenReader};
use crate::{
  Result,
  db::{DbOpen, FlushMap, FlushType, RevertDb},
  generation::open_head,
};

impl<O: DbOpen> Revert<O> {
  /// Apply generation `g`. With `header_only` just collect the database
  /// headers it captured.
  /// 应用代号 `g`。`header_only` 时只收集其捕获的数据库头部
  pub(super) async fn apply_gen(&mut self, g: u32, header_only: bool) -> Result<()> {
    let (file, head) = open_head(&self.cfg, g).await?;
    self.ckp.state = if header_only {
      CkpState::CopyingLogs
    } else {
      CkpState::InProgress
    };
    self.ckp.pos = Pos { gen_id: g, seg: 0 };
    self.ckp.tm_create_current = head.create;
    self.save_ckp().await?;
    info!(
      "rbs revert applying generation {g}, {} bytes",
      head.logical_size
    );

    // Parse everything first so a corrupt generation writes nothing
    if !header_only {
      let mut reader = GenReader::new(&file, &head);
      while reader.next().await?.is_some() {}
    }

    let mut ids: Vec<Option<usize>> = head
      .attach
      .iter()
      .map(|a| self.ctx_of(&a.name))
      .collect();
    let page_size = head.page_size as usize;
    let collect_hdr = g == self.min;
    let mut last_seg = 0;
    let mut reader = GenReader::new(&file, &head);
    while let Some((rec, seg)) = reader.next().await? {
      last_seg = seg;
      let dbid = rec.dbid() as usize;
      match rec {
        Rec::DbAttach { name, .. } => {
          if ids.len() <= dbid {
            ids.resize(dbid + 1, None);
          }
          ids[dbid] = self.ctx_of(&name);
        }
        Rec::DbHdr { head: hdr, .. } => {
          if collect_hdr
            && let Some(Some(i)) = ids.get(dbid)
            && self.ctxs[*i].restored.is_none()
          {
            self.ctxs[*i].restored = Some(hdr);
          }
        }
        Rec::DbPage {
          pgno, flags, data, ..
        } if !header_only => {
          if let Some(Some(i)) = ids.get(dbid)
            && self.ctxs[*i].seen.insert(pgno)
          {
            let mut page = preimage::restore(&data, flags, page_size)?;
            if page.len() < page_size {
              page.try_reserve_exact(page_size - page.len())?;
              page.resize(page_size, 0);
            }
            let c = &mut self.ctxs[*i];
            c.db.prepare_page(pgno, &mut page);
            c.pages.try_reserve(1)?;
            c.pages.push((pgno, page));
            self.cached += 1;
          }
        }
        Rec::DbNewPage { pgno, .. } if !header_only => {
          if let Some(Some(i)) = ids.get(dbid)
            && self.ctxs[*i].seen.insert(pgno)
          {
            let c = &mut self.ctxs[*i];
            let page = c.db.new_page(pgno, page_size);
            c.pages.try_reserve(1)?;
            c.pages.push((pgno, page));
            self.cached += 1;
          }
        }
        _ => {}
      }

      if header_only {
        if self.ctxs.iter().all(|c| c.restored.is_some()) {
          break;
        }
      } else if self.cached >= self.cache_pages {
        self.ckp.pos.seg = last_seg;
        self.flush_pages().await?;
        self.check_cancel()?;
      }
    }

    if !header_only {
      self.ckp.pos.seg = last_seg;
      self.flush_pages().await?;
      for c in &mut self.ctxs {
        c.seen.clear();
      }
    }
    Ok(())
  }

  /// Index of the context for database `path`
  /// 数据库 `path` 对应上下文的下标
  #[inline]
  fn ctx_of(&self, path: &str) -> Option<usize> {
    self.ctxs.iter().position(|c| c.path == path)
  }

  /// Write cached pages back in page order, then persist progress
  /// 按页号顺序写回缓存页，然后持久化进度
  pub(super) async fn flush_pages(&mut self) -> Result<()> {
    let mut total = 0;
    for c in &mut self.ctxs {
      if c.pages.is_empty() {
        continue;
      }
      c.pages.sort_unstable_by_key(|p| p.0);
      let n = c.pages.len() as u64;
      for (pgno, page) in c.pages.drain(..) {
        let dbtime = c.db.page_dbtime(&page);
        c.db.write_page(pgno, page).await?;
        c.db.flush_map().set_flush_type(pgno, FlushType::Unknown, dbtime);
        if let Some(t) = &mut self.trace {
          t.page(pgno, dbtime);
        }
      }
      c.db.sync().await?;
      c.reverted += n;
      total += n;
      debug!("rbs revert wrote {n} pages to {}", c.path);
    }
    self.cached = 0;
    if let Some(t) = &mut self.trace {
      t.flush().await?;
    }
    self.ckp.pages_reverted += total;
    self.save_ckp().await
  }
}
