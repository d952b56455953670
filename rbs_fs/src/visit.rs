//! Directory walking: size, recursive remove, extension filter
//! 目录遍历：统计大小、递归删除、按扩展名过滤

use std::{fs, io, path::Path};

/// Walk `dir` depth-first, calling `on` for each entry after its children
/// 深度优先遍历 `dir`，子项之后回调 `on`
#[inline]
pub fn walk(
  dir: &Path,
  on: &mut impl FnMut(&Path, &fs::Metadata) -> io::Result<()>,
) -> io::Result<()> {
  walk_depth(dir, usize::MAX, on)
}

/// Like [`walk`], at most `depth` levels down; 1 visits direct entries only
/// 同 [`walk`]，最多向下 `depth` 层；1 仅访问直接子项
pub fn walk_depth(
  dir: &Path,
  depth: usize,
  on: &mut impl FnMut(&Path, &fs::Metadata) -> io::Result<()>,
) -> io::Result<()> {
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();
    let meta = fs::symlink_metadata(&path)?;
    if meta.is_dir() && depth > 1 {
      walk_depth(&path, depth - 1, on)?;
    }
    on(&path, &meta)?;
  }
  Ok(())
}

/// A missing directory is an empty one
/// 目录不存在视为空目录
pub(crate) fn missing_ok(r: io::Result<()>) -> io::Result<()> {
  match r {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    r => r,
  }
}

/// Total bytes of regular files under `dir`, 0 if missing
/// `dir` 下普通文件的总字节数，不存在返回 0
pub fn dir_size(dir: &Path) -> io::Result<u64> {
  let mut total = 0u64;
  missing_ok(walk(dir, &mut |_, meta| {
    if meta.is_file() {
      total += meta.len();
    }
    Ok(())
  }))?;
  Ok(total)
}

/// Remove `dir` with everything below it, missing is fine
/// 删除 `dir` 及其下所有内容，不存在也视为成功
pub fn rm_dir(dir: &Path) -> io::Result<()> {
  missing_ok(
    walk(dir, &mut |path, meta| {
      if meta.is_dir() {
        fs::remove_dir(path)
      } else {
        fs::remove_file(path)
      }
    })
    .and_then(|_| fs::remove_dir(dir)),
  )
}

/// Remove files directly in `dir` whose extension is `ext`, return count
/// 删除 `dir` 中扩展名为 `ext` 的文件，返回数量
pub fn rm_ext(dir: &Path, ext: &str) -> io::Result<usize> {
  let mut n = 0;
  missing_ok(walk_depth(dir, 1, &mut |path, meta| {
    if meta.is_file() && path.extension().is_some_and(|e| e == ext) {
      fs::remove_file(path)?;
      n += 1;
    }
    Ok(())
  }))?;
  Ok(n)
}
