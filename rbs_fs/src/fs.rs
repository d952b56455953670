//! File operations utilities
//! 文件操作工具

use std::{io, path::Path, time::Duration};

use compio::{
  BufResult,
  buf::{IntoInner, IoBuf},
  io::{AsyncReadAtExt, AsyncWriteAtExt},
};
use compio_fs::File;

/// Wait before retrying a write that hit a transient error
/// 写入遇到临时错误后重试前的等待
const RETRY_WAIT: Duration = Duration::from_millis(1);

/// Open file for reading
/// 打开文件用于读取
#[inline]
pub async fn open_read(path: impl AsRef<Path>) -> io::Result<File> {
  compio_fs::OpenOptions::new().read(true).open(path).await
}

/// Open file for reading and writing
/// 打开文件用于读写
#[inline]
pub async fn open_read_write(path: impl AsRef<Path>) -> io::Result<File> {
  compio_fs::OpenOptions::new()
    .read(true)
    .write(true)
    .open(path)
    .await
}

/// Open file for reading and writing, create if not exists
/// 打开文件用于读写，不存在则创建
#[inline]
pub async fn open_read_write_create(path: impl AsRef<Path>) -> io::Result<File> {
  compio_fs::OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .open(path)
    .await
}

/// Create a new file for reading and writing, fail if it exists
/// 新建读写文件，已存在则失败
#[inline]
pub async fn create_new(path: impl AsRef<Path>) -> io::Result<File> {
  compio_fs::OpenOptions::new()
    .read(true)
    .write(true)
    .create_new(true)
    .open(path)
    .await
}

/// Transient errors worth another attempt
/// 值得重试的临时错误
#[inline]
pub fn is_transient(e: &io::Error) -> bool {
  matches!(
    e.kind(),
    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
  )
}

/// Positional write, retried on transient errors. The buffer comes back
/// on failure too so the caller can retry.
/// 定位写入，临时错误时重试。失败时也返回缓冲区以便调用方重试
pub async fn write_at<T: IoBuf>(file: &mut File, buf: T, off: u64) -> BufResult<(), T> {
  let mut buf = buf;
  loop {
    let BufResult(res, back) = file.write_all_at(buf, off).await;
    match res {
      Err(e) if is_transient(&e) => {
        log::debug!("write at {off} retry: {e}");
        buf = back;
        compio::time::sleep(RETRY_WAIT).await;
      }
      res => return BufResult(res, back),
    }
  }
}

/// Read exactly `len` bytes at `off`
/// 在 `off` 处精确读取 `len` 字节
pub async fn read_at(file: &File, off: u64, len: usize) -> io::Result<Vec<u8>> {
  if len == 0 {
    return Ok(Vec::new());
  }
  let buf = vec![0u8; len];
  let res = file.read_exact_at(buf.slice(0..len), off).await;
  res.0?;
  Ok(res.1.into_inner())
}

/// Current file length
/// 当前文件长度
#[inline]
pub async fn file_len(file: &File) -> io::Result<u64> {
  Ok(file.metadata().await?.len())
}

/// Grow file at path to at least `len` bytes (never shrinks)
/// 将文件扩展到至少 `len` 字节（不缩小）
pub fn extend_to(path: &Path, len: u64) -> io::Result<()> {
  let file = std::fs::OpenOptions::new().write(true).open(path)?;
  if file.metadata()?.len() < len {
    file.set_len(len)?;
  }
  Ok(())
}

/// Atomic write: write to temp file, sync, then rename
/// 原子写入：写入临时文件，sync，然后重命名
pub async fn atomic_write(path: &Path, data: Vec<u8>) -> io::Result<u64> {
  let tmp = path.with_extension("tmp");
  let len = data.len() as u64;

  defer_lite::defer! { let _ = std::fs::remove_file(&tmp); }

  let mut file = File::create(&tmp).await?;
  file.write_all_at(data, 0).await.0?;
  file.sync_all().await?;
  drop(file);

  compio::fs::rename(&tmp, path).await?;
  Ok(len)
}

/// Copy `src` to `dst` through a temp file. Returns false when `dst`
/// exists and `overwrite` is off.
/// 经临时文件复制 `src` 到 `dst`。`dst` 已存在且不覆盖时返回 false
pub async fn copy_file(src: &Path, dst: &Path, overwrite: bool) -> io::Result<bool> {
  if !overwrite && dst.exists() {
    return Ok(false);
  }
  let file = open_read(src).await?;
  let len = file_len(&file).await?;
  let data = read_at(&file, 0, len as usize).await?;
  drop(file);
  atomic_write(dst, data).await?;
  Ok(true)
}

/// Compare two files byte by byte
/// 逐字节比较两个文件
pub async fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
  let fa = open_read(a).await?;
  let fb = open_read(b).await?;
  let (la, lb) = (file_len(&fa).await?, file_len(&fb).await?);
  if la != lb {
    return Ok(false);
  }
  Ok(read_at(&fa, 0, la as usize).await? == read_at(&fb, 0, lb as usize).await?)
}

/// Free bytes on the volume holding `path`
/// `path` 所在卷的剩余字节数
#[inline]
pub fn free_space(path: &Path) -> io::Result<u64> {
  fs4::available_space(path)
}
