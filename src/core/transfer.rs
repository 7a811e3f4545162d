//! 单个条目的传输：HTTP 断点续传下载、本地硬链接或复制
//!
//! 所有写入先落到 `<目标><TEMP_SUFFIX>`，完整写完后再原子重命名到最终文件名，
//! 目标树里不会出现写了一半的最终文件。

use super::walker::LocationMap;
use crate::error::TransferError;
use crate::storage::{Credentials, HttpClient, RangeStatus};
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 传输中临时文件的后缀，源站上同名后缀的条目不会被传输
pub const TEMP_SUFFIX: &str = ".sitescan-part";

/// 完成后文件的权限
#[cfg(unix)]
const FINAL_MODE: u32 = 0o644;

/// 一个待传输条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    /// 规范名，也是目标根下的相对路径
    pub name: String,
    /// 在参考根上的定位串
    pub locator: String,
}

impl TransferJob {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }

    /// 用差异结果和参考根的映射生成任务列表，保持差异的顺序
    pub fn from_diff(entries: &[String], source: &LocationMap) -> Vec<Self> {
        entries
            .iter()
            .map(|name| {
                let locator = source.get(name).unwrap_or(name.as_str());
                TransferJob::new(name.as_str(), locator)
            })
            .collect()
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_temp(&self) -> bool {
        self.name.ends_with(TEMP_SUFFIX)
    }

    /// 只允许落在目标根之内的普通相对路径
    pub fn is_contained(&self) -> bool {
        Path::new(&self.name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }
}

/// 单个任务的完成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Linked,
    Copied,
    Downloaded { bytes: u64 },
}

/// 本地传输是否先尝试硬链接
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkMode {
    #[default]
    LinkFirst,
    CopyOnly,
}

/// `dest` 对应的临时文件路径
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TEMP_SUFFIX);
    dest.with_file_name(name)
}

async fn ensure_parent(dest: &Path) -> Result<(), TransferError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io(parent, e))?;
    }
    Ok(())
}

/// 把写完的临时文件原子地换成最终文件
async fn finalize(temp: &Path, dest: &Path) -> Result<(), TransferError> {
    fs::rename(temp, dest)
        .await
        .map_err(|e| TransferError::io(dest, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, std::fs::Permissions::from_mode(FINAL_MODE))
            .await
            .map_err(|e| TransferError::io(dest, e))?;
    }

    Ok(())
}

/// 本地到本地：先尝试硬链接（同一文件系统），失败则复制到临时文件再重命名
pub async fn link_or_copy(
    src: &Path,
    dest: &Path,
    mode: LinkMode,
) -> Result<TransferOutcome, TransferError> {
    ensure_parent(dest).await?;

    if mode == LinkMode::LinkFirst {
        match fs::hard_link(src, dest).await {
            Ok(()) => {
                debug!("硬链接: {} -> {}", src.display(), dest.display());
                return Ok(TransferOutcome::Linked);
            }
            Err(e) => debug!("硬链接失败，改为复制: {} ({})", dest.display(), e),
        }
    }

    let temp = temp_path_for(dest);
    fs::copy(src, &temp)
        .await
        .map_err(|e| TransferError::io(src, e))?;
    finalize(&temp, dest).await?;

    debug!("复制: {} -> {}", src.display(), dest.display());
    Ok(TransferOutcome::Copied)
}

/// HTTP 下载到临时文件，已有部分内容时从断点继续
pub async fn download(
    client: &dyn HttpClient,
    url: &str,
    credentials: Option<&Credentials>,
    dest: &Path,
) -> Result<TransferOutcome, TransferError> {
    ensure_parent(dest).await?;

    let temp = temp_path_for(dest);
    let offset = match fs::metadata(&temp).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if offset > 0 {
        debug!("断点续传: {} 从 {} 字节继续", url, offset);
    }

    let body = client.get_range(url, credentials, offset).await?;

    let mut file = match body.status {
        RangeStatus::Satisfied => {
            finalize(&temp, dest).await?;
            return Ok(TransferOutcome::Downloaded { bytes: 0 });
        }
        RangeStatus::Partial => fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&temp)
            .await,
        RangeStatus::Full => fs::File::create(&temp).await,
    }
    .map_err(|e| TransferError::io(&temp, e))?;

    let mut written = 0u64;
    let mut stream = body.stream;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::io(&temp, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| TransferError::io(&temp, e))?;
    drop(file);

    finalize(&temp, dest).await?;
    Ok(TransferOutcome::Downloaded { bytes: written })
}
