//! 错误类型

use thiserror::Error;

/// 配置与根路径校验错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingSite(String),

    #[error("Both sites are the same: {0}")]
    IdenticalRoots(String),

    #[error("invalid URL: <{url}>: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL must begin with http or https: <{0}>")]
    UnsupportedScheme(String),

    #[error("URL has no host specified: <{0}>")]
    MissingHost(String),

    #[error("path does not exist or is not a directory: {0}")]
    NotADirectory(String),

    #[error("directory is not writable: {path} ({reason})")]
    NotWritable { path: String, reason: String },

    #[error("sync target must be a local directory: {0}")]
    RemoteTarget(String),

    #[error("failed to read config file {path}: {reason}")]
    ConfigFile { path: String, reason: String },
}

/// 列目录（发现阶段）错误
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("request failed for {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("unexpected HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("unreadable response body from {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error listing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("walker task failed: {0}")]
    Task(String),
}

impl ListingError {
    /// 本地权限错误只跳过当前子树，其余错误终止整个发现过程
    pub fn is_skippable(&self) -> bool {
        matches!(self, ListingError::PermissionDenied(_))
    }
}

/// 单个传输任务的错误
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("unexpected HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
