pub mod http;
pub mod local;

use crate::error::{ConfigError, ListingError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub use http::{validate_url, HttpClient, HttpListing, RangeBody, RangeStatus, ReqwestClient};
pub use local::{ensure_writable_dir, LocalListing};

// ============ 公共常量 ============

/// 连接超时（秒）
pub const OP_TIMEOUT_SECS: u64 = 60;

/// 目录列表页面上的表头、排序和上级目录链接，不是真实的子条目
pub const IGNORED_ANCHORS: &[&str] = &[
    "Name",
    "Last modified",
    "Size",
    "Description",
    "Parent Directory",
    "Type",
    "..",
    "../",
];

pub fn is_ignored(name: &str) -> bool {
    IGNORED_ANCHORS.contains(&name)
}

/// 目录下的一个直接子条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// 显示名称（HTTP 为锚文本，本地为文件名）
    pub name: String,
    /// 相对当前节点的定位片段，目录以 `/` 结尾
    pub href: String,
    pub is_dir: bool,
}

impl ListingEntry {
    pub fn new(name: impl Into<String>, href: impl Into<String>) -> Self {
        let href = href.into();
        Self {
            name: name.into(),
            is_dir: href.ends_with('/'),
            href,
        }
    }
}

/// HTTP 基本认证凭据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl Credentials {
    /// 用户名和密码都为空时返回 None
    pub fn from_parts(user: &str, pass: &str) -> Option<Self> {
        if user.is_empty() && pass.is_empty() {
            None
        } else {
            Some(Self {
                user: user.to_string(),
                pass: pass.to_string(),
            })
        }
    }
}

/// 参与比较的一棵树的根
#[derive(Debug, Clone)]
pub enum Root {
    Http {
        /// 以 `/` 结尾的基础 URL
        url: String,
        credentials: Option<Credentials>,
    },
    Local {
        path: PathBuf,
    },
}

impl Root {
    /// 按定位串的形态选择后端：http(s) URL 或本地目录
    pub fn parse(locator: &str, credentials: Option<Credentials>) -> Result<Self, ConfigError> {
        let lower = locator.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = validate_url(locator)?;
            let mut url = url.to_string();
            if !url.ends_with('/') {
                url.push('/');
            }
            return Ok(Root::Http { url, credentials });
        }
        if locator.contains("://") {
            // 其余 scheme 走同一个校验，得到统一的错误信息
            validate_url(locator)?;
        }

        let path = PathBuf::from(locator);
        if !path.is_dir() {
            return Err(ConfigError::NotADirectory(locator.to_string()));
        }
        Ok(Root::Local { path })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Root::Http { .. })
    }

    /// 规范化后的定位串，用于显示和判断两个根是否相同
    pub fn locator(&self) -> String {
        match self {
            Root::Http { url, .. } => url.clone(),
            Root::Local { path } => {
                let mut s = path.to_string_lossy().replace('\\', "/");
                if !s.ends_with('/') {
                    s.push('/');
                }
                s
            }
        }
    }
}

/// "列出某个节点的直接子条目" 的抽象，HTTP 与本地目录各一个实现
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// `locator` 为相对根的定位串，根节点为空串
    async fn list_children(&self, locator: &str) -> Result<Vec<ListingEntry>, ListingError>;

    /// 获取来源名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据根的类型创建列目录实现
pub fn create_listing(root: &Root, client: Arc<dyn HttpClient>) -> Arc<dyn ListingSource> {
    match root {
        Root::Http { url, credentials } => {
            tracing::info!("初始化 HTTP 列表: {}", url);
            Arc::new(HttpListing::new(url, credentials.clone(), client)) as Arc<dyn ListingSource>
        }
        Root::Local { path } => {
            tracing::info!("初始化本地列表: {}", path.display());
            Arc::new(LocalListing::new(path.clone())) as Arc<dyn ListingSource>
        }
    }
}
