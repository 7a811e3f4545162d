use super::{is_ignored, Credentials, ListingEntry, ListingSource, OP_TIMEOUT_SECS};
use crate::error::{ConfigError, ListingError, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use regex::Regex;
use reqwest::header::RANGE;
use reqwest::{StatusCode, Url};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").expect("invalid anchor regex"));

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("invalid href regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid tag regex"));

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("invalid entity regex")
});

/// 校验根 URL：必须能解析、scheme 为 http/https、带主机名
pub fn validate_url(u: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(u).map_err(|e| ConfigError::InvalidUrl {
        url: u.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::UnsupportedScheme(u.to_string()));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ConfigError::MissingHost(u.to_string())),
    }
}

/// Range 请求的响应类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    /// 206，从请求的偏移量继续
    Partial,
    /// 200，服务器忽略了 Range，从头开始
    Full,
    /// 416，请求的偏移量已到文件末尾
    Satisfied,
}

/// 下载响应体
pub struct RangeBody {
    pub status: RangeStatus,
    pub stream: BoxStream<'static, Result<Bytes, TransferError>>,
}

impl RangeBody {
    pub fn satisfied() -> Self {
        Self {
            status: RangeStatus::Satisfied,
            stream: stream::empty().boxed(),
        }
    }
}

/// HTTP 传输抽象，便于在测试中替换
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// 获取一个目录列表页面
    async fn get_page(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, ListingError>;

    /// 从 `offset` 开始下载文件（offset 为 0 时不带 Range 头）
    async fn get_range(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        offset: u64,
    ) -> Result<RangeBody, TransferError>;
}

/// 基于 reqwest 的实现
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    fn request(&self, url: &str, credentials: Option<&Credentials>) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match credentials {
            Some(c) => req.basic_auth(&c.user, Some(&c.pass)),
            None => req,
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_page(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, ListingError> {
        let resp = self
            .request(url, credentials)
            .send()
            .await
            .map_err(|e| ListingError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ListingError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        resp.text().await.map_err(|e| ListingError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_range(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        offset: u64,
    ) -> Result<RangeBody, TransferError> {
        let mut req = self.request(url, credentials);
        if offset > 0 {
            req = req.header(RANGE, format!("bytes={}-", offset));
        }

        let resp = req.send().await.map_err(|e| TransferError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = match resp.status() {
            StatusCode::PARTIAL_CONTENT => RangeStatus::Partial,
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => return Ok(RangeBody::satisfied()),
            s if s.is_success() => RangeStatus::Full,
            s => {
                return Err(TransferError::Status {
                    url: url.to_string(),
                    status: s.as_u16(),
                })
            }
        };

        let url = url.to_string();
        let stream = resp
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| TransferError::Download {
                    url: url.clone(),
                    reason: e.to_string(),
                })
            })
            .boxed();

        Ok(RangeBody { status, stream })
    }
}

/// 把 HTML 目录列表页面当作一棵树来列举
pub struct HttpListing {
    base_url: String,
    credentials: Option<Credentials>,
    client: Arc<dyn HttpClient>,
    name: String,
}

impl HttpListing {
    pub fn new(base_url: &str, credentials: Option<Credentials>, client: Arc<dyn HttpClient>) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let name = format!("http:{}", base_url);
        Self {
            base_url,
            credentials,
            client,
            name,
        }
    }

    /// 根 URL 与相对定位串拼接
    pub fn url_for(&self, locator: &str) -> String {
        format!("{}{}", self.base_url, locator)
    }
}

#[async_trait]
impl ListingSource for HttpListing {
    async fn list_children(&self, locator: &str) -> Result<Vec<ListingEntry>, ListingError> {
        let url = self.url_for(locator);
        let body = self.client.get_page(&url, self.credentials.as_ref()).await?;

        let entries = parse_anchors(&body)
            .into_iter()
            .filter_map(|(text, href)| {
                if is_ignored(&text) {
                    return None;
                }
                let href = href?;
                if !is_child_href(&href) {
                    debug!("跳过非子条目链接: {} -> {}", text, href);
                    return None;
                }
                Some(ListingEntry::new(text, href))
            })
            .collect();

        Ok(entries)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 只有相对当前节点的路径片段才是子条目
fn is_child_href(href: &str) -> bool {
    !(href.is_empty()
        || href.starts_with('?')
        || href.starts_with('#')
        || href.starts_with('/')
        || href == "."
        || href == "./"
        || href == ".."
        || href.starts_with("../")
        || href.contains("://"))
}

/// 按文档顺序提取 (锚文本, href) 对
pub fn parse_anchors(html: &str) -> Vec<(String, Option<String>)> {
    ANCHOR_RE
        .captures_iter(html)
        .map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let inner = caps.get(2).map_or("", |m| m.as_str());

            let href = HREF_RE.captures(attrs).and_then(|h| {
                h.get(1)
                    .or_else(|| h.get(2))
                    .or_else(|| h.get(3))
                    .map(|m| decode_entities(m.as_str()))
            });

            let text = decode_entities(&TAG_RE.replace_all(inner, ""));
            (text.trim().to_string(), href)
        })
        .collect()
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    ENTITY_RE
        .replace_all(s, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ if entity.starts_with('#') => entity[1..].parse().ok().and_then(char::from_u32),
                _ => None,
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}
