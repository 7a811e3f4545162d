//! 测试辅助：按 URL 返回预置页面和文件的 HTTP 客户端
//!
//! ```ignore
//! let client = MockHttpClient::new()
//!     .with_page("http://x/", r#"<a href="dir1/">dir1</a>"#)
//!     .with_page("http://x/dir1/", r#"<a href="f.txt">f.txt</a>"#)
//!     .with_file("http://x/dir1/f.txt", b"data".to_vec());
//! ```

use crate::error::{ListingError, TransferError};
use crate::storage::{Credentials, HttpClient, RangeBody, RangeStatus};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;

/// 在某个字节位置注入流错误或停顿
#[derive(Debug, Clone, Copy)]
struct InjectedFailure {
    at: usize,
    remaining: usize,
    stall: bool,
}

#[derive(Default)]
pub struct MockHttpClient {
    pages: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    statuses: HashMap<String, u16>,
    failures: Mutex<HashMap<String, InjectedFailure>>,
    ignore_ranges: bool,
    page_requests: Mutex<Vec<String>>,
    range_requests: Mutex<Vec<(String, u64)>>,
    credentials_seen: Mutex<Vec<Option<Credentials>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_file(mut self, url: &str, data: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), data);
        self
    }

    /// 对该 URL 的所有请求返回指定状态码
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.statuses.insert(url.to_string(), status);
        self
    }

    /// 每次下载写到第 `at` 字节时流出错
    pub fn failing_after(self, url: &str, at: usize) -> Self {
        self.inject(url, at, usize::MAX)
    }

    /// 只有第一次下载在第 `at` 字节出错
    pub fn failing_once_after(self, url: &str, at: usize) -> Self {
        self.inject(url, at, 1)
    }

    /// 写到第 `at` 字节后流永远挂起，用于超时场景
    pub fn stalling_after(self, url: &str, at: usize) -> Self {
        self.failures.lock().unwrap().insert(
            url.to_string(),
            InjectedFailure {
                at,
                remaining: usize::MAX,
                stall: true,
            },
        );
        self
    }

    fn inject(self, url: &str, at: usize, remaining: usize) -> Self {
        self.failures.lock().unwrap().insert(
            url.to_string(),
            InjectedFailure {
                at,
                remaining,
                stall: false,
            },
        );
        self
    }

    /// 模拟不支持 Range 的服务器：总是返回 200 和完整内容
    pub fn ignoring_ranges(mut self) -> Self {
        self.ignore_ranges = true;
        self
    }

    pub fn page_requests(&self) -> Vec<String> {
        self.page_requests.lock().unwrap().clone()
    }

    pub fn range_requests(&self) -> Vec<(String, u64)> {
        self.range_requests.lock().unwrap().clone()
    }

    pub fn credentials_seen(&self) -> Vec<Option<Credentials>> {
        self.credentials_seen.lock().unwrap().clone()
    }

    fn take_failure(&self, url: &str) -> Option<InjectedFailure> {
        let mut failures = self.failures.lock().unwrap();
        let failure = failures.get_mut(url)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining -= 1;
        Some(*failure)
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_page(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, ListingError> {
        self.page_requests.lock().unwrap().push(url.to_string());
        self.credentials_seen.lock().unwrap().push(credentials.cloned());

        if let Some(&status) = self.statuses.get(url) {
            return Err(ListingError::Status {
                url: url.to_string(),
                status,
            });
        }

        self.pages.get(url).cloned().ok_or_else(|| ListingError::Status {
            url: url.to_string(),
            status: 404,
        })
    }

    async fn get_range(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        offset: u64,
    ) -> Result<RangeBody, TransferError> {
        self.range_requests
            .lock()
            .unwrap()
            .push((url.to_string(), offset));
        self.credentials_seen.lock().unwrap().push(credentials.cloned());

        let not_found = |status| TransferError::Status {
            url: url.to_string(),
            status,
        };
        if let Some(&status) = self.statuses.get(url) {
            return Err(not_found(status));
        }
        let data = self.files.get(url).ok_or_else(|| not_found(404))?;

        let (status, start) = if offset > 0 && !self.ignore_ranges {
            if offset as usize >= data.len() {
                return Ok(RangeBody::satisfied());
            }
            (RangeStatus::Partial, offset as usize)
        } else {
            (RangeStatus::Full, 0)
        };

        let mut chunks: Vec<Result<Bytes, TransferError>> = Vec::new();
        let failure = self.take_failure(url);
        match failure {
            Some(f) => {
                let end = f.at.clamp(start, data.len());
                if end > start {
                    chunks.push(Ok(Bytes::copy_from_slice(&data[start..end])));
                }
                if !f.stall {
                    chunks.push(Err(TransferError::Download {
                        url: url.to_string(),
                        reason: "connection reset".to_string(),
                    }));
                }
            }
            None => chunks.push(Ok(Bytes::copy_from_slice(&data[start..]))),
        }

        let stream = match failure {
            Some(f) if f.stall => stream::iter(chunks).chain(stream::pending()).boxed(),
            _ => stream::iter(chunks).boxed(),
        };

        Ok(RangeBody { status, stream })
    }
}
