//! 目录树遍历
//!
//! 对一个根做深度优先遍历，生成 "规范名 -> 定位串" 映射。HTTP 与本地目录共用同一套
//! 遍历逻辑，差异只在 [`ListingSource`] 实现里。

use crate::error::ListingError;
use crate::storage::{is_ignored, ListingSource};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 规范名 -> 相对定位串。目录的规范名以 `/` 结尾
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationMap {
    entries: HashMap<String, String>,
}

impl LocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, locator: impl Into<String>) {
        self.entries.insert(name.into(), locator.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LocationMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = LocationMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// 已发现条目计数，遍历任务写、进度显示读
#[derive(Debug, Clone, Default)]
pub struct VisitCounter(Arc<AtomicU64>);

impl VisitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// 一个根的遍历器
pub struct Walker {
    source: Arc<dyn ListingSource>,
    counter: VisitCounter,
}

impl Walker {
    pub fn new(source: Arc<dyn ListingSource>) -> Self {
        Self {
            source,
            counter: VisitCounter::new(),
        }
    }

    /// 计数器句柄，交给进度显示
    pub fn counter(&self) -> VisitCounter {
        self.counter.clone()
    }

    /// 遍历整棵树
    pub async fn walk(&self) -> Result<LocationMap, ListingError> {
        info!("开始遍历: {}", self.source.name());

        let mut map = LocationMap::new();
        self.visit("", "", &mut map).await?;

        info!(
            "遍历完成: {}, {} 个条目",
            self.source.name(),
            map.len()
        );
        Ok(map)
    }

    /// 先序遍历：目录条目先入表，再在下一个兄弟之前走完它的子树
    fn visit<'a>(
        &'a self,
        locator: &'a str,
        name: &'a str,
        map: &'a mut LocationMap,
    ) -> BoxFuture<'a, Result<(), ListingError>> {
        async move {
            let children = match self.source.list_children(locator).await {
                Ok(children) => children,
                Err(e) if e.is_skippable() && !locator.is_empty() => {
                    warn!("跳过无法读取的目录 {}: {}", name, e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            for child in children {
                if is_ignored(&child.name) {
                    continue;
                }

                let mut child_name = format!("{}{}", name, child.name);
                if child.is_dir && !child_name.ends_with('/') {
                    child_name.push('/');
                }
                let child_locator = format!("{}{}", locator, child.href);

                debug!("发现: {} -> {}", child_name, child_locator);
                map.insert(child_name.clone(), child_locator.clone());
                self.counter.incr();

                if child.is_dir {
                    self.visit(&child_locator, &child_name, map).await?;
                }
            }

            Ok(())
        }
        .boxed()
    }
}

/// 在独立任务上遍历，结束时（无论成败）发出 done 信号
pub fn spawn_walk(
    walker: Walker,
    done: oneshot::Sender<()>,
) -> JoinHandle<Result<LocationMap, ListingError>> {
    tokio::spawn(async move {
        let result = walker.walk().await;
        let _ = done.send(());
        result
    })
}

/// 并发遍历两个根，两者都完成后返回；任一失败立即返回该错误并中止另一个
pub async fn walk_both(
    first: Walker,
    second: Walker,
    first_done: oneshot::Sender<()>,
    second_done: oneshot::Sender<()>,
) -> Result<(LocationMap, LocationMap), ListingError> {
    let first = spawn_walk(first, first_done);
    let second = spawn_walk(second, second_done);
    let aborts = [first.abort_handle(), second.abort_handle()];

    let result = tokio::try_join!(join_walk(first), join_walk(second));
    if result.is_err() {
        for handle in aborts {
            handle.abort();
        }
    }
    result
}

async fn join_walk(
    handle: JoinHandle<Result<LocationMap, ListingError>>,
) -> Result<LocationMap, ListingError> {
    handle
        .await
        .map_err(|e| ListingError::Task(e.to_string()))?
}
