use super::transfer::{download, link_or_copy, LinkMode, TransferJob, TransferOutcome};
use crate::error::TransferError;
use crate::storage::{ensure_writable_dir, Credentials, HttpClient, Root};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// 补齐配置
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// 并发 worker 数
    pub workers: usize,
    /// 只记录将要传输的条目，不做任何写入
    pub dry_run: bool,
    /// 整体超时，到时直接放弃进行中的传输
    pub timeout: Option<Duration>,
    /// 下载失败后的重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避
    pub retry_base_delay_ms: u64,
    pub link_mode: LinkMode,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dry_run: false,
            timeout: None,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            link_mode: LinkMode::LinkFirst,
        }
    }
}

impl ReconcileConfig {
    /// 以小时表示的超时，0 或负数表示不限时
    pub fn timeout_from_hours(hours: f64) -> Option<Duration> {
        if hours > 0.0 {
            // 超出 Duration 范围的值等同于不限时
            Duration::try_from_secs_f64(hours * 3600.0).ok()
        } else {
            None
        }
    }
}

/// 补齐结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub linked: u64,
    pub copied: u64,
    pub downloaded: u64,
    pub bytes_downloaded: u64,
    /// 目录、临时文件等不需要单独传输的条目
    pub skipped: u64,
    /// dry-run 下将会传输的条目
    pub would_transfer: u64,
    /// dry-run 下将会传输的条目名，按字节序排序
    pub planned: Vec<String>,
    /// (条目, 错误)
    pub failed: Vec<(String, String)>,
    /// 所有 worker 退出后仍留在队列里的条目
    pub not_attempted: u64,
    pub timed_out: bool,
}

impl ReconcileReport {
    pub fn transferred(&self) -> u64 {
        self.linked + self.copied + self.downloaded
    }
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    dequeued: AtomicU64,
    linked: AtomicU64,
    copied: AtomicU64,
    downloaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    skipped: AtomicU64,
    would_transfer: AtomicU64,
}

/// 参考根，两个定位串都规范为恰好一个结尾分隔符
enum RemoteRoot {
    Http {
        url: String,
        credentials: Option<Credentials>,
    },
    Local {
        path: PathBuf,
    },
}

impl From<&Root> for RemoteRoot {
    fn from(root: &Root) -> Self {
        match root {
            Root::Http { url, credentials } => RemoteRoot::Http {
                url: format!("{}/", url.trim_end_matches('/')),
                credentials: credentials.clone(),
            },
            Root::Local { path } => RemoteRoot::Local { path: path.clone() },
        }
    }
}

/// 单个任务的处理结果
enum JobResult {
    Done(TransferOutcome),
    Skipped,
    WouldTransfer,
}

/// worker 之间共享的只读上下文和统计
struct WorkerContext {
    local_root: PathBuf,
    remote: RemoteRoot,
    config: ReconcileConfig,
    client: Arc<dyn HttpClient>,
    stats: TransferStats,
    errors: RwLock<Vec<(String, String)>>,
    planned: RwLock<Vec<String>>,
}

/// 补齐管理器：把只在参考根存在的条目复制到本地目标根
pub struct Reconciler {
    config: ReconcileConfig,
    client: Arc<dyn HttpClient>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig, client: Arc<dyn HttpClient>) -> Self {
        Self { config, client }
    }

    /// 执行补齐
    ///
    /// 目标根不可写时在启动任何 worker 之前返回错误。任务先全部放入容量等于任务数的
    /// 队列再关闭入口，之后启动 `workers` 个 worker 竞争消费。某个 worker 遇到传输错误
    /// 只结束它自己的循环，其余 worker 继续处理队列。超时先到时立即返回
    /// `timed_out = true`，不等待进行中的传输；它们的临时文件不会被重命名。
    pub async fn reconcile(
        &self,
        local_root: &Path,
        remote: &Root,
        jobs: Vec<TransferJob>,
    ) -> Result<ReconcileReport> {
        ensure_writable_dir(local_root)?;

        let total = jobs.len() as u64;
        info!(
            "开始补齐: {} 个条目, {} 个 worker{}",
            total,
            self.config.workers,
            if self.config.dry_run { " (dry-run)" } else { "" }
        );

        let (tx, rx) = mpsc::channel(jobs.len().max(1));
        for job in jobs {
            tx.send(job).await?;
        }
        drop(tx);
        let queue = Arc::new(Mutex::new(rx));

        let ctx = Arc::new(WorkerContext {
            local_root: local_root.to_path_buf(),
            remote: RemoteRoot::from(remote),
            config: self.config.clone(),
            client: self.client.clone(),
            stats: TransferStats::default(),
            errors: RwLock::new(Vec::new()),
            planned: RwLock::new(Vec::new()),
        });

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            workers.spawn(run_worker(id, ctx.clone(), queue.clone()));
        }

        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!("worker 任务异常退出: {}", e);
                }
            }
        };

        let timed_out = match self.config.timeout {
            Some(limit) => tokio::select! {
                _ = drain => false,
                _ = tokio::time::sleep(limit) => {
                    warn!("补齐超时 ({:?})，放弃进行中的传输", limit);
                    true
                }
            },
            None => {
                drain.await;
                false
            }
        };
        // 超时后丢弃 JoinSet 会取消仍在运行的 worker
        drop(workers);

        let report = ctx.report(total, timed_out).await;
        info!(
            "补齐结束: 传输 {}, 跳过 {}, 失败 {}, 未处理 {}",
            report.transferred(),
            report.skipped,
            report.failed.len(),
            report.not_attempted
        );
        Ok(report)
    }
}

/// 从共享队列取任务直到队列耗尽；任一任务出错即退出
async fn run_worker(
    id: usize,
    ctx: Arc<WorkerContext>,
    queue: Arc<Mutex<mpsc::Receiver<TransferJob>>>,
) {
    debug!("worker {} 启动", id);
    loop {
        let job = queue.lock().await.recv().await;
        let Some(job) = job else { break };
        ctx.stats.dequeued.fetch_add(1, Ordering::Relaxed);

        match ctx.process(&job).await {
            Ok(JobResult::Done(outcome)) => ctx.record(outcome),
            Ok(JobResult::Skipped) => {
                ctx.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(JobResult::WouldTransfer) => {
                ctx.stats.would_transfer.fetch_add(1, Ordering::Relaxed);
                ctx.planned.write().await.push(job.name.clone());
            }
            Err(e) => {
                error!("worker {} 传输失败 {}: {}", id, job.name, e);
                ctx.errors.write().await.push((job.name.clone(), e.to_string()));
                break;
            }
        }
    }
    debug!("worker {} 退出", id);
}

impl WorkerContext {
    async fn process(&self, job: &TransferJob) -> Result<JobResult, TransferError> {
        if job.is_dir() || job.is_temp() {
            return Ok(JobResult::Skipped);
        }
        if !job.is_contained() {
            warn!("跳过越出目标根的条目: {}", job.name);
            return Ok(JobResult::Skipped);
        }

        if self.config.dry_run {
            info!("would transfer {}", job.name);
            return Ok(JobResult::WouldTransfer);
        }

        let dest = self.local_root.join(&job.name);
        let outcome = match &self.remote {
            RemoteRoot::Http { url, credentials } => {
                let src = format!("{}{}", url, job.locator);
                self.download_with_retry(&src, credentials.as_ref(), &dest)
                    .await?
            }
            RemoteRoot::Local { path } => {
                link_or_copy(&path.join(&job.locator), &dest, self.config.link_mode).await?
            }
        };

        debug!("完成: {} ({:?})", job.name, outcome);
        Ok(JobResult::Done(outcome))
    }

    /// 带重试的下载，每次重试都从已写入的临时文件继续
    async fn download_with_retry(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        dest: &Path,
    ) -> Result<TransferOutcome, TransferError> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;
        loop {
            match download(self.client.as_ref(), url, credentials, dest).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < max_retries => {
                    // 指数退避
                    let delay = self.config.retry_base_delay_ms * 2_u64.pow(attempt);
                    warn!(
                        "下载失败，{}ms 后重试 ({}/{}): {}",
                        delay,
                        attempt + 1,
                        max_retries,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("下载最终失败 (已重试{}次): {}", max_retries, e);
                    return Err(e);
                }
            }
        }
    }

    fn record(&self, outcome: TransferOutcome) {
        match outcome {
            TransferOutcome::Linked => {
                self.stats.linked.fetch_add(1, Ordering::Relaxed);
            }
            TransferOutcome::Copied => {
                self.stats.copied.fetch_add(1, Ordering::Relaxed);
            }
            TransferOutcome::Downloaded { bytes } => {
                self.stats.downloaded.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    async fn report(&self, total: u64, timed_out: bool) -> ReconcileReport {
        let stats = &self.stats;
        let mut planned = self.planned.read().await.clone();
        planned.sort_unstable();
        ReconcileReport {
            linked: stats.linked.load(Ordering::Relaxed),
            copied: stats.copied.load(Ordering::Relaxed),
            downloaded: stats.downloaded.load(Ordering::Relaxed),
            bytes_downloaded: stats.bytes_downloaded.load(Ordering::Relaxed),
            skipped: stats.skipped.load(Ordering::Relaxed),
            would_transfer: stats.would_transfer.load(Ordering::Relaxed),
            planned,
            failed: self.errors.read().await.clone(),
            not_attempted: total.saturating_sub(stats.dequeued.load(Ordering::Relaxed)),
            timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHttpClient;

    #[test]
    fn test_timeout_from_hours() {
        assert_eq!(ReconcileConfig::timeout_from_hours(0.0), None);
        assert_eq!(ReconcileConfig::timeout_from_hours(-1.0), None);
        assert_eq!(
            ReconcileConfig::timeout_from_hours(0.5),
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_oversized_timeout_means_no_limit() {
        assert_eq!(ReconcileConfig::timeout_from_hours(1e16), None);
        assert_eq!(ReconcileConfig::timeout_from_hours(f64::INFINITY), None);
        assert_eq!(ReconcileConfig::timeout_from_hours(f64::NAN), None);
    }

    #[test]
    fn test_remote_root_gets_single_trailing_slash() {
        let root = Root::Http {
            url: "http://x/data//".to_string(),
            credentials: None,
        };
        match RemoteRoot::from(&root) {
            RemoteRoot::Http { url, .. } => assert_eq!(url, "http://x/data/"),
            RemoteRoot::Local { .. } => panic!("expected http root"),
        }
    }

    #[tokio::test]
    async fn test_download_retry_resumes() {
        let local = tempfile::tempdir().unwrap();
        let client = Arc::new(
            MockHttpClient::new()
                .with_file("http://x/a.bin", b"abcdefghij".to_vec())
                .failing_once_after("http://x/a.bin", 4),
        );
        let config = ReconcileConfig {
            workers: 1,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let remote = Root::Http {
            url: "http://x/".to_string(),
            credentials: None,
        };

        let report = Reconciler::new(config, client.clone())
            .reconcile(local.path(), &remote, vec![TransferJob::new("a.bin", "a.bin")])
            .await
            .unwrap();

        assert_eq!(report.downloaded, 1);
        assert!(report.failed.is_empty());
        assert_eq!(std::fs::read(local.path().join("a.bin")).unwrap(), b"abcdefghij");
        assert_eq!(
            client.range_requests(),
            vec![("http://x/a.bin".to_string(), 0), ("http://x/a.bin".to_string(), 4)]
        );
    }

    #[tokio::test]
    async fn test_error_stops_only_that_worker() {
        let local = tempfile::tempdir().unwrap();
        let client = Arc::new(
            MockHttpClient::new()
                .with_file("http://x/1", b"one".to_vec())
                .with_file("http://x/3", b"three".to_vec())
                .with_file("http://x/4", b"four".to_vec()),
        );
        let config = ReconcileConfig {
            workers: 2,
            max_retries: 0,
            ..Default::default()
        };
        let remote = Root::Http {
            url: "http://x".to_string(),
            credentials: None,
        };
        let jobs = ["1", "2", "3", "4"]
            .iter()
            .map(|n| TransferJob::new(*n, *n))
            .collect();

        let report = Reconciler::new(config, client)
            .reconcile(local.path(), &remote, jobs)
            .await
            .unwrap();

        // "2" 不存在：处理它的 worker 退出，另一个 worker 把剩下的取完
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2");
        assert_eq!(report.downloaded, 3);
        assert_eq!(report.not_attempted, 0);
        assert!(local.path().join("4").exists());
    }

    #[tokio::test]
    async fn test_unwritable_root_fails_before_workers_start() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let client = Arc::new(MockHttpClient::new());
        let remote = Root::Http {
            url: "http://x/".to_string(),
            credentials: None,
        };

        let result = Reconciler::new(ReconcileConfig::default(), client.clone())
            .reconcile(&file, &remote, vec![TransferJob::new("a", "a")])
            .await;

        assert!(result.is_err());
        assert!(client.range_requests().is_empty());
    }
}
