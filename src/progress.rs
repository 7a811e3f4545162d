//! 遍历进度显示
//!
//! 每个站点一行，周期性刷新已发现条目数和耗时；站点的 done 信号到达后在行尾追加
//! ` - DONE!`。只读计数器，不影响遍历本身。

use crate::core::VisitCounter;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const UPDATE_INTERVAL: Duration = Duration::from_millis(200);

/// 一个站点的进度来源
pub struct SiteProgress {
    pub name: String,
    pub counter: VisitCounter,
    pub done: oneshot::Receiver<()>,
}

struct SiteLine {
    bar: ProgressBar,
    name: String,
    counter: VisitCounter,
    done: Option<oneshot::Receiver<()>>,
    finished_after: Option<Duration>,
}

impl SiteLine {
    fn render(&self, elapsed: Duration) -> String {
        let shown = self.finished_after.unwrap_or(elapsed);
        format!(
            "{:<20} {:<6} {:>5} files and directories{}",
            format!("{}:", self.name),
            format!("{}s", shown.as_secs()),
            self.counter.get(),
            if self.finished_after.is_some() { " - DONE!" } else { "" }
        )
    }

    fn poll_done(&mut self, elapsed: Duration) {
        if let Some(rx) = self.done.as_mut() {
            match rx.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                    self.done = None;
                    self.finished_after = Some(elapsed);
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
    }
}

/// 进度显示器
pub struct ProgressReporter {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl ProgressReporter {
    /// 启动后台刷新任务，输出到 stderr
    pub fn start(sites: Vec<SiteProgress>) -> Self {
        Self::start_with_target(sites, ProgressDrawTarget::stderr())
    }

    pub fn start_with_target(sites: Vec<SiteProgress>, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let style = ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner());

        let mut lines: Vec<SiteLine> = sites
            .into_iter()
            .map(|site| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style.clone());
                SiteLine {
                    bar,
                    name: site.name,
                    counter: site.counter,
                    done: Some(site.done),
                    finished_after: None,
                }
            })
            .collect();

        let (stop, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut ticker = tokio::time::interval(UPDATE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let elapsed = start.elapsed();
                        for line in lines.iter_mut() {
                            line.poll_done(elapsed);
                            line.bar.set_message(line.render(elapsed));
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }

            let elapsed = start.elapsed();
            for line in lines.iter_mut() {
                line.poll_done(elapsed);
                line.bar.finish_with_message(line.render(elapsed));
            }
        });

        Self { handle, stop }
    }

    /// 停止刷新并输出最终状态
    pub async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
