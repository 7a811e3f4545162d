use anyhow::Result;
use sitescan_lib::config::AppConfig;
use sitescan_lib::core::{diff, walk_both, write_report, DiffSummary, ReconcileReport, Reconciler, TransferJob, Walker};
use sitescan_lib::error::ConfigError;
use sitescan_lib::logging::SizeRotatingWriter;
use sitescan_lib::progress::{ProgressReporter, SiteProgress};
use sitescan_lib::storage::{create_listing, HttpClient, ReqwestClient, Root};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 初始化日志系统
///
/// 控制台默认只输出 warn 及以上，`-d` 时输出 debug；日志文件按配置开启。
fn init_logging(config: &AppConfig) {
    let console_level = if config.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let file_level = LevelFilter::from_level(config.log.tracing_level());
    let max_level = if config.log.enabled {
        console_level.max(file_level)
    } else {
        console_level
    };

    let mut env_filter = EnvFilter::builder()
        .with_default_directive(max_level.into())
        .from_env_lossy();
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(console_level);

    let file_layer = if config.log.enabled {
        match SizeRotatingWriter::new(&config.log.log_dir(), config.log.max_size_mb) {
            Ok(file_writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_filter(file_level),
            ),
            Err(e) => {
                eprintln!("WARNING: cannot open log file: {}", e);
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    for notice in &config.notices {
        warn!("{}", notice);
    }

    if let Err(e) = run(config).await {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let root1 = Root::parse(&config.site1.locator, config.site1.credentials())?;
    let root2 = Root::parse(&config.site2.locator, config.site2.credentials())?;
    if config.sync && root2.is_remote() {
        return Err(ConfigError::RemoteTarget(config.site2.locator.clone()).into());
    }

    for site in [&config.site1, &config.site2] {
        debug!(
            "站点 {}: <{}> 用户 <{}> 密码 {}",
            site.name,
            site.locator,
            site.user,
            if site.pass.is_empty() { "<>" } else { "<***>" }
        );
    }

    let name1 = config.site1.name.clone();
    let name2 = config.site2.name.clone();

    println!();
    println!("{:<20} {}", format!("{}:", name1), config.site1.locator);
    println!("{:<20} {}", format!("{}:", name2), config.site2.locator);
    println!("\nConnecting to servers...\n");

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new()?);
    let walker1 = Walker::new(create_listing(&root1, client.clone()));
    let walker2 = Walker::new(create_listing(&root2, client.clone()));

    let (done1, done1_rx) = oneshot::channel();
    let (done2, done2_rx) = oneshot::channel();
    let sites = vec![
        SiteProgress {
            name: name1.clone(),
            counter: walker1.counter(),
            done: done1_rx,
        },
        SiteProgress {
            name: name2.clone(),
            counter: walker2.counter(),
            done: done2_rx,
        },
    ];
    let progress = (!config.no_progress).then(|| ProgressReporter::start(sites));

    let walked = walk_both(walker1, walker2, done1, done2).await;
    if let Some(progress) = progress {
        progress.finish().await;
    }
    let (map1, map2) = walked?;

    let only1 = diff(&map1, &map2, config.suppress_dirs);
    let only2 = diff(&map2, &map1, config.suppress_dirs);
    {
        let mut out = io::stdout().lock();
        writeln!(out, "\n")?;
        write_report(&mut out, &name1, &only1)?;
        write_report(&mut out, &name2, &only2)?;
        out.flush()?;
    }

    let (s1, s2) = (DiffSummary::of(&only1), DiffSummary::of(&only2));
    info!(
        "比较完成: {} 共 {} 项, {} 共 {} 项; 仅在 {}: {} 文件 {} 目录; 仅在 {}: {} 文件 {} 目录",
        name1,
        map1.len(),
        name2,
        map2.len(),
        name1,
        s1.files,
        s1.dirs,
        name2,
        s2.files,
        s2.dirs
    );

    if !config.sync {
        return Ok(());
    }

    let Root::Local { path: target } = &root2 else {
        return Err(ConfigError::RemoteTarget(config.site2.locator.clone()).into());
    };

    // 目录条目也放进队列，由 worker 跳过
    let jobs = TransferJob::from_diff(&diff(&map1, &map2, false), &map1);
    let reconciler = Reconciler::new(config.reconcile_config(), client);
    let report = reconciler.reconcile(target, &root1, jobs).await?;

    if report.timed_out {
        println!("Timeout reached, stopping transfers.");
        std::process::exit(0);
    }

    print_reconcile_report(&report, config.dry_run);
    Ok(())
}

fn print_reconcile_report(report: &ReconcileReport, dry_run: bool) {
    if dry_run {
        for name in &report.planned {
            println!("would transfer {}", name);
        }
        println!("Would transfer {} entries.", report.would_transfer);
        return;
    }

    println!(
        "Transferred {} entries (linked {}, copied {}, downloaded {} / {} bytes), skipped {}.",
        report.transferred(),
        report.linked,
        report.copied,
        report.downloaded,
        report.bytes_downloaded,
        report.skipped
    );
    for (name, err) in &report.failed {
        println!("FAILED {}: {}", name, err);
    }
    if report.not_attempted > 0 {
        println!("{} entries were not attempted.", report.not_attempted);
    }
}
