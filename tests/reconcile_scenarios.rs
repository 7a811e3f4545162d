//! 补齐阶段的端到端场景

use sitescan_lib::core::{
    diff, LinkMode, ReconcileConfig, Reconciler, TransferJob, Walker, TEMP_SUFFIX,
};
use sitescan_lib::storage::{create_listing, HttpClient, Root};
use sitescan_lib::testing::MockHttpClient;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn local_root(path: &Path) -> Root {
    Root::parse(path.to_str().unwrap(), None).unwrap()
}

fn no_http() -> Arc<dyn HttpClient> {
    Arc::new(MockHttpClient::new())
}

/// 目录下所有文件的相对路径，排序后返回
fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    out.sort();
    out
}

fn write_source(dir: &Path) {
    fs::create_dir_all(dir.join("albums/live")).unwrap();
    fs::write(dir.join("readme.txt"), b"read me").unwrap();
    fs::write(dir.join("albums/one.flac"), vec![7u8; 4096]).unwrap();
    fs::write(dir.join("albums/live/two.flac"), b"live take").unwrap();
}

fn three_jobs() -> Vec<TransferJob> {
    ["readme.txt", "albums/one.flac", "albums/live/two.flac"]
        .into_iter()
        .map(|n| TransferJob::new(n, n))
        .collect()
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let base = tempfile::tempdir().unwrap();
    let src = base.path().join("src");
    let dst = base.path().join("dst");
    write_source(&src);
    fs::create_dir_all(&dst).unwrap();

    let config = ReconcileConfig {
        workers: 2,
        dry_run: true,
        ..Default::default()
    };
    let report = Reconciler::new(config, no_http())
        .reconcile(&dst, &local_root(&src), three_jobs())
        .await
        .unwrap();

    assert_eq!(report.would_transfer, 3);
    assert_eq!(
        report.planned,
        vec!["albums/live/two.flac", "albums/one.flac", "readme.txt"]
    );
    assert_eq!(report.transferred(), 0);
    assert!(report.failed.is_empty());
    assert_eq!(fs::read_dir(&dst).unwrap().count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn same_filesystem_uses_hard_links() {
    use std::os::unix::fs::MetadataExt;

    let base = tempfile::tempdir().unwrap();
    let src = base.path().join("src");
    let dst = base.path().join("dst");
    write_source(&src);
    fs::create_dir_all(&dst).unwrap();

    let report = Reconciler::new(ReconcileConfig::default(), no_http())
        .reconcile(&dst, &local_root(&src), three_jobs())
        .await
        .unwrap();

    assert_eq!(report.linked, 3);
    assert_eq!(report.copied, 0);
    for name in ["readme.txt", "albums/one.flac", "albums/live/two.flac"] {
        let a = fs::metadata(src.join(name)).unwrap();
        let b = fs::metadata(dst.join(name)).unwrap();
        assert_eq!(a.ino(), b.ino(), "{} should be a hard link", name);
    }
}

#[tokio::test]
async fn copy_path_produces_identical_files() {
    let base = tempfile::tempdir().unwrap();
    let src = base.path().join("src");
    let dst = base.path().join("dst");
    write_source(&src);
    fs::create_dir_all(&dst).unwrap();

    let config = ReconcileConfig {
        link_mode: LinkMode::CopyOnly,
        ..Default::default()
    };
    let report = Reconciler::new(config, no_http())
        .reconcile(&dst, &local_root(&src), three_jobs())
        .await
        .unwrap();

    assert_eq!(report.copied, 3);
    assert_eq!(files_under(&src), files_under(&dst));
    for name in files_under(&src) {
        assert_eq!(fs::read(src.join(&name)).unwrap(), fs::read(dst.join(&name)).unwrap());
    }
    assert!(files_under(&dst)
        .iter()
        .all(|p| !p.to_string_lossy().ends_with(TEMP_SUFFIX)));
}

#[tokio::test]
async fn failed_link_falls_back_to_copy() {
    let base = tempfile::tempdir().unwrap();
    let src = base.path().join("src");
    let dst = base.path().join("dst");
    write_source(&src);
    fs::create_dir_all(&dst).unwrap();
    // 目标已存在时硬链接必然失败
    fs::write(dst.join("readme.txt"), b"stale").unwrap();

    let report = Reconciler::new(ReconcileConfig::default(), no_http())
        .reconcile(&dst, &local_root(&src), vec![TransferJob::new("readme.txt", "readme.txt")])
        .await
        .unwrap();

    assert_eq!(report.copied, 1);
    assert_eq!(fs::read(dst.join("readme.txt")).unwrap(), b"read me");
    assert!(!dst.join(format!("readme.txt{}", TEMP_SUFFIX)).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn downloaded_files_are_world_readable() {
    use std::os::unix::fs::PermissionsExt;

    let dst = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new().with_file("http://x/pub/a.iso", b"iso".to_vec()));
    let remote = Root::parse("http://x/pub/", None).unwrap();

    let report = Reconciler::new(ReconcileConfig::default(), client)
        .reconcile(dst.path(), &remote, vec![TransferJob::new("a.iso", "a.iso")])
        .await
        .unwrap();

    assert_eq!(report.downloaded, 1);
    assert_eq!(report.bytes_downloaded, 3);
    let mode = fs::metadata(dst.path().join("a.iso")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);
}

#[tokio::test]
async fn timeout_abandons_in_flight_download() {
    let dst = tempfile::tempdir().unwrap();
    let client = Arc::new(
        MockHttpClient::new()
            .with_file("http://x/big.bin", vec![1u8; 64])
            .stalling_after("http://x/big.bin", 16),
    );
    let remote = Root::parse("http://x/", None).unwrap();
    let config = ReconcileConfig {
        workers: 1,
        timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };

    let report = Reconciler::new(config, client)
        .reconcile(dst.path(), &remote, vec![TransferJob::new("big.bin", "big.bin")])
        .await
        .unwrap();

    assert!(report.timed_out);
    assert!(!dst.path().join("big.bin").exists());
}

#[tokio::test]
async fn directories_and_escaping_names_are_skipped() {
    let base = tempfile::tempdir().unwrap();
    let src = base.path().join("src");
    let dst = base.path().join("dst");
    write_source(&src);
    fs::create_dir_all(&dst).unwrap();

    let jobs = vec![
        TransferJob::new("albums/", "albums/"),
        TransferJob::new("../outside.txt", "readme.txt"),
        TransferJob::new(format!("partial{}", TEMP_SUFFIX), "readme.txt"),
    ];
    let report = Reconciler::new(ReconcileConfig::default(), no_http())
        .reconcile(&dst, &local_root(&src), jobs)
        .await
        .unwrap();

    assert_eq!(report.skipped, 3);
    assert_eq!(report.transferred(), 0);
    assert!(!base.path().join("outside.txt").exists());
}

#[tokio::test]
async fn sync_then_rescan_finds_nothing_missing() {
    let base = tempfile::tempdir().unwrap();
    let src = base.path().join("src");
    let dst = base.path().join("dst");
    write_source(&src);
    fs::create_dir_all(dst.join("albums")).unwrap();
    fs::write(dst.join("albums/local-only.txt"), b"mine").unwrap();

    let (root_src, root_dst) = (local_root(&src), local_root(&dst));
    let map_src = Walker::new(create_listing(&root_src, no_http())).walk().await.unwrap();
    let map_dst = Walker::new(create_listing(&root_dst, no_http())).walk().await.unwrap();

    let missing = diff(&map_src, &map_dst, false);
    assert_eq!(
        missing,
        vec!["albums/live/", "albums/live/two.flac", "albums/one.flac", "readme.txt"]
    );

    let report = Reconciler::new(ReconcileConfig::default(), no_http())
        .reconcile(&dst, &root_src, TransferJob::from_diff(&missing, &map_src))
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.transferred(), 3);

    let rescanned = Walker::new(create_listing(&root_dst, no_http())).walk().await.unwrap();
    assert!(diff(&map_src, &rescanned, false).is_empty());
    assert_eq!(diff(&rescanned, &map_src, false), vec!["albums/local-only.txt"]);
}
