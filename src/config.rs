//! 应用配置模块
//!
//! 三个来源按优先级合并: 命令行参数 > `SITESCAN_*` 环境变量 > JSON 配置文件 > 默认值。
//! 命令行和环境变量由 clap 一起解析，配置文件只补充前两者没有给出的值。

use crate::core::{LinkMode, ReconcileConfig};
use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::storage::Credentials;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件，位于当前目录
pub const DEFAULT_CONFIG_FILE: &str = "sitescan_config.json";

const DEFAULT_SITE1_NAME: &str = "Site 1";
const DEFAULT_SITE2_NAME: &str = "Site 2";

/// Compare two directory trees (HTTP listings or local paths) and optionally
/// copy what the second one is missing
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "sitescan",
    version,
    about = "Compare two directory trees served over HTTP or found on disk",
    after_help = "EXAMPLES:\n    \
        sitescan --site1 https://mirror-a.example.org/pub/ --site2 https://mirror-b.example.org/pub/\n    \
        sitescan --site1 https://mirror.example.org/isos/ --site2 /srv/isos --sync -w 8\n    \
        sitescan --site1 /data/a --site2 /data/b --suppress-dirs --no-progress"
)]
pub struct CliArgs {
    /// First site: http(s) URL or local directory
    #[arg(long, env = "SITESCAN_SITE1", value_name = "URL|PATH")]
    pub site1: Option<String>,

    /// User name for the first site
    #[arg(long = "site1user", env = "SITESCAN_SITE1USER", value_name = "USER")]
    pub site1_user: Option<String>,

    /// Password for the first site
    #[arg(long = "site1pass", env = "SITESCAN_SITE1PASS", value_name = "PASS")]
    pub site1_pass: Option<String>,

    /// Display name for the first site
    #[arg(long = "site1name", env = "SITESCAN_SITE1NAME", value_name = "NAME")]
    pub site1_name: Option<String>,

    /// Second site: http(s) URL or local directory
    #[arg(long, env = "SITESCAN_SITE2", value_name = "URL|PATH")]
    pub site2: Option<String>,

    /// User name for the second site
    #[arg(long = "site2user", env = "SITESCAN_SITE2USER", value_name = "USER")]
    pub site2_user: Option<String>,

    /// Password for the second site
    #[arg(long = "site2pass", env = "SITESCAN_SITE2PASS", value_name = "PASS")]
    pub site2_pass: Option<String>,

    /// Display name for the second site
    #[arg(long = "site2name", env = "SITESCAN_SITE2NAME", value_name = "NAME")]
    pub site2_name: Option<String>,

    /// Config file (JSON)
    #[arg(short = 'c', long, env = "SITESCAN_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug output on the console
    #[arg(short = 'd', long, env = "SITESCAN_DEBUG")]
    pub debug: bool,

    /// Copy entries only found at site1 into site2 (a local directory)
    #[arg(long, env = "SITESCAN_SYNC")]
    pub sync: bool,

    /// With --sync, only list what would be transferred
    #[arg(long = "dry-run", env = "SITESCAN_DRYRUN")]
    pub dry_run: bool,

    /// Number of concurrent transfers
    #[arg(short = 'w', long, env = "SITESCAN_WORKERS", value_name = "NUM")]
    pub workers: Option<usize>,

    /// Stop transferring after this many hours (fractions allowed)
    #[arg(long, env = "SITESCAN_TIMEOUT", value_name = "HOURS")]
    pub timeout: Option<f64>,

    /// Leave directories out of the report
    #[arg(long = "suppress-dirs", env = "SITESCAN_SUPPRESSDIRS")]
    pub suppress_dirs: bool,

    /// Do not show walk progress
    #[arg(long = "no-progress", env = "SITESCAN_NOPROGRESS")]
    pub no_progress: bool,

    /// Always copy local files instead of trying a hard link first
    #[arg(long = "no-link", env = "SITESCAN_NOLINK")]
    pub no_link: bool,
}

/// 配置文件内容，键与命令行参数同名
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    pub site1: Option<String>,
    #[serde(rename = "site1user")]
    pub site1_user: Option<String>,
    #[serde(rename = "site1pass")]
    pub site1_pass: Option<String>,
    #[serde(rename = "site1name")]
    pub site1_name: Option<String>,
    pub site2: Option<String>,
    #[serde(rename = "site2user")]
    pub site2_user: Option<String>,
    #[serde(rename = "site2pass")]
    pub site2_pass: Option<String>,
    #[serde(rename = "site2name")]
    pub site2_name: Option<String>,
    pub debug: Option<bool>,
    pub sync: Option<bool>,
    pub dry_run: Option<bool>,
    pub workers: Option<usize>,
    pub timeout: Option<f64>,
    pub suppress_dirs: Option<bool>,
    pub no_progress: Option<bool>,
    pub no_link: Option<bool>,
    pub log: LogConfig,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// 加载配置文件
    ///
    /// 指定的文件不存在时记录一条提示并退回默认文件；默认文件不存在则使用空配置。
    pub fn load(explicit: Option<&Path>, notices: &mut Vec<String>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Self::from_file(path);
            }
            notices.push(format!(
                "config file {} not found, trying {}",
                path.display(),
                DEFAULT_CONFIG_FILE
            ));
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.is_file() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 去掉值两端的双引号
pub fn strip_quotes(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

/// 一个站点的最终配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    pub locator: String,
    pub user: String,
    pub pass: String,
    pub name: String,
}

impl SiteConfig {
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(&self.user, &self.pass)
    }
}

/// 合并后的运行配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub site1: SiteConfig,
    pub site2: SiteConfig,
    pub debug: bool,
    pub sync: bool,
    pub dry_run: bool,
    pub workers: usize,
    pub timeout_hours: Option<f64>,
    pub suppress_dirs: bool,
    pub no_progress: bool,
    pub no_link: bool,
    pub log: LogConfig,
    /// 加载过程中的提示，日志初始化后输出
    pub notices: Vec<String>,
}

fn pick(cli: Option<String>, file: Option<String>) -> Option<String> {
    cli.or(file).map(|v| strip_quotes(&v))
}

fn site(
    locator: Option<String>,
    user: Option<String>,
    pass: Option<String>,
    name: Option<String>,
    default_name: &str,
    flag: &str,
) -> Result<SiteConfig, ConfigError> {
    let locator = locator
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ConfigError::MissingSite(flag.to_string()))?;
    Ok(SiteConfig {
        locator,
        user: user.unwrap_or_default(),
        pass: pass.unwrap_or_default(),
        name: name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_name.to_string()),
    })
}

impl AppConfig {
    /// 解析命令行和环境变量，再合并配置文件
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let mut notices = Vec::new();
        let file = FileConfig::load(cli.config.as_deref(), &mut notices)?;
        let mut config = Self::merge(cli, file)?;
        config.notices = notices;
        Ok(config)
    }

    /// 合并两层配置；开关类参数在任一来源打开即生效
    pub fn merge(cli: CliArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let site1 = site(
            pick(cli.site1, file.site1),
            pick(cli.site1_user, file.site1_user),
            pick(cli.site1_pass, file.site1_pass),
            pick(cli.site1_name, file.site1_name),
            DEFAULT_SITE1_NAME,
            "site1",
        )?;
        let site2 = site(
            pick(cli.site2, file.site2),
            pick(cli.site2_user, file.site2_user),
            pick(cli.site2_pass, file.site2_pass),
            pick(cli.site2_name, file.site2_name),
            DEFAULT_SITE2_NAME,
            "site2",
        )?;

        if site1.locator.trim_end_matches('/') == site2.locator.trim_end_matches('/') {
            return Err(ConfigError::IdenticalRoots(site1.locator));
        }

        let defaults = ReconcileConfig::default();
        Ok(Self {
            site1,
            site2,
            debug: cli.debug || file.debug.unwrap_or(false),
            sync: cli.sync || file.sync.unwrap_or(false),
            dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
            workers: cli.workers.or(file.workers).unwrap_or(defaults.workers).max(1),
            timeout_hours: cli.timeout.or(file.timeout),
            suppress_dirs: cli.suppress_dirs || file.suppress_dirs.unwrap_or(false),
            no_progress: cli.no_progress || file.no_progress.unwrap_or(false),
            no_link: cli.no_link || file.no_link.unwrap_or(false),
            log: file.log,
            notices: Vec::new(),
        })
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            workers: self.workers,
            dry_run: self.dry_run,
            timeout: self
                .timeout_hours
                .and_then(ReconcileConfig::timeout_from_hours),
            link_mode: if self.no_link {
                LinkMode::CopyOnly
            } else {
                LinkMode::LinkFirst
            },
            ..ReconcileConfig::default()
        }
    }
}
