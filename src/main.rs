//! K2 节点 sidecar 主程序
//!
//! 加载配置后向中心注册节点，落盘证书并渲染本机服务配置，随后运行
//! RADIUS 桥接与状态上报直到收到关闭信号

mod cli;

use clap::Parser;
use k2_sidecar::SidecarConfig;
use k2_sidecar::agent::Agent;
use k2_sidecar::error::{Error, Result};
use k2_sidecar::observability::init_observability;
use k2_sidecar::process::{PidFileGuard, ProcessManager, spawn_signal_handler};
use std::path::{Path, PathBuf};
use tracing::{error, info};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};

const SYSTEM_CONFIG_PATH: &str = "/etc/kaitu/sidecar.toml";

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Check { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::check_config_file(&config_path)
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            runtime.block_on(ApplicationLauncher::run_application(
                &config_path,
                cli.pid_file.as_deref(),
            ))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            } else {
                bootstrap_error!("Provided config file not found: {:?}", provided_path);
                return Err(Error::custom(format!(
                    "Config file not found: {provided_path:?}"
                )));
            }
        }

        let fallback_paths = vec![
            // 1. Current working directory
            PathBuf::from("config.toml"),
            // 2. System config directory
            PathBuf::from(SYSTEM_CONFIG_PATH),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            } else {
                bootstrap_info!("Config not found at: {:?}", path);
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: k2-sidecar --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 加载配置并叠加环境变量，校验失败时打印全部问题
    fn load_config(config_path: &Path) -> Result<SidecarConfig> {
        let mut config = SidecarConfig::from_file(config_path).map_err(|e| {
            bootstrap_error!("❌ 配置加载失败: {}", e);
            Error::service_validation(format!("配置解析失败: {e}"))
        })?;
        config.apply_env_overrides();
        bootstrap_info!("✅ 配置加载成功: {:?}", config_path);

        if let Err(errors) = config.validate() {
            bootstrap_error!("❌ 配置验证发现问题:");
            let mut has_critical_errors = false;
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, err);
                    has_critical_errors = true;
                }
            }
            if has_critical_errors {
                return Err(Error::service_validation("配置验证失败，请修复上述错误"));
            }
        }

        Ok(config)
    }

    /// 检查配置文件是否有效
    fn check_config_file(config_path: &Path) -> Result<()> {
        Self::load_config(config_path)?;
        bootstrap_info!("✅ 配置验证通过");
        Ok(())
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path, pid_file: Option<&Path>) -> Result<()> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);
        let config = Self::load_config(config_path)?;

        let _observability_guard = init_observability(&config)?;

        // 命令行参数优先于配置文件
        let pid_path = pid_file
            .map(Path::to_path_buf)
            .or_else(|| config.get_pid_path().map(PathBuf::from));
        let pid_path = ProcessManager::write_pid_file(pid_path.as_deref())?;
        let _pid_guard = PidFileGuard::new(pid_path);

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(10);
        spawn_signal_handler(shutdown_tx.clone());

        info!("🚀 启动 K2 sidecar");
        if let Err(e) = Agent::new(config).run(shutdown_tx).await {
            error!("❌ sidecar 运行失败: {}", e);
            return Err(e);
        }

        info!("🛑 sidecar 已安全关闭");
        Ok(())
    }
}
