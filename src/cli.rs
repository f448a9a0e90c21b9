//! 命令行界面定义
//!
//! 定义了主程序的命令行参数和选项
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "k2-sidecar")]
#[command(version)]
#[command(
    about = "K2 node sidecar: registers the node, persists certificates, renders configs and reports status"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    /// Configuration file path (defaults to searching standard locations)
    #[arg(short, long, default_value = "config.toml")]
    pub(crate) config: PathBuf,

    /// PID file path (overrides `pid` in the config file)
    #[arg(long)]
    pub(crate) pid_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Load and validate the configuration file, then exit
    Check {
        /// Configuration file path (optional, defaults to --config)
        #[arg(index = 1)]
        config_file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_subcommand() {
        let cli = Cli::parse_from(["k2-sidecar", "check", "/tmp/sidecar.toml"]);
        match cli.command {
            Some(Commands::Check { config_file }) => {
                assert_eq!(config_file, Some(PathBuf::from("/tmp/sidecar.toml")))
            }
            None => panic!("expected check subcommand"),
        }
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from([
            "k2-sidecar",
            "--config",
            "/etc/kaitu/sidecar.toml",
            "--pid-file",
            "/run/k2-sidecar.pid",
        ]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("/etc/kaitu/sidecar.toml"));
        assert_eq!(cli.pid_file, Some(PathBuf::from("/run/k2-sidecar.pid")));
    }
}
