//! 在主机上执行 shell 命令的能力

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// 按 IPv4 在主机上执行命令，返回 stdout
#[async_trait]
pub trait HostExecutor: Send + Sync {
    async fn exec(&self, ipv4: &str, command: &str) -> Result<String>;
}

/// 调用系统 `ssh` 客户端的执行器
#[derive(Debug, Clone)]
pub struct OpenSshExecutor {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for OpenSshExecutor {
    fn default() -> Self {
        Self {
            user: "ubuntu".to_string(),
            port: 22,
            identity_file: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl HostExecutor for OpenSshExecutor {
    async fn exec(&self, ipv4: &str, command: &str) -> Result<String> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", self.user, ipv4)).arg(command);
        cmd.kill_on_drop(true);

        debug!("[SSH] {}@{}: {}", self.user, ipv4, command.lines().next().unwrap_or(""));
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ProviderError::Timeout(format!("ssh {ipv4} timed out")))?
            .map_err(|e| ProviderError::transport(format!("failed to spawn ssh: {e}")))?;

        if !output.status.success() {
            return Err(ProviderError::transport(format!(
                "ssh {ipv4} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
