//! ECH 密钥同步
//!
//! 中心下发的密钥以 camelCase JSON 返回，落盘为 snake_case YAML（`keys:` 列表），
//! 文件含私钥，权限 0600。

use crate::error::{Result, SidecarError};
use crate::fs::{ensure_dir, write_with_mode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// 单条 ECH 密钥
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct EchKeyConfig {
    #[serde(alias = "config_id")]
    pub config_id: u8,
    #[serde(alias = "private_key")]
    pub private_key: String,
    #[serde(alias = "public_key")]
    pub public_key: String,
    #[serde(alias = "kem_id")]
    pub kem_id: u16,
    #[serde(alias = "kdf_id")]
    pub kdf_id: u16,
    #[serde(alias = "aead_id")]
    pub aead_id: u16,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "expires_at", skip_serializing_if = "is_zero")]
    pub expires_at: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// 密钥文件结构
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchKeysFile {
    pub keys: Vec<EchKeyConfig>,
}

/// 中心 `/slave/ech/keys` 的 data 部分
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct EchKeysListData {
    #[serde(default)]
    pub items: Vec<EchKeyConfig>,
}

/// 写入密钥文件，返回写入的密钥数量
pub fn write_keys_file(path: &Path, keys: Vec<EchKeyConfig>) -> Result<usize> {
    let file = EchKeysFile { keys };
    let yaml = serde_yaml::to_string(&file)?;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    write_with_mode(path, yaml.as_bytes(), 0o600)?;

    info!(
        "[ECH] Keys written to {} ({} keys)",
        path.display(),
        file.keys.len()
    );
    Ok(file.keys.len())
}

/// 读取 PID 文件并向对应进程发送 SIGHUP
#[cfg(unix)]
pub fn send_sighup(pid_file: &Path) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let content = std::fs::read_to_string(pid_file)
        .map_err(|e| SidecarError::config(format!("read pid file: {e}")))?;
    let pid: i32 = content
        .trim()
        .parse()
        .map_err(|e| SidecarError::config(format!("parse pid: {e}")))?;

    kill(Pid::from_raw(pid), Signal::SIGHUP)
        .map_err(|e| SidecarError::transport(format!("send SIGHUP: {e}")))?;

    info!("[ECH] Sent SIGHUP to pid {}", pid);
    Ok(())
}

#[cfg(not(unix))]
pub fn send_sighup(_pid_file: &Path) -> Result<()> {
    Err(SidecarError::config("SIGHUP is only supported on unix"))
}
