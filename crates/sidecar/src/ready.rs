//! 就绪标记
//!
//! 证书与配置都落盘后写入 `<config_dir>/.ready`（内容为 Unix 时间戳），
//! 同机的服务进程轮询该文件后再启动。

use crate::error::Result;
use crate::fs::{ensure_dir, write_with_mode};
use std::path::Path;
use tracing::info;

pub fn write_ready_marker(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let timestamp = chrono::Utc::now().timestamp().to_string();
    write_with_mode(path, timestamp.as_bytes(), 0o644)?;
    info!("[Ready] Created ready flag: {}", path.display());
    Ok(())
}

/// 启动时清除上一次运行留下的标记
pub fn clear_ready_marker(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("[Ready] Removed stale ready flag: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
