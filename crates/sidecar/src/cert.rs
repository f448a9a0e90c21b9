//! 隧道证书落盘
//!
//! 每个域名保存一份 `<domain>-cert.pem` / `<domain>-key.pem`，
//! 再链接（失败时复制）到固定文件名 `server-cert.pem` / `server-key.pem` 供服务进程读取。

use crate::error::{Result, SidecarError};
use crate::fs::{ensure_dir, write_with_mode};
use crate::types::TunnelCertificate;
use std::path::Path;
use tracing::{info, warn};

pub const SERVER_CERT_FILE: &str = "server-cert.pem";
pub const SERVER_KEY_FILE: &str = "server-key.pem";

const CERT_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

impl TunnelCertificate {
    /// 写入证书与私钥，证书 0644、私钥 0600
    pub fn save_to_files(&self, dir: &Path, cert_file: &str, key_file: &str) -> Result<()> {
        ensure_dir(dir)
            .map_err(|e| SidecarError::certificate(format!("failed to create cert directory: {e}")))?;

        let cert_path = dir.join(cert_file);
        write_with_mode(&cert_path, self.ssl_cert.as_bytes(), CERT_MODE)
            .map_err(|e| SidecarError::certificate(format!("failed to write certificate: {e}")))?;
        info!("[Certificate] Saved certificate to: {}", cert_path.display());

        let key_path = dir.join(key_file);
        write_with_mode(&key_path, self.ssl_key.as_bytes(), KEY_MODE)
            .map_err(|e| SidecarError::certificate(format!("failed to write private key: {e}")))?;
        info!("[Certificate] Saved private key to: {}", key_path.display());

        Ok(())
    }
}

/// 将 `dir/source` 链接为 `dir/target`，无法创建符号链接时以 `mode` 复制内容
///
/// 先删除旧目标再建链接；调用时服务进程尚未启动，不存在读到半成品的问题。
pub fn link_or_copy(dir: &Path, source: &str, target: &str, mode: u32) -> Result<()> {
    let target_path = dir.join(target);

    match std::fs::remove_file(&target_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("[Certificate] Failed to remove {}: {}", target_path.display(), e),
    }

    #[cfg(unix)]
    let linked = std::os::unix::fs::symlink(source, &target_path);
    #[cfg(not(unix))]
    let linked: std::io::Result<()> = Err(std::io::Error::other("symlink unsupported"));

    if let Err(e) = linked {
        warn!("[Certificate] Symlink failed, copying instead: {}", e);
        copy_with_mode(dir, source, target, mode)?;
    }
    Ok(())
}

fn copy_with_mode(dir: &Path, source: &str, target: &str, mode: u32) -> Result<()> {
    let data = std::fs::read(dir.join(source))
        .map_err(|e| SidecarError::certificate(format!("failed to read source file: {e}")))?;
    write_with_mode(&dir.join(target), &data, mode)
        .map_err(|e| SidecarError::certificate(format!("failed to write target file: {e}")))
}

/// 保存某个域名的证书并更新固定文件名
pub fn persist_tunnel_cert(dir: &Path, domain: &str, cert: &TunnelCertificate) -> Result<()> {
    let cert_file = format!("{domain}-cert.pem");
    let key_file = format!("{domain}-key.pem");

    cert.save_to_files(dir, &cert_file, &key_file)?;
    link_or_copy(dir, &cert_file, SERVER_CERT_FILE, CERT_MODE)?;
    link_or_copy(dir, &key_file, SERVER_KEY_FILE, KEY_MODE)?;

    info!(
        "[Certificate] Linked {} certificate to {}",
        domain,
        dir.join(SERVER_CERT_FILE).display()
    );
    Ok(())
}
