//! 连接 URL 解析
//!
//! `k2v5://<user>:<pass>@<host>:<port>?ech=<b64>&pin=<sha256:...>`
//! 只取出 `pin` 与 `ech` 两个参数，随 k2v5 隧道一起注册。

use std::path::Path;
use tracing::{info, warn};
use url::Url;

/// 解析连接 URL，返回 `(pin, ech)`；无法解析时都为空串
pub fn parse_connect_url(raw: &str) -> (String, String) {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return (String::new(), String::new());
    };
    let Some(query) = parsed.query() else {
        return (String::new(), String::new());
    };

    let mut pin = String::new();
    let mut ech = String::new();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        // base64 中的 '+' 需要原样保留，不按表单编码解码
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "pin" if pin.is_empty() => pin = value,
            "ech" if ech.is_empty() => ech = value,
            _ => {}
        }
    }
    (pin, ech)
}

/// 读取 `connect-url.txt`；文件不存在时返回空串
pub fn read_connect_url(path: &Path) -> (String, String) {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let (pin, ech) = parse_connect_url(&content);
            if !pin.is_empty() {
                let preview: String = pin.chars().take(16).collect();
                info!(
                    "[ConnectURL] Parsed k2v5 connect URL: pin={}... ech={} bytes",
                    preview,
                    ech.len()
                );
            }
            (pin, ech)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (String::new(), String::new()),
        Err(e) => {
            warn!("[ConnectURL] Failed to read {}: {}", path.display(), e);
            (String::new(), String::new())
        }
    }
}
