//! 驱动共用的 HTTP 客户端构造

use crate::error::{ProviderError, Result};
use std::time::Duration;

/// 厂商 API 默认超时
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::transport(format!("failed to build HTTP client: {e}")))
}

/// 读取响应体，同时返回状态码
///
/// 不在这里判断状态码，各厂商的错误信封不同，由驱动自行解析。
pub(crate) async fn read_response(response: reqwest::Response) -> Result<(u16, String)> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::transport(format!("failed to read response body: {e}")))?;
    Ok((status, body))
}

/// 把 `https://` 开头的端点拆出 host，用于签名
pub(crate) fn host_of(endpoint: &str) -> String {
    url::Url::parse(endpoint)
        .ok()
        .and_then(|u| {
            u.host_str().map(|h| match u.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            })
        })
        .unwrap_or_else(|| endpoint.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://lighthouse.tencentcloudapi.com"),
            "lighthouse.tencentcloudapi.com"
        );
        assert_eq!(host_of("http://127.0.0.1:8080/"), "127.0.0.1:8080");
    }
}
