//! 腾讯云 API 3.0 签名（TC3-HMAC-SHA256）

use super::{hmac_sha256, sha256_hex};
use chrono::{DateTime, Utc};

pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// TC3 签名器
#[derive(Debug, Clone)]
pub struct Tc3Signer {
    secret_id: String,
    secret_key: String,
    service: String,
}

impl Tc3Signer {
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            service: service.into(),
        }
    }

    /// 生成 `Authorization` 头
    ///
    /// 只签 `content-type` 与 `host` 两个头，请求方法固定为 POST。
    pub fn authorization(&self, host: &str, payload: &str, timestamp: DateTime<Utc>) -> String {
        let canonical_request = format!(
            "POST\n/\n\ncontent-type:{CONTENT_TYPE}\nhost:{host}\n\ncontent-type;host\n{}",
            sha256_hex(payload.as_bytes())
        );

        let date = timestamp.format("%Y-%m-%d").to_string();
        let scope = format!("{date}/{}/tc3_request", self.service);
        let string_to_sign = format!(
            "TC3-HMAC-SHA256\n{}\n{scope}\n{}",
            timestamp.timestamp(),
            sha256_hex(canonical_request.as_bytes())
        );

        let secret_date = hmac_sha256(format!("TC3{}", self.secret_key).as_bytes(), date.as_bytes());
        let secret_service = hmac_sha256(&secret_date, self.service.as_bytes());
        let secret_signing = hmac_sha256(&secret_service, b"tc3_request");
        let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes()));

        format!(
            "TC3-HMAC-SHA256 Credential={}/{scope}, SignedHeaders=content-type;host, Signature={signature}",
            self.secret_id
        )
    }
}
