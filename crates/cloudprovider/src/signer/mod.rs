//! 厂商 API 请求签名
//!
//! - [`rpc`]: 阿里云 RPC 风格（HMAC-SHA1，SWAS 使用）
//! - [`tc3`]: 腾讯云 TC3-HMAC-SHA256（Lighthouse 使用）
//! - [`sigv4`]: AWS Signature V4（Lightsail 使用）

pub mod rpc;
pub mod sigv4;
pub mod tc3;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC 接受任意长度的密钥
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
