//! 设备认证缓存
//!
//! 以 UDID 为键，同时缓存成功结果（30 分钟）与 401 失败结果（5 分钟）。
//! 缓存的 token 与请求不一致时视为未命中。

use crate::clock::{self, Clock};
use crate::types::AuthErrorCode;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 成功结果的缓存时长
pub const POSITIVE_TTL: Duration = Duration::from_secs(30 * 60);
/// 401 失败结果的缓存时长，短于成功缓存，给用户刷新 token 的机会
pub const NEGATIVE_TTL: Duration = Duration::from_secs(5 * 60);
/// 过期条目清理间隔
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct AuthCacheItem {
    token: String,
    expired_at: DateTime<Utc>,
    is_valid: bool,
    error_code: AuthErrorCode,
}

/// 缓存查询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthCacheResult {
    pub found: bool,
    pub is_valid: bool,
    /// 仅在 `is_valid = false` 时有意义
    pub error_code: AuthErrorCode,
}

impl AuthCacheResult {
    const MISS: Self = Self {
        found: false,
        is_valid: false,
        error_code: AuthErrorCode::None,
    };
}

pub struct AuthCache {
    items: RwLock<HashMap<String, AuthCacheItem>>,
    clock: Arc<dyn Clock>,
}

impl Default for AuthCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthCache {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())
    }

    pub async fn set_success(&self, udid: &str, token: &str, ttl: Duration) {
        let item = AuthCacheItem {
            token: token.to_string(),
            expired_at: self.expiry(ttl),
            is_valid: true,
            error_code: AuthErrorCode::None,
        };
        self.items.write().await.insert(udid.to_string(), item);
    }

    /// 写入失败缓存
    pub async fn set_failure(&self, udid: &str, token: &str, ttl: Duration, code: AuthErrorCode) {
        let item = AuthCacheItem {
            token: token.to_string(),
            expired_at: self.expiry(ttl),
            is_valid: false,
            error_code: code,
        };
        self.items.write().await.insert(udid.to_string(), item);
    }

    pub async fn get_result(&self, udid: &str, token: &str) -> AuthCacheResult {
        let items = self.items.read().await;
        let Some(item) = items.get(udid) else {
            return AuthCacheResult::MISS;
        };
        if self.clock.now() > item.expired_at || item.token != token {
            return AuthCacheResult::MISS;
        }
        AuthCacheResult {
            found: true,
            is_valid: item.is_valid,
            error_code: item.error_code,
        }
    }

    /// 只在命中成功缓存时返回 true
    pub async fn get(&self, udid: &str, token: &str) -> bool {
        let result = self.get_result(udid, token).await;
        result.found && result.is_valid
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// 删除过期条目，返回删除数量
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| now <= item.expired_at);
        before - items.len()
    }

    /// 启动后台清理任务，收到关闭信号后退出
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.purge_expired().await;
                        if removed > 0 {
                            debug!("[Auth] Swept {} expired cache entries", removed);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("[Auth] Cache sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn cache() -> (AuthCache, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        (AuthCache::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_positive_entry_expires() {
        let (cache, clock) = cache();
        cache.set_success("udid1", "tok", POSITIVE_TTL).await;
        assert!(cache.get("udid1", "tok").await);

        clock.advance(chrono::Duration::minutes(29));
        assert!(cache.get("udid1", "tok").await);

        clock.advance(chrono::Duration::minutes(2));
        assert!(!cache.get("udid1", "tok").await);
    }

    #[tokio::test]
    async fn test_token_mismatch_is_miss() {
        let (cache, _) = cache();
        cache.set_success("udid1", "tok", POSITIVE_TTL).await;
        let result = cache.get_result("udid1", "other").await;
        assert!(!result.found);
        assert!(!cache.get_result("udid2", "tok").await.found);
    }

    #[tokio::test]
    async fn test_negative_entry() {
        let (cache, clock) = cache();
        cache
            .set_failure("udid1", "tok", NEGATIVE_TTL, AuthErrorCode::InvalidToken)
            .await;

        let result = cache.get_result("udid1", "tok").await;
        assert!(result.found);
        assert!(!result.is_valid);
        assert_eq!(result.error_code, AuthErrorCode::InvalidToken);
        assert!(!cache.get("udid1", "tok").await);

        clock.advance(chrono::Duration::seconds(5 * 60 + 1));
        assert!(!cache.get_result("udid1", "tok").await.found);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (cache, clock) = cache();
        cache.set_success("a", "t", POSITIVE_TTL).await;
        cache
            .set_failure("b", "t", NEGATIVE_TTL, AuthErrorCode::InvalidToken)
            .await;
        assert_eq!(cache.len().await, 2);

        clock.advance(chrono::Duration::minutes(10));
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("a", "t").await);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let cache = Arc::new(AuthCache::new());
        let (tx, rx) = broadcast::channel(1);
        let handle = cache.spawn_sweeper(Duration::from_millis(10), rx);
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
