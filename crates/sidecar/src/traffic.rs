//! 计费周期流量统计
//!
//! 以 `billing_start_date` 的日期为每月结算日（UTC 零点），统计主网卡在
//! 当前周期内的收发字节数。结算日超过当月天数时取当月最后一天。

use crate::clock::{self, Clock};
use crate::error::{Result, SidecarError};
use crate::netdev::{InterfaceStats, NetDevSource, ProcNetDev, is_virtual_interface};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const BYTES_PER_GB: i64 = 1 << 30;

/// 主网卡重新探测间隔
fn redetect_interval() -> chrono::Duration {
    chrono::Duration::hours(1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    /// 当前周期结束时间（Unix 秒）
    pub billing_cycle_end_at: i64,
    /// 月流量上限（字节），0 表示不限
    pub monthly_traffic_limit_bytes: i64,
    pub used_traffic_bytes: i64,
}

#[derive(Debug)]
struct CycleState {
    primary_interface: String,
    last_detected_at: DateTime<Utc>,
    cycle_start_bytes: u64,
    cycle_end_at: DateTime<Utc>,
}

pub struct TrafficMonitor {
    anchor_day: u32,
    traffic_limit_gb: i64,
    source: Arc<dyn NetDevSource>,
    clock: Arc<dyn Clock>,
    state: RwLock<CycleState>,
}

/// 解析 `YYYY-MM-DD`，返回结算日
pub fn parse_anchor_day(billing_start_date: &str) -> Result<u32> {
    if billing_start_date.trim().is_empty() {
        return Err(SidecarError::config("billing start date is required"));
    }
    NaiveDate::parse_from_str(billing_start_date.trim(), "%Y-%m-%d")
        .map(|d| d.day())
        .map_err(|e| {
            SidecarError::config(format!(
                "invalid billing start date '{billing_start_date}', expected YYYY-MM-DD: {e}"
            ))
        })
}

fn days_in_month(year: i32, month: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.checked_add_months(Months::new(1)))
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// 某年某月的结算时刻
fn cycle_boundary(year: i32, month: u32, anchor_day: u32) -> DateTime<Utc> {
    let day = anchor_day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 严格晚于 `now` 的下一个结算时刻
pub fn next_cycle_end(anchor_day: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let this_month = cycle_boundary(now.year(), now.month(), anchor_day);
    if now < this_month {
        return this_month;
    }
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    cycle_boundary(year, month, anchor_day)
}

/// 收发总量最大的物理网卡
fn detect_primary(stats: &[InterfaceStats]) -> Option<&InterfaceStats> {
    stats
        .iter()
        .filter(|s| !is_virtual_interface(&s.name))
        .filter(|s| s.total_bytes() > 0)
        .max_by_key(|s| s.total_bytes())
}

impl TrafficMonitor {
    /// 使用 `/proc/net/dev` 与系统时钟
    pub fn new(billing_start_date: &str, traffic_limit_gb: i64) -> Result<Self> {
        Self::with_source(
            billing_start_date,
            traffic_limit_gb,
            Arc::new(ProcNetDev::default()),
            clock::system(),
        )
    }

    pub fn with_source(
        billing_start_date: &str,
        traffic_limit_gb: i64,
        source: Arc<dyn NetDevSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let anchor_day = parse_anchor_day(billing_start_date)?;
        let now = clock.now();

        let stats = source.read_stats()?;
        let primary = detect_primary(&stats)
            .ok_or_else(|| SidecarError::config("no valid network interface found"))?;
        let primary_interface = primary.name.clone();
        let current = primary.total_bytes();
        let cycle_end_at = next_cycle_end(anchor_day, now);

        info!(
            "[Traffic] Monitor initialized: interface={}, billingDate={}, limitGB={}, startBytes={}",
            primary_interface, billing_start_date, traffic_limit_gb, current
        );

        Ok(Self {
            anchor_day,
            traffic_limit_gb,
            source,
            clock,
            state: RwLock::new(CycleState {
                primary_interface,
                last_detected_at: now,
                cycle_start_bytes: current,
                cycle_end_at,
            }),
        })
    }

    pub async fn primary_interface(&self) -> String {
        self.state.read().await.primary_interface.clone()
    }

    fn read_interface_bytes(&self, interface: &str) -> Result<u64> {
        self.source
            .read_stats()?
            .into_iter()
            .find(|s| s.name == interface)
            .map(|s| s.total_bytes())
            .ok_or_else(|| SidecarError::transport(format!("interface {interface} not found")))
    }

    /// 需要时重新探测主网卡并推进计费周期
    async fn refresh(&self, now: DateTime<Utc>) {
        {
            let state = self.state.read().await;
            if now < state.cycle_end_at && now - state.last_detected_at <= redetect_interval() {
                return;
            }
        }

        let mut state = self.state.write().await;

        if now - state.last_detected_at > redetect_interval() {
            match self.source.read_stats() {
                Ok(stats) => match detect_primary(&stats) {
                    Some(primary) => {
                        if primary.name != state.primary_interface {
                            info!(
                                "[Traffic] Primary interface changed: {} -> {} (totalBytes={})",
                                state.primary_interface,
                                primary.name,
                                primary.total_bytes()
                            );
                            state.primary_interface = primary.name.clone();
                            state.cycle_start_bytes = primary.total_bytes();
                        }
                        state.last_detected_at = now;
                    }
                    None => warn!("[Traffic] Failed to re-detect interface: no valid interface"),
                },
                Err(e) => warn!("[Traffic] Failed to re-detect interface: {}", e),
            }
        }

        // 重新检查，避免并发重复重置
        if now >= state.cycle_end_at {
            match self.read_interface_bytes(&state.primary_interface) {
                Ok(current) => {
                    let old_end = state.cycle_end_at;
                    state.cycle_start_bytes = current;
                    state.cycle_end_at = next_cycle_end(self.anchor_day, now);
                    info!(
                        "[Traffic] Billing cycle reset: oldEnd={}, newEnd={}, cycleStartBytes={}",
                        old_end.format("%Y-%m-%d"),
                        state.cycle_end_at.format("%Y-%m-%d"),
                        current
                    );
                }
                Err(e) => warn!("[Traffic] Failed to reset cycle: {}", e),
            }
        }
    }

    /// 当前周期的流量统计
    pub async fn stats(&self) -> Result<TrafficStats> {
        let now = self.clock.now();
        self.refresh(now).await;

        let interface = self.primary_interface().await;
        let current = self.read_interface_bytes(&interface)?;

        let mut state = self.state.write().await;
        if current < state.cycle_start_bytes {
            // 计数器归零（重启或网卡重建），从当前读数重新计
            warn!(
                "[Traffic] Counter went backwards on {}: {} < {}, rebaselining",
                interface, current, state.cycle_start_bytes
            );
            state.cycle_start_bytes = current;
        }
        let used = current - state.cycle_start_bytes;

        Ok(TrafficStats {
            billing_cycle_end_at: state.cycle_end_at.timestamp(),
            monthly_traffic_limit_bytes: self.traffic_limit_gb.saturating_mul(BYTES_PER_GB),
            used_traffic_bytes: i64::try_from(used).unwrap_or(i64::MAX),
        })
    }
}
