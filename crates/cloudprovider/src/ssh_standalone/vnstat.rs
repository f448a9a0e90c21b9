//! `vnstat --json m` 输出解析

use crate::error::{ProviderError, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Report {
    interfaces: Vec<Interface>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Interface {
    name: String,
    traffic: Traffic,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Traffic {
    month: Vec<MonthEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MonthEntry {
    date: MonthDate,
    rx: i64,
    tx: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MonthDate {
    year: i32,
    month: u32,
}

/// 取 `iface` 在 `now` 所在自然月的 rx + tx
///
/// 本月还没有记录时返回 0。
pub fn monthly_usage(output: &str, iface: &str, now: DateTime<Utc>) -> Result<i64> {
    let report: Report = serde_json::from_str(output)
        .map_err(|e| ProviderError::transport(format!("invalid vnstat output: {e}")))?;

    let interface = report
        .interfaces
        .iter()
        .find(|i| i.name == iface)
        .ok_or_else(|| ProviderError::not_found("vnstat interface", iface))?;

    Ok(interface
        .traffic
        .month
        .iter()
        .find(|m| m.date.year == now.year() && m.date.month == now.month())
        .map(|m| m.rx + m.tx)
        .unwrap_or(0))
}

pub fn command(iface: &str) -> String {
    format!("vnstat -i {iface} --json m 2>/dev/null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const OUTPUT: &str = r#"{"vnstatversion":"2.6","jsonversion":"2","interfaces":[
        {"name":"eth0","traffic":{"month":[
            {"date":{"year":2024,"month":1},"rx":100,"tx":200},
            {"date":{"year":2024,"month":2},"rx":1073741824,"tx":2147483648}
        ]}}
    ]}"#;

    #[test]
    fn test_current_month() {
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        assert_eq!(monthly_usage(OUTPUT, "eth0", now).unwrap(), 3221225472);

        let march = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(monthly_usage(OUTPUT, "eth0", march).unwrap(), 0);
    }

    #[test]
    fn test_errors() {
        let now = Utc::now();
        assert!(monthly_usage(OUTPUT, "ens3", now).unwrap_err().is_not_found());
        assert!(monthly_usage("", "eth0", now).unwrap_err().is_transport());
    }
}
