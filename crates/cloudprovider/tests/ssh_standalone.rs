//! SSH 独立主机驱动：孤立节点筛选与流量读取

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use cloudprovider::ssh_standalone::{DEFAULT_TRAFFIC_TOTAL_BYTES, HostExecutor, SshStandaloneProvider};
use cloudprovider::{Provider, ProviderError, Result, TrafficConfig};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

async fn setup_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory sqlite");

    sqlx::query(
        r#"
        CREATE TABLE slave_nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            deleted_at DATETIME,
            ipv4 VARCHAR(20) NOT NULL UNIQUE,
            ipv6 VARCHAR(64),
            name VARCHAR(255) NOT NULL,
            country VARCHAR(5),
            region VARCHAR(50)
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create slave_nodes");

    sqlx::query(
        r#"
        CREATE TABLE cloud_instances (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            deleted_at DATETIME,
            provider VARCHAR(20) NOT NULL,
            instance_id VARCHAR(100) NOT NULL,
            ip_address VARCHAR(45) NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create cloud_instances");

    pool
}

async fn insert_node(pool: &SqlitePool, ipv4: &str, name: &str, region: &str) {
    sqlx::query("INSERT INTO slave_nodes (ipv4, name, region) VALUES (?, ?, ?)")
        .bind(ipv4)
        .bind(name)
        .bind(region)
        .execute(pool)
        .await
        .expect("Failed to insert node");
}

async fn insert_instance(pool: &SqlitePool, ip: &str) {
    sqlx::query("INSERT INTO cloud_instances (provider, instance_id, ip_address) VALUES ('aws_lightsail', 'i-1', ?)")
        .bind(ip)
        .execute(pool)
        .await
        .expect("Failed to insert cloud instance");
}

/// 记录命令并按前缀返回预设输出
#[derive(Default)]
struct FakeExecutor {
    config: Option<String>,
    fail_vnstat: bool,
    commands: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl HostExecutor for FakeExecutor {
    async fn exec(&self, ipv4: &str, command: &str) -> Result<String> {
        self.commands
            .lock()
            .unwrap()
            .push((ipv4.to_string(), command.to_string()));

        if command.starts_with("cat ") {
            return Ok(self.config.clone().unwrap_or_default());
        }
        if command.starts_with("mkdir") {
            return Ok(String::new());
        }
        if command.starts_with("vnstat") {
            if self.fail_vnstat {
                return Err(ProviderError::transport("ssh: connect to host port 22: Connection refused"));
            }
            let now = Utc::now();
            return Ok(format!(
                r#"{{"vnstatversion":"2.6","jsonversion":"2","interfaces":[{{"name":"eth0","traffic":{{"month":[{{"date":{{"year":{},"month":{}}},"rx":1073741824,"tx":2147483648}}]}}}}]}}"#,
                now.year(),
                now.month()
            ));
        }
        Err(ProviderError::transport(format!("unexpected command: {command}")))
    }
}

#[tokio::test]
async fn test_orphan_selection_and_soft_delete() {
    let pool = setup_db().await;
    insert_node(&pool, "192.168.1.1", "Node 1", "us-west").await;
    insert_node(&pool, "192.168.1.2", "Node 2", "eu-central").await;
    insert_node(&pool, "192.168.1.3", "Node 3", "ap-east").await;
    insert_instance(&pool, "192.168.1.1").await;

    let provider = SshStandaloneProvider::new("default", pool.clone(), Arc::new(FakeExecutor::default()));

    let ips: HashSet<String> = provider
        .list_instances()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.ip_address)
        .collect();
    assert_eq!(ips, HashSet::from(["192.168.1.2".to_string(), "192.168.1.3".to_string()]));

    // 软删除云实例后节点重新成为孤立节点
    sqlx::query("UPDATE cloud_instances SET deleted_at = CURRENT_TIMESTAMP WHERE ip_address = '192.168.1.1'")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(provider.list_instances().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_status_reads_vnstat_and_config() {
    let pool = setup_db().await;
    insert_node(&pool, "192.168.1.1", "Test Node", "us-west").await;

    let config = TrafficConfig {
        traffic_total_bytes: 1024 * 1024 * 1024 * 1024,
        traffic_reset_at: 1_700_000_000,
    };
    let executor = Arc::new(FakeExecutor {
        config: Some(config.render()),
        ..Default::default()
    });
    let provider = SshStandaloneProvider::new("default", pool, executor.clone());

    let status = provider.get_instance_status("192.168.1.1").await.unwrap();
    assert_eq!(status.instance_id, "192.168.1.1");
    assert_eq!(status.name, "Test Node");
    assert_eq!(status.region, "us-west");
    assert_eq!(status.state, "running");
    assert_eq!(status.traffic_used_bytes, 1073741824 + 2147483648);
    assert_eq!(status.traffic_total_bytes, config.traffic_total_bytes);
    assert_eq!(status.traffic_reset_at.unwrap().timestamp(), 1_700_000_000);

    // 已有合法配置时不重写
    let commands = executor.commands.lock().unwrap();
    assert!(!commands.iter().any(|(_, c)| c.starts_with("mkdir")));
}

#[tokio::test]
async fn test_missing_config_written_and_ssh_failure_degrades() {
    let pool = setup_db().await;
    insert_node(&pool, "10.0.0.9", "Broken", "").await;

    let executor = Arc::new(FakeExecutor {
        config: None,
        fail_vnstat: true,
        ..Default::default()
    });
    let provider = SshStandaloneProvider::new("default", pool, executor.clone());

    let status = provider.get_instance_status("10.0.0.9").await.unwrap();
    assert_eq!(status.state, "error");
    assert_eq!(status.traffic_used_bytes, 0);
    assert_eq!(status.traffic_total_bytes, DEFAULT_TRAFFIC_TOTAL_BYTES);

    let commands = executor.commands.lock().unwrap();
    let write = commands
        .iter()
        .find(|(_, c)| c.starts_with("mkdir"))
        .expect("default config should be written");
    assert!(write.1.contains("traffic_total_bytes: 2199023255552"));
}

#[tokio::test]
async fn test_non_orphan_and_unknown_rejected() {
    let pool = setup_db().await;
    insert_node(&pool, "192.168.1.1", "Managed", "us-west").await;
    insert_instance(&pool, "192.168.1.1").await;

    let provider = SshStandaloneProvider::new("default", pool, Arc::new(FakeExecutor::default()));
    assert!(provider.get_instance_status("192.168.1.1").await.unwrap_err().is_not_found());
    assert!(provider.get_instance_status("192.168.1.99").await.unwrap_err().is_not_found());

    assert!(provider.delete_instance("192.168.1.1").await.unwrap_err().is_unsupported());
    assert!(provider.list_regions().await.unwrap().is_empty());
}
