//! 协调端数据库中的节点表查询
//!
//! 孤立节点：在 `slave_nodes` 中存在、且没有未软删除的 `cloud_instances` 记录。

use crate::error::{ProviderError, Result};
use sqlx::sqlite::SqlitePool;

/// 节点表中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: i64,
    pub ipv4: String,
    pub ipv6: String,
    pub name: String,
    pub country: String,
    pub region: String,
}

type NodeRow = (i64, String, Option<String>, String, Option<String>, Option<String>);

impl From<NodeRow> for NodeRecord {
    fn from((id, ipv4, ipv6, name, country, region): NodeRow) -> Self {
        Self {
            id,
            ipv4,
            ipv6: ipv6.unwrap_or_default(),
            name,
            country: country.unwrap_or_default(),
            region: region.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeStore {
    pool: SqlitePool,
}

impl NodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_orphans(&self) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT id, ipv4, ipv6, name, country, region
            FROM slave_nodes
            WHERE deleted_at IS NULL
              AND ipv4 NOT IN (
                SELECT ip_address FROM cloud_instances WHERE deleted_at IS NULL
              )
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(NodeRecord::from).collect())
    }

    /// 按 IPv4 取孤立节点，不存在或已被云实例管理都返回 `NotFound`
    pub async fn get_orphan(&self, ipv4: &str) -> Result<NodeRecord> {
        let row = sqlx::query_as::<_, NodeRow>(
            "SELECT id, ipv4, ipv6, name, country, region FROM slave_nodes WHERE ipv4 = ? AND deleted_at IS NULL",
        )
        .bind(ipv4)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ProviderError::not_found("slave node", ipv4))?;

        let (managed,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM cloud_instances WHERE ip_address = ? AND deleted_at IS NULL",
        )
        .bind(ipv4)
        .fetch_one(&self.pool)
        .await?;

        if managed > 0 {
            return Err(ProviderError::not_found("orphan node", ipv4));
        }
        Ok(row.into())
    }
}
