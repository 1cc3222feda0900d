//! PostgreSQL 连接池
//!
//! 兑换分配在单个事务内持有活动行或码池行锁，并发兑换数受连接池上限约束。
//! 迁移由持有 migrations 目录的服务 crate 通过 `Migrator` 传入。

use crate::config::DatabaseConfig;
use crate::error::{InfraError, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// 兑换引擎使用的连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池
    ///
    /// 获取连接超时返回 `Database` 错误，调用方不重试
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            min_connections = config.min_connections,
            acquire_timeout_secs = config.connect_timeout_seconds,
            "PostgreSQL 连接池已建立"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行 `SELECT 1`
    pub async fn health_check(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::from)?;

        if one != 1 {
            return Err(InfraError::Internal(format!(
                "unexpected health check result: {}",
                one
            )));
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL 连接池已关闭");
    }

    /// 应用活动、码池和兑换事件表的迁移
    #[instrument(skip(self, migrator), fields(migrations = migrator.iter().count()))]
    pub async fn run_migrations(&self, migrator: &Migrator) -> Result<()> {
        migrator.run(&self.pool).await?;
        info!("数据库迁移完成");
        Ok(())
    }
}
