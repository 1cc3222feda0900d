//! 反欺诈放行缓存
//!
//! identity -> cleared_until。读取时再次比较时间，`now >= cleared_until` 视为未命中。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use promo_shared::cache::{Cache, CacheKey};
use promo_shared::error::InfraError;
use tracing::debug;

/// 放行缓存接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClearanceCache: Send + Sync {
    /// 返回仍然有效的放行截止时间
    async fn get(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, InfraError>;

    /// 写入放行截止时间，已过期的值不写入
    async fn put(
        &self,
        identity: &str,
        cleared_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError>;
}

/// Redis 实现
///
/// 值为 RFC 3339 时间，TTL 取剩余有效期与上限中的较小者
pub struct RedisClearanceCache {
    cache: Arc<Cache>,
    max_ttl: Duration,
}

impl RedisClearanceCache {
    pub fn new(cache: Arc<Cache>, max_ttl: Duration) -> Self {
        Self { cache, max_ttl }
    }
}

#[async_trait]
impl ClearanceCache for RedisClearanceCache {
    async fn get(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, InfraError> {
        let key = CacheKey::fraud_clearance(identity);
        let cached: Option<DateTime<Utc>> = self.cache.get(&key).await?;
        Ok(cached.filter(|until| *until > now))
    }

    async fn put(
        &self,
        identity: &str,
        cleared_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let Some(ttl) = clearance_ttl(cleared_until, now, self.max_ttl) else {
            debug!(identity, %cleared_until, "放行时间已过，跳过缓存");
            return Ok(());
        };

        self.cache
            .set(&CacheKey::fraud_clearance(identity), &cleared_until, ttl)
            .await
    }
}

/// 进程内实现，用于测试和本地运行
#[derive(Default)]
pub struct MemoryClearanceCache {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryClearanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ClearanceCache for MemoryClearanceCache {
    async fn get(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, InfraError> {
        let key = identity.to_lowercase();
        let until = self.entries.get(&key).map(|entry| *entry.value());

        match until {
            Some(until) if until > now => Ok(Some(until)),
            Some(_) => {
                self.entries.remove_if(&key, |_, until| *until <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        identity: &str,
        cleared_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        if cleared_until > now {
            self.entries.insert(identity.to_lowercase(), cleared_until);
        }
        Ok(())
    }
}

fn clearance_ttl(
    cleared_until: DateTime<Utc>,
    now: DateTime<Utc>,
    max_ttl: Duration,
) -> Option<Duration> {
    let remaining = (cleared_until - now).to_std().ok()?;
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(max_ttl))
}
