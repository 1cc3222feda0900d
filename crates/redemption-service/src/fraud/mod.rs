//! 反欺诈校验
//!
//! `FraudGate` 先查放行缓存，未命中再调用反欺诈服务，服务不可用时拒绝。
//! 缓存读写失败只记录告警，按未命中处理。

pub mod cache;
pub mod client;
pub mod dto;

pub use cache::{ClearanceCache, MemoryClearanceCache, RedisClearanceCache};
pub use client::{FraudCheckClient, HttpFraudClient};
pub use dto::{FraudCheckRequest, FraudCheckResponse, FraudVerdict};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use promo_shared::observability::metrics;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// 缓存 + 远程调用的组合判定
#[derive(Clone)]
pub struct FraudGate {
    cache: Arc<dyn ClearanceCache>,
    client: Arc<dyn FraudCheckClient>,
}

impl FraudGate {
    pub fn new(cache: Arc<dyn ClearanceCache>, client: Arc<dyn FraudCheckClient>) -> Self {
        Self { cache, client }
    }

    /// 是否放行
    #[instrument(skip(self, identity), fields(campaign_id = %campaign_id))]
    pub async fn is_allowed(&self, identity: &str, campaign_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.cache.get(identity, now).await {
            Ok(Some(until)) => {
                debug!(cleared_until = %until, "命中放行缓存，跳过反欺诈调用");
                metrics::record_fraud_check("cache", true);
                return true;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "读取放行缓存失败，按未命中处理"),
        }

        let verdict = match self.client.check(identity, campaign_id).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, error_code = e.code(), "反欺诈服务不可用，拒绝兑换");
                metrics::record_fraud_check("remote", false);
                return false;
            }
        };

        if verdict.allowed
            && let Some(until) = verdict.cleared_until
            && let Err(e) = self.cache.put(identity, until, now).await
        {
            warn!(error = %e, "写入放行缓存失败");
        }

        metrics::record_fraud_check("remote", verdict.allowed);
        verdict.allowed
    }
}
