//! 兑换编排服务
//!
//! 外部唯一调用入口，处理顺序：
//!
//! 1. 读取定向信息（不存在 -> NotFound）
//! 2. 资格判定（不满足 -> Forbidden，不调用反欺诈和分配器）
//! 3. 反欺诈校验（缓存优先，拒绝 -> Forbidden，不消耗库存）
//! 4. 原子分配并写入兑换事件，结果原样返回

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use promo_shared::observability::metrics;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::eligibility;
use crate::error::{ForbiddenReason, RedemptionError, Result};
use crate::fraud::FraudGate;
use crate::models::{
    AllocationRequest, CampaignMode, CampaignStats, RedemptionEvent, UserContext,
};
use crate::repository::CampaignRepositoryTrait;

/// 兑换编排服务
pub struct RedemptionService {
    campaign_repo: Arc<dyn CampaignRepositoryTrait>,
    fraud_gate: FraudGate,
}

impl RedemptionService {
    pub fn new(campaign_repo: Arc<dyn CampaignRepositoryTrait>, fraud_gate: FraudGate) -> Self {
        Self {
            campaign_repo,
            fraud_gate,
        }
    }

    /// 兑换，返回发放的码
    pub async fn redeem(&self, user: &UserContext, campaign_id: Uuid) -> Result<String> {
        self.redeem_at(user, campaign_id, Utc::now()).await
    }

    /// 以指定时刻兑换
    #[instrument(skip(self, user), fields(user_id = %user.id, campaign_id = %campaign_id))]
    pub async fn redeem_at(
        &self,
        user: &UserContext,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let start = Instant::now();
        let mut mode = None;

        let result = self.execute_redemption(user, campaign_id, now, &mut mode).await;

        let mode_label = mode.map(|m| m.as_str()).unwrap_or("UNKNOWN");
        let elapsed = start.elapsed().as_secs_f64();
        match &result {
            Ok(_) => metrics::record_redemption(mode_label, "success", elapsed),
            Err(e) => {
                metrics::record_redemption(mode_label, e.outcome(), elapsed);
                if e.is_business_error() {
                    info!(error_code = e.error_code(), reason = %e, "兑换被拒绝");
                } else {
                    warn!(error_code = e.error_code(), error = %e, "兑换失败");
                }
            }
        }

        result
    }

    /// 查询用户兑换历史
    #[instrument(skip(self), fields(user_id = %user_id, limit = %limit))]
    pub async fn list_user_redemptions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RedemptionEvent>> {
        self.campaign_repo
            .list_user_redemptions(user_id, limit.max(0))
            .await
    }

    /// 活动兑换统计
    #[instrument(skip(self), fields(campaign_id = %campaign_id))]
    pub async fn campaign_stats(&self, campaign_id: Uuid) -> Result<CampaignStats> {
        self.campaign_repo.campaign_stats(campaign_id).await
    }

    // ==================== 私有方法 ====================

    async fn execute_redemption(
        &self,
        user: &UserContext,
        campaign_id: Uuid,
        now: DateTime<Utc>,
        mode: &mut Option<CampaignMode>,
    ) -> Result<String> {
        // 1. 定向信息
        let targeting = self
            .campaign_repo
            .get_targeting(campaign_id)
            .await?
            .ok_or(RedemptionError::CampaignNotFound(campaign_id))?;
        *mode = Some(targeting.mode);

        // 2. 资格判定
        eligibility::check(user.age, user.country.as_deref(), &targeting)
            .map_err(RedemptionError::Forbidden)?;

        // 3. 反欺诈
        if !self.fraud_gate.is_allowed(&user.email, campaign_id, now).await {
            return Err(RedemptionError::Forbidden(ForbiddenReason::FraudDenied));
        }

        // 4. 分配
        let allocation = self
            .campaign_repo
            .allocate(&AllocationRequest {
                campaign_id,
                user_id: user.id,
                age: user.age,
                country: user.country.clone(),
                now,
            })
            .await?;

        info!(
            mode = allocation.mode.as_str(),
            event_id = %allocation.event.id,
            "兑换成功"
        );

        Ok(allocation.into_code())
    }
}
